//! Deployment creation, rollout restart and teardown

mod common;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use node_e2e::builders::{
    pod_spec, restart_patch, selector_string, match_labels, ContainerFixture, DeploymentFixture,
};

const WORKLOAD: &str = "rollout-e2e";
const IMAGE: &str = "registry.k8s.io/e2e-test-images/busybox:1.36.1-1";

#[tokio::test]
#[ignore] // Requires real cluster
async fn test_deployment_rollout() {
    let (session, escalation) =
        common::start("deployment-roller", "default", "deployment-roller.yaml").await;
    let wait = common::every(2, 3);
    let selector = selector_string(&match_labels([("app", WORKLOAD)]));

    let container = ContainerFixture::new(WORKLOAD, IMAGE)
        .args(&["sleep", "100000000"])
        .requests("100m", "256Mi")
        .build();
    let deployment = DeploymentFixture::new(WORKLOAD, pod_spec(vec![], vec![container]))
        .replicas(2)
        .build();

    match session.create(&deployment).await {
        Ok(_) => {}
        Err(e) if e.is_already_exists() => {}
        Err(e) => panic!("{e}"),
    }
    session.wait_deployment_available(WORKLOAD, wait).await.unwrap();

    // Rollout restart replaces every pod
    let old: Vec<Pod> = session.list(Some(&selector)).await.unwrap();
    session
        .patch_merge::<Deployment>(WORKLOAD, &restart_patch())
        .await
        .unwrap();
    for pod in &old {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        session.wait_deleted::<Pod>(name, wait).await.unwrap();
    }
    tracing::info!(replaced = old.len(), "Old pods deleted");

    let new: Vec<Pod> = session.list(Some(&selector)).await.unwrap();
    for pod in &new {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        session.wait_pod_ready(name, wait).await.unwrap();
    }

    // Teardown
    session.delete::<Deployment>(WORKLOAD).await.unwrap();
    session.wait_deleted::<Deployment>(WORKLOAD, wait).await.unwrap();
    session
        .wait_for_list::<Pod, _>(&selector, wait, <[Pod]>::is_empty)
        .await
        .unwrap();

    common::finish(session, escalation).await;
}
