//! Creating objects from templated manifests

mod common;

use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use minijinja::context;
use node_e2e::{bootstrap, template};

#[tokio::test]
#[ignore] // Requires real cluster
async fn test_resource_creation_from_template() {
    node_e2e::init_logging();
    let namespace = bootstrap::random_name("node-e2e", 13);
    let (session, _) = bootstrap::start_with_auto_resolve().await.unwrap();

    let crb: ClusterRoleBinding = template::decode_file(
        &common::testdata("daemon-manager-crb.yaml"),
        context! { namespace => namespace },
    )
    .unwrap();
    let name = crb.metadata.name.clone().unwrap();

    let created = session.create_cluster(&crb).await.unwrap();
    let subject = &created.subjects.unwrap()[0];
    assert_eq!(subject.namespace.as_deref(), Some(namespace.as_str()));

    session.delete_cluster::<ClusterRoleBinding>(&name).await.unwrap();
    session
        .wait_deleted_cluster::<ClusterRoleBinding>(&name, common::every(1, 1))
        .await
        .unwrap();
}
