use super::{Session, SessionError};
use crate::builders::vm::{virtual_machine_instance_resource, virtual_machine_resource};
use crate::conditions;
use crate::poll::{PollSpec, ProbeResult};
use crate::wait::WaitError;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::DynamicObject;
use std::sync::Mutex;
use tracing::info;

impl Session {
    /// Wait for a pod in the session namespace to report `Ready=True`
    pub async fn wait_pod_ready(&self, name: &str, spec: PollSpec) -> Result<Pod, SessionError> {
        let pod = self.wait_for(name, spec, conditions::pod_ready).await?;
        info!(namespace = %self.namespace(), name = %name, "Pod ready");
        Ok(pod)
    }

    pub async fn wait_deployment_available(
        &self,
        name: &str,
        spec: PollSpec,
    ) -> Result<Deployment, SessionError> {
        let deployment = self
            .wait_for(name, spec, conditions::deployment_available)
            .await?;
        info!(namespace = %self.namespace(), name = %name, "Deployment available");
        Ok(deployment)
    }

    pub async fn wait_daemonset_ready(
        &self,
        name: &str,
        spec: PollSpec,
    ) -> Result<DaemonSet, SessionError> {
        let daemonset = self
            .wait_for(name, spec, conditions::daemonset_ready)
            .await?;
        info!(namespace = %self.namespace(), name = %name, "DaemonSet ready");
        Ok(daemonset)
    }

    /// Wait for a KubeVirt VirtualMachine to report `Ready=True`
    pub async fn wait_vm_ready(
        &self,
        name: &str,
        spec: PollSpec,
    ) -> Result<DynamicObject, SessionError> {
        self.wait_for_dynamic(&virtual_machine_resource(), name, spec, conditions::vm_ready)
            .await
    }

    pub async fn wait_vmi_ready(
        &self,
        name: &str,
        spec: PollSpec,
    ) -> Result<DynamicObject, SessionError> {
        self.wait_for_dynamic(
            &virtual_machine_instance_resource(),
            name,
            spec,
            conditions::vmi_ready,
        )
        .await
    }

    pub async fn wait_vmi_running(
        &self,
        name: &str,
        spec: PollSpec,
    ) -> Result<DynamicObject, SessionError> {
        self.wait_for_dynamic(
            &virtual_machine_instance_resource(),
            name,
            spec,
            conditions::vmi_running,
        )
        .await
    }

    /// Wait until every node is in a perfect state
    ///
    /// Returns the nodes as last observed.
    pub async fn wait_nodes_perfect(&self, spec: PollSpec) -> Result<Vec<Node>, SessionError> {
        let last_state = Mutex::new("not observed".to_string());
        let last = &last_state;

        let outcome = spec
            .run_until(move || async move {
                let state = match self.list_cluster::<Node>(None).await {
                    Ok(nodes) if nodes.is_empty() => "no nodes".to_string(),
                    Ok(nodes) => {
                        let imperfect: Vec<String> = nodes
                            .iter()
                            .filter_map(|n| {
                                let cond = conditions::node_imperfect_condition(n)?;
                                let name = n.metadata.name.as_deref().unwrap_or("<unnamed>");
                                Some(format!("{name}: {cond}"))
                            })
                            .collect();
                        if imperfect.is_empty() {
                            return ProbeResult::ready(nodes);
                        }
                        imperfect.join("; ")
                    }
                    Err(e) => e.to_string(),
                };
                if let Ok(mut guard) = last.lock() {
                    *guard = state;
                }
                ProbeResult::pending(Vec::new())
            })
            .await;

        outcome.map_err(|e| {
            let state = last_state
                .into_inner()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            WaitError::from_poll("nodes", &e).with_state(state).into()
        })
    }
}
