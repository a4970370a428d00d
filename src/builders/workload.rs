//! Deployment and DaemonSet builders, plus the rollout restart patch

use super::pod::tolerate_everything;
use super::selector::match_labels;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde_json::json;
use std::collections::BTreeMap;

/// Annotation `kubectl rollout restart` sets on the pod template
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Merge patch that triggers a rollout of every pod in a workload
pub fn restart_patch() -> serde_json::Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        RESTARTED_AT_ANNOTATION: chrono::Utc::now().to_rfc3339()
                    }
                }
            }
        }
    })
}

fn template(name: Option<&str>, labels: &BTreeMap<String, String>, spec: PodSpec) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            name: name.map(str::to_string),
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(spec),
    }
}

/// Builder for Deployment resources
///
/// Pods are labelled `app=<name>` and selected by their labels unless a
/// selector is given.
#[derive(Clone)]
pub struct DeploymentFixture {
    name: String,
    namespace: Option<String>,
    replicas: i32,
    labels: BTreeMap<String, String>,
    selector: Option<LabelSelector>,
    pod_spec: PodSpec,
}

impl DeploymentFixture {
    #[must_use]
    pub fn new(name: &str, pod_spec: PodSpec) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            replicas: 1,
            labels: BTreeMap::from([("app".to_string(), name.to_string())]),
            selector: None,
            pod_spec,
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Set the replica count
    ///
    /// # Panics
    /// Panics if replicas is negative
    #[must_use]
    pub fn replicas(mut self, replicas: i32) -> Self {
        assert!(replicas >= 0, "replica count cannot be negative");
        self.replicas = replicas;
        self
    }

    /// Replace the pod labels
    #[must_use]
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn selector(mut self, selector: LabelSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    #[must_use]
    pub fn build(&self) -> Deployment {
        let selector = self
            .selector
            .clone()
            .unwrap_or_else(|| match_labels(self.labels.clone()));

        Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: self.namespace.clone(),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector,
                template: template(None, &self.labels, self.pod_spec.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Builder for DaemonSet resources
#[derive(Clone)]
pub struct DaemonSetFixture {
    name: String,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    selector: Option<LabelSelector>,
    service_account: Option<String>,
    tolerate_all: bool,
    pod_spec: PodSpec,
}

impl DaemonSetFixture {
    #[must_use]
    pub fn new(name: &str, pod_spec: PodSpec) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            labels: BTreeMap::from([("app".to_string(), name.to_string())]),
            selector: None,
            service_account: None,
            tolerate_all: false,
            pod_spec,
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    #[must_use]
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn selector(mut self, selector: LabelSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Run the pods as `name`
    #[must_use]
    pub fn service_account(mut self, name: &str) -> Self {
        self.service_account = Some(name.to_string());
        self
    }

    /// Schedule onto every node regardless of taints
    #[must_use]
    pub fn tolerate_all_taints(mut self) -> Self {
        self.tolerate_all = true;
        self
    }

    #[must_use]
    pub fn build(&self) -> DaemonSet {
        let selector = self
            .selector
            .clone()
            .unwrap_or_else(|| match_labels(self.labels.clone()));

        let mut spec = self.pod_spec.clone();
        if let Some(sa) = &self.service_account {
            spec.service_account_name = Some(sa.clone());
        }
        if self.tolerate_all {
            spec.tolerations = Some(vec![tolerate_everything()]);
        }

        DaemonSet {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: self.namespace.clone(),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                selector,
                template: template(Some(&self.name), &self.labels, spec),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
