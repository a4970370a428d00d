//! Container, pod spec and pod builders

use super::quantity::{cpu_limits_from_requests, parse_millis, resource_list};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, PodSecurityContext, PodSpec, ResourceRequirements,
    SecurityContext, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::warn;

/// Grace period applied to every generated pod spec
pub const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 30;

/// Arguments used when a container is given none
pub const DEFAULT_ARGS: &[&str] = &["pause"];

/// Requests and limits; empty or unparseable values are left out
pub fn resource_requirements(
    cpu_requests: &str,
    cpu_limits: &str,
    memory_requests: &str,
    memory_limits: &str,
) -> ResourceRequirements {
    for (what, value) in [
        ("cpu requests", cpu_requests),
        ("cpu limits", cpu_limits),
        ("memory requests", memory_requests),
        ("memory limits", memory_limits),
    ] {
        if !value.is_empty() {
            if let Err(e) = parse_millis(value) {
                warn!(resource = what, value = value, error = %e, "Ignoring resource value");
            }
        }
    }

    ResourceRequirements {
        requests: Some(resource_list(cpu_requests, memory_requests, "", "")),
        limits: Some(resource_list(cpu_limits, memory_limits, "", "")),
        ..Default::default()
    }
}

/// Requests as given, limits with CPU at four times the request and memory equal
pub fn requests_with_derived_limits(cpu: &str, memory: &str) -> ResourceRequirements {
    resource_requirements(cpu, &cpu_limits_from_requests(cpu), memory, memory)
}

/// Builder for a single container
#[derive(Clone)]
pub struct ContainerFixture {
    name: String,
    image: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    ports: Vec<u16>,
    mounts: Vec<VolumeMount>,
    resources: ResourceRequirements,
}

impl ContainerFixture {
    #[must_use]
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            ports: Vec::new(),
            mounts: Vec::new(),
            resources: ResourceRequirements::default(),
        }
    }

    /// Set the container args; `pause` when never called
    #[must_use]
    pub fn args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a container port
    ///
    /// # Panics
    /// Panics if port is zero
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        assert!(port > 0, "port must be in range 1-65535, got {port}");
        self.ports.push(port);
        self
    }

    #[must_use]
    pub fn mount(mut self, volume: &str, path: &str) -> Self {
        self.mounts.push(VolumeMount {
            name: volume.to_string(),
            mount_path: path.to_string(),
            ..Default::default()
        });
        self
    }

    #[must_use]
    pub fn resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    /// Request `cpu` and `memory`, deriving the limits from them
    #[must_use]
    pub fn requests(self, cpu: &str, memory: &str) -> Self {
        self.resources(requests_with_derived_limits(cpu, memory))
    }

    #[must_use]
    pub fn build(&self) -> Container {
        let args = if self.args.is_empty() {
            DEFAULT_ARGS.iter().map(|s| (*s).to_string()).collect()
        } else {
            self.args.clone()
        };

        let env: Vec<EnvVar> = self
            .env
            .iter()
            .map(|(k, v)| EnvVar {
                name: k.clone(),
                value: Some(v.clone()),
                ..Default::default()
            })
            .collect();

        let ports: Vec<ContainerPort> = self
            .ports
            .iter()
            .map(|p| ContainerPort {
                container_port: i32::from(*p),
                ..Default::default()
            })
            .collect();

        Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            args: Some(args),
            env: (!env.is_empty()).then_some(env),
            ports: (!ports.is_empty()).then_some(ports),
            volume_mounts: (!self.mounts.is_empty()).then(|| self.mounts.clone()),
            resources: Some(self.resources.clone()),
            security_context: Some(SecurityContext::default()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            ..Default::default()
        }
    }
}

/// Pod spec with the given volumes and containers
pub fn pod_spec(volumes: Vec<Volume>, containers: Vec<Container>) -> PodSpec {
    PodSpec {
        containers,
        volumes: (!volumes.is_empty()).then_some(volumes),
        security_context: Some(PodSecurityContext::default()),
        termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
        ..Default::default()
    }
}

/// Toleration matching every taint key, value and effect
pub fn tolerate_everything() -> Toleration {
    Toleration {
        operator: Some("Exists".to_string()),
        ..Default::default()
    }
}

/// Builder for bare pods
#[derive(Clone)]
pub struct PodFixture {
    name: String,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
    service_account: Option<String>,
}

impl PodFixture {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            labels: BTreeMap::new(),
            containers: Vec::new(),
            volumes: Vec::new(),
            service_account: None,
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    #[must_use]
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn container(mut self, container: Container) -> Self {
        self.containers.push(container);
        self
    }

    #[must_use]
    pub fn volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }

    #[must_use]
    pub fn service_account(mut self, name: &str) -> Self {
        self.service_account = Some(name.to_string());
        self
    }

    /// Build the Pod resource
    ///
    /// # Panics
    /// Panics if no container was added
    #[must_use]
    pub fn build(&self) -> Pod {
        assert!(
            !self.containers.is_empty(),
            "a pod needs at least one container"
        );

        let mut spec = pod_spec(self.volumes.clone(), self.containers.clone());
        spec.service_account_name = self.service_account.clone();

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: self.namespace.clone(),
                labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
                ..Default::default()
            },
            spec: Some(spec),
            ..Default::default()
        }
    }
}
