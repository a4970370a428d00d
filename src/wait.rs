//! Rich wait errors with debugging context
//!
//! A bare [`PollError`] only says the deadline passed. Waits on cluster
//! objects wrap it in a [`WaitError`] that also carries the object reference
//! and the last state that was observed before giving up.
//!
//! # Example
//!
//! ```ignore
//! match session.wait_deployment_available("web", spec).await {
//!     Err(SessionError::WaitTimeout(err)) => {
//!         println!("Resource: {}", err.resource);
//!         println!("Last state: {}", err.last_state);
//!         println!("Elapsed: {:?}", err.elapsed);
//!     }
//!     _ => {}
//! }
//! ```

use crate::poll::PollError;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Pod, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::DynamicObject;
use std::fmt;
use std::time::Duration;

/// Rich error context for wait operations
#[derive(Debug, Clone)]
pub struct WaitError {
    /// Resource reference (e.g., "deployment/myapp")
    pub resource: String,
    /// Description of the last observed state
    pub last_state: String,
    /// How long we waited before giving up
    pub elapsed: Duration,
    /// The timeout that was configured
    pub timeout: Duration,
    /// Number of probes issued
    pub attempts: u32,
}

impl WaitError {
    pub fn new(resource: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            resource: resource.into(),
            last_state: "unknown".to_string(),
            elapsed,
            timeout,
            attempts: 0,
        }
    }

    /// Build from the poller's deadline error
    pub fn from_poll(resource: impl Into<String>, err: &PollError) -> Self {
        let PollError::DeadlineExceeded {
            timeout,
            elapsed,
            attempts,
        } = err;
        Self {
            attempts: *attempts,
            ..Self::new(resource, *timeout, *elapsed)
        }
    }

    /// Set the last observed state
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Wait timeout for {}", self.resource)?;
        writeln!(f, "├─ Last state: {}", self.last_state)?;
        writeln!(f, "├─ Probes: {}", self.attempts)?;
        writeln!(f, "├─ Elapsed: {:?}", self.elapsed)?;
        writeln!(f, "└─ Timeout: {:?}", self.timeout)
    }
}

impl std::error::Error for WaitError {}

/// Human-readable description of an object's current state
pub trait ResourceState {
    fn state_description(&self) -> String;
}

impl ResourceState for Deployment {
    fn state_description(&self) -> String {
        let spec_replicas = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = self.status.as_ref();
        let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
        let available = status.and_then(|s| s.available_replicas).unwrap_or(0);
        let unavailable = status.and_then(|s| s.unavailable_replicas).unwrap_or(0);

        if unavailable > 0 {
            format!("{ready}/{spec_replicas} ready, {unavailable} unavailable")
        } else {
            format!("{ready}/{spec_replicas} ready, {available}/{spec_replicas} available")
        }
    }
}

impl ResourceState for Pod {
    fn state_description(&self) -> String {
        let phase = self
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Unknown");

        let containers = self
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref());

        match containers {
            Some(statuses) => {
                let total = statuses.len();
                let ready = statuses.iter().filter(|c| c.ready).count();

                let waiting_reasons: Vec<&str> = statuses
                    .iter()
                    .filter_map(|c| {
                        c.state
                            .as_ref()
                            .and_then(|s| s.waiting.as_ref())
                            .and_then(|w| w.reason.as_deref())
                    })
                    .collect();

                if waiting_reasons.is_empty() {
                    format!("phase={phase}, containers {ready}/{total} ready")
                } else {
                    format!(
                        "phase={phase}, containers {ready}/{total} ready, waiting: {}",
                        waiting_reasons.join(", ")
                    )
                }
            }
            None => format!("phase={phase}, no container status"),
        }
    }
}

impl ResourceState for DaemonSet {
    fn state_description(&self) -> String {
        let status = self.status.as_ref();
        let desired = status.map_or(0, |s| s.desired_number_scheduled);
        let ready = status.map_or(0, |s| s.number_ready);
        let available = status.and_then(|s| s.number_available).unwrap_or(0);

        format!("{ready}/{desired} ready, {available}/{desired} available")
    }
}

impl ResourceState for Node {
    fn state_description(&self) -> String {
        let conditions = self
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                conds
                    .iter()
                    .map(|c| format!("{}={}", c.type_, c.status))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        if conditions.is_empty() {
            "no conditions reported".to_string()
        } else {
            conditions
        }
    }
}

impl ResourceState for ServiceAccount {
    fn state_description(&self) -> String {
        let secrets = self.secrets.as_ref().map_or(0, Vec::len);
        format!("present, {secrets} secret reference(s)")
    }
}

impl ResourceState for Secret {
    fn state_description(&self) -> String {
        let type_ = self.type_.as_deref().unwrap_or("Opaque");
        let keys = self.data.as_ref().map_or(0, |d| d.len());
        format!("type={type_}, {keys} key(s)")
    }
}

impl ResourceState for ClusterRole {
    fn state_description(&self) -> String {
        let rules = self.rules.as_ref().map_or(0, Vec::len);
        format!("present, {rules} rule(s)")
    }
}

impl ResourceState for ClusterRoleBinding {
    fn state_description(&self) -> String {
        let subjects = self.subjects.as_ref().map_or(0, Vec::len);
        format!("bound to {}, {subjects} subject(s)", self.role_ref.name)
    }
}

/// KubeVirt objects: phase plus `type=status` for each condition
impl ResourceState for DynamicObject {
    fn state_description(&self) -> String {
        let status = self.data.get("status");
        let phase = status
            .and_then(|s| s.get("phase"))
            .and_then(|p| p.as_str())
            .unwrap_or("Unknown");
        let conditions: Vec<String> = status
            .and_then(|s| s.get("conditions"))
            .and_then(|c| c.as_array())
            .map(|conds| {
                conds
                    .iter()
                    .filter_map(|c| {
                        let type_ = c.get("type")?.as_str()?;
                        let status = c.get("status")?.as_str()?;
                        Some(format!("{type_}={status}"))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if conditions.is_empty() {
            format!("phase={phase}")
        } else {
            format!("phase={phase}, {}", conditions.join(", "))
        }
    }
}
