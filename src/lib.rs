//! node-e2e - end-to-end testing for Kubernetes and KubeVirt clusters
//!
//! Tests drive a live cluster through a [`Session`], wait on it with the
//! bounded poller in [`poll`], and run their bodies as a ServiceAccount that
//! holds only the permissions in a ClusterRole grant file ([`escalation`]).
//!
//! # Example
//!
//! ```no_run
//! use node_e2e::{bootstrap, AuthConfig, Escalation, PollSpec};
//! use k8s_openapi::api::core::v1::Node;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     node_e2e::telemetry::init_logging();
//!
//!     let (mut session, _) = bootstrap::start_with_service_account(&AuthConfig::from_env()).await?;
//!     let mut escalation = Escalation::new("node-checker", "default", "/abs/testdata/node-lister.yaml");
//!     escalation.setup(&mut session).await?;
//!
//!     let nodes: Vec<Node> = session.list_cluster(None).await?;
//!     println!("{} nodes", nodes.len());
//!     session.wait_nodes_perfect(PollSpec::default().with_timeout(Duration::from_secs(120))).await?;
//!
//!     escalation.finish(&mut session).await?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod builders;
pub mod conditions;
pub mod config;
pub mod escalation;
pub mod poll;
pub mod rbac;
pub mod session;
pub mod telemetry;
pub mod template;
pub mod wait;

// Re-export commonly used types
pub use bootstrap::BootstrapError;
pub use config::{AuthConfig, ConfigError};
pub use escalation::{Escalation, EscalationError, GrantFile, GrantOptions, GrantState};
pub use poll::{FirstProbe, PollError, PollSpec, ProbeResult};
pub use rbac::ClusterRoleBuilder;
pub use session::{Credential, Session, SessionError};
pub use telemetry::{init_json_logging, init_logging};
pub use template::TemplateError;
pub use wait::{ResourceState, WaitError};
