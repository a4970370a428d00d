//! Starting a test run
//!
//! Each entry point returns the [`Session`] the run works through together
//! with the privileged [`Credential`] it started as, which is what a grant
//! rolls back to.
//!
//! ```ignore
//! let (mut session, privileged) = bootstrap::start_with_service_account(&AuthConfig::from_env()).await?;
//! ```

use crate::config::{AuthConfig, ConfigError};
use crate::session::{Credential, Session, SessionError};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Write a kubeconfig for the configured account and connect with it
pub async fn start_with_service_account(
    auth: &AuthConfig,
) -> Result<(Session, Credential), BootstrapError> {
    let path = auth.write_kubeconfig()?;
    let session = Session::from_kubeconfig(&path)
        .await?
        .with_namespace(auth.namespace());

    let credential = Credential::new(auth.sa_name())
        .with_namespace(auth.namespace())
        .with_token(auth.sa_token());

    info!(
        account = %credential.name(),
        namespace = %session.namespace(),
        "Started with service account"
    );
    Ok((session, credential))
}

/// Connect with whatever kubeconfig or in-cluster environment is available
///
/// The credential is reconstructed from the resolved config. Its token may be
/// empty when the config authenticates another way (client certificates,
/// exec plugins), in which case it cannot be switched back to.
pub async fn start_with_auto_resolve() -> Result<(Session, Credential), BootstrapError> {
    let session = Session::infer().await?;
    Ok(with_current_credential(session))
}

/// Connect with the kubeconfig at `path`
pub async fn start_with_kubeconfig(
    path: &Path,
) -> Result<(Session, Credential), BootstrapError> {
    let session = Session::from_kubeconfig(path).await?;
    Ok(with_current_credential(session))
}

fn with_current_credential(session: Session) -> (Session, Credential) {
    let credential = session.current_credential();
    if !credential.has_token() {
        warn!(
            account = %credential.name(),
            "Resolved config has no bearer token; escalation setup will refuse it"
        );
    }
    info!(
        account = %credential.name(),
        namespace = %session.namespace(),
        "Started with resolved config"
    );
    (session, credential)
}

/// `prefix` followed by random lowercase hex, `len` characters in total
///
/// Suitable for namespace, VM and workload names.
pub fn random_name(prefix: &str, len: usize) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let name = format!("{prefix}-{suffix}");
    if name.len() <= len {
        name
    } else {
        name[..len.max(prefix.len() + 2)].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_name() {
        let name = random_name("node-e2e", 13);
        assert_eq!(name.len(), 13);
        assert!(name.starts_with("node-e2e-"));
        assert_ne!(random_name("node-e2e", 13), name);
    }

    #[test]
    fn test_random_name_keeps_prefix() {
        let name = random_name("a-very-long-prefix", 5);
        assert!(name.starts_with("a-very-long-prefix-"));
        assert_eq!(name.len(), "a-very-long-prefix".len() + 2);
    }

    #[tokio::test]
    async fn test_start_with_service_account_requires_settings() {
        let dir = tempfile::tempdir().unwrap();
        let auth = AuthConfig::new().with_base_dir(dir.path());

        let err = start_with_service_account(&auth).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Config(ConfigError::Missing(_))));
    }

    #[tokio::test]
    async fn test_start_with_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "\
apiVersion: v1
kind: Config
clusters:
- name: local
  cluster:
    server: http://127.0.0.1:6443
users:
- name: reader
  user:
    token: reader-token
contexts:
- name: local
  context:
    cluster: local
    user: reader
    namespace: e2e
current-context: local
",
        )
        .unwrap();

        let (session, credential) = start_with_kubeconfig(&path).await.unwrap();
        assert_eq!(session.namespace(), "e2e");
        assert_eq!(credential.token(), "reader-token");
    }
}
