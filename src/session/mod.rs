//! Cluster session with switchable credentials
//!
//! A [`Session`] owns the cluster configuration and the client built from it.
//! Exactly one credential is active at a time. Switching it goes through
//! [`Session::activate`], which takes `&mut self`, so no request can be in
//! flight on the same session while the client is being replaced.
//!
//! # Errors
//!
//! Fallible methods return [`SessionError`]. Remote failures keep the
//! underlying `kube::Error` as their source and carry a readable message.

#![allow(clippy::missing_errors_doc)]

mod credential;
mod crud;
mod readiness;
mod waiting;

pub use credential::Credential;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use secrecy::ExposeSecret;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Prefix for the synthesized name of a credential without a username
pub const PLACEHOLDER_PREFIX: &str = "test-sa-";

/// Errors from Session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to create Kubernetes client: {0}")]
    ClientError(String),

    #[error("can not switch to an empty token")]
    EmptyToken,

    #[error("Failed to {verb} {message}")]
    Remote {
        verb: &'static str,
        message: String,
        #[source]
        source: kube::Error,
    },

    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("{0}")]
    WaitTimeout(#[from] crate::wait::WaitError),
}

impl SessionError {
    pub(crate) fn remote(
        verb: &'static str,
        kind: &str,
        name: &str,
        source: kube::Error,
    ) -> Self {
        Self::Remote {
            verb,
            message: improve_error_message(&source, kind, name),
            source,
        }
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            Self::Remote {
                source: kube::Error::Api(ae),
                ..
            } => Some(ae.code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    pub fn is_already_exists(&self) -> bool {
        self.api_code() == Some(409)
    }

    pub fn is_forbidden(&self) -> bool {
        self.api_code() == Some(403)
    }
}

/// Connection to a cluster under one active credential
///
/// ```ignore
/// let mut session = Session::infer().await?;
/// let admin = session.activate(&scoped)?;
/// let nodes: Vec<Node> = session.list_cluster(None).await?;
/// session.activate(&admin)?;
/// ```
pub struct Session {
    config: Config,
    client: Client,
    namespace: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("cluster", &self.config.cluster_url)
            .field("namespace", &self.namespace)
            .field("user", &self.config.auth_info.username)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect using the ambient kubeconfig or in-cluster environment
    pub async fn infer() -> Result<Self, SessionError> {
        let config = Config::infer()
            .await
            .map_err(|e| SessionError::ClientError(e.to_string()))?;
        Self::from_config(config)
    }

    /// Connect using the current context of the kubeconfig at `path`
    pub async fn from_kubeconfig(path: &Path) -> Result<Self, SessionError> {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            SessionError::ClientError(format!("reading {}: {e}", path.display()))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| SessionError::ClientError(e.to_string()))?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, SessionError> {
        let client = Client::try_from(config.clone())
            .map_err(|e| SessionError::ClientError(e.to_string()))?;
        let namespace = config.default_namespace.clone();
        debug!(cluster = %config.cluster_url, namespace = %namespace, "Session created");
        Ok(Self {
            config,
            client,
            namespace,
        })
    }

    /// Use `namespace` for namespaced operations
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.config.default_namespace.clone_from(&self.namespace);
        self
    }

    /// Client for the active credential
    ///
    /// Cloned handles keep the credential that was active when they were
    /// taken; re-fetch after [`Session::activate`].
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reconstruct the active credential from the configuration
    ///
    /// The name is the configured username, or a random `test-sa-` name when
    /// the configuration has none. The token falls back to the contents of
    /// the token file.
    pub fn current_credential(&self) -> Credential {
        let auth = &self.config.auth_info;
        let name = auth.username.clone().unwrap_or_else(placeholder_name);

        let token = match (&auth.token, &auth.token_file) {
            (Some(token), _) => token.expose_secret().to_string(),
            (None, Some(file)) => std::fs::read_to_string(file)
                .map(|t| t.trim().to_string())
                .unwrap_or_default(),
            (None, None) => String::new(),
        };

        Credential::new(name)
            .with_namespace(self.config.default_namespace.clone())
            .with_token(token)
    }

    /// Make `credential` the active identity
    ///
    /// Returns the credential that was active before the switch. An empty
    /// token is refused with [`SessionError::EmptyToken`] and leaves the
    /// session untouched; so does a client rebuild failure.
    ///
    /// Every other authentication source in the configuration (client
    /// certificates, exec plugins, auth providers) is dropped so the bearer
    /// token is the only identity the server sees.
    pub fn activate(&mut self, credential: &Credential) -> Result<Credential, SessionError> {
        if !credential.has_token() {
            return Err(SessionError::EmptyToken);
        }

        let previous = self.current_credential();

        let mut config = self.config.clone();
        let auth = &mut config.auth_info;
        auth.username = Some(credential.name().to_string());
        auth.password = None;
        auth.token = Some(credential.secret());
        auth.token_file = None;
        auth.client_certificate = None;
        auth.client_certificate_data = None;
        auth.client_key = None;
        auth.client_key_data = None;
        auth.exec = None;
        auth.auth_provider = None;

        let client = Client::try_from(config.clone())
            .map_err(|e| SessionError::ClientError(e.to_string()))?;

        self.config = config;
        self.client = client;

        info!(from = %previous.name(), to = %credential.name(), "Switched credential");
        Ok(previous)
    }
}

fn placeholder_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{PLACEHOLDER_PREFIX}{}", &id[..12])
}

/// Improve a kube error message with human-readable context
fn improve_error_message(err: &kube::Error, resource_kind: &str, resource_name: &str) -> String {
    if let kube::Error::Api(ae) = err {
        match ae.code {
            404 => return format!("{resource_kind} '{resource_name}': not found"),
            409 => return format!("{resource_kind} '{resource_name}': already exists"),
            401 => return format!("{resource_kind} '{resource_name}': unauthorized (bad token)"),
            403 => {
                return format!("{resource_kind} '{resource_name}': permission denied (check RBAC)")
            }
            _ => {}
        }
    }

    let raw = err.to_string();
    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return format!("{resource_kind} '{resource_name}': cannot connect to Kubernetes API");
    }

    format!("{resource_kind} '{resource_name}': {raw}")
}


#[cfg(test)]
mod tests {
    use super::testing::{bearer, forbid_unknown_tokens, mock_session, status};
    use super::*;
    use k8s_openapi::api::core::v1::Node;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn node_list() -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "NodeList",
            "metadata": {"resourceVersion": "1"},
            "items": [{"apiVersion": "v1", "kind": "Node", "metadata": {"name": "worker-0"}}]
        })
    }

    #[tokio::test]
    async fn test_activate_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes"))
            .and(bearer("scoped-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(node_list()))
            .mount(&server)
            .await;
        forbid_unknown_tokens(&server).await;

        let mut session = mock_session(&server, "admin-token");
        let scoped = Credential::new("node-lister")
            .with_namespace("default")
            .with_token("scoped-token");

        let before: Result<Vec<Node>, _> = session.list_cluster(None).await;
        assert!(before.unwrap_err().is_forbidden());

        let original = session.activate(&scoped).unwrap();
        assert_eq!(original.name(), "admin");
        assert_eq!(original.token(), "admin-token");
        assert_eq!(session.current_credential().token(), "scoped-token");
        assert_eq!(session.current_credential().name(), "node-lister");

        let nodes: Vec<Node> = session.list_cluster(None).await.unwrap();
        assert_eq!(nodes.len(), 1);

        let back = session.activate(&original).unwrap();
        assert_eq!(back, scoped);
        assert_eq!(session.current_credential().token(), "admin-token");

        let after: Result<Vec<Node>, _> = session.list_cluster(None).await;
        assert!(after.unwrap_err().is_forbidden());
    }

    #[tokio::test]
    async fn test_activate_empty_token_leaves_session_unchanged() {
        let server = MockServer::start().await;
        let mut session = mock_session(&server, "admin-token");

        let err = session.activate(&Credential::new("nobody")).unwrap_err();
        assert!(matches!(err, SessionError::EmptyToken));
        assert_eq!(err.to_string(), "can not switch to an empty token");

        let current = session.current_credential();
        assert_eq!(current.name(), "admin");
        assert_eq!(current.token(), "admin-token");
    }

    #[tokio::test]
    async fn test_activate_clears_token_file() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "file-token\n").unwrap();

        let uri: http::Uri = server.uri().parse().unwrap();
        let mut config = Config::new(uri);
        config.auth_info.token_file = Some(token_path.display().to_string());
        let mut session = Session::from_config(config).unwrap();

        let original = session.current_credential();
        assert!(original.name().starts_with(PLACEHOLDER_PREFIX));
        assert_eq!(original.name().len(), PLACEHOLDER_PREFIX.len() + 12);
        assert_eq!(original.token(), "file-token");

        session
            .activate(&Credential::new("sa").with_token("direct"))
            .unwrap();
        assert!(session.config().auth_info.token_file.is_none());
        assert_eq!(session.current_credential().token(), "direct");
    }

    #[tokio::test]
    async fn test_activate_drops_client_certificate() {
        let server = MockServer::start().await;
        let uri: http::Uri = server.uri().parse().unwrap();
        let mut config = Config::new(uri);
        config.auth_info.username = Some("kind-admin".to_string());
        config.auth_info.client_certificate = Some("/tmp/admin.crt".to_string());
        config.auth_info.client_key = Some("/tmp/admin.key".to_string());
        let mut session = Session::from_config(config).unwrap();

        let original = session
            .activate(&Credential::new("node-lister").with_token("scoped-token"))
            .unwrap();
        assert_eq!(original.name(), "kind-admin");
        assert!(!original.has_token());

        let auth = &session.config().auth_info;
        assert!(auth.client_certificate.is_none());
        assert!(auth.client_key.is_none());
        assert!(auth.client_certificate_data.is_none());
        assert!(auth.client_key_data.is_none());
        assert!(auth.exec.is_none());
        assert!(auth.auth_provider.is_none());
        assert_eq!(session.current_credential().token(), "scoped-token");
    }

    #[tokio::test]
    async fn test_debug_hides_token() {
        let server = MockServer::start().await;
        let session = mock_session(&server, "admin-token");
        let debug = format!("{session:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("admin-token"));
    }

    #[tokio::test]
    async fn test_remote_error_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(status(404, "NotFound")))
            .mount(&server)
            .await;

        let session = mock_session(&server, "admin-token");
        let err = session.get_cluster::<Node>("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_forbidden());
        assert!(err.to_string().contains("Node 'missing': not found"));
    }

    #[test]
    fn test_placeholder_names_are_unique() {
        assert_ne!(placeholder_name(), placeholder_name());
    }
}
