//! Service-account authentication settings and kubeconfig generation
//!
//! Build an [`AuthConfig`] programmatically or from `E2E_*` environment
//! variables, then write a kubeconfig that authenticates as that account.
//!
//! # Example
//!
//! ```no_run
//! use node_e2e::config::AuthConfig;
//!
//! let auth = AuthConfig::new()
//!     .with_sa_name("e2e-admin")
//!     .with_sa_token("eyJhbGciOi...")
//!     .with_cluster_endpoint("https://10.0.0.1:6443")
//!     .with_certificate_authority_data("LS0tLS1CRUdJTi...");
//!
//! let path = auth.write_kubeconfig()?;
//! # Ok::<(), node_e2e::config::ConfigError>(())
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kube::config::{
    AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use tracing::info;

pub const ENV_SA_NAME: &str = "E2E_SA_NAME";
pub const ENV_SA_TOKEN: &str = "E2E_SA_TOKEN";
pub const ENV_CLUSTER_NAME: &str = "E2E_CLUSTER_NAME";
pub const ENV_CLUSTER_ENDPOINT: &str = "E2E_CLUSTER_ENDPOINT";
pub const ENV_CA_DATA: &str = "E2E_CA_DATA";
pub const ENV_DIR_NAME: &str = "E2E_DIR_NAME";
pub const ENV_NAMESPACE: &str = "E2E_NAMESPACE";

pub const DEFAULT_DIR_NAME: &str = "testdata";
pub const DEFAULT_CONTEXT_NAME: &str = "default-context";
pub const DEFAULT_CLUSTER_NAME: &str = "default";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Errors from kubeconfig generation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("certificate authority data is invalid: {0}")]
    InvalidCaData(#[from] base64::DecodeError),

    #[error("cannot locate home directory: HOME is not set")]
    NoHome,

    #[error("failed to write kubeconfig {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize kubeconfig: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Attributes of the account a generated kubeconfig authenticates as
#[derive(Debug, Clone)]
pub struct AuthConfig {
    cluster_name: String,
    cluster_endpoint: String,
    certificate_authority_data: String,
    namespace: String,
    sa_name: String,
    sa_token: SecretString,
    dir_name: String,
    base_dir: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            cluster_endpoint: String::new(),
            certificate_authority_data: String::new(),
            namespace: String::new(),
            sa_name: String::new(),
            sa_token: SecretString::from(String::new()),
            dir_name: DEFAULT_DIR_NAME.to_string(),
            base_dir: None,
        }
    }
}

fn env_or_empty(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}

impl AuthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every setting from its `E2E_*` variable; unset ones stay empty
    pub fn from_env() -> Self {
        let mut config = Self::new()
            .with_sa_name(env_or_empty(ENV_SA_NAME))
            .with_sa_token(env_or_empty(ENV_SA_TOKEN))
            .with_cluster_name(env_or_empty(ENV_CLUSTER_NAME))
            .with_cluster_endpoint(env_or_empty(ENV_CLUSTER_ENDPOINT))
            .with_certificate_authority_data(env_or_empty(ENV_CA_DATA))
            .with_namespace(env_or_empty(ENV_NAMESPACE));

        let dir = env_or_empty(ENV_DIR_NAME);
        if !dir.is_empty() {
            config.dir_name = dir;
        }
        config
    }

    #[must_use]
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    #[must_use]
    pub fn with_cluster_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.cluster_endpoint = endpoint.into();
        self
    }

    /// Base64-encoded CA bundle of the API server
    #[must_use]
    pub fn with_certificate_authority_data(mut self, data: impl Into<String>) -> Self {
        self.certificate_authority_data = data.into();
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_sa_name(mut self, name: impl Into<String>) -> Self {
        self.sa_name = name.into();
        self
    }

    #[must_use]
    pub fn with_sa_token(mut self, token: impl Into<String>) -> Self {
        self.sa_token = SecretString::from(token.into());
        self
    }

    /// Directory under the base directory that receives `.kube/config`
    #[must_use]
    pub fn with_dir_name(mut self, dir: impl Into<String>) -> Self {
        self.dir_name = dir.into();
        self
    }

    /// Write under `dir` instead of `$HOME`
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn sa_name(&self) -> &str {
        &self.sa_name
    }

    pub fn sa_token(&self) -> &str {
        self.sa_token.expose_secret()
    }

    /// Namespace, falling back to `default`
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    pub fn cluster_name(&self) -> &str {
        if self.cluster_name.is_empty() {
            DEFAULT_CLUSTER_NAME
        } else {
            &self.cluster_name
        }
    }

    pub fn cluster_endpoint(&self) -> &str {
        &self.cluster_endpoint
    }

    /// Names of required settings that are empty
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (ENV_SA_NAME, self.sa_name.is_empty()),
            (ENV_SA_TOKEN, self.sa_token().is_empty()),
            (ENV_CLUSTER_ENDPOINT, self.cluster_endpoint.is_empty()),
            (ENV_CA_DATA, self.certificate_authority_data.is_empty()),
        ]
        .into_iter()
        .filter_map(|(key, empty)| empty.then_some(key))
        .collect()
    }

    /// Path the kubeconfig is written to
    pub fn kubeconfig_path(&self) -> Result<PathBuf, ConfigError> {
        let base = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .ok_or(ConfigError::NoHome)?,
        };
        Ok(base.join(&self.dir_name).join(".kube").join("config"))
    }

    /// Render the kubeconfig document
    pub fn kubeconfig(&self) -> Result<Kubeconfig, ConfigError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        let ca = normalize_base64(&self.certificate_authority_data)?;

        Ok(Kubeconfig {
            api_version: Some("v1".to_string()),
            kind: Some("Config".to_string()),
            clusters: vec![NamedCluster {
                name: self.cluster_name().to_string(),
                cluster: Some(Cluster {
                    server: Some(self.cluster_endpoint.clone()),
                    certificate_authority_data: Some(ca),
                    ..Default::default()
                }),
            }],
            auth_infos: vec![NamedAuthInfo {
                name: self.sa_name.clone(),
                auth_info: Some(AuthInfo {
                    token: Some(self.sa_token.clone()),
                    ..Default::default()
                }),
            }],
            contexts: vec![NamedContext {
                name: DEFAULT_CONTEXT_NAME.to_string(),
                context: Some(Context {
                    cluster: self.cluster_name().to_string(),
                    user: Some(self.sa_name.clone()),
                    namespace: Some(self.namespace().to_string()),
                    ..Default::default()
                }),
            }],
            current_context: Some(DEFAULT_CONTEXT_NAME.to_string()),
            ..Default::default()
        })
    }

    /// Write the kubeconfig and return its path
    pub fn write_kubeconfig(&self) -> Result<PathBuf, ConfigError> {
        let yaml = serde_yaml::to_string(&self.kubeconfig()?)?;
        let path = self.kubeconfig_path()?;
        write_file(&path, &yaml)?;
        info!(path = %path.display(), account = %self.sa_name, "Wrote kubeconfig");
        Ok(path)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    std::fs::write(path, contents).map_err(io_err)
}

/// Trim surrounding whitespace, check the data decodes, and re-encode it
pub fn normalize_base64(data: &str) -> Result<String, ConfigError> {
    let decoded = STANDARD.decode(data.trim())?;
    Ok(STANDARD.encode(decoded))
}
