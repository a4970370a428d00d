//! Scoped grants: a ServiceAccount bound to a ClusterRole loaded from a file

use super::EscalationError;
use crate::poll::{PollSpec, ProbeResult};
use crate::session::{Credential, Session, SessionError};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleRef, Subject};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Annotation linking a token secret to its ServiceAccount
pub const SA_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";
/// Secret type of ServiceAccount tokens
pub const SA_TOKEN_SECRET_TYPE: &str = "kubernetes.io/service-account-token";
/// Data key holding the bearer token
pub const TOKEN_KEY: &str = "token";

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Name of the binding between `account` and `role`
///
/// Used both when a grant is created and when it is rolled back.
pub fn binding_name(account: &str, role: &str) -> String {
    format!("{account}-bind-{role}")
}

/// A ClusterRole manifest on disk
#[derive(Debug, Clone)]
pub struct GrantFile {
    path: PathBuf,
    role: ClusterRole,
}

impl GrantFile {
    /// Read and decode a ClusterRole manifest
    ///
    /// The path must be absolute and point at an existing file whose YAML
    /// decodes to a ClusterRole with a name.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EscalationError> {
        let path = path.as_ref();
        let invalid = |reason: String| EscalationError::InvalidGrantFile {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_absolute() {
            return Err(invalid("absolute path must be provided".to_string()));
        }
        if !path.exists() {
            return Err(invalid("file does not exist".to_string()));
        }

        let data = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let role: ClusterRole = serde_yaml::from_str(&data).map_err(|e| invalid(e.to_string()))?;

        match role.metadata.name.as_deref() {
            Some(name) if !name.is_empty() => {}
            _ => return Err(invalid("ClusterRole has no name".to_string())),
        }

        Ok(Self {
            path: path.to_path_buf(),
            role,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn role(&self) -> &ClusterRole {
        &self.role
    }

    pub fn role_name(&self) -> &str {
        self.role.metadata.name.as_deref().unwrap_or_default()
    }
}

/// Timing of the waits performed while provisioning and rolling back
#[derive(Debug, Clone, Copy)]
pub struct GrantOptions {
    pub wait: PollSpec,
}

impl Default for GrantOptions {
    fn default() -> Self {
        Self {
            wait: PollSpec::new(Duration::from_secs(60), Duration::from_secs(3)),
        }
    }
}

impl GrantOptions {
    #[must_use]
    pub fn with_wait(mut self, wait: PollSpec) -> Self {
        self.wait = wait;
        self
    }
}

/// A provisioned grant and the credential it authorizes
#[derive(Debug, Clone)]
pub struct ScopedGrant {
    credential: Credential,
    role_name: String,
}

impl ScopedGrant {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    pub fn binding_name(&self) -> String {
        binding_name(self.credential.name(), &self.role_name)
    }
}

pub fn service_account(name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn token_secret_name(account: &str) -> String {
    format!("{account}-token")
}

/// Token secret the cluster fills in for `account`
pub fn token_secret(account: &str, namespace: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(token_secret_name(account)),
            namespace: Some(namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                SA_NAME_ANNOTATION.to_string(),
                account.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some(SA_TOKEN_SECRET_TYPE.to_string()),
        ..Default::default()
    }
}

pub fn cluster_role_binding(account: &str, namespace: &str, role: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name(account, role)),
            ..Default::default()
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: account.to_string(),
            namespace: Some(namespace.to_string()),
            api_group: None,
        }]),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
    }
}

fn secret_token(secret: &Secret, account: &str) -> Option<String> {
    let annotated = secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SA_NAME_ANNOTATION))
        .is_some_and(|owner| owner == account);
    if !annotated || secret.type_.as_deref() != Some(SA_TOKEN_SECRET_TYPE) {
        return None;
    }
    let token = secret.data.as_ref()?.get(TOKEN_KEY)?;
    let token = String::from_utf8(token.0.clone()).ok()?;
    (!token.is_empty()).then_some(token)
}

/// Scan the namespace's secrets once for the account's token
pub async fn find_token(
    session: &Session,
    account: &str,
    namespace: &str,
) -> Result<String, EscalationError> {
    let secrets: Vec<Secret> = session.list_in(namespace, None).await?;
    secrets
        .iter()
        .find_map(|s| secret_token(s, account))
        .ok_or_else(|| EscalationError::TokenNotFound {
            name: account.to_string(),
            namespace: namespace.to_string(),
        })
}

/// Poll [`find_token`] until a token shows up or `spec` expires
///
/// The token controller fills secrets in asynchronously, so a freshly
/// created account has no token for a moment.
pub async fn resolve_token(
    session: &Session,
    account: &str,
    namespace: &str,
    spec: PollSpec,
) -> Result<String, EscalationError> {
    let outcome = spec
        .immediately()
        .run_until(move || async move {
            match find_token(session, account, namespace).await {
                Ok(token) => ProbeResult::ready(token),
                Err(e) => {
                    debug!(account = %account, error = %e, "Token not resolved yet");
                    ProbeResult::pending(String::new())
                }
            }
        })
        .await;

    outcome.map_err(|_| EscalationError::TokenNotFound {
        name: account.to_string(),
        namespace: namespace.to_string(),
    })
}

fn tolerate_existing<T>(result: Result<T, SessionError>) -> Result<(), SessionError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Credential of an existing account whose token resolves
pub async fn from_existing(
    session: &Session,
    account: &str,
    namespace: &str,
) -> Result<Credential, EscalationError> {
    session
        .get_in::<ServiceAccount>(namespace, account)
        .await?;
    let token = find_token(session, account, namespace).await?;
    Ok(Credential::new(account)
        .with_namespace(namespace)
        .with_token(token))
}

/// Provision `account` in `namespace` with the role from `grant`
///
/// An existing account whose token resolves is reused. Objects that already
/// exist are accepted. Returns once the account, role and binding are all
/// observable and the account's token has been resolved.
pub async fn create_grant(
    session: &Session,
    account: &str,
    namespace: &str,
    grant: &GrantFile,
    options: &GrantOptions,
) -> Result<ScopedGrant, EscalationError> {
    let spec = options.wait;
    let role_name = grant.role_name().to_string();

    let existing = match from_existing(session, account, namespace).await {
        Ok(credential) => {
            info!(account = %account, namespace = %namespace, "Reusing existing ServiceAccount");
            Some(credential)
        }
        Err(_) => None,
    };

    if existing.is_none() {
        tolerate_existing(
            session
                .create_in(namespace, &service_account(account, namespace))
                .await,
        )?;
        tolerate_existing(
            session
                .create_in(namespace, &token_secret(account, namespace))
                .await,
        )?;
        session
            .wait_for_in::<ServiceAccount, _>(namespace, account, spec, crate::conditions::exists)
            .await?;
    }

    tolerate_existing(session.create_cluster(grant.role()).await)?;
    tolerate_existing(
        session
            .create_cluster(&cluster_role_binding(account, namespace, &role_name))
            .await,
    )?;

    session
        .wait_for_in::<ServiceAccount, _>(namespace, account, spec, crate::conditions::exists)
        .await?;
    session
        .wait_for_cluster::<ClusterRole, _>(&role_name, spec, crate::conditions::exists)
        .await?;
    session
        .wait_for_cluster::<ClusterRoleBinding, _>(
            &binding_name(account, &role_name),
            spec,
            crate::conditions::exists,
        )
        .await?;

    let credential = match existing {
        Some(credential) => credential,
        None => {
            let token = resolve_token(session, account, namespace, spec).await?;
            Credential::new(account)
                .with_namespace(namespace)
                .with_token(token)
        }
    };

    info!(
        account = %account,
        namespace = %namespace,
        role = %role_name,
        "Grant provisioned"
    );

    Ok(ScopedGrant {
        credential,
        role_name,
    })
}

/// Restore `original` and delete the grant given to `scoped`
///
/// The role is re-read from `grant_path` and the binding name is derived
/// from it. Deletes the binding, the role and the account in that order,
/// then the account's `{account}-token` secret if the token controller has
/// not already removed it, and waits for the first three to disappear.
pub async fn rollback(
    session: &mut Session,
    original: &Credential,
    scoped: &Credential,
    grant_path: &Path,
    options: &GrantOptions,
) -> Result<(), EscalationError> {
    session.activate(original)?;

    let grant = GrantFile::load(grant_path)?;
    let role_name = grant.role_name();
    let binding = binding_name(scoped.name(), role_name);
    let account = scoped.name();
    let namespace = scoped.namespace();

    session
        .delete_cluster::<ClusterRoleBinding>(&binding)
        .await?;
    session.delete_cluster::<ClusterRole>(role_name).await?;
    session
        .delete_in::<ServiceAccount>(namespace, account)
        .await?;
    match session
        .delete_in::<Secret>(namespace, &token_secret_name(account))
        .await
    {
        Err(e) if !e.is_not_found() => return Err(e.into()),
        _ => {}
    }

    let spec = options.wait;
    session
        .wait_deleted_cluster::<ClusterRoleBinding>(&binding, spec)
        .await?;
    session
        .wait_deleted_cluster::<ClusterRole>(role_name, spec)
        .await?;
    if let Err(e) = session
        .wait_deleted_in::<ServiceAccount>(namespace, account, spec)
        .await
    {
        warn!(account = %account, error = %e, "ServiceAccount still present after rollback");
        return Err(e.into());
    }

    info!(account = %account, role = %role_name, "Grant rolled back");
    Ok(())
}
