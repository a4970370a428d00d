//! Least-privilege credential switching
//!
//! Tests run as a dedicated ServiceAccount that holds only the permissions
//! listed in a ClusterRole manifest. The privileged credential provisions
//! the grant, the session switches to the scoped account for the test body,
//! and the privileged credential comes back to delete the grant afterwards.
//!
//! ```text
//! Privileged -> Provisioning -> Switched -> RollingBack -> Cleaned
//! ```
//!
//! [`Escalation`] drives those transitions; the free functions in [`grant`]
//! are the individual steps.
//!
//! ```ignore
//! let mut session = Session::infer().await?;
//! let mut escalation = Escalation::new("node-lister", "default", "/abs/node-list-cr.yaml");
//!
//! escalation.setup(&mut session).await?;
//! let nodes: Vec<Node> = session.list_cluster(None).await?;
//! escalation.finish(&mut session).await?;
//! ```

pub mod grant;

pub use grant::{
    binding_name, create_grant, find_token, resolve_token, rollback, GrantFile, GrantOptions,
    ScopedGrant,
};

use crate::session::{Credential, Session, SessionError};
use std::fmt;
use std::path::PathBuf;
use tracing::info;

/// Errors from escalation operations
#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("invalid grant file {}: {reason}", path.display())]
    InvalidGrantFile { path: PathBuf, reason: String },

    #[error("could not find token for ServiceAccount {name} in namespace {namespace}")]
    TokenNotFound { name: String, namespace: String },

    #[error("active credential {name} has no bearer token to switch back to")]
    NoPrivilegedToken { name: String },

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: GrantState,
        action: &'static str,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Lifecycle of a scoped grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    /// The original credential is active
    Privileged,
    /// Account, role and binding are being created
    Provisioning,
    /// The scoped credential is active; the original is held for rollback
    Switched,
    /// Switching back and deleting the grant
    RollingBack,
    /// Grant deleted; terminal
    Cleaned,
}

impl fmt::Display for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Privileged => "privileged",
            Self::Provisioning => "provisioning",
            Self::Switched => "switched",
            Self::RollingBack => "rolling back",
            Self::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// One account's trip from the privileged credential to a scoped one and back
///
/// A failed step leaves the state where it failed, so a half-provisioned
/// grant is never mistaken for a usable one.
pub struct Escalation {
    account: String,
    namespace: String,
    grant_path: PathBuf,
    options: GrantOptions,
    state: GrantState,
    original: Option<Credential>,
    scoped: Option<Credential>,
}

impl Escalation {
    pub fn new(
        account: impl Into<String>,
        namespace: impl Into<String>,
        grant_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            account: account.into(),
            namespace: namespace.into(),
            grant_path: grant_path.into(),
            options: GrantOptions::default(),
            state: GrantState::Privileged,
            original: None,
            scoped: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: GrantOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> GrantState {
        self.state
    }

    /// Credential that was active before [`Escalation::setup`]
    pub fn original(&self) -> Option<&Credential> {
        self.original.as_ref()
    }

    /// Credential of the scoped account, once provisioned
    pub fn scoped(&self) -> Option<&Credential> {
        self.scoped.as_ref()
    }

    fn expect_state(&self, want: GrantState, action: &'static str) -> Result<(), EscalationError> {
        if self.state == want {
            Ok(())
        } else {
            Err(EscalationError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    /// Provision the grant and switch the session to the scoped account
    ///
    /// The active credential must carry a bearer token, since rollback
    /// switches back to it. A certificate or exec-plugin identity is refused
    /// before anything is created and the state stays `Privileged`.
    pub async fn setup(&mut self, session: &mut Session) -> Result<&Credential, EscalationError> {
        self.expect_state(GrantState::Privileged, "set up")?;
        let current = session.current_credential();
        if !current.has_token() {
            return Err(EscalationError::NoPrivilegedToken {
                name: current.name().to_string(),
            });
        }
        self.state = GrantState::Provisioning;

        let grant_file = GrantFile::load(&self.grant_path)?;
        let grant = create_grant(
            session,
            &self.account,
            &self.namespace,
            &grant_file,
            &self.options,
        )
        .await?;

        let original = session.activate(grant.credential())?;
        info!(
            account = %self.account,
            namespace = %self.namespace,
            role = %grant.role_name(),
            "Running as scoped account"
        );

        self.original = Some(original);
        self.state = GrantState::Switched;
        Ok(self.scoped.insert(grant.credential().clone()))
    }

    /// Switch back to the original credential and delete the grant
    pub async fn finish(&mut self, session: &mut Session) -> Result<(), EscalationError> {
        self.expect_state(GrantState::Switched, "finish")?;
        let (Some(original), Some(scoped)) = (self.original.clone(), self.scoped.clone()) else {
            return Err(EscalationError::InvalidTransition {
                state: self.state,
                action: "finish",
            });
        };
        self.state = GrantState::RollingBack;

        rollback(session, &original, &scoped, &self.grant_path, &self.options).await?;

        self.state = GrantState::Cleaned;
        Ok(())
    }
}
