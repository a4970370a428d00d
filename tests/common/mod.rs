//! Shared setup for cluster scenarios
//!
//! Connection settings come from `E2E_*` variables when they are complete,
//! otherwise from the ambient kubeconfig.

#![allow(dead_code)]

use node_e2e::config::ENV_NAMESPACE;
use node_e2e::{bootstrap, AuthConfig, Escalation, PollSpec, Session};
use std::path::PathBuf;
use std::time::Duration;

/// Absolute path of a file under `tests/testdata`
pub fn testdata(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("testdata")
        .join(name)
}

/// Poll every `interval_secs` for up to `timeout_mins`
pub fn every(interval_secs: u64, timeout_mins: u64) -> PollSpec {
    PollSpec::new(
        Duration::from_secs(timeout_mins * 60),
        Duration::from_secs(interval_secs),
    )
}

/// Connect and switch to `account`, holding only the rules in `grant`
///
/// `E2E_NAMESPACE` overrides `namespace`. A failed setup leaves the run
/// unusable, so it aborts the test binary.
pub async fn start(account: &str, namespace: &str, grant: &str) -> (Session, Escalation) {
    node_e2e::init_logging();

    let namespace = match std::env::var(ENV_NAMESPACE) {
        Ok(ns) if !ns.is_empty() => ns,
        _ => namespace.to_string(),
    };
    let namespace = namespace.as_str();
    let auth = AuthConfig::from_env().with_namespace(namespace);
    let started = if auth.missing().is_empty() {
        bootstrap::start_with_service_account(&auth).await
    } else {
        bootstrap::start_with_auto_resolve().await
    };
    let mut session = match started {
        Ok((session, _)) => session.with_namespace(namespace),
        Err(e) => {
            eprintln!("Setup failure: {e}");
            std::process::exit(1);
        }
    };

    let mut escalation = Escalation::new(account, namespace, testdata(grant));
    if let Err(e) = escalation.setup(&mut session).await {
        eprintln!("Setup failure: {e}");
        std::process::exit(1);
    }
    (session, escalation)
}

/// Switch back to the privileged account and delete the grant
pub async fn finish(mut session: Session, mut escalation: Escalation) -> Session {
    if let Err(e) = escalation.finish(&mut session).await {
        panic!("Rollback failed: {e}");
    }
    session
}
