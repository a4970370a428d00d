use super::{Session, SessionError};
use crate::poll::{PollSpec, ProbeResult};
use crate::wait::{ResourceState, WaitError};
use kube::api::{ApiResource, DynamicObject};
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use kube::Resource;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

fn record(last_state: &Mutex<String>, state: String) {
    if let Ok(mut guard) = last_state.lock() {
        *guard = state;
    }
}

fn take(last_state: Mutex<String>) -> String {
    last_state
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Poll `fetch` until the fetched object satisfies `condition`
///
/// Fetch errors count as "not yet"; the last one observed ends up in the
/// wait error.
async fn poll_object<T, Fetch, Fut, Cond>(
    resource: String,
    spec: PollSpec,
    fetch: Fetch,
    condition: Cond,
) -> Result<T, SessionError>
where
    T: ResourceState,
    Fetch: Fn() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
    Cond: Fn(&T) -> bool,
{
    debug!(resource = %resource, timeout = ?spec.resolved_timeout(), "Starting wait");

    let last_state = Mutex::new("not observed".to_string());
    let (fetch, condition, last) = (&fetch, &condition, &last_state);

    let outcome = spec
        .run_until_some(move || async move {
            match fetch().await {
                Ok(obj) => {
                    record(last, obj.state_description());
                    condition(&obj).then_some(obj)
                }
                Err(e) => {
                    record(last, e.to_string());
                    None
                }
            }
        })
        .await;

    match outcome {
        Ok(obj) => {
            debug!(resource = %resource, "Condition met");
            Ok(obj)
        }
        Err(e) => Err(WaitError::from_poll(resource, &e)
            .with_state(take(last_state))
            .into()),
    }
}

/// Poll `fetch` until the object is reported as not found
async fn poll_gone<T, Fetch, Fut>(
    resource: String,
    spec: PollSpec,
    fetch: Fetch,
) -> Result<(), SessionError>
where
    Fetch: Fn() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
{
    let last_state = Mutex::new("not observed".to_string());
    let (fetch, last) = (&fetch, &last_state);

    let outcome = spec
        .run_until(move || async move {
            match fetch().await {
                Err(e) if e.is_not_found() => ProbeResult::from(true),
                Err(e) => {
                    record(last, e.to_string());
                    ProbeResult::from(false)
                }
                Ok(_) => {
                    record(last, "still present".to_string());
                    ProbeResult::from(false)
                }
            }
        })
        .await;

    outcome.map_err(|e| {
        WaitError::from_poll(resource, &e)
            .with_state(take(last_state))
            .into()
    })
}

impl Session {
    /// Wait for a namespaced resource to satisfy a condition
    ///
    /// ```ignore
    /// session.wait_for::<Pod>("web-0", PollSpec::default(), conditions::pod_ready).await?;
    /// ```
    pub async fn wait_for<K, F>(
        &self,
        name: &str,
        spec: PollSpec,
        condition: F,
    ) -> Result<K, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug
            + ResourceState,
        K::DynamicType: Default,
        F: Fn(&K) -> bool,
    {
        self.wait_for_in(self.namespace(), name, spec, condition)
            .await
    }

    pub async fn wait_for_in<K, F>(
        &self,
        namespace: &str,
        name: &str,
        spec: PollSpec,
        condition: F,
    ) -> Result<K, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug
            + ResourceState,
        K::DynamicType: Default,
        F: Fn(&K) -> bool,
    {
        let kind = K::kind(&K::DynamicType::default()).to_lowercase();
        poll_object(
            format!("{kind}/{namespace}/{name}"),
            spec,
            move || self.get_in::<K>(namespace, name),
            condition,
        )
        .await
    }

    pub async fn wait_for_cluster<K, F>(
        &self,
        name: &str,
        spec: PollSpec,
        condition: F,
    ) -> Result<K, SessionError>
    where
        K: Resource<Scope = ClusterResourceScope>
            + Clone
            + DeserializeOwned
            + Debug
            + ResourceState,
        K::DynamicType: Default,
        F: Fn(&K) -> bool,
    {
        let kind = K::kind(&K::DynamicType::default()).to_lowercase();
        poll_object(
            format!("{kind}/{name}"),
            spec,
            move || self.get_cluster::<K>(name),
            condition,
        )
        .await
    }

    pub async fn wait_for_dynamic<F>(
        &self,
        resource: &ApiResource,
        name: &str,
        spec: PollSpec,
        condition: F,
    ) -> Result<DynamicObject, SessionError>
    where
        F: Fn(&DynamicObject) -> bool,
    {
        poll_object(
            format!("{}/{}/{name}", resource.kind.to_lowercase(), self.namespace()),
            spec,
            move || self.get_dynamic(resource, name),
            condition,
        )
        .await
    }

    /// Wait until a label-selected set of resources satisfies a condition
    ///
    /// Returns the list that satisfied it.
    pub async fn wait_for_list<K, F>(
        &self,
        label_selector: &str,
        spec: PollSpec,
        condition: F,
    ) -> Result<Vec<K>, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
        F: Fn(&[K]) -> bool,
    {
        let kind = K::kind(&K::DynamicType::default()).to_lowercase();
        poll_object(
            format!("{kind}s/{}[{label_selector}]", self.namespace()),
            spec,
            move || async move { self.list::<K>(Some(label_selector)).await.map(Listed) },
            |listed: &Listed<K>| condition(&listed.0),
        )
        .await
        .map(|listed| listed.0)
    }

    pub async fn wait_deleted_in<K>(
        &self,
        namespace: &str,
        name: &str,
        spec: PollSpec,
    ) -> Result<(), SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let kind = K::kind(&K::DynamicType::default()).to_lowercase();
        poll_gone(format!("{kind}/{namespace}/{name}"), spec, move || {
            self.get_in::<K>(namespace, name)
        })
        .await
    }

    pub async fn wait_deleted<K>(&self, name: &str, spec: PollSpec) -> Result<(), SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        self.wait_deleted_in::<K>(self.namespace(), name, spec)
            .await
    }

    pub async fn wait_deleted_cluster<K>(
        &self,
        name: &str,
        spec: PollSpec,
    ) -> Result<(), SessionError>
    where
        K: Resource<Scope = ClusterResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let kind = K::kind(&K::DynamicType::default()).to_lowercase();
        poll_gone(format!("{kind}/{name}"), spec, move || {
            self.get_cluster::<K>(name)
        })
        .await
    }

    pub async fn wait_deleted_dynamic(
        &self,
        resource: &ApiResource,
        name: &str,
        spec: PollSpec,
    ) -> Result<(), SessionError> {
        poll_gone(
            format!("{}/{}/{name}", resource.kind.to_lowercase(), self.namespace()),
            spec,
            move || self.get_dynamic(resource, name),
        )
        .await
    }
}

/// A listed set of resources, described by its size
struct Listed<K>(Vec<K>);

impl<K> ResourceState for Listed<K> {
    fn state_description(&self) -> String {
        format!("{} matching", self.0.len())
    }
}
