use super::{Session, SessionError};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

fn kind_of<K>() -> String
where
    K: Resource,
    K::DynamicType: Default,
{
    K::kind(&K::DynamicType::default()).to_string()
}

fn name_of<K: Resource>(resource: &K) -> Result<String, SessionError> {
    resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| SessionError::InvalidObject("resource must have a name".to_string()))
}

async fn create_with<K>(api: &Api<K>, kind: &str, resource: &K) -> Result<K, SessionError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = name_of(resource)?;
    let created = api
        .create(&PostParams::default(), resource)
        .await
        .map_err(|e| SessionError::remote("create", kind, &name, e))?;
    info!(kind = %kind, name = %name, "Created resource");
    Ok(created)
}

async fn get_with<K>(api: &Api<K>, kind: &str, name: &str) -> Result<K, SessionError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get(name)
        .await
        .map_err(|e| SessionError::remote("get", kind, name, e))
}

async fn list_with<K>(
    api: &Api<K>,
    kind: &str,
    label_selector: Option<&str>,
) -> Result<Vec<K>, SessionError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let mut params = ListParams::default();
    if let Some(selector) = label_selector {
        params = params.labels(selector);
    }
    let list = api
        .list(&params)
        .await
        .map_err(|e| SessionError::remote("list", kind, label_selector.unwrap_or("*"), e))?;
    debug!(kind = %kind, count = list.items.len(), "Listed resources");
    Ok(list.items)
}

async fn delete_with<K>(api: &Api<K>, kind: &str, name: &str) -> Result<(), SessionError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default())
        .await
        .map_err(|e| SessionError::remote("delete", kind, name, e))?;
    info!(kind = %kind, name = %name, "Deleted resource");
    Ok(())
}

async fn patch_with<K>(
    api: &Api<K>,
    kind: &str,
    name: &str,
    patch: &serde_json::Value,
) -> Result<K, SessionError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patched = api
        .patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .map_err(|e| SessionError::remote("patch", kind, name, e))?;
    info!(kind = %kind, name = %name, "Patched resource");
    Ok(patched)
}

impl Session {
    /// Typed API for the session namespace
    pub fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client(), self.namespace())
    }

    pub fn api_in<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client(), namespace)
    }

    pub fn cluster_api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = ClusterResourceScope>,
        K::DynamicType: Default,
    {
        Api::all(self.client())
    }

    /// Untyped API for a namespaced kind such as a KubeVirt VirtualMachine
    pub fn dynamic_api(&self, resource: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client(), self.namespace(), resource)
    }

    /// Create a resource in `namespace`, overriding its metadata namespace
    pub async fn create_in<K>(&self, namespace: &str, resource: &K) -> Result<K, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        K::DynamicType: Default,
    {
        let mut resource = resource.clone();
        resource.meta_mut().namespace = Some(namespace.to_string());
        create_with(&self.api_in(namespace), &kind_of::<K>(), &resource).await
    }

    /// Create a resource in the session namespace
    pub async fn create<K>(&self, resource: &K) -> Result<K, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        K::DynamicType: Default,
    {
        self.create_in(self.namespace(), resource).await
    }

    pub async fn create_cluster<K>(&self, resource: &K) -> Result<K, SessionError>
    where
        K: Resource<Scope = ClusterResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        K::DynamicType: Default,
    {
        create_with(&self.cluster_api(), &kind_of::<K>(), resource).await
    }

    pub async fn get_in<K>(&self, namespace: &str, name: &str) -> Result<K, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        get_with(&self.api_in(namespace), &kind_of::<K>(), name).await
    }

    pub async fn get<K>(&self, name: &str) -> Result<K, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        self.get_in(self.namespace(), name).await
    }

    pub async fn get_cluster<K>(&self, name: &str) -> Result<K, SessionError>
    where
        K: Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        get_with(&self.cluster_api(), &kind_of::<K>(), name).await
    }

    /// List resources in `namespace`, optionally filtered by a label selector
    pub async fn list_in<K>(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        list_with(&self.api_in(namespace), &kind_of::<K>(), label_selector).await
    }

    pub async fn list<K>(&self, label_selector: Option<&str>) -> Result<Vec<K>, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        self.list_in(self.namespace(), label_selector).await
    }

    pub async fn list_cluster<K>(
        &self,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, SessionError>
    where
        K: Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        list_with(&self.cluster_api(), &kind_of::<K>(), label_selector).await
    }

    pub async fn delete_in<K>(&self, namespace: &str, name: &str) -> Result<(), SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        delete_with(&self.api_in::<K>(namespace), &kind_of::<K>(), name).await
    }

    pub async fn delete<K>(&self, name: &str) -> Result<(), SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        self.delete_in::<K>(self.namespace(), name).await
    }

    pub async fn delete_cluster<K>(&self, name: &str) -> Result<(), SessionError>
    where
        K: Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        delete_with(&self.cluster_api::<K>(), &kind_of::<K>(), name).await
    }

    /// JSON merge patch of a resource in the session namespace
    ///
    /// ```ignore
    /// session.patch_merge::<Deployment>("web", &restart_patch()).await?;
    /// ```
    pub async fn patch_merge<K>(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, SessionError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        patch_with(&self.api::<K>(), &kind_of::<K>(), name, patch).await
    }

    pub async fn create_dynamic(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject, SessionError> {
        let mut object = object.clone();
        object.metadata.namespace = Some(self.namespace().to_string());
        create_with(&self.dynamic_api(resource), &resource.kind, &object).await
    }

    pub async fn get_dynamic(
        &self,
        resource: &ApiResource,
        name: &str,
    ) -> Result<DynamicObject, SessionError> {
        get_with(&self.dynamic_api(resource), &resource.kind, name).await
    }

    pub async fn delete_dynamic(
        &self,
        resource: &ApiResource,
        name: &str,
    ) -> Result<(), SessionError> {
        delete_with(&self.dynamic_api(resource), &resource.kind, name).await
    }

    pub async fn patch_dynamic_merge(
        &self,
        resource: &ApiResource,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, SessionError> {
        patch_with(&self.dynamic_api(resource), &resource.kind, name, patch).await
    }
}
