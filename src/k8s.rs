//! kube-rs backed implementation of [ResourceStore].
//!
//! [K8sRepository] talks to the api server through namespaced [Api] handles obtained from a
//! [ProvideApi] implementation, so the same repository type serves every managed kind.

use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::error::Error;
use crate::error::Result;
use crate::store::ResourceStore;
use crate::TryResource;

/// Abstraction for obtaining namespaced [Api] instances.
pub trait ProvideApi<R>: Send + Sync
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    /// Gets an [Arc<Api>] instance for the given namespace.
    fn get(&self, namespace: &str) -> Result<Arc<Api<R>>>;
}

/// Caches [Arc<Api>] instances per namespace, creating them lazily on first use.
///
/// Functions can live in any namespace the controller watches, so the set of namespaces is
/// only known at runtime.
///
/// # Example
///
/// ```rust,ignore
/// use serverless_controller::k8s::CachedApiProvider;
/// use k8s_openapi::api::apps::v1::Deployment;
///
/// let deployments = CachedApiProvider::<Deployment>::new(client.clone());
/// let api = deployments.get("default")?;
/// ```
pub struct CachedApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    client: Client,
    cache: RwLock<HashMap<String, Arc<Api<R>>>>,
}

impl<R> CachedApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl<R> ProvideApi<R> for CachedApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    fn get(&self, namespace: &str) -> Result<Arc<Api<R>>> {
        // Fast path: try to get from cache with read lock
        {
            let cache = self.cache.read()?;
            if let Some(api) = cache.get(namespace) {
                return Ok(Arc::clone(api));
            }
        }

        let mut cache = self.cache.write()?;

        // Another thread may have created it while we waited for the write lock
        if let Some(api) = cache.get(namespace) {
            return Ok(Arc::clone(api));
        }

        let api = Arc::new(Api::<R>::namespaced(self.client.clone(), namespace));
        cache.insert(namespace.to_string(), Arc::clone(&api));

        Ok(api)
    }
}

/// A generic repository that implements [ResourceStore] for any namespaced kind.
///
/// Writes carry the object's `metadata.resourceVersion`, so the api server rejects stale
/// writes with a 409 which surfaces as [Error::Conflict].
pub struct K8sRepository<R, P>
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default,
    P: ProvideApi<R>,
{
    api_provider: P,
    phantom: PhantomData<R>,
}

impl<R, P> K8sRepository<R, P>
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default,
    P: ProvideApi<R>,
{
    pub fn new(api_provider: P) -> Self {
        K8sRepository {
            api_provider,
            phantom: PhantomData,
        }
    }

    fn kind() -> String {
        R::kind(&R::DynamicType::default()).to_string()
    }
}

#[async_trait]
impl<R, P> ResourceStore<R> for K8sRepository<R, P>
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default,
    P: ProvideApi<R>,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<R> {
        let api = self.api_provider.get(namespace)?;
        api.get(name).await.map_err(|e| Error::from_kube(&Self::kind(), name, e))
    }

    async fn create(&self, object: &R) -> Result<R> {
        let api = self.api_provider.get(&object.try_namespace()?)?;
        let name = object.try_name()?;
        tracing::debug!(kind = %Self::kind(), name, "creating object");
        api.create(&PostParams::default(), object)
            .await
            .map_err(|e| Error::from_kube(&Self::kind(), name, e))
    }

    async fn replace(&self, object: &R) -> Result<R> {
        let api = self.api_provider.get(&object.try_namespace()?)?;
        let name = object.try_name()?;
        tracing::debug!(kind = %Self::kind(), name, "replacing object");
        api.replace(name, &PostParams::default(), object)
            .await
            .map_err(|e| Error::from_kube(&Self::kind(), name, e))
    }

    /// Patches the status subresource. The patch includes the resource version read with
    /// `object`, which keeps the write conditional like [ResourceStore::replace].
    async fn update_status(&self, object: &R) -> Result<R> {
        let api = self.api_provider.get(&object.try_namespace()?)?;
        let name = object.try_name()?;

        let status = serde_json::to_value(object)?
            .get("status")
            .cloned()
            .unwrap_or_default();
        let patch = json!({
            "metadata": { "resourceVersion": object.meta().resource_version },
            "status": status,
        });

        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(&Self::kind(), name, e))
    }
}
