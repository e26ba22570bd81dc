//! Converge kubehub: the client boundaries the engines talk through,
//! and their kube-rs implementations.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, GetParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, Request},
    discovery::{Discovery, Scope},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

use converge_core::{AttributeMap, ObjectKey, ResourceDescriptor};

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Build a client from the inferred kubeconfig / in-cluster config.
/// `CONVERGE_CONNECT_TIMEOUT_SECS` and `CONVERGE_READ_TIMEOUT_SECS` override the defaults.
pub async fn get_kube_client() -> Result<Client> {
    let mut config = kube::Config::infer().await.context("inferring kube config")?;
    if let Some(t) = env_secs("CONVERGE_CONNECT_TIMEOUT_SECS") {
        config.connect_timeout = Some(t);
    }
    if let Some(t) = env_secs("CONVERGE_READ_TIMEOUT_SECS") {
        config.read_timeout = Some(t);
    }
    info!(cluster = %config.cluster_url, ns = %config.default_namespace, "kube client configured");
    Client::try_from(config).context("building kube client")
}

/// Strongly typed client boundary. Errors are raw `kube::Error`s so callers
/// can classify them (404, 409, ...).
#[async_trait]
pub trait TypedClient<K>: Send + Sync
where
    K: Send + Sync,
{
    async fn get(&self, key: &ObjectKey) -> Result<K, kube::Error>;
    async fn create(&self, obj: &K) -> Result<K, kube::Error>;
    async fn update(&self, obj: &K) -> Result<K, kube::Error>;
    async fn delete(&self, key: &ObjectKey) -> Result<(), kube::Error>;
}

/// Schema-agnostic client boundary, addressed by descriptor + identity.
#[async_trait]
pub trait DynamicClient: Send + Sync {
    async fn get(&self, descriptor: &ResourceDescriptor, key: &ObjectKey) -> Result<AttributeMap, kube::Error>;
    async fn create(&self, descriptor: &ResourceDescriptor, key: &ObjectKey, obj: &AttributeMap) -> Result<AttributeMap, kube::Error>;
    async fn update(&self, descriptor: &ResourceDescriptor, key: &ObjectKey, obj: &AttributeMap) -> Result<AttributeMap, kube::Error>;
    async fn delete(&self, descriptor: &ResourceDescriptor, key: &ObjectKey) -> Result<(), kube::Error>;
}

/// Typed client over any compiled `kube::Resource`, namespaced or cluster-scoped.
/// The scope is taken from the identity: `namespace: None` addresses the cluster-level path.
#[derive(Clone)]
pub struct KubeTyped {
    client: Client,
}

impl KubeTyped {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn request<K>(namespace: Option<&str>) -> Request
    where
        K: Resource,
        K::DynamicType: Default,
    {
        let namespace = namespace.filter(|s| !s.is_empty());
        Request::new(K::url_path(&K::DynamicType::default(), namespace))
    }
}

#[async_trait]
impl<K> TypedClient<K> for KubeTyped
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, key: &ObjectKey) -> Result<K, kube::Error> {
        let req = Self::request::<K>(key.namespace.as_deref())
            .get(&key.name, &GetParams::default())
            .map_err(kube::Error::BuildRequest)?;
        self.client.request::<K>(req).await
    }

    async fn create(&self, obj: &K) -> Result<K, kube::Error> {
        let ns = obj.meta().namespace.as_deref();
        let data = serde_json::to_vec(obj).map_err(kube::Error::SerdeError)?;
        let req = Self::request::<K>(ns)
            .create(&PostParams::default(), data)
            .map_err(kube::Error::BuildRequest)?;
        self.client.request::<K>(req).await
    }

    async fn update(&self, obj: &K) -> Result<K, kube::Error> {
        let meta = obj.meta();
        let ns = meta.namespace.as_deref();
        let name = meta.name.clone().unwrap_or_default();
        let data = serde_json::to_vec(obj).map_err(kube::Error::SerdeError)?;
        let req = Self::request::<K>(ns)
            .replace(&name, &PostParams::default(), data)
            .map_err(kube::Error::BuildRequest)?;
        self.client.request::<K>(req).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), kube::Error> {
        let req = Self::request::<K>(key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::default())
            .map_err(kube::Error::BuildRequest)?;
        // Either the object (pending finalizers) or a Status; neither is needed.
        self.client.request::<Json>(req).await.map(|_| ())
    }
}

/// Dynamic client over `Api<DynamicObject>`. Only the plural is needed to build
/// URLs, so no discovery round trip happens per call.
#[derive(Clone)]
pub struct KubeDynamic {
    client: Client,
}

impl KubeDynamic {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, descriptor: &ResourceDescriptor, kind: &str, namespace: Option<&str>) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&descriptor.group, &descriptor.version, kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &descriptor.resource);
        match namespace.filter(|s| !s.is_empty()) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_attributes(obj: &DynamicObject) -> Result<AttributeMap, kube::Error> {
    match serde_json::to_value(obj).map_err(kube::Error::SerdeError)? {
        Json::Object(map) => Ok(map),
        _ => Err(kube::Error::SerdeError(serde::de::Error::custom("object did not serialize to a map"))),
    }
}

fn from_attributes(map: &AttributeMap) -> Result<DynamicObject, kube::Error> {
    serde_json::from_value(Json::Object(map.clone())).map_err(kube::Error::SerdeError)
}

fn kind_of(map: &AttributeMap) -> &str {
    map.get("kind").and_then(|v| v.as_str()).unwrap_or_default()
}

#[async_trait]
impl DynamicClient for KubeDynamic {
    async fn get(&self, descriptor: &ResourceDescriptor, key: &ObjectKey) -> Result<AttributeMap, kube::Error> {
        debug!(resource = %descriptor, key = %key, "dynamic get");
        let obj = self.api(descriptor, "", key.namespace.as_deref()).get(&key.name).await?;
        to_attributes(&obj)
    }

    async fn create(&self, descriptor: &ResourceDescriptor, key: &ObjectKey, obj: &AttributeMap) -> Result<AttributeMap, kube::Error> {
        debug!(resource = %descriptor, key = %key, "dynamic create");
        let api = self.api(descriptor, kind_of(obj), key.namespace.as_deref());
        let created = api.create(&PostParams::default(), &from_attributes(obj)?).await?;
        to_attributes(&created)
    }

    async fn update(&self, descriptor: &ResourceDescriptor, key: &ObjectKey, obj: &AttributeMap) -> Result<AttributeMap, kube::Error> {
        debug!(resource = %descriptor, key = %key, "dynamic update");
        let api = self.api(descriptor, kind_of(obj), key.namespace.as_deref());
        let updated = api.replace(&key.name, &PostParams::default(), &from_attributes(obj)?).await?;
        to_attributes(&updated)
    }

    async fn delete(&self, descriptor: &ResourceDescriptor, key: &ObjectKey) -> Result<(), kube::Error> {
        debug!(resource = %descriptor, key = %key, "dynamic delete");
        self.api(descriptor, "", key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}

/// A descriptor as the API server serves it.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

/// Look a descriptor up in API discovery to learn its kind and scope.
pub async fn resolve_descriptor(client: Client, descriptor: &ResourceDescriptor) -> Result<ResolvedResource> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == descriptor.group && ar.version == descriptor.version && ar.plural == descriptor.resource {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok(ResolvedResource { api_resource: ar.clone(), namespaced });
            }
        }
    }
    Err(anyhow!("resource not served: {}", descriptor))
}
