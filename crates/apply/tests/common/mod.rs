//! In-memory stand-ins for the cluster API, with call counters and
//! one-shot failure injection.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use converge_core::{AttributeMap, ObjectKey, ResourceDescriptor};
use converge_kubehub::{DynamicClient, TypedClient};
use kube::core::ErrorResponse;
use kube::Resource;
use serde_json::{json, Value as Json};

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("{} ({})", reason, code),
        reason: reason.into(),
        code,
    })
}

pub fn not_found(key: &ObjectKey) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("{} not found", key),
        reason: "NotFound".into(),
        code: 404,
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> Calls {
        Calls {
            gets: self.gets.load(Ordering::SeqCst),
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }
}

/// One-shot injected failures, consumed by the next matching call.
#[derive(Default)]
struct Faults {
    get: Mutex<Option<(u16, String)>>,
    create: Mutex<Option<(u16, String)>>,
    update: Mutex<Option<(u16, String)>>,
    delete: Mutex<Option<(u16, String)>>,
}

fn take(slot: &Mutex<Option<(u16, String)>>) -> Result<(), kube::Error> {
    match slot.lock().unwrap().take() {
        Some((code, reason)) => Err(api_error(code, &reason)),
        None => Ok(()),
    }
}

/// Typed fake: stores objects by identity and stamps server-managed metadata.
pub struct MemTyped<K> {
    objects: Mutex<BTreeMap<ObjectKey, K>>,
    rv: AtomicU64,
    calls: Counters,
    faults: Faults,
}

impl<K> MemTyped<K>
where
    K: Resource + Clone,
{
    pub fn new() -> Self {
        Self { objects: Mutex::new(BTreeMap::new()), rv: AtomicU64::new(0), calls: Counters::default(), faults: Faults::default() }
    }

    fn stamp(&self, obj: &mut K) {
        let rv = self.rv.fetch_add(1, Ordering::SeqCst) + 1;
        let meta = obj.meta_mut();
        meta.resource_version = Some(rv.to_string());
        meta.generation = Some(meta.generation.unwrap_or(0) + 1);
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", rv));
        }
    }

    /// Seed an object as if another actor had created it.
    pub fn insert(&self, mut obj: K) {
        self.stamp(&mut obj);
        let key = converge_core::HasIdentity::identity(&obj);
        self.objects.lock().unwrap().insert(key, obj);
    }

    pub fn object(&self, key: &ObjectKey) -> Option<K> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn calls(&self) -> Calls {
        self.calls.snapshot()
    }

    pub fn fail_next_get(&self, code: u16, reason: &str) {
        *self.faults.get.lock().unwrap() = Some((code, reason.into()));
    }

    pub fn fail_next_create(&self, code: u16, reason: &str) {
        *self.faults.create.lock().unwrap() = Some((code, reason.into()));
    }

    pub fn fail_next_update(&self, code: u16, reason: &str) {
        *self.faults.update.lock().unwrap() = Some((code, reason.into()));
    }

    pub fn fail_next_delete(&self, code: u16, reason: &str) {
        *self.faults.delete.lock().unwrap() = Some((code, reason.into()));
    }
}

#[async_trait]
impl<K> TypedClient<K> for MemTyped<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<K, kube::Error> {
        self.calls.gets.fetch_add(1, Ordering::SeqCst);
        take(&self.faults.get)?;
        self.object(key).ok_or_else(|| not_found(key))
    }

    async fn create(&self, obj: &K) -> Result<K, kube::Error> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        take(&self.faults.create)?;
        let key = converge_core::HasIdentity::identity(obj);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut stored = obj.clone();
        self.stamp(&mut stored);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, obj: &K) -> Result<K, kube::Error> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        take(&self.faults.update)?;
        let key = converge_core::HasIdentity::identity(obj);
        let mut objects = self.objects.lock().unwrap();
        let live = objects.get(&key).ok_or_else(|| not_found(&key))?;
        if let Some(rv) = obj.meta().resource_version.as_deref() {
            if live.meta().resource_version.as_deref() != Some(rv) {
                return Err(api_error(409, "Conflict"));
            }
        }
        let mut stored = obj.clone();
        stored.meta_mut().generation = live.meta().generation;
        self.stamp(&mut stored);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), kube::Error> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        take(&self.faults.delete)?;
        match self.objects.lock().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => Err(not_found(key)),
        }
    }
}

/// Dynamic fake keyed by descriptor + identity.
pub struct MemDynamic {
    objects: Mutex<BTreeMap<(ResourceDescriptor, ObjectKey), AttributeMap>>,
    rv: AtomicU64,
    calls: Counters,
    faults: Faults,
}

fn meta_mut(map: &mut AttributeMap) -> &mut serde_json::Map<String, Json> {
    let meta = map.entry("metadata").or_insert_with(|| json!({}));
    if !meta.is_object() {
        *meta = json!({});
    }
    meta.as_object_mut().unwrap()
}

fn rv_of(map: &AttributeMap) -> Option<&str> {
    map.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(|v| v.as_str())
}

impl MemDynamic {
    pub fn new() -> Self {
        Self { objects: Mutex::new(BTreeMap::new()), rv: AtomicU64::new(0), calls: Counters::default(), faults: Faults::default() }
    }

    fn stamp(&self, map: &mut AttributeMap) {
        let rv = self.rv.fetch_add(1, Ordering::SeqCst) + 1;
        let meta = meta_mut(map);
        meta.insert("resourceVersion".into(), json!(rv.to_string()));
        meta.entry("uid").or_insert_with(|| json!(format!("uid-{}", rv)));
        meta.entry("creationTimestamp").or_insert_with(|| json!("2024-01-01T00:00:00Z"));
    }

    /// Seed a live object; `doc` must be a JSON object with `metadata.name`.
    pub fn insert(&self, descriptor: &ResourceDescriptor, doc: Json) {
        let mut map = match doc {
            Json::Object(m) => m,
            other => panic!("seed must be an object, got {}", other),
        };
        self.stamp(&mut map);
        let key = ObjectKey::from_attributes(&map);
        self.objects.lock().unwrap().insert((descriptor.clone(), key), map);
    }

    pub fn object(&self, descriptor: &ResourceDescriptor, key: &ObjectKey) -> Option<AttributeMap> {
        self.objects.lock().unwrap().get(&(descriptor.clone(), key.clone())).cloned()
    }

    pub fn calls(&self) -> Calls {
        self.calls.snapshot()
    }

    pub fn fail_next_get(&self, code: u16, reason: &str) {
        *self.faults.get.lock().unwrap() = Some((code, reason.into()));
    }

    pub fn fail_next_create(&self, code: u16, reason: &str) {
        *self.faults.create.lock().unwrap() = Some((code, reason.into()));
    }

    pub fn fail_next_update(&self, code: u16, reason: &str) {
        *self.faults.update.lock().unwrap() = Some((code, reason.into()));
    }

    pub fn fail_next_delete(&self, code: u16, reason: &str) {
        *self.faults.delete.lock().unwrap() = Some((code, reason.into()));
    }
}

#[async_trait]
impl DynamicClient for MemDynamic {
    async fn get(&self, descriptor: &ResourceDescriptor, key: &ObjectKey) -> Result<AttributeMap, kube::Error> {
        self.calls.gets.fetch_add(1, Ordering::SeqCst);
        take(&self.faults.get)?;
        self.object(descriptor, key).ok_or_else(|| not_found(key))
    }

    async fn create(&self, descriptor: &ResourceDescriptor, key: &ObjectKey, obj: &AttributeMap) -> Result<AttributeMap, kube::Error> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        take(&self.faults.create)?;
        let mut objects = self.objects.lock().unwrap();
        let slot = (descriptor.clone(), key.clone());
        if objects.contains_key(&slot) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut stored = obj.clone();
        self.stamp(&mut stored);
        objects.insert(slot, stored.clone());
        Ok(stored)
    }

    async fn update(&self, descriptor: &ResourceDescriptor, key: &ObjectKey, obj: &AttributeMap) -> Result<AttributeMap, kube::Error> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        take(&self.faults.update)?;
        let mut objects = self.objects.lock().unwrap();
        let slot = (descriptor.clone(), key.clone());
        let live = objects.get(&slot).ok_or_else(|| not_found(key))?;
        if let Some(rv) = rv_of(obj) {
            if rv_of(live) != Some(rv) {
                return Err(api_error(409, "Conflict"));
            }
        }
        let mut stored = obj.clone();
        self.stamp(&mut stored);
        objects.insert(slot, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, descriptor: &ResourceDescriptor, key: &ObjectKey) -> Result<(), kube::Error> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        take(&self.faults.delete)?;
        match self.objects.lock().unwrap().remove(&(descriptor.clone(), key.clone())) {
            Some(_) => Ok(()),
            None => Err(not_found(key)),
        }
    }
}
