use std::time::Instant;

use kube::Resource;
use serde::Serialize;
use serde_json::Value as Json;

use converge_core::{
    is_already_exists, is_not_found, render_diff, semantic_eq, strip_server_managed, ConvergeError, ConvergeResult,
    HasIdentity, ObjectKey, Outcome,
};
use converge_kubehub::TypedClient;

use crate::{log_diff, report, report_delete};

fn kind_of<K>() -> String
where
    K: Resource,
    K::DynamicType: Default,
{
    K::kind(&K::DynamicType::default()).to_string()
}

/// Zero-value object carrying only the identity.
fn seed<K>(key: &ObjectKey) -> K
where
    K: Resource + Default,
{
    let mut obj = K::default();
    let meta = obj.meta_mut();
    meta.name = Some(key.name.clone());
    meta.namespace = key.namespace.clone();
    obj
}

/// Run the mutator, then make sure it left the identity alone.
fn apply_mutator<K, F>(mutate: F, key: &ObjectKey, obj: &mut K) -> ConvergeResult<()>
where
    K: HasIdentity,
    F: FnOnce(&mut K) -> anyhow::Result<()>,
{
    mutate(obj).map_err(ConvergeError::Mutate)?;
    let after = obj.identity();
    if &after != key {
        return Err(ConvergeError::IdentityMutated { before: key.clone(), after });
    }
    Ok(())
}

fn comparable<K: Serialize>(obj: &K) -> ConvergeResult<Json> {
    serde_json::to_value(obj)
        .map(strip_server_managed)
        .map_err(|e| ConvergeError::Projection(e.to_string()))
}

/// Create or update the object identified by `key` so that it matches what
/// `mutate` produces.
///
/// - absent: `mutate` runs on a zero-value object stamped with `key`, which is
///   then created (`Created`).
/// - present: `mutate` runs on the fetched object; if the result is
///   semantically equal to what was fetched nothing is written (`Unchanged`),
///   otherwise the object is updated (`Updated`).
///
/// Only a 404 on the fetch is absorbed. Every other API error, including a
/// write conflict, is returned unwrapped in [`ConvergeError::Api`].
pub async fn converge<K, C, F>(client: &C, key: &ObjectKey, mutate: F) -> ConvergeResult<Outcome>
where
    K: Resource + Clone + Default + Serialize + Send + Sync,
    K::DynamicType: Default,
    C: TypedClient<K> + ?Sized,
    F: FnOnce(&mut K) -> anyhow::Result<()>,
{
    let kind = kind_of::<K>();
    let key = &key.normalized();
    let t0 = Instant::now();
    let res = converge_cycle(client, &kind, key, mutate).await;
    report(&kind, key, &res, t0);
    res
}

async fn converge_cycle<K, C, F>(client: &C, kind: &str, key: &ObjectKey, mutate: F) -> ConvergeResult<Outcome>
where
    K: Resource + Clone + Default + Serialize + Send + Sync,
    C: TypedClient<K> + ?Sized,
    F: FnOnce(&mut K) -> anyhow::Result<()>,
{
    let mut obj = match client.get(key).await {
        Ok(obj) => obj,
        Err(e) if is_not_found(&e) => {
            let mut obj = seed::<K>(key);
            apply_mutator(mutate, key, &mut obj)?;
            client.create(&obj).await?;
            return Ok(Outcome::Created);
        }
        Err(e) => return Err(e.into()),
    };

    let baseline = obj.clone();
    apply_mutator(mutate, key, &mut obj)?;

    let before = comparable(&baseline)?;
    let after = comparable(&obj)?;
    if semantic_eq(&before, &after) {
        return Ok(Outcome::Unchanged);
    }
    log_diff(kind, key, &render_diff(&before, &after));

    client.update(&obj).await?;
    Ok(Outcome::Updated)
}

/// Delete the object identified by `key`. An already-absent object is success.
pub async fn delete<K, C>(client: &C, key: &ObjectKey) -> ConvergeResult<()>
where
    K: Resource + Send + Sync,
    K::DynamicType: Default,
    C: TypedClient<K> + ?Sized,
{
    let key = &key.normalized();
    let res = match client.delete(key).await {
        Ok(()) => Ok(false),
        Err(e) if is_not_found(&e) => Ok(true),
        Err(e) => Err(e),
    };
    report_delete(&kind_of::<K>(), key, &res);
    res.map(|_| ()).map_err(ConvergeError::from)
}

/// Create `obj` unless it already exists. Returns `true` when it already existed;
/// the existing object is left untouched.
pub async fn create_if_absent<K, C>(client: &C, obj: &K) -> ConvergeResult<bool>
where
    K: Send + Sync,
    C: TypedClient<K> + ?Sized,
{
    match client.create(obj).await {
        Ok(_) => Ok(false),
        Err(e) if is_already_exists(&e) => Ok(true),
        Err(e) => Err(e.into()),
    }
}
