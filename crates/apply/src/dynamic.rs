use std::time::Instant;

use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use converge_core::{
    is_not_found, project, render_diff, semantic_eq, shallow_merge, strip_server_managed, AttributeMap,
    ConvergeError, ConvergeResult, HasIdentity, ObjectKey, Outcome, ResourceDescriptor,
};
use converge_core::merge::carry_resource_version;
use converge_kubehub::DynamicClient;

use crate::{log_diff, report, report_delete};

/// Converge a typed desired object through a schema-agnostic client.
///
/// `desired` is projected into an attribute map first; a projection failure is
/// returned before any request is made. See [`converge_attributes`] for the
/// merge policy.
pub async fn converge_dynamic<C, T>(client: &C, descriptor: &ResourceDescriptor, desired: &T) -> ConvergeResult<Outcome>
where
    C: DynamicClient + ?Sized,
    T: HasIdentity + Serialize + ?Sized,
{
    let key = desired.identity();
    let t0 = Instant::now();
    let res = match project(desired) {
        Ok(overlay) => converge_cycle(client, descriptor, &key, overlay).await,
        Err(e) => Err(e),
    };
    report(&descriptor.resource, &key, &res, t0);
    res
}

/// Converge an already-projected document (e.g. parsed from YAML).
///
/// When the object exists, the overlay is merged into the live document at the
/// top level only: keys absent from the overlay are preserved, keys present in
/// it are replaced wholesale (nested maps are not merged). The write is skipped
/// when the merge result is semantically equal to the live object, ignoring
/// server-managed metadata and `status`.
pub async fn converge_attributes<C>(client: &C, descriptor: &ResourceDescriptor, overlay: AttributeMap) -> ConvergeResult<Outcome>
where
    C: DynamicClient + ?Sized,
{
    let key = ObjectKey::from_attributes(&overlay);
    let t0 = Instant::now();
    let res = if key.name.is_empty() {
        Err(ConvergeError::Projection("document has no metadata.name".into()))
    } else {
        converge_cycle(client, descriptor, &key, overlay).await
    };
    report(&descriptor.resource, &key, &res, t0);
    res
}

async fn converge_cycle<C>(
    client: &C,
    descriptor: &ResourceDescriptor,
    key: &ObjectKey,
    overlay: AttributeMap,
) -> ConvergeResult<Outcome>
where
    C: DynamicClient + ?Sized,
{
    let current = match client.get(descriptor, key).await {
        Ok(current) => current,
        Err(e) if is_not_found(&e) => {
            client.create(descriptor, key, &overlay).await?;
            return Ok(Outcome::Created);
        }
        Err(e) => return Err(e.into()),
    };

    let mut merged = shallow_merge(&current, &overlay);
    let before = strip_server_managed(Json::Object(current.clone()));
    let after = strip_server_managed(Json::Object(merged.clone()));
    if semantic_eq(&before, &after) {
        debug!(resource = %descriptor, key = %key, "merge result equals live object");
        return Ok(Outcome::Unchanged);
    }
    log_diff(&descriptor.resource, key, &render_diff(&before, &after));

    carry_resource_version(&mut merged, &current);
    client.update(descriptor, key, &merged).await?;
    Ok(Outcome::Updated)
}

/// Delete a dynamically addressed object. An already-absent object is success.
pub async fn delete_dynamic<C>(client: &C, descriptor: &ResourceDescriptor, key: &ObjectKey) -> ConvergeResult<()>
where
    C: DynamicClient + ?Sized,
{
    let key = &key.normalized();
    let res = match client.delete(descriptor, key).await {
        Ok(()) => Ok(false),
        Err(e) if is_not_found(&e) => Ok(true),
        Err(e) => Err(e),
    };
    report_delete(&descriptor.resource, key, &res);
    res.map(|_| ()).map_err(ConvergeError::from)
}
