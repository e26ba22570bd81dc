//! Projection into attribute maps and the top-level merge policy.

use serde::Serialize;
use serde_json::Value as Json;

use crate::ConvergeError;

/// Generic ordered key/value document, the shape dynamic clients read and write.
pub type AttributeMap = serde_json::Map<String, Json>;

/// Metadata fields the API server owns. Never part of a comparison.
const SERVER_MANAGED_META: &[&str] = &[
    "managedFields",
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "selfLink",
];

/// Lossy projection of a typed object through JSON.
/// Only JSON-representable fields survive; the result must be an object.
pub fn project<T: Serialize + ?Sized>(desired: &T) -> Result<AttributeMap, ConvergeError> {
    match serde_json::to_value(desired) {
        Ok(Json::Object(map)) => Ok(map),
        Ok(other) => Err(ConvergeError::Projection(format!(
            "expected an object, got {}",
            kind_of(&other)
        ))),
        Err(e) => Err(ConvergeError::Projection(e.to_string())),
    }
}

fn kind_of(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

/// Overlay `desired` onto a copy of `current`, top-level keys only.
///
/// Keys present only in `current` are kept. Keys present in `desired` replace
/// the current value wholesale: nested maps are NOT merged, so nested keys the
/// overlay omits are dropped.
pub fn shallow_merge(current: &AttributeMap, desired: &AttributeMap) -> AttributeMap {
    let mut merged = current.clone();
    for (k, v) in desired.iter() {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Remove server-populated fields (`status` and server-owned metadata)
/// so that comparisons only see caller-managed state.
pub fn strip_server_managed(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for k in SERVER_MANAGED_META {
            meta.remove(*k);
        }
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Copy `metadata.resourceVersion` from `current` into `merged` when the
/// overlay replaced `metadata` without one, so the write stays conditional.
pub fn carry_resource_version(merged: &mut AttributeMap, current: &AttributeMap) {
    let rv = current
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .cloned();
    let Some(rv) = rv else { return };
    if let Some(meta) = merged.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.entry("resourceVersion").or_insert(rv);
    }
}
