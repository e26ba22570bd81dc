//! Converge core types: identities, descriptors, outcomes and errors.
//!
//! Everything here is pure; the network-facing pieces live in `converge-kubehub`
//! (client boundaries) and `converge-apply` (the engines).

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod equality;
pub mod merge;

pub use equality::{render_diff, semantic_eq, Diff, DiffSummary};
pub use merge::{project, shallow_merge, strip_server_managed, AttributeMap};

/// `(namespace, name)` pair addressing an object within its kind.
/// `namespace` is `None` for cluster-scoped kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    /// An empty `namespace` yields a cluster-scoped key.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }.normalized()
    }

    /// Same key with `Some("")` folded into `None`.
    pub fn normalized(&self) -> Self {
        Self { namespace: self.namespace.clone().filter(|s| !s.is_empty()), name: self.name.clone() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: None, name: name.into() }
    }

    /// Identity of a generic attribute map, read from `metadata.name` / `metadata.namespace`.
    pub fn from_attributes(map: &AttributeMap) -> Self {
        let meta = map.get("metadata");
        let field = |k: &str| {
            meta.and_then(|m| m.get(k))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        Self {
            namespace: field("namespace").filter(|s| !s.is_empty()),
            name: field("name").unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Anything that can report its identity.
pub trait HasIdentity {
    fn identity(&self) -> ObjectKey;
}

impl<K: kube::Resource> HasIdentity for K {
    fn identity(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey {
            namespace: meta.namespace.clone().filter(|s| !s.is_empty()),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

/// Group/version/resource triple for kinds without a compiled schema.
/// `group` is empty for the core API group; `resource` is the plural name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl ResourceDescriptor {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    /// Parse `v1/configmaps` or `gateway.networking.k8s.io/v1/gatewayclasses`.
    pub fn parse(key: &str) -> Result<Self, ConvergeError> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [version, resource] if !version.is_empty() && !resource.is_empty() => {
                Ok(Self::new("", *version, *resource))
            }
            [group, version, resource] if !group.is_empty() && !version.is_empty() && !resource.is_empty() => {
                Ok(Self::new(*group, *version, *resource))
            }
            _ => Err(ConvergeError::InvalidDescriptor(key.to_string())),
        }
    }

    /// `apiVersion` as it appears on objects of this resource.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// Result classification of one convergence cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Unchanged,
    Created,
    Updated,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Unchanged => "unchanged",
            Outcome::Created => "created",
            Outcome::Updated => "updated",
        }
    }

    /// Whether the cycle wrote to the cluster.
    pub fn wrote(&self) -> bool {
        !matches!(self, Outcome::Unchanged)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    /// Error returned by the cluster API, untouched.
    #[error(transparent)]
    Api(#[from] kube::Error),
    #[error("mutator cannot change object name and/or namespace ({before} -> {after})")]
    IdentityMutated { before: ObjectKey, after: ObjectKey },
    #[error("mutator failed: {0}")]
    Mutate(#[source] anyhow::Error),
    #[error("desired object is not representable as an attribute map: {0}")]
    Projection(String),
    #[error("invalid resource descriptor: {0} (expect v1/resource or group/v1/resource)")]
    InvalidDescriptor(String),
}

impl ConvergeError {
    /// The underlying API error, if this is one.
    pub fn api(&self) -> Option<&kube::Error> {
        match self {
            ConvergeError::Api(e) => Some(e),
            _ => None,
        }
    }
}

pub type ConvergeResult<T> = Result<T, ConvergeError>;

/// HTTP 404 from the API server.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// HTTP 409 with reason `AlreadyExists` (as opposed to a write conflict).
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// HTTP 409 with reason `Conflict`.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "Conflict")
}

pub mod prelude {
    pub use super::{
        is_already_exists, is_conflict, is_not_found, AttributeMap, ConvergeError, ConvergeResult, HasIdentity,
        ObjectKey, Outcome, ResourceDescriptor,
    };
}
