//! Converge apply: create-or-update engines and idempotent deletes.
//!
//! Each call is one fetch → mutate/merge → compare → write cycle. There is no
//! retry, cache or background work here: a conflict or any other API error is
//! returned as-is and the surrounding reconcile loop decides when to try again.
//! Cancel a cycle by dropping its future (e.g. via `tokio::time::timeout`).

#![forbid(unsafe_code)]

use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{error, info};

use converge_core::{ConvergeResult, ObjectKey, Outcome};

mod dynamic;
mod typed;

pub use converge_core::{ConvergeError, Diff, ResourceDescriptor};
pub use dynamic::{converge_attributes, converge_dynamic, delete_dynamic};
pub use typed::{converge, create_if_absent, delete};

/// Log and count the result of a convergence cycle.
fn report(kind: &str, key: &ObjectKey, res: &ConvergeResult<Outcome>, t0: Instant) {
    histogram!("converge_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    match res {
        Ok(Outcome::Created) => {
            counter!("converge_created_total", 1u64);
            info!(kind = %kind, key = %key, outcome = "created", "created object");
        }
        Ok(Outcome::Updated) => {
            counter!("converge_updated_total", 1u64);
            info!(kind = %kind, key = %key, outcome = "updated", "updated object");
        }
        Ok(Outcome::Unchanged) => {
            counter!("converge_unchanged_total", 1u64);
            info!(kind = %kind, key = %key, outcome = "unchanged", "object already converged; skipping update");
        }
        Err(e) => {
            counter!("converge_errors_total", 1u64);
            error!(kind = %kind, key = %key, error = %e, "failed to create or update object");
        }
    }
}

/// Log and count the result of a delete; `Ok(true)` is the already-absent case.
fn report_delete(kind: &str, key: &ObjectKey, res: &Result<bool, kube::Error>) {
    match res {
        Ok(false) => {
            counter!("converge_deleted_total", 1u64);
            info!(kind = %kind, key = %key, "deleted object");
        }
        Ok(true) => info!(kind = %kind, key = %key, "object already absent; nothing to delete"),
        Err(e) => {
            counter!("converge_errors_total", 1u64);
            error!(kind = %kind, key = %key, error = %e, "failed to delete object");
        }
    }
}

fn log_diff(kind: &str, key: &ObjectKey, diff: &Diff) {
    info!(
        kind = %kind,
        key = %key,
        adds = diff.summary.adds,
        updates = diff.summary.updates,
        removes = diff.summary.removes,
        diff = %diff,
        "object differs from desired state"
    );
}
