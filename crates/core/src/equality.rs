//! Semantic equality over JSON documents and a small diff renderer.
//!
//! Equality is structural and order-sensitive for arrays, but an absent key,
//! `null`, `[]` and `{}` are all treated as "unset" and compare equal to each
//! other. Scalars are always significant, the empty string included: a map
//! entry holding `""` is not the same as a missing entry. Numbers compare by
//! value (`1` == `1.0`).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

fn is_unset(v: &Json) -> bool {
    match v {
        Json::Null => true,
        Json::Array(a) => a.is_empty(),
        Json::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn numbers_eq(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Deep semantic equality of two documents.
pub fn semantic_eq(a: &Json, b: &Json) -> bool {
    if is_unset(a) && is_unset(b) {
        return true;
    }
    match (a, b) {
        (Json::Object(ao), Json::Object(bo)) => {
            let null = Json::Null;
            ao.iter()
                .all(|(k, av)| semantic_eq(av, bo.get(k).unwrap_or(&null)))
                && bo
                    .iter()
                    .filter(|(k, _)| !ao.contains_key(*k))
                    .all(|(_, bv)| is_unset(bv))
        }
        (Json::Array(aa), Json::Array(bb)) => {
            aa.len() == bb.len() && aa.iter().zip(bb.iter()).all(|(x, y)| semantic_eq(x, y))
        }
        (Json::Number(x), Json::Number(y)) => numbers_eq(x, y),
        (av, bv) => av == bv,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.updates == 0 && self.removes == 0
    }
}

/// Human-readable rendering of the difference between two documents.
/// Carries no decision weight; engines only log it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diff {
    pub summary: DiffSummary,
    pub lines: Vec<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("; "))
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() { key.to_string() } else { format!("{}.{}", path, key) }
}

fn root(path: &str) -> &str {
    if path.is_empty() { "." } else { path }
}

/// Render what changed going from `before` to `after`.
/// Unset-equivalent values are not reported.
pub fn render_diff(before: &Json, after: &Json) -> Diff {
    fn walk(path: &str, b: &Json, a: &Json, out: &mut Diff) {
        if semantic_eq(b, a) {
            return;
        }
        match (b, a) {
            (Json::Object(bo), Json::Object(ao)) => {
                for (k, bv) in bo.iter() {
                    let p = join(path, k);
                    match ao.get(k) {
                        Some(av) => walk(&p, bv, av, out),
                        None if is_unset(bv) => {}
                        None => {
                            out.summary.removes += 1;
                            out.lines.push(format!("- {}", p));
                        }
                    }
                }
                for (k, av) in ao.iter() {
                    if !bo.contains_key(k) && !is_unset(av) {
                        out.summary.adds += 1;
                        out.lines.push(format!("+ {}: {}", join(path, k), av));
                    }
                }
            }
            (Json::Array(bb), Json::Array(aa)) => {
                let min_len = bb.len().min(aa.len());
                for i in 0..min_len {
                    walk(&format!("{}[{}]", path, i), &bb[i], &aa[i], out);
                }
                for (i, av) in aa.iter().enumerate().skip(min_len) {
                    out.summary.adds += 1;
                    out.lines.push(format!("+ {}[{}]: {}", path, i, av));
                }
                for i in aa.len()..bb.len() {
                    out.summary.removes += 1;
                    out.lines.push(format!("- {}[{}]", path, i));
                }
            }
            (bv, av) if is_unset(bv) => {
                out.summary.adds += 1;
                out.lines.push(format!("+ {}: {}", root(path), av));
            }
            (_, av) if is_unset(av) => {
                out.summary.removes += 1;
                out.lines.push(format!("- {}", root(path)));
            }
            (bv, av) => {
                out.summary.updates += 1;
                out.lines.push(format!("~ {}: {} -> {}", root(path), bv, av));
            }
        }
    }
    let mut out = Diff::default();
    walk("", before, after, &mut out);
    out
}
