use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::info;

use converge_apply::{converge, converge_attributes, delete_dynamic};
use converge_core::{AttributeMap, ObjectKey, Outcome, ResourceDescriptor};
use converge_kubehub::{KubeDynamic, KubeTyped};

#[derive(Parser, Debug)]
#[command(name = "convergectl", version, about = "Converge cluster objects to a desired state")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for namespaced resources (overrides metadata.namespace)
    #[arg(long = "ns", global = true, env = "CONVERGE_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update an object from a YAML document (top-level merge)
    Apply {
        /// YAML file holding a single object
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Resource key, e.g. "v1/configmaps" or "gateway.networking.k8s.io/v1/gatewayclasses"
        #[arg(long = "gvr")]
        gvr: String,
    },
    /// Delete an object; an absent object is not an error
    Delete {
        /// Resource key, e.g. "v1/configmaps" or "gateway.networking.k8s.io/v1/gatewayclasses"
        #[arg(long = "gvr")]
        gvr: String,
        /// Object name
        name: String,
    },
    /// Converge a namespaced RBAC Role holding a single rule
    Role {
        /// Role name
        #[arg(long = "name")]
        name: String,
        /// Verbs granted by the rule (repeatable)
        #[arg(long = "verb", required = true)]
        verbs: Vec<String>,
        /// Resources the rule applies to (repeatable)
        #[arg(long = "resource")]
        resources: Vec<String>,
        /// API groups the rule applies to (repeatable, "" for core)
        #[arg(long = "api-group")]
        api_groups: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct Report {
    resource: String,
    key: String,
    outcome: String,
}

fn init_tracing() {
    let env = std::env::var("CONVERGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CONVERGE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CONVERGE_METRICS_ADDR; expected host:port");
        }
    }
}

fn max_yaml_bytes() -> usize {
    std::env::var("CONVERGE_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

/// Parse a single YAML object into an attribute map, applying the namespace
/// override. `namespaced == Some(false)` strips any namespace for cluster-scoped kinds.
fn parse_document(yaml: &str, ns_override: Option<&str>, namespaced: Option<bool>) -> Result<AttributeMap> {
    if yaml.len() > max_yaml_bytes() {
        return Err(anyhow!("YAML payload too large (>{} bytes)", max_yaml_bytes()));
    }
    let val: serde_yaml::Value = serde_yaml::from_str(yaml).context("parsing YAML")?;
    let json = serde_json::to_value(val).context("converting YAML to JSON")?;
    let mut map = match json {
        Json::Object(map) => map,
        _ => return Err(anyhow!("YAML document is not a mapping")),
    };
    map.get("apiVersion").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("YAML missing apiVersion"))?;
    map.get("kind").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("YAML missing kind"))?;
    let meta = map
        .get_mut("metadata")
        .and_then(|m| m.as_object_mut())
        .ok_or_else(|| anyhow!("YAML missing metadata"))?;
    meta.get("name").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("YAML missing metadata.name"))?;
    if let Some(ns) = ns_override {
        meta.insert("namespace".into(), Json::String(ns.to_string()));
    }
    match namespaced {
        Some(false) => {
            meta.remove("namespace");
        }
        Some(true) if !meta.contains_key("namespace") => {
            return Err(anyhow!("namespace required for namespaced kind"));
        }
        _ => {}
    }
    Ok(map)
}

/// Key for a named object of a resolved kind: cluster-scoped kinds ignore `--ns`,
/// namespaced kinds require it.
fn object_key(name: String, ns: Option<&str>, namespaced: bool) -> Result<ObjectKey> {
    if !namespaced {
        return Ok(ObjectKey::cluster(name));
    }
    match ns.filter(|s| !s.is_empty()) {
        Some(ns) => Ok(ObjectKey::namespaced(ns, name)),
        None => Err(anyhow!("namespace required for namespaced kind")),
    }
}

fn policy_rule(verbs: Vec<String>, resources: Vec<String>, api_groups: Vec<String>) -> PolicyRule {
    PolicyRule {
        verbs,
        resources: if resources.is_empty() { None } else { Some(resources) },
        api_groups: if api_groups.is_empty() { None } else { Some(api_groups) },
        ..Default::default()
    }
}

fn print_report(output: Output, resource: &str, key: &ObjectKey, outcome: &str) -> Result<()> {
    match output {
        Output::Human => println!("{} {} {}", resource, key, outcome),
        Output::Json => {
            let r = Report { resource: resource.to_string(), key: key.to_string(), outcome: outcome.to_string() };
            println!("{}", serde_json::to_string_pretty(&r)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.as_deref();

    let client = converge_kubehub::get_kube_client().await?;
    match cli.command {
        Commands::Apply { file, gvr } => {
            let descriptor = ResourceDescriptor::parse(&gvr)?;
            info!(gvr = %descriptor, file = %file.display(), ns = ?ns, "apply invoked");
            let resolved = converge_kubehub::resolve_descriptor(client.clone(), &descriptor).await?;
            let yaml = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let doc = parse_document(&yaml, ns, Some(resolved.namespaced))?;
            let key = ObjectKey::from_attributes(&doc);
            let outcome: Outcome = converge_attributes(&KubeDynamic::new(client), &descriptor, doc).await?;
            print_report(cli.output, &descriptor.resource, &key, outcome.as_str())?;
        }
        Commands::Delete { gvr, name } => {
            let descriptor = ResourceDescriptor::parse(&gvr)?;
            let resolved = converge_kubehub::resolve_descriptor(client.clone(), &descriptor).await?;
            let key = object_key(name, ns, resolved.namespaced)?;
            info!(gvr = %descriptor, key = %key, "delete invoked");
            delete_dynamic(&KubeDynamic::new(client), &descriptor, &key).await?;
            print_report(cli.output, &descriptor.resource, &key, "deleted")?;
        }
        Commands::Role { name, verbs, resources, api_groups } => {
            let ns = ns.ok_or_else(|| anyhow!("--ns is required for roles"))?;
            let key = ObjectKey::namespaced(ns, name);
            let rule = policy_rule(verbs, resources, api_groups);
            let outcome = converge(&KubeTyped::new(client), &key, move |role: &mut Role| {
                role.rules = Some(vec![rule]);
                Ok(())
            })
            .await?;
            print_report(cli.output, "roles", &key, outcome.as_str())?;
        }
    }
    Ok(())
}
