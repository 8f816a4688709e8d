use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use k8s_openapi::api::core::v1::{Node, ServiceAccount};
use kube::ResourceExt;
use metrics::histogram;
use regis_core::{fields, labels, Context, ObjectList, RegistryError};
use regis_generic::{DeleteOutcome, UpdateOutcome};
use regis_registry::{
    HttpKubeletClient, HttpTransport, KubeletConfig, NodeStorage, NodeStrategy, ProxyTarget, ServiceAccountRest,
};
use regis_store::{storage_factory, ListOptions, MemoryStorage, Storage};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "regisctl", version, about = "Regis CLI: nodes and service accounts over a local state file")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Request namespace (service accounts)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// State file holding the store snapshot
    #[arg(long = "state", env = "REGIS_STATE", global = true, default_value = "regis-state.json")]
    state: PathBuf,

    /// Page-size cap for list operations
    #[arg(long = "list-limit", env = "REGIS_LIST_LIMIT", global = true, default_value_t = 100)]
    list_limit: usize,

    /// Deadline for resolving a proxy target
    #[arg(long = "resolve-timeout-ms", env = "REGIS_RESOLVE_TIMEOUT_MS", global = true, default_value_t = 2000)]
    resolve_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an object from a YAML or JSON manifest
    Create {
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },
    /// Replace an object's spec from a manifest
    Update {
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },
    /// Replace a node's status from a manifest
    UpdateStatus {
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },
    /// Show one object
    Get { kind: Kind, name: String },
    /// List objects, optionally filtered
    List {
        kind: Kind,
        /// Label selector, e.g. "zone=a,tier!=edge"
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        /// Field selector, e.g. "spec.unschedulable=true"
        #[arg(long = "field-selector")]
        field_selector: Option<String>,
        #[arg(long = "limit")]
        limit: Option<usize>,
        /// Resume after this key (printed by a truncated list)
        #[arg(long = "continue")]
        continue_after: Option<String>,
    },
    /// Delete one object
    Delete { kind: Kind, name: String },
    /// Resolve where proxied traffic for a node goes: [scheme:]name[:port]
    ProxyTarget { id: String },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Kind { Node, ServiceAccount }

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "node" | "nodes" | "no" => Ok(Kind::Node),
            "serviceaccount" | "serviceaccounts" | "sa" => Ok(Kind::ServiceAccount),
            other => Err(anyhow!("unknown resource type {other:?}")),
        }
    }
}

impl Kind {
    fn plural(self) -> &'static str {
        match self {
            Kind::Node => "node",
            Kind::ServiceAccount => "serviceaccount",
        }
    }
}

enum Manifest {
    Node(Box<Node>),
    ServiceAccount(Box<ServiceAccount>),
}

/// YAML or JSON (JSON parses as YAML), dispatched on `kind`.
fn parse_manifest(text: &str) -> Result<Manifest> {
    let doc: serde_json::Value = serde_yaml::from_str(text).context("manifest is not valid YAML/JSON")?;
    let kind = doc.get("kind").and_then(|k| k.as_str()).unwrap_or_default().to_string();
    match kind.as_str() {
        "Node" => Ok(Manifest::Node(Box::new(serde_json::from_value(doc).context("decode Node")?))),
        "ServiceAccount" => Ok(Manifest::ServiceAccount(Box::new(serde_json::from_value(doc).context("decode ServiceAccount")?))),
        "" => bail!("manifest has no kind"),
        other => bail!("unsupported kind {other:?}; expected Node or ServiceAccount"),
    }
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_manifest(&text)
}

struct Registries {
    nodes: NodeStorage,
    service_accounts: ServiceAccountRest,
}

impl Registries {
    fn build(backend: Arc<dyn Storage>, list_limit: usize, kubelet: KubeletConfig) -> Result<Self> {
        let fallback = Arc::new(HttpTransport::plain(kubelet.timeout));
        let kubelet = HttpKubeletClient::new(kubelet).context("kubelet client")?;
        let nodes = NodeStorage::new(
            Arc::clone(&backend),
            storage_factory,
            list_limit,
            NodeStrategy::new(),
            Arc::new(kubelet),
            fallback,
        )?;
        let service_accounts = ServiceAccountRest::with_list_limit(backend, storage_factory, list_limit);
        Ok(Self { nodes, service_accounts })
    }
}

fn init_tracing() {
    let env = std::env::var("REGIS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REGIS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid REGIS_METRICS_ADDR; expected host:port");
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_nodes(output: Output, list: &ObjectList<Node>) -> Result<()> {
    if output == Output::Json {
        return print_json(list);
    }
    println!("{:<24} {:<14} {}", "NAME", "UNSCHEDULABLE", "HOST-IP");
    for n in &list.items {
        let cordoned = n.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false);
        let ip = regis_registry::node::node_host_ip(n).map(|ip| ip.to_string()).unwrap_or_else(|_| "<none>".to_string());
        println!("{:<24} {:<14} {}", n.name_any(), cordoned, ip);
    }
    print_continue(list.metadata.continue_.as_deref());
    Ok(())
}

fn print_service_accounts(output: Output, list: &ObjectList<ServiceAccount>) -> Result<()> {
    if output == Output::Json {
        return print_json(list);
    }
    println!("{:<16} {:<24} {}", "NAMESPACE", "NAME", "SECRETS");
    for sa in &list.items {
        let secrets = sa.secrets.as_ref().map(Vec::len).unwrap_or(0);
        println!("{:<16} {:<24} {}", sa.namespace().unwrap_or_default(), sa.name_any(), secrets);
    }
    print_continue(list.metadata.continue_.as_deref());
    Ok(())
}

fn print_continue(token: Option<&str>) {
    if let Some(token) = token {
        eprintln!("(more results; pass --continue {token})");
    }
}

fn print_object<K: ResourceExt + Serialize>(output: Output, kind: Kind, obj: &K, verb: &str) -> Result<()> {
    match output {
        Output::Json => print_json(obj),
        Output::Human => {
            println!("{}/{} {}", kind.plural(), obj.name_any(), verb);
            Ok(())
        }
    }
}

fn print_updated<K: ResourceExt + Serialize>(output: Output, kind: Kind, out: &UpdateOutcome<K>) -> Result<()> {
    print_object(output, kind, &out.object, if out.created { "created" } else { "updated" })
}

fn print_deleted<K: ResourceExt + Serialize>(output: Output, kind: Kind, name: &str, out: &DeleteOutcome<K>) -> Result<()> {
    match (output, out) {
        (Output::Json, DeleteOutcome::Deleted(obj)) => print_json(obj),
        (Output::Json, DeleteOutcome::Success) => print_json(&serde_json::json!({ "status": "Success", "name": name })),
        (Output::Human, _) => {
            println!("{}/{} deleted", kind.plural(), name);
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct ProxyTargetView<'a> {
    url: &'a str,
    port: u16,
    transport: &'a str,
    timeout_ms: u128,
}

/// The resolver blocks on one connection-info lookup and sets no deadline
/// itself; the caller bounds it.
async fn resolve_with_deadline(regs: Arc<Registries>, ctx: Context, id: String, timeout: Duration) -> Result<ProxyTarget> {
    let started = Instant::now();
    let task = tokio::task::spawn_blocking(move || regs.nodes.node.resource_location(&ctx, &id));
    let joined = tokio::time::timeout(timeout, task)
        .await
        .map_err(|_| anyhow!("resolving proxy target timed out after {}ms", timeout.as_millis()))?;
    histogram!("regisctl_resolve_ms", started.elapsed().as_secs_f64() * 1000.0);
    Ok(joined.context("resolver task failed")??)
}

/// Runs one command; `Ok(true)` when the store changed and must be saved.
async fn run(cli: &Cli, regs: Arc<Registries>, ctx: &Context) -> Result<bool> {
    let out = cli.output;
    match &cli.command {
        Commands::Create { file } => {
            match read_manifest(file)? {
                Manifest::Node(n) => print_object(out, Kind::Node, &regs.nodes.node.create(ctx, *n)?, "created")?,
                Manifest::ServiceAccount(sa) => {
                    print_object(out, Kind::ServiceAccount, &regs.service_accounts.create(ctx, *sa)?, "created")?
                }
            }
            Ok(true)
        }
        Commands::Update { file } => {
            match read_manifest(file)? {
                Manifest::Node(n) => print_updated(out, Kind::Node, &regs.nodes.node.update(ctx, *n)?)?,
                Manifest::ServiceAccount(sa) => print_updated(out, Kind::ServiceAccount, &regs.service_accounts.update(ctx, *sa)?)?,
            }
            Ok(true)
        }
        Commands::UpdateStatus { file } => match read_manifest(file)? {
            Manifest::Node(n) => {
                print_updated(out, Kind::Node, &regs.nodes.status.update(ctx, *n)?)?;
                Ok(true)
            }
            Manifest::ServiceAccount(_) => bail!("serviceaccounts have no status subresource"),
        },
        Commands::Get { kind, name } => {
            match kind {
                Kind::Node => print_json_or_row(out, *kind, &regs.nodes.node.get(ctx, name)?)?,
                Kind::ServiceAccount => print_json_or_row(out, *kind, &regs.service_accounts.get(ctx, name)?)?,
            }
            Ok(false)
        }
        Commands::List { kind, selector, field_selector, limit, continue_after } => {
            let label = match selector {
                Some(s) => labels::Selector::parse(s)?,
                None => labels::Selector::everything(),
            };
            let field = match field_selector {
                Some(s) => fields::Selector::parse(s)?,
                None => fields::Selector::everything(),
            };
            let opts = ListOptions { limit: *limit, continue_after: continue_after.clone() };
            debug!(kind = ?kind, label = %label, field = %field, "list");
            match kind {
                Kind::Node => print_nodes(out, &regs.nodes.node.list(ctx, label, field, &opts)?)?,
                Kind::ServiceAccount => print_service_accounts(out, &regs.service_accounts.list(ctx, label, field, &opts)?)?,
            }
            Ok(false)
        }
        Commands::Delete { kind, name } => {
            match kind {
                Kind::Node => print_deleted(out, *kind, name, &regs.nodes.node.delete(ctx, name)?)?,
                Kind::ServiceAccount => print_deleted(out, *kind, name, &regs.service_accounts.delete(ctx, name)?)?,
            }
            Ok(true)
        }
        Commands::ProxyTarget { id } => {
            let timeout = Duration::from_millis(cli.resolve_timeout_ms);
            let target = resolve_with_deadline(regs, ctx.clone(), id.clone(), timeout).await?;
            match out {
                Output::Json => print_json(&ProxyTargetView {
                    url: target.url.as_str(),
                    port: target.port,
                    transport: target.transport.scheme(),
                    timeout_ms: target.transport.timeout().as_millis(),
                })?,
                Output::Human => println!("{} (port: {}, transport: {})", target.url, target.port, target.transport.scheme()),
            }
            Ok(false)
        }
    }
}

fn print_json_or_row<K: ResourceExt + Serialize>(output: Output, kind: Kind, obj: &K) -> Result<()> {
    match output {
        Output::Json => print_json(obj),
        Output::Human => {
            let ns = obj.namespace().map(|ns| format!("{ns}/")).unwrap_or_default();
            println!("{}/{}{} (resourceVersion {})", kind.plural(), ns, obj.name_any(), obj.resource_version().unwrap_or_default());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let backend = Arc::new(MemoryStorage::load(&cli.state)?);
    let regs = Arc::new(Registries::build(backend.clone(), cli.list_limit, KubeletConfig::from_env())?);
    let ctx = Context::with_namespace(cli.namespace.clone().unwrap_or_default());
    debug!(state = %cli.state.display(), ns = ?ctx.namespace(), "regisctl starting");

    match run(&cli, regs, &ctx).await {
        Ok(true) => backend.save(&cli.state).with_context(|| format!("save {}", cli.state.display())),
        Ok(false) => Ok(()),
        Err(e) => match e.downcast_ref::<RegistryError>() {
            Some(re) => {
                eprintln!("Error from server ({}): {}", re.reason(), re);
                std::process::exit(1);
            }
            None => Err(e),
        },
    }
}
