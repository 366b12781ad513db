//! CLI entry point for the DTN RPC coordination engine: `-s`/`--server`
//! starts a node, `-c`/`--client <job file>` drives one call to completion.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use dtrpc_config::{validate_config, ConfigError, RpcConfig, SelectorKind};
use dtrpc_core::{CapabilityRecord, Sid};
use dtrpc_error::{DtrpcError, ErrorCode};
use dtrpc_host::RpcsManifest;
use dtrpc_runtime::{call, run_until_sigint, CallOutcome, DispatchMode, OfferCatalog, ServerConfig};
use dtrpc_selector::{Selector, SelectorPolicy};
use dtrpc_store::{BundleStore, HttpBundleStore};
use tracing_subscriber::EnvFilter;

/// Exit code for runtime/config errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

/// Default per-step subprocess timeout. Not part of `rpc.conf` (§6.6 names
/// no such key); the original implementation never bounds step execution,
/// but an unbounded subprocess can wedge a server's handler pool forever.
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Default work directory for extracted call packages.
const DEFAULT_WORK_DIR: &str = "./work";

#[derive(Parser, Debug)]
#[command(
    name = "dtrpc",
    version,
    about = "Remote procedure calls over a delay-tolerant network overlay"
)]
struct Cli {
    /// Path to the DTN RPC config file.
    #[arg(short = 'f', long = "config", default_value = "rpc.conf")]
    config_path: PathBuf,

    /// Start the server listening.
    #[arg(short = 's', long = "server")]
    server: bool,

    /// Call the procedure(s) described by this job file.
    #[arg(short = 'c', long = "client", value_name = "JOB_FILE_PATH")]
    job_file_path: Option<PathBuf>,

    /// Execute inbound calls sequentially instead of in parallel (server only).
    #[arg(short = 'q', long = "queue")]
    queue: bool,

    /// Give up waiting for a result after this many seconds (client only;
    /// default is to wait indefinitely).
    #[arg(short = 't', long = "timeout")]
    timeout_secs: Option<u64>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("dtrpc=debug")
    } else {
        EnvFilter::new("dtrpc=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.server == cli.job_file_path.is_some() {
        eprintln!("error: exactly one of --server or --client <JOB_FILE_PATH> is required");
        std::process::exit(2);
    }

    let result = run(cli).await;
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(cli: Cli) -> Result<(), DtrpcError> {
    let config = load_and_validate(&cli.config_path)?;

    let store: Arc<dyn BundleStore> = Arc::new(HttpBundleStore::new(
        format!("http://{}:{}", config.host, config.port),
        config.user.clone(),
        config.passwd.clone(),
    ));

    // Auth check at startup (§7 "Auth: fatal at startup"): resolve the
    // store's keyring identity, which also confirms the store is reachable
    // and our credentials are accepted.
    let detected_sid = store.identity().await?;
    let local_sid = match config.parsed_local_sid().map_err(|e| {
        DtrpcError::new(ErrorCode::ConfigInvalid, format!("invalid local_sid: {e}"))
    })? {
        Some(sid) => sid,
        None => detected_sid,
    };

    if cli.server {
        run_server(store, local_sid, &config, cli.queue).await
    } else {
        let job_file_path = cli
            .job_file_path
            .expect("clap group guarantees exactly one of server/client");
        run_client(store, local_sid, &config, &job_file_path, cli.timeout_secs).await
    }
}

fn load_and_validate(path: &std::path::Path) -> Result<RpcConfig, DtrpcError> {
    let config = dtrpc_config::load_config(Some(path)).map_err(config_error_to_dtrpc)?;
    match validate_config(&config) {
        Ok(warnings) => {
            for w in warnings {
                tracing::warn!(target: "dtrpc.cli", "{w}");
            }
            Ok(config)
        }
        Err(e) => Err(config_error_to_dtrpc(e)),
    }
}

fn config_error_to_dtrpc(e: ConfigError) -> DtrpcError {
    DtrpcError::new(ErrorCode::ConfigInvalid, e.to_string())
}

async fn run_server(
    store: Arc<dyn BundleStore>,
    local_sid: Sid,
    config: &RpcConfig,
    queue: bool,
) -> Result<(), DtrpcError> {
    let rpcs = RpcsManifest::load(&config.rpcs).await?;

    let sampler = Arc::new(StaticCapabilitySampler {
        baseline: config.capabilities.clone(),
    });
    let catalog = Arc::new(OfferCatalog::new(
        store.clone(),
        local_sid.clone(),
        rpcs.procedures().to_vec(),
        sampler,
    ));
    let selector = Arc::new(Mutex::new(Selector::new(
        to_selector_policy(config.selector),
        config.selector_seed,
    )));

    let work_dir = PathBuf::from(DEFAULT_WORK_DIR);
    tokio::fs::create_dir_all(&work_dir).await?;

    let server_config = ServerConfig {
        rpcs,
        bins_dir: config.bins.clone(),
        work_dir,
        step_timeout: Some(DEFAULT_STEP_TIMEOUT),
        dispatch_mode: if queue {
            DispatchMode::Sequential
        } else {
            DispatchMode::Parallel
        },
    };

    tracing::info!(target: "dtrpc.cli", sid = %local_sid, "starting server");
    run_until_sigint(store, catalog, selector, server_config).await
}

async fn run_client(
    store: Arc<dyn BundleStore>,
    local_sid: Sid,
    config: &RpcConfig,
    job_file_path: &std::path::Path,
    timeout_secs: Option<u64>,
) -> Result<(), DtrpcError> {
    // The client never publishes its own offer; an empty procedure list and
    // a no-op sampler are enough to let `snapshot_candidates` work during
    // discovery (§4.4 step 3).
    let sampler = Arc::new(StaticCapabilitySampler {
        baseline: CapabilityRecord::new(),
    });
    let catalog = OfferCatalog::new(store.clone(), local_sid.clone(), Vec::new(), sampler);
    let mut selector = Selector::new(to_selector_policy(config.selector), config.selector_seed);
    let total_wait_timeout = timeout_secs.map(Duration::from_secs);

    let outcome = call(
        store,
        &mut selector,
        &catalog,
        &local_sid,
        job_file_path,
        total_wait_timeout,
    )
    .await?;

    match outcome {
        CallOutcome::Result { result_path } => {
            println!("result: {}", result_path.display());
            Ok(())
        }
        CallOutcome::Error { error_path } => {
            println!("error: {}", error_path.display());
            Err(DtrpcError::new(
                ErrorCode::ExecutionFailed,
                format!("call failed, see {}", error_path.display()),
            ))
        }
        CallOutcome::TimedOut => Err(DtrpcError::new(
            ErrorCode::TransportUnavailable,
            "timed out waiting for a result",
        )),
    }
}

fn to_selector_policy(kind: SelectorKind) -> SelectorPolicy {
    match kind {
        SelectorKind::First => SelectorPolicy::First,
        SelectorKind::Random => SelectorPolicy::Random,
        SelectorKind::Best => SelectorPolicy::Best,
        SelectorKind::Probabilistic => SelectorPolicy::Probabilistic,
    }
}

/// A [`dtrpc_runtime::CapabilitySampler`] that returns a fixed baseline read
/// from configuration (§6.6 `[capabilities]`). `energy` is still live: the
/// Offer Catalog carries forward whatever `decrement_energy` has produced
/// rather than reverting to this baseline on every publish tick.
struct StaticCapabilitySampler {
    baseline: CapabilityRecord,
}

impl dtrpc_runtime::CapabilitySampler for StaticCapabilitySampler {
    fn sample(&self) -> CapabilityRecord {
        self.baseline.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_kind_maps_to_every_policy() {
        assert_eq!(to_selector_policy(SelectorKind::First), SelectorPolicy::First);
        assert_eq!(to_selector_policy(SelectorKind::Random), SelectorPolicy::Random);
        assert_eq!(to_selector_policy(SelectorKind::Best), SelectorPolicy::Best);
        assert_eq!(
            to_selector_policy(SelectorKind::Probabilistic),
            SelectorPolicy::Probabilistic
        );
    }

    #[test]
    fn static_sampler_returns_configured_baseline() {
        let mut baseline = CapabilityRecord::new();
        baseline.insert(
            dtrpc_core::CPU_LOAD.to_string(),
            dtrpc_core::CapabilityValue::Number(0.2),
        );
        let sampler = StaticCapabilitySampler {
            baseline: baseline.clone(),
        };
        assert_eq!(
            dtrpc_runtime::CapabilitySampler::sample(&sampler),
            baseline
        );
    }
}
