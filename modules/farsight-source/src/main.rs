use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use farsight_cache::Cache;
use farsight_common::Config;
use farsight_dynamic::HttpClient;
use farsight_engine::{Engine, MemoryBus};
use farsight_source::{initialize_with_retry, InitDeps};

/// Resource-discovery source: enumerates remote control-plane entities and
/// serves them to the discovery mesh.
#[derive(Parser, Debug)]
#[command(name = "farsight-source", version)]
struct Args {
    /// Source name reported to the orchestrator (overrides FARSIGHT_SOURCE_NAME).
    #[arg(long)]
    source_name: Option<String>,

    /// Comma-separated accounts/projects to serve.
    #[arg(long)]
    accounts: Option<String>,

    /// Comma-separated regions.
    #[arg(long)]
    regions: Option<String>,

    /// Comma-separated zones.
    #[arg(long)]
    zones: Option<String>,

    /// Discover projects under this parent (organizations/.. or folders/..).
    #[arg(long)]
    project_parent: Option<String>,

    /// Control-plane base URL override.
    #[arg(long)]
    endpoint: Option<String>,

    /// Port for the /healthz probe endpoint.
    #[arg(long)]
    health_port: Option<u16>,

    /// Seconds between heartbeats.
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// File written with the failure reason on fatal startup errors.
    #[arg(long, default_value = "/dev/termination-log")]
    termination_log: String,
}

fn apply_args(mut config: Config, args: &Args) -> Config {
    let split = |raw: &str| -> Vec<String> {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };
    if let Some(name) = &args.source_name {
        config.source_name = name.clone();
    }
    if let Some(accounts) = &args.accounts {
        config.accounts = split(accounts);
    }
    if let Some(regions) = &args.regions {
        config.regions = split(regions);
    }
    if let Some(zones) = &args.zones {
        config.zones = split(zones);
    }
    if let Some(parent) = &args.project_parent {
        config.project_parent = Some(parent.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint_override = Some(endpoint.clone());
    }
    if let Some(port) = args.health_port {
        config.health_port = port;
    }
    if let Some(secs) = args.heartbeat_secs {
        config.heartbeat_secs = secs;
    }
    config
}

fn write_termination_log(path: &str, reason: &str) {
    if let Err(e) = std::fs::write(path, reason) {
        error!(path, error = %e, "Failed to write termination log");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("farsight=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = apply_args(Config::source_from_env(), &args);
    config.log_redacted();

    // The bus transport is injected per deployment; standalone runs use the
    // in-process bus so the query surface still works end to end.
    let bus = Arc::new(MemoryBus::new());
    let engine = Engine::new(
        config.source_name.clone(),
        config.bus_subject_prefix.clone(),
        bus,
        Duration::from_secs(config.heartbeat_secs),
    );

    // Health probes come up before init so orchestration can watch the pod
    // through a slow or failing start.
    let health_engine = engine.clone();
    let health_port = config.health_port;
    let termination_log = args.termination_log.clone();
    tokio::spawn(async move {
        if let Err(e) = farsight_engine::serve_health_probes(health_engine, health_port).await {
            let reason = format!("health endpoint failed: {e}");
            error!("{reason}");
            write_termination_log(&termination_log, &reason);
            std::process::exit(1);
        }
    });

    let ctx = CancellationToken::new();

    if let Err(e) = engine.start(&ctx).await {
        let reason = format!("engine failed to start: {e}");
        error!("{reason}");
        write_termination_log(&args.termination_log, &reason);
        std::process::exit(1);
    }
    engine.start_sending_heartbeats(&ctx);

    // Init runs in the background; failure latches into the engine so the
    // pod reads unhealthy instead of crash-looping.
    let cache = Cache::new(Duration::from_secs(config.cache_ttl_secs));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let deps = InitDeps::new(config.clone(), HttpClient::new(http), cache);
    let init_engine = engine.clone();
    let init_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = initialize_with_retry(&init_ctx, &init_engine, &deps).await {
            error!(error = %format!("{e:#}"), "Initialization gave up");
        }
    });

    wait_for_shutdown().await;
    info!("Shutdown signal received, draining");
    ctx.cancel();
    engine.stop().await;
    info!("Clean shutdown");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
