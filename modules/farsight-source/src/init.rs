//! Initialization controller: resolve the tenant scopes, build the full
//! adapter set, register it with the engine and verify credentials, all
//! under an exponential-backoff retry so a slow or flaky control plane
//! yields an unhealthy pod rather than a crash loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use farsight_adapter::{AdapterHandle, BlastRegistry, Linker};
use farsight_cache::Cache;
use farsight_common::{Config, Scope};
use farsight_dynamic::HttpClient;
use farsight_engine::Engine;

use crate::catalog;
use crate::handwritten::HttpAdapter;
use crate::probe::PermissionProbe;
use crate::projects;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Per-attempt budget, independent of the outer context, so one slow tenant
/// cannot stall the backoff loop.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything one attempt needs beyond the engine itself.
pub struct InitDeps {
    pub config: Config,
    pub client: HttpClient,
    pub cache: Cache,
    pub probe: Arc<PermissionProbe>,
    /// Control-plane base URL; tests point this at a mock server.
    pub endpoint: String,
}

impl InitDeps {
    pub fn new(config: Config, client: HttpClient, cache: Cache) -> Self {
        let endpoint = config
            .endpoint_override
            .clone()
            .unwrap_or_else(|| "https://api.cloud.example.com".to_string());
        Self {
            config,
            client,
            cache,
            probe: Arc::new(PermissionProbe::new()),
            endpoint,
        }
    }
}

/// Resolve the concrete scope set for this tenant configuration: explicit
/// accounts cross regions and zones, plus discovered projects when a parent
/// is configured.
pub async fn resolve_scopes(
    ctx: &CancellationToken,
    deps: &InitDeps,
) -> Result<Vec<Scope>> {
    let mut accounts = deps.config.accounts.clone();
    if let Some(parent) = &deps.config.project_parent {
        let discovered = projects::discover_projects(ctx, &deps.client, &deps.endpoint, parent)
            .await
            .context("project discovery failed")?;
        accounts.extend(discovered);
    }
    accounts.sort();
    accounts.dedup();
    if accounts.is_empty() {
        bail!("no accounts configured and none discovered");
    }

    let mut scopes = Vec::new();
    for account in &accounts {
        scopes.push(Scope::account(account));
        for region in &deps.config.regions {
            scopes.push(Scope::regional(account, region));
        }
        for zone in &deps.config.zones {
            scopes.push(Scope::zonal(account, zone));
        }
    }
    Ok(scopes)
}

/// One attempt: build everything, swap the registry, verify credentials.
/// The registry is cleared first so a retry never trips the overlap check.
async fn attempt(ctx: &CancellationToken, engine: &Engine, deps: &InitDeps) -> Result<()> {
    let scopes = resolve_scopes(ctx, deps).await?;
    info!(scopes = scopes.len(), "Resolved tenant scopes");

    let registry: Arc<BlastRegistry> = Arc::new(catalog::blast_registry());
    let linker = Arc::new(Linker::new(registry));

    let mut handles: Vec<AdapterHandle> = Vec::new();
    for scope in &scopes {
        handles.extend(catalog::build_adapters_for_scope(
            &deps.endpoint,
            scope,
            &deps.client,
            &deps.cache,
            &linker,
            &deps.config.source_name,
            deps.config.include_in_development,
        ));
    }

    // Hand-written adapters share the registry with the dynamic ones.
    if let Some(first_account) = deps.config.accounts.first() {
        handles.push(
            HttpAdapter::new(
                reqwest::Client::new(),
                deps.cache.clone(),
                Scope::account(first_account),
                &deps.config.source_name,
            )
            .into_handle(),
        );
    }

    engine.clear_adapters();
    deps.cache.clear();
    engine
        .add_adapters(handles)
        .context("adapter registration failed")?;

    let report = crate::probe::probe_scopes(ctx, &engine.adapters()).await;
    if let Err(e) = report.outcome() {
        bail!(e);
    }

    // Readiness from here on: the cached probe, re-run when its window lapses.
    let probe = deps.probe.clone();
    let probe_engine = engine.clone();
    engine.set_readiness_check(Arc::new(move |token: CancellationToken| {
        let probe = probe.clone();
        let adapters = probe_engine.adapters();
        let check: futures::future::BoxFuture<'static, Result<(), String>> =
            Box::pin(async move { probe.run_cached(&token, adapters).await });
        check
    }));

    Ok(())
}

/// Run init attempts under exponential backoff (hard cap, jitter) until one
/// succeeds, the context is cancelled, or the attempt budget is spent. The
/// final error is latched into the engine either way, so the pod stays up
/// and observable.
pub async fn initialize_with_retry(
    ctx: &CancellationToken,
    engine: &Engine,
    deps: &InitDeps,
) -> Result<()> {
    let max_attempts = deps.config.max_init_attempts.max(1);
    let mut delay = BACKOFF_BASE;
    let mut last_error = String::new();

    for attempt_no in 1..=max_attempts {
        if ctx.is_cancelled() {
            bail!("initialization cancelled");
        }

        info!(attempt = attempt_no, max_attempts, "Initialization attempt");
        let outcome = tokio::time::timeout(ATTEMPT_TIMEOUT, attempt(ctx, engine, deps)).await;

        match outcome {
            Ok(Ok(())) => {
                engine.clear_init_error();
                engine.send_heartbeat(ctx, None).await;
                info!(adapters = engine.adapter_count(), "Initialization complete");
                return Ok(());
            }
            Ok(Err(e)) => {
                last_error = format!("{e:#}");
            }
            Err(_) => {
                last_error = format!("attempt timed out after {ATTEMPT_TIMEOUT:?}");
            }
        }

        warn!(attempt = attempt_no, error = %last_error, "Initialization attempt failed");
        // Leave no half-registered set behind for the next attempt.
        engine.clear_adapters();

        if attempt_no < max_attempts {
            let jitter = {
                let mut rng = rand::rng();
                Duration::from_millis(rng.random_range(0..=delay.as_millis() as u64 / 4))
            };
            tokio::select! {
                _ = ctx.cancelled() => bail!("initialization cancelled"),
                _ = tokio::time::sleep(delay + jitter) => {}
            }
            delay = delay.saturating_mul(2).min(BACKOFF_CAP);
        }
    }

    engine.set_init_error(last_error.clone());
    engine.send_heartbeat(ctx, Some(last_error.clone())).await;
    bail!("initialization failed after {max_attempts} attempts: {last_error}")
}
