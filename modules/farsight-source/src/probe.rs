//! Permission probe: verify, per tenant scope, that credentials actually
//! work, before declaring the source ready. A NOTFOUND on the synthetic
//! query is a success signal (the control plane answered and authorised us);
//! NOTPERMITTED and transport failures are not.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use farsight_adapter::{Adapter, AdapterHandle};
use farsight_common::{ErrorKind, QueryError, Scope};

/// Bounded fan-out across tenants.
pub const PROBE_CONCURRENCY: usize = 20;

const PROBE_CACHE_WINDOW: Duration = Duration::from_secs(300);

/// A name that should never exist; we only care whether the API says
/// "not found" (authorised) or refuses to answer.
const PROBE_QUERY: &str = "farsight-permission-probe";

pub struct ProbeReport {
    pub succeeded: Vec<Scope>,
    pub failed: Vec<(Scope, anyhow::Error)>,
}

impl ProbeReport {
    /// The probe passes while at least one scope is usable.
    pub fn outcome(&self) -> Result<(), String> {
        if self.succeeded.is_empty() && !self.failed.is_empty() {
            let summary: Vec<String> = self
                .failed
                .iter()
                .map(|(scope, e)| format!("{scope}: {e:#}"))
                .collect();
            Err(format!(
                "all {} credential probes failed: {}",
                self.failed.len(),
                summary.join("; ")
            ))
        } else {
            Ok(())
        }
    }
}

/// One cheap GET per distinct scope, fanned out with bounded concurrency.
pub async fn probe_scopes(ctx: &CancellationToken, adapters: &[AdapterHandle]) -> ProbeReport {
    // One representative adapter per scope.
    let mut representatives: Vec<(Scope, AdapterHandle)> = Vec::new();
    for handle in adapters {
        for scope in handle.scopes() {
            if !representatives.iter().any(|(s, _)| s == &scope) {
                representatives.push((scope, handle.clone()));
            }
        }
    }

    let results: Vec<(Scope, Result<(), anyhow::Error>)> = stream::iter(representatives)
        .map(|(scope, handle)| async move {
            let result = handle
                .base()
                .get(ctx, &scope, PROBE_QUERY, true)
                .await;
            let verdict = match result {
                Ok(_) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(diagnose_probe_error(&scope, e)),
            };
            (scope, verdict)
        })
        .buffer_unordered(PROBE_CONCURRENCY)
        .collect()
        .await;

    let mut report = ProbeReport {
        succeeded: Vec::new(),
        failed: Vec::new(),
    };
    for (scope, verdict) in results {
        match verdict {
            Ok(()) => report.succeeded.push(scope),
            Err(e) => {
                warn!(%scope, error = %format!("{e:#}"), "Credential probe failed");
                report.failed.push((scope, e));
            }
        }
    }
    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Permission probe complete"
    );
    report
}

/// Known error-body patterns map to an actionable message; the original
/// error stays reachable through the cause chain.
pub fn diagnose_probe_error(scope: &Scope, error: QueryError) -> anyhow::Error {
    let location = scope.location_part().unwrap_or("unknown").to_string();
    if error.to_string().contains("No OpenIDConnect provider found") {
        return anyhow::Error::new(error)
            .context(format!("region '{location}' is not enabled in this account"));
    }
    anyhow::Error::new(error).context(format!("credential probe failed in scope {scope}"))
}

/// Probe outcomes are expensive to produce and change slowly; one result is
/// reused for the cache window. The readiness check runs through this.
pub struct PermissionProbe {
    window: Duration,
    last: Mutex<Option<(Instant, Result<(), String>)>>,
}

impl Default for PermissionProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionProbe {
    pub fn new() -> Self {
        Self {
            window: PROBE_CACHE_WINDOW,
            last: Mutex::new(None),
        }
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    pub async fn run_cached(
        &self,
        ctx: &CancellationToken,
        adapters: Vec<AdapterHandle>,
    ) -> Result<(), String> {
        {
            let last = self.last.lock().expect("probe cache lock poisoned");
            if let Some((at, outcome)) = last.as_ref() {
                if at.elapsed() < self.window {
                    return outcome.clone();
                }
            }
        }

        let outcome = probe_scopes(ctx, &adapters).await.outcome();
        *self.last.lock().expect("probe cache lock poisoned") =
            Some((Instant::now(), outcome.clone()));
        outcome
    }
}
