//! Lightweight health endpoint, started before init completes so
//! orchestration can observe the pod through a failed or slow start.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use farsight_common::FarsightError;

use crate::engine::Engine;

pub fn health_router(engine: Engine) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .with_state(engine)
}

async fn healthz(State(engine): State<Engine>) -> (StatusCode, String) {
    let ctx = CancellationToken::new();
    match engine.health_status(&ctx).await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error),
    }
}

/// Bind and serve `/healthz` until the process exits.
pub async fn serve_health_probes(engine: Engine, port: u16) -> Result<(), FarsightError> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FarsightError::Init(format!("cannot bind health port {port}: {e}")))?;
    info!(addr, "Health probe endpoint up");
    axum::serve(listener, health_router(engine))
        .await
        .map_err(|e| FarsightError::Init(format!("health endpoint failed: {e}")))
}
