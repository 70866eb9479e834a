//! Integration tests for the engine: registry invariants, scope routing,
//! stream concatenation, the bus serve loop and the health/heartbeat surface.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Map;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use farsight_adapter::{Adapter, AdapterHandle, AdapterMetadata, ListableAdapter};
use farsight_common::{ErrorKind, Item, Method, Query, QueryError, Scope};
use farsight_engine::{
    BusClient, Engine, MemoryBus, WireRequest, WireResponse,
};

// ---------------------------------------------------------------------------
// Stub adapter
// ---------------------------------------------------------------------------

struct StubAdapter {
    item_type: String,
    scope: Scope,
    uniques: Vec<&'static str>,
    calls: Arc<AtomicU32>,
}

impl StubAdapter {
    fn handle(item_type: &str, scope: Scope, uniques: Vec<&'static str>) -> AdapterHandle {
        AdapterHandle::listable(Arc::new(Self {
            item_type: item_type.to_string(),
            scope,
            uniques,
            calls: Arc::new(AtomicU32::new(0)),
        }))
    }

    fn counted(
        item_type: &str,
        scope: Scope,
        uniques: Vec<&'static str>,
    ) -> (AdapterHandle, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let handle = AdapterHandle::listable(Arc::new(Self {
            item_type: item_type.to_string(),
            scope,
            uniques,
            calls: calls.clone(),
        }));
        (handle, calls)
    }

    fn item(&self, unique: &str) -> Item {
        Item::new(
            self.item_type.clone(),
            self.scope.clone(),
            "id",
            &[unique],
            Map::new(),
        )
        .expect("stub item")
    }
}

#[async_trait]
impl Adapter for StubAdapter {
    fn item_type(&self) -> &str {
        &self.item_type
    }

    fn scopes(&self) -> Vec<Scope> {
        vec![self.scope.clone()]
    }

    fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata {
            supported_methods: vec![Method::Get, Method::List],
            category: "test".to_string(),
            ..AdapterMetadata::default()
        }
    }

    async fn get(
        &self,
        _ctx: &CancellationToken,
        scope: &Scope,
        query: &str,
        _ignore_cache: bool,
    ) -> Result<Item, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if scope != &self.scope {
            return Err(QueryError::no_scope(scope, "wrong scope"));
        }
        self.uniques
            .iter()
            .find(|u| **u == query)
            .map(|u| self.item(u))
            .ok_or_else(|| QueryError::not_found(format!("{query} not found")).in_scope(scope))
    }
}

#[async_trait]
impl ListableAdapter for StubAdapter {
    async fn list(
        &self,
        _ctx: &CancellationToken,
        scope: &Scope,
        _ignore_cache: bool,
    ) -> Result<Vec<Item>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if scope != &self.scope {
            return Err(QueryError::no_scope(scope, "wrong scope"));
        }
        Ok(self.uniques.iter().map(|u| self.item(u)).collect())
    }
}

fn engine() -> Engine {
    Engine::new(
        "farsight-test",
        "discovery",
        Arc::new(MemoryBus::new()),
        Duration::from_millis(50),
    )
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[test]
fn overlapping_registration_is_rejected_atomically() {
    let engine = engine();
    let scope = Scope::account("acct");

    engine
        .add_adapters(vec![StubAdapter::handle("widget", scope.clone(), vec!["a"])])
        .unwrap();

    let err = engine
        .add_adapters(vec![
            StubAdapter::handle("gadget", scope.clone(), vec!["b"]),
            StubAdapter::handle("widget", scope.clone(), vec!["c"]),
        ])
        .unwrap_err();
    assert!(err.to_string().contains("overlapping scopes"));

    // The whole set was rejected: the non-conflicting gadget is absent too.
    assert_eq!(engine.adapter_count(), 1);
}

#[test]
fn clear_then_reregister_succeeds() {
    let engine = engine();
    let scope = Scope::account("acct");
    let build = || vec![StubAdapter::handle("widget", scope.clone(), vec!["a"])];

    engine.add_adapters(build()).unwrap();
    engine.clear_adapters();
    engine.add_adapters(build()).unwrap();
    assert_eq!(engine.adapter_count(), 1);
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_routes_to_the_matching_adapter() {
    let engine = engine();
    let scope = Scope::account("acct");
    engine
        .add_adapters(vec![StubAdapter::handle("widget", scope.clone(), vec!["a"])])
        .unwrap();

    let ctx = CancellationToken::new();
    let item = engine
        .get(&ctx, &Query::get("widget", scope, "a"))
        .await
        .unwrap();
    assert_eq!(item.unique_attribute_value().unwrap(), "a");
}

#[tokio::test]
async fn unserved_scope_is_noscope_without_touching_adapters() {
    let engine = engine();
    let scope = Scope::account("acct");
    let (handle, calls) = StubAdapter::counted("widget", scope, vec!["a"]);
    engine.add_adapters(vec![handle]).unwrap();

    let ctx = CancellationToken::new();
    let err = engine
        .get(&ctx, &Query::get("widget", Scope::account("other"), "a"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoScope);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn list_concatenates_adapters_in_registration_order() {
    let engine = engine();
    // Same type in two scopes is legal; LIST on one scope hits one adapter.
    // Two different types in one scope: LIST by type routes to its adapter.
    let scope = Scope::account("acct");
    engine
        .add_adapters(vec![
            StubAdapter::handle("widget", scope.clone(), vec!["a", "b"]),
            StubAdapter::handle("widget", Scope::account("acct2"), vec!["z"]),
        ])
        .unwrap();

    let ctx = CancellationToken::new();
    let (items, errors) = engine
        .execute_collect(&ctx, &Query::list("widget", scope))
        .await;
    assert!(errors.is_empty());
    let uniques: Vec<String> = items
        .iter()
        .map(|i| i.unique_attribute_value().unwrap())
        .collect();
    assert_eq!(uniques, vec!["a", "b"]);
}

#[tokio::test]
async fn uniqueness_holds_within_a_list_result() {
    let engine = engine();
    let scope = Scope::account("acct");
    engine
        .add_adapters(vec![StubAdapter::handle(
            "widget",
            scope.clone(),
            vec!["a", "b", "c"],
        )])
        .unwrap();

    let ctx = CancellationToken::new();
    let (items, _) = engine
        .execute_collect(&ctx, &Query::list("widget", scope))
        .await;
    let mut uniques: Vec<String> = items
        .iter()
        .map(|i| i.unique_attribute_value().unwrap())
        .collect();
    let before = uniques.len();
    uniques.sort();
    uniques.dedup();
    assert_eq!(uniques.len(), before);
}

// ---------------------------------------------------------------------------
// Bus serve loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queries_over_the_bus_stream_items_then_done() {
    let bus = Arc::new(MemoryBus::new());
    let engine = Engine::new("farsight-test", "discovery", bus.clone(), Duration::from_secs(30));
    let scope = Scope::account("acct");
    engine
        .add_adapters(vec![StubAdapter::handle("widget", scope.clone(), vec!["a", "b"])])
        .unwrap();

    let ctx = CancellationToken::new();
    engine.start(&ctx).await.unwrap();

    let request_id = Uuid::new_v4();
    let mut responses = bus
        .subscribe(&format!("discovery.response.{request_id}"))
        .await
        .unwrap();

    let request = WireRequest {
        request_id,
        query: Query::list("widget", scope),
    };
    bus.publish(
        "discovery.query",
        Bytes::from(serde_json::to_vec(&request).unwrap()),
    )
    .await
    .unwrap();

    let mut items = 0;
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), responses.recv())
            .await
            .expect("response before timeout")
            .expect("stream open");
        match serde_json::from_slice::<WireResponse>(&message.payload).unwrap() {
            WireResponse::Item { .. } => items += 1,
            WireResponse::Error { error, .. } => panic!("unexpected error: {error}"),
            WireResponse::Done { .. } => break,
        }
    }
    assert_eq!(items, 2);

    engine.stop().await;
}

// ---------------------------------------------------------------------------
// Health & heartbeats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn latched_init_error_reaches_healthz_and_heartbeats() {
    use tower::ServiceExt;

    let bus = Arc::new(MemoryBus::new());
    let engine = Engine::new("farsight-test", "discovery", bus.clone(), Duration::from_secs(30));
    engine.set_init_error("all credential probes failed");

    // /healthz answers 500 with the latched message.
    let router = farsight_engine::health_router(engine.clone());
    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/healthz")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&body).contains("credential probes failed"));

    // The heartbeat carries the same error.
    let mut heartbeats = bus.subscribe("discovery.heartbeat").await.unwrap();
    let ctx = CancellationToken::new();
    engine.send_heartbeat(&ctx, None).await;

    let message = heartbeats.recv().await.unwrap();
    let heartbeat: farsight_engine::Heartbeat =
        serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(
        heartbeat.error.as_deref(),
        Some("all credential probes failed")
    );

    // Recovery: clearing the latch makes the pod healthy again.
    engine.clear_init_error();
    let router = farsight_engine::health_router(engine.clone());
    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/healthz")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn disconnected_bus_fails_readiness() {
    let bus = Arc::new(MemoryBus::new());
    let engine = Engine::new("farsight-test", "discovery", bus.clone(), Duration::from_secs(30));

    let ctx = CancellationToken::new();
    assert!(engine.health_status(&ctx).await.is_ok());

    bus.set_connected(false);
    let err = engine.health_status(&ctx).await.unwrap_err();
    assert!(err.contains("not connected"));
}

#[tokio::test]
async fn readiness_check_failure_surfaces() {
    let engine = engine();
    engine.set_readiness_check(Arc::new(|_ctx: CancellationToken| {
        let check: futures::future::BoxFuture<'static, Result<(), String>> =
            Box::pin(async { Err("synthetic GET failed".to_string()) });
        check
    }));

    let ctx = CancellationToken::new();
    let err = engine.health_status(&ctx).await.unwrap_err();
    assert_eq!(err, "synthetic GET failed");
}
