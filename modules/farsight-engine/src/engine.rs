//! The discovery engine: adapter registry, scope routing, query dispatch,
//! lifecycle and heartbeat coordination.
//!
//! Registry mutations are serialised behind one lock and atomic: a set with
//! any (type, scope) overlap is rejected whole. Query dispatch is concurrent
//! per request; the same adapter may be invoked from many tasks at once.
//! Init failures latch into the engine instead of crashing the process, so
//! probes and heartbeats keep reporting an unhealthy pod.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use farsight_adapter::{
    collect_stream, Adapter, AdapterHandle, ItemSink, ListableAdapter, SearchableAdapter,
    StreamEvent,
};
use farsight_common::{FarsightError, Item, Method, Query, QueryError, Scope};

use crate::bus::{BusClient, Heartbeat, WireRequest, WireResponse};

/// Cheap synthetic probe installed by the initialization controller;
/// failure text surfaces on `/healthz` and in heartbeats.
pub type ReadinessCheck =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

struct EngineInner {
    name: String,
    subject_prefix: String,
    bus: Arc<dyn BusClient>,
    heartbeat_interval: Duration,
    adapters: Mutex<Vec<AdapterHandle>>,
    init_error: Mutex<Option<String>>,
    readiness: Mutex<Option<ReadinessCheck>>,
    serve_token: Mutex<Option<CancellationToken>>,
    serve_handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        name: impl Into<String>,
        subject_prefix: impl Into<String>,
        bus: Arc<dyn BusClient>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                name: name.into(),
                subject_prefix: subject_prefix.into(),
                bus,
                heartbeat_interval,
                adapters: Mutex::new(Vec::new()),
                init_error: Mutex::new(None),
                readiness: Mutex::new(None),
                serve_token: Mutex::new(None),
                serve_handle: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn bus(&self) -> &Arc<dyn BusClient> {
        &self.inner.bus
    }

    // --- Registry ---

    /// Register a set of adapters atomically. Any (type, scope) pair that
    /// collides with an existing adapter (or another member of the set)
    /// rejects the whole set.
    pub fn add_adapters(&self, handles: Vec<AdapterHandle>) -> Result<(), FarsightError> {
        let mut adapters = self.adapters_lock();

        let mut occupied: HashSet<(String, Scope)> = adapters
            .iter()
            .flat_map(|a| {
                let item_type = a.item_type().to_string();
                a.scopes()
                    .into_iter()
                    .map(move |scope| (item_type.clone(), scope))
            })
            .collect();

        for handle in &handles {
            for scope in handle.scopes() {
                if !occupied.insert((handle.item_type().to_string(), scope.clone())) {
                    return Err(FarsightError::Registration(format!(
                        "adapter with type {} and overlapping scopes already exists (scope {scope})",
                        handle.item_type()
                    )));
                }
            }
        }

        info!(count = handles.len(), "Adapters registered");
        adapters.extend(handles);
        Ok(())
    }

    pub fn clear_adapters(&self) {
        let mut adapters = self.adapters_lock();
        let dropped = adapters.len();
        adapters.clear();
        debug!(dropped, "Adapter registry cleared");
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters_lock().len()
    }

    /// Snapshot of every registered adapter, for the permission probe.
    pub fn adapters(&self) -> Vec<AdapterHandle> {
        self.adapters_lock().clone()
    }

    fn adapters_lock(&self) -> std::sync::MutexGuard<'_, Vec<AdapterHandle>> {
        self.inner
            .adapters
            .lock()
            .expect("adapter registry lock poisoned")
    }

    fn matching(&self, item_type: &str, scope: &Scope) -> Vec<AdapterHandle> {
        self.adapters_lock()
            .iter()
            .filter(|a| a.item_type() == item_type && a.serves(scope))
            .cloned()
            .collect()
    }

    // --- Dispatch ---

    pub async fn get(&self, ctx: &CancellationToken, query: &Query) -> Result<Item, QueryError> {
        let matches = self.matching(&query.item_type, &query.scope);
        let adapter = matches.first().ok_or_else(|| {
            QueryError::no_scope(
                &query.scope,
                format!(
                    "no adapter serves type {} in scope {}",
                    query.item_type, query.scope
                ),
            )
        })?;
        adapter
            .base()
            .get(ctx, &query.scope, &query.query, query.ignore_cache)
            .await
    }

    /// Dispatch one query into the sink. GET forwards the single result;
    /// LIST/SEARCH concatenate the matching adapters' streams in
    /// registration order. Errors travel the same channel as items.
    pub async fn execute(&self, ctx: &CancellationToken, query: &Query, sink: &ItemSink) {
        match query.method {
            Method::Get => match self.get(ctx, query).await {
                Ok(item) => {
                    let _ = sink.send_item(item).await;
                }
                Err(e) => {
                    let _ = sink.send_error(e).await;
                }
            },
            Method::List | Method::Search => {
                let matches = self.matching(&query.item_type, &query.scope);
                if matches.is_empty() {
                    let _ = sink
                        .send_error(QueryError::no_scope(
                            &query.scope,
                            format!(
                                "no adapter serves type {} in scope {}",
                                query.item_type, query.scope
                            ),
                        ))
                        .await;
                    return;
                }

                for handle in matches {
                    let outcome = if query.method == Method::List {
                        match handle.as_listable() {
                            Some(listable) => {
                                listable
                                    .list_stream(ctx, &query.scope, query.ignore_cache, sink.clone())
                                    .await
                            }
                            None => {
                                let _ = sink
                                    .send_error(QueryError::other(format!(
                                        "adapter {} does not support LIST",
                                        handle.item_type()
                                    )))
                                    .await;
                                Ok(())
                            }
                        }
                    } else {
                        match handle.as_searchable() {
                            Some(searchable) => {
                                searchable
                                    .search_stream(
                                        ctx,
                                        &query.scope,
                                        &query.query,
                                        query.ignore_cache,
                                        sink.clone(),
                                    )
                                    .await
                            }
                            None => {
                                let _ = sink
                                    .send_error(QueryError::other(format!(
                                        "adapter {} does not support SEARCH",
                                        handle.item_type()
                                    )))
                                    .await;
                                Ok(())
                            }
                        }
                    };

                    if let Err(e) = outcome {
                        debug!(
                            item_type = %query.item_type,
                            error = %e,
                            "Adapter stream ended with error"
                        );
                    }
                }
            }
        }
    }

    /// Collect variant of [`Engine::execute`], for callers that want the
    /// whole result set at once.
    pub async fn execute_collect(
        &self,
        ctx: &CancellationToken,
        query: &Query,
    ) -> (Vec<Item>, Vec<QueryError>) {
        let (sink, rx) = ItemSink::channel(64);
        let collector = tokio::spawn(collect_stream(rx));
        self.execute(ctx, query, &sink).await;
        drop(sink);
        collector
            .await
            .unwrap_or_else(|_| (Vec::new(), Vec::new()))
    }

    // --- Lifecycle ---

    /// Subscribe to the query subject and serve until [`Engine::stop`].
    pub async fn start(&self, ctx: &CancellationToken) -> Result<(), FarsightError> {
        let subject = format!("{}.query", self.inner.subject_prefix);
        let mut rx = self.inner.bus.subscribe(&subject).await?;

        let serve_token = CancellationToken::new();
        *self
            .inner
            .serve_token
            .lock()
            .expect("serve token lock poisoned") = Some(serve_token.clone());

        let engine = self.clone();
        let request_ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            let mut requests = JoinSet::new();
            loop {
                tokio::select! {
                    _ = serve_token.cancelled() => break,
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        match serde_json::from_slice::<WireRequest>(&message.payload) {
                            Ok(request) => {
                                let engine = engine.clone();
                                // Requests inherit the outer context, not the
                                // serve token: stop() quits accepting but
                                // lets in-flight queries drain.
                                let token = request_ctx.child_token();
                                requests.spawn(async move {
                                    engine.serve_request(token, request).await;
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "Dropping undecodable query envelope");
                            }
                        }
                    }
                }
                while requests.try_join_next().is_some() {}
            }
            while requests.join_next().await.is_some() {}
            info!("Engine drained and stopped");
        });
        *self
            .inner
            .serve_handle
            .lock()
            .expect("serve handle lock poisoned") = Some(handle);

        info!(%subject, "Engine serving queries");
        Ok(())
    }

    /// Stop accepting queries, drain in-flight ones, then return.
    pub async fn stop(&self) {
        let token = self
            .inner
            .serve_token
            .lock()
            .expect("serve token lock poisoned")
            .take();
        if let Some(token) = token {
            token.cancel();
        }
        let handle = self
            .inner
            .serve_handle
            .lock()
            .expect("serve handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn serve_request(&self, ctx: CancellationToken, request: WireRequest) {
        let response_subject = format!(
            "{}.response.{}",
            self.inner.subject_prefix, request.request_id
        );
        let request_id = request.request_id;
        debug!(%request_id, query = ?request.query, "Serving query");

        let (sink, mut rx) = ItemSink::channel(64);
        let bus = self.inner.bus.clone();
        let publisher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let response = match event {
                    StreamEvent::Item(item) => WireResponse::Item { request_id, item },
                    StreamEvent::Error(error) => WireResponse::Error { request_id, error },
                };
                publish_response(&*bus, &response_subject, &response).await;
            }
            publish_response(
                &*bus,
                &response_subject,
                &WireResponse::Done { request_id },
            )
            .await;
        });

        self.execute(&ctx, &request.query, &sink).await;
        drop(sink);
        let _ = publisher.await;
    }

    // --- Health & heartbeats ---

    pub fn set_init_error(&self, error: impl Into<String>) {
        let error = error.into();
        warn!(%error, "Init error latched");
        *self
            .inner
            .init_error
            .lock()
            .expect("init error lock poisoned") = Some(error);
    }

    pub fn clear_init_error(&self) {
        *self
            .inner
            .init_error
            .lock()
            .expect("init error lock poisoned") = None;
    }

    pub fn init_error(&self) -> Option<String> {
        self.inner
            .init_error
            .lock()
            .expect("init error lock poisoned")
            .clone()
    }

    pub fn set_readiness_check(&self, check: ReadinessCheck) {
        *self
            .inner
            .readiness
            .lock()
            .expect("readiness lock poisoned") = Some(check);
    }

    /// Current health: a latched init error, a disconnected bus or a failing
    /// readiness probe all make the pod unready.
    pub async fn health_status(&self, ctx: &CancellationToken) -> Result<(), String> {
        if let Some(error) = self.init_error() {
            return Err(error);
        }
        if !self.inner.bus.is_connected() {
            return Err("message bus is not connected".to_string());
        }
        let check = self
            .inner
            .readiness
            .lock()
            .expect("readiness lock poisoned")
            .clone();
        if let Some(check) = check {
            check(ctx.clone()).await?;
        }
        Ok(())
    }

    /// Out-of-band status ping, used right after an init attempt so the
    /// orchestrator sees the new state without waiting for the next tick.
    pub async fn send_heartbeat(&self, ctx: &CancellationToken, error: Option<String>) {
        let error = match error {
            Some(error) => Some(error),
            None => self.health_status(ctx).await.err(),
        };
        let heartbeat = Heartbeat {
            source: self.inner.name.clone(),
            at: chrono::Utc::now(),
            error,
        };
        let subject = format!("{}.heartbeat", self.inner.subject_prefix);
        match serde_json::to_vec(&heartbeat) {
            Ok(payload) => {
                if let Err(e) = self.inner.bus.publish(&subject, Bytes::from(payload)).await {
                    warn!(error = %e, "Failed to publish heartbeat");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode heartbeat"),
        }
    }

    /// Fire periodic heartbeats until the context is cancelled.
    pub fn start_sending_heartbeats(&self, ctx: &CancellationToken) {
        let engine = self.clone();
        let token = ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.inner.heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                engine.send_heartbeat(&token, None).await;
            }
        });
    }
}

async fn publish_response(bus: &dyn BusClient, subject: &str, response: &WireResponse) {
    match serde_json::to_vec(response) {
        Ok(payload) => {
            if let Err(e) = bus.publish(subject, Bytes::from(payload)).await {
                warn!(error = %e, subject, "Failed to publish response");
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode response"),
    }
}
