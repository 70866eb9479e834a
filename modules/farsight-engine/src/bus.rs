//! The message-bus seam between this source and the orchestrator.
//!
//! The wire transport is configured outside the core; the engine only needs
//! publish, subscribe and a connectivity probe. [`MemoryBus`] implements the
//! same contract in-process for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use farsight_common::{FarsightError, Item, Query, QueryError};

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
}

#[async_trait]
pub trait BusClient: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), FarsightError>;

    /// Subscribe to a subject; delivery stops when the receiver is dropped.
    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<BusMessage>, FarsightError>;

    /// Used by the readiness check.
    fn is_connected(&self) -> bool;
}

// --- Wire envelopes ---

/// A query delivered by the orchestrator. Responses go out on
/// `{prefix}.response.{request_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub request_id: Uuid,
    pub query: Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireResponse {
    Item { request_id: Uuid, item: Item },
    Error { request_id: Uuid, error: QueryError },
    /// Terminates the stream for one request.
    Done { request_id: Uuid },
}

/// Periodic status ping: `error` is None while healthy, otherwise the
/// current init/readiness failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub source: String,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

// --- In-memory implementation ---

/// Broadcast-per-subject bus living in this process.
pub struct MemoryBus {
    topics: Mutex<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>,
    connected: AtomicBool,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Flip the connectivity probe, for readiness tests.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), FarsightError> {
        let subscribers = {
            let topics = self.topics.lock().expect("bus topics lock poisoned");
            topics.get(subject).cloned().unwrap_or_default()
        };
        for tx in subscribers {
            // A dropped receiver is an unsubscribed consumer, not an error.
            let _ = tx
                .send(BusMessage {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                })
                .await;
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<BusMessage>, FarsightError> {
        let (tx, rx) = mpsc::channel(64);
        self.topics
            .lock()
            .expect("bus topics lock poisoned")
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
