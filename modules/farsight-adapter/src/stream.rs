use farsight_common::{Item, QueryError};
use tokio::sync::mpsc;

/// One element of a streaming LIST/SEARCH response: items interleaved with
/// per-item errors, in the order the remote API produced them.
#[derive(Debug)]
pub enum StreamEvent {
    Item(Item),
    Error(QueryError),
}

/// Bounded sink the engine hands to streaming adapter methods. Backpressure
/// is carried by the channel; a closed receiver ends the stream early.
#[derive(Clone)]
pub struct ItemSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl ItemSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn send_item(&self, item: Item) -> Result<(), QueryError> {
        self.tx
            .send(StreamEvent::Item(item))
            .await
            .map_err(|_| QueryError::other("stream consumer went away"))
    }

    pub async fn send_error(&self, error: QueryError) -> Result<(), QueryError> {
        self.tx
            .send(StreamEvent::Error(error))
            .await
            .map_err(|_| QueryError::other("stream consumer went away"))
    }
}

/// Drain a stream receiver into (items, errors). Test and collect-mode helper.
pub async fn collect_stream(
    mut rx: mpsc::Receiver<StreamEvent>,
) -> (Vec<Item>, Vec<QueryError>) {
    let mut items = Vec::new();
    let mut errors = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Item(item) => items.push(item),
            StreamEvent::Error(error) => errors.push(error),
        }
    }
    (items, errors)
}
