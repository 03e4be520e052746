//! Change notifications after successful create/update/delete.

use crate::error::ShelfError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// `{"method": "create"|"update", "payload": ...}` or `{"method": "delete", "id": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Change {
    Create { payload: Value },
    Update { payload: Value },
    Delete { id: Value },
}

impl Change {
    pub fn method(&self) -> &'static str {
        match self {
            Change::Create { .. } => "create",
            Change::Update { .. } => "update",
            Change::Delete { .. } => "delete",
        }
    }
}

/// Fire-and-forget hook. The mutation is already committed; errors are logged by the caller, never propagated.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, channel: &str, change: &Change) -> Result<(), ShelfError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn broadcast(&self, _channel: &str, _change: &Change) -> Result<(), ShelfError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    /// Schema name.
    pub channel: String,
    pub change: Change,
}

/// Fans changes out to in-process subscribers.
#[derive(Clone, Debug)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        ChannelBroadcaster { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn broadcast(&self, channel: &str, change: &Change) -> Result<(), ShelfError> {
        let event = ChangeEvent {
            channel: channel.to_string(),
            change: change.clone(),
        };
        match self.tx.send(event) {
            Ok(receivers) => tracing::trace!(channel, method = change.method(), receivers, "change broadcast"),
            Err(_) => tracing::trace!(channel, method = change.method(), "change broadcast without subscribers"),
        }
        Ok(())
    }
}
