use async_trait::async_trait;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::TransportError;

/// Message envelope with metadata
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub subject: String,
    pub payload: Bytes,
    /// Wall-clock receive/publish time in epoch milliseconds
    pub timestamp: u64,
    /// True when the message was replayed from the broker's retained store
    pub retained: bool,
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Subscription handle for receiving messages
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Receive next message (blocks until available)
    async fn next(&mut self) -> Result<TransportMessage, TransportError>;

    /// Unsubscribe and close
    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError>;
}

/// Transport abstraction for pub/sub messaging
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message (fire and forget, nothing kept by the broker)
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Publish a message the broker keeps as the last value for `subject`.
    /// Returns only once the broker has accepted the write.
    async fn publish_retained(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Subscribe to a subject; a trailing `>` token matches any suffix
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError>;

    /// Whether the underlying connection is currently up
    fn is_connected(&self) -> bool {
        true
    }

    /// Flush pending writes and release the connection
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
