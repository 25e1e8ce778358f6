use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::transport::{now_millis, Subscription, Transport, TransportMessage};

const CHANNEL_BUFFER_SIZE: usize = 1024;

/// In-process broker. Exact subjects and `prefix.>` wildcards are supported;
/// the last retained message per subject is replayed to new subscribers.
pub struct InMemoryTransport {
    channels: DashMap<String, broadcast::Sender<TransportMessage>>,
    /// Wildcard subscriptions keyed by prefix (pattern without the trailing ">")
    wildcards: DashMap<String, broadcast::Sender<TransportMessage>>,
    retained: DashMap<String, TransportMessage>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            wildcards: DashMap::new(),
            retained: DashMap::new(),
        }
    }

    /// Last retained message for an exact subject
    pub fn retained(&self, subject: &str) -> Option<TransportMessage> {
        self.retained.get(subject).map(|m| m.value().clone())
    }

    /// Number of subjects with a retained value
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    fn get_or_create_channel(
        map: &DashMap<String, broadcast::Sender<TransportMessage>>,
        key: &str,
    ) -> broadcast::Sender<TransportMessage> {
        map.entry(key.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER_SIZE).0)
            .clone()
    }

    fn deliver(&self, msg: TransportMessage) {
        for entry in self.wildcards.iter() {
            if msg.subject.starts_with(entry.key().as_str()) {
                let _ = entry.value().send(msg.clone());
            }
        }
        if let Some(tx) = self.channels.get(&msg.subject) {
            let _ = tx.send(msg);
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    pending: VecDeque<TransportMessage>,
    rx: broadcast::Receiver<TransportMessage>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        self.rx
            .recv()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.deliver(TransportMessage {
            subject: subject.to_string(),
            payload,
            timestamp: now_millis(),
            retained: false,
        });
        Ok(())
    }

    async fn publish_retained(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        let msg = TransportMessage {
            subject: subject.to_string(),
            payload,
            timestamp: now_millis(),
            retained: false,
        };
        self.retained.insert(
            subject.to_string(),
            TransportMessage {
                retained: true,
                ..msg.clone()
            },
        );
        self.deliver(msg);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError> {
        if subject.is_empty() {
            return Err(TransportError::ValidationFailed("empty subject".to_string()));
        }

        let (rx, mut pending): (_, Vec<TransportMessage>) = match subject.strip_suffix('>') {
            Some(prefix) => {
                let rx = Self::get_or_create_channel(&self.wildcards, prefix).subscribe();
                let replay = self
                    .retained
                    .iter()
                    .filter(|e| e.key().starts_with(prefix))
                    .map(|e| e.value().clone())
                    .collect();
                (rx, replay)
            }
            None => {
                let rx = Self::get_or_create_channel(&self.channels, subject).subscribe();
                (rx, self.retained(subject).into_iter().collect())
            }
        };
        pending.sort_by(|a, b| a.subject.cmp(&b.subject));

        Ok(Box::new(InMemorySubscription {
            pending: pending.into(),
            rx,
        }))
    }
}
