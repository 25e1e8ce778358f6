use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Default forced-refresh window
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(15 * 60);

struct DedupEntry<P> {
    last_payload: P,
    last_write: Instant,
}

/// Per-topic suppression of repeated payloads.
///
/// A write is new when the topic has never been written, the payload differs
/// from the last one written, or the last write is at least `expiration` old.
/// The periodic refresh keeps retained broker state from going stale when a
/// platform stops changing.
pub struct Deduplicator<P> {
    expiration: Duration,
    entries: HashMap<String, DedupEntry<P>>,
}

impl<P: PartialEq + Clone> Deduplicator<P> {
    pub fn new() -> Self {
        Self::with_expiration(DEFAULT_EXPIRATION)
    }

    pub fn with_expiration(expiration: Duration) -> Self {
        Self {
            expiration,
            entries: HashMap::new(),
        }
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Check and record in one step: returns true and remembers `payload`
    /// when the write should go out.
    pub fn should_write(&mut self, topic: &str, payload: &P) -> bool {
        let now = Instant::now();
        if !self.is_new_at(topic, payload, now) {
            return false;
        }
        self.record_at(topic, payload.clone(), now);
        true
    }

    /// Whether a write would go out now, without remembering anything
    pub fn is_new(&self, topic: &str, payload: &P) -> bool {
        self.is_new_at(topic, payload, Instant::now())
    }

    /// Remember a write that actually went out
    pub fn record(&mut self, topic: &str, payload: P) {
        self.record_at(topic, payload, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_new_at(&self, topic: &str, payload: &P, now: Instant) -> bool {
        match self.entries.get(topic) {
            None => true,
            Some(entry) => {
                entry.last_payload != *payload
                    || now.saturating_duration_since(entry.last_write) >= self.expiration
            }
        }
    }

    fn record_at(&mut self, topic: &str, payload: P, now: Instant) {
        match self.entries.get_mut(topic) {
            Some(entry) => {
                entry.last_payload = payload;
                entry.last_write = now;
            }
            None => {
                self.entries.insert(
                    topic.to_string(),
                    DedupEntry {
                        last_payload: payload,
                        last_write: now,
                    },
                );
            }
        }
    }
}

impl<P: PartialEq + Clone> Default for Deduplicator<P> {
    fn default() -> Self {
        Self::new()
    }
}
