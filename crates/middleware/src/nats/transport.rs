use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream::consumer::{pull, AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::{Config, DiscardPolicy, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, Context};
use async_nats::{Client, ConnectOptions, Event};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{now_millis, Subscription, Transport, TransportMessage};

/// Connection settings for a NATS broker
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Root certificate(s) the server's TLS chain must validate against
    pub tls_ca: Option<PathBuf>,
    /// Client name shown in the server's connection list
    pub name: Option<String>,
}

impl TransportOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_tls_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_ca = Some(path.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Idle time after which the server drops a replay consumer
const REPLAY_CONSUMER_TTL: Duration = Duration::from_secs(30);

/// NATS subscription wrapper. Retained values found at subscribe time are
/// handed out before live messages.
struct NatsSubscription {
    replay: VecDeque<TransportMessage>,
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        if let Some(retained) = self.replay.pop_front() {
            return Ok(retained);
        }

        let msg = self
            .subscriber
            .next()
            .await
            .ok_or_else(|| TransportError::SubscribeFailed("subscription closed".to_string()))?;

        Ok(TransportMessage {
            subject: msg.subject.to_string(),
            payload: msg.payload,
            timestamp: now_millis(),
            retained: false,
        })
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<(), TransportError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }
}

/// NATS transport implementation.
///
/// Plain publishes use core NATS. Retained publishes go through JetStream into
/// a stream that keeps one message per subject, so the broker always holds the
/// latest state of every platform topic, across its own restarts.
/// Reconnects are handled by the client; pending core publishes are buffered
/// while disconnected and JetStream publishes fail until the ack arrives.
pub struct NatsTransport {
    client: Client,
    jetstream: Context,
    retained_stream: OnceLock<String>,
}

impl NatsTransport {
    /// Create a new NatsTransport from an existing client
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            retained_stream: OnceLock::new(),
        }
    }

    /// Connect to NATS server without authentication
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        Self::connect_with(TransportOptions::new(url)).await
    }

    /// Connect using explicit credentials / TLS trust anchor
    pub async fn connect_with(options: TransportOptions) -> Result<Self, TransportError> {
        let mut connect = ConnectOptions::new().event_callback(|event| async move {
            match event {
                Event::Connected => info!("NATS connected"),
                Event::Disconnected => warn!("NATS disconnected, client will reconnect"),
                other => warn!(event = ?other, "NATS connection event"),
            }
        });

        if let (Some(user), Some(password)) = (options.user.clone(), options.password.clone()) {
            connect = connect.user_and_password(user, password);
        }
        if let Some(ca) = options.tls_ca.clone() {
            connect = connect.add_root_certificates(ca).require_tls(true);
        }
        if let Some(name) = options.name.clone() {
            connect = connect.name(name);
        }

        let client = connect
            .connect(options.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", options.url, e)))?;

        info!(url = %options.url, "Connected to NATS");
        Ok(Self::new(client))
    }

    /// Get JetStream context for stream operations
    pub fn jetstream(&self) -> &Context {
        &self.jetstream
    }

    /// Create or get the JetStream stream that retains the last message per subject
    pub async fn ensure_retained_stream(
        &self,
        stream_name: &str,
        subjects: Vec<String>,
    ) -> Result<(), TransportError> {
        let config = Config {
            name: stream_name.to_string(),
            subjects,
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_messages_per_subject: 1,
            discard: DiscardPolicy::Old,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| TransportError::StreamFailed(format!("{}: {}", stream_name, e)))?;

        if self.retained_stream.set(stream_name.to_string()).is_err() {
            warn!(stream = %stream_name, "Retained stream already set, subscribers keep replaying the first one");
        }
        info!(stream = %stream_name, "Retained stream ready");
        Ok(())
    }

    /// Last retained value of every subject matching `subject`, read through
    /// an ephemeral consumer on the retained stream.
    async fn retained_snapshot(&self, subject: &str) -> Result<VecDeque<TransportMessage>, TransportError> {
        let mut replay = VecDeque::new();
        let Some(stream_name) = self.retained_stream.get() else {
            return Ok(replay);
        };
        let snapshot_err = |e: String| TransportError::SubscribeFailed(format!("replay {}: {}", subject, e));

        let stream = self
            .jetstream
            .get_stream(stream_name)
            .await
            .map_err(|e| snapshot_err(e.to_string()))?;
        let mut consumer = stream
            .create_consumer(pull::Config {
                filter_subject: subject.to_string(),
                deliver_policy: DeliverPolicy::LastPerSubject,
                ack_policy: AckPolicy::None,
                inactive_threshold: REPLAY_CONSUMER_TTL,
                ..Default::default()
            })
            .await
            .map_err(|e| snapshot_err(e.to_string()))?;

        let pending = consumer
            .info()
            .await
            .map_err(|e| snapshot_err(e.to_string()))?
            .num_pending as usize;
        if pending == 0 {
            return Ok(replay);
        }

        let mut batch = consumer
            .fetch()
            .max_messages(pending)
            .messages()
            .await
            .map_err(|e| snapshot_err(e.to_string()))?;
        while let Some(msg) = batch.next().await {
            let msg = msg.map_err(|e| snapshot_err(e.to_string()))?;
            replay.push_back(TransportMessage {
                subject: msg.message.subject.to_string(),
                payload: msg.message.payload.clone(),
                timestamp: now_millis(),
                retained: true,
            });
        }
        Ok(replay)
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn publish_retained(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;

        ack.await
            .map_err(|e| TransportError::PublishFailed(format!("no ack for {}: {}", subject, e)))?;
        Ok(())
    }

    /// Live delivery starts before the retained snapshot is read, so a value
    /// published in between may arrive twice but is never lost.
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        let replay = match self.retained_snapshot(subject).await {
            Ok(replay) => replay,
            Err(e) => {
                warn!(subject = %subject, error = %e, "No retained replay, live messages only");
                VecDeque::new()
            }
        };
        debug!(subject = %subject, retained = replay.len(), "Subscribed");

        Ok(Box::new(NatsSubscription { replay, subscriber }))
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == State::Connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::PublishFailed(format!("flush failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running NATS server
    // Run: docker run -p 4222:4222 nats:latest -js

    #[test]
    fn test_options_builder() {
        let options = TransportOptions::new("tls://broker:4222")
            .with_credentials("importer", "secret")
            .with_tls_ca("/etc/ca.pem")
            .with_name("relay");
        assert_eq!(options.url, "tls://broker:4222");
        assert_eq!(options.user.as_deref(), Some("importer"));
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert_eq!(options.tls_ca, Some(PathBuf::from("/etc/ca.pem")));
        assert_eq!(options.name.as_deref(), Some("relay"));
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_publish_succeeds() {
        let transport = NatsTransport::connect("nats://localhost:4222").await.unwrap();
        let result = transport.publish("test.subject", Bytes::from("hello")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires NATS server with JetStream
    async fn test_ensure_retained_stream() {
        let transport = NatsTransport::connect("nats://localhost:4222").await.unwrap();
        let result = transport
            .ensure_retained_stream("TEST_PLATFORMS", vec!["test.platform.>".to_string()])
            .await;
        assert!(result.is_ok());
    }
}
