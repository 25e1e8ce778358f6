use std::sync::Arc;

use relay_metadata::{Environment, TransportType};
use tracing::info;

use crate::memory::InMemoryTransport;
use crate::nats::{NatsTransport, SubjectBuilder, TransportOptions};
use crate::transport::Transport;

/// Error creating middleware
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("transport error: {0}")]
    Transport(#[from] crate::error::TransportError),
}

/// Factory for creating middleware instances based on environment config
pub struct MiddlewareFactory;

impl MiddlewareFactory {
    /// Create a transport based on environment configuration.
    ///
    /// For NATS this connects (with resolved `credentials` and the configured TLS
    /// trust anchor) and makes sure the retained stream covering every platform
    /// subject exists before anything is published.
    pub async fn create_transport(
        env: &Environment,
        credentials: Option<(String, String)>,
    ) -> Result<Arc<dyn Transport>, FactoryError> {
        match env.transport.transport_type {
            TransportType::Memory => Ok(Arc::new(InMemoryTransport::new())),
            TransportType::Nats => {
                let url = env.transport.url.clone().ok_or_else(|| {
                    FactoryError::ConfigError("nats transport requires transport.url".to_string())
                })?;

                let mut options = TransportOptions::new(url).with_name(format!("relay-{}", env.name));
                if let Some((user, password)) = credentials {
                    options = options.with_credentials(user, password);
                }
                if let Some(ca) = env.transport.tls_ca.clone() {
                    options = options.with_tls_ca(ca);
                }

                let transport = NatsTransport::connect_with(options).await?;

                let subjects = SubjectBuilder::new(env.transport.subject_prefix.as_deref());
                let stream = env.stream_name();
                transport
                    .ensure_retained_stream(&stream, vec![subjects.all().to_string()])
                    .await?;
                info!(stream = %stream, subjects = %subjects.all(), "NATS transport ready");

                Ok(Arc::new(transport))
            }
        }
    }
}
