//! relay-middleware: Pluggable message-bus abstractions
//!
//! Provides the Transport trait with a NATS/JetStream implementation
//! (retained last value per subject) and an in-memory implementation for testing.

pub mod error;
pub mod factory;
pub mod memory;
pub mod nats;
pub mod transport;

pub use error::TransportError;
pub use factory::{FactoryError, MiddlewareFactory};
pub use memory::InMemoryTransport;
pub use nats::{sanitize_subject_token, NatsTransport, SubjectBuilder, TransportOptions};
pub use transport::{now_millis, Subscription, Transport, TransportMessage};
