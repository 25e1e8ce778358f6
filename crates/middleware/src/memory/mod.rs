//! In-memory implementation for testing
pub mod transport;

pub use transport::InMemoryTransport;
