//! relay-metadata: Configuration types for the platform relay
//!
//! Environment (broker, publish policy) and source definitions are loaded
//! once from YAML at startup and are immutable afterwards.

pub mod environment;
pub mod error;
pub mod sources;

pub use environment::{
    Credentials, Environment, PublishConfig, TransportConfig, TransportType,
    DEFAULT_EXPIRATION_SECS,
};
pub use error::MetadataError;
pub use sources::{
    sanitize_subject_token, Fr24Config, NmeaAsset, NmeaConfig, SourceConfig, SourceKind,
    SourcesConfig, SwiftConfig, TrackedAircraft, WgmsConfig, WgmsCredentials, WgmsVehicle,
    DEFAULT_INTERVAL_SECS,
};
