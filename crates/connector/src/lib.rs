//! relay-connector-lib: Polling, normalization and retained publishing of
//! platform telemetry.
//!
//! Sources fetch upstream data (JSON feeds, CSV exports, HTTP-tailed NMEA
//! logs) and turn it into normalized records. The [`Runner`] drives a source
//! at a fixed interval and hands records to the [`Publisher`], which
//! suppresses unchanged repeats and writes the rest to the transport as
//! retained messages.

pub mod dedup;
pub mod error;
pub mod http;
pub mod logger;
pub mod metrics;
pub mod publisher;
pub mod record;
pub mod resolver;
pub mod runner;
pub mod server;
pub mod sources;
pub mod tail;
pub mod traits;

pub use dedup::{Deduplicator, DEFAULT_EXPIRATION};
pub use error::{FetchError, LoggerError, PublishError, ResolverError, SourceError};
pub use logger::run_logger;
pub use publisher::{PublishOutcome, Publisher};
pub use record::{Emission, FieldValue, MeasurementKind, NormalizedRecord, Topic};
pub use resolver::EnvResolver;
pub use runner::{pacing_delay, CycleOutcome, Runner};
pub use server::{create_router, run_server, ServerState};
pub use sources::build_source;
pub use tail::{HttpRangeSource, LineSplitter, RangeResponse, RangeSource, RangeTailer};
pub use traits::{KeyResolver, Source};
