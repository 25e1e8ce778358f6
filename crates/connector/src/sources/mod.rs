//! Source adapters, one per upstream.

pub mod fr24;
pub mod nmea;
pub mod swift;
pub mod wgms;

pub use fr24::Fr24Source;
pub use nmea::NmeaSource;
pub use swift::SwiftSource;
pub use wgms::WgmsSource;

use relay_metadata::{SourceConfig, SourceKind};

use crate::error::SourceError;
use crate::http::{build_client, build_session_client, REQUEST_TIMEOUT};
use crate::traits::{KeyResolver, Source};

/// Build the adapter a source configuration describes, resolving any
/// credentials it references.
pub fn build_source(
    config: &SourceConfig,
    resolver: &dyn KeyResolver,
) -> Result<Box<dyn Source>, SourceError> {
    let name = config.name.clone();
    let source: Box<dyn Source> = match &config.kind {
        SourceKind::Fr24(c) => Box::new(Fr24Source::new(name, build_client(REQUEST_TIMEOUT)?, c)),
        SourceKind::Swift(c) => Box::new(SwiftSource::new(name, build_client(REQUEST_TIMEOUT)?, c)),
        SourceKind::Nmea(c) => Box::new(NmeaSource::new(name, build_client(REQUEST_TIMEOUT)?, c)),
        SourceKind::Wgms(c) => {
            let login = resolver
                .resolve_one(&c.credentials.login)
                .map_err(|e| SourceError::Config(format!("{}: login: {}", config.name, e)))?;
            let password = resolver
                .resolve_one(&c.credentials.password)
                .map_err(|e| SourceError::Config(format!("{}: password: {}", config.name, e)))?;
            Box::new(WgmsSource::new(
                name,
                build_session_client(REQUEST_TIMEOUT)?,
                c,
                login,
                password,
            ))
        }
    };
    Ok(source)
}
