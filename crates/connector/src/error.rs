use thiserror::Error;

use relay_middleware::TransportError;

/// Failure talking to a remote HTTP source
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Failure of one polling cycle of a source adapter
#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl SourceError {
    /// Recoverable errors fail the current cycle only; the next cycle retries.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SourceError::Fatal(_) | SourceError::Config(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Fetch(FetchError::Http(e))
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("missing key: {0}")]
    MissingKey(String),
}

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
