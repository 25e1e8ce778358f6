use std::time::Duration;

use reqwest::Client;

use crate::error::FetchError;

/// Per-request timeout for every upstream
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Plain HTTP client for stateless upstreams
pub fn build_client(timeout: Duration) -> Result<Client, FetchError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// HTTP client that keeps cookies between requests, for session-based upstreams
pub fn build_session_client(timeout: Duration) -> Result<Client, FetchError> {
    Ok(Client::builder()
        .timeout(timeout)
        .cookie_store(true)
        .build()?)
}

/// Error for a non-success status
pub fn status_error(url: &str, status: reqwest::StatusCode) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
    }
}
