//! Tailing of remote, append-only text documents over HTTP byte ranges.
//!
//! A [`RangeTailer`] remembers how many bytes of the document it has consumed
//! and asks for the rest with `Range: bytes=<offset>-`. New bytes are split on
//! a delimiter; complete records are handed out, the trailing fragment is kept
//! until a later fetch completes it.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::error::FetchError;
use crate::metrics;

/// Answer to a ranged fetch
#[derive(Debug, Clone, PartialEq)]
pub enum RangeResponse {
    /// The whole document; the server ignored the range (200)
    Full(Bytes),
    /// The requested suffix (206)
    Partial(Bytes),
    /// No bytes beyond the offset yet (416)
    NotSatisfiable,
}

/// Something that can return a document from a byte offset onward
#[async_trait]
pub trait RangeSource: Send + Sync {
    fn url(&self) -> &str;

    async fn fetch_from(&self, offset: u64) -> Result<RangeResponse, FetchError>;
}

/// [`RangeSource`] backed by an HTTP GET with a `Range` header.
///
/// Offsets count bytes of the identity encoding, so the client must not
/// negotiate compression.
pub struct HttpRangeSource {
    client: Client,
    url: String,
}

impl HttpRangeSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_from(&self, offset: u64) -> Result<RangeResponse, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-", offset))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(RangeResponse::Full(response.bytes().await?)),
            StatusCode::PARTIAL_CONTENT => Ok(RangeResponse::Partial(response.bytes().await?)),
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(RangeResponse::NotSatisfiable),
            status => Err(FetchError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            }),
        }
    }
}

/// Splits a byte stream into delimiter-terminated records across chunk boundaries
#[derive(Debug, Clone)]
pub struct LineSplitter {
    delimiter: Vec<u8>,
    remainder: Vec<u8>,
}

impl LineSplitter {
    /// An empty delimiter falls back to `\n`.
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        let mut delimiter = delimiter.into();
        if delimiter.is_empty() {
            warn!("Empty record delimiter, using newline");
            delimiter = b"\n".to_vec();
        }
        Self {
            delimiter,
            remainder: Vec::new(),
        }
    }

    /// Append `data` and return every record it completes, delimiter stripped.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.remainder.extend_from_slice(data);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(pos) = find(&self.remainder[start..], &self.delimiter) {
            records.push(Bytes::copy_from_slice(&self.remainder[start..start + pos]));
            start += pos + self.delimiter.len();
        }
        self.remainder.drain(..start);
        records
    }

    /// Bytes received after the last complete record
    pub fn remainder(&self) -> &[u8] {
        &self.remainder
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    match needle {
        [single] => haystack.iter().position(|b| b == single),
        _ => haystack.windows(needle.len()).position(|w| w == needle),
    }
}

/// Incremental reader of one growing remote document
pub struct RangeTailer<S: RangeSource = HttpRangeSource> {
    source: S,
    splitter: LineSplitter,
    byte_offset: u64,
    last_request: Option<Instant>,
    throttle: Duration,
}

impl<S: RangeSource> RangeTailer<S> {
    pub fn new(source: S, throttle: Duration, delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            splitter: LineSplitter::new(delimiter),
            byte_offset: 0,
            last_request: None,
            throttle,
        }
    }

    /// Newline-delimited tailer
    pub fn lines(source: S, throttle: Duration) -> Self {
        Self::new(source, throttle, b"\n".to_vec())
    }

    /// Skip the first `offset` bytes of the document
    pub fn starting_at(mut self, offset: u64) -> Self {
        self.byte_offset = offset;
        self
    }

    pub fn url(&self) -> &str {
        self.source.url()
    }

    /// Bytes consumed so far
    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    pub fn remainder(&self) -> &[u8] {
        self.splitter.remainder()
    }

    async fn wait_for_throttle(&self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.throttle {
                let wait = self.throttle - elapsed;
                trace!(url = %self.url(), wait_ms = wait.as_millis() as u64, "Throttling range request");
                sleep(wait).await;
            }
        }
    }

    /// Fetch whatever was appended since the last poll and return the records
    /// it completes, in document order. May return an empty vector.
    pub async fn poll(&mut self) -> Result<Vec<Bytes>, FetchError> {
        self.wait_for_throttle().await;

        let response = self.source.fetch_from(self.byte_offset).await;
        self.last_request = Some(Instant::now());

        let new_data = match response? {
            RangeResponse::Partial(body) => body,
            RangeResponse::Full(body) => {
                if self.byte_offset > 0 {
                    warn!(
                        url = %self.url(),
                        offset = self.byte_offset,
                        "Server ignored range request, skipping already consumed bytes"
                    );
                }
                let skip = usize::try_from(self.byte_offset)
                    .unwrap_or(usize::MAX)
                    .min(body.len());
                body.slice(skip..)
            }
            RangeResponse::NotSatisfiable => {
                trace!(url = %self.url(), offset = self.byte_offset, "No new bytes");
                return Ok(Vec::new());
            }
        };

        self.byte_offset += new_data.len() as u64;
        metrics::add_tailed_bytes(self.source.url(), new_data.len());

        let records = self.splitter.push(&new_data);
        debug!(
            url = %self.url(),
            bytes = new_data.len(),
            records = records.len(),
            offset = self.byte_offset,
            "Tailed document"
        );
        Ok(records)
    }
}
