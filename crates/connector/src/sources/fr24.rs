//! Aircraft positions from the Flightradar24 live feed.

use async_trait::async_trait;
use chrono::DateTime;
use relay_metadata::{Fr24Config, TrackedAircraft};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::SourceError;
use crate::http::status_error;
use crate::record::{Emission, NormalizedRecord, Topic};
use crate::traits::Source;

/// Knots to metres per second, as the feed's consumers have always used it
const KNOTS_TO_MPS: f64 = 0.5144;

/// Top-level keys of the feed that are not aircraft
const NON_AIRCRAFT_KEYS: [&str; 4] = ["full_count", "version", "stats", "selected-aircraft"];

// Positions within an aircraft entry
const IDX_LAT: usize = 1;
const IDX_LON: usize = 2;
const IDX_HEADING: usize = 3;
const IDX_PRESS_ALT: usize = 4;
const IDX_GROUND_SPEED: usize = 5;
const IDX_CALLSIGN: usize = 9;
const IDX_EPOCH: usize = 10;

pub struct Fr24Source {
    name: String,
    client: Client,
    url: String,
    aircraft: Vec<TrackedAircraft>,
}

impl Fr24Source {
    pub fn new(name: impl Into<String>, client: Client, config: &Fr24Config) -> Self {
        Self {
            name: name.into(),
            client,
            url: config.url.clone(),
            aircraft: config.aircraft.clone(),
        }
    }

    async fn fetch_feed(&self) -> Result<Map<String, Value>, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .headers(browser_headers())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(&self.url, response.status()).into());
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| SourceError::Malformed(format!("feed is not a JSON object: {}", e)))
    }
}

/// The feed rejects requests that do not look like they come from a browser
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert("dnt", HeaderValue::from_static("1"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:72.0) Gecko/20100101 Firefox/72.0",
        ),
    );
    headers
}

fn number_at(entry: &[Value], idx: usize) -> Option<f64> {
    entry.get(idx).and_then(Value::as_f64)
}

/// Location of the first aircraft entry whose callsign matches.
/// `None` when the aircraft is not in the feed or its entry lacks a timestamp.
pub fn find_aircraft(feed: &Map<String, Value>, callsign: &str) -> Option<NormalizedRecord> {
    let entry = feed
        .iter()
        .filter(|(key, _)| !NON_AIRCRAFT_KEYS.contains(&key.as_str()))
        .filter_map(|(_, value)| value.as_array())
        .find(|entry| entry.get(IDX_CALLSIGN).and_then(Value::as_str) == Some(callsign))?;

    let epoch = entry.get(IDX_EPOCH).and_then(Value::as_i64)?;
    let time = DateTime::from_timestamp(epoch, 0)?;

    Some(
        NormalizedRecord::at(time)
            .with_opt("lat", number_at(entry, IDX_LAT))
            .with_opt("lon", number_at(entry, IDX_LON))
            .with_opt("heading", number_at(entry, IDX_HEADING))
            .with_opt("press_alt", number_at(entry, IDX_PRESS_ALT))
            .with_opt(
                "ground_speed",
                number_at(entry, IDX_GROUND_SPEED).map(|kt| kt * KNOTS_TO_MPS),
            ),
    )
}

#[async_trait]
impl Source for Fr24Source {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&mut self) -> Result<Vec<Emission>, SourceError> {
        let feed = self.fetch_feed().await?;
        debug!(source = %self.name, entries = feed.len(), "Fetched feed");

        let mut emissions = Vec::new();
        for aircraft in &self.aircraft {
            match find_aircraft(&feed, &aircraft.callsign) {
                Some(record) => emissions.push(Emission::new(
                    Topic::location(aircraft.platform_id.as_str()),
                    record,
                )),
                None => info!(source = %self.name, callsign = %aircraft.callsign, "Aircraft not in feed"),
            }
        }
        Ok(emissions)
    }
}
