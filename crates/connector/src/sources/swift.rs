//! SWIFT drifting buoys from the APL buoy server's JSON track export.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use relay_metadata::SwiftConfig;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::http::status_error;
use crate::record::{Emission, MeasurementKind, NormalizedRecord, Topic};
use crate::traits::Source;

#[derive(Debug, Deserialize)]
struct TrackResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    buoys: Vec<TrackBuoy>,
}

#[derive(Debug, Deserialize)]
struct TrackBuoy {
    name: String,
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

/// One buoy sample with nulls dropped and the timestamp parsed
#[derive(Debug, Clone, PartialEq)]
pub struct BuoySample {
    pub time: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl BuoySample {
    fn number(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Accepts RFC 3339 and naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` (taken as UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_sample(mut raw: Map<String, Value>) -> Option<BuoySample> {
    let time = raw
        .remove("timestamp")
        .as_ref()
        .and_then(Value::as_str)
        .and_then(parse_timestamp)?;
    raw.retain(|_, v| !v.is_null());
    Some(BuoySample { time, fields: raw })
}

/// Latest sample of `buoy` in a track export body
pub fn latest_sample(body: &str, buoy: &str) -> Result<Option<BuoySample>, SourceError> {
    let response: TrackResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::Malformed(format!("track export for {}: {}", buoy, e)))?;
    if !response.success {
        return Err(SourceError::Malformed(format!(
            "buoy server reported failure for {}",
            buoy
        )));
    }

    let mut matching = response.buoys.into_iter().filter(|b| b.name == buoy);
    let (Some(found), None) = (matching.next(), matching.next()) else {
        info!(buoy = %buoy, "Could not uniquely identify buoy");
        return Ok(None);
    };

    let samples: Vec<BuoySample> = found.data.into_iter().filter_map(parse_sample).collect();
    Ok(samples.into_iter().max_by_key(|s| s.time))
}

/// Topics published for one sample, each only when its fields are present
pub fn emissions_for(platform_id: &str, sample: &BuoySample) -> Vec<Emission> {
    let at = || NormalizedRecord::at(sample.time);
    let mut emissions = Vec::new();

    if let (Some(lat), Some(lon)) = (sample.number("lat"), sample.number("lon")) {
        emissions.push(Emission::new(
            Topic::location(platform_id),
            at().with("lat", lat).with("lon", lon),
        ));
    }

    if let Some(mag) = sample.number("wind_speed") {
        emissions.push(Emission::new(
            Topic::new(platform_id, MeasurementKind::Wind),
            at().with("mag", mag),
        ));
    }
    if let Some(height) = sample.number("wave_height") {
        emissions.push(Emission::new(
            Topic::new(platform_id, MeasurementKind::Wave),
            at().with("height", height),
        ));
    }
    if let Some(voltage) = sample.number("voltage") {
        emissions.push(Emission::new(
            Topic::new(platform_id, MeasurementKind::System),
            at().with("voltage", voltage),
        ));
    }
    if let Some(url) = sample.text("img") {
        emissions.push(Emission::new(
            Topic::new(platform_id, MeasurementKind::Image),
            at().with("url", url),
        ));
    }
    emissions
}

pub struct SwiftSource {
    name: String,
    client: Client,
    url: String,
    buoys: Vec<String>,
    max_age: ChronoDuration,
}

impl SwiftSource {
    pub fn new(name: impl Into<String>, client: Client, config: &SwiftConfig) -> Self {
        Self {
            name: name.into(),
            client,
            url: format!("{}/kml", config.base_url.trim_end_matches('/')),
            buoys: config.buoys.clone(),
            max_age: ChronoDuration::days(i64::from(config.max_age_days)),
        }
    }

    async fn fetch_track(&self, buoy: &str) -> Result<String, SourceError> {
        let start = (Utc::now() - self.max_age)
            .naive_utc()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("action", "kml"),
                ("buoy_name", buoy),
                ("start", start.as_str()),
                ("end", ""),
                ("format", "json"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(&self.url, response.status()).into());
        }
        Ok(response.text().await?)
    }

    async fn poll_buoy(&self, buoy: &str) -> Result<Vec<Emission>, SourceError> {
        let body = self.fetch_track(buoy).await?;
        match latest_sample(&body, buoy)? {
            Some(sample) => Ok(emissions_for(buoy, &sample)),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Source for SwiftSource {
    fn name(&self) -> &str {
        &self.name
    }

    /// Buoys are fetched one by one; a failing buoy does not hold back the
    /// others, but the cycle fails when every buoy failed.
    async fn poll(&mut self) -> Result<Vec<Emission>, SourceError> {
        let mut emissions = Vec::new();
        let mut last_error = None;
        let mut failures = 0;

        for buoy in &self.buoys {
            match self.poll_buoy(buoy).await {
                Ok(found) => {
                    debug!(source = %self.name, buoy = %buoy, topics = found.len(), "Polled buoy");
                    emissions.extend(found);
                }
                Err(e) => {
                    warn!(source = %self.name, buoy = %buoy, error = %e, "Buoy poll failed");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if failures == self.buoys.len() => Err(e),
            _ => Ok(emissions),
        }
    }
}
