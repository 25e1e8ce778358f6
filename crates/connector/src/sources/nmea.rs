//! Ship positions from NMEA 0183 logs that are appended to over HTTP.
//!
//! Each asset's log is tailed with a [`RangeTailer`]. Sentences update a
//! running per-asset state; the state is published as a location once both
//! a date and a time of day are known.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use relay_metadata::NmeaConfig;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::record::{Emission, NormalizedRecord, Topic};
use crate::tail::{HttpRangeSource, RangeSource, RangeTailer};
use crate::traits::Source;

const KNOTS_TO_MPS: f64 = 1.852 / 3.6;

#[derive(Error, Debug, PartialEq)]
pub enum NmeaError {
    #[error("checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },
    #[error("malformed sentence: {0}")]
    Malformed(String),
}

/// The sentence types that carry state; everything else parses to `Other`
#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    /// Recommended minimum data
    Rmc {
        time: Option<NaiveTime>,
        /// `None` when the receiver flags the fix as void
        position: Option<(f64, f64)>,
        date: Option<NaiveDate>,
    },
    /// Fix data
    Gga {
        time: Option<NaiveTime>,
        position: Option<(f64, f64)>,
    },
    /// Geographic position
    Gll {
        time: Option<NaiveTime>,
        position: Option<(f64, f64)>,
    },
    /// Track made good and ground speed
    Vtg {
        true_track: Option<f64>,
        speed_knots: Option<f64>,
    },
    /// Time and date
    Zda {
        time: Option<NaiveTime>,
        date: Option<NaiveDate>,
    },
    Other(String),
}

fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Parse one sentence such as `$GPGGA,...*47`. Leading and trailing
/// whitespace is ignored; the checksum is verified when present.
pub fn parse_sentence(line: &str) -> Result<Sentence, NmeaError> {
    let line = line.trim();
    let body = line
        .strip_prefix('$')
        .or_else(|| line.strip_prefix('!'))
        .ok_or_else(|| NmeaError::Malformed(format!("missing start delimiter: {}", line)))?;

    let body = match body.rsplit_once('*') {
        Some((data, sum)) => {
            let expected = u8::from_str_radix(sum.trim(), 16)
                .map_err(|_| NmeaError::Malformed(format!("bad checksum field: {}", sum)))?;
            let computed = checksum(data);
            if expected != computed {
                return Err(NmeaError::Checksum { expected, computed });
            }
            data
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let address = fields[0];
    // Proprietary sentences ($P...) have no talker id.
    if address.len() < 5 || !address.is_ascii() || address.starts_with('P') {
        return Ok(Sentence::Other(address.to_string()));
    }
    let field = |i: usize| fields.get(i).copied().unwrap_or("");

    let sentence = match &address[2..] {
        "RMC" => Sentence::Rmc {
            time: parse_time(field(1)),
            position: if field(2) == "A" {
                parse_position(field(3), field(4), field(5), field(6))
            } else {
                None
            },
            date: parse_date(field(9)),
        },
        "GGA" => Sentence::Gga {
            time: parse_time(field(1)),
            position: parse_position(field(2), field(3), field(4), field(5)),
        },
        "GLL" => Sentence::Gll {
            time: parse_time(field(5)),
            position: parse_position(field(1), field(2), field(3), field(4)),
        },
        "VTG" => Sentence::Vtg {
            true_track: field(1).parse().ok(),
            speed_knots: field(5).parse().ok(),
        },
        "ZDA" => Sentence::Zda {
            time: parse_time(field(1)),
            date: match (field(2).parse(), field(3).parse(), field(4).parse()) {
                (Ok(day), Ok(month), Ok(year)) => NaiveDate::from_ymd_opt(year, month, day),
                _ => None,
            },
        },
        other => Sentence::Other(other.to_string()),
    };
    Ok(sentence)
}

/// `hhmmss[.sss]`
fn parse_time(raw: &str) -> Option<NaiveTime> {
    if raw.len() < 6 || !raw.is_ascii() {
        return None;
    }
    let hour = raw[0..2].parse().ok()?;
    let minute = raw[2..4].parse().ok()?;
    let second = raw[4..6].parse().ok()?;
    let nanos = match &raw[6..] {
        "" => 0,
        frac => {
            let fraction: f64 = format!("0{}", frac).parse().ok()?;
            (fraction * 1e9).round() as u32
        }
    };
    NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)
}

/// `ddmmyy`
fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%d%m%y").ok()
}

/// `(d)ddmm.mmmm` with hemisphere letter to signed decimal degrees
fn parse_coordinate(raw: &str, hemisphere: &str, degree_digits: usize) -> Option<f64> {
    if raw.len() <= degree_digits || !raw.is_ascii() {
        return None;
    }
    let degrees: f64 = raw[..degree_digits].parse().ok()?;
    let minutes: f64 = raw[degree_digits..].parse().ok()?;
    let value = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Some(value),
        "S" | "W" => Some(-value),
        _ => None,
    }
}

fn parse_position(lat: &str, ns: &str, lon: &str, ew: &str) -> Option<(f64, f64)> {
    Some((parse_coordinate(lat, ns, 2)?, parse_coordinate(lon, ew, 3)?))
}

/// Running navigation state of one asset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetState {
    pub time_of_day: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Metres per second
    pub ground_speed: Option<f64>,
    pub heading: Option<f64>,
}

impl AssetState {
    /// Fold a sentence into the state; fields the sentence lacks keep their value.
    pub fn update(&mut self, sentence: &Sentence) {
        match sentence {
            Sentence::Rmc {
                time,
                position,
                date,
            } => {
                self.set_time(*time);
                self.set_position(*position);
                self.date = (*date).or(self.date);
            }
            Sentence::Gga { time, position } | Sentence::Gll { time, position } => {
                self.set_time(*time);
                self.set_position(*position);
            }
            Sentence::Vtg {
                true_track,
                speed_knots,
            } => {
                self.heading = (*true_track).or(self.heading);
                if let Some(knots) = speed_knots {
                    self.ground_speed = Some(knots * KNOTS_TO_MPS);
                }
            }
            Sentence::Zda { time, date } => {
                self.set_time(*time);
                self.date = (*date).or(self.date);
            }
            Sentence::Other(_) => {}
        }
    }

    fn set_time(&mut self, time: Option<NaiveTime>) {
        self.time_of_day = time.or(self.time_of_day);
    }

    fn set_position(&mut self, position: Option<(f64, f64)>) {
        if let Some((lat, lon)) = position {
            self.lat = Some(lat);
            self.lon = Some(lon);
        }
    }

    /// Location record, once date and time of day are both known.
    /// NMEA times are UTC.
    pub fn to_record(&self) -> Option<NormalizedRecord> {
        let time = self.date?.and_time(self.time_of_day?).and_utc();
        Some(
            NormalizedRecord::at(time)
                .with_opt("lat", self.lat)
                .with_opt("lon", self.lon)
                .with_opt("ground_speed", self.ground_speed)
                .with_opt("heading", self.heading),
        )
    }
}

struct TailedAsset<S: RangeSource> {
    asset: String,
    platform_id: String,
    tailer: RangeTailer<S>,
    state: AssetState,
}

pub struct NmeaSource<S: RangeSource = HttpRangeSource> {
    name: String,
    assets: Vec<TailedAsset<S>>,
}

impl NmeaSource<HttpRangeSource> {
    pub fn new(name: impl Into<String>, client: Client, config: &NmeaConfig) -> Self {
        let throttle = Duration::from_secs(config.throttle_secs);
        let delimiter = config.delimiter.as_bytes().to_vec();
        let assets = config
            .assets
            .iter()
            .map(|a| {
                let source = HttpRangeSource::new(client.clone(), config.url_for(&a.asset));
                (
                    a.asset.clone(),
                    a.platform_id.clone(),
                    RangeTailer::new(source, throttle, delimiter.clone()),
                )
            })
            .collect();
        Self::from_tailers(name, assets)
    }
}

impl<S: RangeSource> NmeaSource<S> {
    /// Source over prepared tailers: `(asset, platform id, tailer)`
    pub fn from_tailers(name: impl Into<String>, tailers: Vec<(String, String, RangeTailer<S>)>) -> Self {
        Self {
            name: name.into(),
            assets: tailers
                .into_iter()
                .map(|(asset, platform_id, tailer)| TailedAsset {
                    asset,
                    platform_id,
                    tailer,
                    state: AssetState::default(),
                })
                .collect(),
        }
    }
}

impl<S: RangeSource> TailedAsset<S> {
    async fn advance(&mut self) -> Result<(), SourceError> {
        let lines = self.tailer.poll().await?;
        for line in &lines {
            let text = String::from_utf8_lossy(line);
            if text.trim().is_empty() {
                continue;
            }
            match parse_sentence(&text) {
                Ok(sentence) => self.state.update(&sentence),
                Err(e) => debug!(asset = %self.asset, error = %e, "Skipping sentence"),
            }
        }
        debug!(asset = %self.asset, lines = lines.len(), offset = self.tailer.byte_offset(), "Advanced asset log");
        Ok(())
    }
}

#[async_trait]
impl<S: RangeSource + 'static> Source for NmeaSource<S> {
    fn name(&self) -> &str {
        &self.name
    }

    /// Every asset's current state is emitted each cycle; unchanged states
    /// are suppressed downstream. The cycle fails only when every asset's
    /// fetch failed.
    async fn poll(&mut self) -> Result<Vec<Emission>, SourceError> {
        let mut emissions = Vec::new();
        let mut last_error = None;
        let mut failures = 0;

        for asset in &mut self.assets {
            if let Err(e) = asset.advance().await {
                warn!(source = %self.name, asset = %asset.asset, url = %asset.tailer.url(), error = %e, "Tail failed");
                failures += 1;
                last_error = Some(e);
            }
            match asset.state.to_record() {
                Some(record) => emissions.push(Emission::new(
                    Topic::location(asset.platform_id.as_str()),
                    record,
                )),
                None => debug!(source = %self.name, asset = %asset.asset, "No fix time yet"),
            }
        }

        match last_error {
            Some(e) if failures == self.assets.len() => Err(e),
            _ => Ok(emissions),
        }
    }
}
