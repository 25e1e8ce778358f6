//! Source definitions: which remote feeds to poll and which platforms they carry

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::MetadataError;

/// Default polling interval for a source
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// Public FR24 zone feed covering the EUREC4A operations area
pub const DEFAULT_FR24_URL: &str = "https://data-live.flightradar24.com/zones/fcgi/feed.js?bounds=15.73,12.90,-64.55,-49.82&faa=1&satellite=1&mlat=1&flarm=1&adsb=1&gnd=1&air=1&vehicles=1&estimated=1&maxage=14400&gliders=1&stats=1&ems=1";

pub const DEFAULT_SWIFT_URL: &str = "http://swiftserver.apl.washington.edu";

pub const DEFAULT_WGMS_URL: &str = "https://apl-uw.wgms.com";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedAircraft {
    /// Registration or callsign as it appears in the feed (e.g. "D-ADLR")
    pub callsign: String,
    pub platform_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fr24Config {
    #[serde(default = "default_fr24_url")]
    pub url: String,
    pub aircraft: Vec<TrackedAircraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwiftConfig {
    #[serde(default = "default_swift_url")]
    pub base_url: String,
    pub buoys: Vec<String>,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WgmsCredentials {
    /// Key source for the login name (e.g. `env:WGMS_LOGIN`)
    pub login: String,
    /// Key source for the password (e.g. `env:WGMS_PASSWORD`)
    pub password: String,
    pub org: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WgmsVehicle {
    pub platform_id: String,
    /// View id of the exported "VehicleParsedOutput" records for this vehicle
    pub record_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WgmsConfig {
    #[serde(default = "default_wgms_url")]
    pub base_url: String,
    pub credentials: WgmsCredentials,
    #[serde(default = "default_entity_type")]
    pub entity_type: u32,
    pub vehicles: Vec<WgmsVehicle>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NmeaAsset {
    pub asset: String,
    pub platform_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmeaConfig {
    /// Document URL; `{asset}` is replaced by the asset name
    pub url_template: String,
    pub assets: Vec<NmeaAsset>,
    #[serde(default = "default_throttle_secs")]
    pub throttle_secs: u64,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl NmeaConfig {
    pub fn url_for(&self, asset: &str) -> String {
        self.url_template.replace("{asset}", asset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    Fr24(Fr24Config),
    Swift(SwiftConfig),
    Wgms(WgmsConfig),
    Nmea(NmeaConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub sources: Vec<SourceConfig>,
}

fn default_fr24_url() -> String {
    DEFAULT_FR24_URL.to_string()
}

fn default_swift_url() -> String {
    DEFAULT_SWIFT_URL.to_string()
}

fn default_wgms_url() -> String {
    DEFAULT_WGMS_URL.to_string()
}

fn default_max_age_days() -> u32 {
    10
}

fn default_entity_type() -> u32 {
    42
}

fn default_throttle_secs() -> u64 {
    5
}

fn default_delimiter() -> String {
    "\n".to_string()
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

/// Strip everything that would break a single NATS subject token.
/// `/` becomes `-`; token separators, wildcards and whitespace are dropped.
pub fn sanitize_subject_token(raw: &str) -> String {
    raw.chars()
        .filter_map(|c| match c {
            '/' => Some('-'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}

fn check_url(source: &str, url: &str) -> Result<(), MetadataError> {
    url::Url::parse(url)
        .map(|_| ())
        .map_err(|e| MetadataError::Validation(format!("source {}: invalid url {}: {}", source, url, e)))
}

impl SourcesConfig {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let config: SourcesConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.sources.is_empty() {
            return Err(MetadataError::Validation("no sources configured".to_string()));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(MetadataError::Validation("source name is empty".to_string()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(MetadataError::Validation(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
            if source.interval_secs == 0 {
                return Err(MetadataError::Validation(format!(
                    "source {}: interval_secs must be positive",
                    source.name
                )));
            }
            source.kind.validate(&source.name)?;
        }
        self.check_platform_tokens()
    }

    /// Distinct platform ids must render to distinct subject tokens, or their
    /// retained values would overwrite each other.
    fn check_platform_tokens(&self) -> Result<(), MetadataError> {
        let mut tokens: HashMap<String, &str> = HashMap::new();
        for source in &self.sources {
            for id in source.kind.platform_ids() {
                let token = sanitize_subject_token(id);
                if token.is_empty() {
                    return Err(MetadataError::Validation(format!(
                        "source {}: platform id {:?} has no usable subject characters",
                        source.name, id
                    )));
                }
                let first = *tokens.entry(token.clone()).or_insert(id);
                if first != id {
                    return Err(MetadataError::Validation(format!(
                        "source {}: platform ids {:?} and {:?} share subject token {}",
                        source.name, first, id, token
                    )));
                }
            }
        }
        Ok(())
    }
}

impl SourceKind {
    /// Platform ids this source publishes under
    pub fn platform_ids(&self) -> Vec<&str> {
        match self {
            SourceKind::Fr24(c) => c.aircraft.iter().map(|a| a.platform_id.as_str()).collect(),
            SourceKind::Swift(c) => c.buoys.iter().map(String::as_str).collect(),
            SourceKind::Wgms(c) => c.vehicles.iter().map(|v| v.platform_id.as_str()).collect(),
            SourceKind::Nmea(c) => c.assets.iter().map(|a| a.platform_id.as_str()).collect(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), MetadataError> {
        match self {
            SourceKind::Fr24(c) => {
                check_url(name, &c.url)?;
                if c.aircraft.is_empty() {
                    return Err(MetadataError::Validation(format!("source {}: no aircraft", name)));
                }
            }
            SourceKind::Swift(c) => {
                check_url(name, &c.base_url)?;
                if c.buoys.is_empty() {
                    return Err(MetadataError::Validation(format!("source {}: no buoys", name)));
                }
            }
            SourceKind::Wgms(c) => {
                check_url(name, &c.base_url)?;
                if c.vehicles.is_empty() {
                    return Err(MetadataError::Validation(format!("source {}: no vehicles", name)));
                }
            }
            SourceKind::Nmea(c) => {
                if c.assets.is_empty() {
                    return Err(MetadataError::Validation(format!("source {}: no assets", name)));
                }
                if c.assets.len() > 1 && !c.url_template.contains("{asset}") {
                    return Err(MetadataError::Validation(format!(
                        "source {}: url_template needs an {{asset}} placeholder for several assets",
                        name
                    )));
                }
                if c.delimiter.is_empty() {
                    return Err(MetadataError::Validation(format!(
                        "source {}: delimiter is empty",
                        name
                    )));
                }
                for asset in &c.assets {
                    check_url(name, &c.url_for(&asset.asset))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
sources:
  - name: halo
    type: fr24
    aircraft:
      - callsign: D-ADLR
        platform_id: HALO
  - name: swift
    type: swift
    interval_secs: 60
    buoys:
      - SWIFT 16
      - SWIFT 17
  - name: gliders
    type: wgms
    credentials:
      login: env:WGMS_LOGIN
      password: env:WGMS_PASSWORD
      org: APL-UW
    vehicles:
      - platform_id: SV3-245
        record_id: 74446
  - name: ship
    type: nmea
    interval_secs: 5
    url_template: https://seb.noaa.gov/pub/flight/aamps_ingest/ship/{asset}.txt
    assets:
      - asset: 33RO
        platform_id: RHB
"#;

    #[test]
    fn test_load_sources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE).unwrap();

        let config = SourcesConfig::load(file.path()).unwrap();
        assert_eq!(config.sources.len(), 4);

        let halo = &config.sources[0];
        assert_eq!(halo.interval_secs, DEFAULT_INTERVAL_SECS);
        match &halo.kind {
            SourceKind::Fr24(c) => {
                assert_eq!(c.url, DEFAULT_FR24_URL);
                assert_eq!(c.aircraft[0].platform_id, "HALO");
            }
            other => panic!("expected fr24, got {:?}", other),
        }

        match &config.sources[1].kind {
            SourceKind::Swift(c) => {
                assert_eq!(c.buoys, vec!["SWIFT 16", "SWIFT 17"]);
                assert_eq!(c.max_age_days, 10);
            }
            other => panic!("expected swift, got {:?}", other),
        }

        match &config.sources[2].kind {
            SourceKind::Wgms(c) => {
                assert_eq!(c.entity_type, 42);
                assert_eq!(c.vehicles[0].record_id, 74446);
            }
            other => panic!("expected wgms, got {:?}", other),
        }

        match &config.sources[3].kind {
            SourceKind::Nmea(c) => {
                assert_eq!(c.throttle_secs, 5);
                assert_eq!(c.delimiter, "\n");
                assert_eq!(
                    c.url_for("33RO"),
                    "https://seb.noaa.gov/pub/flight/aamps_ingest/ship/33RO.txt"
                );
            }
            other => panic!("expected nmea, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config: SourcesConfig = serde_yaml::from_str(
            r#"
sources:
  - name: a
    type: swift
    buoys: [SWIFT 16]
  - name: a
    type: swift
    buoys: [SWIFT 17]
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_colliding_platform_ids_rejected() {
        let config: SourcesConfig = serde_yaml::from_str(
            r#"
sources:
  - name: swift
    type: swift
    buoys: [SWIFT 16]
  - name: more-swift
    type: swift
    buoys: [SWIFT16]
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("share subject token SWIFT16"));
    }

    #[test]
    fn test_same_platform_in_two_sources_allowed() {
        let config: SourcesConfig = serde_yaml::from_str(
            r#"
sources:
  - name: halo
    type: fr24
    aircraft:
      - callsign: D-ADLR
        platform_id: HALO
  - name: halo-backup
    type: fr24
    aircraft:
      - callsign: DLR1
        platform_id: HALO
"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_platform_id_without_subject_characters_rejected() {
        let config: SourcesConfig = serde_yaml::from_str(
            r#"
sources:
  - name: swift
    type: swift
    buoys: ["..."]
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sanitize_subject_token() {
        assert_eq!(sanitize_subject_token("SWIFT 16"), "SWIFT16");
        assert_eq!(sanitize_subject_token("A/B.C*D>"), "A-BCD");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config: SourcesConfig = serde_yaml::from_str(
            r#"
sources:
  - name: a
    type: swift
    interval_secs: 0
    buoys: [SWIFT 16]
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nmea_template_requires_placeholder() {
        let config: SourcesConfig = serde_yaml::from_str(
            r#"
sources:
  - name: ships
    type: nmea
    url_template: https://example.org/track.txt
    assets:
      - asset: A
        platform_id: PA
      - asset: B
        platform_id: PB
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config: SourcesConfig = serde_yaml::from_str(
            r#"
sources:
  - name: halo
    type: fr24
    url: not a url
    aircraft:
      - callsign: D-ADLR
        platform_id: HALO
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(MetadataError::Validation(_))));
    }
}
