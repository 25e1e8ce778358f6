use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::MetadataError;

/// Default forced-refresh interval for deduplicated topics (15 minutes)
pub const DEFAULT_EXPIRATION_SECS: u64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Nats,
    Memory,
}

/// Broker credentials. Both fields are key sources (e.g. `env:RELAY_NATS_USER`),
/// resolved at startup; secrets never live in the YAML itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    pub url: Option<String>,
    /// JetStream stream holding the last retained value per subject
    /// If not set, defaults to "{ENV_NAME}_PLATFORMS"
    pub stream: Option<String>,
    /// Subject prefix prepended to every platform subject (e.g. "prod")
    pub subject_prefix: Option<String>,
    /// PEM file with the root certificate(s) the broker's TLS chain must lead to
    pub tls_ca: Option<PathBuf>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_deduplicate")]
    pub deduplicate: bool,
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,
}

fn default_deduplicate() -> bool {
    true
}

fn default_expiration_secs() -> u64 {
    DEFAULT_EXPIRATION_SECS
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            deduplicate: default_deduplicate(),
            expiration_secs: default_expiration_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub transport: TransportConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

impl Environment {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let env: Environment = serde_yaml::from_str(&content)?;
        env.validate()?;
        Ok(env)
    }

    /// Reject configurations that cannot possibly work before anything connects
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.name.trim().is_empty() {
            return Err(MetadataError::Validation("environment name is empty".to_string()));
        }
        if self.transport.transport_type == TransportType::Nats {
            let url = self.transport.url.as_deref().ok_or_else(|| {
                MetadataError::Validation("nats transport requires transport.url".to_string())
            })?;
            url::Url::parse(url).map_err(|e| {
                MetadataError::Validation(format!("invalid transport.url {}: {}", url, e))
            })?;
        }
        if self.publish.expiration_secs == 0 {
            return Err(MetadataError::Validation(
                "publish.expiration_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Stream name for retained platform state: {NAME}_PLATFORMS unless overridden
    pub fn stream_name(&self) -> String {
        self.transport.stream.clone().unwrap_or_else(|| {
            format!("{}_PLATFORMS", self.name.to_uppercase().replace(['.', ' '], "_"))
        })
    }
}
