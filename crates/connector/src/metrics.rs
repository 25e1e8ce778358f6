//! Prometheus metrics for the relay
//!
//! Per-source counters for poll cycles and publishes, plus tailed byte volume.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_int_counter_vec, Encoder, GaugeVec, IntCounterVec, TextEncoder,
};

const LABEL_SOURCE: &str = "source";
const LABEL_OUTCOME: &str = "outcome";
const LABEL_URL: &str = "url";

/// Publish attempts by outcome (published, suppressed, failed)
static PUBLISHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_publishes_total",
        "Publish attempts by source and outcome",
        &[LABEL_SOURCE, LABEL_OUTCOME]
    )
    .expect("Failed to register publishes_total metric")
});

/// Poll cycles by outcome (published, no_data, error)
static CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_cycles_total",
        "Poll cycles by source and outcome",
        &[LABEL_SOURCE, LABEL_OUTCOME]
    )
    .expect("Failed to register cycles_total metric")
});

static LAST_CYCLE_TIMESTAMP: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "relay_last_cycle_timestamp",
        "Unix timestamp of the last completed poll cycle per source",
        &[LABEL_SOURCE]
    )
    .expect("Failed to register last_cycle_timestamp metric")
});

static TAILED_BYTES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_tailed_bytes_total",
        "New bytes read from tailed documents",
        &[LABEL_URL]
    )
    .expect("Failed to register tailed_bytes_total metric")
});

/// Outcome label of a publish attempt
#[derive(Debug, Clone, Copy)]
pub enum PublishOutcomeLabel {
    Published,
    Suppressed,
    Failed,
}

impl PublishOutcomeLabel {
    fn as_str(&self) -> &'static str {
        match self {
            PublishOutcomeLabel::Published => "published",
            PublishOutcomeLabel::Suppressed => "suppressed",
            PublishOutcomeLabel::Failed => "failed",
        }
    }
}

/// Handle for recording metrics of one source
#[derive(Clone)]
pub struct SourceMetrics {
    source: String,
}

impl SourceMetrics {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn inc_publish(&self, outcome: PublishOutcomeLabel) {
        PUBLISHES_TOTAL
            .with_label_values(&[self.source.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn inc_cycle(&self, outcome: &str) {
        CYCLES_TOTAL
            .with_label_values(&[self.source.as_str(), outcome])
            .inc();
    }

    pub fn set_last_cycle(&self, epoch_secs: f64) {
        LAST_CYCLE_TIMESTAMP
            .with_label_values(&[self.source.as_str()])
            .set(epoch_secs);
    }
}

pub fn add_tailed_bytes(url: &str, bytes: usize) {
    TAILED_BYTES_TOTAL
        .with_label_values(&[url])
        .inc_by(bytes as u64);
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
