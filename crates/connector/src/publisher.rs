use std::sync::Arc;
use std::time::Duration;

use relay_metadata::Environment;
use relay_middleware::{SubjectBuilder, Transport};
use tracing::{debug, info, warn};

use crate::dedup::{Deduplicator, DEFAULT_EXPIRATION};
use crate::error::PublishError;
use crate::metrics::{PublishOutcomeLabel, SourceMetrics};
use crate::record::{NormalizedRecord, Topic};

/// What happened to a publish request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Written to the transport
    Published,
    /// Identical to the last write on the topic and still fresh
    Suppressed,
}

/// Serializes normalized records and writes them to the transport, optionally
/// suppressing unchanged repeats.
///
/// A record only counts as written once the transport accepted it, so a failed
/// publish is retried on the next cycle instead of being suppressed.
pub struct Publisher {
    transport: Arc<dyn Transport>,
    subjects: SubjectBuilder,
    dedup: Option<Deduplicator<NormalizedRecord>>,
    metrics: SourceMetrics,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, subject_prefix: Option<&str>) -> Self {
        Self {
            transport,
            subjects: SubjectBuilder::new(subject_prefix),
            dedup: Some(Deduplicator::with_expiration(DEFAULT_EXPIRATION)),
            metrics: SourceMetrics::new("default"),
        }
    }

    /// Publisher configured from the environment's transport and publish sections
    pub fn from_environment(transport: Arc<dyn Transport>, env: &Environment) -> Self {
        let publisher = Self::new(transport, env.transport.subject_prefix.as_deref());
        if env.publish.deduplicate {
            publisher.with_expiration(Duration::from_secs(env.publish.expiration_secs))
        } else {
            publisher.without_dedup()
        }
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.dedup = Some(Deduplicator::with_expiration(expiration));
        self
    }

    /// Every request goes to the transport
    pub fn without_dedup(mut self) -> Self {
        self.dedup = None;
        self
    }

    /// Label metrics with the owning source's name
    pub fn with_source(mut self, source: &str) -> Self {
        self.metrics = SourceMetrics::new(source);
        self
    }

    pub fn deduplicates(&self) -> bool {
        self.dedup.is_some()
    }

    /// Publish `record` on `topic`; `retain` asks the broker to keep it as the
    /// topic's last value.
    pub async fn publish(
        &mut self,
        topic: &Topic,
        record: &NormalizedRecord,
        retain: bool,
    ) -> Result<PublishOutcome, PublishError> {
        let key = topic.to_string();

        if let Some(dedup) = &self.dedup {
            if !dedup.is_new(&key, record) {
                debug!(topic = %key, "Unchanged, not publishing");
                self.metrics.inc_publish(PublishOutcomeLabel::Suppressed);
                return Ok(PublishOutcome::Suppressed);
            }
        }

        let subject = self
            .subjects
            .platform(topic.platform_id(), topic.kind().as_str());
        let payload = record.to_payload()?;

        let result = if retain {
            self.transport.publish_retained(&subject, payload).await
        } else {
            self.transport.publish(&subject, payload).await
        };

        if let Err(e) = result {
            warn!(topic = %key, subject = %subject, error = %e, "Publish failed");
            self.metrics.inc_publish(PublishOutcomeLabel::Failed);
            return Err(e.into());
        }

        if let Some(dedup) = &mut self.dedup {
            dedup.record(&key, record.clone());
        }
        self.metrics.inc_publish(PublishOutcomeLabel::Published);
        info!(topic = %key, subject = %subject, retain, "Published");
        Ok(PublishOutcome::Published)
    }
}
