use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::select;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::error::SourceError;
use crate::metrics::SourceMetrics;
use crate::publisher::{PublishOutcome, Publisher};
use crate::traits::Source;

/// Result of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The source produced records; counts per publish result
    Published {
        published: usize,
        suppressed: usize,
        failed: usize,
    },
    /// The source had nothing to report
    NoData,
}

/// Time left in the current interval after a cycle took `elapsed`.
/// Zero when the cycle overran the interval.
pub fn pacing_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Drives one source: poll, publish every record retained, wait out the
/// interval, repeat until shutdown.
pub struct Runner<S: Source> {
    source: S,
    publisher: Publisher,
    interval: Duration,
    metrics: SourceMetrics,
}

impl<S: Source> Runner<S> {
    pub fn new(source: S, publisher: Publisher, interval: Duration) -> Self {
        let metrics = SourceMetrics::new(source.name());
        Self {
            source,
            publisher,
            interval,
            metrics,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// One fetch-normalize-publish pass. Publish failures are logged and
    /// counted; the remaining records of the cycle are still attempted.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, SourceError> {
        let emissions = self.source.poll().await?;
        if emissions.is_empty() {
            return Ok(CycleOutcome::NoData);
        }

        let (mut published, mut suppressed, mut failed) = (0, 0, 0);
        for emission in &emissions {
            match self
                .publisher
                .publish(&emission.topic, &emission.record, true)
                .await
            {
                Ok(PublishOutcome::Published) => published += 1,
                Ok(PublishOutcome::Suppressed) => suppressed += 1,
                Err(e) => {
                    warn!(source = %self.source.name(), topic = %emission.topic, error = %e, "Dropping record");
                    failed += 1;
                }
            }
        }

        Ok(CycleOutcome::Published {
            published,
            suppressed,
            failed,
        })
    }

    /// Poll until `shutdown` flips to true. Recoverable errors only fail the
    /// current cycle; a fatal one ends the loop.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SourceError> {
        let name = self.source.name().to_string();
        info!(source = %name, interval_secs = self.interval.as_secs(), "Starting source loop");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            match self.run_cycle().await {
                Ok(CycleOutcome::NoData) => {
                    debug!(source = %name, "No data this cycle");
                    self.metrics.inc_cycle("no_data");
                }
                Ok(CycleOutcome::Published {
                    published,
                    suppressed,
                    failed,
                }) => {
                    info!(source = %name, published, suppressed, failed, "Cycle complete");
                    self.metrics.inc_cycle("published");
                }
                Err(e) if e.is_recoverable() => {
                    warn!(source = %name, error = %e, "Cycle failed, retrying next interval");
                    self.metrics.inc_cycle("error");
                }
                Err(e) => {
                    error!(source = %name, error = %e, "Unrecoverable source error");
                    self.metrics.inc_cycle("error");
                    return Err(e);
                }
            }
            self.metrics.set_last_cycle(epoch_secs());

            let pause = pacing_delay(self.interval, started.elapsed());
            select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = sleep(pause) => {}
            }
        }

        info!(source = %name, "Source loop stopped");
        Ok(())
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
