//! Scheduled claim-and-dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{NotificationError, NotificationResult};
use crate::store::OutboxStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    pub batch_size: u64,
    /// Claim attempts per run when the batch comes back inconsistent
    pub claim_attempts: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            claim_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

pub struct ClaimSweep {
    store: Arc<dyn OutboxStore>,
    dispatcher: Arc<Dispatcher>,
    config: SweepConfig,
    // Held for the length of a run so cron ticks never overlap
    running: Mutex<()>,
}

impl ClaimSweep {
    pub fn new(store: Arc<dyn OutboxStore>, dispatcher: Arc<Dispatcher>, config: SweepConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
            running: Mutex::new(()),
        }
    }

    /// Claim one batch and dispatch it.
    pub async fn run_once(&self) -> NotificationResult<SweepReport> {
        let start = Instant::now();
        let attempts = self.config.claim_attempts.max(1);

        let mut attempt = 1;
        let records = loop {
            match self.store.claim_batch(self.config.batch_size).await {
                Ok(records) => break records,
                Err(NotificationError::ClaimInconsistency { expected, actual }) if attempt < attempts => {
                    warn!(attempt, expected, actual, "Claim batch inconsistent, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        if records.is_empty() {
            debug!("Outbox sweep found nothing to claim");
            return Ok(SweepReport {
                elapsed: start.elapsed(),
                ..Default::default()
            });
        }

        metrics::counter!("outbox_claimed_total").increment(records.len() as u64);

        let reports = self.dispatcher.dispatch_all(&records).await;
        let report = SweepReport {
            claimed: records.len(),
            sent: reports.iter().map(|r| r.sent()).sum(),
            failed: reports.iter().map(|r| r.failed()).sum(),
            elapsed: start.elapsed(),
        };

        info!(
            claimed = report.claimed,
            sent = report.sent,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Outbox sweep complete"
        );
        Ok(report)
    }

    /// `run_once` unless a previous run is still going. `None` when skipped.
    pub async fn try_run(&self) -> Option<NotificationResult<SweepReport>> {
        let _guard = self.running.try_lock().ok()?;
        Some(self.run_once().await)
    }

    /// Register the sweep on a cron schedule (seconds field included) and start it.
    pub async fn start(self: Arc<Self>, cron: &str) -> NotificationResult<JobScheduler> {
        let sched = JobScheduler::new().await?;

        let sweep = self.clone();
        let job = Job::new_async(cron, move |_uuid, _lock| {
            let sweep = sweep.clone();
            Box::pin(async move {
                match sweep.try_run().await {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => error!(error = %e, "Outbox sweep failed"),
                    None => debug!("Previous outbox sweep still running, skipping tick"),
                }
            })
        })?;

        sched.add(job).await?;
        sched.start().await?;

        info!(cron, batch_size = self.config.batch_size, "Outbox sweep scheduled");
        Ok(sched)
    }
}
