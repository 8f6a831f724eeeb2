use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{error::StoreError, traits::PoolStore};

/// Outcome of a single sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Leases whose counter was decremented but which are still held.
    pub aged: usize,
    /// Leases that reached zero and were returned to the free state.
    pub expired: usize,
    /// Records skipped because another writer changed them mid-sweep.
    pub conflicts: usize,
}

/// Background task that ages every blocked lease once per tick and frees
/// leases whose counter reaches zero.
///
/// It is the only thing that reclaims leases a client abandons, so it runs for
/// the whole life of the process.
pub struct LeaseScheduler<P: PoolStore> {
    pool: P,
    interval: Duration,
}

impl<P: PoolStore> LeaseScheduler<P> {
    pub fn new(pool: P, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Start [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweep on a fixed interval forever. Store failures are logged and the
    /// next tick tries again.
    pub async fn run(self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Lease scheduler starting");

        loop {
            tick.tick().await;
            match self.sweep_once().await {
                Ok(report) if report.expired > 0 || report.conflicts > 0 => {
                    tracing::debug!(
                        aged = report.aged,
                        expired = report.expired,
                        conflicts = report.conflicts,
                        "Sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Lease sweep failed"),
            }
        }
    }

    /// Decrement every blocked record by one; clear those that hit zero.
    ///
    /// A blocked record already at zero is cleared as well, so a malformed
    /// record cannot stay blocked forever. Records changed by a concurrent
    /// writer since the listing are skipped until the next tick.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let entries = self.pool.list_all().await?;
        let mut report = SweepReport::default();

        for entry in entries.into_iter().filter(|e| e.record.blocked) {
            let remaining = entry.record.counter.saturating_sub(1);
            let result = if remaining == 0 {
                self.pool.clear(&entry.token, entry.revision).await
            } else {
                self.pool
                    .renew(&entry.token, remaining, entry.revision)
                    .await
            };

            match result {
                Ok(_) if remaining == 0 => {
                    tracing::info!(
                        token = %entry.token,
                        service_id = %entry.record.service_id,
                        "Lease expired, token returned to pool"
                    );
                    report.expired += 1;
                }
                Ok(_) => report.aged += 1,
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(token = %entry.token, "Record changed during sweep, skipping");
                    report.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}
