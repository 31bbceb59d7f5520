//! Periodic timeout sweep over the enumeration table.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use super::table::EnumerationTable;
use crate::service::worker::BackgroundRunnable;

/// Tasks accepted by the sweep worker besides its periodic tick.
#[derive(Debug)]
pub enum SweepTask {
    /// Sweep immediately instead of waiting for the next tick.
    SweepNow,
    LogStatistics,
}

/// Runs [`EnumerationTable::sweep`] on every worker tick.
pub struct ContextSweeper {
    table: Arc<EnumerationTable>,
}

impl ContextSweeper {
    #[must_use]
    pub fn new(table: Arc<EnumerationTable>) -> Self {
        Self { table }
    }

    fn sweep(&self) {
        let report = self.table.sweep(Instant::now());
        metrics::counter!("wbem_enumeration_forced_replies_total")
            .increment(report.forced_replies as u64);
        metrics::counter!("wbem_enumeration_timeouts_total").increment(report.timed_out as u64);
    }
}

#[async_trait]
impl BackgroundRunnable for ContextSweeper {
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::SweepNow => self.sweep(),
            SweepTask::LogStatistics => {
                let stats = self.table.statistics();
                tracing::info!(
                    open = stats.open,
                    processing = stats.processing,
                    draining = stats.draining,
                    peak_open = stats.peak_open,
                    created = stats.created,
                    released = stats.released,
                    responses = stats.responses,
                    objects_returned = stats.objects_returned,
                    cache_high_water = stats.cache_high_water,
                    forced_replies = stats.forced_replies,
                    "enumeration statistics"
                );
            }
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        tracing::debug!(open = self.table.len(), "enumeration sweeper stopped");
    }
}
