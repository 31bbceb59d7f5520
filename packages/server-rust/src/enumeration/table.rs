//! The table of open enumeration contexts.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use wbem_core::NamespaceName;

use super::context::{
    ContextId, ContextSettings, ContextStatistics, EnumerationContext, ExpireOutcome, Lifecycle,
    PullKind,
};
use crate::service::operation::OperationError;

/// First id handed out; ids grow monotonically from here.
pub const FIRST_CONTEXT_ID: u64 = 500_000;

/// Aggregate statistics over every context the table has held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStatistics {
    pub open: usize,
    /// Open contexts with an operation in flight.
    pub processing: usize,
    /// Open contexts whose providers are done but whose cache is not drained.
    pub draining: usize,
    pub peak_open: usize,
    pub created: u64,
    pub released: u64,
    pub responses: u64,
    pub objects_returned: u64,
    pub cache_high_water: usize,
    pub total_wait: Duration,
    pub forced_replies: u64,
}

impl TableStatistics {
    fn absorb(&mut self, ctx: &ContextStatistics) {
        self.released += 1;
        self.responses += ctx.responses;
        self.objects_returned += ctx.objects_returned;
        self.cache_high_water = self.cache_high_water.max(ctx.cache_high_water);
        self.total_wait += ctx.total_wait;
        self.forced_replies += ctx.forced_replies;
    }
}

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub forced_replies: usize,
    pub timed_out: usize,
    pub released: usize,
}

/// Concurrent map from context id to context.
///
/// Each context has its own lock, so the map is only touched to insert,
/// find, and remove.
#[derive(Debug)]
pub struct EnumerationTable {
    contexts: DashMap<ContextId, Arc<EnumerationContext>>,
    next_id: AtomicU64,
    open: AtomicUsize,
    totals: Mutex<TableStatistics>,
}

impl Default for EnumerationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EnumerationTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
            next_id: AtomicU64::new(FIRST_CONTEXT_ID),
            open: AtomicUsize::new(0),
            totals: Mutex::new(TableStatistics::default()),
        }
    }

    /// Creates and registers a context.
    ///
    /// # Errors
    ///
    /// Returns `ServerLimitsExceeded` when `max_open` contexts are already open.
    pub fn create(
        &self,
        namespace: NamespaceName,
        kind: PullKind,
        host: &str,
        settings: ContextSettings,
        max_open: usize,
    ) -> Result<Arc<EnumerationContext>, OperationError> {
        let reserved = self
            .open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < max_open).then_some(open + 1)
            });
        let open = match reserved {
            Ok(previous) => previous + 1,
            Err(open) => {
                tracing::warn!(open, max_open, "enumeration context limit reached");
                return Err(OperationError::ServerLimitsExceeded {
                    message: format!("{open} enumeration contexts already open"),
                });
            }
        };

        let id = ContextId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let ctx = Arc::new(EnumerationContext::new(id, namespace, kind, host, settings));
        self.contexts.insert(id, Arc::clone(&ctx));
        {
            let mut totals = self.totals.lock();
            totals.created += 1;
            totals.peak_open = totals.peak_open.max(open);
        }
        metrics::counter!("wbem_enumeration_contexts_opened_total").increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("wbem_enumeration_contexts_open").set(open as f64);
        tracing::debug!(context = %id, ?kind, "enumeration context created");
        Ok(ctx)
    }

    /// Looks up a client-supplied context id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<Arc<EnumerationContext>> {
        let id = ContextId::parse(id)?;
        self.contexts.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes `ctx` once it is closed and its providers are done. Safe to
    /// call any number of times; returns true only for the call that removed it.
    pub fn release(&self, ctx: &EnumerationContext) -> bool {
        let Some(stats) = ctx.try_release() else {
            return false;
        };
        if self.contexts.remove(&ctx.id()).is_none() {
            return false;
        }
        let open = self.open.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        self.totals.lock().absorb(&stats);
        metrics::counter!("wbem_enumeration_contexts_released_total").increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("wbem_enumeration_contexts_open").set(open as f64);
        tracing::debug!(context = %ctx.id(), objects = stats.objects_returned, "enumeration context released");
        true
    }

    /// Runs the timeout sweep over every context: answers overdue stashed
    /// requests, closes idle contexts, and releases finished ones.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let snapshot: Vec<Arc<EnumerationContext>> =
            self.contexts.iter().map(|e| Arc::clone(e.value())).collect();
        let mut report = SweepReport {
            examined: snapshot.len(),
            ..SweepReport::default()
        };
        for ctx in snapshot {
            match ctx.expire(now) {
                ExpireOutcome::ForcedReply(ready) => {
                    ready.send();
                    report.forced_replies += 1;
                }
                ExpireOutcome::TimedOut => report.timed_out += 1,
                ExpireOutcome::ProvidersAbandoned | ExpireOutcome::Untouched => {}
            }
            if self.release(&ctx) {
                report.released += 1;
            }
        }
        if report.forced_replies + report.timed_out + report.released > 0 {
            tracing::debug!(?report, "enumeration sweep");
        }
        report
    }

    /// Closes every context for shutdown, failing stashed requests.
    pub fn remove_all(&self) -> usize {
        let snapshot: Vec<Arc<EnumerationContext>> =
            self.contexts.iter().map(|e| Arc::clone(e.value())).collect();
        let mut removed = 0;
        for ctx in snapshot {
            if let Some(ready) = ctx.shut_down() {
                ready.send();
            }
            if self.release(&ctx) {
                removed += 1;
            }
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    #[must_use]
    pub fn statistics(&self) -> TableStatistics {
        let mut stats = *self.totals.lock();
        stats.open = self.open.load(Ordering::Acquire);
        for entry in &self.contexts {
            match entry.value().lifecycle() {
                Lifecycle::Active { processing: true } => stats.processing += 1,
                Lifecycle::Draining => stats.draining += 1,
                _ => {}
            }
        }
        stats
    }
}
