//! One enumeration context: the lock-protected state behind an
//! Open/Pull/Close sequence.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use wbem_core::messages::OpenOrPullResponse;
use wbem_core::{ContentKind, NamespaceName, ResponseData, StatusCode};

use crate::service::config::BrokerConfig;
use crate::service::envelope::ReplyHandle;
use crate::service::operation::{OperationError, OperationResponse, OperationResult};

// ---------------------------------------------------------------------------
// Identity and kind
// ---------------------------------------------------------------------------

/// Opaque enumeration context id, rendered as a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Parses a client-supplied context string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok().map(Self)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which Pull operation a context accepts, fixed by the Open that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullKind {
    InstancesWithPath,
    InstancePaths,
    /// Instances without paths, from `OpenQueryInstances`.
    Instances,
}

impl PullKind {
    #[must_use]
    pub fn content_kind(self) -> ContentKind {
        match self {
            Self::InstancesWithPath | Self::Instances => ContentKind::Instances,
            Self::InstancePaths => ContentKind::Paths,
        }
    }

    #[must_use]
    pub fn pull_operation(self) -> &'static str {
        match self {
            Self::InstancesWithPath => "PullInstancesWithPath",
            Self::InstancePaths => "PullInstancePaths",
            Self::Instances => "PullInstances",
        }
    }
}

// ---------------------------------------------------------------------------
// Settings, statistics, lifecycle
// ---------------------------------------------------------------------------

/// Per-context limits, captured from the configuration at Open time.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    /// Interoperation timeout; `None` means the context never idles out.
    pub operation_timeout: Option<Duration>,
    pub cache_max_size: usize,
    pub max_zero_pulls: u32,
    /// Deadline for a stashed pull.
    pub max_operation_wait: Duration,
    /// Empty forced replies before providers count as stalled.
    pub max_consecutive_waits: u32,
}

impl ContextSettings {
    #[must_use]
    pub fn from_config(config: &BrokerConfig, operation_timeout: Option<Duration>) -> Self {
        Self {
            operation_timeout,
            cache_max_size: config.response_cache_max_size.max(1),
            max_zero_pulls: config.max_consecutive_zero_pulls,
            max_operation_wait: config.pull_max_operation_wait,
            max_consecutive_waits: config.max_consecutive_waits_before_error,
        }
    }

    /// Sweeps a stalled context survives before it is failed or released.
    fn stall_limit(&self) -> u32 {
        self.max_consecutive_waits + 3
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextStatistics {
    /// Replies issued to Open and Pull requests.
    pub responses: u64,
    pub objects_returned: u64,
    pub cache_high_water: usize,
    /// Time requests spent stashed waiting for provider data.
    pub total_wait: Duration,
    pub forced_replies: u64,
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created; the Open reply has not been sent yet.
    Opening,
    Active { processing: bool },
    /// Providers are done; the client is still draining the cache.
    Draining,
    Closed,
}

/// A reply that is ready to send once the context lock is released.
#[derive(Debug)]
pub struct ReadyReply {
    pub reply: ReplyHandle,
    pub result: OperationResult,
}

impl ReadyReply {
    pub fn send(self) {
        self.reply.send(self.result);
    }
}

/// Result of asking the context to answer an Open or Pull.
#[derive(Debug)]
pub enum Respond {
    Ready(ReadyReply),
    /// Parked until enough data arrives or the sweep forces a reply.
    Stashed,
}

/// Result of folding a provider delivery into the cache.
#[derive(Debug, Default)]
pub struct FoldOutcome {
    /// A stashed request that the delivery satisfied.
    pub ready: Option<ReadyReply>,
    /// The cache is full; the delivering provider should wait for a drain.
    pub wait_for_space: bool,
}

/// What one sweep did to one context.
#[derive(Debug)]
pub enum ExpireOutcome {
    Untouched,
    /// A stashed request ran past its deadline and was answered.
    ForcedReply(ReadyReply),
    /// The interoperation timer fired on an idle context.
    TimedOut,
    /// A closed context gave up waiting for its providers.
    ProvidersAbandoned,
}

// ---------------------------------------------------------------------------
// EnumerationContext
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PendingPull {
    reply: ReplyHandle,
    max_object_count: u32,
    stashed_at: Instant,
    deadline: Instant,
}

#[derive(Debug)]
struct ContextState {
    cache: ResponseData,
    processing: bool,
    opened: bool,
    client_closed: bool,
    providers_complete: bool,
    released: bool,
    /// Interoperation deadline; only armed while idle.
    deadline: Option<Instant>,
    error: Option<OperationError>,
    pending: Option<PendingPull>,
    consecutive_zero_pulls: u32,
    consecutive_empty_replies: u32,
    closed_sweeps: u32,
    stats: ContextStatistics,
}

/// State for one Open/Pull/Close sequence.
///
/// All state sits behind one private lock. Provider deliveries append to the
/// cache; only client requests and the sweep drain it.
#[derive(Debug)]
pub struct EnumerationContext {
    id: ContextId,
    namespace: NamespaceName,
    kind: PullKind,
    host: String,
    settings: ContextSettings,
    state: Mutex<ContextState>,
    cache_drained: Notify,
}

impl EnumerationContext {
    /// Creates a context in the processing state, so no Pull can overtake
    /// the Open reply.
    #[must_use]
    pub fn new(
        id: ContextId,
        namespace: NamespaceName,
        kind: PullKind,
        host: impl Into<String>,
        settings: ContextSettings,
    ) -> Self {
        Self {
            id,
            namespace,
            kind,
            host: host.into(),
            settings,
            state: Mutex::new(ContextState {
                cache: ResponseData::empty(kind.content_kind()),
                processing: true,
                opened: false,
                client_closed: false,
                providers_complete: false,
                released: false,
                deadline: None,
                error: None,
                pending: None,
                consecutive_zero_pulls: 0,
                consecutive_empty_replies: 0,
                closed_sweeps: 0,
                stats: ContextStatistics::default(),
            }),
            cache_drained: Notify::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    #[must_use]
    pub fn namespace(&self) -> &NamespaceName {
        &self.namespace
    }

    #[must_use]
    pub fn kind(&self) -> PullKind {
        self.kind
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        let state = self.state.lock();
        if state.client_closed {
            Lifecycle::Closed
        } else if !state.opened {
            Lifecycle::Opening
        } else if state.providers_complete {
            Lifecycle::Draining
        } else {
            Lifecycle::Active {
                processing: state.processing,
            }
        }
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.state.lock().cache.len()
    }

    #[must_use]
    pub fn statistics(&self) -> ContextStatistics {
        self.state.lock().stats
    }

    /// Admits a Pull (`kind` set) or Close (`kind` unset) and marks the
    /// context as processing.
    ///
    /// # Errors
    ///
    /// `InvalidEnumerationContext` when the context is closed, belongs to
    /// another namespace, was opened for another pull kind, or its
    /// interoperation timer has fired (the context is then closed).
    /// `PullCannotBeAbandoned` when another operation is in flight.
    pub fn begin(
        &self,
        kind: Option<PullKind>,
        namespace: &NamespaceName,
    ) -> Result<(), OperationError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.client_closed {
            return Err(OperationError::invalid_context(format!(
                "enumeration context {} is closed",
                self.id
            )));
        }
        if *namespace != self.namespace {
            return Err(OperationError::invalid_context(format!(
                "enumeration context {} belongs to namespace {}",
                self.id, self.namespace
            )));
        }
        if let Some(kind) = kind {
            if kind != self.kind {
                return Err(OperationError::invalid_context(format!(
                    "enumeration context {} accepts {}, not {}",
                    self.id,
                    self.kind.pull_operation(),
                    kind.pull_operation()
                )));
            }
        }
        if state.processing {
            return Err(OperationError::PullCannotBeAbandoned {
                message: format!("an operation is in progress on enumeration context {}", self.id),
            });
        }
        if state.deadline.is_some_and(|d| d <= Instant::now()) {
            tracing::info!(context = %self.id, "enumeration context timed out before pull");
            Self::close_locked(state);
            self.cache_drained.notify_waiters();
            return Err(OperationError::invalid_context(format!(
                "enumeration context {} timed out",
                self.id
            )));
        }
        state.processing = true;
        state.deadline = None;
        Ok(())
    }

    /// Checks the context is usable from `namespace` without claiming it.
    ///
    /// # Errors
    ///
    /// `InvalidEnumerationContext` for closed or foreign contexts.
    pub fn check(&self, namespace: &NamespaceName) -> Result<(), OperationError> {
        let state = self.state.lock();
        if state.client_closed || *namespace != self.namespace {
            return Err(OperationError::invalid_context(format!(
                "enumeration context {} is not open in {namespace}",
                self.id
            )));
        }
        Ok(())
    }

    /// Answers an Open or an admitted Pull now if the cache can satisfy
    /// `max_object_count`, otherwise stashes the request.
    pub fn respond(&self, reply: ReplyHandle, max_object_count: u32, is_pull: bool) -> Respond {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if is_pull {
            if max_object_count == 0 {
                state.consecutive_zero_pulls += 1;
                if state.consecutive_zero_pulls > self.settings.max_zero_pulls
                    && state.error.is_none()
                {
                    tracing::warn!(
                        context = %self.id,
                        pulls = state.consecutive_zero_pulls,
                        "too many consecutive zero-length pulls"
                    );
                    state.error = Some(OperationError::ServerLimitsExceeded {
                        message: format!(
                            "more than {} consecutive zero-length pulls",
                            self.settings.max_zero_pulls
                        ),
                    });
                }
            } else {
                state.consecutive_zero_pulls = 0;
            }
        }
        if Self::satisfiable(state, max_object_count) {
            let result = self.issue(state, max_object_count, now);
            drop(guard);
            self.cache_drained.notify_waiters();
            return Respond::Ready(ReadyReply { reply, result });
        }
        tracing::debug!(
            context = %self.id,
            cached = state.cache.len(),
            requested = max_object_count,
            "request stashed until providers deliver"
        );
        state.pending = Some(PendingPull {
            reply,
            max_object_count,
            stashed_at: now,
            deadline: now + self.settings.max_operation_wait,
        });
        drop(guard);
        self.cache_drained.notify_waiters();
        Respond::Stashed
    }

    /// Folds one provider delivery into the cache and answers a stashed
    /// request if it can now be satisfied.
    pub fn fold(
        &self,
        data: Option<ResponseData>,
        providers_complete: bool,
        error: Option<OperationError>,
    ) -> FoldOutcome {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if providers_complete {
            state.providers_complete = true;
        }
        if let Some(err) = error {
            if state.error.is_none() && !state.client_closed {
                state.error = Some(err);
            }
        }
        if let Some(data) = data {
            if state.client_closed {
                tracing::debug!(context = %self.id, items = data.len(), "discarding delivery to closed context");
            } else if let Err(mismatch) = state.cache.append(data) {
                state
                    .error
                    .get_or_insert(OperationError::internal(mismatch.to_string()));
            }
            state.stats.cache_high_water = state.stats.cache_high_water.max(state.cache.len());
        }

        let ready = if state
            .pending
            .as_ref()
            .is_some_and(|p| Self::satisfiable(state, p.max_object_count))
        {
            state.pending.take().map(|pending| {
                state.stats.total_wait += now.saturating_duration_since(pending.stashed_at);
                let result = self.issue(state, pending.max_object_count, now);
                ReadyReply {
                    reply: pending.reply,
                    result,
                }
            })
        } else {
            None
        };
        let wait_for_space = Self::cache_full(state, &self.settings);
        drop(guard);
        if ready.is_some() {
            self.cache_drained.notify_waiters();
        }
        FoldOutcome {
            ready,
            wait_for_space,
        }
    }

    /// Waits until the cache drains below its limit, the client closes, or
    /// the context fails.
    pub async fn wait_for_cache_space(&self) {
        loop {
            let notified = self.cache_drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock();
                if !Self::cache_full(&state, &self.settings) {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Closes an admitted context on client request.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            Self::close_locked(&mut state);
        }
        self.cache_drained.notify_waiters();
        tracing::debug!(context = %self.id, "enumeration context closed by client");
    }

    /// Applies the timeout sweep at `now`.
    pub fn expire(&self, now: Instant) -> ExpireOutcome {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.released {
            return ExpireOutcome::Untouched;
        }

        if state.pending.as_ref().is_some_and(|p| p.deadline <= now) {
            let Some(pending) = state.pending.take() else {
                return ExpireOutcome::Untouched;
            };
            state.stats.total_wait += now.saturating_duration_since(pending.stashed_at);
            state.stats.forced_replies += 1;
            if state.cache.is_empty() && !state.providers_complete {
                state.consecutive_empty_replies += 1;
                if state.consecutive_empty_replies == self.settings.max_consecutive_waits {
                    tracing::warn!(context = %self.id, "providers stalled, replying empty");
                }
                if state.consecutive_empty_replies >= self.settings.stall_limit() {
                    tracing::warn!(context = %self.id, "provider responses failed, closing context");
                    state.error = Some(OperationError::from_provider(
                        StatusCode::Failed,
                        "provider responses failed",
                    ));
                    state.providers_complete = true;
                }
            } else {
                state.consecutive_empty_replies = 0;
            }
            let result = self.issue(state, pending.max_object_count, now);
            drop(guard);
            self.cache_drained.notify_waiters();
            return ExpireOutcome::ForcedReply(ReadyReply {
                reply: pending.reply,
                result,
            });
        }

        if !state.processing
            && !state.client_closed
            && state.deadline.is_some_and(|d| d <= now)
        {
            tracing::info!(context = %self.id, "enumeration context timed out");
            Self::close_locked(state);
            drop(guard);
            self.cache_drained.notify_waiters();
            return ExpireOutcome::TimedOut;
        }

        if state.client_closed && !state.providers_complete {
            state.closed_sweeps += 1;
            if state.closed_sweeps >= self.settings.stall_limit() {
                tracing::warn!(context = %self.id, "releasing closed context with incomplete providers");
                state.providers_complete = true;
                return ExpireOutcome::ProvidersAbandoned;
            }
        }
        ExpireOutcome::Untouched
    }

    /// Closes the context for server shutdown, failing any stashed request.
    pub fn shut_down(&self) -> Option<ReadyReply> {
        let pending = {
            let mut state = self.state.lock();
            Self::close_locked(&mut state);
            state.providers_complete = true;
            state.pending.take()
        };
        self.cache_drained.notify_waiters();
        pending.map(|p| ReadyReply {
            reply: p.reply,
            result: Err(OperationError::ShuttingDown),
        })
    }

    /// True once the client has closed and every provider has completed.
    #[cfg(test)]
    pub(crate) fn is_releasable(&self) -> bool {
        let state = self.state.lock();
        !state.released && state.client_closed && state.providers_complete
    }

    /// Marks the context released if both closing conditions hold. Returns
    /// its statistics the first time only.
    pub(crate) fn try_release(&self) -> Option<ContextStatistics> {
        let mut state = self.state.lock();
        if state.released || !(state.client_closed && state.providers_complete) {
            return None;
        }
        state.released = true;
        Some(state.stats)
    }

    fn satisfiable(state: &ContextState, max_object_count: u32) -> bool {
        state.error.is_some()
            || max_object_count == 0
            || state.providers_complete
            || state.cache.len() >= usize::try_from(max_object_count).unwrap_or(usize::MAX)
    }

    /// A stashed request asking for more than is cached keeps providers
    /// producing past the limit.
    fn cache_full(state: &ContextState, settings: &ContextSettings) -> bool {
        let wanted = state.pending.as_ref().map_or(0, |p| {
            usize::try_from(p.max_object_count).unwrap_or(usize::MAX)
        });
        !state.client_closed
            && !state.providers_complete
            && state.error.is_none()
            && state.cache.len() >= settings.cache_max_size
            && state.cache.len() >= wanted
    }

    fn close_locked(state: &mut ContextState) {
        state.client_closed = true;
        state.processing = false;
        state.deadline = None;
        state.cache.clear();
    }

    /// Drains up to `max_object_count` items into a reply and moves the
    /// context to its next state.
    fn issue(&self, state: &mut ContextState, max_object_count: u32, now: Instant) -> OperationResult {
        state.processing = false;
        state.opened = true;
        state.stats.responses += 1;

        if let Some(err) = state.error.clone() {
            tracing::debug!(context = %self.id, error = %err, "enumeration context failed");
            Self::close_locked(state);
            return Err(err);
        }

        let count = usize::try_from(max_object_count).unwrap_or(usize::MAX);
        let mut data = state.cache.take_front(count);
        data.complete_paths(&self.host, &self.namespace);
        if self.kind == PullKind::Instances {
            data.for_each_instance_mut(|inst| inst.path = None);
        }
        state.stats.objects_returned += data.len() as u64;

        let end_of_sequence = state.providers_complete && state.cache.is_empty();
        if end_of_sequence {
            state.client_closed = true;
            state.deadline = None;
        } else {
            state.deadline = self.settings.operation_timeout.map(|t| now + t);
        }
        Ok(OperationResponse::OpenOrPull(OpenOrPullResponse {
            data,
            end_of_sequence,
            enumeration_context: (!end_of_sequence).then(|| self.id.to_string()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{disk, ns};

    fn settings() -> ContextSettings {
        ContextSettings::from_config(&BrokerConfig::default(), Some(Duration::from_secs(30)))
    }

    fn context(kind: PullKind) -> EnumerationContext {
        EnumerationContext::new(ContextId::new(500_001), ns("root/test"), kind, "host1", settings())
    }

    fn disks(ids: std::ops::RangeInclusive<u64>) -> ResponseData {
        ResponseData::Instances(ids.map(disk).collect())
    }

    fn open_or_pull(result: OperationResult) -> OpenOrPullResponse {
        match result {
            Ok(OperationResponse::OpenOrPull(r)) => r,
            other => panic!("unexpected result {other:?}"),
        }
    }

    fn ready(respond: Respond) -> OperationResult {
        match respond {
            Respond::Ready(r) => r.result,
            Respond::Stashed => panic!("request was stashed"),
        }
    }

    #[test]
    fn created_processing_rejects_pull_until_open_reply() {
        let ctx = context(PullKind::InstancesWithPath);
        assert_eq!(ctx.lifecycle(), Lifecycle::Opening);
        let err = ctx
            .begin(Some(PullKind::InstancesWithPath), &ns("root/test"))
            .unwrap_err();
        assert!(matches!(err, OperationError::PullCannotBeAbandoned { .. }));

        let (reply, _rx) = ReplyHandle::channel(1);
        let _ = ready(ctx.respond(reply, 0, false));
        ctx.begin(Some(PullKind::InstancesWithPath), &ns("root/test"))
            .unwrap();
    }

    #[test]
    fn drains_with_path_completion_and_end_of_sequence() {
        let ctx = context(PullKind::InstancesWithPath);
        let _ = ctx.fold(Some(disks(1..=3)), true, None);

        let (reply, _rx) = ReplyHandle::channel(1);
        let first = open_or_pull(ready(ctx.respond(reply, 2, false)));
        assert_eq!(first.data.len(), 2);
        assert!(!first.end_of_sequence);
        assert_eq!(first.enumeration_context.as_deref(), Some("500001"));
        let ResponseData::Instances(items) = &first.data else {
            panic!("wrong kind");
        };
        let path = items[0].path.as_ref().unwrap();
        assert_eq!(path.host.as_deref(), Some("host1"));
        assert_eq!(path.namespace, Some(ns("root/test")));

        ctx.begin(Some(PullKind::InstancesWithPath), &ns("root/test"))
            .unwrap();
        let (reply, _rx) = ReplyHandle::channel(2);
        let last = open_or_pull(ready(ctx.respond(reply, 10, true)));
        assert_eq!(last.data.len(), 1);
        assert!(last.end_of_sequence);
        assert!(last.enumeration_context.is_none());
        assert!(ctx.is_releasable());
    }

    #[test]
    fn mismatched_kind_and_namespace_are_invalid() {
        let ctx = context(PullKind::InstancePaths);
        let (reply, _rx) = ReplyHandle::channel(1);
        let _ = ready(ctx.respond(reply, 0, false));

        let err = ctx
            .begin(Some(PullKind::InstancesWithPath), &ns("root/test"))
            .unwrap_err();
        assert!(matches!(err, OperationError::InvalidEnumerationContext { .. }));
        let err = ctx.begin(None, &ns("root/other")).unwrap_err();
        assert!(matches!(err, OperationError::InvalidEnumerationContext { .. }));
    }

    #[tokio::test]
    async fn stashed_request_answered_by_delivery() {
        let ctx = context(PullKind::InstancesWithPath);
        let (reply, rx) = ReplyHandle::channel(1);
        assert!(matches!(ctx.respond(reply, 3, false), Respond::Stashed));

        let outcome = ctx.fold(Some(disks(1..=2)), false, None);
        assert!(outcome.ready.is_none());
        let outcome = ctx.fold(Some(disks(3..=4)), false, None);
        outcome.ready.unwrap().send();

        let response = open_or_pull(rx.await.unwrap());
        assert_eq!(response.data.len(), 3);
        assert!(!response.end_of_sequence);
        assert_eq!(ctx.cache_len(), 1);
    }

    #[test]
    fn zero_pull_limit_sets_sticky_error() {
        let config = BrokerConfig {
            max_consecutive_zero_pulls: 2,
            ..BrokerConfig::default()
        };
        let ctx = EnumerationContext::new(
            ContextId::new(7),
            ns("root/test"),
            PullKind::InstancesWithPath,
            "h",
            ContextSettings::from_config(&config, None),
        );
        let (reply, _rx) = ReplyHandle::channel(1);
        let _ = ready(ctx.respond(reply, 0, false));

        for _ in 0..2 {
            ctx.begin(Some(PullKind::InstancesWithPath), &ns("root/test"))
                .unwrap();
            let (reply, _rx) = ReplyHandle::channel(1);
            assert!(ready(ctx.respond(reply, 0, true)).is_ok());
        }
        ctx.begin(Some(PullKind::InstancesWithPath), &ns("root/test"))
            .unwrap();
        let (reply, _rx) = ReplyHandle::channel(1);
        let err = ready(ctx.respond(reply, 0, true)).unwrap_err();
        assert!(matches!(err, OperationError::ServerLimitsExceeded { .. }));
        assert_eq!(ctx.lifecycle(), Lifecycle::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_forces_reply_for_stashed_pull() {
        let ctx = context(PullKind::InstancesWithPath);
        let (reply, rx) = ReplyHandle::channel(1);
        assert!(matches!(ctx.respond(reply, 5, false), Respond::Stashed));
        let _ = ctx.fold(Some(disks(1..=2)), false, None);

        assert!(matches!(ctx.expire(Instant::now()), ExpireOutcome::Untouched));
        tokio::time::advance(Duration::from_secs(10)).await;
        let ExpireOutcome::ForcedReply(forced) = ctx.expire(Instant::now()) else {
            panic!("expected forced reply");
        };
        forced.send();
        let response = open_or_pull(rx.await.unwrap());
        assert_eq!(response.data.len(), 2);
        assert!(!response.end_of_sequence);
        assert_eq!(ctx.statistics().forced_replies, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_providers_fail_after_repeated_empty_replies() {
        let ctx = context(PullKind::InstancesWithPath);
        let (reply, _rx) = ReplyHandle::channel(1);
        assert!(matches!(ctx.respond(reply, 1, false), Respond::Stashed));

        let limit = settings().stall_limit();
        for round in 1..=limit {
            tokio::time::advance(Duration::from_secs(10)).await;
            let ExpireOutcome::ForcedReply(forced) = ctx.expire(Instant::now()) else {
                panic!("expected forced reply in round {round}");
            };
            if round < limit {
                assert!(forced.result.is_ok());
                ctx.begin(Some(PullKind::InstancesWithPath), &ns("root/test"))
                    .unwrap();
                let (reply, _rx) = ReplyHandle::channel(1);
                assert!(matches!(ctx.respond(reply, 1, true), Respond::Stashed));
            } else {
                let err = forced.result.unwrap_err();
                assert_eq!(err.status_code(), StatusCode::Failed);
                assert!(err.to_string().contains("provider responses failed"));
            }
        }
        assert!(ctx.is_releasable());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_closes_context() {
        let ctx = context(PullKind::InstancesWithPath);
        let _ = ctx.fold(Some(disks(1..=4)), false, None);
        let (reply, _rx) = ReplyHandle::channel(1);
        let _ = ready(ctx.respond(reply, 1, false));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(matches!(ctx.expire(Instant::now()), ExpireOutcome::TimedOut));
        assert_eq!(ctx.lifecycle(), Lifecycle::Closed);
        assert_eq!(ctx.cache_len(), 0);
        assert!(!ctx.is_releasable());

        let _ = ctx.fold(None, true, None);
        assert!(ctx.is_releasable());
    }

    #[tokio::test(start_paused = true)]
    async fn pull_after_timer_fired_is_invalid() {
        let ctx = context(PullKind::InstancesWithPath);
        let _ = ctx.fold(Some(disks(1..=4)), false, None);
        let (reply, _rx) = ReplyHandle::channel(1);
        let _ = ready(ctx.respond(reply, 1, false));

        tokio::time::advance(Duration::from_secs(31)).await;
        let err = ctx
            .begin(Some(PullKind::InstancesWithPath), &ns("root/test"))
            .unwrap_err();
        assert!(matches!(err, OperationError::InvalidEnumerationContext { .. }));
        assert_eq!(ctx.lifecycle(), Lifecycle::Closed);
    }

    #[tokio::test]
    async fn full_cache_blocks_until_drained() {
        let config = BrokerConfig {
            response_cache_max_size: 2,
            ..BrokerConfig::default()
        };
        let ctx = Arc::new(EnumerationContext::new(
            ContextId::new(9),
            ns("root/test"),
            PullKind::InstancesWithPath,
            "h",
            ContextSettings::from_config(&config, None),
        ));
        let outcome = ctx.fold(Some(disks(1..=3)), false, None);
        assert!(outcome.wait_for_space);

        let waiter = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move { ctx.wait_for_cache_space().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let (reply, _rx) = ReplyHandle::channel(1);
        let _ = ready(ctx.respond(reply, 2, false));
        waiter.await.unwrap();
        assert_eq!(ctx.cache_len(), 1);
    }

    #[tokio::test]
    async fn stashed_request_larger_than_limit_releases_providers() {
        let config = BrokerConfig {
            response_cache_max_size: 2,
            ..BrokerConfig::default()
        };
        let ctx = Arc::new(EnumerationContext::new(
            ContextId::new(9),
            ns("root/test"),
            PullKind::InstancesWithPath,
            "h",
            ContextSettings::from_config(&config, None),
        ));
        assert!(ctx.fold(Some(disks(1..=2)), false, None).wait_for_space);

        let waiter = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move { ctx.wait_for_cache_space().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let (reply, rx) = ReplyHandle::channel(1);
        assert!(matches!(ctx.respond(reply, 5, false), Respond::Stashed));
        waiter.await.unwrap();

        let outcome = ctx.fold(Some(disks(3..=4)), false, None);
        assert!(outcome.ready.is_none());
        assert!(!outcome.wait_for_space);
        let outcome = ctx.fold(Some(disks(5..=5)), false, None);
        outcome.ready.expect("five cached").send();
        let response = open_or_pull(rx.await.unwrap());
        assert_eq!(response.data.len(), 5);
        assert!(!response.end_of_sequence);
    }

    #[test]
    fn query_contexts_strip_paths() {
        let ctx = context(PullKind::Instances);
        let _ = ctx.fold(Some(disks(1..=1)), true, None);
        let (reply, _rx) = ReplyHandle::channel(1);
        let response = open_or_pull(ready(ctx.respond(reply, 5, false)));
        let ResponseData::Instances(items) = response.data else {
            panic!("wrong kind");
        };
        assert!(items[0].path.is_none());
        assert!(response.end_of_sequence);
    }

    #[test]
    fn shut_down_fails_stashed_request() {
        let ctx = context(PullKind::InstancesWithPath);
        let (reply, _rx) = ReplyHandle::channel(1);
        assert!(matches!(ctx.respond(reply, 5, false), Respond::Stashed));
        let ready = ctx.shut_down().unwrap();
        assert_eq!(ready.result, Err(OperationError::ShuttingDown));
        assert!(ctx.try_release().is_some());
        assert!(ctx.try_release().is_none());
    }
}
