//! Aggregation of fanned-out provider responses into one reply.
//!
//! An [`OperationAggregate`] is created per multi-source request with the
//! number of sources it expects. Partial deliveries are merged as they
//! arrive; the last completion finalizes the aggregate exactly once and
//! either builds the client reply or closes the producer side of an
//! enumeration context.

use std::sync::Arc;

use parking_lot::Mutex;
use wbem_core::{ContentKind, NamespaceName, PropertyList, ResponseData};

use crate::enumeration::context::{EnumerationContext, ReadyReply};
use crate::service::envelope::ReplyHandle;
use crate::service::operation::{OperationError, OperationResponse, OperationResult};
use crate::traits::QueryFilter;

// ---------------------------------------------------------------------------
// Settings and inputs
// ---------------------------------------------------------------------------

/// Response-shaping flags of the client request, re-applied to every
/// partial since providers may ignore them.
#[derive(Debug, Clone)]
pub struct Shaping {
    pub include_qualifiers: bool,
    pub include_class_origin: bool,
    pub property_list: PropertyList,
}

/// How partial results are post-processed and where the result goes.
#[derive(Debug, Clone)]
pub struct AggregateSettings {
    /// Content kind of the client reply; partials are converted to it.
    pub content_kind: ContentKind,
    pub shaping: Option<Shaping>,
    pub host: String,
    pub namespace: NamespaceName,
    /// Compiled query, for `ExecQuery` and filtered Opens.
    pub filter: Option<Arc<dyn QueryFilter>>,
    /// Project surviving instances onto the query's select list.
    pub project: bool,
}

impl AggregateSettings {
    #[must_use]
    pub fn new(content_kind: ContentKind, host: impl Into<String>, namespace: NamespaceName) -> Self {
        Self {
            content_kind,
            shaping: None,
            host: host.into(),
            namespace,
            filter: None,
            project: false,
        }
    }

    #[must_use]
    pub fn with_shaping(
        mut self,
        include_qualifiers: bool,
        include_class_origin: bool,
        property_list: PropertyList,
    ) -> Self {
        self.shaping = Some(Shaping {
            include_qualifiers,
            include_class_origin,
            property_list,
        });
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn QueryFilter>, project: bool) -> Self {
        self.filter = Some(filter);
        self.project = project;
        self
    }
}

/// Where the aggregate's output goes.
#[derive(Debug)]
pub enum AggregateSink {
    /// Non-paginated request: one reply built at finalization.
    Reply(ReplyHandle),
    /// Paginated request: partials stream into the context cache.
    Enumeration(Arc<EnumerationContext>),
}

/// One response from one source.
#[derive(Debug)]
pub struct SourcePartial {
    pub result: Result<ResponseData, OperationError>,
    /// Last partial from this source.
    pub complete: bool,
    /// Run the query predicate over this partial's instances. Set for
    /// sources that were sent a plain enumeration in place of a query.
    pub apply_filter: bool,
}

impl SourcePartial {
    #[must_use]
    pub fn complete(result: Result<ResponseData, OperationError>) -> Self {
        Self {
            result,
            complete: true,
            apply_filter: false,
        }
    }

    /// Converts a provider response into a partial of `kind`.
    #[must_use]
    pub fn from_response(result: OperationResult, complete: bool, kind: ContentKind) -> Self {
        let result = match result {
            Ok(OperationResponse::Data(data)) => Ok(data),
            Ok(OperationResponse::Empty) => Ok(ResponseData::empty(kind)),
            Ok(OperationResponse::Instance(inst)) => Ok(ResponseData::Instances(vec![*inst])),
            Ok(other) => Err(OperationError::internal(format!(
                "unexpected provider response {other:?}"
            ))),
            Err(err) => Err(err),
        };
        Self {
            result,
            complete,
            apply_filter: false,
        }
    }

    #[must_use]
    pub fn filtered(mut self, apply_filter: bool) -> Self {
        self.apply_filter = apply_filter;
        self
    }
}

/// Follow-up work for the caller of [`OperationAggregate::deliver`], to be
/// done after the aggregate lock is released.
#[derive(Debug, Default)]
pub struct Delivery {
    /// A reply that is now ready to send.
    pub ready: Option<ReadyReply>,
    /// The enumeration context fed by this delivery. Releasable once the
    /// aggregate has finished.
    pub context: Option<Arc<EnumerationContext>>,
    /// The context cache is full; the source should wait before delivering more.
    pub wait_for_space: bool,
    /// This delivery finalized the aggregate.
    pub finished: bool,
}

impl Delivery {
    /// Sends the ready reply, if any.
    pub fn send_ready(&mut self) {
        if let Some(ready) = self.ready.take() {
            ready.send();
        }
    }
}

// ---------------------------------------------------------------------------
// OperationAggregate
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AggregateState {
    sink: Option<AggregateSink>,
    merged: ResponseData,
    received: usize,
    completed_sources: usize,
    not_supported_sources: usize,
    first_error: Option<OperationError>,
    not_supported_error: Option<OperationError>,
    filter_error: Option<OperationError>,
    finished: bool,
}

/// Ledger for one fanned-out request.
#[derive(Debug)]
pub struct OperationAggregate {
    correlation_id: u64,
    operation: &'static str,
    expected: usize,
    settings: AggregateSettings,
    state: Mutex<AggregateState>,
}

impl OperationAggregate {
    #[must_use]
    pub fn new(
        correlation_id: u64,
        operation: &'static str,
        expected: usize,
        settings: AggregateSettings,
        sink: AggregateSink,
    ) -> Self {
        let merged = ResponseData::empty(settings.content_kind);
        Self {
            correlation_id,
            operation,
            expected,
            settings,
            state: Mutex::new(AggregateState {
                sink: Some(sink),
                merged,
                received: 0,
                completed_sources: 0,
                not_supported_sources: 0,
                first_error: None,
                not_supported_error: None,
                filter_error: None,
                finished: false,
            }),
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    #[must_use]
    pub fn expected_sources(&self) -> usize {
        self.expected
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    #[must_use]
    pub fn settings(&self) -> &AggregateSettings {
        &self.settings
    }

    /// Folds one partial into the aggregate.
    pub fn deliver(&self, partial: SourcePartial) -> Delivery {
        let SourcePartial {
            result,
            complete,
            apply_filter,
        } = partial;
        let mut source_error = None;
        let mut filter_error = None;
        let data = match result {
            Ok(data) => match self.prepare(data, apply_filter) {
                Ok(data) => Some(data),
                Err(Prepared::Filter(err)) => {
                    filter_error = Some(err);
                    None
                }
                Err(Prepared::Content(err)) => {
                    source_error = Some(err);
                    None
                }
            },
            Err(err) => {
                source_error = Some(err);
                None
            }
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.finished {
            tracing::warn!(
                correlation_id = self.correlation_id,
                operation = self.operation,
                "delivery after aggregate completed ignored"
            );
            return Delivery::default();
        }
        state.received += 1;

        if let Some(err) = filter_error {
            tracing::warn!(correlation_id = self.correlation_id, error = %err, "query filter failed");
            state.filter_error.get_or_insert(err);
        }
        if let Some(err) = source_error {
            if complete && err.is_not_supported() {
                state.not_supported_sources += 1;
                state.not_supported_error.get_or_insert(err);
            } else {
                tracing::debug!(correlation_id = self.correlation_id, error = %err, "source failed");
                state.first_error.get_or_insert(err);
            }
        }

        let mut delivery = Delivery::default();
        if let Some(data) = data {
            match &state.sink {
                Some(AggregateSink::Reply(_)) => {
                    if let Err(mismatch) = state.merged.append(data) {
                        state
                            .first_error
                            .get_or_insert(OperationError::internal(mismatch.to_string()));
                    }
                }
                Some(AggregateSink::Enumeration(ctx)) => {
                    let outcome = ctx.fold(Some(data), false, None);
                    delivery.ready = outcome.ready;
                    delivery.wait_for_space = outcome.wait_for_space;
                    delivery.context = Some(Arc::clone(ctx));
                }
                None => {}
            }
        }

        if complete {
            state.completed_sources += 1;
        }
        if state.completed_sources >= self.expected {
            self.finalize(state, &mut delivery);
        }
        delivery
    }

    /// Finalizes an aggregate that expects no sources.
    pub fn complete_empty(&self) -> Delivery {
        let mut guard = self.state.lock();
        let mut delivery = Delivery::default();
        if !guard.finished && self.expected == 0 {
            self.finalize(&mut guard, &mut delivery);
        }
        delivery
    }

    fn finalize(&self, state: &mut AggregateState, delivery: &mut Delivery) {
        state.finished = true;
        let all_not_supported =
            self.expected > 0 && state.not_supported_sources == self.expected;
        let error = state
            .filter_error
            .take()
            .or_else(|| state.first_error.take())
            .or_else(|| {
                if all_not_supported {
                    state.not_supported_error.take()
                } else {
                    None
                }
            });
        tracing::debug!(
            correlation_id = self.correlation_id,
            operation = self.operation,
            sources = self.expected,
            received = state.received,
            not_supported = state.not_supported_sources,
            failed = error.is_some(),
            "aggregate complete"
        );
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("wbem_aggregate_sources", "operation" => self.operation)
            .record(self.expected as f64);

        delivery.finished = true;
        match state.sink.take() {
            Some(AggregateSink::Reply(reply)) => {
                let result = match error {
                    Some(err) => Err(err),
                    None => {
                        let mut merged = std::mem::replace(
                            &mut state.merged,
                            ResponseData::empty(self.settings.content_kind),
                        );
                        merged.complete_paths(&self.settings.host, &self.settings.namespace);
                        Ok(OperationResponse::Data(merged))
                    }
                };
                delivery.ready = Some(ReadyReply { reply, result });
            }
            Some(AggregateSink::Enumeration(ctx)) => {
                let outcome = ctx.fold(None, true, error);
                if outcome.ready.is_some() {
                    delivery.ready = outcome.ready;
                }
                delivery.wait_for_space = false;
                delivery.context = Some(ctx);
            }
            None => {}
        }
    }

    /// Converts, filters, projects and shapes one partial.
    fn prepare(&self, data: ResponseData, apply_filter: bool) -> Result<ResponseData, Prepared> {
        let mut data = data
            .into_kind(self.settings.content_kind)
            .map_err(|e| Prepared::Content(OperationError::internal(e.to_string())))?;

        if let Some(filter) = &self.settings.filter {
            if apply_filter {
                data.try_retain_instances(|inst| filter.evaluate(inst))
                    .map_err(|e| Prepared::Filter(OperationError::internal(e.to_string())))?;
            }
            if self.settings.project {
                let mut failure = None;
                data.for_each_instance_mut(|inst| {
                    if failure.is_none() {
                        if let Err(e) = filter.project(inst) {
                            failure = Some(e);
                        }
                    }
                });
                if let Some(e) = failure {
                    return Err(Prepared::Filter(OperationError::internal(e.to_string())));
                }
            }
        }

        if let Some(shaping) = &self.settings.shaping {
            data.shape_instances(
                shaping.include_qualifiers,
                shaping.include_class_origin,
                &shaping.property_list,
            );
        }
        Ok(data)
    }
}

enum Prepared {
    Filter(OperationError),
    Content(OperationError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::sync::oneshot;
    use wbem_core::StatusCode;

    use super::*;
    use crate::enumeration::context::{ContextId, ContextSettings, PullKind, Respond};
    use crate::service::config::BrokerConfig;
    use crate::test_support::{disk, ns, TestFilterCompiler};
    use crate::traits::FilterCompiler;

    fn settings() -> AggregateSettings {
        AggregateSettings::new(ContentKind::Instances, "host1", ns("root/test"))
    }

    fn reply_aggregate(
        expected: usize,
        settings: AggregateSettings,
    ) -> (OperationAggregate, oneshot::Receiver<OperationResult>) {
        let (reply, rx) = ReplyHandle::channel(11);
        let agg = OperationAggregate::new(
            11,
            "EnumerateInstances",
            expected,
            settings,
            AggregateSink::Reply(reply),
        );
        (agg, rx)
    }

    fn instances(ids: impl IntoIterator<Item = u64>) -> ResponseData {
        ResponseData::Instances(ids.into_iter().map(disk).collect())
    }

    fn not_supported() -> SourcePartial {
        SourcePartial::complete(Err(OperationError::from_provider(
            StatusCode::NotSupported,
            "no",
        )))
    }

    fn result_of(rx: &mut oneshot::Receiver<OperationResult>) -> OperationResult {
        rx.try_recv().expect("reply sent")
    }

    #[test]
    fn merges_in_arrival_order_and_completes_paths() {
        let (agg, mut rx) = reply_aggregate(2, settings());
        let mut d = agg.deliver(SourcePartial {
            result: Ok(instances([1, 2])),
            complete: false,
            apply_filter: false,
        });
        assert!(d.ready.is_none());
        d = agg.deliver(SourcePartial::complete(Ok(instances([3]))));
        assert!(d.ready.is_none());
        assert!(!agg.is_finished());

        let mut d = agg.deliver(SourcePartial::complete(Ok(instances([4]))));
        assert!(d.finished);
        d.send_ready();
        let Ok(OperationResponse::Data(ResponseData::Instances(items))) = result_of(&mut rx)
        else {
            panic!("expected instances");
        };
        let ids: Vec<_> = items
            .iter()
            .map(|i| i.property("DeviceID").cloned())
            .collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], Some(wbem_core::Value::Uint(1)));
        assert_eq!(ids[3], Some(wbem_core::Value::Uint(4)));
        let path = items[0].path.as_ref().unwrap();
        assert_eq!(path.host.as_deref(), Some("host1"));
    }

    #[test]
    fn partial_not_supported_is_ignored() {
        let (agg, mut rx) = reply_aggregate(3, settings());
        agg.deliver(not_supported()).send_ready();
        agg.deliver(not_supported()).send_ready();
        agg.deliver(SourcePartial::complete(Ok(instances([1]))))
            .send_ready();
        let Ok(OperationResponse::Data(data)) = result_of(&mut rx) else {
            panic!("expected data");
        };
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn all_not_supported_reports_not_supported() {
        let (agg, mut rx) = reply_aggregate(3, settings());
        for _ in 0..3 {
            agg.deliver(not_supported()).send_ready();
        }
        let err = result_of(&mut rx).unwrap_err();
        assert!(err.is_not_supported());
    }

    #[test]
    fn first_real_error_wins_over_not_supported() {
        let (agg, mut rx) = reply_aggregate(3, settings());
        agg.deliver(not_supported()).send_ready();
        agg.deliver(SourcePartial::complete(Err(OperationError::from_provider(
            StatusCode::AccessDenied,
            "denied",
        ))))
        .send_ready();
        agg.deliver(SourcePartial::complete(Err(OperationError::from_provider(
            StatusCode::Failed,
            "later",
        ))))
        .send_ready();
        let err = result_of(&mut rx).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::AccessDenied);
    }

    #[test]
    fn deliveries_after_completion_are_ignored() {
        let (agg, mut rx) = reply_aggregate(1, settings());
        agg.deliver(SourcePartial::complete(Ok(instances([1]))))
            .send_ready();
        assert!(result_of(&mut rx).is_ok());
        let extra = agg.deliver(SourcePartial::complete(Ok(instances([2]))));
        assert!(extra.ready.is_none());
        assert!(!extra.finished);
    }

    #[test]
    fn content_kind_mismatch_is_internal_error() {
        let settings = AggregateSettings::new(ContentKind::Paths, "h", ns("root/test"));
        let (agg, mut rx) = reply_aggregate(1, settings);
        agg.deliver(SourcePartial::complete(Ok(ResponseData::Objects(vec![
            wbem_core::CimObject::Class(wbem_core::Class::new(crate::test_support::name("X"))),
        ]))))
        .send_ready();
        let err = result_of(&mut rx).unwrap_err();
        assert!(matches!(err, OperationError::Internal(_)));
    }

    #[test]
    fn filter_applies_only_to_flagged_partials() {
        let filter = TestFilterCompiler
            .compile("WQL", "SELECT * FROM Test_Disk WHERE DeviceID = 2", &ns("root/test"))
            .unwrap();
        let (agg, mut rx) = reply_aggregate(2, settings().with_filter(filter, false));
        agg.deliver(SourcePartial::complete(Ok(instances([1, 2, 3]))).filtered(true))
            .send_ready();
        agg.deliver(SourcePartial::complete(Ok(instances([5]))))
            .send_ready();
        let Ok(OperationResponse::Data(data)) = result_of(&mut rx) else {
            panic!("expected data");
        };
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn shaping_drops_unlisted_properties() {
        let list = PropertyList::only(vec![crate::test_support::name("DeviceID")]);
        let (agg, mut rx) = reply_aggregate(1, settings().with_shaping(false, false, list));
        agg.deliver(SourcePartial::complete(Ok(instances([1]))))
            .send_ready();
        let Ok(OperationResponse::Data(ResponseData::Instances(items))) = result_of(&mut rx)
        else {
            panic!("expected instances");
        };
        assert_eq!(items[0].properties.len(), 1);
    }

    #[test]
    fn enumeration_sink_streams_into_context() {
        let ctx = Arc::new(EnumerationContext::new(
            ContextId::new(1),
            ns("root/test"),
            PullKind::InstancesWithPath,
            "h",
            ContextSettings::from_config(&BrokerConfig::default(), Some(Duration::from_secs(30))),
        ));
        let agg = OperationAggregate::new(
            3,
            "OpenEnumerateInstances",
            2,
            settings(),
            AggregateSink::Enumeration(Arc::clone(&ctx)),
        );
        let (reply, mut rx) = ReplyHandle::channel(3);
        assert!(matches!(ctx.respond(reply, 5, false), Respond::Stashed));

        let d = agg.deliver(SourcePartial::complete(Ok(instances(1..=3))));
        assert!(d.ready.is_none());
        assert!(d.context.is_some());
        let mut d = agg.deliver(SourcePartial::complete(Ok(instances(4..=7))));
        assert!(d.finished);
        d.send_ready();

        let Ok(OperationResponse::OpenOrPull(response)) = result_of(&mut rx) else {
            panic!("expected open response");
        };
        assert_eq!(response.data.len(), 5);
        assert!(!response.end_of_sequence);
        assert_eq!(ctx.cache_len(), 2);
    }

    #[test]
    fn empty_aggregate_completes_immediately() {
        let (agg, mut rx) = reply_aggregate(0, settings());
        agg.complete_empty().send_ready();
        let Ok(OperationResponse::Data(data)) = result_of(&mut rx) else {
            panic!("expected data");
        };
        assert!(data.is_empty());
    }

    proptest! {
        #[test]
        fn reply_sent_exactly_once_after_last_completion(
            chunks in proptest::collection::vec(1usize..4, 1..6),
            seed in any::<u64>(),
        ) {
            // chunks[i] = number of partials source i delivers, the last complete.
            let expected = chunks.len();
            let (agg, mut rx) = reply_aggregate(expected, settings());
            let mut queue: Vec<(usize, usize)> = chunks
                .iter()
                .enumerate()
                .flat_map(|(src, &n)| (0..n).map(move |i| (src, i)))
                .collect();
            // Deterministic shuffle keeping each source's partials in order.
            let mut state = seed;
            let mut order = Vec::with_capacity(queue.len());
            while !queue.is_empty() {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                let pick = usize::try_from(state >> 33).unwrap() % queue.len();
                let (src, _) = queue[pick];
                let first = queue.iter().position(|(s, _)| *s == src).unwrap();
                order.push(queue.remove(first));
            }

            let total = order.len();
            let mut replies = 0;
            for (n, (src, i)) in order.into_iter().enumerate() {
                let complete = i + 1 == chunks[src];
                let mut d = agg.deliver(SourcePartial {
                    result: Ok(instances([u64::try_from(n).unwrap()])),
                    complete,
                    apply_filter: false,
                });
                if d.ready.is_some() {
                    replies += 1;
                    prop_assert_eq!(n + 1, total);
                }
                d.send_ready();
            }
            prop_assert_eq!(replies, 1);
            let Ok(OperationResponse::Data(data)) = result_of(&mut rx) else {
                panic!("expected data");
            };
            prop_assert_eq!(data.len(), total);
        }
    }
}
