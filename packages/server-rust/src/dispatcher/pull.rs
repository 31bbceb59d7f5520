//! The Open/Pull/Close family.
//!
//! An Open validates, resolves providers, creates an enumeration context and
//! starts the same fan-out as the equivalent non-paginated operation, with
//! partial results streaming into the context cache. Pulls then drain that
//! cache; a request the cache cannot yet satisfy is parked on the context
//! and answered by the next provider delivery or by the timeout sweep.

use std::sync::Arc;

use wbem_core::messages::{
    AssociatorNamesRequest, AssociatorsRequest, CimRequest, EnumerateInstanceNamesRequest,
    EnumerateInstancesRequest, ExecQueryRequest, OpenOptions, PullRequest, ReferenceNamesRequest,
    ReferencesRequest,
};
use wbem_core::{CimName, PropertyList};

use super::forward::FanOut;
use super::query::query_clone;
use super::validate::{
    require_instance_path, validate_open_options, validate_pull_max_object_count, OpenParams,
};
use super::Dispatcher;
use crate::aggregate::{AggregateSettings, AggregateSink};
use crate::directory::ProviderInfoList;
use crate::enumeration::context::Respond;
use crate::enumeration::{ContextSettings, EnumerationContext, PullKind};
use crate::service::config::BrokerConfig;
use crate::service::envelope::{DispatchOutcome, ReplyHandle};
use crate::service::operation::{OperationContext, OperationError, OperationResponse};
use crate::traits::QueryFilter;

/// Everything an Open needs once validation and lookup have succeeded.
struct OpenPlan {
    kind: PullKind,
    operation: &'static str,
    /// Non-paginated equivalent sent to providers and the object store.
    request: CimRequest,
    list: ProviderInfoList,
    params: OpenParams,
    /// `IncludeClassOrigin` and `PropertyList` of instance-returning Opens.
    shaping: Option<(bool, PropertyList)>,
    /// `OpenQueryInstances`: the query is the filter and providers that can
    /// evaluate it receive it as `ExecQuery`.
    query: Option<CimRequest>,
}

impl Dispatcher {
    pub(super) fn open(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        request: CimRequest,
        reply: ReplyHandle,
    ) -> DispatchOutcome {
        match self.plan_open(ctx, config, request) {
            Ok(plan) => self.start_open(ctx, config, plan, reply),
            Err(err) => {
                Self::reject(ctx, reply, err);
                DispatchOutcome::Released
            }
        }
    }

    fn plan_open(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        request: CimRequest,
    ) -> Result<OpenPlan, OperationError> {
        let filters = self.filters.as_deref();
        let ns = &ctx.namespace;
        let plan = match request {
            CimRequest::OpenEnumerateInstances(req) => {
                let params = validate_open_options(config, filters, ns, &req.options)?;
                let list = self.resolve_instance_providers(ctx, config, &req.class_name)?;
                OpenPlan {
                    kind: PullKind::InstancesWithPath,
                    operation: "OpenEnumerateInstances",
                    request: CimRequest::EnumerateInstances(EnumerateInstancesRequest {
                        class_name: req.class_name,
                        deep_inheritance: req.deep_inheritance,
                        include_qualifiers: false,
                        include_class_origin: req.include_class_origin,
                        property_list: req.property_list.clone(),
                    }),
                    list,
                    params,
                    shaping: Some((req.include_class_origin, req.property_list)),
                    query: None,
                }
            }
            CimRequest::OpenEnumerateInstancePaths(req) => {
                let params = validate_open_options(config, filters, ns, &req.options)?;
                let list = self.resolve_instance_providers(ctx, config, &req.class_name)?;
                OpenPlan {
                    kind: PullKind::InstancePaths,
                    operation: "OpenEnumerateInstancePaths",
                    request: CimRequest::EnumerateInstanceNames(EnumerateInstanceNamesRequest {
                        class_name: req.class_name,
                    }),
                    list,
                    params,
                    shaping: None,
                    query: None,
                }
            }
            CimRequest::OpenReferenceInstances(req) => {
                let equivalent = CimRequest::References(ReferencesRequest {
                    object_name: req.instance_name,
                    result_class: req.result_class,
                    role: req.role,
                    include_qualifiers: false,
                    include_class_origin: req.include_class_origin,
                    property_list: req.property_list.clone(),
                });
                self.plan_association_open(
                    ctx,
                    config,
                    PullKind::InstancesWithPath,
                    "OpenReferenceInstances",
                    equivalent,
                    &req.options,
                    Some((req.include_class_origin, req.property_list)),
                )?
            }
            CimRequest::OpenReferenceInstancePaths(req) => {
                let equivalent = CimRequest::ReferenceNames(ReferenceNamesRequest {
                    object_name: req.instance_name,
                    result_class: req.result_class,
                    role: req.role,
                });
                self.plan_association_open(
                    ctx,
                    config,
                    PullKind::InstancePaths,
                    "OpenReferenceInstancePaths",
                    equivalent,
                    &req.options,
                    None,
                )?
            }
            CimRequest::OpenAssociatorInstances(req) => {
                let equivalent = CimRequest::Associators(AssociatorsRequest {
                    object_name: req.instance_name,
                    assoc_class: req.assoc_class,
                    result_class: req.result_class,
                    role: req.role,
                    result_role: req.result_role,
                    include_qualifiers: false,
                    include_class_origin: req.include_class_origin,
                    property_list: req.property_list.clone(),
                });
                self.plan_association_open(
                    ctx,
                    config,
                    PullKind::InstancesWithPath,
                    "OpenAssociatorInstances",
                    equivalent,
                    &req.options,
                    Some((req.include_class_origin, req.property_list)),
                )?
            }
            CimRequest::OpenAssociatorInstancePaths(req) => {
                let equivalent = CimRequest::AssociatorNames(AssociatorNamesRequest {
                    object_name: req.instance_name,
                    assoc_class: req.assoc_class,
                    result_class: req.result_class,
                    role: req.role,
                    result_role: req.result_role,
                });
                self.plan_association_open(
                    ctx,
                    config,
                    PullKind::InstancePaths,
                    "OpenAssociatorInstancePaths",
                    equivalent,
                    &req.options,
                    None,
                )?
            }
            CimRequest::OpenQueryInstances(req) => {
                if req.return_query_result_class {
                    return Err(OperationError::not_supported(
                        "returnQueryResultClass is not supported",
                    ));
                }
                let options = OpenOptions {
                    filter_query_language: None,
                    filter_query: None,
                    operation_timeout: req.operation_timeout,
                    continue_on_error: req.continue_on_error,
                    max_object_count: req.max_object_count,
                };
                let mut params = validate_open_options(config, filters, ns, &options)?;
                let filter = self.compile_query(ctx, &req.filter_query_language, &req.filter_query)?;
                let class = filter.class_name().clone();
                let list = self.resolve_instance_providers(ctx, config, &class)?;
                params.filter = Some(filter);
                OpenPlan {
                    kind: PullKind::Instances,
                    operation: "OpenQueryInstances",
                    request: CimRequest::EnumerateInstances(EnumerateInstancesRequest::new(class)),
                    list,
                    params,
                    shaping: None,
                    query: Some(CimRequest::ExecQuery(ExecQueryRequest {
                        query_language: req.filter_query_language,
                        query: req.filter_query,
                    })),
                }
            }
            other => {
                return Err(OperationError::internal(format!(
                    "{} is not an Open operation",
                    other.name()
                )))
            }
        };
        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_association_open(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        kind: PullKind,
        operation: &'static str,
        request: CimRequest,
        options: &OpenOptions,
        shaping: Option<(bool, PropertyList)>,
    ) -> Result<OpenPlan, OperationError> {
        let traversal = self.check_traversal(ctx, config, &request)?;
        require_instance_path(traversal.anchor, "InstanceName")?;
        let params =
            validate_open_options(config, self.filters.as_deref(), &ctx.namespace, options)?;
        let list = self.resolve_association_providers(ctx, config, &request)?;
        Ok(OpenPlan {
            kind,
            operation,
            request,
            list,
            params,
            shaping,
            query: None,
        })
    }

    fn start_open(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        plan: OpenPlan,
        reply: ReplyHandle,
    ) -> DispatchOutcome {
        let OpenPlan {
            kind,
            operation,
            request,
            list,
            params,
            shaping,
            query,
        } = plan;
        let context = match self.contexts.create(
            ctx.namespace.clone(),
            kind,
            &config.host_name,
            ContextSettings::from_config(config, params.operation_timeout),
            config.max_open_contexts,
        ) {
            Ok(context) => context,
            Err(err) => {
                Self::reject(ctx, reply, err);
                return DispatchOutcome::Released;
            }
        };
        tracing::debug!(
            call_id = ctx.call_id,
            context = %context.id(),
            operation,
            max_object_count = params.max_object_count,
            "enumeration opened"
        );

        let mut settings = AggregateSettings::new(
            kind.content_kind(),
            config.host_name.clone(),
            ctx.namespace.clone(),
        );
        if let Some((include_class_origin, property_list)) = shaping {
            settings = settings.with_shaping(false, include_class_origin, property_list);
        }
        let filter: Option<Arc<dyn QueryFilter>> = params.filter.clone();
        let filtered = filter.is_some();
        if let Some(filter) = filter {
            settings = settings.with_filter(filter, query.is_some());
        }

        self.fan_out(
            ctx,
            config,
            FanOut {
                operation,
                list: &list,
                settings,
                sink: AggregateSink::Enumeration(Arc::clone(&context)),
                filter_store: filtered,
            },
            Some(|class: &CimName| self.store_source(&ctx.namespace, &request, class)),
            |info| match &query {
                Some(query) => query_clone(info, query, &request),
                None => (request.with_target_class(&info.class_name), filtered),
            },
        );
        self.respond(&context, reply, params.max_object_count, false)
    }

    pub(super) fn pull(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        kind: PullKind,
        req: PullRequest,
        reply: ReplyHandle,
    ) -> DispatchOutcome {
        let max_object_count =
            match validate_pull_max_object_count(config, req.max_object_count) {
                Ok(max) => max,
                Err(err) => {
                    Self::reject(ctx, reply, err);
                    return DispatchOutcome::Released;
                }
            };
        let context = match self.admit(ctx, &req.enumeration_context, Some(kind)) {
            Ok(context) => context,
            Err(err) => {
                Self::reject(ctx, reply, err);
                return DispatchOutcome::Released;
            }
        };
        self.respond(&context, reply, max_object_count, true)
    }

    pub(super) fn close_enumeration(
        &self,
        ctx: &OperationContext,
        enumeration_context: &str,
        reply: ReplyHandle,
    ) {
        match self.admit(ctx, enumeration_context, None) {
            Ok(context) => {
                context.close();
                reply.send(Ok(OperationResponse::Empty));
                self.contexts.release(&context);
            }
            Err(err) => Self::reject(ctx, reply, err),
        }
    }

    /// Validates the context, then declines: totals are not tracked.
    pub(super) fn enumeration_count(
        &self,
        ctx: &OperationContext,
        enumeration_context: &str,
        reply: ReplyHandle,
    ) {
        let checked = self
            .contexts
            .find(enumeration_context)
            .ok_or_else(|| unknown_context(enumeration_context))
            .and_then(|context| context.check(&ctx.namespace));
        let err = match checked {
            Ok(()) => OperationError::not_supported("EnumerationCount is not supported"),
            Err(err) => err,
        };
        Self::reject(ctx, reply, err);
    }

    /// Looks up a client-supplied context and claims it for one operation.
    /// A context that fails admission is released if it is finished.
    fn admit(
        &self,
        ctx: &OperationContext,
        id: &str,
        kind: Option<PullKind>,
    ) -> Result<Arc<EnumerationContext>, OperationError> {
        let context = self.contexts.find(id).ok_or_else(|| unknown_context(id))?;
        if let Err(err) = context.begin(kind, &ctx.namespace) {
            self.contexts.release(&context);
            return Err(err);
        }
        Ok(context)
    }

    fn respond(
        &self,
        context: &Arc<EnumerationContext>,
        reply: ReplyHandle,
        max_object_count: u32,
        is_pull: bool,
    ) -> DispatchOutcome {
        match context.respond(reply, max_object_count, is_pull) {
            Respond::Ready(ready) => {
                ready.send();
                self.contexts.release(context);
                DispatchOutcome::Released
            }
            Respond::Stashed => DispatchOutcome::Retained,
        }
    }
}

fn unknown_context(id: &str) -> OperationError {
    OperationError::invalid_context(format!("unknown enumeration context {id:?}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wbem_core::messages::{
        EnumerationContextRequest, OpenAssociatorInstancesRequest, OpenEnumerateInstancePathsRequest,
        OpenEnumerateInstancesRequest, OpenQueryInstancesRequest,
    };
    use wbem_core::{ObjectPath, ResponseData, StatusCode};

    use super::*;
    use crate::service::operation::OperationResult;
    use crate::test_support::{
        disk, disk_path, name, open_or_pull, Behavior, Harness, ScriptedTransport, StaticRegistry,
    };

    fn open_devices(max: u32) -> CimRequest {
        CimRequest::OpenEnumerateInstances(OpenEnumerateInstancesRequest::new(
            name("Test_Device"),
            OpenOptions::with_max_object_count(max),
        ))
    }

    fn open_disks(max: u32) -> CimRequest {
        CimRequest::OpenEnumerateInstances(OpenEnumerateInstancesRequest::new(
            name("Test_Disk"),
            OpenOptions::with_max_object_count(max),
        ))
    }

    fn pull(context: &str, max: u32) -> CimRequest {
        CimRequest::PullInstancesWithPath(PullRequest::new(context, max))
    }

    fn held_disks() -> Harness {
        let registry =
            StaticRegistry::default().with_instance_provider("Test_Disk", "DiskModule", "DiskProvider");
        Harness::new(registry, ScriptedTransport::default().with("DiskProvider", Behavior::Hold))
    }

    fn instances(ids: std::ops::RangeInclusive<u64>) -> ResponseData {
        ResponseData::Instances(ids.map(disk).collect())
    }

    #[tokio::test]
    async fn open_then_pull_drains_two_providers() {
        let registry = StaticRegistry::default()
            .with_instance_provider("Test_Disk", "DiskModule", "A")
            .with_instance_provider("Test_Tape", "TapeModule", "B");
        let transport = ScriptedTransport::default()
            .with("A", Behavior::Data(vec![instances(1..=3)]))
            .with("B", Behavior::Data(vec![instances(11..=14)]));
        let h = Harness::new(registry, transport);

        let opened = open_or_pull(h.run(open_devices(5)).await);
        assert_eq!(opened.data.len(), 5);
        assert!(!opened.end_of_sequence);
        let context = opened.enumeration_context.expect("context id");
        assert!(context.parse::<u64>().unwrap() >= 500_000);

        let pulled = open_or_pull(h.run(pull(&context, 10)).await);
        assert_eq!(pulled.data.len(), 2);
        assert!(pulled.end_of_sequence);
        assert!(pulled.enumeration_context.is_none());
        assert!(h.dispatcher.contexts().is_empty());

        let err = h.run(pull(&context, 10)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidEnumerationContext);
    }

    #[tokio::test]
    async fn open_answered_entirely_from_store() {
        let h = Harness::new(StaticRegistry::default(), ScriptedTransport::default());
        let opened = open_or_pull(h.run(open_disks(10)).await);
        assert_eq!(opened.data.len(), 3);
        assert!(opened.end_of_sequence);
        assert!(opened.enumeration_context.is_none());
        assert!(h.dispatcher.contexts().is_empty());
        let ResponseData::Instances(items) = &opened.data else {
            panic!("expected instances");
        };
        assert!(items.iter().all(|i| i.path.as_ref().is_some_and(|p| p.host.is_some())));
    }

    /// One `Test_Disk` provider delivering `count` single-item chunks, with
    /// the response cache limited to two items.
    fn trickling_disks(count: u64) -> Harness {
        let registry =
            StaticRegistry::default().with_instance_provider("Test_Disk", "DiskModule", "DiskProvider");
        let chunks = (1..=count).map(|id| instances(id..=id)).collect();
        Harness::with_config(
            registry,
            ScriptedTransport::default().with("DiskProvider", Behavior::Data(chunks)),
            BrokerConfig {
                response_cache_max_size: 2,
                ..BrokerConfig::default()
            },
        )
    }

    async fn run_quickly(h: &Harness, request: CimRequest) -> OperationResult {
        tokio::time::timeout(Duration::from_secs(2), h.run(request))
            .await
            .expect("reply without waiting for the sweep")
    }

    #[tokio::test]
    async fn pull_larger_than_cache_limit_is_answered_by_providers() {
        let h = trickling_disks(6);
        let opened = open_or_pull(run_quickly(&h, open_disks(0)).await);
        assert!(opened.data.is_empty());
        let context = opened.enumeration_context.expect("context id");

        let pulled = open_or_pull(run_quickly(&h, pull(&context, 5)).await);
        assert_eq!(pulled.data.len(), 5);
        assert!(!pulled.end_of_sequence);

        let last = open_or_pull(run_quickly(&h, pull(&context, 5)).await);
        assert_eq!(last.data.len(), 1);
        assert!(last.end_of_sequence);
        assert!(h.dispatcher.contexts().is_empty());
        assert_eq!(h.dispatcher.contexts().statistics().forced_replies, 0);
    }

    #[tokio::test]
    async fn full_cache_pauses_provider_until_pulls_drain_it() {
        let h = trickling_disks(6);
        let opened = open_or_pull(run_quickly(&h, open_disks(2)).await);
        let mut received = opened.data.len();
        let context = opened.enumeration_context.expect("context id");

        let mut ended = false;
        for _ in 0..6 {
            let pulled = open_or_pull(run_quickly(&h, pull(&context, 2)).await);
            assert!(pulled.data.len() <= 2);
            received += pulled.data.len();
            if pulled.end_of_sequence {
                ended = true;
                break;
            }
        }
        assert!(ended);
        assert_eq!(received, 6);

        let stats = h.dispatcher.contexts().statistics();
        assert_eq!(stats.released, 1);
        assert_eq!(stats.cache_high_water, 2);
        assert_eq!(stats.forced_replies, 0);
    }

    #[tokio::test]
    async fn concurrent_pull_cannot_abandon() {
        let h = held_disks();
        let opened = open_or_pull(h.run(open_disks(0)).await);
        assert!(opened.data.is_empty());
        let context = opened.enumeration_context.expect("context id");

        let (outcome, first) = h.start(pull(&context, 5));
        assert_eq!(outcome, DispatchOutcome::Retained);
        let err = h.run(pull(&context, 5)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::PullCannotBeAbandoned);

        for responder in h.transport.take_held() {
            responder.deliver(instances(1..=2)).await.unwrap();
            responder.complete(Ok(OperationResponse::Empty)).await;
        }
        let pulled = open_or_pull(first.await.unwrap());
        assert_eq!(pulled.data.len(), 2);
        assert!(pulled.end_of_sequence);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_forces_empty_reply_after_wait() {
        let h = held_disks();
        let opened = open_or_pull(h.run(open_disks(0)).await);
        let context = opened.enumeration_context.expect("context id");
        let (outcome, pending) = h.start(pull(&context, 5));
        assert_eq!(outcome, DispatchOutcome::Retained);

        tokio::time::advance(Duration::from_secs(10)).await;
        let report = h.dispatcher.contexts().sweep(tokio::time::Instant::now());
        assert_eq!(report.forced_replies, 1);

        let forced = open_or_pull(pending.await.unwrap());
        assert!(forced.data.is_empty());
        assert!(!forced.end_of_sequence);
        assert_eq!(forced.enumeration_context.as_deref(), Some(context.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_context_times_out() {
        let h = held_disks();
        let options = OpenOptions {
            operation_timeout: Some(1),
            ..OpenOptions::with_max_object_count(0)
        };
        let opened = open_or_pull(
            h.run(CimRequest::OpenEnumerateInstances(OpenEnumerateInstancesRequest::new(
                name("Test_Disk"),
                options,
            )))
            .await,
        );
        let context = opened.enumeration_context.expect("context id");
        tokio::time::advance(Duration::from_secs(2)).await;
        let err = h.run(pull(&context, 5)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidEnumerationContext);
    }

    #[tokio::test]
    async fn pull_kind_must_match_open() {
        let h = held_disks();
        let opened = open_or_pull(
            h.run(CimRequest::OpenEnumerateInstancePaths(OpenEnumerateInstancePathsRequest {
                class_name: name("Test_Disk"),
                options: OpenOptions::default(),
            }))
            .await,
        );
        let context = opened.enumeration_context.expect("context id");
        let err = h.run(pull(&context, 5)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidEnumerationContext);

        let paths = h
            .run(CimRequest::PullInstancePaths(PullRequest::new(&context, 0)))
            .await;
        assert!(open_or_pull(paths).data.is_empty());
    }

    #[tokio::test]
    async fn pull_requires_max_object_count() {
        let h = held_disks();
        let err = h
            .run(CimRequest::PullInstancesWithPath(PullRequest {
                enumeration_context: "500000".into(),
                max_object_count: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidParameter);
    }

    #[tokio::test]
    async fn close_then_pull_is_invalid() {
        let h = held_disks();
        let opened = open_or_pull(h.run(open_disks(0)).await);
        let context = opened.enumeration_context.expect("context id");
        let closed = h
            .run(CimRequest::CloseEnumeration(EnumerationContextRequest {
                enumeration_context: context.clone(),
            }))
            .await
            .unwrap();
        assert_eq!(closed, OperationResponse::Empty);

        let err = h.run(pull(&context, 5)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidEnumerationContext);

        // the held provider completing lets the closed context go
        for responder in h.transport.take_held() {
            responder.complete(Ok(OperationResponse::Empty)).await;
        }
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(h.dispatcher.contexts().is_empty());
    }

    #[tokio::test]
    async fn enumeration_count_declined() {
        let h = held_disks();
        let opened = open_or_pull(h.run(open_disks(0)).await);
        let context = opened.enumeration_context.expect("context id");
        let err = h
            .run(CimRequest::EnumerationCount(EnumerationContextRequest {
                enumeration_context: context,
            }))
            .await
            .unwrap_err();
        assert!(err.is_not_supported());

        let err = h
            .run(CimRequest::EnumerationCount(EnumerationContextRequest {
                enumeration_context: "999".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidEnumerationContext);
    }

    #[tokio::test]
    async fn open_context_limit() {
        let registry =
            StaticRegistry::default().with_instance_provider("Test_Disk", "DiskModule", "DiskProvider");
        let h = Harness::with_config(
            registry,
            ScriptedTransport::default().with("DiskProvider", Behavior::Hold),
            BrokerConfig {
                max_open_contexts: 1,
                ..BrokerConfig::default()
            },
        );
        let opened = open_or_pull(h.run(open_disks(0)).await);
        assert!(opened.enumeration_context.is_some());
        let err = h.run(open_disks(0)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ServerLimitsExceeded);
    }

    #[tokio::test]
    async fn filtered_open_applies_filter() {
        let h = Harness::new(StaticRegistry::default(), ScriptedTransport::default());
        let options = OpenOptions {
            filter_query_language: Some("WQL".into()),
            filter_query: Some("SELECT * FROM Test_Disk WHERE DeviceID = 2".into()),
            ..OpenOptions::with_max_object_count(10)
        };
        let opened = open_or_pull(
            h.run(CimRequest::OpenEnumerateInstances(OpenEnumerateInstancesRequest::new(
                name("Test_Disk"),
                options,
            )))
            .await,
        );
        assert_eq!(opened.data.len(), 1);
        assert!(opened.end_of_sequence);
    }

    #[tokio::test]
    async fn open_query_instances_rules() {
        let h = Harness::new(StaticRegistry::default(), ScriptedTransport::default());
        let request = |return_class: bool, continue_on_error: bool| {
            CimRequest::OpenQueryInstances(OpenQueryInstancesRequest {
                filter_query_language: "WQL".into(),
                filter_query: "SELECT DeviceID FROM Test_Disk WHERE DeviceID = 3".into(),
                return_query_result_class: return_class,
                operation_timeout: None,
                continue_on_error,
                max_object_count: Some(10),
            })
        };
        let err = h.run(request(true, false)).await.unwrap_err();
        assert!(err.is_not_supported());
        let err = h.run(request(false, true)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ContinuationOnErrorNotSupported);

        let opened = open_or_pull(h.run(request(false, false)).await);
        let ResponseData::Instances(items) = &opened.data else {
            panic!("expected instances");
        };
        assert_eq!(items.len(), 1);
        assert!(items[0].path.is_none());
        assert!(items[0].property("Caption").is_none());
    }

    #[tokio::test]
    async fn association_open_needs_instance_anchor() {
        let h = Harness::new(StaticRegistry::default(), ScriptedTransport::default());
        let request = |anchor: ObjectPath| {
            CimRequest::OpenAssociatorInstances(OpenAssociatorInstancesRequest {
                instance_name: anchor,
                assoc_class: None,
                result_class: None,
                role: None,
                result_role: None,
                include_class_origin: false,
                property_list: PropertyList::all(),
                options: OpenOptions::with_max_object_count(10),
            })
        };
        let err = h
            .run(request(ObjectPath::new(name("Test_Disk"))))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidParameter);

        let opened = open_or_pull(h.run(request(disk_path(1))).await);
        assert_eq!(opened.data.len(), 1);
        assert!(opened.end_of_sequence);
    }
}
