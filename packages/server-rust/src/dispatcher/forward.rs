//! Sending request clones to providers and collecting their responses.

use std::sync::Arc;

use tokio::sync::mpsc;
use wbem_core::messages::CimRequest;
use wbem_core::{CimName, NamespaceName, ResponseData, StatusCode};

use super::Dispatcher;
use crate::aggregate::{
    AggregateSettings, AggregateSink, Delivery, OperationAggregate, SourcePartial,
};
use crate::directory::{ProviderInfo, ProviderInfoList};
use crate::enumeration::EnumerationTable;
use crate::service::config::BrokerConfig;
use crate::service::envelope::ReplyHandle;
use crate::service::operation::{OperationContext, OperationError, OperationResult};
use crate::traits::{ProviderRequest, ProviderResponder, ProviderResponse};

/// One multi-source request: which classes, how results are shaped, and
/// where they go.
pub(super) struct FanOut<'a> {
    pub operation: &'static str,
    pub list: &'a ProviderInfoList,
    pub settings: AggregateSettings,
    pub sink: AggregateSink,
    /// Run the query filter over object store results.
    pub filter_store: bool,
}

fn provider_label(info: &ProviderInfo) -> String {
    match (&info.identity, &info.destination) {
        (Some(identity), _) => identity.provider_name.clone(),
        (None, Some(dest)) => dest
            .control_provider
            .clone()
            .unwrap_or_else(|| dest.service.clone()),
        (None, None) => "object store".to_string(),
    }
}

fn channel_closed(provider: &str) -> OperationError {
    OperationError::from_provider(
        StatusCode::Failed,
        format!("provider {provider} closed its response channel without completing"),
    )
}

impl Dispatcher {
    /// Builds the clone of `operation` addressed to `info`.
    fn provider_request(
        ctx: &OperationContext,
        info: &ProviderInfo,
        operation: CimRequest,
    ) -> ProviderRequest {
        let context = match &info.identity {
            Some(identity) => ctx.request.for_provider(identity.clone()),
            None => ctx.request.clone(),
        };
        ProviderRequest {
            correlation_id: ctx.call_id,
            namespace: ctx.namespace.clone(),
            class_name: info.class_name.clone(),
            context,
            normalize: info.has_normalization,
            operation,
        }
    }

    fn send_to_provider(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        info: &ProviderInfo,
        operation: CimRequest,
    ) -> Option<mpsc::Receiver<ProviderResponse>> {
        let destination = info.destination.as_ref()?;
        let (responder, rx) =
            ProviderResponder::channel(ctx.call_id, config.provider_channel_capacity);
        let request = Self::provider_request(ctx, info, operation);
        tracing::debug!(
            call_id = ctx.call_id,
            class = %info.class_name,
            service = %destination.service,
            provider = %provider_label(info),
            "forwarding to provider"
        );
        metrics::counter!("wbem_provider_requests_total", "service" => destination.service.clone())
            .increment(1);
        self.transport.send(destination, request, responder);
        Some(rx)
    }

    /// Forwards a single-target request and relays the provider's final
    /// result to `reply`.
    pub(super) fn forward_single(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        info: &ProviderInfo,
        operation: CimRequest,
        reply: ReplyHandle,
    ) {
        let Some(mut rx) = self.send_to_provider(ctx, config, info, operation) else {
            reply.send(Err(OperationError::internal("provider has no destination")));
            return;
        };
        let provider = provider_label(info);
        tokio::spawn(async move {
            let result: OperationResult = loop {
                match rx.recv().await {
                    Some(response) if response.complete => break response.result,
                    Some(_) => {}
                    None => break Err(channel_closed(&provider)),
                }
            };
            reply.send(result);
        });
    }

    /// Starts an aggregate over the providers in `plan.list`, plus the
    /// object store as one more source for unresolved classes when it is
    /// the default instance provider.
    ///
    /// Store results are delivered before any provider is contacted.
    pub(super) fn fan_out<S, P>(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        plan: FanOut<'_>,
        store_seed: Option<S>,
        provider_request: P,
    ) where
        S: Fn(&CimName) -> Result<ResponseData, OperationError>,
        P: Fn(&ProviderInfo) -> (CimRequest, bool),
    {
        let FanOut {
            operation,
            list,
            settings,
            sink,
            filter_store,
        } = plan;
        let content_kind = settings.content_kind;
        let store_classes: Vec<&CimName> = match &store_seed {
            Some(_) if self.store.is_default_instance_provider() => {
                list.unresolved().map(|e| &e.class_name).collect()
            }
            _ => Vec::new(),
        };
        let store_source = !store_classes.is_empty();
        let expected = list.provider_count() + usize::from(store_source);
        let aggregate = Arc::new(OperationAggregate::new(
            ctx.call_id,
            operation,
            expected,
            settings,
            sink,
        ));
        tracing::debug!(
            call_id = ctx.call_id,
            operation,
            providers = list.provider_count(),
            store_classes = store_classes.len(),
            "fan-out"
        );

        if expected == 0 {
            finish(&self.contexts, aggregate.complete_empty());
            return;
        }

        if let (true, Some(seed)) = (store_source, store_seed.as_ref()) {
            let mut merged = ResponseData::empty(content_kind);
            let mut error = None;
            for class in store_classes {
                match seed(class).and_then(|d| {
                    d.into_kind(content_kind)
                        .map_err(|e| OperationError::internal(e.to_string()))
                }) {
                    Ok(data) => {
                        if let Err(e) = merged.append(data) {
                            error.get_or_insert(OperationError::internal(e.to_string()));
                        }
                    }
                    Err(err) => {
                        tracing::debug!(class = %class, error = %err, "object store source failed");
                        error.get_or_insert(err);
                    }
                }
            }
            let result = match error {
                Some(err) => Err(err),
                None => Ok(merged),
            };
            let partial = SourcePartial::complete(result).filtered(filter_store);
            finish(&self.contexts, aggregate.deliver(partial));
        }

        for info in list.providers() {
            let (request, apply_filter) = provider_request(info);
            match self.send_to_provider(ctx, config, info, request) {
                Some(rx) => spawn_collector(
                    Arc::clone(&aggregate),
                    Arc::clone(&self.contexts),
                    rx,
                    apply_filter,
                    provider_label(info),
                ),
                None => {
                    let partial = SourcePartial::complete(Err(OperationError::internal(
                        "provider has no destination",
                    )));
                    finish(&self.contexts, aggregate.deliver(partial));
                }
            }
        }
    }

    /// Object store results for one unresolved class of a fan-out.
    pub(super) fn store_source(
        &self,
        ns: &NamespaceName,
        request: &CimRequest,
        class: &CimName,
    ) -> Result<ResponseData, OperationError> {
        match request.with_target_class(class) {
            CimRequest::EnumerateInstances(req) => self
                .store
                .enumerate_instances_for_class(ns, &req)
                .map(ResponseData::Instances),
            CimRequest::EnumerateInstanceNames(req) => self
                .store
                .enumerate_instance_names_for_class(ns, &req.class_name)
                .map(ResponseData::Paths),
            other => self.traverse_store(ns, &other),
        }
    }
}

/// Sends a ready reply and releases the context if it is done.
fn finish(contexts: &EnumerationTable, mut delivery: Delivery) {
    delivery.send_ready();
    if let Some(ctx) = &delivery.context {
        contexts.release(ctx);
    }
}

/// Drains one provider's response channel into the aggregate.
fn spawn_collector(
    aggregate: Arc<OperationAggregate>,
    contexts: Arc<EnumerationTable>,
    mut rx: mpsc::Receiver<ProviderResponse>,
    apply_filter: bool,
    provider: String,
) {
    let kind = aggregate.settings().content_kind;
    tokio::spawn(async move {
        loop {
            let partial = match rx.recv().await {
                Some(response) => {
                    if response.correlation_id != aggregate.correlation_id() {
                        tracing::warn!(
                            provider = %provider,
                            expected = aggregate.correlation_id(),
                            got = response.correlation_id,
                            "response with foreign correlation id"
                        );
                    }
                    SourcePartial::from_response(response.result, response.complete, kind)
                }
                None => {
                    tracing::warn!(provider = %provider, "provider response channel closed early");
                    SourcePartial::complete(Err(channel_closed(&provider)))
                }
            }
            .filtered(apply_filter);
            let complete = partial.complete;

            let delivery = aggregate.deliver(partial);
            let wait_on = delivery
                .wait_for_space
                .then(|| delivery.context.clone())
                .flatten();
            finish(&contexts, delivery);

            if complete || aggregate.is_finished() {
                break;
            }
            if let Some(ctx) = wait_on {
                ctx.wait_for_cache_space().await;
            }
        }
    });
}
