//! `ExecQuery`: compiled once by the broker, evaluated by providers that
//! can, and by the broker over plain enumerations for those that cannot.

use std::sync::Arc;

use wbem_core::messages::{CimRequest, EnumerateInstancesRequest, ExecQueryRequest};
use wbem_core::{CimName, ContentKind};

use super::forward::FanOut;
use super::Dispatcher;
use crate::aggregate::{AggregateSettings, AggregateSink};
use crate::directory::ProviderInfo;
use crate::service::config::BrokerConfig;
use crate::service::envelope::ReplyHandle;
use crate::service::operation::{OperationContext, OperationError};
use crate::traits::QueryFilter;

impl Dispatcher {
    pub(super) fn exec_query(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        req: ExecQueryRequest,
        reply: ReplyHandle,
    ) {
        let filter = match self.compile_query(ctx, &req.query_language, &req.query) {
            Ok(filter) => filter,
            Err(err) => return Self::reject(ctx, reply, err),
        };
        let class = filter.class_name().clone();
        let list = match self.resolve_instance_providers(ctx, config, &class) {
            Ok(list) => list,
            Err(err) => return Self::reject(ctx, reply, err),
        };
        tracing::debug!(
            call_id = ctx.call_id,
            class = %class,
            language = filter.language(),
            "query resolved"
        );
        let settings = AggregateSettings::new(
            ContentKind::Instances,
            config.host_name.clone(),
            ctx.namespace.clone(),
        )
        .with_filter(filter, true);
        let enumeration = CimRequest::EnumerateInstances(EnumerateInstancesRequest::new(class));
        let query = CimRequest::ExecQuery(req);
        self.fan_out(
            ctx,
            config,
            FanOut {
                operation: "ExecQuery",
                list: &list,
                settings,
                sink: AggregateSink::Reply(reply),
                filter_store: true,
            },
            Some(|class: &CimName| self.store_source(&ctx.namespace, &enumeration, class)),
            |info| query_clone(info, &query, &enumeration),
        );
    }

    /// Compiles `query` with the configured compiler.
    ///
    /// # Errors
    ///
    /// `QueryLanguageNotSupported` without a compiler or for an unknown
    /// language, `InvalidQuery` for bad query text.
    pub(super) fn compile_query(
        &self,
        ctx: &OperationContext,
        language: &str,
        query: &str,
    ) -> Result<Arc<dyn QueryFilter>, OperationError> {
        let compiler = self
            .filters
            .as_ref()
            .ok_or_else(|| OperationError::QueryLanguageNotSupported {
                language: language.to_string(),
            })?;
        Ok(compiler.compile(language, query, &ctx.namespace)?)
    }
}

/// Providers that evaluate queries get the query; the rest get a plain
/// enumeration of their class and the broker filters what they return.
pub(super) fn query_clone(
    info: &ProviderInfo,
    query: &CimRequest,
    enumeration: &CimRequest,
) -> (CimRequest, bool) {
    if info.has_no_query {
        (enumeration.with_target_class(&info.class_name), true)
    } else {
        (query.clone(), false)
    }
}
