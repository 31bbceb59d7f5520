//! Dispatch core: validates each request, resolves its providers, and
//! answers it from the object store, one provider, or an aggregate of many.

mod association;
mod class;
mod forward;
mod instance;
mod pull;
mod query;
pub mod validate;

use std::sync::Arc;

use arc_swap::ArcSwap;
use wbem_core::messages::CimRequest;

use crate::directory::ProviderDirectory;
use crate::enumeration::EnumerationTable;
use crate::enumeration::PullKind;
use crate::service::config::{BrokerConfig, ConfigError};
use crate::service::envelope::{DispatchOutcome, ReplyHandle, RequestEnvelope};
use crate::service::operation::{Operation, OperationContext, OperationError};
use crate::traits::{FilterCompiler, ObjectStore, ProviderRegistry, ProviderTransport};

/// Routes classified operations to the store and providers.
///
/// Every call to [`Dispatcher::dispatch`] answers its reply handle exactly
/// once: directly, from a provider collector task, or (for paginated
/// requests) when its enumeration context can satisfy it.
pub struct Dispatcher {
    store: Arc<dyn ObjectStore>,
    directory: ProviderDirectory,
    transport: Arc<dyn ProviderTransport>,
    filters: Option<Arc<dyn FilterCompiler>>,
    config: ArcSwap<BrokerConfig>,
    contexts: Arc<EnumerationTable>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<dyn ProviderRegistry>,
        transport: Arc<dyn ProviderTransport>,
        filters: Option<Arc<dyn FilterCompiler>>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            directory: ProviderDirectory::new(Arc::clone(&store), registry),
            store,
            transport,
            filters,
            config: ArcSwap::from_pointee(config),
            contexts: Arc::new(EnumerationTable::new()),
        }
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> Arc<BrokerConfig> {
        self.config.load_full()
    }

    /// Applies one runtime property. In-flight requests keep the snapshot
    /// they started with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unknown properties and invalid values.
    pub fn update_property(&self, name: &str, value: &str) -> Result<(), ConfigError> {
        let mut next = BrokerConfig::clone(&self.config.load());
        next.apply(name, value)?;
        self.config.store(Arc::new(next));
        tracing::info!(property = name, value, "configuration property updated");
        Ok(())
    }

    #[must_use]
    pub fn contexts(&self) -> &Arc<EnumerationTable> {
        &self.contexts
    }

    #[must_use]
    pub fn directory(&self) -> &ProviderDirectory {
        &self.directory
    }

    /// Dispatches one envelope.
    pub fn dispatch(&self, envelope: RequestEnvelope) -> DispatchOutcome {
        let RequestEnvelope { operation, reply } = envelope;
        let Operation { ctx, request } = operation;
        let config = self.config.load_full();
        tracing::debug!(
            call_id = ctx.call_id,
            operation = request.name(),
            namespace = %ctx.namespace,
            "dispatching"
        );

        match request {
            CimRequest::GetClass(_)
            | CimRequest::EnumerateClasses(_)
            | CimRequest::EnumerateClassNames(_)
            | CimRequest::CreateClass(_)
            | CimRequest::ModifyClass(_)
            | CimRequest::DeleteClass(_)
            | CimRequest::GetQualifier(_)
            | CimRequest::SetQualifier(_)
            | CimRequest::DeleteQualifier(_)
            | CimRequest::EnumerateQualifiers(_) => {
                reply.send(self.class_operation(&ctx, request));
                DispatchOutcome::Released
            }

            CimRequest::GetInstance(_)
            | CimRequest::CreateInstance(_)
            | CimRequest::ModifyInstance(_)
            | CimRequest::DeleteInstance(_)
            | CimRequest::GetProperty(_)
            | CimRequest::SetProperty(_)
            | CimRequest::InvokeMethod(_) => {
                self.single_target(&ctx, &config, request, reply);
                DispatchOutcome::Released
            }

            CimRequest::EnumerateInstances(req) => {
                self.enumerate_instances(&ctx, &config, req, reply);
                DispatchOutcome::Released
            }
            CimRequest::EnumerateInstanceNames(req) => {
                self.enumerate_instance_names(&ctx, &config, req, reply);
                DispatchOutcome::Released
            }

            CimRequest::Associators(_)
            | CimRequest::AssociatorNames(_)
            | CimRequest::References(_)
            | CimRequest::ReferenceNames(_) => {
                self.association(&ctx, &config, request, reply);
                DispatchOutcome::Released
            }

            CimRequest::ExecQuery(req) => {
                self.exec_query(&ctx, &config, req, reply);
                DispatchOutcome::Released
            }

            CimRequest::OpenEnumerateInstances(_)
            | CimRequest::OpenEnumerateInstancePaths(_)
            | CimRequest::OpenReferenceInstances(_)
            | CimRequest::OpenReferenceInstancePaths(_)
            | CimRequest::OpenAssociatorInstances(_)
            | CimRequest::OpenAssociatorInstancePaths(_)
            | CimRequest::OpenQueryInstances(_) => self.open(&ctx, &config, request, reply),

            CimRequest::PullInstancesWithPath(req) => {
                self.pull(&ctx, &config, PullKind::InstancesWithPath, req, reply)
            }
            CimRequest::PullInstancePaths(req) => {
                self.pull(&ctx, &config, PullKind::InstancePaths, req, reply)
            }
            CimRequest::PullInstances(req) => {
                self.pull(&ctx, &config, PullKind::Instances, req, reply)
            }
            CimRequest::CloseEnumeration(req) => {
                self.close_enumeration(&ctx, &req.enumeration_context, reply);
                DispatchOutcome::Released
            }
            CimRequest::EnumerationCount(req) => {
                self.enumeration_count(&ctx, &req.enumeration_context, reply);
                DispatchOutcome::Released
            }
        }
    }

    /// Fails the request and releases it.
    fn reject(ctx: &OperationContext, reply: ReplyHandle, err: OperationError) {
        tracing::debug!(call_id = ctx.call_id, error = %err, "request rejected");
        reply.send(Err(err));
    }
}
