//! The assembled broker: classifier, operation pipeline and managed domain
//! services around one [`Dispatcher`].

use std::sync::Arc;

use arc_swap::ArcSwap;
use tower::{Service, ServiceExt};
use wbem_core::messages::CimRequest;
use wbem_core::RequestContext;

use crate::dispatcher::Dispatcher;
use crate::enumeration::TableStatistics;
use crate::service::domain::{
    AssociationService, ClassService, EnumerationService, InstanceService, MethodService,
    QueryService,
};
use crate::service::middleware::{build_operation_pipeline, LoadShedLayer, OperationPipeline};
use crate::service::operation::{service_names, Operation, OperationError, OperationResult};
use crate::service::{OperationRouter, OperationService, ServiceContext, ServiceRegistry};

/// Broker lifecycle.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Services not yet initialized; requests are refused.
    Starting,
    Ready,
    /// Shutdown in progress; new requests get `ServerIsShuttingDown`.
    Draining,
    Stopped,
}

/// Entry point for callers that hold decoded requests.
///
/// Follows a deferred startup pattern:
/// 1. `new()` -- builds the router, pipeline and service registry
/// 2. `start()` -- initializes services (starts the enumeration sweep)
/// 3. `execute()` -- classifies and runs requests until `shutdown()`
pub struct Broker {
    dispatcher: Arc<Dispatcher>,
    classifier: OperationService,
    services: ServiceRegistry,
    pipeline: tokio::sync::Mutex<OperationPipeline>,
    load_shed: LoadShedLayer,
    state: ArcSwap<BrokerState>,
}

impl Broker {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let services = ServiceRegistry::new();
        let mut router = OperationRouter::new();

        router.register(
            service_names::CLASS,
            services.register(ClassService::new(Arc::clone(&dispatcher))),
        );
        router.register(
            service_names::INSTANCE,
            services.register(InstanceService::new(Arc::clone(&dispatcher))),
        );
        router.register(
            service_names::ASSOCIATION,
            services.register(AssociationService::new(Arc::clone(&dispatcher))),
        );
        router.register(
            service_names::QUERY,
            services.register(QueryService::new(Arc::clone(&dispatcher))),
        );
        router.register(
            service_names::METHOD,
            services.register(MethodService::new(Arc::clone(&dispatcher))),
        );
        router.register(
            service_names::ENUMERATION,
            services.register(EnumerationService::new(Arc::clone(&dispatcher))),
        );

        tracing::debug!(services = ?router.names(), "operation router built");
        let load_shed = LoadShedLayer::new(dispatcher.config().max_concurrent_operations);
        let pipeline = build_operation_pipeline(router, load_shed.clone());
        Self {
            dispatcher,
            classifier: OperationService::new(),
            services,
            pipeline: tokio::sync::Mutex::new(pipeline),
            load_shed,
            state: ArcSwap::from_pointee(BrokerState::Starting),
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn state(&self) -> BrokerState {
        **self.state.load()
    }

    /// Enumeration context statistics, open and historical.
    #[must_use]
    pub fn statistics(&self) -> TableStatistics {
        self.dispatcher.contexts().statistics()
    }

    /// Operations admitted and not yet answered, parked pulls included.
    #[must_use]
    pub fn operations_in_flight(&self) -> usize {
        self.load_shed.in_flight()
    }

    /// Initializes every domain service and opens the broker for requests.
    ///
    /// # Errors
    ///
    /// Fails when called twice or when a service fails to initialize.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.state() != BrokerState::Starting {
            anyhow::bail!("broker already started");
        }
        self.services
            .init_all(&ServiceContext::new(Arc::clone(&self.dispatcher)))
            .await?;
        self.state.store(Arc::new(BrokerState::Ready));
        tracing::info!(
            host = %self.dispatcher.config().host_name,
            services = ?self.services.names(),
            "broker ready"
        );
        Ok(())
    }

    /// Classifies `request` and runs it through the pipeline.
    ///
    /// # Errors
    ///
    /// Every failure is an [`OperationError`]; its `status_code()` is what
    /// the client should see.
    pub async fn execute(
        &self,
        namespace: &str,
        request: CimRequest,
        caller: RequestContext,
    ) -> OperationResult {
        match self.state() {
            BrokerState::Ready => {}
            BrokerState::Starting => return Err(OperationError::internal("broker not started")),
            BrokerState::Draining | BrokerState::Stopped => {
                return Err(OperationError::ShuttingDown)
            }
        }
        let op = self.classifier.classify(namespace, request, caller)?;

        // The lock only covers readiness and the call; the returned future
        // runs without it so operations proceed concurrently.
        let fut = {
            let mut pipeline = self.pipeline.lock().await;
            ServiceExt::<Operation>::ready(&mut *pipeline).await?.call(op)
        };
        fut.await
    }

    /// Stops accepting requests and shuts services down in reverse order.
    /// Requests parked on enumeration contexts are answered with
    /// `ServerIsShuttingDown`.
    ///
    /// # Errors
    ///
    /// Returns the first service shutdown failure; the broker still ends
    /// up stopped.
    pub async fn shutdown(&self, terminate: bool) -> anyhow::Result<()> {
        self.state.store(Arc::new(BrokerState::Draining));
        tracing::info!(terminate, "broker draining");
        let result = self.services.shutdown_all(terminate).await;
        self.state.store(Arc::new(BrokerState::Stopped));
        tracing::info!("broker stopped");
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
