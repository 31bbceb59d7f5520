//! Domain services.
//!
//! Each service implements both `ManagedService` (lifecycle) and
//! `tower::Service<Operation>` (request handling). Request handling is the
//! same for every domain: the operation is wrapped in an envelope, handed to
//! the shared [`Dispatcher`], and the future resolves when its reply handle
//! is answered. The enumeration service additionally owns the timeout sweep.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tower::Service;

use crate::dispatcher::Dispatcher;
use crate::enumeration::{ContextSweeper, SweepTask};
use crate::service::classify::service_for;
use crate::service::envelope::{DispatchOutcome, ReplyHandle, RequestEnvelope};
use crate::service::operation::{service_names, Operation, OperationError, OperationResponse};
use crate::service::registry::{ManagedService, ServiceContext};
use crate::service::worker::BackgroundWorker;

type DispatchFuture = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

/// Hands `op` to the dispatcher and waits for its reply.
fn dispatch(dispatcher: &Arc<Dispatcher>, service_name: &'static str, op: Operation) -> DispatchFuture {
    if service_for(&op.request) != service_name {
        tracing::warn!(
            service = service_name,
            operation = op.request.name(),
            "operation routed to the wrong service"
        );
        return Box::pin(async { Err(OperationError::WrongService) });
    }
    let dispatcher = Arc::clone(dispatcher);
    Box::pin(async move {
        let call_id = op.ctx.call_id;
        let (reply, rx) = ReplyHandle::channel(call_id);
        if dispatcher.dispatch(RequestEnvelope::new(op, reply)) == DispatchOutcome::Retained {
            tracing::trace!(call_id, "request parked on its enumeration context");
        }
        rx.await
            .map_err(|_| OperationError::internal(format!("call {call_id} dropped its reply")))?
    })
}

// ---------------------------------------------------------------------------
// Macro for the stateless domains
// ---------------------------------------------------------------------------

/// Generate a stateless domain service with the given name and service constant.
macro_rules! domain_service {
    (
        $(#[$meta:meta])*
        $name:ident, $svc_name:expr
    ) => {
        $(#[$meta])*
        pub struct $name {
            dispatcher: Arc<Dispatcher>,
        }

        impl $name {
            #[must_use]
            pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
                Self { dispatcher }
            }
        }

        #[async_trait]
        impl ManagedService for $name {
            fn name(&self) -> &'static str {
                $svc_name
            }

            async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
                Ok(())
            }

            async fn reset(&self) -> anyhow::Result<()> {
                Ok(())
            }

            async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
                Ok(())
            }
        }

        impl Service<Operation> for Arc<$name> {
            type Response = OperationResponse;
            type Error = OperationError;
            type Future = DispatchFuture;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, op: Operation) -> Self::Future {
                dispatch(&self.dispatcher, $svc_name, op)
            }
        }
    };
}

domain_service!(
    /// Class and qualifier declarations, answered by the object store.
    ClassService, service_names::CLASS
);

domain_service!(
    /// Single-target and enumerating instance operations.
    InstanceService, service_names::INSTANCE
);

domain_service!(
    /// Associators and References, including their name-only variants.
    AssociationService, service_names::ASSOCIATION
);

domain_service!(
    /// `ExecQuery`.
    QueryService, service_names::QUERY
);

domain_service!(
    /// Extrinsic method invocation.
    MethodService, service_names::METHOD
);

// ---------------------------------------------------------------------------
// EnumerationService
// ---------------------------------------------------------------------------

/// The Open/Pull/Close family. Owns the worker that sweeps enumeration
/// contexts for timeouts.
pub struct EnumerationService {
    dispatcher: Arc<Dispatcher>,
    sweeper: tokio::sync::Mutex<Option<BackgroundWorker<ContextSweeper>>>,
}

impl EnumerationService {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            sweeper: tokio::sync::Mutex::new(None),
        }
    }

    /// True while the sweep worker runs.
    pub async fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .await
            .as_ref()
            .is_some_and(BackgroundWorker::is_running)
    }

    /// Asks the sweep worker to run `task` now.
    ///
    /// # Errors
    ///
    /// Fails when the service has not been initialized or has shut down.
    pub async fn submit(&self, task: SweepTask) -> anyhow::Result<()> {
        match self.sweeper.lock().await.as_ref() {
            Some(worker) => worker.submit(task).await,
            None => Err(anyhow::anyhow!("enumeration sweeper not running")),
        }
    }
}

#[async_trait]
impl ManagedService for EnumerationService {
    fn name(&self) -> &'static str {
        service_names::ENUMERATION
    }

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            anyhow::bail!("enumeration service initialized twice");
        }
        let period = ctx.config.pull_max_operation_wait;
        *sweeper = Some(BackgroundWorker::start(
            ContextSweeper::new(Arc::clone(self.dispatcher.contexts())),
            period,
        ));
        tracing::info!(period_ms = period.as_millis(), "enumeration sweeper started");
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        let removed = self.dispatcher.contexts().remove_all();
        tracing::info!(removed, "enumeration contexts reset");
        Ok(())
    }

    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()> {
        if let Some(mut worker) = self.sweeper.lock().await.take() {
            if !terminate {
                // Final statistics line before the worker goes away.
                let _ = worker.submit(SweepTask::LogStatistics).await;
            }
            worker.stop().await;
        }
        let removed = self.dispatcher.contexts().remove_all();
        tracing::info!(removed, "enumeration service stopped");
        Ok(())
    }
}

impl Service<Operation> for Arc<EnumerationService> {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        dispatch(&self.dispatcher, service_names::ENUMERATION, op)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;
    use wbem_core::messages::{
        CimRequest, EnumerateInstancesRequest, GetClassRequest, OpenEnumerateInstancesRequest,
        OpenOptions, PullRequest,
    };
    use wbem_core::StatusCode;

    use super::*;
    use crate::service::operation::OperationContext;
    use crate::test_support::{
        harness, name, ns, open_or_pull, Behavior, Harness, ScriptedTransport, StaticRegistry,
        TEST_NAMESPACE,
    };

    fn make_op(service_name: &'static str, request: CimRequest) -> Operation {
        Operation {
            ctx: OperationContext::new(9, service_name, ns(TEST_NAMESPACE)),
            request,
        }
    }

    fn held_tape_harness() -> Harness {
        Harness::new(
            StaticRegistry::default().with_instance_provider("Test_Tape", "TapeModule", "TapeProvider"),
            ScriptedTransport::default().with("TapeProvider", Behavior::Hold),
        )
    }

    fn open_tapes(max: u32) -> CimRequest {
        CimRequest::OpenEnumerateInstances(OpenEnumerateInstancesRequest::new(
            name("Test_Tape"),
            OpenOptions::with_max_object_count(max),
        ))
    }

    #[tokio::test]
    async fn class_service_answers_from_store() {
        let h = harness();
        let svc = Arc::new(ClassService::new(Arc::clone(&h.dispatcher)));
        let resp = svc
            .oneshot(make_op(
                service_names::CLASS,
                CimRequest::GetClass(GetClassRequest::new(name("Test_Disk"))),
            ))
            .await
            .unwrap();
        let OperationResponse::Class(class) = resp else {
            panic!("expected a class, got {resp:?}");
        };
        assert_eq!(class.name, name("Test_Disk"));
    }

    #[tokio::test]
    async fn request_for_another_domain_rejected() {
        let h = harness();
        let svc = Arc::new(ClassService::new(Arc::clone(&h.dispatcher)));
        let err = svc
            .oneshot(make_op(
                service_names::CLASS,
                CimRequest::EnumerateInstances(EnumerateInstancesRequest::new(name("Test_Disk"))),
            ))
            .await
            .unwrap_err();
        assert_eq!(err, OperationError::WrongService);
        assert_eq!(err.status_code(), StatusCode::Failed);
    }

    #[tokio::test]
    async fn submit_before_init_fails() {
        let h = harness();
        let svc = EnumerationService::new(Arc::clone(&h.dispatcher));
        assert!(!svc.is_sweeping().await);
        assert!(svc.submit(SweepTask::SweepNow).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retained_pull_answered_by_sweeper() {
        let h = held_tape_harness();
        let svc = Arc::new(EnumerationService::new(Arc::clone(&h.dispatcher)));
        svc.init(&ServiceContext::new(Arc::clone(&h.dispatcher)))
            .await
            .unwrap();
        assert!(svc.is_sweeping().await);

        let opened = open_or_pull(
            Arc::clone(&svc)
                .oneshot(make_op(service_names::ENUMERATION, open_tapes(0)))
                .await,
        );
        let id = opened.enumeration_context.expect("open context");

        // Nothing is cached and the provider never answers, so the pull
        // waits for the sweep and gets an empty, non-final reply.
        let pulled = open_or_pull(
            Arc::clone(&svc)
                .oneshot(make_op(
                    service_names::ENUMERATION,
                    CimRequest::PullInstancesWithPath(PullRequest::new(id.clone(), 5)),
                ))
                .await,
        );
        assert!(pulled.data.is_empty());
        assert!(!pulled.end_of_sequence);
        assert_eq!(pulled.enumeration_context, Some(id));

        svc.shutdown(false).await.unwrap();
        assert!(!svc.is_sweeping().await);
    }

    #[tokio::test]
    async fn shutdown_releases_open_contexts() {
        let h = held_tape_harness();
        let svc = Arc::new(EnumerationService::new(Arc::clone(&h.dispatcher)));
        svc.init(&ServiceContext::new(Arc::clone(&h.dispatcher)))
            .await
            .unwrap();
        assert!(svc
            .init(&ServiceContext::new(Arc::clone(&h.dispatcher)))
            .await
            .is_err());

        let _ = open_or_pull(
            Arc::clone(&svc)
                .oneshot(make_op(service_names::ENUMERATION, open_tapes(0)))
                .await,
        );
        assert_eq!(h.dispatcher.contexts().len(), 1);

        svc.shutdown(false).await.unwrap();
        assert!(h.dispatcher.contexts().is_empty());
    }
}
