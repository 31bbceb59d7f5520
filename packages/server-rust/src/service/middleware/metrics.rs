//! Metrics middleware for operations.
//!
//! Counts every operation by service, outcome and status code, records
//! its latency in a histogram, and logs completion inside an `operation` span.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Operation, OperationError, OperationResponse};

/// Status label for an operation result; errors use their `CIM_ERR_*` symbol.
fn status_label(result: &Result<OperationResponse, OperationError>) -> &'static str {
    result
        .as_ref()
        .err()
        .map_or("CIM_ERR_SUCCESS", |err| err.status_code().symbol())
}

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments operations with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records operation duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Operation> for MetricsService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let service_name = op.ctx().service_name;
        let call_id = op.ctx().call_id;
        let operation = op.request.name();

        let span = info_span!(
            "operation",
            service = service_name,
            operation,
            call_id,
            trace_id = %op.ctx().request.trace_id,
            duration_ms = tracing::field::Empty,
            status = tracing::field::Empty,
        );

        let fut = self.inner.call(op);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let status = status_label(&result);
                let outcome = if result.is_ok() { "ok" } else { "error" };

                metrics::counter!(
                    "wbem_operations_total",
                    "service" => service_name,
                    "outcome" => outcome,
                    "status" => status
                )
                .increment(1);
                metrics::histogram!(
                    "wbem_operation_duration_seconds",
                    "service" => service_name,
                    "outcome" => outcome
                )
                .record(elapsed.as_secs_f64());

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("status", status);

                match &result {
                    Ok(_) => tracing::debug!(duration_ms, "operation complete"),
                    Err(err) => tracing::info!(duration_ms, error = %err, "operation failed"),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
