//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::util::BoxService;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::service::router::OperationRouter;

/// The assembled operation pipeline.
pub type OperationPipeline = BoxService<Operation, OperationResponse, OperationError>;

/// Build the operation pipeline by wrapping the `OperationRouter` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `MetricsLayer` -- record timing and outcome (closest to the actual handler)
///
/// The caller keeps a clone of `load_shed` to observe operations in flight.
/// There is no per-operation timeout layer: paginated requests may be parked
/// on their enumeration context and are bounded by the context sweep instead.
#[must_use]
pub fn build_operation_pipeline(router: OperationRouter, load_shed: LoadShedLayer) -> OperationPipeline {
    BoxService::new(
        ServiceBuilder::new()
            .layer(load_shed)
            .layer(MetricsLayer)
            .service(router),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
