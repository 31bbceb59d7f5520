//! Request classification: turns a decoded `CimRequest` and its caller
//! context into a routable `Operation`.

use std::sync::atomic::{AtomicU64, Ordering};

use wbem_core::messages::CimRequest;
use wbem_core::{NamespaceName, RequestContext};

use super::operation::{service_names, ClassifyError, Operation, OperationContext};

/// Domain service that owns `request`.
#[must_use]
pub fn service_for(request: &CimRequest) -> &'static str {
    match request {
        // ----- Class and qualifier operations -----
        CimRequest::GetClass(_)
        | CimRequest::EnumerateClasses(_)
        | CimRequest::EnumerateClassNames(_)
        | CimRequest::CreateClass(_)
        | CimRequest::ModifyClass(_)
        | CimRequest::DeleteClass(_)
        | CimRequest::GetQualifier(_)
        | CimRequest::SetQualifier(_)
        | CimRequest::DeleteQualifier(_)
        | CimRequest::EnumerateQualifiers(_) => service_names::CLASS,

        // ----- Instance operations -----
        CimRequest::GetInstance(_)
        | CimRequest::EnumerateInstances(_)
        | CimRequest::EnumerateInstanceNames(_)
        | CimRequest::CreateInstance(_)
        | CimRequest::ModifyInstance(_)
        | CimRequest::DeleteInstance(_)
        | CimRequest::GetProperty(_)
        | CimRequest::SetProperty(_) => service_names::INSTANCE,

        CimRequest::Associators(_)
        | CimRequest::AssociatorNames(_)
        | CimRequest::References(_)
        | CimRequest::ReferenceNames(_) => service_names::ASSOCIATION,

        CimRequest::ExecQuery(_) => service_names::QUERY,
        CimRequest::InvokeMethod(_) => service_names::METHOD,

        // ----- Pagination -----
        CimRequest::OpenEnumerateInstances(_)
        | CimRequest::OpenEnumerateInstancePaths(_)
        | CimRequest::OpenReferenceInstances(_)
        | CimRequest::OpenReferenceInstancePaths(_)
        | CimRequest::OpenAssociatorInstances(_)
        | CimRequest::OpenAssociatorInstancePaths(_)
        | CimRequest::OpenQueryInstances(_)
        | CimRequest::PullInstancesWithPath(_)
        | CimRequest::PullInstancePaths(_)
        | CimRequest::PullInstances(_)
        | CimRequest::CloseEnumeration(_)
        | CimRequest::EnumerationCount(_) => service_names::ENUMERATION,
    }
}

// ---------------------------------------------------------------------------
// OperationService
// ---------------------------------------------------------------------------

/// Classifies incoming requests into `Operation` values.
///
/// Each call gets a unique call ID, and a fresh trace ID when the caller
/// did not supply one.
pub struct OperationService {
    call_id_counter: AtomicU64,
}

impl OperationService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Classify `request` addressed to `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError::InvalidNamespace` when `namespace` is not a
    /// legal namespace name.
    pub fn classify(
        &self,
        namespace: &str,
        request: CimRequest,
        mut caller: RequestContext,
    ) -> Result<Operation, ClassifyError> {
        let namespace_name =
            NamespaceName::new(namespace).map_err(|source| ClassifyError::InvalidNamespace {
                namespace: namespace.to_string(),
                source,
            })?;
        if caller.trace_id.is_empty() {
            caller.trace_id = uuid::Uuid::new_v4().to_string();
        }
        // Provider identity is only ever set by the broker on clones.
        caller.provider = None;

        let mut ctx =
            OperationContext::new(self.next_call_id(), service_for(&request), namespace_name);
        ctx.request = caller;
        Ok(Operation { ctx, request })
    }
}

impl Default for OperationService {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
