//! Interfaces of the broker's external collaborators: object store, provider
//! registry, provider transport, configuration source and query compiler.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use wbem_core::messages::{
    AssociatorNamesRequest, AssociatorsRequest, CimRequest, EnumerateClassNamesRequest,
    EnumerateClassesRequest, EnumerateInstancesRequest, GetClassRequest, GetInstanceRequest,
    ModifyInstanceRequest, ReferenceNamesRequest, ReferencesRequest,
};
use wbem_core::{
    CimName, CimObject, Class, Instance, NamespaceName, ObjectPath, ProviderIdentity,
    QualifierDecl, RequestContext, ResponseData, Value,
};

use crate::directory::Destination;
use crate::service::operation::{OperationError, OperationResponse, OperationResult};

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// The server's built-in class and instance store.
///
/// Calls are synchronous and fail with a typed [`OperationError`]
/// (`NotFound`, `InvalidClass`, or `Status` for other CIM codes).
pub trait ObjectStore: Send + Sync {
    fn get_class(&self, ns: &NamespaceName, req: &GetClassRequest)
        -> Result<Class, OperationError>;

    fn enumerate_classes(
        &self,
        ns: &NamespaceName,
        req: &EnumerateClassesRequest,
    ) -> Result<Vec<Class>, OperationError>;

    /// Subclass names of `req.class_name` (or top-level classes when absent).
    /// Fails with `InvalidClass` when the named class does not exist.
    fn enumerate_class_names(
        &self,
        ns: &NamespaceName,
        req: &EnumerateClassNamesRequest,
    ) -> Result<Vec<CimName>, OperationError>;

    fn create_class(&self, ns: &NamespaceName, class: Class) -> Result<(), OperationError>;
    fn modify_class(&self, ns: &NamespaceName, class: Class) -> Result<(), OperationError>;
    fn delete_class(&self, ns: &NamespaceName, class: &CimName) -> Result<(), OperationError>;

    fn get_qualifier(
        &self,
        ns: &NamespaceName,
        name: &CimName,
    ) -> Result<QualifierDecl, OperationError>;
    fn set_qualifier(&self, ns: &NamespaceName, decl: QualifierDecl)
        -> Result<(), OperationError>;
    fn delete_qualifier(&self, ns: &NamespaceName, name: &CimName) -> Result<(), OperationError>;
    fn enumerate_qualifiers(&self, ns: &NamespaceName)
        -> Result<Vec<QualifierDecl>, OperationError>;

    fn get_instance(
        &self,
        ns: &NamespaceName,
        req: &GetInstanceRequest,
    ) -> Result<Instance, OperationError>;

    /// Instances of exactly `req.class_name`, not of its subclasses.
    fn enumerate_instances_for_class(
        &self,
        ns: &NamespaceName,
        req: &EnumerateInstancesRequest,
    ) -> Result<Vec<Instance>, OperationError>;

    /// Paths of instances of exactly `class`.
    fn enumerate_instance_names_for_class(
        &self,
        ns: &NamespaceName,
        class: &CimName,
    ) -> Result<Vec<ObjectPath>, OperationError>;

    fn create_instance(
        &self,
        ns: &NamespaceName,
        instance: Instance,
    ) -> Result<ObjectPath, OperationError>;
    fn modify_instance(
        &self,
        ns: &NamespaceName,
        req: &ModifyInstanceRequest,
    ) -> Result<(), OperationError>;
    fn delete_instance(&self, ns: &NamespaceName, path: &ObjectPath)
        -> Result<(), OperationError>;

    fn get_property(
        &self,
        ns: &NamespaceName,
        path: &ObjectPath,
        property: &CimName,
    ) -> Result<Value, OperationError>;
    fn set_property(
        &self,
        ns: &NamespaceName,
        path: &ObjectPath,
        property: &CimName,
        value: Value,
    ) -> Result<(), OperationError>;

    /// Association traversal. With a class-path anchor the results are
    /// classes (or class paths); with an instance anchor, instances.
    fn associators(
        &self,
        ns: &NamespaceName,
        req: &AssociatorsRequest,
    ) -> Result<Vec<CimObject>, OperationError>;
    fn associator_names(
        &self,
        ns: &NamespaceName,
        req: &AssociatorNamesRequest,
    ) -> Result<Vec<ObjectPath>, OperationError>;
    fn references(
        &self,
        ns: &NamespaceName,
        req: &ReferencesRequest,
    ) -> Result<Vec<CimObject>, OperationError>;
    /// With a class-path anchor, returns the class paths of the association
    /// classes that can reference the anchor class.
    fn reference_names(
        &self,
        ns: &NamespaceName,
        req: &ReferenceNamesRequest,
    ) -> Result<Vec<ObjectPath>, OperationError>;

    /// True when the store answers classes no provider is registered for.
    fn is_default_instance_provider(&self) -> bool;
}

// ---------------------------------------------------------------------------
// ProviderRegistry
// ---------------------------------------------------------------------------

/// A provider registration as returned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredProvider {
    pub identity: ProviderIdentity,
    /// Provider evaluates `ExecQuery` itself.
    pub supports_exec_query: bool,
}

impl RegisteredProvider {
    #[must_use]
    pub fn new(identity: ProviderIdentity) -> Self {
        Self {
            identity,
            supports_exec_query: false,
        }
    }
}

pub trait ProviderRegistry: Send + Sync {
    fn lookup_instance_provider(
        &self,
        ns: &NamespaceName,
        class: &CimName,
    ) -> Option<RegisteredProvider>;

    /// Providers registered for one association class, in registration order.
    fn lookup_association_providers(
        &self,
        ns: &NamespaceName,
        assoc_class: &CimName,
    ) -> Vec<RegisteredProvider>;

    fn lookup_method_provider(
        &self,
        ns: &NamespaceName,
        class: &CimName,
        method: &CimName,
    ) -> Option<RegisteredProvider>;
}

// ---------------------------------------------------------------------------
// ProviderTransport
// ---------------------------------------------------------------------------

/// One request clone addressed to a single provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Correlation id of the originating client request.
    pub correlation_id: u64,
    pub namespace: NamespaceName,
    /// Concrete class this clone targets.
    pub class_name: CimName,
    /// Caller context with the provider identity injected.
    pub context: RequestContext,
    /// Responses should be normalized by the provider layer.
    pub normalize: bool,
    pub operation: CimRequest,
}

/// One response chunk from a provider.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub correlation_id: u64,
    pub result: OperationResult,
    /// Last chunk for this request clone.
    pub complete: bool,
}

/// The response channel's receiving side has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("provider response channel closed")]
pub struct ResponderClosed;

/// Completion handle for one request clone.
///
/// Chunks go over a bounded channel, so a delivering provider waits while the
/// broker holds back (pull cache backpressure). Completing consumes the
/// handle; dropping it without completing reports the clone as failed.
#[derive(Debug)]
pub struct ProviderResponder {
    correlation_id: u64,
    tx: mpsc::Sender<ProviderResponse>,
}

impl ProviderResponder {
    /// Creates a responder and the receiver the broker collects from.
    #[must_use]
    pub fn channel(
        correlation_id: u64,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ProviderResponse>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { correlation_id, tx }, rx)
    }

    #[must_use]
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    /// Sends an incomplete chunk, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ResponderClosed`] if the broker no longer collects.
    pub async fn deliver(&self, data: ResponseData) -> Result<(), ResponderClosed> {
        self.tx
            .send(ProviderResponse {
                correlation_id: self.correlation_id,
                result: Ok(OperationResponse::Data(data)),
                complete: false,
            })
            .await
            .map_err(|_| ResponderClosed)
    }

    /// Sends the final chunk.
    pub async fn complete(self, result: OperationResult) {
        let response = ProviderResponse {
            correlation_id: self.correlation_id,
            result,
            complete: true,
        };
        if self.tx.send(response).await.is_err() {
            tracing::debug!(
                correlation_id = self.correlation_id,
                "completion for abandoned request dropped"
            );
        }
    }
}

/// Fire-and-forget delivery of request clones to providers.
///
/// `send` must return without waiting for the provider; the response arrives
/// later through `responder`, exactly once with `complete = true`.
pub trait ProviderTransport: Send + Sync {
    fn send(&self, destination: &Destination, request: ProviderRequest, responder: ProviderResponder);
}

// ---------------------------------------------------------------------------
// ConfigSource
// ---------------------------------------------------------------------------

/// Read access to the configuration property subsystem.
pub trait ConfigSource: Send + Sync {
    fn get_current_value(&self, name: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Query filters
// ---------------------------------------------------------------------------

/// Failure evaluating a compiled filter against an instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("filter evaluation failed: {0}")]
pub struct FilterError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterCompileError {
    #[error("query language not supported: {0}")]
    UnsupportedLanguage(String),
    #[error("invalid query: {0}")]
    Syntax(String),
}

impl From<FilterCompileError> for OperationError {
    fn from(err: FilterCompileError) -> Self {
        match err {
            FilterCompileError::UnsupportedLanguage(language) => {
                OperationError::QueryLanguageNotSupported { language }
            }
            FilterCompileError::Syntax(message) => OperationError::InvalidQuery { message },
        }
    }
}

/// A compiled query or filter.
pub trait QueryFilter: Send + Sync + fmt::Debug {
    fn language(&self) -> &str;

    /// Class named in the query's FROM clause.
    fn class_name(&self) -> &CimName;

    /// # Errors
    ///
    /// Returns [`FilterError`] when the predicate cannot be evaluated.
    fn evaluate(&self, instance: &Instance) -> Result<bool, FilterError>;

    /// Projects the instance onto the query's select list.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] when projection fails.
    fn project(&self, instance: &mut Instance) -> Result<(), FilterError>;
}

pub trait FilterCompiler: Send + Sync {
    /// # Errors
    ///
    /// Returns [`FilterCompileError`] for unknown languages and bad query text.
    fn compile(
        &self,
        language: &str,
        query: &str,
        namespace: &NamespaceName,
    ) -> Result<Arc<dyn QueryFilter>, FilterCompileError>;
}
