//! Operation types flowing through the pipeline: context, request, response
//! and the broker's single error enum.

use std::time::Instant;

use wbem_core::messages::{CimRequest, OpenOrPullResponse};
use wbem_core::{
    CimName, Class, Instance, NameError, NamespaceName, ObjectPath, ParamValue, QualifierDecl,
    RequestContext, ResponseData, StatusCode, Value,
};

// ---------------------------------------------------------------------------
// Service names
// ---------------------------------------------------------------------------

/// Domain service names used for routing.
pub mod service_names {
    /// Class and qualifier operations answered by the object store.
    pub const CLASS: &str = "class";
    /// Single-target and enumerating instance operations.
    pub const INSTANCE: &str = "instance";
    /// Associators/References traversal.
    pub const ASSOCIATION: &str = "association";
    /// `ExecQuery`.
    pub const QUERY: &str = "query";
    /// Extrinsic method invocation.
    pub const METHOD: &str = "method";
    /// The Open/Pull/Close family.
    pub const ENUMERATION: &str = "enumeration";
}

// ---------------------------------------------------------------------------
// OperationContext / Operation
// ---------------------------------------------------------------------------

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Correlation id; also tags every provider clone fanned out from this call.
    pub call_id: u64,
    pub service_name: &'static str,
    /// Target namespace of the request.
    pub namespace: NamespaceName,
    /// Caller identity, cloned into provider requests.
    pub request: RequestContext,
    pub received_at: Instant,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, service_name: &'static str, namespace: NamespaceName) -> Self {
        Self {
            call_id,
            service_name,
            namespace,
            request: RequestContext::default(),
            received_at: Instant::now(),
        }
    }
}

/// A classified request ready for routing.
#[derive(Debug, Clone)]
pub struct Operation {
    pub ctx: OperationContext,
    pub request: CimRequest,
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        &self.ctx
    }
}

// ---------------------------------------------------------------------------
// OperationResponse
// ---------------------------------------------------------------------------

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResponse {
    Class(Box<Class>),
    Classes(Vec<Class>),
    ClassNames(Vec<CimName>),
    Instance(Box<Instance>),
    /// Result content of enumerations, traversals and queries.
    Data(ResponseData),
    /// Path of a newly created instance.
    Created(ObjectPath),
    Property(Value),
    Qualifier(QualifierDecl),
    Qualifiers(Vec<QualifierDecl>),
    MethodResult {
        return_value: Value,
        out_parameters: Vec<ParamValue>,
    },
    OpenOrPull(OpenOrPullResponse),
    /// Operations with no return value (modify, delete, set, close).
    Empty,
}

/// What every reply carries.
pub type OperationResult = Result<OperationResponse, OperationError>;

// ---------------------------------------------------------------------------
// OperationError
// ---------------------------------------------------------------------------

/// Broad category of an [`OperationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed parameters, rejected before dispatch.
    Validation,
    NotFound,
    NotSupported,
    /// Unknown, closed, mismatched, busy or timed-out enumeration context.
    InvalidContext,
    ResourceLimit,
    /// Failure reported by a provider, passed through.
    Provider,
    Internal,
}

/// Errors returned by operation handlers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },
    #[error("invalid namespace: {namespace}")]
    InvalidNamespace { namespace: String },
    #[error("invalid class: {class_name}")]
    InvalidClass { class_name: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("not supported: {message}")]
    NotSupported { message: String },
    #[error("query language not supported: {language}")]
    QueryLanguageNotSupported { language: String },
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },
    #[error("filtered enumeration not supported")]
    FilteredEnumerationNotSupported,
    #[error("continuation on error not supported")]
    ContinuationOnErrorNotSupported,
    #[error("method not available: {message}")]
    MethodNotAvailable { message: String },
    #[error("invalid operation timeout: {message}")]
    InvalidOperationTimeout { message: String },
    #[error("invalid enumeration context: {message}")]
    InvalidEnumerationContext { message: String },
    #[error("pull cannot be abandoned: {message}")]
    PullCannotBeAbandoned { message: String },
    #[error("server limits exceeded: {message}")]
    ServerLimitsExceeded { message: String },
    #[error("server is shutting down")]
    ShuttingDown,
    /// Object store failure with a status code not covered above.
    #[error("{code}: {message}")]
    Status { code: StatusCode, message: String },
    /// Failure reported by a provider.
    #[error("provider error {code}: {message}")]
    Provider { code: StatusCode, message: String },
    #[error("internal failure: {0}")]
    Internal(String),

    #[error("unknown service: {name}")]
    UnknownService { name: String },
    #[error("wrong service for operation")]
    WrongService,
    #[error("server overloaded, try again later")]
    Overloaded,
}

impl OperationError {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported {
            message: message.into(),
        }
    }

    pub fn invalid_context(message: impl Into<String>) -> Self {
        Self::InvalidEnumerationContext {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Builds the error a provider reported with `code`.
    pub fn from_provider(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Provider {
            code,
            message: message.into(),
        }
    }

    /// Status code sent to the client.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidParameter { .. } => StatusCode::InvalidParameter,
            Self::InvalidNamespace { .. } => StatusCode::InvalidNamespace,
            Self::InvalidClass { .. } => StatusCode::InvalidClass,
            Self::NotFound { .. } => StatusCode::NotFound,
            Self::NotSupported { .. } => StatusCode::NotSupported,
            Self::QueryLanguageNotSupported { .. } => StatusCode::QueryLanguageNotSupported,
            Self::InvalidQuery { .. } => StatusCode::InvalidQuery,
            Self::FilteredEnumerationNotSupported => StatusCode::FilteredEnumerationNotSupported,
            Self::ContinuationOnErrorNotSupported => StatusCode::ContinuationOnErrorNotSupported,
            Self::MethodNotAvailable { .. } => StatusCode::MethodNotAvailable,
            Self::InvalidOperationTimeout { .. } => StatusCode::InvalidOperationTimeout,
            Self::InvalidEnumerationContext { .. } => StatusCode::InvalidEnumerationContext,
            Self::PullCannotBeAbandoned { .. } => StatusCode::PullCannotBeAbandoned,
            Self::ServerLimitsExceeded { .. } | Self::Overloaded => {
                StatusCode::ServerLimitsExceeded
            }
            Self::ShuttingDown => StatusCode::ServerIsShuttingDown,
            Self::Status { code, .. } | Self::Provider { code, .. } => *code,
            Self::Internal(_) | Self::UnknownService { .. } | Self::WrongService => {
                StatusCode::Failed
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter { .. }
            | Self::InvalidNamespace { .. }
            | Self::InvalidClass { .. }
            | Self::InvalidQuery { .. }
            | Self::InvalidOperationTimeout { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotSupported { .. }
            | Self::QueryLanguageNotSupported { .. }
            | Self::FilteredEnumerationNotSupported
            | Self::ContinuationOnErrorNotSupported
            | Self::MethodNotAvailable { .. } => ErrorKind::NotSupported,
            Self::InvalidEnumerationContext { .. } | Self::PullCannotBeAbandoned { .. } => {
                ErrorKind::InvalidContext
            }
            Self::ServerLimitsExceeded { .. } | Self::Overloaded | Self::ShuttingDown => {
                ErrorKind::ResourceLimit
            }
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Status { code, .. } => match code {
                StatusCode::NotFound => ErrorKind::NotFound,
                StatusCode::NotSupported => ErrorKind::NotSupported,
                StatusCode::Failed => ErrorKind::Internal,
                _ => ErrorKind::Validation,
            },
            Self::Internal(_) | Self::UnknownService { .. } | Self::WrongService => {
                ErrorKind::Internal
            }
        }
    }

    /// True when the error reports an unsupported operation, from any source.
    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        self.status_code() == StatusCode::NotSupported
    }
}

/// Errors from classifying a request into an `Operation`.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("invalid namespace {namespace:?}: {source}")]
    InvalidNamespace {
        namespace: String,
        #[source]
        source: NameError,
    },
}

impl From<ClassifyError> for OperationError {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::InvalidNamespace { namespace, .. } => {
                OperationError::InvalidNamespace { namespace }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
