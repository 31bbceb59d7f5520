//! Operation routing and execution framework.
//!
//! This module implements the service-oriented operation pipeline:
//!
//! 1. **Classification** (`classify`): `CimRequest` -> `Result<Operation, ClassifyError>`
//! 2. **Middleware** (`middleware`): Tower layers (metrics, load-shedding)
//! 3. **Routing** (`router`): Dispatch to domain services by `service_name`
//! 4. **Domain services** (`domain`): Hand operations to the dispatcher
//! 5. **Background workers** (`worker`): The enumeration timeout sweep

pub mod classify;
pub mod config;
pub mod domain;
pub mod envelope;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use classify::{service_for, OperationService};
pub use config::{BrokerConfig, ConfigError};
pub use envelope::{DispatchOutcome, ReplyHandle, RequestEnvelope};
pub use operation::{
    service_names, ClassifyError, ErrorKind, Operation, OperationContext, OperationError,
    OperationResponse, OperationResult,
};
pub use registry::{ManagedService, ServiceContext, ServiceRegistry};
pub use router::OperationRouter;
pub use worker::{BackgroundRunnable, BackgroundWorker};
