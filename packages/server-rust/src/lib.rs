//! WBEM operation broker: routes CIM operations to providers and the object
//! store, aggregates their partial responses, and serves paginated
//! enumerations.

pub mod aggregate;
pub mod broker;
pub mod directory;
pub mod dispatcher;
pub mod enumeration;
pub mod service;
pub mod storage;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use broker::{Broker, BrokerState};
pub use dispatcher::Dispatcher;
pub use service::{BrokerConfig, OperationError, OperationResponse, OperationResult};
pub use storage::MemoryObjectStore;
pub use traits::{
    ConfigSource, FilterCompiler, ObjectStore, ProviderRegistry, ProviderTransport, QueryFilter,
};
