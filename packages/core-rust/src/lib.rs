//! WBEM core: CIM data model, object paths, and operation message schemas.

pub mod context;
pub mod instance;
pub mod messages;
pub mod name;
pub mod path;
pub mod schema;
pub mod status;
pub mod types;

pub use context::{ProviderIdentity, RequestContext};
pub use instance::{CimObject, ContentKind, ContentMismatch, Instance, Property, ResponseData};
pub use name::{is_legal_name, CimName, NameError, NamespaceName};
pub use path::{KeyBinding, ObjectPath};
pub use schema::{Class, PropertyDecl, PropertyList, Qualifier, QualifierDecl};
pub use status::StatusCode;
pub use types::{CimType, ParamValue, Value};
