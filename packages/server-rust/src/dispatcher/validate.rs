//! Request validation performed before any provider is contacted.

use std::sync::Arc;
use std::time::Duration;

use wbem_core::messages::OpenOptions;
use wbem_core::{is_legal_name, NamespaceName, ObjectPath};

use crate::service::config::BrokerConfig;
use crate::service::operation::OperationError;
use crate::traits::{FilterCompiler, QueryFilter};

/// Validated Open parameters.
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub max_object_count: u32,
    /// `None` disables the interoperation timer.
    pub operation_timeout: Option<Duration>,
    pub filter: Option<Arc<dyn QueryFilter>>,
}

/// Instance-level operations need a path with key bindings.
pub fn require_instance_path(path: &ObjectPath, parameter: &str) -> Result<(), OperationError> {
    if path.is_class_path() {
        return Err(OperationError::invalid_parameter(format!(
            "{parameter} {path} has no key bindings"
        )));
    }
    Ok(())
}

pub fn validate_role(role: Option<&str>, parameter: &str) -> Result<(), OperationError> {
    match role {
        Some(r) if !is_legal_name(r) => Err(OperationError::invalid_parameter(format!(
            "{parameter} {r:?} is not a legal property name"
        ))),
        _ => Ok(()),
    }
}

/// `maxObjectCount` must not exceed the configured ceiling.
pub fn validate_max_object_count(config: &BrokerConfig, requested: u32) -> Result<u32, OperationError> {
    if requested > config.pull_max_object_count {
        return Err(OperationError::invalid_parameter(format!(
            "maxObjectCount {requested} exceeds the limit of {}",
            config.pull_max_object_count
        )));
    }
    Ok(requested)
}

/// Pull requests must carry `maxObjectCount`.
pub fn validate_pull_max_object_count(
    config: &BrokerConfig,
    requested: Option<u32>,
) -> Result<u32, OperationError> {
    let requested = requested
        .ok_or_else(|| OperationError::invalid_parameter("maxObjectCount is required on pull"))?;
    validate_max_object_count(config, requested)
}

/// Resolves the interoperation timeout. An omitted value takes the
/// configured default; zero disables the timer unless policy rejects it.
pub fn validate_operation_timeout(
    config: &BrokerConfig,
    requested: Option<u32>,
) -> Result<Option<Duration>, OperationError> {
    match requested {
        None => Ok(Some(config.default_operation_timeout())),
        Some(0) if config.reject_zero_operation_timeout => {
            Err(OperationError::InvalidOperationTimeout {
                message: "operationTimeout of 0 is not allowed".to_string(),
            })
        }
        Some(0) => Ok(None),
        Some(secs) if secs > config.pull_max_timeout_secs => {
            Err(OperationError::InvalidOperationTimeout {
                message: format!(
                    "operationTimeout {secs} exceeds the limit of {}",
                    config.pull_max_timeout_secs
                ),
            })
        }
        Some(secs) => Ok(Some(Duration::from_secs(u64::from(secs)))),
    }
}

/// Validates the options shared by every Open operation.
///
/// # Errors
///
/// `ContinuationOnErrorNotSupported`, `InvalidParameter` for a half-given
/// filter or excessive `maxObjectCount`, `FilteredEnumerationNotSupported`
/// without a query compiler, compile errors, and `InvalidOperationTimeout`.
pub fn validate_open_options(
    config: &BrokerConfig,
    filters: Option<&dyn FilterCompiler>,
    ns: &NamespaceName,
    options: &OpenOptions,
) -> Result<OpenParams, OperationError> {
    if options.continue_on_error {
        return Err(OperationError::ContinuationOnErrorNotSupported);
    }
    let filter = match (&options.filter_query_language, &options.filter_query) {
        (None, None) => None,
        (Some(language), Some(query)) => {
            let compiler = filters.ok_or(OperationError::FilteredEnumerationNotSupported)?;
            Some(compiler.compile(language, query, ns)?)
        }
        _ => {
            return Err(OperationError::invalid_parameter(
                "filterQueryLanguage and filterQuery must be given together",
            ))
        }
    };
    let max_object_count =
        validate_max_object_count(config, options.max_object_count.unwrap_or(0))?;
    let operation_timeout = validate_operation_timeout(config, options.operation_timeout)?;
    Ok(OpenParams {
        max_object_count,
        operation_timeout,
        filter,
    })
}
