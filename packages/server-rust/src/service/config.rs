use std::time::Duration;

use crate::directory::ControlProviderRoute;
use crate::traits::ConfigSource;

/// Names of the runtime properties read through a [`ConfigSource`].
pub mod property_names {
    pub const HOSTNAME: &str = "hostname";
    pub const ENABLE_ASSOCIATION_TRAVERSAL: &str = "enableAssociationTraversal";
    pub const MAXIMUM_ENUMERATION_BREADTH: &str = "maximumEnumerationBreadth";
    pub const PULL_MAX_OBJECT_COUNT: &str = "pullOperationsMaxObjectCount";
    pub const PULL_MAX_TIMEOUT: &str = "pullOperationsMaxTimeout";
    pub const PULL_DEFAULT_TIMEOUT: &str = "pullOperationsDefaultTimeout";
    pub const PULL_REJECT_ZERO_TIMEOUT: &str = "pullOperationsRejectZeroTimeout";
    pub const ENABLE_NORMALIZATION: &str = "enableNormalization";
    pub const EXCLUDE_MODULES_FROM_NORMALIZATION: &str = "excludeModulesFromNormalization";

    /// Every property `BrokerConfig::from_source` reads.
    pub const ALL: [&str; 9] = [
        HOSTNAME,
        ENABLE_ASSOCIATION_TRAVERSAL,
        MAXIMUM_ENUMERATION_BREADTH,
        PULL_MAX_OBJECT_COUNT,
        PULL_MAX_TIMEOUT,
        PULL_DEFAULT_TIMEOUT,
        PULL_REJECT_ZERO_TIMEOUT,
        ENABLE_NORMALIZATION,
        EXCLUDE_MODULES_FROM_NORMALIZATION,
    ];
}

/// Upper bound for `pullOperationsMaxObjectCount`.
pub const PULL_MAX_OBJECT_COUNT_LIMIT: u32 = 10_000;
/// Upper bound for `pullOperationsMaxTimeout`, in seconds.
pub const PULL_MAX_TIMEOUT_LIMIT: u32 = 90;
/// Upper bound for `pullOperationsDefaultTimeout`, in seconds.
pub const PULL_DEFAULT_TIMEOUT_LIMIT: u32 = 30;

/// Invalid configuration property.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown configuration property: {name}")]
    UnknownProperty { name: String },
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

/// Broker configuration, handed to the dispatcher at construction.
///
/// Runtime properties are validated on the way in; the remaining fields are
/// fixed limits that only tests normally change.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Server identity used to complete host names on result paths.
    pub host_name: String,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    pub enable_association_traversal: bool,
    /// Most providers one enumeration may fan out to.
    pub max_enumeration_breadth: u32,
    /// Ceiling for `maxObjectCount` on Open and Pull operations.
    pub pull_max_object_count: u32,
    /// Ceiling for `operationTimeout`, in seconds.
    pub pull_max_timeout_secs: u32,
    /// Interoperation timeout used when the client omits one, in seconds.
    pub pull_default_timeout_secs: u32,
    /// Reject `operationTimeout = 0` instead of treating it as no timeout.
    pub reject_zero_operation_timeout: bool,
    pub enable_normalization: bool,
    /// Provider modules whose responses skip normalization.
    pub exclude_modules_from_normalization: Vec<String>,

    pub max_open_contexts: usize,
    /// Cache size above which provider deliveries wait for the client.
    pub response_cache_max_size: usize,
    pub max_consecutive_zero_pulls: u32,
    /// Deadline for a pull waiting on provider data; also the sweep period.
    pub pull_max_operation_wait: Duration,
    /// Consecutive empty forced replies before providers count as stalled.
    pub max_consecutive_waits_before_error: u32,
    /// Capacity of each provider response channel.
    pub provider_channel_capacity: usize,
    /// Classes answered by control providers inside the server.
    pub control_providers: Vec<ControlProviderRoute>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            max_concurrent_operations: 1000,
            enable_association_traversal: true,
            max_enumeration_breadth: 1000,
            pull_max_object_count: PULL_MAX_OBJECT_COUNT_LIMIT,
            pull_max_timeout_secs: PULL_MAX_TIMEOUT_LIMIT,
            pull_default_timeout_secs: PULL_DEFAULT_TIMEOUT_LIMIT,
            reject_zero_operation_timeout: false,
            enable_normalization: true,
            exclude_modules_from_normalization: Vec::new(),
            max_open_contexts: 256,
            response_cache_max_size: 1000,
            max_consecutive_zero_pulls: 1000,
            pull_max_operation_wait: Duration::from_secs(9),
            max_consecutive_waits_before_error: 6,
            provider_channel_capacity: 16,
            control_providers: ControlProviderRoute::defaults(),
        }
    }
}

impl BrokerConfig {
    /// Builds a configuration from defaults overridden by `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first property whose
    /// current value does not parse or is out of range.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for name in property_names::ALL {
            if let Some(value) = source.get_current_value(name) {
                config.apply(name, &value)?;
            }
        }
        Ok(config)
    }

    /// Validates and applies one runtime property.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unknown names and invalid values; the
    /// configuration is unchanged on error.
    pub fn apply(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        use property_names as p;

        match name {
            p::HOSTNAME => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(invalid(name, value, "must not be empty"));
                }
                self.host_name = trimmed.to_string();
            }
            p::ENABLE_ASSOCIATION_TRAVERSAL => {
                self.enable_association_traversal = parse_bool(name, value)?;
            }
            p::MAXIMUM_ENUMERATION_BREADTH => {
                self.max_enumeration_breadth = parse_u32(name, value, 1, u32::MAX)?;
            }
            p::PULL_MAX_OBJECT_COUNT => {
                self.pull_max_object_count =
                    parse_u32(name, value, 1, PULL_MAX_OBJECT_COUNT_LIMIT)?;
            }
            p::PULL_MAX_TIMEOUT => {
                self.pull_max_timeout_secs = parse_u32(name, value, 1, PULL_MAX_TIMEOUT_LIMIT)?;
            }
            p::PULL_DEFAULT_TIMEOUT => {
                self.pull_default_timeout_secs =
                    parse_u32(name, value, 1, PULL_DEFAULT_TIMEOUT_LIMIT)?;
            }
            p::PULL_REJECT_ZERO_TIMEOUT => {
                self.reject_zero_operation_timeout = parse_bool(name, value)?;
            }
            p::ENABLE_NORMALIZATION => {
                self.enable_normalization = parse_bool(name, value)?;
            }
            p::EXCLUDE_MODULES_FROM_NORMALIZATION => {
                self.exclude_modules_from_normalization = value
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {
                return Err(ConfigError::UnknownProperty {
                    name: name.to_string(),
                })
            }
        }
        Ok(())
    }

    /// True when responses from `module` should be normalized.
    #[must_use]
    pub fn normalizes_module(&self, module: &str) -> bool {
        self.enable_normalization
            && !self
                .exclude_modules_from_normalization
                .iter()
                .any(|m| m.eq_ignore_ascii_case(module))
    }

    #[must_use]
    pub fn default_operation_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.pull_default_timeout_secs))
    }
}

fn invalid(name: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("true") => Ok(true),
        v if v.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(invalid(name, value, "expected true or false")),
    }
}

fn parse_u32(name: &str, value: &str, min: u32, max: u32) -> Result<u32, ConfigError> {
    let parsed: u32 = value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(name, value, e.to_string()))?;
    if parsed < min || parsed > max {
        return Err(invalid(name, value, format!("must be in {min}..={max}")));
    }
    Ok(parsed)
}
