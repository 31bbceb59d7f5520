//! Provider directory: resolves which providers answer a class, across its
//! subclasses and, for associations, across the association classes that
//! reference an anchor object.

pub mod routing;

use std::sync::Arc;

use wbem_core::messages::{EnumerateClassNamesRequest, ReferenceNamesRequest};
use wbem_core::{CimName, NamespaceName, ObjectPath, ProviderIdentity, StatusCode};

pub use routing::{find_route, ControlProviderRoute, CONTROL_SERVICE, NAMESPACE_PSEUDO_CLASS};

use crate::service::config::BrokerConfig;
use crate::service::operation::OperationError;
use crate::traits::{ObjectStore, ProviderRegistry, RegisteredProvider};

/// Service that hosts out-of-process registered providers.
pub const PROVIDER_MANAGER_SERVICE: &str = "ProviderManagerService";

// ---------------------------------------------------------------------------
// Destination / ProviderInfo
// ---------------------------------------------------------------------------

/// Where a request clone is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub service: String,
    /// Named control provider within `service`.
    pub control_provider: Option<String>,
}

impl Destination {
    #[must_use]
    pub fn provider_manager() -> Self {
        Self {
            service: PROVIDER_MANAGER_SERVICE.to_string(),
            control_provider: None,
        }
    }

    #[must_use]
    pub fn control(route: &ControlProviderRoute) -> Self {
        Self {
            service: route.service.clone(),
            control_provider: Some(route.control_provider.clone()),
        }
    }
}

/// Resolution result for one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub class_name: CimName,
    /// `None` when no provider answers the class.
    pub destination: Option<Destination>,
    pub identity: Option<ProviderIdentity>,
    pub has_normalization: bool,
    /// Provider cannot evaluate queries itself.
    pub has_no_query: bool,
}

impl ProviderInfo {
    #[must_use]
    pub fn unresolved(class_name: CimName) -> Self {
        Self {
            class_name,
            destination: None,
            identity: None,
            has_normalization: false,
            has_no_query: true,
        }
    }

    fn control(class_name: CimName, route: &ControlProviderRoute) -> Self {
        Self {
            class_name,
            destination: Some(Destination::control(route)),
            identity: None,
            has_normalization: false,
            has_no_query: true,
        }
    }

    fn registered(class_name: CimName, provider: RegisteredProvider, config: &BrokerConfig) -> Self {
        Self {
            class_name,
            destination: Some(Destination::provider_manager()),
            has_normalization: config.normalizes_module(&provider.identity.module_name),
            has_no_query: !provider.supports_exec_query,
            identity: Some(provider.identity),
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.destination.is_some()
    }
}

/// Ordered per-class resolutions for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderInfoList {
    entries: Vec<ProviderInfo>,
    provider_count: usize,
}

impl ProviderInfoList {
    pub fn append(&mut self, info: ProviderInfo) {
        if info.is_resolved() {
            self.provider_count += 1;
        }
        self.entries.push(info);
    }

    /// Entries that resolved to a provider.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.provider_count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderInfo> {
        self.entries.iter()
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderInfo> {
        self.entries.iter().filter(|e| e.is_resolved())
    }

    /// Classes left for the object store.
    pub fn unresolved(&self) -> impl Iterator<Item = &ProviderInfo> {
        self.entries.iter().filter(|e| !e.is_resolved())
    }
}

// ---------------------------------------------------------------------------
// ProviderDirectory
// ---------------------------------------------------------------------------

/// Stateless provider lookup over the object store and provider registry.
pub struct ProviderDirectory {
    store: Arc<dyn ObjectStore>,
    registry: Arc<dyn ProviderRegistry>,
}

impl ProviderDirectory {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, registry: Arc<dyn ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    /// Resolves `class` and every subclass, one entry per class.
    ///
    /// # Errors
    ///
    /// `InvalidClass` if subclass expansion fails, `NotSupported` if more
    /// providers resolve than the enumeration breadth allows.
    pub fn lookup_instance_providers(
        &self,
        config: &BrokerConfig,
        ns: &NamespaceName,
        class: &CimName,
    ) -> Result<ProviderInfoList, OperationError> {
        let mut list = ProviderInfoList::default();
        for class_name in self.expand_subclasses(ns, class)? {
            let info = self
                .lookup_instance_provider(config, ns, &class_name)
                .unwrap_or_else(|| ProviderInfo::unresolved(class_name));
            list.append(info);
        }
        check_breadth(config, &list, class)?;
        tracing::debug!(
            namespace = %ns,
            class = %class,
            classes = list.len(),
            providers = list.provider_count(),
            "resolved instance providers"
        );
        Ok(list)
    }

    /// Resolves the association classes that reference `anchor`, filtered by
    /// `assoc_class` and `role`, and one provider per class.
    ///
    /// # Errors
    ///
    /// Object store failures from the reverse-reference lookup, and
    /// `NotSupported` when the breadth ceiling is exceeded.
    pub fn lookup_association_providers(
        &self,
        config: &BrokerConfig,
        ns: &NamespaceName,
        anchor: &ObjectPath,
        assoc_class: Option<&CimName>,
        role: Option<&str>,
    ) -> Result<ProviderInfoList, OperationError> {
        let request = ReferenceNamesRequest {
            object_name: ObjectPath::new(anchor.class_name.clone()),
            result_class: assoc_class.cloned(),
            role: role.map(str::to_string),
        };
        let assoc_classes = self.store.reference_names(ns, &request)?;

        let mut list = ProviderInfoList::default();
        for path in assoc_classes {
            let class_name = path.class_name;
            if list.iter().any(|e| e.class_name == class_name) {
                continue;
            }
            let info = if let Some(route) = find_route(&config.control_providers, ns, &class_name)
            {
                ProviderInfo::control(class_name, route)
            } else {
                match self
                    .registry
                    .lookup_association_providers(ns, &class_name)
                    .into_iter()
                    .next()
                {
                    Some(provider) => ProviderInfo::registered(class_name, provider, config),
                    None => ProviderInfo::unresolved(class_name),
                }
            };
            list.append(info);
        }
        check_breadth(config, &list, &anchor.class_name)?;
        tracing::debug!(
            namespace = %ns,
            anchor = %anchor,
            classes = list.len(),
            providers = list.provider_count(),
            "resolved association providers"
        );
        Ok(list)
    }

    /// Single-class resolution: control provider first, then registry.
    #[must_use]
    pub fn lookup_instance_provider(
        &self,
        config: &BrokerConfig,
        ns: &NamespaceName,
        class: &CimName,
    ) -> Option<ProviderInfo> {
        if let Some(route) = find_route(&config.control_providers, ns, class) {
            return Some(ProviderInfo::control(class.clone(), route));
        }
        self.registry
            .lookup_instance_provider(ns, class)
            .map(|provider| ProviderInfo::registered(class.clone(), provider, config))
    }

    #[must_use]
    pub fn lookup_method_provider(
        &self,
        config: &BrokerConfig,
        ns: &NamespaceName,
        class: &CimName,
        method: &CimName,
    ) -> Option<ProviderInfo> {
        if let Some(route) = find_route(&config.control_providers, ns, class) {
            return Some(ProviderInfo::control(class.clone(), route));
        }
        self.registry
            .lookup_method_provider(ns, class, method)
            .map(|provider| ProviderInfo::registered(class.clone(), provider, config))
    }

    /// True when a control provider answers `class` in `ns`.
    #[must_use]
    pub fn is_control_class(config: &BrokerConfig, ns: &NamespaceName, class: &CimName) -> bool {
        find_route(&config.control_providers, ns, class).is_some()
    }

    fn expand_subclasses(
        &self,
        ns: &NamespaceName,
        class: &CimName,
    ) -> Result<Vec<CimName>, OperationError> {
        let mut classes = vec![class.clone()];
        if class.eq_str(NAMESPACE_PSEUDO_CLASS) {
            return Ok(classes);
        }
        let request = EnumerateClassNamesRequest {
            class_name: Some(class.clone()),
            deep_inheritance: true,
        };
        let subclasses = self.store.enumerate_class_names(ns, &request).map_err(|err| {
            tracing::debug!(class = %class, error = %err, "subclass expansion failed");
            OperationError::InvalidClass {
                class_name: class.to_string(),
            }
        })?;
        classes.extend(subclasses);
        Ok(classes)
    }
}

fn check_breadth(
    config: &BrokerConfig,
    list: &ProviderInfoList,
    class: &CimName,
) -> Result<(), OperationError> {
    let limit = usize::try_from(config.max_enumeration_breadth).unwrap_or(usize::MAX);
    if list.provider_count() > limit {
        tracing::warn!(
            class = %class,
            providers = list.provider_count(),
            limit,
            "enumeration breadth exceeded"
        );
        return Err(OperationError::NotSupported {
            message: format!(
                "{class} resolves to {} providers, more than the enumeration breadth of {limit}",
                list.provider_count()
            ),
        });
    }
    Ok(())
}

/// Maps store `NotFound` for a target class to `InvalidClass`.
pub(crate) fn class_not_found_as_invalid(err: OperationError, class: &CimName) -> OperationError {
    match err.status_code() {
        StatusCode::NotFound | StatusCode::InvalidClass => OperationError::InvalidClass {
            class_name: class.to_string(),
        },
        _ => err,
    }
}
