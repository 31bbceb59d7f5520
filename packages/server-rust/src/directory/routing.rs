//! Control-provider routing table.

use wbem_core::{CimName, NamespaceName};

/// Service hosting the control providers built into the server.
pub const CONTROL_SERVICE: &str = "ControlService";

pub const NAMESPACE_PROVIDER: &str = "NamespaceProvider";
pub const PROVIDER_REGISTRATION_PROVIDER: &str = "ProviderRegistrationProvider";
pub const INTEROP_PROVIDER: &str = "InteropProvider";

/// Namespace holding the server's own management classes.
pub const INTEROP_NAMESPACE: &str = "root/PG_InterOp";

/// The namespace pseudo-class. It has no store definition, so it is never
/// expanded into subclasses.
pub const NAMESPACE_PSEUDO_CLASS: &str = "__Namespace";

/// Routes one class to a control provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlProviderRoute {
    pub class_name: String,
    /// `None` matches every namespace.
    pub namespace: Option<String>,
    pub service: String,
    pub control_provider: String,
}

impl ControlProviderRoute {
    #[must_use]
    pub fn new(
        class_name: impl Into<String>,
        namespace: Option<&str>,
        control_provider: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            namespace: namespace.map(|ns| ns.trim_matches('/').to_string()),
            service: CONTROL_SERVICE.to_string(),
            control_provider: control_provider.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, ns: &NamespaceName, class: &CimName) -> bool {
        class.eq_str(&self.class_name)
            && self
                .namespace
                .as_deref()
                .is_none_or(|route_ns| route_ns.eq_ignore_ascii_case(ns.as_str()))
    }

    /// Built-in routes for namespace, registration and interop classes.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        let mut routes = vec![
            Self::new(NAMESPACE_PSEUDO_CLASS, None, NAMESPACE_PROVIDER),
            Self::new("CIM_Namespace", None, NAMESPACE_PROVIDER),
            Self::new("PG_Namespace", None, NAMESPACE_PROVIDER),
        ];
        for class in [
            "PG_ProviderModule",
            "PG_Provider",
            "PG_ProviderCapabilities",
            "PG_ConsumerCapabilities",
            "PG_ProviderCapabilitiesElement",
        ] {
            routes.push(Self::new(
                class,
                Some(INTEROP_NAMESPACE),
                PROVIDER_REGISTRATION_PROVIDER,
            ));
        }
        for class in ["PG_ObjectManager", "CIM_ObjectManager"] {
            routes.push(Self::new(class, Some(INTEROP_NAMESPACE), INTEROP_PROVIDER));
        }
        routes
    }
}

/// First route matching `(ns, class)`.
#[must_use]
pub fn find_route<'a>(
    routes: &'a [ControlProviderRoute],
    ns: &NamespaceName,
    class: &CimName,
) -> Option<&'a ControlProviderRoute> {
    routes.iter().find(|r| r.matches(ns, class))
}
