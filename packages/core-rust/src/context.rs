use serde::{Deserialize, Serialize};

/// Identity of the provider a request clone is addressed to.
///
/// Injected into each provider clone so the provider side can tell which
/// registration answered it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdentity {
    /// Name of the provider module the provider is packaged in.
    pub module_name: String,
    pub provider_name: String,
    /// True for providers reached through a remote namespace.
    #[serde(default)]
    pub is_remote: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remote_info: Option<String>,
}

impl ProviderIdentity {
    #[must_use]
    pub fn new(module_name: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            provider_name: provider_name.into(),
            is_remote: false,
            remote_info: None,
        }
    }
}

/// Per-request context carrying caller identity and tracing information.
/// Cloned into every provider request fanned out from one client request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Authenticated user the request runs as.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_name: Option<String>,
    /// Preferred response languages, most preferred first.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub accept_languages: Vec<String>,
    /// Distributed trace identifier for observability.
    #[serde(default)]
    pub trace_id: String,
    /// Set on provider clones only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider: Option<ProviderIdentity>,
}

impl RequestContext {
    /// Returns a copy addressed to `provider`.
    #[must_use]
    pub fn for_provider(&self, provider: ProviderIdentity) -> Self {
        Self {
            provider: Some(provider),
            ..self.clone()
        }
    }
}
