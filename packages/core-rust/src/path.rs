//! Object paths: the address of a class or instance.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::name::{CimName, NamespaceName};
use crate::types::Value;

/// One `name=value` pair identifying an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBinding {
    pub name: CimName,
    pub value: Value,
}

impl KeyBinding {
    #[must_use]
    pub fn new(name: CimName, value: Value) -> Self {
        Self { name, value }
    }
}

/// Address of a class (no key bindings) or an instance.
///
/// Host and namespace are optional: paths returned by providers are often
/// local and get completed by the broker before they reach the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPath {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub namespace: Option<NamespaceName>,
    pub class_name: CimName,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub key_bindings: Vec<KeyBinding>,
}

impl ObjectPath {
    /// Creates a local class path.
    #[must_use]
    pub fn new(class_name: CimName) -> Self {
        Self {
            host: None,
            namespace: None,
            class_name,
            key_bindings: Vec::new(),
        }
    }

    /// Adds a key binding, keeping bindings sorted by name.
    #[must_use]
    pub fn with_key(mut self, key: KeyBinding) -> Self {
        self.key_bindings.retain(|k| k.name != key.name);
        self.key_bindings.push(key);
        self.key_bindings.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: NamespaceName) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// A path without key bindings names a class rather than an instance.
    #[must_use]
    pub fn is_class_path(&self) -> bool {
        self.key_bindings.is_empty()
    }

    #[must_use]
    pub fn key(&self, name: &str) -> Option<&Value> {
        self.key_bindings
            .iter()
            .find(|k| k.name.eq_str(name))
            .map(|k| &k.value)
    }

    /// Fills in a missing host and namespace. Existing values are kept.
    pub fn complete(&mut self, host: &str, namespace: &NamespaceName) {
        if self.host.as_deref().is_none_or(str::is_empty) {
            self.host = Some(host.to_string());
        }
        if self.namespace.is_none() {
            self.namespace = Some(namespace.clone());
        }
    }

    /// Drops host and namespace, leaving the model path.
    #[must_use]
    pub fn to_local(&self) -> Self {
        Self {
            host: None,
            namespace: None,
            class_name: self.class_name.clone(),
            key_bindings: self.key_bindings.clone(),
        }
    }

    /// Compares class and keys only, ignoring location and key order.
    #[must_use]
    pub fn identifies_same(&self, other: &Self) -> bool {
        self.class_name == other.class_name
            && self.key_bindings.len() == other.key_bindings.len()
            && self
                .key_bindings
                .iter()
                .all(|k| other.key(k.name.as_str()) == Some(&k.value))
    }

    /// Canonical, case-folded rendering of the model path, usable as a map key.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let mut keys: Vec<&KeyBinding> = self.key_bindings.iter().collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        let mut out = self.class_name.as_str().to_ascii_lowercase();
        for (i, k) in keys.iter().enumerate() {
            out.push(if i == 0 { '.' } else { ',' });
            out.push_str(&k.name.as_str().to_ascii_lowercase());
            out.push('=');
            out.push_str(&k.value.to_string());
        }
        out
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "//{host}/")?;
        }
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}:")?;
        }
        write!(f, "{}", self.class_name)?;
        for (i, k) in self.key_bindings.iter().enumerate() {
            f.write_str(if i == 0 { "." } else { "," })?;
            write!(f, "{}={}", k.name, k.value)?;
        }
        Ok(())
    }
}
