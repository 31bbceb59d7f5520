//! Class definitions, qualifiers and property lists.

use serde::{Deserialize, Serialize};

use crate::name::CimName;
use crate::types::{CimType, Value};

/// A qualifier value attached to a class, property or instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Qualifier {
    pub name: CimName,
    pub value: Value,
    #[serde(default)]
    pub propagated: bool,
}

impl Qualifier {
    #[must_use]
    pub fn new(name: CimName, value: Value) -> Self {
        Self {
            name,
            value,
            propagated: false,
        }
    }
}

/// A namespace-level qualifier declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifierDecl {
    pub name: CimName,
    pub cim_type: CimType,
    pub value: Value,
    #[serde(default)]
    pub is_array: bool,
}

/// Declaration of one property within a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDecl {
    pub name: CimName,
    pub cim_type: CimType,
    #[serde(default)]
    pub is_key: bool,
    /// Target class of a reference property.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reference_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class_origin: Option<CimName>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub qualifiers: Vec<Qualifier>,
}

impl PropertyDecl {
    #[must_use]
    pub fn new(name: CimName, cim_type: CimType) -> Self {
        Self {
            name,
            cim_type,
            is_key: false,
            reference_class: None,
            class_origin: None,
            qualifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Declares a reference property pointing at `class`.
    #[must_use]
    pub fn reference(name: CimName, class: CimName) -> Self {
        let mut decl = Self::new(name, CimType::Reference);
        decl.reference_class = Some(class);
        decl
    }
}

/// A class definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub name: CimName,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub super_class: Option<CimName>,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub qualifiers: Vec<Qualifier>,
}

impl Class {
    #[must_use]
    pub fn new(name: CimName) -> Self {
        Self {
            name,
            super_class: None,
            properties: Vec::new(),
            qualifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_super_class(mut self, super_class: CimName) -> Self {
        self.super_class = Some(super_class);
        self
    }

    #[must_use]
    pub fn with_property(mut self, property: PropertyDecl) -> Self {
        self.properties.push(property);
        self
    }

    #[must_use]
    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    #[must_use]
    pub fn qualifier(&self, name: &str) -> Option<&Qualifier> {
        self.qualifiers.iter().find(|q| q.name.eq_str(name))
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties.iter().find(|p| p.name.eq_str(name))
    }

    /// True when the class carries `Association(true)`.
    #[must_use]
    pub fn is_association(&self) -> bool {
        matches!(
            self.qualifier("Association").map(|q| &q.value),
            Some(Value::Boolean(true))
        )
    }

    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyDecl> {
        self.properties.iter().filter(|p| p.is_key)
    }

    /// Reference properties, optionally restricted to one role name.
    pub fn references<'a>(
        &'a self,
        role: Option<&'a str>,
    ) -> impl Iterator<Item = &'a PropertyDecl> + 'a {
        self.properties.iter().filter(move |p| {
            p.cim_type == CimType::Reference && role.is_none_or(|r| p.name.eq_str(r))
        })
    }

    /// Shapes a class for a response the way `GetClass` flags request.
    #[must_use]
    pub fn shaped(
        &self,
        local_only: bool,
        include_qualifiers: bool,
        include_class_origin: bool,
        property_list: &PropertyList,
    ) -> Self {
        let mut out = self.clone();
        if local_only {
            out.properties.retain(|p| {
                p.class_origin
                    .as_ref()
                    .is_none_or(|origin| *origin == self.name)
            });
        }
        out.properties.retain(|p| property_list.includes(&p.name));
        if !include_qualifiers {
            out.qualifiers.clear();
            for p in &mut out.properties {
                p.qualifiers.clear();
            }
        }
        if !include_class_origin {
            for p in &mut out.properties {
                p.class_origin = None;
            }
        }
        out
    }
}

/// Restriction on which properties a response carries.
///
/// `None` means every property; an empty list means no properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyList(pub Option<Vec<CimName>>);

impl PropertyList {
    /// The list that admits every property.
    #[must_use]
    pub fn all() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn only(names: Vec<CimName>) -> Self {
        Self(Some(names))
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        self.0.is_none()
    }

    #[must_use]
    pub fn includes(&self, name: &CimName) -> bool {
        self.0.as_ref().is_none_or(|names| names.contains(name))
    }
}
