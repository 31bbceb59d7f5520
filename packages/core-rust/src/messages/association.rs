//! Association traversal: Associators, AssociatorNames, References and
//! ReferenceNames.

use serde::{Deserialize, Serialize};

use crate::name::CimName;
use crate::path::ObjectPath;
use crate::schema::PropertyList;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociatorsRequest {
    /// Anchor of the traversal: an instance path, or a class path for
    /// schema-level traversal.
    pub object_name: ObjectPath,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assoc_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_role: Option<String>,
    #[serde(default)]
    pub include_qualifiers: bool,
    #[serde(default)]
    pub include_class_origin: bool,
    #[serde(default)]
    pub property_list: PropertyList,
}

impl AssociatorsRequest {
    #[must_use]
    pub fn new(object_name: ObjectPath) -> Self {
        Self {
            object_name,
            assoc_class: None,
            result_class: None,
            role: None,
            result_role: None,
            include_qualifiers: false,
            include_class_origin: false,
            property_list: PropertyList::all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociatorNamesRequest {
    pub object_name: ObjectPath,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assoc_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesRequest {
    pub object_name: ObjectPath,
    /// Restricts results to this association class and its subclasses.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(default)]
    pub include_qualifiers: bool,
    #[serde(default)]
    pub include_class_origin: bool,
    #[serde(default)]
    pub property_list: PropertyList,
}

impl ReferencesRequest {
    #[must_use]
    pub fn new(object_name: ObjectPath) -> Self {
        Self {
            object_name,
            result_class: None,
            role: None,
            include_qualifiers: false,
            include_class_origin: false,
            property_list: PropertyList::all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceNamesRequest {
    pub object_name: ObjectPath,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
}
