//! Class and qualifier operations. These are always answered by the object
//! store, never by providers.

use serde::{Deserialize, Serialize};

use crate::name::CimName;
use crate::schema::{Class, PropertyList, QualifierDecl};

use super::default_true;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetClassRequest {
    pub class_name: CimName,
    #[serde(default = "default_true")]
    pub local_only: bool,
    #[serde(default = "default_true")]
    pub include_qualifiers: bool,
    #[serde(default)]
    pub include_class_origin: bool,
    #[serde(default)]
    pub property_list: PropertyList,
}

impl GetClassRequest {
    #[must_use]
    pub fn new(class_name: CimName) -> Self {
        Self {
            class_name,
            local_only: true,
            include_qualifiers: true,
            include_class_origin: false,
            property_list: PropertyList::all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerateClassesRequest {
    /// Start of the enumeration; `None` enumerates from the root.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class_name: Option<CimName>,
    #[serde(default)]
    pub deep_inheritance: bool,
    #[serde(default = "default_true")]
    pub local_only: bool,
    #[serde(default = "default_true")]
    pub include_qualifiers: bool,
    #[serde(default)]
    pub include_class_origin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerateClassNamesRequest {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class_name: Option<CimName>,
    #[serde(default)]
    pub deep_inheritance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClassRequest {
    pub new_class: Class,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyClassRequest {
    pub modified_class: Class,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteClassRequest {
    pub class_name: CimName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetQualifierRequest {
    pub qualifier_name: CimName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetQualifierRequest {
    pub qualifier_declaration: QualifierDecl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQualifierRequest {
    pub qualifier_name: CimName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerateQualifiersRequest {}
