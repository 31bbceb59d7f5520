//! The paginated Open/Pull/Close operation family.

use serde::{Deserialize, Serialize};

use crate::instance::ResponseData;
use crate::name::CimName;
use crate::path::ObjectPath;
use crate::schema::PropertyList;

/// Parameters shared by every Open operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOptions {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filter_query_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filter_query: Option<String>,
    /// Interoperation timeout in seconds. Absent means the server default;
    /// zero means no timeout.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_timeout: Option<u32>,
    #[serde(default)]
    pub continue_on_error: bool,
    /// Objects to return with the open reply. Absent means zero.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_object_count: Option<u32>,
}

impl OpenOptions {
    #[must_use]
    pub fn with_max_object_count(max_object_count: u32) -> Self {
        Self {
            max_object_count: Some(max_object_count),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenEnumerateInstancesRequest {
    pub class_name: CimName,
    #[serde(default = "super::default_true")]
    pub deep_inheritance: bool,
    #[serde(default)]
    pub include_class_origin: bool,
    #[serde(default)]
    pub property_list: PropertyList,
    #[serde(flatten)]
    pub options: OpenOptions,
}

impl OpenEnumerateInstancesRequest {
    #[must_use]
    pub fn new(class_name: CimName, options: OpenOptions) -> Self {
        Self {
            class_name,
            deep_inheritance: true,
            include_class_origin: false,
            property_list: PropertyList::all(),
            options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenEnumerateInstancePathsRequest {
    pub class_name: CimName,
    #[serde(flatten)]
    pub options: OpenOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenReferenceInstancesRequest {
    pub instance_name: ObjectPath,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(default)]
    pub include_class_origin: bool,
    #[serde(default)]
    pub property_list: PropertyList,
    #[serde(flatten)]
    pub options: OpenOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenReferenceInstancePathsRequest {
    pub instance_name: ObjectPath,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub options: OpenOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAssociatorInstancesRequest {
    pub instance_name: ObjectPath,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assoc_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_role: Option<String>,
    #[serde(default)]
    pub include_class_origin: bool,
    #[serde(default)]
    pub property_list: PropertyList,
    #[serde(flatten)]
    pub options: OpenOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAssociatorInstancePathsRequest {
    pub instance_name: ObjectPath,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub assoc_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_class: Option<CimName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result_role: Option<String>,
    #[serde(flatten)]
    pub options: OpenOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenQueryInstancesRequest {
    pub filter_query_language: String,
    pub filter_query: String,
    #[serde(default)]
    pub return_query_result_class: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_timeout: Option<u32>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_object_count: Option<u32>,
}

/// Body of PullInstancesWithPath, PullInstancePaths and PullInstances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub enumeration_context: String,
    /// Required on pulls; absence is rejected.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_object_count: Option<u32>,
}

impl PullRequest {
    #[must_use]
    pub fn new(enumeration_context: impl Into<String>, max_object_count: u32) -> Self {
        Self {
            enumeration_context: enumeration_context.into(),
            max_object_count: Some(max_object_count),
        }
    }
}

/// Body of CloseEnumeration and EnumerationCount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerationContextRequest {
    pub enumeration_context: String,
}

/// Reply to every Open and Pull operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrPullResponse {
    pub data: ResponseData,
    pub end_of_sequence: bool,
    /// Present only while the sequence continues.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub enumeration_context: Option<String>,
}
