//! Instance operations, including the single-property and extrinsic method
//! forms.

use serde::{Deserialize, Serialize};

use crate::instance::Instance;
use crate::name::CimName;
use crate::path::ObjectPath;
use crate::schema::PropertyList;
use crate::types::{ParamValue, Value};

use super::default_true;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInstanceRequest {
    pub instance_name: ObjectPath,
    #[serde(default)]
    pub include_qualifiers: bool,
    #[serde(default)]
    pub include_class_origin: bool,
    #[serde(default)]
    pub property_list: PropertyList,
}

impl GetInstanceRequest {
    #[must_use]
    pub fn new(instance_name: ObjectPath) -> Self {
        Self {
            instance_name,
            include_qualifiers: false,
            include_class_origin: false,
            property_list: PropertyList::all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerateInstancesRequest {
    pub class_name: CimName,
    #[serde(default = "default_true")]
    pub deep_inheritance: bool,
    #[serde(default)]
    pub include_qualifiers: bool,
    #[serde(default)]
    pub include_class_origin: bool,
    #[serde(default)]
    pub property_list: PropertyList,
}

impl EnumerateInstancesRequest {
    #[must_use]
    pub fn new(class_name: CimName) -> Self {
        Self {
            class_name,
            deep_inheritance: true,
            include_qualifiers: false,
            include_class_origin: false,
            property_list: PropertyList::all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerateInstanceNamesRequest {
    pub class_name: CimName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub new_instance: Instance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyInstanceRequest {
    /// Must carry the path of the instance being modified.
    pub modified_instance: Instance,
    #[serde(default = "default_true")]
    pub include_qualifiers: bool,
    #[serde(default)]
    pub property_list: PropertyList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInstanceRequest {
    pub instance_name: ObjectPath,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPropertyRequest {
    pub instance_name: ObjectPath,
    pub property_name: CimName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPropertyRequest {
    pub instance_name: ObjectPath,
    pub property_name: CimName,
    #[serde(default = "null_value")]
    pub new_value: Value,
}

fn null_value() -> Value {
    Value::Null
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeMethodRequest {
    /// Instance path, or a class path for static methods.
    pub instance_name: ObjectPath,
    pub method_name: CimName,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub in_parameters: Vec<ParamValue>,
}
