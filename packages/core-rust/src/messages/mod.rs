//! Typed operation messages.
//!
//! One request struct per intrinsic operation, grouped by domain. All types use
//! camelCase field names and encode with named `MsgPack` maps
//! (`rmp_serde::to_vec_named()`), the same layout as the JSON form.

pub mod association;
pub mod class;
pub mod instance;
pub mod pull;
pub mod query;

use serde::{Deserialize, Serialize};

use crate::name::CimName;

pub use association::{
    AssociatorNamesRequest, AssociatorsRequest, ReferenceNamesRequest, ReferencesRequest,
};
pub use class::{
    CreateClassRequest, DeleteClassRequest, DeleteQualifierRequest, EnumerateClassNamesRequest,
    EnumerateClassesRequest, EnumerateQualifiersRequest, GetClassRequest, GetQualifierRequest,
    ModifyClassRequest, SetQualifierRequest,
};
pub use instance::{
    CreateInstanceRequest, DeleteInstanceRequest, EnumerateInstanceNamesRequest,
    EnumerateInstancesRequest, GetInstanceRequest, GetPropertyRequest, InvokeMethodRequest,
    ModifyInstanceRequest, SetPropertyRequest,
};
pub use pull::{
    EnumerationContextRequest, OpenAssociatorInstancePathsRequest,
    OpenAssociatorInstancesRequest, OpenEnumerateInstancePathsRequest,
    OpenEnumerateInstancesRequest, OpenOptions, OpenOrPullResponse, OpenQueryInstancesRequest,
    OpenReferenceInstancePathsRequest, OpenReferenceInstancesRequest, PullRequest,
};
pub use query::ExecQueryRequest;

pub(crate) fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// CimRequest
// ---------------------------------------------------------------------------

/// Every operation the broker accepts, discriminated by a `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CimRequest {
    GetClass(GetClassRequest),
    EnumerateClasses(EnumerateClassesRequest),
    EnumerateClassNames(EnumerateClassNamesRequest),
    CreateClass(CreateClassRequest),
    ModifyClass(ModifyClassRequest),
    DeleteClass(DeleteClassRequest),
    GetQualifier(GetQualifierRequest),
    SetQualifier(SetQualifierRequest),
    DeleteQualifier(DeleteQualifierRequest),
    EnumerateQualifiers(EnumerateQualifiersRequest),

    GetInstance(GetInstanceRequest),
    EnumerateInstances(EnumerateInstancesRequest),
    EnumerateInstanceNames(EnumerateInstanceNamesRequest),
    CreateInstance(CreateInstanceRequest),
    ModifyInstance(ModifyInstanceRequest),
    DeleteInstance(DeleteInstanceRequest),
    GetProperty(GetPropertyRequest),
    SetProperty(SetPropertyRequest),
    InvokeMethod(InvokeMethodRequest),

    Associators(AssociatorsRequest),
    AssociatorNames(AssociatorNamesRequest),
    References(ReferencesRequest),
    ReferenceNames(ReferenceNamesRequest),

    ExecQuery(ExecQueryRequest),

    OpenEnumerateInstances(OpenEnumerateInstancesRequest),
    OpenEnumerateInstancePaths(OpenEnumerateInstancePathsRequest),
    OpenReferenceInstances(OpenReferenceInstancesRequest),
    OpenReferenceInstancePaths(OpenReferenceInstancePathsRequest),
    OpenAssociatorInstances(OpenAssociatorInstancesRequest),
    OpenAssociatorInstancePaths(OpenAssociatorInstancePathsRequest),
    OpenQueryInstances(OpenQueryInstancesRequest),
    PullInstancesWithPath(PullRequest),
    PullInstancePaths(PullRequest),
    PullInstances(PullRequest),
    CloseEnumeration(EnumerationContextRequest),
    EnumerationCount(EnumerationContextRequest),
}

impl CimRequest {
    /// Operation name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetClass(_) => "GetClass",
            Self::EnumerateClasses(_) => "EnumerateClasses",
            Self::EnumerateClassNames(_) => "EnumerateClassNames",
            Self::CreateClass(_) => "CreateClass",
            Self::ModifyClass(_) => "ModifyClass",
            Self::DeleteClass(_) => "DeleteClass",
            Self::GetQualifier(_) => "GetQualifier",
            Self::SetQualifier(_) => "SetQualifier",
            Self::DeleteQualifier(_) => "DeleteQualifier",
            Self::EnumerateQualifiers(_) => "EnumerateQualifiers",
            Self::GetInstance(_) => "GetInstance",
            Self::EnumerateInstances(_) => "EnumerateInstances",
            Self::EnumerateInstanceNames(_) => "EnumerateInstanceNames",
            Self::CreateInstance(_) => "CreateInstance",
            Self::ModifyInstance(_) => "ModifyInstance",
            Self::DeleteInstance(_) => "DeleteInstance",
            Self::GetProperty(_) => "GetProperty",
            Self::SetProperty(_) => "SetProperty",
            Self::InvokeMethod(_) => "InvokeMethod",
            Self::Associators(_) => "Associators",
            Self::AssociatorNames(_) => "AssociatorNames",
            Self::References(_) => "References",
            Self::ReferenceNames(_) => "ReferenceNames",
            Self::ExecQuery(_) => "ExecQuery",
            Self::OpenEnumerateInstances(_) => "OpenEnumerateInstances",
            Self::OpenEnumerateInstancePaths(_) => "OpenEnumerateInstancePaths",
            Self::OpenReferenceInstances(_) => "OpenReferenceInstances",
            Self::OpenReferenceInstancePaths(_) => "OpenReferenceInstancePaths",
            Self::OpenAssociatorInstances(_) => "OpenAssociatorInstances",
            Self::OpenAssociatorInstancePaths(_) => "OpenAssociatorInstancePaths",
            Self::OpenQueryInstances(_) => "OpenQueryInstances",
            Self::PullInstancesWithPath(_) => "PullInstancesWithPath",
            Self::PullInstancePaths(_) => "PullInstancePaths",
            Self::PullInstances(_) => "PullInstances",
            Self::CloseEnumeration(_) => "CloseEnumeration",
            Self::EnumerationCount(_) => "EnumerationCount",
        }
    }

    /// True for the Open/Pull/Close family.
    #[must_use]
    pub fn is_paginated(&self) -> bool {
        matches!(
            self,
            Self::OpenEnumerateInstances(_)
                | Self::OpenEnumerateInstancePaths(_)
                | Self::OpenReferenceInstances(_)
                | Self::OpenReferenceInstancePaths(_)
                | Self::OpenAssociatorInstances(_)
                | Self::OpenAssociatorInstancePaths(_)
                | Self::OpenQueryInstances(_)
                | Self::PullInstancesWithPath(_)
                | Self::PullInstancePaths(_)
                | Self::PullInstances(_)
                | Self::CloseEnumeration(_)
                | Self::EnumerationCount(_)
        )
    }

    /// Returns a copy retargeted at one concrete class for a single provider.
    ///
    /// Enumerations substitute the enumerated class, Associators and
    /// AssociatorNames the association class, References and ReferenceNames
    /// the result class. Other operations are returned unchanged.
    #[must_use]
    pub fn with_target_class(&self, class: &CimName) -> Self {
        let mut out = self.clone();
        match &mut out {
            Self::EnumerateInstances(r) => r.class_name = class.clone(),
            Self::EnumerateInstanceNames(r) => r.class_name = class.clone(),
            Self::Associators(r) => r.assoc_class = Some(class.clone()),
            Self::AssociatorNames(r) => r.assoc_class = Some(class.clone()),
            Self::References(r) => r.result_class = Some(class.clone()),
            Self::ReferenceNames(r) => r.result_class = Some(class.clone()),
            _ => {}
        }
        out
    }

    /// Encodes the request as a named `MsgPack` map.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Decodes a request produced by [`CimRequest::to_msgpack`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid request.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}
