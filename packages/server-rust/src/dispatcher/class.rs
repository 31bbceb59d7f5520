//! Class and qualifier operations, answered by the object store.

use wbem_core::messages::CimRequest;

use super::Dispatcher;
use crate::service::operation::{OperationContext, OperationError, OperationResponse, OperationResult};

impl Dispatcher {
    pub(super) fn class_operation(&self, ctx: &OperationContext, request: CimRequest) -> OperationResult {
        let ns = &ctx.namespace;
        let store = self.store.as_ref();
        match request {
            CimRequest::GetClass(req) => store
                .get_class(ns, &req)
                .map(|c| OperationResponse::Class(Box::new(c))),
            CimRequest::EnumerateClasses(req) => {
                store.enumerate_classes(ns, &req).map(OperationResponse::Classes)
            }
            CimRequest::EnumerateClassNames(req) => store
                .enumerate_class_names(ns, &req)
                .map(OperationResponse::ClassNames),
            CimRequest::CreateClass(req) => store
                .create_class(ns, req.new_class)
                .map(|()| OperationResponse::Empty),
            CimRequest::ModifyClass(req) => store
                .modify_class(ns, req.modified_class)
                .map(|()| OperationResponse::Empty),
            CimRequest::DeleteClass(req) => store
                .delete_class(ns, &req.class_name)
                .map(|()| OperationResponse::Empty),
            CimRequest::GetQualifier(req) => store
                .get_qualifier(ns, &req.qualifier_name)
                .map(OperationResponse::Qualifier),
            CimRequest::SetQualifier(req) => store
                .set_qualifier(ns, req.qualifier_declaration)
                .map(|()| OperationResponse::Empty),
            CimRequest::DeleteQualifier(req) => store
                .delete_qualifier(ns, &req.qualifier_name)
                .map(|()| OperationResponse::Empty),
            CimRequest::EnumerateQualifiers(_) => {
                store.enumerate_qualifiers(ns).map(OperationResponse::Qualifiers)
            }
            other => Err(OperationError::internal(format!(
                "{} is not a class operation",
                other.name()
            ))),
        }
    }
}
