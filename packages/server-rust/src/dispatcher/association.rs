//! Associators, AssociatorNames, References and ReferenceNames.

use wbem_core::messages::CimRequest;
use wbem_core::{CimName, ContentKind, NamespaceName, ObjectPath, ResponseData};

use super::forward::FanOut;
use super::validate::validate_role;
use super::Dispatcher;
use crate::aggregate::{AggregateSettings, AggregateSink};
use crate::directory::ProviderInfoList;
use crate::service::config::BrokerConfig;
use crate::service::envelope::ReplyHandle;
use crate::service::operation::{OperationContext, OperationError, OperationResponse};

/// The traversal parameters shared by the four association operations.
pub(super) struct Traversal<'a> {
    pub anchor: &'a ObjectPath,
    /// Association class filter: `AssocClass` for associators, `ResultClass`
    /// for references.
    pub assoc_filter: Option<&'a CimName>,
    pub role: Option<&'a str>,
    pub result_role: Option<&'a str>,
}

impl<'a> Traversal<'a> {
    pub(super) fn of(request: &'a CimRequest) -> Option<Self> {
        let traversal = match request {
            CimRequest::Associators(r) => Self {
                anchor: &r.object_name,
                assoc_filter: r.assoc_class.as_ref(),
                role: r.role.as_deref(),
                result_role: r.result_role.as_deref(),
            },
            CimRequest::AssociatorNames(r) => Self {
                anchor: &r.object_name,
                assoc_filter: r.assoc_class.as_ref(),
                role: r.role.as_deref(),
                result_role: r.result_role.as_deref(),
            },
            CimRequest::References(r) => Self {
                anchor: &r.object_name,
                assoc_filter: r.result_class.as_ref(),
                role: r.role.as_deref(),
                result_role: None,
            },
            CimRequest::ReferenceNames(r) => Self {
                anchor: &r.object_name,
                assoc_filter: r.result_class.as_ref(),
                role: r.role.as_deref(),
                result_role: None,
            },
            _ => return None,
        };
        Some(traversal)
    }
}

impl Dispatcher {
    pub(super) fn association(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        request: CimRequest,
        reply: ReplyHandle,
    ) {
        let is_class_anchor = match self.check_traversal(ctx, config, &request) {
            Ok(traversal) => traversal.anchor.is_class_path(),
            Err(err) => return Self::reject(ctx, reply, err),
        };
        let ns = &ctx.namespace;

        if is_class_anchor {
            let result = self.traverse_store(ns, &request).map(|mut data| {
                data.complete_paths(&config.host_name, ns);
                OperationResponse::Data(data)
            });
            reply.send(result);
            return;
        }

        let list = match self.resolve_association_providers(ctx, config, &request) {
            Ok(list) => list,
            Err(err) => return Self::reject(ctx, reply, err),
        };
        let mut settings = AggregateSettings::new(
            ContentKind::Objects,
            config.host_name.clone(),
            ns.clone(),
        );
        match &request {
            CimRequest::Associators(r) => {
                settings = settings.with_shaping(
                    r.include_qualifiers,
                    r.include_class_origin,
                    r.property_list.clone(),
                );
            }
            CimRequest::References(r) => {
                settings = settings.with_shaping(
                    r.include_qualifiers,
                    r.include_class_origin,
                    r.property_list.clone(),
                );
            }
            _ => settings.content_kind = ContentKind::Paths,
        }
        self.fan_out(
            ctx,
            config,
            FanOut {
                operation: request.name(),
                list: &list,
                settings,
                sink: AggregateSink::Reply(reply),
                filter_store: false,
            },
            Some(|class: &CimName| self.store_source(ns, &request, class)),
            |info| (request.with_target_class(&info.class_name), false),
        );
    }

    /// Common checks for every association operation, paginated or not.
    ///
    /// # Errors
    ///
    /// `NotSupported` when traversal is disabled, `InvalidParameter` for
    /// malformed roles, `InvalidClass` for an unknown anchor class.
    pub(super) fn check_traversal<'r>(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        request: &'r CimRequest,
    ) -> Result<Traversal<'r>, OperationError> {
        if !config.enable_association_traversal {
            return Err(OperationError::not_supported(
                "association traversal is disabled",
            ));
        }
        let traversal = Traversal::of(request).ok_or_else(|| {
            OperationError::internal(format!("{} is not an association operation", request.name()))
        })?;
        validate_role(traversal.role, "Role")?;
        validate_role(traversal.result_role, "ResultRole")?;
        self.require_target_class(ctx, config, &traversal.anchor.class_name)?;
        Ok(traversal)
    }

    /// Resolves the association providers for an instance-anchored
    /// traversal.
    pub(super) fn resolve_association_providers(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        request: &CimRequest,
    ) -> Result<ProviderInfoList, OperationError> {
        let traversal = Traversal::of(request).ok_or_else(|| {
            OperationError::internal(format!("{} is not an association operation", request.name()))
        })?;
        let list = self.directory.lookup_association_providers(
            config,
            &ctx.namespace,
            traversal.anchor,
            traversal.assoc_filter,
            traversal.role,
        )?;
        if list.provider_count() == 0 && !self.store.is_default_instance_provider() {
            return Err(OperationError::not_supported(format!(
                "no association provider serves {}",
                traversal.anchor.class_name
            )));
        }
        Ok(list)
    }

    /// Runs an association operation against the object store.
    pub(super) fn traverse_store(
        &self,
        ns: &NamespaceName,
        request: &CimRequest,
    ) -> Result<ResponseData, OperationError> {
        let store = self.store.as_ref();
        match request {
            CimRequest::Associators(r) => store.associators(ns, r).map(ResponseData::Objects),
            CimRequest::AssociatorNames(r) => {
                store.associator_names(ns, r).map(ResponseData::Paths)
            }
            CimRequest::References(r) => store.references(ns, r).map(ResponseData::Objects),
            CimRequest::ReferenceNames(r) => store.reference_names(ns, r).map(ResponseData::Paths),
            other => Err(OperationError::internal(format!(
                "{} is not an association operation",
                other.name()
            ))),
        }
    }
}
