//! Single-target instance operations, method invocation and the
//! enumerating instance operations.

use wbem_core::messages::{
    CimRequest, EnumerateInstanceNamesRequest, EnumerateInstancesRequest, InvokeMethodRequest,
};
use wbem_core::{CimName, ContentKind, ObjectPath};

use super::forward::FanOut;
use super::validate::require_instance_path;
use super::Dispatcher;
use crate::aggregate::{AggregateSettings, AggregateSink};
use crate::directory::{class_not_found_as_invalid, ProviderDirectory};
use crate::service::config::BrokerConfig;
use crate::service::envelope::ReplyHandle;
use crate::service::operation::{
    OperationContext, OperationError, OperationResponse, OperationResult,
};

/// Target class and, where the operation addresses an existing instance,
/// its path.
fn target_of(request: &CimRequest) -> Option<(CimName, Option<&ObjectPath>)> {
    match request {
        CimRequest::GetInstance(r) => Some((r.instance_name.class_name.clone(), Some(&r.instance_name))),
        CimRequest::CreateInstance(r) => Some((r.new_instance.class_name.clone(), None)),
        CimRequest::ModifyInstance(r) => Some((
            r.modified_instance.class_name.clone(),
            r.modified_instance.path.as_ref(),
        )),
        CimRequest::DeleteInstance(r) => {
            Some((r.instance_name.class_name.clone(), Some(&r.instance_name)))
        }
        CimRequest::GetProperty(r) => Some((r.instance_name.class_name.clone(), Some(&r.instance_name))),
        CimRequest::SetProperty(r) => Some((r.instance_name.class_name.clone(), Some(&r.instance_name))),
        _ => None,
    }
}

impl Dispatcher {
    /// Routes a single-target operation to its one provider, or answers it
    /// from the object store.
    pub(super) fn single_target(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        request: CimRequest,
        reply: ReplyHandle,
    ) {
        let request = match request {
            CimRequest::InvokeMethod(req) => return self.invoke_method(ctx, config, req, reply),
            other => other,
        };
        let Some((class, path)) = target_of(&request) else {
            Self::reject(
                ctx,
                reply,
                OperationError::internal(format!("{} is not a single-target operation", request.name())),
            );
            return;
        };

        let checked = match (&request, path) {
            (CimRequest::ModifyInstance(_), None) => Err(OperationError::invalid_parameter(
                "ModifiedInstance has no instance path",
            )),
            (_, Some(path)) => require_instance_path(path, "InstanceName"),
            (_, None) => Ok(()),
        }
        .and_then(|()| self.require_target_class(ctx, config, &class));
        if let Err(err) = checked {
            Self::reject(ctx, reply, err);
            return;
        }

        if let Some(info) = self
            .directory
            .lookup_instance_provider(config, &ctx.namespace, &class)
        {
            self.forward_single(ctx, config, &info, request, reply);
            return;
        }
        if !self.store.is_default_instance_provider() {
            Self::reject(
                ctx,
                reply,
                OperationError::not_supported(format!("no provider serves class {class}")),
            );
            return;
        }
        reply.send(self.store_single_target(ctx, request));
    }

    fn store_single_target(&self, ctx: &OperationContext, request: CimRequest) -> OperationResult {
        let ns = &ctx.namespace;
        let store = self.store.as_ref();
        match request {
            CimRequest::GetInstance(req) => store
                .get_instance(ns, &req)
                .map(|i| OperationResponse::Instance(Box::new(i))),
            CimRequest::CreateInstance(req) => store
                .create_instance(ns, req.new_instance)
                .map(OperationResponse::Created),
            CimRequest::ModifyInstance(req) => store
                .modify_instance(ns, &req)
                .map(|()| OperationResponse::Empty),
            CimRequest::DeleteInstance(req) => store
                .delete_instance(ns, &req.instance_name)
                .map(|()| OperationResponse::Empty),
            CimRequest::GetProperty(req) => store
                .get_property(ns, &req.instance_name, &req.property_name)
                .map(OperationResponse::Property),
            CimRequest::SetProperty(req) => store
                .set_property(ns, &req.instance_name, &req.property_name, req.new_value)
                .map(|()| OperationResponse::Empty),
            other => Err(OperationError::internal(format!(
                "{} cannot be answered by the object store",
                other.name()
            ))),
        }
    }

    /// Control-provider classes have no store definition; every other
    /// target class must exist.
    pub(super) fn require_target_class(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        class: &CimName,
    ) -> Result<(), OperationError> {
        if ProviderDirectory::is_control_class(config, &ctx.namespace, class) {
            return Ok(());
        }
        self.store
            .get_class(&ctx.namespace, &wbem_core::messages::GetClassRequest::new(class.clone()))
            .map(|_| ())
            .map_err(|err| class_not_found_as_invalid(err, class))
    }

    fn invoke_method(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        req: InvokeMethodRequest,
        reply: ReplyHandle,
    ) {
        let class = req.instance_name.class_name.clone();
        if let Err(err) = self.require_target_class(ctx, config, &class) {
            Self::reject(ctx, reply, err);
            return;
        }
        match self
            .directory
            .lookup_method_provider(config, &ctx.namespace, &class, &req.method_name)
        {
            Some(info) => {
                self.forward_single(ctx, config, &info, CimRequest::InvokeMethod(req), reply);
            }
            None => Self::reject(
                ctx,
                reply,
                OperationError::MethodNotAvailable {
                    message: format!("no provider for method {}.{}", class, req.method_name),
                },
            ),
        }
    }

    pub(super) fn enumerate_instances(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        req: EnumerateInstancesRequest,
        reply: ReplyHandle,
    ) {
        let list = match self.resolve_instance_providers(ctx, config, &req.class_name) {
            Ok(list) => list,
            Err(err) => return Self::reject(ctx, reply, err),
        };
        let settings = AggregateSettings::new(
            ContentKind::Instances,
            config.host_name.clone(),
            ctx.namespace.clone(),
        )
        .with_shaping(
            req.include_qualifiers,
            req.include_class_origin,
            req.property_list.clone(),
        );
        let request = CimRequest::EnumerateInstances(req);
        self.fan_out(
            ctx,
            config,
            FanOut {
                operation: "EnumerateInstances",
                list: &list,
                settings,
                sink: AggregateSink::Reply(reply),
                filter_store: false,
            },
            Some(|class: &CimName| self.store_source(&ctx.namespace, &request, class)),
            |info| (request.with_target_class(&info.class_name), false),
        );
    }

    pub(super) fn enumerate_instance_names(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        req: EnumerateInstanceNamesRequest,
        reply: ReplyHandle,
    ) {
        let list = match self.resolve_instance_providers(ctx, config, &req.class_name) {
            Ok(list) => list,
            Err(err) => return Self::reject(ctx, reply, err),
        };
        let settings =
            AggregateSettings::new(ContentKind::Paths, config.host_name.clone(), ctx.namespace.clone());
        let request = CimRequest::EnumerateInstanceNames(req);
        self.fan_out(
            ctx,
            config,
            FanOut {
                operation: "EnumerateInstanceNames",
                list: &list,
                settings,
                sink: AggregateSink::Reply(reply),
                filter_store: false,
            },
            Some(|class: &CimName| self.store_source(&ctx.namespace, &request, class)),
            |info| (request.with_target_class(&info.class_name), false),
        );
    }

    /// Resolves the providers of `class` and its subclasses.
    ///
    /// # Errors
    ///
    /// Lookup failures, and `NotSupported` when no provider serves any class
    /// and the object store is not the default instance provider.
    pub(super) fn resolve_instance_providers(
        &self,
        ctx: &OperationContext,
        config: &BrokerConfig,
        class: &CimName,
    ) -> Result<crate::directory::ProviderInfoList, OperationError> {
        let list = self
            .directory
            .lookup_instance_providers(config, &ctx.namespace, class)?;
        if list.provider_count() == 0 && !self.store.is_default_instance_provider() {
            return Err(OperationError::not_supported(format!(
                "no provider serves {class} or its subclasses"
            )));
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use wbem_core::messages::{
        CreateInstanceRequest, DeleteInstanceRequest, GetInstanceRequest, GetPropertyRequest,
    };
    use wbem_core::{Instance, ResponseData, StatusCode, Value};

    use super::*;
    use crate::test_support::{
        disk, disk_path, harness, name, Behavior, Harness, ScriptedTransport, StaticRegistry,
    };

    #[tokio::test]
    async fn get_instance_falls_back_to_store() {
        let h = harness();
        let result = h
            .run(CimRequest::GetInstance(GetInstanceRequest::new(disk_path(2))))
            .await;
        let Ok(OperationResponse::Instance(instance)) = result else {
            panic!("expected instance, got {result:?}");
        };
        assert_eq!(instance.property("DeviceID"), Some(&Value::Uint(2)));
    }

    #[tokio::test]
    async fn get_instance_forwards_to_registered_provider() {
        let registry =
            StaticRegistry::default().with_instance_provider("Test_Disk", "DiskModule", "DiskProvider");
        let transport = ScriptedTransport::default().with(
            "DiskProvider",
            Behavior::Reply(Ok(OperationResponse::Instance(Box::new(disk(42))))),
        );
        let h = Harness::new(registry, transport);
        let result = h
            .run(CimRequest::GetInstance(GetInstanceRequest::new(disk_path(2))))
            .await;
        let Ok(OperationResponse::Instance(instance)) = result else {
            panic!("expected instance");
        };
        assert_eq!(instance.property("DeviceID"), Some(&Value::Uint(42)));
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].context.provider.as_ref().map(|p| p.provider_name.as_str()),
            Some("DiskProvider")
        );
        assert!(sent[0].normalize);
    }

    #[tokio::test]
    async fn provider_error_passes_through() {
        let registry =
            StaticRegistry::default().with_instance_provider("Test_Disk", "DiskModule", "DiskProvider");
        let transport = ScriptedTransport::default().with(
            "DiskProvider",
            Behavior::Reply(Err(OperationError::from_provider(StatusCode::AccessDenied, "no"))),
        );
        let h = Harness::new(registry, transport);
        let err = h
            .run(CimRequest::DeleteInstance(DeleteInstanceRequest {
                instance_name: disk_path(1),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::AccessDenied);
    }

    #[tokio::test]
    async fn dropped_responder_fails_request() {
        let registry =
            StaticRegistry::default().with_instance_provider("Test_Disk", "DiskModule", "DiskProvider");
        let transport = ScriptedTransport::default().with("DiskProvider", Behavior::Drop);
        let h = Harness::new(registry, transport);
        let err = h
            .run(CimRequest::GetInstance(GetInstanceRequest::new(disk_path(1))))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::Failed);
    }

    #[tokio::test]
    async fn class_path_rejected_before_lookup() {
        let h = harness();
        let err = h
            .run(CimRequest::GetInstance(GetInstanceRequest::new(ObjectPath::new(name(
                "Test_Disk",
            )))))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidParameter);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_class_is_invalid_class() {
        let h = harness();
        let path = ObjectPath::new(name("No_Such"))
            .with_key(wbem_core::KeyBinding::new(name("Id"), Value::Uint(1)));
        let err = h
            .run(CimRequest::GetInstance(GetInstanceRequest::new(path)))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidClass);
    }

    #[tokio::test]
    async fn create_then_get_property_through_store() {
        let h = harness();
        let created = h
            .run(CimRequest::CreateInstance(CreateInstanceRequest {
                new_instance: Instance::new(name("Test_Disk"))
                    .with_property(name("DeviceID"), Value::Uint(9))
                    .with_property(name("Caption"), Value::from("spare")),
            }))
            .await
            .unwrap();
        let OperationResponse::Created(path) = created else {
            panic!("expected created path");
        };
        let value = h
            .run(CimRequest::GetProperty(GetPropertyRequest {
                instance_name: path,
                property_name: name("Caption"),
            }))
            .await
            .unwrap();
        assert_eq!(value, OperationResponse::Property(Value::from("spare")));
    }

    #[tokio::test]
    async fn method_without_provider_not_available() {
        let h = harness();
        let err = h
            .run(CimRequest::InvokeMethod(InvokeMethodRequest {
                instance_name: disk_path(1),
                method_name: name("Reset"),
                in_parameters: Vec::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::MethodNotAvailable);
    }

    #[tokio::test]
    async fn method_forwarded_to_method_provider() {
        let registry = StaticRegistry::default().with_method_provider(
            "Test_Disk",
            "Reset",
            "DiskModule",
            "DiskMethods",
        );
        let transport = ScriptedTransport::default().with(
            "DiskMethods",
            Behavior::Reply(Ok(OperationResponse::MethodResult {
                return_value: Value::Uint(0),
                out_parameters: Vec::new(),
            })),
        );
        let h = Harness::new(registry, transport);
        let result = h
            .run(CimRequest::InvokeMethod(InvokeMethodRequest {
                instance_name: disk_path(1),
                method_name: name("Reset"),
                in_parameters: Vec::new(),
            }))
            .await
            .unwrap();
        assert!(matches!(result, OperationResponse::MethodResult { .. }));
    }

    #[tokio::test]
    async fn enumerate_merges_store_and_providers() {
        let registry =
            StaticRegistry::default().with_instance_provider("Test_Tape", "TapeModule", "TapeProvider");
        let transport = ScriptedTransport::default().with(
            "TapeProvider",
            Behavior::Data(vec![ResponseData::Instances(vec![disk(10), disk(11)])]),
        );
        let h = Harness::new(registry, transport);
        let result = h
            .run(CimRequest::EnumerateInstances(EnumerateInstancesRequest::new(name(
                "Test_Device",
            ))))
            .await;
        let Ok(OperationResponse::Data(ResponseData::Instances(items))) = result else {
            panic!("expected instances, got {result:?}");
        };
        assert_eq!(items.len(), 5);
        assert!(items.iter().all(|i| i.path.as_ref().is_some_and(|p| p.host.is_some())));

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        let CimRequest::EnumerateInstances(clone) = &sent[0].operation else {
            panic!("expected enumeration clone");
        };
        assert_eq!(clone.class_name, name("Test_Tape"));
    }

    #[tokio::test]
    async fn enumerate_names_from_store_only() {
        let h = harness();
        let result = h
            .run(CimRequest::EnumerateInstanceNames(EnumerateInstanceNamesRequest {
                class_name: name("Test_Disk"),
            }))
            .await;
        let Ok(OperationResponse::Data(ResponseData::Paths(paths))) = result else {
            panic!("expected paths");
        };
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.namespace.is_some()));
    }

    #[tokio::test]
    async fn breadth_ceiling_sends_nothing() {
        let registry = StaticRegistry::default()
            .with_instance_provider("Test_Device", "M", "P1")
            .with_instance_provider("Test_Disk", "M", "P2")
            .with_instance_provider("Test_Tape", "M", "P3");
        let h = Harness::with_config(
            registry,
            ScriptedTransport::default(),
            BrokerConfig {
                max_enumeration_breadth: 2,
                ..BrokerConfig::default()
            },
        );
        let err = h
            .run(CimRequest::EnumerateInstances(EnumerateInstancesRequest::new(name(
                "Test_Device",
            ))))
            .await
            .unwrap_err();
        assert!(err.is_not_supported());
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn partial_not_supported_is_dropped() {
        let registry = StaticRegistry::default()
            .with_instance_provider("Test_Device", "M", "P1")
            .with_instance_provider("Test_Disk", "M", "P2")
            .with_instance_provider("Test_Tape", "M", "P3");
        let not_supported =
            || Behavior::Reply(Err(OperationError::from_provider(StatusCode::NotSupported, "no")));
        let transport = ScriptedTransport::default()
            .with("P1", not_supported())
            .with("P2", not_supported())
            .with("P3", Behavior::Data(vec![ResponseData::Instances(vec![disk(7)])]));
        let h = Harness::new(registry, transport);
        let result = h
            .run(CimRequest::EnumerateInstances(EnumerateInstancesRequest::new(name(
                "Test_Device",
            ))))
            .await;
        let Ok(OperationResponse::Data(data)) = result else {
            panic!("expected data, got {result:?}");
        };
        assert_eq!(data.len(), 1);
    }

    #[tokio::test]
    async fn all_not_supported_fails() {
        let registry = StaticRegistry::default()
            .with_instance_provider("Test_Device", "M", "P1")
            .with_instance_provider("Test_Disk", "M", "P2")
            .with_instance_provider("Test_Tape", "M", "P3");
        let not_supported =
            || Behavior::Reply(Err(OperationError::from_provider(StatusCode::NotSupported, "no")));
        let transport = ScriptedTransport::default()
            .with("P1", not_supported())
            .with("P2", not_supported())
            .with("P3", not_supported());
        let h = Harness::new(registry, transport);
        let err = h
            .run(CimRequest::EnumerateInstances(EnumerateInstancesRequest::new(name(
                "Test_Device",
            ))))
            .await
            .unwrap_err();
        assert!(err.is_not_supported());
    }

    #[tokio::test]
    async fn store_not_default_and_no_provider_is_not_supported() {
        let h = Harness::with_store(
            crate::test_support::fixture_store_with_default(false),
            StaticRegistry::default(),
            ScriptedTransport::default(),
        );
        let err = h
            .run(CimRequest::EnumerateInstances(EnumerateInstancesRequest::new(name(
                "Test_Disk",
            ))))
            .await
            .unwrap_err();
        assert!(err.is_not_supported());
        let err = h
            .run(CimRequest::GetInstance(GetInstanceRequest::new(disk_path(1))))
            .await
            .unwrap_err();
        assert!(err.is_not_supported());
    }
}
