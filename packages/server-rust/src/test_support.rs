//! Shared fixtures for unit tests: a populated object store, a static
//! provider registry, a scripted provider transport and a tiny WQL subset.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use wbem_core::messages::{CimRequest, OpenOrPullResponse};
use wbem_core::{
    CimName, CimType, Class, Instance, KeyBinding, NamespaceName, ObjectPath, PropertyDecl,
    ProviderIdentity, Qualifier, ResponseData, Value,
};

use crate::directory::Destination;
use crate::dispatcher::Dispatcher;
use crate::service::config::BrokerConfig;
use crate::service::classify::service_for;
use crate::service::envelope::{DispatchOutcome, ReplyHandle, RequestEnvelope};
use crate::service::operation::{Operation, OperationContext, OperationResponse, OperationResult};
use crate::storage::MemoryObjectStore;
use crate::traits::{
    FilterCompileError, FilterCompiler, FilterError, ObjectStore, ProviderRegistry,
    ProviderRequest, ProviderResponder, ProviderTransport, QueryFilter, RegisteredProvider,
};

pub const TEST_NAMESPACE: &str = "root/test";

pub fn name(s: &str) -> CimName {
    CimName::new(s).unwrap()
}

pub fn ns(s: &str) -> NamespaceName {
    NamespaceName::new(s).unwrap()
}

pub fn disk_path(id: u64) -> ObjectPath {
    ObjectPath::new(name("Test_Disk")).with_key(KeyBinding::new(name("DeviceID"), Value::Uint(id)))
}

pub fn system_path() -> ObjectPath {
    ObjectPath::new(name("Test_System")).with_key(KeyBinding::new(name("Name"), Value::from("sys1")))
}

/// A `Test_Disk` instance with a local path.
pub fn disk(id: u64) -> Instance {
    Instance::new(name("Test_Disk"))
        .with_path(disk_path(id))
        .with_property(name("DeviceID"), Value::Uint(id))
        .with_property(name("Caption"), Value::from(format!("disk {id}")))
}

/// `root/test` with a system, three disks on it (two linked by
/// `Test_DiskOnSystem`), and an empty `Test_Tape` class.
pub fn fixture_store() -> MemoryObjectStore {
    fixture_store_with_default(true)
}

pub fn fixture_store_with_default(default_instance_provider: bool) -> MemoryObjectStore {
    let store = MemoryObjectStore::new(default_instance_provider);
    let ns = ns(TEST_NAMESPACE);
    store.add_namespace(ns.clone());

    let classes = [
        Class::new(name("Test_System"))
            .with_property(PropertyDecl::new(name("Name"), CimType::String).key()),
        Class::new(name("Test_Device"))
            .with_property(PropertyDecl::new(name("DeviceID"), CimType::Uint64).key())
            .with_property(PropertyDecl::new(name("Caption"), CimType::String)),
        Class::new(name("Test_Disk")).with_super_class(name("Test_Device")),
        Class::new(name("Test_Tape")).with_super_class(name("Test_Device")),
        Class::new(name("Test_DiskOnSystem"))
            .with_qualifier(Qualifier::new(name("Association"), Value::Boolean(true)))
            .with_property(PropertyDecl::reference(name("System"), name("Test_System")).key())
            .with_property(PropertyDecl::reference(name("Disk"), name("Test_Device")).key()),
    ];
    for class in classes {
        store.add_class(&ns, class).unwrap();
    }

    store
        .create_instance(
            &ns,
            Instance::new(name("Test_System")).with_property(name("Name"), Value::from("sys1")),
        )
        .unwrap();
    for id in 1..=3 {
        let mut instance = disk(id);
        instance.path = None;
        store.create_instance(&ns, instance).unwrap();
    }
    for id in 1..=2 {
        store
            .create_instance(
                &ns,
                Instance::new(name("Test_DiskOnSystem"))
                    .with_property(name("System"), Value::from(system_path()))
                    .with_property(name("Disk"), Value::from(disk_path(id))),
            )
            .unwrap();
    }
    store
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    instance: Vec<(CimName, RegisteredProvider)>,
    association: Vec<(CimName, RegisteredProvider)>,
    method: Vec<(CimName, CimName, RegisteredProvider)>,
}

impl StaticRegistry {
    pub fn with_instance_provider(mut self, class: &str, module: &str, provider: &str) -> Self {
        self.instance.push((
            name(class),
            RegisteredProvider::new(ProviderIdentity::new(module, provider)),
        ));
        self
    }

    /// An instance provider that evaluates `ExecQuery` itself.
    pub fn with_query_provider(mut self, class: &str, module: &str, provider: &str) -> Self {
        let mut registered = RegisteredProvider::new(ProviderIdentity::new(module, provider));
        registered.supports_exec_query = true;
        self.instance.push((name(class), registered));
        self
    }

    pub fn with_association_provider(mut self, class: &str, module: &str, provider: &str) -> Self {
        self.association.push((
            name(class),
            RegisteredProvider::new(ProviderIdentity::new(module, provider)),
        ));
        self
    }

    pub fn with_method_provider(
        mut self,
        class: &str,
        method: &str,
        module: &str,
        provider: &str,
    ) -> Self {
        self.method.push((
            name(class),
            name(method),
            RegisteredProvider::new(ProviderIdentity::new(module, provider)),
        ));
        self
    }
}

impl ProviderRegistry for StaticRegistry {
    fn lookup_instance_provider(
        &self,
        _ns: &NamespaceName,
        class: &CimName,
    ) -> Option<RegisteredProvider> {
        self.instance
            .iter()
            .find(|(c, _)| c == class)
            .map(|(_, p)| p.clone())
    }

    fn lookup_association_providers(
        &self,
        _ns: &NamespaceName,
        assoc_class: &CimName,
    ) -> Vec<RegisteredProvider> {
        self.association
            .iter()
            .filter(|(c, _)| c == assoc_class)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn lookup_method_provider(
        &self,
        _ns: &NamespaceName,
        class: &CimName,
        method: &CimName,
    ) -> Option<RegisteredProvider> {
        self.method
            .iter()
            .find(|(c, m, _)| c == class && m == method)
            .map(|(_, _, p)| p.clone())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// What a scripted provider does with a request clone.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Deliver each chunk, then complete with no further data.
    Data(Vec<ResponseData>),
    /// Complete at once with this result.
    Reply(OperationResult),
    /// Keep the responder until the test takes it.
    Hold,
    /// Drop the responder without completing.
    Drop,
}

/// Providers keyed by provider name (or control provider name). Unknown
/// providers complete with no data.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    behaviors: HashMap<String, Behavior>,
    sent: Mutex<Vec<ProviderRequest>>,
    held: Mutex<Vec<ProviderResponder>>,
}

impl ScriptedTransport {
    pub fn with(mut self, provider: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(provider.to_string(), behavior);
        self
    }

    pub fn sent(&self) -> Vec<ProviderRequest> {
        self.sent.lock().clone()
    }

    pub fn take_held(&self) -> Vec<ProviderResponder> {
        std::mem::take(&mut *self.held.lock())
    }
}

impl ProviderTransport for ScriptedTransport {
    fn send(&self, destination: &Destination, request: ProviderRequest, responder: ProviderResponder) {
        let key = request
            .context
            .provider
            .as_ref()
            .map(|p| p.provider_name.clone())
            .or_else(|| destination.control_provider.clone())
            .unwrap_or_else(|| destination.service.clone());
        self.sent.lock().push(request);
        let behavior = self
            .behaviors
            .get(&key)
            .cloned()
            .unwrap_or(Behavior::Reply(Ok(OperationResponse::Empty)));
        match behavior {
            Behavior::Data(chunks) => {
                tokio::spawn(async move {
                    for chunk in chunks {
                        if responder.deliver(chunk).await.is_err() {
                            return;
                        }
                    }
                    responder.complete(Ok(OperationResponse::Empty)).await;
                });
            }
            Behavior::Reply(result) => {
                tokio::spawn(async move { responder.complete(result).await });
            }
            Behavior::Hold => self.held.lock().push(responder),
            Behavior::Drop => drop(responder),
        }
    }
}

// ---------------------------------------------------------------------------
// Query filters
// ---------------------------------------------------------------------------

/// `SELECT <props|*> FROM <class> [WHERE <prop> = <literal>]`, language
/// `WQL` only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestFilterCompiler;

#[derive(Debug)]
pub struct TestFilter {
    class: CimName,
    select: Option<Vec<CimName>>,
    predicate: Option<(String, String)>,
}

impl FilterCompiler for TestFilterCompiler {
    fn compile(
        &self,
        language: &str,
        query: &str,
        _namespace: &NamespaceName,
    ) -> Result<Arc<dyn QueryFilter>, FilterCompileError> {
        if !language.eq_ignore_ascii_case("WQL") {
            return Err(FilterCompileError::UnsupportedLanguage(language.to_string()));
        }
        let syntax = || FilterCompileError::Syntax(query.to_string());
        let tokens: Vec<&str> = query.split_whitespace().collect();
        if !tokens.first().is_some_and(|t| t.eq_ignore_ascii_case("SELECT")) {
            return Err(syntax());
        }
        let from = tokens
            .iter()
            .position(|t| t.eq_ignore_ascii_case("FROM"))
            .ok_or_else(syntax)?;
        let select_list = tokens[1..from].join(" ");
        let select = if select_list.trim() == "*" {
            None
        } else {
            let names = select_list
                .split(',')
                .map(|s| CimName::new(s.trim()).map_err(|_| syntax()))
                .collect::<Result<Vec<_>, _>>()?;
            Some(names)
        };
        let class = tokens
            .get(from + 1)
            .and_then(|c| CimName::new(*c).ok())
            .ok_or_else(syntax)?;
        let predicate = match &tokens[from + 2..] {
            [] => None,
            [kw, prop, "=", literal] if kw.eq_ignore_ascii_case("WHERE") => Some((
                (*prop).to_string(),
                literal.trim_matches(|c| c == '"' || c == '\'').to_string(),
            )),
            _ => return Err(syntax()),
        };
        Ok(Arc::new(TestFilter {
            class,
            select,
            predicate,
        }))
    }
}

impl QueryFilter for TestFilter {
    fn language(&self) -> &str {
        "WQL"
    }

    fn class_name(&self) -> &CimName {
        &self.class
    }

    fn evaluate(&self, instance: &Instance) -> Result<bool, FilterError> {
        let Some((prop, literal)) = &self.predicate else {
            return Ok(true);
        };
        Ok(instance
            .property(prop)
            .is_some_and(|v| v.to_string().trim_matches('"') == literal))
    }

    fn project(&self, instance: &mut Instance) -> Result<(), FilterError> {
        if let Some(select) = &self.select {
            instance.properties.retain(|p| select.contains(&p.name));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher harness
// ---------------------------------------------------------------------------

/// A dispatcher over the fixture store with scripted providers.
pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub transport: Arc<ScriptedTransport>,
    namespace: NamespaceName,
    next_call: AtomicU64,
}

impl Harness {
    pub fn new(registry: StaticRegistry, transport: ScriptedTransport) -> Self {
        Self::with_config(registry, transport, BrokerConfig::default())
    }

    pub fn with_config(
        registry: StaticRegistry,
        transport: ScriptedTransport,
        config: BrokerConfig,
    ) -> Self {
        Self::build(
            fixture_store(),
            registry,
            transport,
            Some(Arc::new(TestFilterCompiler)),
            config,
        )
    }

    pub fn with_store(
        store: MemoryObjectStore,
        registry: StaticRegistry,
        transport: ScriptedTransport,
    ) -> Self {
        Self::build(
            store,
            registry,
            transport,
            Some(Arc::new(TestFilterCompiler)),
            BrokerConfig::default(),
        )
    }

    pub fn without_filters() -> Self {
        Self::build(
            fixture_store(),
            StaticRegistry::default(),
            ScriptedTransport::default(),
            None,
            BrokerConfig::default(),
        )
    }

    fn build(
        store: MemoryObjectStore,
        registry: StaticRegistry,
        transport: ScriptedTransport,
        filters: Option<Arc<dyn FilterCompiler>>,
        config: BrokerConfig,
    ) -> Self {
        let transport = Arc::new(transport);
        let store: Arc<dyn ObjectStore> = Arc::new(store);
        let dispatcher = Dispatcher::new(
            store,
            Arc::new(registry),
            Arc::clone(&transport) as Arc<dyn ProviderTransport>,
            filters,
            config,
        );
        Self {
            dispatcher: Arc::new(dispatcher),
            transport,
            namespace: ns(TEST_NAMESPACE),
            next_call: AtomicU64::new(1),
        }
    }

    /// Dispatches without waiting for the reply.
    pub fn start(&self, request: CimRequest) -> (DispatchOutcome, oneshot::Receiver<OperationResult>) {
        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let ctx = OperationContext::new(call_id, service_for(&request), self.namespace.clone());
        let (reply, rx) = ReplyHandle::channel(call_id);
        let outcome = self
            .dispatcher
            .dispatch(RequestEnvelope::new(Operation { ctx, request }, reply));
        (outcome, rx)
    }

    pub async fn run(&self, request: CimRequest) -> OperationResult {
        let (_, rx) = self.start(request);
        rx.await.expect("reply handle dropped without a reply")
    }
}

/// Sends logs to the test writer; `RUST_LOG` picks what is shown.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A classified operation in the test namespace.
pub fn operation(call_id: u64, request: CimRequest) -> Operation {
    Operation {
        ctx: OperationContext::new(call_id, service_for(&request), ns(TEST_NAMESPACE)),
        request,
    }
}

pub fn harness() -> Harness {
    Harness::new(StaticRegistry::default(), ScriptedTransport::default())
}

pub fn open_or_pull(result: OperationResult) -> OpenOrPullResponse {
    match result {
        Ok(OperationResponse::OpenOrPull(response)) => response,
        other => panic!("expected an open/pull response, got {other:?}"),
    }
}
