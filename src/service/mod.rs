//! The input method service.
//!
//! `Service` ties the pieces together:
//!   - **`NameOwner`** acquires `org.freedesktop.InputMethod` and exports the
//!     root object at `/org/freedesktop/InputMethod`
//!   - **`ConnectionResolver`** decides which connection engines live on
//!   - **`Registry`** tracks which client owns which engine
//!   - **`EngineFactory`** builds the engines themselves
//!
//! One `Service` exists per process and is passed around explicitly.

mod factory;
mod ownership;
mod registry;
mod resolver;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::bus::{BusConnection, BusObject, Dialer, Invocation, NoDialer};
use crate::supervisor::ProcessHold;
use crate::types::{ClientId, Error, ObjectPath, Result, ServiceConfig};

pub use factory::{EngineFactory, NoEngineFactory, PlatformData};
pub use ownership::{NameOwner, Ownership};
pub use registry::Registry;
pub use resolver::ConnectionResolver;

/// Well-known bus name of the service.
pub const SERVICE_NAME: &str = "org.freedesktop.InputMethod";

/// Path of the service root object.
pub const SERVICE_PATH: &str = "/org/freedesktop/InputMethod";

/// Interface of the service root object.
pub const SERVICE_INTERFACE: &str = "org.freedesktop.InputMethod";

#[derive(Default)]
struct Registration {
    registered: bool,
    connection: Option<Arc<dyn BusConnection>>,
}

pub struct Service {
    config: ServiceConfig,
    engine_root: ObjectPath,
    hold: ProcessHold,
    registry: Arc<Registry>,
    resolver: ConnectionResolver,
    ownership: Arc<NameOwner>,
    factory: Arc<dyn EngineFactory>,
    serial: AtomicU64,
    registration: RwLock<Registration>,
}

impl Service {
    /// Service that exports engines on its own connection, or fails to
    /// resolve one when `config` names an export address.
    pub fn new(config: ServiceConfig, factory: Arc<dyn EngineFactory>) -> Result<Arc<Self>> {
        Self::with_dialer(config, factory, Arc::new(NoDialer))
    }

    /// Service dialing its export address, if any, through `dialer`.
    pub fn with_dialer(
        config: ServiceConfig,
        factory: Arc<dyn EngineFactory>,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Arc<Self>> {
        let engine_root = ObjectPath::from_application_id(&config.application_id).map_err(|e| {
            Error::validation(format!("application id {:?}: {}", config.application_id, e))
        })?;
        let root_path = ObjectPath::from_string(SERVICE_PATH.to_string()).map_err(Error::internal)?;
        let hold = ProcessHold::new();
        let resolver = ConnectionResolver::new(config.export_address().map(str::to_string), dialer);

        Ok(Arc::new_cyclic(|service: &Weak<Service>| {
            let root: Arc<dyn BusObject> = Arc::new(ServiceObject {
                service: service.clone(),
            });
            Service {
                ownership: Arc::new(NameOwner::new(SERVICE_NAME, root_path, root, hold.clone())),
                registry: Arc::new(Registry::new(hold.clone())),
                config,
                engine_root,
                hold,
                resolver,
                factory,
                serial: AtomicU64::new(0),
                registration: RwLock::new(Registration::default()),
            }
        }))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Path engine paths are derived from.
    pub fn engine_root(&self) -> &ObjectPath {
        &self.engine_root
    }

    pub fn hold(&self) -> &ProcessHold {
        &self.hold
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn ownership(&self) -> &NameOwner {
        &self.ownership
    }

    // =========================================================================
    // Registration & activation
    // =========================================================================

    /// Attach the service to the bus connection requests arrive on.
    pub fn register(&self, connection: Arc<dyn BusConnection>) {
        tracing::info!(
            "service_registered: application_id={} unique_name={:?}",
            self.config.application_id,
            connection.unique_name()
        );
        let mut registration = self.registration.write();
        registration.registered = true;
        registration.connection = Some(connection);
    }

    /// Drop the inbound connection. The service stays registered.
    pub fn disconnect(&self) {
        self.registration.write().connection = None;
    }

    /// Connection the service was registered with, if still usable.
    pub fn inbound_connection(&self) -> Result<Arc<dyn BusConnection>> {
        let registration = self.registration.read();
        if !registration.registered {
            return Err(Error::NotRegistered);
        }
        registration
            .connection
            .as_ref()
            .filter(|connection| !connection.is_closed())
            .cloned()
            .ok_or(Error::NoConnection)
    }

    /// Start acquiring the service name on the inbound connection.
    pub fn activate(&self) {
        match self.inbound_connection() {
            Ok(connection) => self.ownership.activate(connection),
            Err(e) => tracing::warn!("activate_skipped: {}", e),
        }
    }

    /// Give up the service name and its hold.
    pub fn shutdown(&self) {
        self.ownership.release();
    }

    // =========================================================================
    // Engines
    // =========================================================================

    /// The configured export address, or `""`.
    pub fn get_address(&self) -> &str {
        self.resolver.address().unwrap_or("")
    }

    /// Connection engines are exported on, resolved on first use.
    pub async fn resolve_connection(&self) -> Result<Arc<dyn BusConnection>> {
        self.resolver.resolve(|| self.inbound_connection()).await
    }

    /// Create, export and register an engine for `client_id`.
    ///
    /// `connection` is the connection the request arrived on; the client's
    /// liveness is watched through it.
    pub async fn create_engine(
        &self,
        client_id: &ClientId,
        connection: Arc<dyn BusConnection>,
        platform_data: &PlatformData,
    ) -> Result<ObjectPath> {
        self.factory.before_emit(platform_data);
        let engine = self.factory.create_engine(client_id);
        self.factory.after_emit(platform_data);

        let engine = match engine {
            Some(engine) if engine.client_id() == client_id => Arc::new(engine),
            Some(engine) => {
                tracing::warn!(
                    "engine_rejected: factory built engine for {} when asked for {}",
                    engine.client_id(),
                    client_id
                );
                return Err(Error::EngineCreationFailed);
            }
            None => return Err(Error::EngineCreationFailed),
        };

        let export_connection = self.resolve_connection().await?;
        // Unique names are only meaningful on the bus the client called from.
        let unicast = self.resolver.address().is_none();

        let serial = self.serial.fetch_add(1, Ordering::SeqCst);
        let path = self
            .engine_root
            .child(&format!("Engine_{}", serial))
            .map_err(Error::internal)?;
        engine.export(export_connection, path.clone(), unicast)?;

        let registry = Arc::downgrade(&self.registry);
        engine.on_destroyed(move |engine| {
            if let Some(registry) = registry.upgrade() {
                registry.engine_destroyed(engine);
            }
        });

        self.hold.hold();
        self.registry.attach(client_id, engine, connection);
        tracing::info!("engine_created: client={} path={}", client_id, path);
        Ok(path)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("application_id", &self.config.application_id)
            .field("export_address", &self.resolver.address())
            .field("ownership", &self.ownership.ownership())
            .field("registry", &self.registry)
            .field("holds", &self.hold.count())
            .finish()
    }
}

// =============================================================================
// Root object
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct CreateEngineArgs {
    #[serde(default)]
    platform_data: PlatformData,
}

/// `org.freedesktop.InputMethod` at `/org/freedesktop/InputMethod`.
struct ServiceObject {
    service: Weak<Service>,
}

#[async_trait]
impl BusObject for ServiceObject {
    fn interface(&self) -> &'static str {
        SERVICE_INTERFACE
    }

    async fn handle_call(&self, invocation: Invocation, method: &str, body: Value) -> Result<Value> {
        let service = self
            .service
            .upgrade()
            .ok_or_else(|| Error::not_found("input method service is gone"))?;

        match method {
            "GetAddress" => Ok(json!({ "address": service.get_address() })),
            "CreateEngine" => {
                let args: CreateEngineArgs = if body.is_null() {
                    CreateEngineArgs::default()
                } else {
                    serde_json::from_value(body)
                        .map_err(|e| Error::validation(format!("Invalid CreateEngine arguments: {}", e)))?
                };
                let path = service
                    .create_engine(&invocation.sender, invocation.connection.clone(), &args.platform_data)
                    .await
                    .map_err(|e| {
                        tracing::debug!("create_engine_failed: {} {}", invocation.sender, e);
                        e
                    })?;
                Ok(json!({ "object_path": path }))
            }
            _ => Err(Error::not_found(format!("Unknown method: {}", method))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::engine::Engine;
    use proptest::prelude::*;
    use std::time::Duration;

    fn config() -> ServiceConfig {
        ServiceConfig {
            application_id: "org.gtk.Test-IM".to_string(),
            ..ServiceConfig::default()
        }
    }

    fn echo_factory() -> Arc<dyn EngineFactory> {
        Arc::new(|client_id: &ClientId| Some(Engine::new(client_id.clone())))
    }

    fn client(bus: &LocalBus) -> (crate::bus::LocalConnection, ClientId) {
        let (connection, _) = bus.connect();
        let id = ClientId::from_string(connection.unique_name().unwrap()).unwrap();
        (connection, id)
    }

    #[tokio::test]
    async fn test_unregistered_service() {
        let service = Service::new(config(), echo_factory()).unwrap();
        let bus = LocalBus::new();
        let (conn, id) = client(&bus);

        let err = service
            .create_engine(&id, Arc::new(conn), &PlatformData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotRegistered));
        assert_eq!(service.hold().count(), 0);

        service.activate();
        assert_eq!(service.ownership().ownership(), Ownership::Unowned);
        assert_eq!(service.hold().count(), 0);
    }

    #[tokio::test]
    async fn test_closed_connection_is_no_connection() {
        let service = Service::new(config(), echo_factory()).unwrap();
        let bus = LocalBus::new();
        let (inbound, _) = bus.connect();
        service.register(Arc::new(inbound.clone()));
        inbound.close();

        assert!(matches!(service.inbound_connection(), Err(Error::NoConnection)));
        service.activate();
        assert_eq!(service.hold().count(), 0);
    }

    #[tokio::test]
    async fn test_engine_paths_follow_application_id() {
        let service = Service::new(config(), echo_factory()).unwrap();
        let bus = LocalBus::new();
        let (inbound, _) = bus.connect();
        let inbound: Arc<dyn BusConnection> = Arc::new(inbound);
        service.register(inbound.clone());
        let (_conn, id) = client(&bus);

        let first = service.create_engine(&id, inbound.clone(), &PlatformData::new()).await.unwrap();
        let second = service.create_engine(&id, inbound, &PlatformData::new()).await.unwrap();

        assert_eq!(first.as_str(), "/org/gtk/Test_IM/Engine_0");
        assert_eq!(second.as_str(), "/org/gtk/Test_IM/Engine_1");
        assert_eq!(service.hold().count(), 2);
    }

    #[tokio::test]
    async fn test_factory_hooks_bracket_creation() {
        use parking_lot::Mutex;

        #[derive(Default)]
        struct Recording(Mutex<Vec<String>>);

        impl EngineFactory for Recording {
            fn create_engine(&self, _client_id: &ClientId) -> Option<Engine> {
                self.0.lock().push("create".to_string());
                None
            }

            fn before_emit(&self, platform_data: &PlatformData) {
                self.0.lock().push(format!("before:{}", platform_data.len()));
            }

            fn after_emit(&self, _platform_data: &PlatformData) {
                self.0.lock().push("after".to_string());
            }
        }

        let factory = Arc::new(Recording::default());
        let service = Service::new(config(), factory.clone()).unwrap();
        let bus = LocalBus::new();
        let (inbound, _) = bus.connect();
        let inbound: Arc<dyn BusConnection> = Arc::new(inbound);
        service.register(inbound.clone());

        let mut platform_data = PlatformData::new();
        platform_data.insert("display".to_string(), json!(":0"));
        let (_conn, id) = client(&bus);
        let err = service.create_engine(&id, inbound, &platform_data).await.unwrap_err();

        assert!(matches!(err, Error::EngineCreationFailed));
        assert_eq!(*factory.0.lock(), vec!["before:1", "create", "after"]);
        assert_eq!(service.hold().count(), 0);
        assert!(bus.object_paths().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_application_id() {
        let config = ServiceConfig {
            application_id: "org..broken".to_string(),
            ..ServiceConfig::default()
        };
        let err = Service::new(config, echo_factory()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_address() {
        let service = Service::new(config(), echo_factory()).unwrap();
        assert_eq!(service.get_address(), "");

        let with_address = ServiceConfig {
            export_address: Some("local:engines".to_string()),
            ..config()
        };
        let service = Service::new(with_address, echo_factory()).unwrap();
        assert_eq!(service.get_address(), "local:engines");
    }

    #[tokio::test]
    async fn test_activate_owns_name_and_serves_root() {
        let service = Service::new(config(), echo_factory()).unwrap();
        let bus = LocalBus::new();
        let (inbound, _) = bus.connect();
        service.register(Arc::new(inbound));
        service.activate();

        let mut ownership = service.ownership().subscribe();
        tokio::time::timeout(Duration::from_secs(1), ownership.wait_for(|o| *o == Ownership::Owned))
            .await
            .unwrap()
            .unwrap();
        drop(ownership);

        let (conn, _) = client(&bus);
        let root = ObjectPath::from_string(SERVICE_PATH.to_string()).unwrap();
        let reply = conn
            .call(Some(SERVICE_NAME), &root, "CreateEngine", json!({"platform_data": {}}))
            .await
            .unwrap();
        assert_eq!(reply["object_path"], "/org/gtk/Test_IM/Engine_0");
        assert_eq!(service.hold().count(), 2);

        let reply = conn.call(Some(SERVICE_NAME), &root, "GetAddress", Value::Null).await.unwrap();
        assert_eq!(reply, json!({"address": ""}));

        service.shutdown();
        assert_eq!(service.hold().count(), 1);
    }

    proptest! {
        #[test]
        fn prop_serials_strictly_increase(creates in 1usize..16, declines in proptest::collection::vec(any::<bool>(), 16)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let declines = Arc::new(declines);
                let next = Arc::new(std::sync::atomic::AtomicUsize::new(0));
                let factory: Arc<dyn EngineFactory> = {
                    let declines = declines.clone();
                    let next = next.clone();
                    Arc::new(move |client_id: &ClientId| {
                        let i = next.fetch_add(1, Ordering::SeqCst);
                        (!declines[i % declines.len()]).then(|| Engine::new(client_id.clone()))
                    })
                };
                let service = Service::new(config(), factory).unwrap();
                let bus = LocalBus::new();
                let (inbound, _) = bus.connect();
                let inbound: Arc<dyn BusConnection> = Arc::new(inbound);
                service.register(inbound.clone());
                let (_conn, id) = client(&bus);

                let mut serials = Vec::new();
                for _ in 0..creates {
                    if let Ok(path) = service.create_engine(&id, inbound.clone(), &PlatformData::new()).await {
                        let serial: u64 = path.basename().trim_start_matches("Engine_").parse().unwrap();
                        serials.push(serial);
                    }
                }
                prop_assert!(serials.windows(2).all(|w| w[0] < w[1]));
                prop_assert_eq!(service.hold().count(), serials.len());
                Ok(())
            })?;
        }
    }
}
