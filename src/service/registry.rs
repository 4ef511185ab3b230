//! Client and engine bookkeeping.
//!
//! Maps each caller identity to the engines it owns and keeps the process hold
//! count in step with the number of live engines. Two independent paths end an
//! engine:
//!   - **Engine destroyed** (explicit `Destroy` or handler teardown): the engine
//!     is dropped from its client and one hold is released
//!   - **Client vanished**: every engine of the client is force-destroyed and
//!     its hold released, then the client record goes away
//!
//! Whichever path runs first does the release; the other finds nothing to do.
//! Lock order is registry before bus, and engines are destroyed with the
//! registry lock released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::bus::{BusConnection, NameCallback};
use crate::engine::Engine;
use crate::supervisor::ProcessHold;
use crate::types::{ClientId, ObjectPath, WatchId};

struct Client {
    engines: Vec<Arc<Engine>>,
    connection: Arc<dyn BusConnection>,
    watch: WatchId,
}

/// Client → engines map.
pub struct Registry {
    clients: Mutex<HashMap<ClientId, Client>>,
    hold: ProcessHold,
}

impl Registry {
    pub fn new(hold: ProcessHold) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            hold,
        }
    }

    /// Record `engine` as owned by `client_id`, which holds one process hold
    /// taken by the caller.
    ///
    /// A client seen for the first time gets a liveness watch on `connection`,
    /// the connection its request arrived on. An engine destroyed before it
    /// could be attached gives its hold back instead.
    pub fn attach(self: &Arc<Self>, client_id: &ClientId, engine: Arc<Engine>, connection: Arc<dyn BusConnection>) {
        let mut clients = self.clients.lock();
        if engine.is_destroyed() {
            drop(clients);
            tracing::debug!("engine_attach_skipped: {} destroyed before attach", client_id);
            self.hold.release();
            return;
        }

        let client = clients.entry(client_id.clone()).or_insert_with(|| {
            let registry = Arc::downgrade(self);
            let on_vanished: NameCallback = Arc::new(move |name: &str| {
                if let Some(registry) = Weak::upgrade(&registry) {
                    match ClientId::from_string(name.to_string()) {
                        Ok(client_id) => registry.remove_client(&client_id),
                        Err(e) => tracing::warn!("client_vanished_ignored: {}", e),
                    }
                }
            });
            let watch = connection.watch_name(client_id.as_str(), on_vanished);
            tracing::debug!("client_registered: {}", client_id);
            Client {
                engines: Vec::new(),
                connection: connection.clone(),
                watch,
            }
        });
        client.engines.push(engine);
    }

    /// Forget `client_id`: stop watching it, release the hold of every engine
    /// it owns and destroy those engines.
    pub fn remove_client(&self, client_id: &ClientId) {
        let Some(client) = self.clients.lock().remove(client_id) else {
            return;
        };
        client.connection.unwatch_name(client.watch);
        tracing::debug!(
            "client_removed: {} engines={}",
            client_id,
            client.engines.len()
        );
        for engine in client.engines {
            self.hold.release();
            engine.destroy();
        }
    }

    /// Destroy notification from `engine`. Releases its hold if its client
    /// still lists it.
    pub fn engine_destroyed(&self, engine: &Engine) {
        let removed = {
            let mut clients = self.clients.lock();
            clients
                .get_mut(engine.client_id())
                .and_then(|client| {
                    let index = client
                        .engines
                        .iter()
                        .position(|e| std::ptr::eq(Arc::as_ptr(e), engine))?;
                    Some(client.engines.remove(index))
                })
        };
        if let Some(engine) = removed {
            tracing::debug!("engine_detached: client={}", engine.client_id());
            self.hold.release();
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn contains_client(&self, client_id: &ClientId) -> bool {
        self.clients.lock().contains_key(client_id)
    }

    /// Paths of the live engines owned by `client_id`, in creation order.
    pub fn engine_paths(&self, client_id: &ClientId) -> Vec<ObjectPath> {
        self.clients
            .lock()
            .get(client_id)
            .map(|client| client.engines.iter().filter_map(|e| e.object_path()).collect())
            .unwrap_or_default()
    }

    pub fn engine_count(&self) -> usize {
        self.clients.lock().values().map(|c| c.engines.len()).sum()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("clients", &self.client_count())
            .field("engines", &self.engine_count())
            .finish()
    }
}
