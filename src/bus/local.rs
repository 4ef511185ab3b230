//! In-process bus.
//!
//! `LocalBus` keeps the whole bus state in memory:
//!   - **Peers**: one per connection, each with a unique name (`:1.N`) and a
//!     signal channel
//!   - **Objects**: path → exported object, owned by the exporting peer
//!   - **Names**: well-known name → owning request, with replacement
//!   - **Watches**: fire when a watched name loses its owner
//!
//! Acquisition results are delivered from spawned tasks; vanish notifications
//! caused by a disconnect run on the disconnecting task, after the bus lock is
//! released.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{
    BusConnection, BusObject, Dialer, Invocation, NameCallback, NameOwnerFlags, Signal,
};
use crate::types::{ClientId, Error, ObjectPath, OwnerId, Result, WatchId};

// =============================================================================
// State
// =============================================================================

struct ExportedObject {
    peer: String,
    object: Arc<dyn BusObject>,
}

struct OwnerRequest {
    peer: String,
    name: String,
    flags: NameOwnerFlags,
    on_acquired: NameCallback,
    on_lost: NameCallback,
}

struct NameWatch {
    watcher: String,
    name: String,
    on_vanished: NameCallback,
}

#[derive(Default)]
struct BusState {
    /// unique name -> signal channel
    peers: HashMap<String, mpsc::UnboundedSender<Signal>>,
    objects: HashMap<ObjectPath, ExportedObject>,
    /// well-known name -> owner request id
    names: HashMap<String, u64>,
    owners: HashMap<u64, OwnerRequest>,
    watches: HashMap<u64, NameWatch>,
}

impl BusState {
    fn has_owner(&self, name: &str) -> bool {
        if name.starts_with(':') {
            self.peers.contains_key(name)
        } else {
            self.names.contains_key(name)
        }
    }

    fn resolve_peer(&self, name: &str) -> Option<&str> {
        if name.starts_with(':') {
            return self.peers.get_key_value(name).map(|(k, _)| k.as_str());
        }
        self.names
            .get(name)
            .and_then(|id| self.owners.get(id))
            .map(|owner| owner.peer.as_str())
    }

    fn vanished_callbacks(&self, name: &str) -> Vec<(NameCallback, String)> {
        self.watches
            .values()
            .filter(|w| w.name == name)
            .map(|w| (w.on_vanished.clone(), name.to_string()))
            .collect()
    }
}

/// Deferred name-ownership notification.
enum OwnershipEvent {
    Acquired(u64),
    Lost(u64),
}

struct BusInner {
    state: Mutex<BusState>,
    next_peer: AtomicU64,
    next_handle: AtomicU64,
}

impl BusInner {
    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Deliver ownership events in order from a spawned task, skipping any
    /// whose request was dropped in the meantime.
    fn deliver_ownership(self: &Arc<Self>, events: Vec<OwnershipEvent>) {
        if events.is_empty() {
            return;
        }
        let inner = self.clone();
        spawn_detached(move || {
            for event in events {
                let callback = {
                    let mut state = inner.state.lock();
                    match event {
                        OwnershipEvent::Acquired(id) => state.owners.get(&id).and_then(|owner| {
                            (state.names.get(&owner.name) == Some(&id))
                                .then(|| (owner.on_acquired.clone(), owner.name.clone()))
                        }),
                        OwnershipEvent::Lost(id) => state
                            .owners
                            .remove(&id)
                            .map(|owner| (owner.on_lost, owner.name)),
                    }
                };
                if let Some((callback, name)) = callback {
                    callback(&name);
                }
            }
        });
    }
}

/// Run `f` off the calling stack: on the current tokio runtime when there is
/// one, otherwise on a plain thread.
fn spawn_detached<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { f() });
        }
        Err(_) => {
            std::thread::spawn(f);
        }
    }
}

fn fire(callbacks: Vec<(NameCallback, String)>) {
    for (callback, name) in callbacks {
        callback(&name);
    }
}

// =============================================================================
// LocalBus
// =============================================================================

/// In-memory message bus.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                next_peer: AtomicU64::new(1),
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a new peer. Signals addressed to it arrive on the receiver.
    pub fn connect(&self) -> (LocalConnection, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let unique_name = format!(":1.{}", self.inner.next_peer.fetch_add(1, Ordering::Relaxed));
        self.inner.state.lock().peers.insert(unique_name.clone(), tx);
        tracing::debug!("bus_peer_connected: {}", unique_name);
        (
            LocalConnection {
                inner: self.inner.clone(),
                unique_name,
            },
            rx,
        )
    }

    /// Whether `name` (unique or well-known) currently has an owner.
    pub fn name_has_owner(&self, name: &str) -> bool {
        self.inner.state.lock().has_owner(name)
    }

    /// Unique name of the current owner of `name`.
    pub fn name_owner(&self, name: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .resolve_peer(name)
            .map(str::to_string)
    }

    /// Paths of all exported objects, sorted.
    pub fn object_paths(&self) -> Vec<ObjectPath> {
        let mut paths: Vec<_> = self.inner.state.lock().objects.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn peer_count(&self) -> usize {
        self.inner.state.lock().peers.len()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LocalBus")
            .field("peers", &state.peers.len())
            .field("objects", &state.objects.len())
            .field("names", &state.names.len())
            .field("watches", &state.watches.len())
            .finish()
    }
}

// =============================================================================
// LocalConnection
// =============================================================================

/// Handle to one peer of a `LocalBus`.
///
/// Handles are cheap to clone and all refer to the same peer; the peer stays
/// attached until `close` is called on any of them.
#[derive(Clone)]
pub struct LocalConnection {
    inner: Arc<BusInner>,
    unique_name: String,
}

impl LocalConnection {
    /// Call `method` on the object at `path`.
    ///
    /// With a `destination`, the object must be exported by the peer that
    /// currently owns that (unique or well-known) name.
    pub async fn call(
        &self,
        destination: Option<&str>,
        path: &ObjectPath,
        method: &str,
        body: Value,
    ) -> Result<Value> {
        let (object, owner_peer) = {
            let state = self.inner.state.lock();
            if !state.peers.contains_key(&self.unique_name) {
                return Err(Error::connection("connection closed"));
            }
            let exported = state
                .objects
                .get(path)
                .ok_or_else(|| Error::not_found(format!("no object at {}", path)))?;
            if let Some(destination) = destination {
                match state.resolve_peer(destination) {
                    Some(peer) if peer == exported.peer => {}
                    Some(_) => {
                        return Err(Error::not_found(format!(
                            "{} does not export {}",
                            destination, path
                        )))
                    }
                    None => {
                        return Err(Error::not_found(format!(
                            "name {} has no owner",
                            destination
                        )))
                    }
                }
            }
            (exported.object.clone(), exported.peer.clone())
        };

        let sender = ClientId::from_string(self.unique_name.clone())
            .map_err(|e| Error::internal(e.to_string()))?;
        let invocation = Invocation {
            sender,
            path: path.clone(),
            connection: Arc::new(LocalConnection {
                inner: self.inner.clone(),
                unique_name: owner_peer,
            }),
        };

        tracing::trace!(
            "bus_call: sender={} path={} method={}",
            self.unique_name,
            path,
            method
        );
        object.handle_call(invocation, method, body).await
    }

    /// Detach the peer: drop its objects, names and watches, then notify
    /// watchers of every name it held.
    pub fn close(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.peers.remove(&self.unique_name).is_none() {
                return;
            }
            let peer = self.unique_name.as_str();
            state.objects.retain(|_, exported| exported.peer != peer);
            state.watches.retain(|_, watch| watch.watcher != peer);

            let owned: Vec<u64> = state
                .owners
                .iter()
                .filter(|(_, owner)| owner.peer == peer)
                .map(|(id, _)| *id)
                .collect();
            let mut released = Vec::new();
            for id in owned {
                if let Some(owner) = state.owners.remove(&id) {
                    if state.names.get(&owner.name) == Some(&id) {
                        state.names.remove(&owner.name);
                        released.push(owner.name);
                    }
                }
            }

            let mut callbacks = state.vanished_callbacks(peer);
            for name in &released {
                callbacks.extend(state.vanished_callbacks(name));
            }
            callbacks
        };

        tracing::debug!("bus_peer_disconnected: {}", self.unique_name);
        fire(callbacks);
    }
}

impl fmt::Debug for LocalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalConnection")
            .field("unique_name", &self.unique_name)
            .finish()
    }
}

impl BusConnection for LocalConnection {
    fn unique_name(&self) -> Option<String> {
        (!self.is_closed()).then(|| self.unique_name.clone())
    }

    fn is_closed(&self) -> bool {
        !self.inner.state.lock().peers.contains_key(&self.unique_name)
    }

    fn export(&self, path: &ObjectPath, object: Arc<dyn BusObject>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !state.peers.contains_key(&self.unique_name) {
            return Err(Error::export_failed("connection closed"));
        }
        if state.objects.contains_key(path) {
            return Err(Error::export_failed(format!(
                "an object is already exported at {}",
                path
            )));
        }
        tracing::debug!(
            "bus_export: peer={} path={} interface={}",
            self.unique_name,
            path,
            object.interface()
        );
        state.objects.insert(
            path.clone(),
            ExportedObject {
                peer: self.unique_name.clone(),
                object,
            },
        );
        Ok(())
    }

    fn unexport(&self, path: &ObjectPath) -> bool {
        let mut state = self.inner.state.lock();
        match state.objects.get(path) {
            Some(exported) if exported.peer == self.unique_name => {
                state.objects.remove(path);
                tracing::debug!("bus_unexport: peer={} path={}", self.unique_name, path);
                true
            }
            _ => false,
        }
    }

    fn emit_signal(&self, destination: Option<&ClientId>, signal: Signal) -> Result<()> {
        let state = self.inner.state.lock();
        if !state.peers.contains_key(&self.unique_name) {
            return Err(Error::connection("connection closed"));
        }
        match destination {
            Some(destination) => match state.peers.get(destination.as_str()) {
                Some(tx) => {
                    if tx.send(signal).is_err() {
                        tracing::debug!("signal_dropped: receiver of {} is gone", destination);
                    }
                }
                None => {
                    tracing::debug!("signal_dropped: no peer {}", destination);
                }
            },
            None => {
                for (peer, tx) in &state.peers {
                    if peer != &self.unique_name {
                        let _ = tx.send(signal.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn own_name(
        &self,
        name: &str,
        flags: NameOwnerFlags,
        on_acquired: NameCallback,
        on_lost: NameCallback,
    ) -> OwnerId {
        let id = self.inner.next_handle();
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.owners.insert(
                id,
                OwnerRequest {
                    peer: self.unique_name.clone(),
                    name: name.to_string(),
                    flags,
                    on_acquired,
                    on_lost,
                },
            );

            if !state.peers.contains_key(&self.unique_name) {
                events.push(OwnershipEvent::Lost(id));
            } else {
                let current = state.names.get(name).copied();
                match current {
                    None => {
                        state.names.insert(name.to_string(), id);
                        events.push(OwnershipEvent::Acquired(id));
                    }
                    Some(current) => {
                        let replaceable = state
                            .owners
                            .get(&current)
                            .map(|owner| owner.flags.allow_replacement)
                            .unwrap_or(true);
                        if flags.replace && replaceable {
                            state.names.insert(name.to_string(), id);
                            events.push(OwnershipEvent::Lost(current));
                            events.push(OwnershipEvent::Acquired(id));
                        } else {
                            events.push(OwnershipEvent::Lost(id));
                        }
                    }
                }
            }
        }
        tracing::debug!("bus_own_name: peer={} name={} id={}", self.unique_name, name, id);
        self.inner.deliver_ownership(events);
        OwnerId(id)
    }

    fn unown_name(&self, id: OwnerId) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            let Some(owner) = state.owners.remove(&id.0) else {
                return;
            };
            if state.names.get(&owner.name) == Some(&id.0) {
                state.names.remove(&owner.name);
                tracing::debug!("bus_name_released: {}", owner.name);
                state.vanished_callbacks(&owner.name)
            } else {
                Vec::new()
            }
        };
        // Unowning happens from inside callers that may hold their own locks.
        if !callbacks.is_empty() {
            spawn_detached(move || fire(callbacks));
        }
    }

    fn watch_name(&self, name: &str, on_vanished: NameCallback) -> WatchId {
        let id = self.inner.next_handle();
        let absent = {
            let mut state = self.inner.state.lock();
            state.watches.insert(
                id,
                NameWatch {
                    watcher: self.unique_name.clone(),
                    name: name.to_string(),
                    on_vanished,
                },
            );
            !state.has_owner(name)
        };

        if absent {
            let inner = self.inner.clone();
            spawn_detached(move || {
                let callback = inner
                    .state
                    .lock()
                    .watches
                    .get(&id)
                    .map(|w| (w.on_vanished.clone(), w.name.clone()));
                if let Some((callback, name)) = callback {
                    callback(&name);
                }
            });
        }
        WatchId(id)
    }

    fn unwatch_name(&self, id: WatchId) {
        self.inner.state.lock().watches.remove(&id.0);
    }
}

// =============================================================================
// BusDirectory
// =============================================================================

/// Address book of buses reachable by `dial`.
#[derive(Debug, Clone, Default)]
pub struct BusDirectory {
    buses: Arc<Mutex<HashMap<String, LocalBus>>>,
}

impl BusDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `bus` reachable under `address`.
    pub fn listen(&self, address: impl Into<String>, bus: LocalBus) {
        self.buses.lock().insert(address.into(), bus);
    }

    pub fn remove(&self, address: &str) -> Option<LocalBus> {
        self.buses.lock().remove(address)
    }
}

#[async_trait]
impl Dialer for BusDirectory {
    async fn dial(&self, address: &str) -> Result<Arc<dyn BusConnection>> {
        let bus = self
            .buses
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| Error::connection(format!("no bus listening at {}", address)))?;
        // Dialed connections only export objects; signals addressed to them are dropped.
        let (connection, _signals) = bus.connect();
        tracing::info!(
            "bus_dialed: address={} unique_name={}",
            address,
            connection.unique_name
        );
        Ok(Arc::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    struct Echo;

    #[async_trait]
    impl BusObject for Echo {
        fn interface(&self) -> &'static str {
            "test.Echo"
        }

        async fn handle_call(
            &self,
            invocation: Invocation,
            method: &str,
            body: Value,
        ) -> Result<Value> {
            Ok(serde_json::json!({
                "sender": invocation.sender.as_str(),
                "method": method,
                "body": body,
            }))
        }
    }

    fn path(s: &str) -> ObjectPath {
        ObjectPath::from_string(s.to_string()).unwrap()
    }

    fn recorder() -> (NameCallback, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let callback: NameCallback = Arc::new(move |name: &str| {
            let _ = tx.send(name.to_string());
        });
        (callback, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_call_routes_to_exported_object() {
        let bus = LocalBus::new();
        let (server, _) = bus.connect();
        let (client, _) = bus.connect();

        server.export(&path("/test"), Arc::new(Echo)).unwrap();
        let reply = client
            .call(None, &path("/test"), "Ping", serde_json::json!({"n": 1}))
            .await
            .unwrap();

        assert_eq!(reply["method"], "Ping");
        assert_eq!(reply["sender"], client.unique_name.as_str());
        assert_eq!(reply["body"]["n"], 1);
    }

    #[tokio::test]
    async fn test_export_collision_fails() {
        let bus = LocalBus::new();
        let (a, _) = bus.connect();
        let (b, _) = bus.connect();

        a.export(&path("/test"), Arc::new(Echo)).unwrap();
        let err = b.export(&path("/test"), Arc::new(Echo)).unwrap_err();
        assert!(matches!(err, Error::ExportFailed(_)));

        // Only the exporter can unexport.
        assert!(!b.unexport(&path("/test")));
        assert!(a.unexport(&path("/test")));
        assert!(bus.object_paths().is_empty());
    }

    #[tokio::test]
    async fn test_call_with_destination_checks_owner() {
        let bus = LocalBus::new();
        let (server, _) = bus.connect();
        let (other, _) = bus.connect();
        let (client, _) = bus.connect();
        server.export(&path("/test"), Arc::new(Echo)).unwrap();

        let ok = client
            .call(Some(&server.unique_name), &path("/test"), "Ping", Value::Null)
            .await;
        assert!(ok.is_ok());

        let wrong = client
            .call(Some(&other.unique_name), &path("/test"), "Ping", Value::Null)
            .await;
        assert!(matches!(wrong, Err(Error::NotFound(_))));

        let unowned = client
            .call(Some("org.example.Nobody"), &path("/test"), "Ping", Value::Null)
            .await;
        assert!(matches!(unowned, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_own_name_acquire_and_replace() {
        let bus = LocalBus::new();
        let (first, _) = bus.connect();
        let (second, _) = bus.connect();
        let (first_acquired, mut first_acquired_rx) = recorder();
        let (first_lost, mut first_lost_rx) = recorder();
        let (second_acquired, mut second_acquired_rx) = recorder();
        let (second_lost, _second_lost_rx) = recorder();

        first.own_name(
            "org.example.Name",
            NameOwnerFlags::ALLOW_REPLACEMENT_AND_REPLACE,
            first_acquired,
            first_lost,
        );
        assert_eq!(recv(&mut first_acquired_rx).await, "org.example.Name");
        assert_eq!(
            bus.name_owner("org.example.Name").as_deref(),
            Some(first.unique_name.as_str())
        );

        second.own_name(
            "org.example.Name",
            NameOwnerFlags::ALLOW_REPLACEMENT_AND_REPLACE,
            second_acquired,
            second_lost,
        );
        assert_eq!(recv(&mut first_lost_rx).await, "org.example.Name");
        assert_eq!(recv(&mut second_acquired_rx).await, "org.example.Name");
        assert_eq!(
            bus.name_owner("org.example.Name").as_deref(),
            Some(second.unique_name.as_str())
        );
    }

    #[tokio::test]
    async fn test_own_name_without_replacement_is_lost() {
        let bus = LocalBus::new();
        let (first, _) = bus.connect();
        let (second, _) = bus.connect();
        let (acquired, mut acquired_rx) = recorder();
        let (lost, _lost_rx) = recorder();
        first.own_name("org.example.Name", NameOwnerFlags::NONE, acquired, lost);
        recv(&mut acquired_rx).await;

        let (acquired, _acquired_rx) = recorder();
        let (lost, mut lost_rx) = recorder();
        second.own_name(
            "org.example.Name",
            NameOwnerFlags::ALLOW_REPLACEMENT_AND_REPLACE,
            acquired,
            lost,
        );
        assert_eq!(recv(&mut lost_rx).await, "org.example.Name");
        assert_eq!(
            bus.name_owner("org.example.Name").as_deref(),
            Some(first.unique_name.as_str())
        );
    }

    #[tokio::test]
    async fn test_unown_suppresses_pending_callbacks() {
        let bus = LocalBus::new();
        let (conn, _) = bus.connect();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback: NameCallback = Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = conn.own_name(
            "org.example.Name",
            NameOwnerFlags::NONE,
            callback.clone(),
            callback,
        );
        conn.unown_name(id);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!bus.name_has_owner("org.example.Name"));
    }

    #[tokio::test]
    async fn test_watch_fires_on_disconnect() {
        let bus = LocalBus::new();
        let (server, _) = bus.connect();
        let (client, _) = bus.connect();
        let (vanished, mut vanished_rx) = recorder();

        server.watch_name(&client.unique_name, vanished);
        client.close();

        assert_eq!(recv(&mut vanished_rx).await, client.unique_name);
        assert!(client.is_closed());
        assert_eq!(client.unique_name(), None);
        assert_eq!(bus.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_watch_on_absent_name_fires_once_deferred() {
        let bus = LocalBus::new();
        let (server, _) = bus.connect();
        let (vanished, mut vanished_rx) = recorder();

        server.watch_name(":1.999", vanished);
        assert_eq!(recv(&mut vanished_rx).await, ":1.999");
    }

    #[tokio::test]
    async fn test_unwatch_prevents_notification() {
        let bus = LocalBus::new();
        let (server, _) = bus.connect();
        let (client, _) = bus.connect();
        let (vanished, mut vanished_rx) = recorder();

        let id = server.watch_name(&client.unique_name, vanished);
        server.unwatch_name(id);
        client.close();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(vanished_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_drops_objects_and_names() {
        let bus = LocalBus::new();
        let (server, _) = bus.connect();
        let (watcher, _) = bus.connect();
        let (acquired, mut acquired_rx) = recorder();
        let (lost, _lost_rx) = recorder();
        let (vanished, mut vanished_rx) = recorder();

        server.export(&path("/test"), Arc::new(Echo)).unwrap();
        server.own_name("org.example.Name", NameOwnerFlags::NONE, acquired, lost);
        recv(&mut acquired_rx).await;
        watcher.watch_name("org.example.Name", vanished);

        server.close();
        assert_eq!(recv(&mut vanished_rx).await, "org.example.Name");
        assert!(bus.object_paths().is_empty());
        assert!(!bus.name_has_owner("org.example.Name"));
        assert!(server.export(&path("/test"), Arc::new(Echo)).is_err());
    }

    #[tokio::test]
    async fn test_unicast_signal_reaches_destination_only() {
        let bus = LocalBus::new();
        let (server, _) = bus.connect();
        let (target, mut target_rx) = bus.connect();
        let (_bystander, mut bystander_rx) = bus.connect();

        let destination = ClientId::from_string(target.unique_name.clone()).unwrap();
        let signal = Signal {
            path: path("/test"),
            interface: "test.Echo".to_string(),
            member: "Ping".to_string(),
            body: Value::Null,
        };
        server.emit_signal(Some(&destination), signal.clone()).unwrap();

        assert_eq!(target_rx.try_recv().unwrap(), signal);
        assert!(bystander_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_directory_dial() {
        let directory = BusDirectory::new();
        let bus = LocalBus::new();
        directory.listen("local:engines", bus.clone());

        let connection = directory.dial("local:engines").await.unwrap();
        assert!(!connection.is_closed());
        assert_eq!(bus.peer_count(), 1);

        let err = directory.dial("local:missing").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
