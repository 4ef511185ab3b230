//! Well-known name ownership.
//!
//! State machine: Unowned → Acquiring → {Owned | Unowned}, Owned → Unowned on
//! loss. While the name is owned or being acquired the owner keeps exactly one
//! process hold, and the service root object is exported only while owned.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

use crate::bus::{BusConnection, BusObject, NameCallback, NameOwnerFlags};
use crate::supervisor::ProcessHold;
use crate::types::{ObjectPath, OwnerId};

/// Observable ownership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Unowned,
    Acquiring,
    Owned,
}

#[derive(Default)]
struct OwnerState {
    request: Option<(Arc<dyn BusConnection>, OwnerId)>,
    /// Connection the root object is exported on.
    exported_on: Option<Arc<dyn BusConnection>>,
    activating: bool,
    holding: bool,
    /// Bumped per acquisition; callbacks from older ones are ignored.
    generation: u64,
}

/// Acquires `name` and exports `root` at `root_path` once it is ours.
pub struct NameOwner {
    name: String,
    root_path: ObjectPath,
    root: Arc<dyn BusObject>,
    hold: ProcessHold,
    state: Mutex<OwnerState>,
    tx: watch::Sender<Ownership>,
}

impl NameOwner {
    pub fn new(name: impl Into<String>, root_path: ObjectPath, root: Arc<dyn BusObject>, hold: ProcessHold) -> Self {
        let (tx, _) = watch::channel(Ownership::Unowned);
        Self {
            name: name.into(),
            root_path,
            root,
            hold,
            state: Mutex::new(OwnerState::default()),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ownership(&self) -> Ownership {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Ownership> {
        self.tx.subscribe()
    }

    /// Start acquiring the name on `connection`.
    ///
    /// Does nothing while an acquisition is already in flight. A name held
    /// from an earlier activation is given up first and acquired again.
    pub fn activate(self: &Arc<Self>, connection: Arc<dyn BusConnection>) {
        // Held across `own_name` so the callbacks observe the stored request.
        let mut state = self.state.lock();
        if state.activating {
            tracing::debug!("name_activation_skipped: {} already in progress", self.name);
            return;
        }
        if let Some((previous, id)) = state.request.take() {
            previous.unown_name(id);
        }
        if let Some(exported_on) = state.exported_on.take() {
            exported_on.unexport(&self.root_path);
        }
        if !state.holding {
            self.hold.hold();
            state.holding = true;
        }
        state.activating = true;
        state.generation += 1;
        let generation = state.generation;
        self.tx.send_replace(Ownership::Acquiring);

        let acquired: NameCallback = {
            let owner = Arc::downgrade(self);
            Arc::new(move |name: &str| {
                if let Some(owner) = Weak::upgrade(&owner) {
                    owner.name_acquired(generation, name);
                }
            })
        };
        let lost: NameCallback = {
            let owner = Arc::downgrade(self);
            Arc::new(move |name: &str| {
                if let Some(owner) = Weak::upgrade(&owner) {
                    owner.name_lost(generation, name);
                }
            })
        };

        tracing::info!("name_acquiring: {}", self.name);
        let id = connection.own_name(
            &self.name,
            NameOwnerFlags::ALLOW_REPLACEMENT_AND_REPLACE,
            acquired,
            lost,
        );
        state.request = Some((connection, id));
    }

    fn name_acquired(&self, generation: u64, name: &str) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.activating = false;
        let Some((connection, _)) = state.request.clone() else {
            return;
        };

        match connection.export(&self.root_path, self.root.clone()) {
            Ok(()) => {
                state.exported_on = Some(connection);
                drop(state);
                tracing::info!("name_acquired: {} root={}", name, self.root_path);
                self.tx.send_replace(Ownership::Owned);
            }
            Err(e) => {
                tracing::warn!("root_export_failed: {} {}", name, e);
                if let Some((connection, id)) = state.request.take() {
                    connection.unown_name(id);
                }
                self.reset(state);
            }
        }
    }

    fn name_lost(&self, generation: u64, name: &str) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if let Some(exported_on) = state.exported_on.take() {
            exported_on.unexport(&self.root_path);
        }
        state.request = None;
        tracing::info!("name_lost: {}", name);
        self.reset(state);
    }

    /// Give the name up and drop the hold. The owner can be activated again.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some((connection, id)) = state.request.take() {
            connection.unown_name(id);
        }
        if let Some(exported_on) = state.exported_on.take() {
            exported_on.unexport(&self.root_path);
        }
        tracing::info!("name_released: {}", self.name);
        self.reset(state);
    }

    fn reset(&self, mut state: parking_lot::MutexGuard<'_, OwnerState>) {
        state.activating = false;
        let was_holding = std::mem::replace(&mut state.holding, false);
        drop(state);
        if was_holding {
            self.hold.release();
        }
        self.tx.send_replace(Ownership::Unowned);
    }
}

impl std::fmt::Debug for NameOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameOwner")
            .field("name", &self.name)
            .field("root_path", &self.root_path)
            .field("ownership", &self.ownership())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Invocation, LocalBus};
    use crate::types::Result;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    struct Root;

    #[async_trait]
    impl BusObject for Root {
        fn interface(&self) -> &'static str {
            "test.Root"
        }

        async fn handle_call(&self, _invocation: Invocation, _method: &str, _body: Value) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn owner(hold: &ProcessHold) -> Arc<NameOwner> {
        Arc::new(NameOwner::new(
            "org.example.IM",
            ObjectPath::from_string("/org/example/IM".to_string()).unwrap(),
            Arc::new(Root),
            hold.clone(),
        ))
    }

    async fn wait_for(owner: &NameOwner, target: Ownership) {
        let mut rx = owner.subscribe();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|o| *o == target))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_acquire_exports_root_and_holds() {
        let bus = LocalBus::new();
        let (connection, _) = bus.connect();
        let hold = ProcessHold::new();
        let owner = owner(&hold);

        owner.activate(Arc::new(connection));
        assert_eq!(owner.ownership(), Ownership::Acquiring);
        assert_eq!(hold.count(), 1);

        wait_for(&owner, Ownership::Owned).await;
        assert!(bus.name_has_owner("org.example.IM"));
        assert_eq!(bus.object_paths().len(), 1);
        assert_eq!(hold.count(), 1);
    }

    #[tokio::test]
    async fn test_activate_while_acquiring_is_noop() {
        let bus = LocalBus::new();
        let (connection, _) = bus.connect();
        let connection: Arc<dyn BusConnection> = Arc::new(connection);
        let hold = ProcessHold::new();
        let owner = owner(&hold);

        owner.activate(connection.clone());
        owner.activate(connection.clone());
        owner.activate(connection);
        wait_for(&owner, Ownership::Owned).await;
        assert_eq!(hold.count(), 1);
    }

    #[tokio::test]
    async fn test_reactivate_after_acquired_keeps_one_hold() {
        let bus = LocalBus::new();
        let (connection, _) = bus.connect();
        let connection: Arc<dyn BusConnection> = Arc::new(connection);
        let hold = ProcessHold::new();
        let owner = owner(&hold);

        owner.activate(connection.clone());
        wait_for(&owner, Ownership::Owned).await;
        owner.activate(connection);
        wait_for(&owner, Ownership::Owned).await;

        assert_eq!(hold.count(), 1);
        assert_eq!(bus.object_paths().len(), 1);
    }

    #[tokio::test]
    async fn test_replacement_loses_name() {
        let bus = LocalBus::new();
        let (first, _) = bus.connect();
        let (second, _) = bus.connect();
        let first_hold = ProcessHold::new();
        let second_hold = ProcessHold::new();
        let first_owner = owner(&first_hold);
        let second_owner = owner(&second_hold);

        first_owner.activate(Arc::new(first));
        wait_for(&first_owner, Ownership::Owned).await;

        second_owner.activate(Arc::new(second));
        wait_for(&first_owner, Ownership::Unowned).await;
        assert_eq!(first_hold.count(), 0);
        wait_for(&second_owner, Ownership::Owned).await;
        assert_eq!(second_hold.count(), 1);
    }

    #[tokio::test]
    async fn test_export_failure_releases() {
        let bus = LocalBus::new();
        let (squatter, _) = bus.connect();
        squatter
            .export(
                &ObjectPath::from_string("/org/example/IM".to_string()).unwrap(),
                Arc::new(Root),
            )
            .unwrap();
        let (connection, _) = bus.connect();
        let hold = ProcessHold::new();
        let owner = owner(&hold);

        owner.activate(Arc::new(connection));
        wait_for(&owner, Ownership::Unowned).await;

        assert_eq!(hold.count(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!bus.name_has_owner("org.example.IM"));
    }

    #[tokio::test]
    async fn test_release() {
        let bus = LocalBus::new();
        let (connection, _) = bus.connect();
        let hold = ProcessHold::new();
        let owner = owner(&hold);

        owner.activate(Arc::new(connection));
        wait_for(&owner, Ownership::Owned).await;
        owner.release();

        assert_eq!(owner.ownership(), Ownership::Unowned);
        assert_eq!(hold.count(), 0);
        assert!(bus.object_paths().is_empty());
        assert!(!bus.name_has_owner("org.example.IM"));
    }
}
