//! Bus abstraction.
//!
//! The service never talks to a transport directly. It sees:
//!   - **`BusConnection`**: a connection that can export objects, emit signals,
//!     own well-known names and watch peers
//!   - **`BusObject`**: something exported at an object path that handles calls
//!   - **`Dialer`**: opens dedicated connections to an address
//!
//! `LocalBus` is the in-process implementation; the IPC server attaches TCP
//! peers to it.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::types::{ClientId, ObjectPath, OwnerId, Result, WatchId};

pub use local::{BusDirectory, LocalBus, LocalConnection};

/// Callback receiving a bus name (acquired, lost, or vanished).
pub type NameCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Flags for a name-ownership request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameOwnerFlags {
    /// Let a later requester with `replace` take the name from us.
    pub allow_replacement: bool,
    /// Take the name from a current owner that allows replacement.
    pub replace: bool,
}

impl NameOwnerFlags {
    pub const NONE: Self = Self {
        allow_replacement: false,
        replace: false,
    };

    pub const ALLOW_REPLACEMENT_AND_REPLACE: Self = Self {
        allow_replacement: true,
        replace: true,
    };
}

/// Outbound signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    pub body: Value,
}

/// Context of an inbound method call.
#[derive(Clone)]
pub struct Invocation {
    /// Unique name of the calling peer.
    pub sender: ClientId,
    /// Path the call was addressed to.
    pub path: ObjectPath,
    /// Connection the call arrived on (the one the object is exported on).
    pub connection: Arc<dyn BusConnection>,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("sender", &self.sender)
            .field("path", &self.path)
            .field("connection", &self.connection.unique_name())
            .finish()
    }
}

/// An object exported at a path.
#[async_trait]
pub trait BusObject: Send + Sync {
    /// Interface name the object implements.
    fn interface(&self) -> &'static str;

    /// Handle one method call and produce its reply body.
    async fn handle_call(&self, invocation: Invocation, method: &str, body: Value) -> Result<Value>;
}

/// A bus connection.
///
/// Name callbacks are never invoked from inside the call that registers them,
/// so implementations may be called while the caller holds its own locks.
pub trait BusConnection: Send + Sync + fmt::Debug {
    /// Unique name of this connection, `None` once closed.
    fn unique_name(&self) -> Option<String>;

    fn is_closed(&self) -> bool;

    /// Export `object` at `path`. Fails if the path is already taken.
    fn export(&self, path: &ObjectPath, object: Arc<dyn BusObject>) -> Result<()>;

    /// Remove the object this connection exported at `path`. Returns whether
    /// anything was removed.
    fn unexport(&self, path: &ObjectPath) -> bool;

    /// Emit a signal, to `destination` only when given.
    fn emit_signal(&self, destination: Option<&ClientId>, signal: Signal) -> Result<()>;

    /// Start acquiring `name`. Exactly one of the callbacks fires per state
    /// change; ownership can later be lost to a replacing peer.
    fn own_name(
        &self,
        name: &str,
        flags: NameOwnerFlags,
        on_acquired: NameCallback,
        on_lost: NameCallback,
    ) -> OwnerId;

    /// Give up a name. No callbacks fire for `id` afterwards.
    fn unown_name(&self, id: OwnerId);

    /// Fire `on_vanished` once `name` has no owner on the bus (immediately,
    /// from a spawned task, if it has none now).
    fn watch_name(&self, name: &str, on_vanished: NameCallback) -> WatchId;

    fn unwatch_name(&self, id: WatchId);
}

/// Opens dedicated connections to bus addresses.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    async fn dial(&self, address: &str) -> Result<Arc<dyn BusConnection>>;
}

/// Dialer for services that never export on a custom address.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDialer;

#[async_trait]
impl Dialer for NoDialer {
    async fn dial(&self, address: &str) -> Result<Arc<dyn BusConnection>> {
        Err(crate::types::Error::connection(format!(
            "no dialer configured for address {}",
            address
        )))
    }
}
