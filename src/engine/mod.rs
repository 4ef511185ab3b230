//! Input method engines.
//!
//! An `Engine` is one exported input object owned by one client. Its behaviour
//! comes from `EngineHandler`s registered by the embedding application:
//!   - **Inbound** calls (`KeyEvent`, `Focus`, ...) run every handler in
//!     registration order; `KeyEvent` stops at the first handler that handles it
//!   - **Outbound** notifications (`commit`, `preedit_changed`,
//!     `delete_surrounding_text`) are sent to the owning client when the engine
//!     lives on the client's own bus. On a dedicated export bus the client's
//!     unique name means nothing, so they go to the peer that last called the
//!     engine there (broadcast until one has)

mod object;
pub mod signals;

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::BusConnection;
use crate::types::{ClientId, Error, ObjectPath, Result};

pub(crate) use object::EngineObject;
pub use signals::{EngineSignal, Styling};

/// Interface name of exported engines.
pub const ENGINE_INTERFACE: &str = "org.freedesktop.InputMethod.Engine";

/// Pluggable engine behaviour. Every method has a no-op default.
pub trait EngineHandler: Send + Sync {
    /// Return `true` if the key was consumed.
    fn key_event(&self, _engine: &Engine, _keycode: u32, _pressed: bool) -> bool {
        false
    }

    fn focus(&self, _engine: &Engine, _focused: bool) {}

    fn reset(&self, _engine: &Engine) {}

    /// The engine is being torn down; no further calls follow.
    fn destroy(&self, _engine: &Engine) {}

    fn set_surrounding_text(&self, _engine: &Engine, _text: &str, _cursor_pos: u32, _anchor_pos: u32) {}

    fn set_content_type(&self, _engine: &Engine, _purpose: u32, _hints: u32) {}
}

type DestroyHook = Box<dyn FnOnce(&Engine) + Send>;

/// Addressee of outbound signals.
#[derive(Debug, Clone)]
enum Recipient {
    /// `client_id`, which names a peer on the export connection.
    Owner,
    /// Last caller on the export connection, if any.
    Caller(Option<ClientId>),
}

struct Export {
    connection: Arc<dyn BusConnection>,
    path: ObjectPath,
    recipient: Recipient,
}

/// One input method engine.
pub struct Engine {
    client_id: ClientId,
    handlers: RwLock<Vec<Arc<dyn EngineHandler>>>,
    export: Mutex<Option<Export>>,
    destroyed: AtomicBool,
    destroy_hooks: Mutex<Vec<DestroyHook>>,
}

impl Engine {
    /// Create an engine for the client that requested it.
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            handlers: RwLock::new(Vec::new()),
            export: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            destroy_hooks: Mutex::new(Vec::new()),
        }
    }

    /// Builder-style `connect`.
    pub fn with_handler(self, handler: impl EngineHandler + 'static) -> Self {
        self.connect(handler);
        self
    }

    /// Append a handler. Handlers run in the order they were connected.
    pub fn connect(&self, handler: impl EngineHandler + 'static) {
        self.handlers.write().push(Arc::new(handler));
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Path the engine is exported at, once exported.
    pub fn object_path(&self) -> Option<ObjectPath> {
        self.export.lock().as_ref().map(|e| e.path.clone())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn handlers(&self) -> Vec<Arc<dyn EngineHandler>> {
        self.handlers.read().clone()
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// First handler returning `true` wins; `false` if none do.
    pub fn key_event(&self, keycode: u32, pressed: bool) -> bool {
        self.handlers()
            .iter()
            .any(|handler| handler.key_event(self, keycode, pressed))
    }

    pub fn focus(&self, focused: bool) {
        for handler in self.handlers() {
            handler.focus(self, focused);
        }
    }

    pub fn reset(&self) {
        for handler in self.handlers() {
            handler.reset(self);
        }
    }

    pub fn set_surrounding_text(&self, text: &str, cursor_pos: u32, anchor_pos: u32) {
        for handler in self.handlers() {
            handler.set_surrounding_text(self, text, cursor_pos, anchor_pos);
        }
    }

    pub fn set_content_type(&self, purpose: u32, hints: u32) {
        for handler in self.handlers() {
            handler.set_content_type(self, purpose, hints);
        }
    }

    /// Tear the engine down: notify handlers, unexport, run destroy hooks.
    ///
    /// Only the first call has any effect.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        for handler in self.handlers() {
            handler.destroy(self);
        }
        if let Some(export) = self.export.lock().take() {
            export.connection.unexport(&export.path);
            tracing::debug!("engine_destroyed: path={} client={}", export.path, self.client_id);
        }
        let hooks = std::mem::take(&mut *self.destroy_hooks.lock());
        for hook in hooks {
            hook(self);
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Send completed text to the client.
    pub fn commit(&self, text: &str) -> Result<()> {
        self.emit(EngineSignal::Commit {
            text: text.to_string(),
        })
    }

    /// Send the current preedit string with its styling runs.
    pub fn preedit_changed(&self, text: &str, styling: &[Styling], cursor_pos: i32) -> Result<()> {
        signals::validate_styling(text, styling)?;
        self.emit(EngineSignal::PreeditChanged {
            text: text.to_string(),
            styling: styling.to_vec(),
            cursor_pos,
        })
    }

    /// Ask the client to delete `nchars` characters starting `offset`
    /// characters from the cursor.
    pub fn delete_surrounding_text(&self, offset: i32, nchars: u32) -> Result<()> {
        self.emit(EngineSignal::DeleteSurroundingText { offset, nchars })
    }

    fn emit(&self, signal: EngineSignal) -> Result<()> {
        let target = self
            .export
            .lock()
            .as_ref()
            .map(|e| (e.connection.clone(), e.path.clone(), e.recipient.clone()));
        let Some((connection, path, recipient)) = target else {
            tracing::debug!(
                "engine_signal_dropped: {} on unexported engine of {}",
                signal.member(),
                self.client_id
            );
            return Ok(());
        };
        let destination = match recipient {
            Recipient::Owner => Some(self.client_id.clone()),
            Recipient::Caller(peer) => peer,
        };
        connection.emit_signal(destination.as_ref(), signal.to_signal(&path)?)
    }

    // =========================================================================
    // Service-side lifecycle
    // =========================================================================

    /// Export the engine's method surface at `path` on `connection`.
    ///
    /// With `unicast`, signals go to `client_id` on `connection`; otherwise
    /// to whichever peer last called the engine there.
    pub(crate) fn export(
        self: &Arc<Self>,
        connection: Arc<dyn BusConnection>,
        path: ObjectPath,
        unicast: bool,
    ) -> Result<()> {
        let mut export = self.export.lock();
        if export.is_some() {
            return Err(Error::export_failed(format!(
                "engine of {} is already exported",
                self.client_id
            )));
        }
        connection.export(&path, Arc::new(EngineObject::new(Arc::downgrade(self))))?;
        let recipient = if unicast {
            Recipient::Owner
        } else {
            Recipient::Caller(None)
        };
        *export = Some(Export {
            connection,
            path,
            recipient,
        });
        Ok(())
    }

    /// Record the peer behind an inbound call.
    pub(crate) fn note_caller(&self, sender: &ClientId) {
        if let Some(Export {
            recipient: Recipient::Caller(peer),
            ..
        }) = self.export.lock().as_mut()
        {
            if peer.as_ref() != Some(sender) {
                tracing::debug!("engine_peer_changed: client={} peer={}", self.client_id, sender);
                *peer = Some(sender.clone());
            }
        }
    }

    /// Run `hook` once when the engine is destroyed; immediately if it already is.
    pub(crate) fn on_destroyed(&self, hook: impl FnOnce(&Engine) + Send + 'static) {
        {
            let mut hooks = self.destroy_hooks.lock();
            if !self.is_destroyed() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook(self);
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("client_id", &self.client_id)
            .field("object_path", &self.object_path())
            .field("handlers", &self.handlers.read().len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
