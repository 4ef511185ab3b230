//! Engine factories.

use serde_json::{Map, Value};

use crate::engine::Engine;
use crate::types::ClientId;

/// Platform data passed along with `CreateEngine`.
pub type PlatformData = Map<String, Value>;

/// Produces engines for `CreateEngine` requests.
///
/// `before_emit`/`after_emit` bracket every `create_engine` call with the
/// platform data of the request, so a factory can set up and tear down
/// per-request context.
pub trait EngineFactory: Send + Sync {
    /// Build an engine for `client_id`, or decline with `None`.
    fn create_engine(&self, client_id: &ClientId) -> Option<Engine>;

    fn before_emit(&self, _platform_data: &PlatformData) {}

    fn after_emit(&self, _platform_data: &PlatformData) {}
}

impl<F> EngineFactory for F
where
    F: Fn(&ClientId) -> Option<Engine> + Send + Sync,
{
    fn create_engine(&self, client_id: &ClientId) -> Option<Engine> {
        self(client_id)
    }
}

/// Factory that never produces an engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEngineFactory;

impl EngineFactory for NoEngineFactory {
    fn create_engine(&self, client_id: &ClientId) -> Option<Engine> {
        tracing::warn!("create_engine_unhandled: no engine factory installed for {}", client_id);
        None
    }
}
