//! Core types for the input method service.
//!
//! - **IDs**: Strongly-typed identifiers (ClientId, ObjectPath, OwnerId, WatchId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the service, server and transport

mod config;
mod errors;
mod ids;

pub use config::{Config, IpcConfig, ObservabilityConfig, ServerConfig, ServiceConfig};
pub use errors::{Error, Result};
pub use ids::{ClientId, ObjectPath, OwnerId, WatchId};
