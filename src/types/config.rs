//! Configuration structures.
//!
//! Configuration is loaded from a JSON file and overridden by CLI flags or
//! environment variables in the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::Result;

/// Global service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Input method service configuration.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// IPC transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Input method service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Application id; engine object paths live under the path derived from it.
    pub application_id: String,

    /// Dedicated bus address engines are exported on. `None` (or empty) means
    /// engines share the service's own connection.
    pub export_address: Option<String>,

    /// How long the process lingers with a zero hold count before exiting.
    #[serde(with = "humantime_serde")]
    pub inactivity_timeout: Duration,
}

impl ServiceConfig {
    /// Export address with the empty string normalized to `None`.
    pub fn export_address(&self) -> Option<&str> {
        self.export_address.as_deref().filter(|a| !a.is_empty())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            application_id: "org.freedesktop.InputMethod.Service".to_string(),
            export_address: None,
            inactivity_timeout: Duration::from_secs(10),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IPC server bind address (TCP).
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50061".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// IPC transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent TCP connections. Connections beyond this limit are
    /// rejected.
    pub max_connections: usize,

    /// Write timeout in seconds per frame. Slow consumers that cannot
    /// accept a frame within this window are dropped.
    pub write_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 1024 * 1024,
            max_connections: 256,
            write_timeout_secs: 10,
        }
    }
}
