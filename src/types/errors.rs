//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. The first
//! five variants are the `CreateEngine` failure taxonomy and are replied to the
//! caller verbatim; the rest cover transport and argument problems.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the input method service.
#[derive(Error, Debug)]
pub enum Error {
    /// The engine factory declined to produce an engine.
    #[error("cannot create engine")]
    EngineCreationFailed,

    /// The default connection was requested before the service registered on a bus.
    #[error("application has not yet been registered")]
    NotRegistered,

    /// The service is registered but currently has no usable bus connection.
    #[error("application has no bus connection")]
    NoConnection,

    /// Dialing the configured export address failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Exporting an object failed (path collision or transport error).
    #[error("export failed: {0}")]
    ExportFailed(String),

    /// Malformed call arguments.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown object, method or peer.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code written into IPC error replies.
    pub fn to_ipc_error_code(&self) -> &'static str {
        match self {
            Error::EngineCreationFailed => "ENGINE_CREATION_FAILED",
            Error::NotRegistered => "NOT_REGISTERED",
            Error::NoConnection => "NO_CONNECTION",
            Error::Connection(_) => "CONNECTION_ERROR",
            Error::ExportFailed(_) => "EXPORT_FAILED",
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => "INTERNAL",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn export_failed(msg: impl Into<String>) -> Self {
        Self::ExportFailed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
