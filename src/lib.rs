//! # Input Method Service
//!
//! Session and lifecycle manager for input method engines exported over a
//! message bus:
//! - Well-known name ownership with safe re-entrant activation
//! - Per-client engine bookkeeping driven by client liveness
//! - Process keep-alive accounting (one hold per live engine plus the name)
//! - Engine method dispatch to pluggable handlers and outbound notifications
//! - In-process bus with a TCP+msgpack transport for external clients
//!
//! ## Architecture
//!
//! ```text
//!                       ┌──────────────────────────────────────┐
//!   TCP clients  →  IPC │              Service                 │
//!   (bus peers)  server │  ┌─────────┐ ┌──────────┐ ┌────────┐ │
//!        │              │  │NameOwner│ │ Registry │ │Resolver│ │
//!        ▼              │  └─────────┘ └──────────┘ └────────┘ │
//!    LocalBus  ◀──────▶ │        EngineFactory → Engine        │
//!                       └──────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod bus;
pub mod engine;
pub mod ipc;
pub mod service;
pub mod supervisor;
pub mod types;

// Internal utilities
pub mod observability;

pub use engine::{Engine, EngineHandler, EngineSignal, Styling};
pub use service::{EngineFactory, NoEngineFactory, PlatformData, Service};
pub use supervisor::ProcessHold;
pub use types::{Config, Error, IpcConfig, Result, ServiceConfig};
