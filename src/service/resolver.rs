//! Export connection resolution.

use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::bus::{BusConnection, Dialer};
use crate::types::{Error, Result};

/// Picks the connection engines are exported on, once.
///
/// With an export address, a dedicated connection is dialed; otherwise the
/// service's inbound connection is reused. The first successful answer is
/// kept for the resolver's lifetime and concurrent first callers share it.
#[derive(Debug)]
pub struct ConnectionResolver {
    address: Option<String>,
    dialer: Arc<dyn Dialer>,
    resolved: OnceCell<Arc<dyn BusConnection>>,
}

impl ConnectionResolver {
    /// An empty `address` counts as none.
    pub fn new(address: Option<String>, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            address: address.filter(|a| !a.is_empty()),
            dialer,
            resolved: OnceCell::new(),
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// The connection, if one has been resolved already.
    pub fn resolved(&self) -> Option<Arc<dyn BusConnection>> {
        self.resolved.get().cloned()
    }

    /// Resolve the export connection. `inbound` is consulted only when no
    /// export address is configured.
    pub async fn resolve<F>(&self, inbound: F) -> Result<Arc<dyn BusConnection>>
    where
        F: FnOnce() -> Result<Arc<dyn BusConnection>>,
    {
        let connection = self
            .resolved
            .get_or_try_init(|| async {
                match &self.address {
                    Some(address) => {
                        let connection = self.dialer.dial(address).await.map_err(|e| match e {
                            Error::Connection(_) => e,
                            other => Error::connection(other.to_string()),
                        })?;
                        tracing::info!("export_connection_dialed: address={}", address);
                        Ok(connection)
                    }
                    None => inbound(),
                }
            })
            .await?;
        Ok(connection.clone())
    }
}
