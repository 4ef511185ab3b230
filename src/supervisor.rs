//! Process keep-alive accounting.
//!
//! `ProcessHold` is the use count that keeps the hosting process alive: one
//! unit for an owned (or being acquired) bus name, one per live engine. It is
//! handed to the registry and the name owner as a capability; nothing reaches
//! it through global state.

use std::time::Duration;
use tokio::sync::watch;

/// Shared hold counter. Cloning yields another handle to the same count.
#[derive(Debug, Clone)]
pub struct ProcessHold {
    count: watch::Sender<usize>,
}

impl ProcessHold {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    /// Take one hold.
    pub fn hold(&self) {
        self.count.send_modify(|count| *count += 1);
        tracing::trace!("process_hold: count={}", self.count());
    }

    /// Release one hold. Releasing at zero is logged and ignored.
    pub fn release(&self) {
        let released = self.count.send_if_modified(|count| {
            if *count == 0 {
                return false;
            }
            *count -= 1;
            true
        });
        if released {
            tracing::trace!("process_release: count={}", self.count());
        } else {
            tracing::warn!("process_release_underflow: hold count already zero");
        }
    }

    /// Current hold count.
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Receiver notified on every change of the count.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Wait until the count has stayed at zero for `inactivity_timeout`.
    ///
    /// Any hold taken during the grace period restarts the wait.
    pub async fn wait_idle(&self, inactivity_timeout: Duration) {
        let mut rx = self.subscribe();
        loop {
            if rx.wait_for(|count| *count == 0).await.is_err() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(inactivity_timeout) => {
                    if *rx.borrow() == 0 {
                        tracing::info!("process_idle: no holds for {:?}", inactivity_timeout);
                        return;
                    }
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

impl Default for ProcessHold {
    fn default() -> Self {
        Self::new()
    }
}
