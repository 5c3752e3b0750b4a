//! Bridge Health Monitor
//!
//! Single process-wide connectivity snapshot behind a watch channel. The
//! transport task and the `bridge/state` decode path write; handlers and
//! the fail-fast check in the correlation bridge read.

use chrono::Utc;
use tokio::sync::watch;

use crate::types::BridgeHealth;

#[derive(Debug)]
pub struct HealthMonitor {
    tx: watch::Sender<BridgeHealth>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    /// Starts disconnected; the transport flips it on the first ConnAck.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(BridgeHealth::default());
        Self { tx }
    }

    pub fn mark_connected(&self) {
        self.tx.send_modify(|health| {
            health.connected = true;
            health.last_heartbeat = Some(Utc::now());
            health.last_error = None;
        });
    }

    pub fn mark_disconnected(&self, reason: impl Into<String>) {
        self.tx.send_modify(|health| {
            health.connected = false;
            health.last_error = Some(reason.into());
        });
    }

    /// Any traffic from the gateway counts as a liveness signal.
    pub fn heartbeat(&self) {
        self.tx.send_modify(|health| {
            health.last_heartbeat = Some(Utc::now());
        });
    }

    /// Cheap, non-blocking read of the current health.
    pub fn snapshot(&self) -> BridgeHealth {
        self.tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.tx.borrow().connected
    }

    /// Watch for changes (used by anything that wants to react to
    /// connect/disconnect transitions).
    pub fn subscribe(&self) -> watch::Receiver<BridgeHealth> {
        self.tx.subscribe()
    }
}
