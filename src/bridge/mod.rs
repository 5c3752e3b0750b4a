//! Correlation core
//!
//! Everything between the HTTP handlers and the raw transport: the state
//! cache, the bounded event log, the health monitor, and the correlation
//! bridge that turns publish-and-wait into a synchronous call.

pub mod cache;
pub mod correlation;
pub mod events;
pub mod health;

pub use cache::StateCache;
pub use correlation::CorrelationBridge;
pub use events::EventLog;
pub use health::HealthMonitor;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::mqtt::codec::InboundMessage;
use crate::types::Result;

/// Outbound side of the transport, as seen by the bridge. The MQTT client
/// implements this; tests substitute a recording sink.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Drive the bridge from the transport's inbound channel. Exactly one
/// reader task exists per process; it is the sole writer of the cache and
/// the event log. Returns when the transport closes the channel.
pub fn spawn_inbound_reader(
    bridge: Arc<CorrelationBridge>,
    mut inbound: mpsc::Receiver<InboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            bridge.on_inbound(message);
        }
        tracing::info!("inbound channel closed, reader exiting");
    })
}
