//! MQTT Transport
//!
//! Owns the rumqttc client and event loop. The event loop is polled by a
//! dedicated task which decodes every publish and forwards it on the
//! inbound channel; the same task drives the health monitor from
//! connection events. Reconnection is just "keep polling": after an error
//! the loop backs off briefly and polls again, and rumqttc re-establishes
//! the session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::{CommandSink, HealthMonitor};
use crate::config::MqttConfig;
use crate::mqtt::codec::{InboundMessage, TopicCodec};
use crate::types::{Error, Result};

const INBOUND_CHANNEL_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// The event-loop half of the connection. Consumed by [`MqttTransport::run`].
pub struct MqttTransport {
    client: AsyncClient,
    event_loop: EventLoop,
    codec: TopicCodec,
    health: Arc<HealthMonitor>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl MqttTransport {
    /// Set up the client and hand back the pieces: the transport task, the
    /// publisher handle for the bridge, and the inbound message channel for
    /// the reader. Nothing touches the network until `run` is polled.
    pub fn connect(
        config: &MqttConfig,
        codec: TopicCodec,
        health: Arc<HealthMonitor>,
    ) -> (Self, MqttPublisher, mpsc::Receiver<InboundMessage>) {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, 64);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let publisher = MqttPublisher {
            client: client.clone(),
        };
        let transport = Self {
            client,
            event_loop,
            codec,
            health,
            inbound_tx,
        };
        (transport, publisher, inbound_rx)
    }

    /// Poll the event loop until the inbound receiver goes away.
    ///
    /// A single malformed or unrelated message never stops the loop; it
    /// decodes to `Unrecognized` and moves on.
    pub async fn run(mut self) {
        let filter = self.codec.subscription_filter();

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(filter, "connected to MQTT broker, subscribing");
                    self.health.mark_connected();
                    if let Err(e) = self.client.subscribe(filter.clone(), QoS::AtMostOnce).await {
                        warn!("subscribe failed: {e}");
                    }
                }

                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = self.codec.decode(&publish.topic, &publish.payload);
                    if message == InboundMessage::Unrecognized {
                        debug!(topic = %publish.topic, "ignoring unrecognized message");
                    }
                    if self.inbound_tx.send(message).await.is_err() {
                        info!("inbound receiver dropped, transport exiting");
                        return;
                    }
                }

                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("broker sent disconnect");
                    self.health.mark_disconnected("broker sent disconnect");
                }

                Ok(_) => {}

                Err(e) => {
                    self.health.mark_disconnected(e.to_string());
                    warn!(
                        "MQTT connection error: {e}; retrying in {}s",
                        RECONNECT_DELAY.as_secs()
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

/// Cloneable outbound handle; what the correlation bridge publishes through.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl CommandSink for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}
