//! Correlation Bridge
//!
//! Issues commands onto the bus and suspends each caller until the gateway
//! confirms with a state update, or the deadline passes. Device commands
//! correlate on the device id (the `/set` topic carries no token), so each
//! pending entry is generation-tagged: a timed-out call can only remove its
//! own entry, never a newer one registered for the same device after it
//! gave up. Bridge-level requests carry an explicit `transaction` token and
//! correlate on that instead.
//!
//! At most one command may be in flight per device; a second concurrent
//! call gets `Error::Busy` rather than silently displacing the first
//! waiter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::bridge::{CommandSink, EventLog, HealthMonitor, StateCache};
use crate::mqtt::codec::{InboundMessage, TopicCodec};
use crate::types::{DeviceSnapshot, Error, Result, SetRequest};

/// A registered waiter for one device command.
struct PendingCommand {
    generation: u64,
    created_at: Instant,
    reply: oneshot::Sender<DeviceSnapshot>,
}

pub struct CorrelationBridge {
    codec: TopicCodec,
    sink: Arc<dyn CommandSink>,
    cache: Arc<StateCache>,
    events: Arc<EventLog>,
    health: Arc<HealthMonitor>,
    /// device id -> live waiter; at most one entry per device.
    pending: DashMap<String, PendingCommand>,
    /// transaction token -> live bridge-request waiter.
    pending_rpcs: DashMap<String, oneshot::Sender<Value>>,
    generation: AtomicU64,
    default_timeout: Duration,
}

impl CorrelationBridge {
    pub fn new(
        codec: TopicCodec,
        sink: Arc<dyn CommandSink>,
        cache: Arc<StateCache>,
        events: Arc<EventLog>,
        health: Arc<HealthMonitor>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            codec,
            sink,
            cache,
            events,
            health,
            pending: DashMap::new(),
            pending_rpcs: DashMap::new(),
            generation: AtomicU64::new(1),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Live device-command waiters.
    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    /// Live bridge-request waiters.
    pub fn pending_requests(&self) -> usize {
        self.pending_rpcs.len()
    }

    /// Publish a set-command for `device` and wait for the gateway to
    /// report the device's new state.
    ///
    /// Fails fast with `Validation` (bad attributes), `Busy` (a command is
    /// already pending for this device) or `Transport` (gateway known
    /// offline, or publish failed) without waiting; otherwise suspends the
    /// caller until a matching state update arrives or `timeout` elapses.
    /// On `Timeout` the outcome of the command is unknown.
    pub async fn issue_command(
        &self,
        device: &str,
        request: &SetRequest,
        timeout: Option<Duration>,
    ) -> Result<DeviceSnapshot> {
        request.validate()?;

        if !self.health.is_connected() {
            return Err(Error::Transport("gateway is offline".into()));
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        match self.pending.entry(device.to_string()) {
            Entry::Occupied(_) => return Err(Error::Busy(device.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(PendingCommand {
                    generation,
                    created_at: Instant::now(),
                    reply: reply_tx,
                });
            }
        }

        let (topic, payload) = self.codec.encode_set(device, request);
        if let Err(e) = self.sink.publish(&topic, payload).await {
            self.remove_generation(device, generation);
            return Err(e);
        }
        debug!(device, generation, "command published, awaiting confirmation");

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            // The sender was dropped without a reply; only possible if the
            // entry vanished without resolution.
            Ok(Err(_)) => Err(Error::Transport("confirmation channel closed".into())),
            Err(_) => {
                self.remove_generation(device, generation);
                Err(Error::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Publish a bridge-level request (`permit_join`, `health_check`,
    /// `config`, ...) and wait for the response carrying the same
    /// `transaction` token.
    pub async fn issue_bridge_request(
        &self,
        op: &str,
        body: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if !self.health.is_connected() {
            return Err(Error::Transport("gateway is offline".into()));
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut transaction = Uuid::new_v4().simple().to_string();
        transaction.truncate(8);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending_rpcs.insert(transaction.clone(), reply_tx);

        let (topic, payload) = self.codec.encode_bridge_request(op, body, &transaction);
        if let Err(e) = self.sink.publish(&topic, payload).await {
            self.pending_rpcs.remove(&transaction);
            return Err(e);
        }
        debug!(op, transaction, "bridge request published");

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Transport("response channel closed".into())),
            Err(_) => {
                self.pending_rpcs.remove(&transaction);
                Err(Error::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Ingest one decoded message from the bus.
    ///
    /// This is a fan-out, not a branch: a state update always lands in the
    /// cache and the event log, whether or not a waiter was resolved by it.
    pub fn on_inbound(&self, message: InboundMessage) {
        match message {
            InboundMessage::StateUpdate { device, attributes } => {
                self.health.heartbeat();
                let snapshot = self.cache.merge(&device, &attributes);
                self.events.append(&device, &attributes);

                if let Some((_, waiter)) = self.pending.remove(&device) {
                    debug!(
                        device,
                        generation = waiter.generation,
                        elapsed_ms = waiter.created_at.elapsed().as_millis() as u64,
                        "pending command resolved"
                    );
                    // Send fails only if the caller already timed out and
                    // dropped its receiver; the state change is kept either
                    // way.
                    let _ = waiter.reply.send(snapshot);
                }
            }

            InboundMessage::BridgeStatus { online } => {
                self.health.heartbeat();
                if online {
                    self.health.mark_connected();
                } else {
                    self.health.mark_disconnected("gateway reported offline");
                }
            }

            InboundMessage::BridgeResponse {
                op,
                transaction,
                payload,
            } => {
                self.health.heartbeat();
                match transaction.and_then(|t| self.pending_rpcs.remove(&t)) {
                    Some((transaction, waiter)) => {
                        debug!(op, transaction, "bridge request resolved");
                        let _ = waiter.send(payload);
                    }
                    None => warn!(op, "bridge response without matching transaction"),
                }
            }

            InboundMessage::Unrecognized => {
                trace!("unrecognized message ignored");
            }
        }
    }

    /// Remove the pending entry for `device` only if it still belongs to
    /// `generation`. A newer command registered after this one gave up is
    /// left untouched.
    fn remove_generation(&self, device: &str, generation: u64) {
        self.pending
            .remove_if(device, |_, pending| pending.generation == generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use parking_lot::Mutex;

    /// Recording sink; flips to failure mode on demand.
    #[derive(Default)]
    struct MockSink {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl CommandSink for MockSink {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(Error::Transport("publish failed".into()));
            }
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    struct Fixture {
        bridge: Arc<CorrelationBridge>,
        sink: Arc<MockSink>,
        cache: Arc<StateCache>,
        events: Arc<EventLog>,
        health: Arc<HealthMonitor>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(MockSink::default());
        let cache = Arc::new(StateCache::new());
        let events = Arc::new(EventLog::new(100));
        let health = Arc::new(HealthMonitor::new());
        health.mark_connected();

        let bridge = Arc::new(CorrelationBridge::new(
            TopicCodec::new("zigbee2mqtt"),
            sink.clone(),
            cache.clone(),
            events.clone(),
            health.clone(),
            Duration::from_secs(5),
        ));

        Fixture {
            bridge,
            sink,
            cache,
            events,
            health,
        }
    }

    fn on_request() -> SetRequest {
        SetRequest {
            state: Some("ON".into()),
            brightness: Some(254),
            ..Default::default()
        }
    }

    fn update(device: &str, json: &str) -> InboundMessage {
        InboundMessage::StateUpdate {
            device: device.to_string(),
            attributes: serde_json::from_str(json).unwrap(),
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never reached");
    }

    #[tokio::test]
    async fn command_resolves_on_matching_state_update() {
        let f = fixture();

        let bridge = f.bridge.clone();
        let call = tokio::spawn(async move {
            bridge
                .issue_command("Bedroom1", &on_request(), None)
                .await
        });

        wait_until(|| f.bridge.pending_commands() == 1).await;
        assert_eq!(f.sink.published.lock().len(), 1);
        assert_eq!(f.sink.published.lock()[0].0, "zigbee2mqtt/Bedroom1/set");

        f.bridge
            .on_inbound(update("Bedroom1", r#"{"state":"ON","brightness":254}"#));

        let snapshot = call.await.unwrap().unwrap();
        assert_eq!(snapshot.attributes["state"], "ON");
        assert_eq!(snapshot.attributes["brightness"], 254);

        // pending entry gone, cache and event log both updated
        assert_eq!(f.bridge.pending_commands(), 0);
        assert_eq!(f.cache.get("Bedroom1").unwrap().attributes["state"], "ON");
        let records = f.events.query(Some("Bedroom1"), 10, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state.as_deref(), Some("ON"));
    }

    #[tokio::test]
    async fn command_times_out_without_confirmation() {
        let f = fixture();

        let started = Instant::now();
        let err = f
            .bridge
            .issue_command("Bedroom1", &on_request(), Some(Duration::from_millis(10)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(10)));
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert_eq!(f.bridge.pending_commands(), 0);
        // the command was published but never confirmed; the cache must not
        // have been touched
        assert!(f.cache.get("Bedroom1").is_none());
    }

    #[tokio::test]
    async fn late_update_does_not_resolve_timed_out_command() {
        let f = fixture();

        let err = f
            .bridge
            .issue_command("Bedroom1", &on_request(), Some(Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        // The confirmation arrives after the caller gave up: state is still
        // recorded, but no waiter exists to resolve.
        f.bridge
            .on_inbound(update("Bedroom1", r#"{"state":"ON","brightness":254}"#));
        assert_eq!(f.bridge.pending_commands(), 0);
        assert_eq!(f.cache.get("Bedroom1").unwrap().attributes["state"], "ON");

        // A fresh command gets its own resolution, untouched by the stale
        // history above.
        let bridge = f.bridge.clone();
        let call = tokio::spawn(async move {
            let request = SetRequest {
                state: Some("OFF".into()),
                ..Default::default()
            };
            bridge.issue_command("Bedroom1", &request, None).await
        });
        wait_until(|| f.bridge.pending_commands() == 1).await;
        f.bridge.on_inbound(update("Bedroom1", r#"{"state":"OFF"}"#));

        let snapshot = call.await.unwrap().unwrap();
        assert_eq!(snapshot.attributes["state"], "OFF");
    }

    #[tokio::test]
    async fn second_command_for_same_device_is_busy() {
        let f = fixture();

        let bridge = f.bridge.clone();
        let first = tokio::spawn(async move {
            bridge.issue_command("Bedroom1", &on_request(), None).await
        });
        wait_until(|| f.bridge.pending_commands() == 1).await;

        let err = f
            .bridge
            .issue_command("Bedroom1", &on_request(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
        // the rejected call must not have published
        assert_eq!(f.sink.published.lock().len(), 1);

        // the first waiter is still intact and resolvable
        f.bridge
            .on_inbound(update("Bedroom1", r#"{"state":"ON","brightness":254}"#));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn concurrent_commands_for_different_devices_are_independent() {
        let f = fixture();

        let bridge_a = f.bridge.clone();
        let a = tokio::spawn(async move {
            bridge_a.issue_command("Bedroom1", &on_request(), None).await
        });
        let bridge_b = f.bridge.clone();
        let b = tokio::spawn(async move {
            bridge_b.issue_command("Kitchen", &on_request(), None).await
        });

        wait_until(|| f.bridge.pending_commands() == 2).await;

        f.bridge.on_inbound(update("Kitchen", r#"{"state":"ON"}"#));
        let kitchen = b.await.unwrap().unwrap();
        assert_eq!(kitchen.attributes["state"], "ON");
        assert_eq!(f.bridge.pending_commands(), 1);

        f.bridge.on_inbound(update("Bedroom1", r#"{"state":"ON"}"#));
        assert!(a.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn invalid_command_is_rejected_before_publish() {
        let f = fixture();
        let request = SetRequest {
            brightness: Some(999),
            ..Default::default()
        };

        let err = f
            .bridge
            .issue_command("Bedroom1", &request, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(f.sink.published.lock().is_empty());
    }

    #[tokio::test]
    async fn disconnected_gateway_fails_fast() {
        let f = fixture();
        f.health.mark_disconnected("broker unreachable");

        let err = f
            .bridge
            .issue_command("Bedroom1", &on_request(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(f.sink.published.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_publish_releases_the_pending_slot() {
        let f = fixture();
        f.sink.fail.store(true, Ordering::Relaxed);

        let err = f
            .bridge
            .issue_command("Bedroom1", &on_request(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(f.bridge.pending_commands(), 0);

        // the device is not stuck busy afterwards
        f.sink.fail.store(false, Ordering::Relaxed);
        let bridge = f.bridge.clone();
        let call = tokio::spawn(async move {
            bridge.issue_command("Bedroom1", &on_request(), None).await
        });
        wait_until(|| f.bridge.pending_commands() == 1).await;
        f.bridge
            .on_inbound(update("Bedroom1", r#"{"state":"ON"}"#));
        assert!(call.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn bridge_request_resolves_only_on_matching_transaction() {
        let f = fixture();

        let bridge = f.bridge.clone();
        let call = tokio::spawn(async move {
            let mut body = Map::new();
            body.insert("time".into(), Value::from(60));
            bridge.issue_bridge_request("permit_join", body, None).await
        });
        wait_until(|| f.bridge.pending_requests() == 1).await;

        // recover the generated transaction token from the published payload
        let payload: Value = {
            let published = f.sink.published.lock();
            assert_eq!(published[0].0, "zigbee2mqtt/bridge/request/permit_join");
            serde_json::from_slice(&published[0].1).unwrap()
        };
        let transaction = payload["transaction"].as_str().unwrap().to_string();

        // a response for someone else's transaction is ignored
        f.bridge.on_inbound(InboundMessage::BridgeResponse {
            op: "permit_join".into(),
            transaction: Some("deadbeef".into()),
            payload: serde_json::json!({"status": "ok"}),
        });
        assert_eq!(f.bridge.pending_requests(), 1);

        f.bridge.on_inbound(InboundMessage::BridgeResponse {
            op: "permit_join".into(),
            transaction: Some(transaction),
            payload: serde_json::json!({"status": "ok", "data": {"time": 60}}),
        });

        let response = call.await.unwrap().unwrap();
        assert_eq!(response["status"], "ok");
        assert_eq!(f.bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn bridge_request_times_out() {
        let f = fixture();

        let err = f
            .bridge
            .issue_bridge_request("health_check", Map::new(), Some(Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(f.bridge.pending_requests(), 0);
    }

    #[tokio::test]
    async fn bridge_status_drives_health() {
        let f = fixture();

        f.bridge
            .on_inbound(InboundMessage::BridgeStatus { online: false });
        assert!(!f.health.is_connected());

        f.bridge
            .on_inbound(InboundMessage::BridgeStatus { online: true });
        assert!(f.health.is_connected());
    }

    #[tokio::test]
    async fn unsolicited_updates_feed_cache_and_log() {
        let f = fixture();

        f.bridge
            .on_inbound(update("Sensor1", r#"{"temperature":21.5}"#));
        f.bridge
            .on_inbound(update("Sensor1", r#"{"temperature":22.0}"#));

        assert_eq!(
            f.cache.get("Sensor1").unwrap().attributes["temperature"],
            22.0
        );
        assert_eq!(f.events.query(Some("Sensor1"), 10, None).len(), 2);
        // heartbeat observed even though nothing was pending
        assert!(f.health.snapshot().last_heartbeat.is_some());
    }
}
