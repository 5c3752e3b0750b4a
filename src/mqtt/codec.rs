//! Topic Codec
//!
//! Pure translation between domain messages and raw `(topic, payload)`
//! pairs. Decoding is total: traffic this service does not understand maps
//! to [`InboundMessage::Unrecognized`] instead of an error, because the
//! gateway namespace carries plenty of topics we never act on
//! (availability, logging, our own `/set` publishes echoed back by tools).

use serde_json::{Map, Value};

use crate::types::SetRequest;

/// A decoded message off the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Attribute delta reported on a device state topic (`<base>/<device>`).
    StateUpdate {
        device: String,
        attributes: Map<String, Value>,
    },
    /// Gateway availability from `<base>/bridge/state`.
    BridgeStatus { online: bool },
    /// Reply to a bridge-level request, correlated by `transaction`.
    BridgeResponse {
        op: String,
        transaction: Option<String>,
        payload: Value,
    },
    /// Anything else; counted and otherwise ignored.
    Unrecognized,
}

/// Encodes commands to and decodes messages from the gateway's topic
/// namespace (`<base_topic>/...`).
#[derive(Debug, Clone)]
pub struct TopicCodec {
    base: String,
}

impl TopicCodec {
    pub fn new(base_topic: impl Into<String>) -> Self {
        Self {
            base: base_topic.into(),
        }
    }

    /// Wildcard filter covering the whole gateway namespace.
    pub fn subscription_filter(&self) -> String {
        format!("{}/#", self.base)
    }

    /// Encode a device set-command. The request must already be validated;
    /// only present fields end up in the payload.
    pub fn encode_set(&self, device: &str, request: &SetRequest) -> (String, Vec<u8>) {
        let mut body = Map::new();
        if let Some(state) = &request.state {
            body.insert("state".into(), Value::String(state.clone()));
        }
        if let Some(brightness) = request.brightness {
            body.insert("brightness".into(), Value::from(brightness));
        }
        if let Some(color_temp) = request.color_temp {
            body.insert("color_temp".into(), Value::from(color_temp));
        }
        if let Some(transition) = request.transition {
            body.insert("transition".into(), Value::from(transition));
        }

        let topic = format!("{}/{}/set", self.base, device);
        (topic, Value::Object(body).to_string().into_bytes())
    }

    /// Encode a bridge-level request with its correlation token injected.
    pub fn encode_bridge_request(
        &self,
        op: &str,
        mut body: Map<String, Value>,
        transaction: &str,
    ) -> (String, Vec<u8>) {
        body.insert("transaction".into(), Value::String(transaction.to_string()));
        let topic = format!("{}/bridge/request/{}", self.base, op);
        (topic, Value::Object(body).to_string().into_bytes())
    }

    /// Decode one raw message. Never fails.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> InboundMessage {
        let Some(rest) = topic
            .strip_prefix(self.base.as_str())
            .and_then(|r| r.strip_prefix('/'))
        else {
            return InboundMessage::Unrecognized;
        };

        if rest == "bridge/state" {
            return match decode_bridge_state(payload) {
                Some(online) => InboundMessage::BridgeStatus { online },
                None => InboundMessage::Unrecognized,
            };
        }

        if let Some(op) = rest.strip_prefix("bridge/response/") {
            let Ok(payload) = serde_json::from_slice::<Value>(payload) else {
                return InboundMessage::Unrecognized;
            };
            let transaction = payload.get("transaction").and_then(transaction_token);
            return InboundMessage::BridgeResponse {
                op: op.to_string(),
                transaction,
                payload,
            };
        }

        // Other bridge topics (devices, groups, logging, request echoes).
        if rest == "bridge" || rest.starts_with("bridge/") {
            return InboundMessage::Unrecognized;
        }

        // Device state lives exactly one level below the base topic;
        // deeper topics (`/set`, `/availability`) are not state.
        if rest.is_empty() || rest.contains('/') {
            return InboundMessage::Unrecognized;
        }

        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(attributes)) => InboundMessage::StateUpdate {
                device: rest.to_string(),
                attributes,
            },
            _ => InboundMessage::Unrecognized,
        }
    }
}

/// zigbee2mqtt has published `bridge/state` both as a bare string and as
/// `{"state": "online"}` across versions; accept either.
fn decode_bridge_state(payload: &[u8]) -> Option<bool> {
    if let Ok(value) = serde_json::from_slice::<Value>(payload) {
        let state = match &value {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("state").and_then(Value::as_str),
            _ => None,
        };
        match state {
            Some("online") => return Some(true),
            Some("offline") => return Some(false),
            _ => {}
        }
    }

    match std::str::from_utf8(payload).map(str::trim) {
        Ok("online") => Some(true),
        Ok("offline") => Some(false),
        _ => None,
    }
}

fn transaction_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
