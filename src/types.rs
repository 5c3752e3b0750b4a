use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Brightness is a Zigbee level, not a percentage.
pub const BRIGHTNESS_MAX: u16 = 254;
/// Color temperature bounds in mireds.
pub const COLOR_TEMP_MIN: u16 = 153;
pub const COLOR_TEMP_MAX: u16 = 500;

/// Last-known attribute set for one device.
///
/// Attributes are whatever the gateway reports (`state`, `brightness`,
/// `linkquality`, ...). Updated by merging deltas, never replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub attributes: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self {
            attributes,
            updated_at: Utc::now(),
        }
    }
}

/// A device set-command as accepted over HTTP and published to the gateway.
///
/// All fields optional; at least one must be present. Serialization skips
/// absent fields so the published payload carries only what the caller set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<f64>,
}

impl SetRequest {
    /// Check attribute bounds before anything is published.
    pub fn validate(&self) -> Result<()> {
        if self.state.is_none()
            && self.brightness.is_none()
            && self.color_temp.is_none()
            && self.transition.is_none()
        {
            return Err(Error::Validation(
                "at least one of state, brightness, color_temp, transition is required".into(),
            ));
        }
        if let Some(state) = &self.state {
            if !matches!(state.as_str(), "ON" | "OFF" | "TOGGLE") {
                return Err(Error::Validation(format!(
                    "state must be ON, OFF or TOGGLE, got '{state}'"
                )));
            }
        }
        if let Some(brightness) = self.brightness {
            if brightness > BRIGHTNESS_MAX {
                return Err(Error::Validation(format!(
                    "brightness must be 0-{BRIGHTNESS_MAX}, got {brightness}"
                )));
            }
        }
        if let Some(color_temp) = self.color_temp {
            if !(COLOR_TEMP_MIN..=COLOR_TEMP_MAX).contains(&color_temp) {
                return Err(Error::Validation(format!(
                    "color_temp must be {COLOR_TEMP_MIN}-{COLOR_TEMP_MAX} mireds, got {color_temp}"
                )));
            }
        }
        if let Some(transition) = self.transition {
            if !transition.is_finite() || transition < 0.0 {
                return Err(Error::Validation(format!(
                    "transition must be a non-negative number of seconds, got {transition}"
                )));
            }
        }
        Ok(())
    }
}

/// One observed state change, as kept in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number, assigned at append time.
    pub seq: u64,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<i64>,
    /// Full attribute delta as received.
    pub attributes: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Gateway connectivity as last observed on the bus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub connected: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    /// A command is already in flight for this device; the caller should
    /// retry once it resolves. Never overwrites the first waiter.
    #[error("a command is already pending for device '{0}'")]
    Busy(String),

    /// No matching confirmation within the deadline. The command may or may
    /// not have been applied; the outcome is unknown, not failed.
    #[error("no confirmation within {0}ms (command outcome unknown)")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 422,
            Self::Busy(_) => 409,
            Self::Timeout(_) => 504,
            Self::Transport(_) => 502,
            Self::NotFound(_) => 404,
            Self::Config(_) | Self::Io(_) => 500,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Busy(_) => "busy",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport_error",
            Self::NotFound(_) => "not_found",
            Self::Config(_) => "configuration_error",
            Self::Io(_) => "io_error",
        }
    }
}
