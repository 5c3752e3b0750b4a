//! API request and response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{DeviceSnapshot, EventRecord};

/// One device as presented over the API: its id plus the raw attribute set
/// the gateway last reported, flattened into the object.
#[derive(Debug, Serialize)]
pub struct DeviceEntry {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl DeviceEntry {
    pub fn from_snapshot(id: impl Into<String>, snapshot: DeviceSnapshot) -> Self {
        Self {
            id: id.into(),
            updated_at: snapshot.updated_at,
            attributes: snapshot.attributes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    pub count: usize,
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub device: Option<String>,
    pub limit: Option<usize>,
    /// Only records with a sequence number above this cursor.
    pub since: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub count: usize,
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
pub struct PermitJoinRequest {
    /// Seconds to allow joining; 0 disables pairing.
    #[serde(default = "default_permit_join_time")]
    pub time: u16,
}

fn default_permit_join_time() -> u16 {
    60
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
    pub data: Value,
}
