//! HTTP Handlers
//!
//! Thin adapters between the REST surface and the correlation core. All
//! device state comes from the cache; only `set` and the bridge-level
//! operations touch the bus.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::{json, Map, Value};

use super::models::{
    DeviceEntry, DeviceListResponse, EventsQuery, EventsResponse, PermitJoinRequest,
    SuccessResponse,
};
use super::state::AppState;
use crate::types::{BridgeHealth, Error, Result, SetRequest};

const DEFAULT_EVENT_LIMIT: usize = 100;
const MAX_EVENT_LIMIT: usize = 1000;

/// `GET /api/devices`
pub async fn list_devices(State(state): State<AppState>) -> Json<DeviceListResponse> {
    let devices: Vec<DeviceEntry> = state
        .cache()
        .all()
        .into_iter()
        .map(|(id, snapshot)| DeviceEntry::from_snapshot(id, snapshot))
        .collect();

    Json(DeviceListResponse {
        count: devices.len(),
        devices,
    })
}

/// `GET /api/devices/{id}`
pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceEntry>> {
    let snapshot = state
        .cache()
        .get(&id)
        .ok_or_else(|| Error::NotFound(format!("device '{id}'")))?;
    Ok(Json(DeviceEntry::from_snapshot(id, snapshot)))
}

/// `POST /api/devices/{id}/set`
///
/// Publishes the command and answers with the confirmed snapshot. Timeout
/// (504) means the outcome is unknown, 409 means a command for this device
/// is already in flight.
pub async fn set_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SetRequest>,
) -> Result<Json<DeviceEntry>> {
    let snapshot = state.bridge().issue_command(&id, &request, None).await?;
    Ok(Json(DeviceEntry::from_snapshot(id, snapshot)))
}

/// `GET /api/events?device=&limit=&since=`
pub async fn query_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    let events = state
        .events()
        .query(query.device.as_deref(), limit, query.since);

    Json(EventsResponse {
        count: events.len(),
        events,
    })
}

/// `GET /api/bridge/health`
pub async fn bridge_health(State(state): State<AppState>) -> Json<BridgeHealth> {
    Json(state.health().snapshot())
}

/// `GET /api/bridge/info`
pub async fn bridge_info(State(state): State<AppState>) -> Result<Json<Value>> {
    let response = state
        .bridge()
        .issue_bridge_request("config", Map::new(), None)
        .await?;
    Ok(Json(response.get("data").cloned().unwrap_or(Value::Null)))
}

/// `POST /api/bridge/permit_join`
pub async fn permit_join(
    State(state): State<AppState>,
    Json(request): Json<PermitJoinRequest>,
) -> Result<Json<SuccessResponse>> {
    if request.time > 254 {
        return Err(Error::Validation(format!(
            "time must be 0-254 seconds, got {}",
            request.time
        )));
    }

    let mut body = Map::new();
    body.insert("time".into(), Value::from(request.time));
    let response = state
        .bridge()
        .issue_bridge_request("permit_join", body, None)
        .await?;

    let message = if request.time > 0 {
        format!("permit join enabled for {}s", request.time)
    } else {
        "permit join disabled".to_string()
    };

    Ok(Json(SuccessResponse {
        success: true,
        message,
        data: response,
    }))
}

/// `GET /health`, the liveness probe; mounted outside the API-key layer.
pub async fn service_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "lumen",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
