//! ==============================================================================
//! server.rs - relay web server
//! ==============================================================================
//!
//! purpose:
//!     serves the device contract the ESP32 and the dashboards talk to, plus a
//!     handful of diagnostic endpoints.
//!
//! routes:
//!     GET  /api/update           - live state, distances nulled when stale
//!     POST /api/update           - device/dashboard write, returns merged state
//!     GET  /api/occupancy        - per-slot status and counts for the live state
//!     GET  /api/debug/state      - raw stored report, ignores staleness
//!     GET  /api/parking-history  - bucketed history (?hours=24&slotId=1)
//!     POST /api/parking-history  - record a reading directly
//!     GET  /api/test-esp32       - connectivity check for firmware bring-up
//!     POST /api/test-esp32       - echo
//!     POST /api/test-leds        - led-only write
//!
//! cors:
//!     any origin. the device is not a browser and dashboards may be served
//!     from elsewhere; preflight is answered by the layer, before any handler.
//!
//! relationships:
//!     - uses: store.rs (state), history.rs (forwarding + log), occupancy.rs
//!     - used by: main.rs (relay role), tests/api.rs
//!
//! ==============================================================================

use crate::domain::{DeviceReport, DeviceUpdate, StateView};
use crate::error::ApiError;
use crate::history::{HistoryForwarder, HistoryLog, HistoryQuery};
use crate::occupancy::{OccupancySummary, SpotBands, SpotStatus};
use crate::store::DeviceStateStore;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, Method},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

// ==============================================================================
// shared state
// ==============================================================================
// one instance per server, handed to every handler:
// - store: the device state, written by the device, read by dashboards
// - history: forwarding queue for accepted distances writes
// - history_log: present only when this process keeps history itself

pub struct RelayState {
    pub store: Arc<DeviceStateStore>,
    pub history: HistoryForwarder,
    pub history_log: Option<Arc<HistoryLog>>,
    pub bands: SpotBands,
    /// log every reading at info instead of debug
    pub show_sensor_data: bool,
}

pub fn router(state: Arc<RelayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/update", get(read_handler).post(write_handler))
        .route("/api/occupancy", get(occupancy_handler))
        .route("/api/debug/state", get(debug_handler))
        .route("/api/parking-history", get(history_query_handler).post(history_record_handler))
        .route("/api/test-esp32", get(esp32_ping_handler).post(esp32_echo_handler))
        .route("/api/test-leds", post(test_leds_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(
    bind_addr: &str,
    state: Arc<RelayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "relay listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ==============================================================================
// device contract
// ==============================================================================

/// read contract for dashboards and the monitor
async fn read_handler(State(state): State<Arc<RelayState>>) -> Json<StateView> {
    Json(state.store.read_current())
}

/// write contract for the device and dashboards
///
/// the body is parsed in full before anything is applied: undecodable json
/// changes nothing. fields of the wrong shape are skipped one by one.
async fn write_handler(
    State(state): State<Arc<RelayState>>,
    body: Bytes,
) -> Result<Json<StateView>, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "rejected undecodable update");
        ApiError::Decode(e)
    })?;
    let update = DeviceUpdate::from_json(&value);
    if !update.ignored.is_empty() {
        tracing::debug!(fields = ?update.ignored, "ignored malformed update fields");
    }

    let view = state.store.apply_update(&update);

    if let Some(distances) = update.distances {
        log_parking_status(&state, &distances);
        state.history.forward(distances);
    }
    if !update.actuators.is_empty() {
        tracing::debug!(leds = ?view.leds, "led state updated");
    }
    Ok(Json(view))
}

fn log_parking_status(state: &RelayState, distances: &[Option<f64>]) {
    let summary = state
        .bands
        .classify_all(distances)
        .iter()
        .enumerate()
        .map(|(i, status)| format!("Slot {}: {}", i + 1, status_label(*status)))
        .collect::<Vec<_>>()
        .join(", ");
    if state.show_sensor_data {
        tracing::info!(distances = ?distances, "{summary}");
    } else {
        tracing::debug!(distances = ?distances, "{summary}");
    }
}

fn status_label(status: SpotStatus) -> &'static str {
    match status {
        SpotStatus::Occupied => "OCCUPIED",
        SpotStatus::Free => "FREE",
        SpotStatus::Unknown => "UNKNOWN",
    }
}

// ==============================================================================
// derived views
// ==============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OccupancyResponse {
    active: bool,
    slots: Vec<SlotStatus>,
    summary: OccupancySummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotStatus {
    slot_id: usize,
    distance: Option<f64>,
    status: SpotStatus,
    min_cm: f64,
    max_cm: f64,
}

/// occupancy of the live (freshness-gated) state
async fn occupancy_handler(State(state): State<Arc<RelayState>>) -> Json<OccupancyResponse> {
    let view = state.store.read_current();
    let slots = view
        .distances
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let band = state.bands.band(i);
            SlotStatus {
                slot_id: i + 1,
                distance: *d,
                status: band.classify(*d),
                min_cm: band.min_cm,
                max_cm: band.max_cm,
            }
        })
        .collect();
    Json(OccupancyResponse {
        active: view.active,
        slots,
        summary: OccupancySummary::from_distances(&view.distances, &state.bands),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugResponse {
    report: DeviceReport,
    fresh: bool,
    freshness_threshold_ms: u64,
}

/// raw stored values, including those hidden by staleness
async fn debug_handler(State(state): State<Arc<RelayState>>) -> Json<DebugResponse> {
    Json(DebugResponse {
        report: state.store.snapshot(),
        fresh: state.store.is_fresh(),
        freshness_threshold_ms: u64::try_from(state.store.freshness().as_millis()).unwrap_or(u64::MAX),
    })
}

// ==============================================================================
// history
// ==============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    #[serde(default = "default_hours")]
    hours: u64,
    slot_id: Option<usize>,
}

fn default_hours() -> u64 {
    24
}

async fn history_query_handler(
    State(state): State<Arc<RelayState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryQuery>, ApiError> {
    let log = state.history_log.as_ref().ok_or(ApiError::HistoryUnavailable)?;
    Ok(Json(log.query(params.hours, params.slot_id)))
}

async fn history_record_handler(
    State(state): State<Arc<RelayState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let log = state.history_log.as_ref().ok_or(ApiError::HistoryUnavailable)?;
    let value: serde_json::Value = serde_json::from_slice(&body)?;
    let saved = DeviceUpdate::from_json(&value)
        .distances
        .map_or(0, |distances| log.record(&distances));
    Ok(Json(serde_json::json!({ "success": true, "saved": saved })))
}

// ==============================================================================
// bring-up helpers
// ==============================================================================

async fn esp32_ping_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "ESP32 connection test successful!",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "server": "parking-relay",
        "status": "online",
    }))
}

async fn esp32_echo_handler(body: Bytes) -> Result<Json<serde_json::Value>, ApiError> {
    let received: serde_json::Value = serde_json::from_slice(&body).map_err(ApiError::Echo)?;
    tracing::info!(data = %received, "esp32 test data received");
    Ok(Json(serde_json::json!({
        "message": "Data received successfully!",
        "receivedData": received,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "status": "success",
    })))
}

/// applies only the led fields of the body, distances are ignored
async fn test_leds_handler(
    State(state): State<Arc<RelayState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body)?;
    let update = DeviceUpdate::from_json(&value).actuators_only();
    let view = state.store.apply_update(&update);
    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("LEDs updated: LED1={}, LED2={}", u8::from(view.led(1)), u8::from(view.led(2))),
        "data": view,
    })))
}
