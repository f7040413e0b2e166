use crate::buffer::{BufferStats, EventBuffer};
use crate::shipper::{Shipper, ShipperStats};
use crate::storage::{Checkpoint, CheckpointStore};
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Shared state for the status API
pub struct StatusState {
    pub agent_id: String,
    pub start_time: Instant,
    pub buffer: Arc<EventBuffer>,
    pub shipper: Arc<Shipper>,
    pub checkpoints: Arc<CheckpointStore>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub agent_id: String,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub buffer: BufferStats,
    pub shipper: ShipperStats,
    pub checkpoints: Vec<Checkpoint>,
}

/// GET /health
pub async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /status
pub async fn get_status(State(state): State<Arc<StatusState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        agent_id: state.agent_id.clone(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        buffer: state.buffer.stats(),
        shipper: state.shipper.stats(),
        checkpoints: state.checkpoints.snapshot(),
    })
}
