//! REST API handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use gpuyield_core::{
    display_devices, Claim, ControllerPhase, ControllerStatus, DeviceId, DeviceSet, GpuYieldError,
};
use gpuyield_scheduler::AllocationController;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// The only command accepted on `POST /gpu`
pub const SET_OCCUPIED: &str = "set_occupied";

/// Application state shared across handlers
pub struct AppState {
    pub controller: Arc<AllocationController>,
}

/// Create the API router
pub fn create_router(controller: Arc<AllocationController>) -> Router {
    let state = Arc::new(AppState { controller });

    Router::new()
        .route("/gpu", get(get_free_gpus).post(set_occupied))
        .route("/status", get(get_status))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Request to mark GPUs as occupied by another actor
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    /// Must be `set_occupied`
    pub command: String,
    /// GPUs the other actor is about to use
    pub gpu_ids: Vec<DeviceId>,
}

impl ClaimRequest {
    /// Validate the request and turn it into a claim
    pub fn into_claim(self) -> Result<Claim, GpuYieldError> {
        if self.command != SET_OCCUPIED {
            return Err(GpuYieldError::Validation(format!(
                "unknown command '{}', expected '{}'",
                self.command, SET_OCCUPIED
            )));
        }
        Ok(self.gpu_ids.into_iter().collect())
    }
}

/// Response to a command
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub status: String,
    pub message: String,
}

impl CommandResponse {
    fn success(message: String) -> Self {
        Self {
            status: "success".to_string(),
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: "error".to_string(),
            message,
        }
    }
}

type CommandResult = Result<Json<CommandResponse>, (StatusCode, Json<CommandResponse>)>;

fn reject(status: StatusCode, err: impl std::fmt::Display) -> (StatusCode, Json<CommandResponse>) {
    (status, Json(CommandResponse::error(err.to_string())))
}

/// Claim GPUs for another actor, preempting the workload if needed
async fn set_occupied(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> CommandResult {
    let Json(req) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected malformed claim");
        reject(StatusCode::BAD_REQUEST, rejection.body_text())
    })?;

    let claim = req.into_claim().map_err(|e| {
        warn!(error = %e, "Rejected invalid claim");
        reject(StatusCode::BAD_REQUEST, e)
    })?;

    info!(gpus = %display_devices(claim.devices()), "Set occupied GPUs");

    match state.controller.claim(claim).await {
        Ok(outcome) => {
            info!(preempted = outcome.preempted(), "Claim handled");
            Ok(Json(CommandResponse::success(outcome.message())))
        }
        Err(e) if e.is_client_error() => Err(reject(StatusCode::BAD_REQUEST, e)),
        Err(e) => Err(reject(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// List GPUs currently believed free, in ascending order
async fn get_free_gpus(State(state): State<Arc<AppState>>) -> Json<DeviceSet> {
    Json(state.controller.free_devices().await)
}

/// Get controller status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<ControllerStatus> {
    Json(state.controller.status().await)
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Read without waiting on an in-flight claim
    pub phase: ControllerPhase,
}

async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        phase: state.controller.phase(),
    })
}
