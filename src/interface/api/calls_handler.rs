//! Modem and call control handlers

use super::dto::{ApiResponse, CallControlResponse, DialRequest};
use super::AppState;
use crate::application::{CallServiceError, CallStatus};
use crate::domain::modem::Modem;
use crate::infrastructure::serial::EngineError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{info, warn};

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

/// HTTP status for a failed call operation
pub fn status_for(error: &CallServiceError) -> StatusCode {
    match error {
        CallServiceError::InvalidIccid(_) => StatusCode::BAD_REQUEST,
        CallServiceError::ModemNotFound(_) => StatusCode::NOT_FOUND,
        CallServiceError::UacNotReady => StatusCode::CONFLICT,
        CallServiceError::SessionInit(_)
        | CallServiceError::NotConnected
        | CallServiceError::AudioInit(_) => StatusCode::PRECONDITION_FAILED,
        CallServiceError::Engine(EngineError::InvalidDialNumber(_)) => StatusCode::BAD_REQUEST,
        CallServiceError::Engine(EngineError::CallInProgress | EngineError::Busy) => {
            StatusCode::CONFLICT
        }
        CallServiceError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T>(result: Result<T, CallServiceError>) -> ApiResult<T> {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// List identified modems
pub async fn list_modems(State(state): State<AppState>) -> ApiResult<Vec<Modem>> {
    let modems = state.calls.modems();
    (StatusCode::OK, Json(ApiResponse::success(modems)))
}

/// Call state and UAC readiness of one modem
pub async fn get_call_state(
    State(state): State<AppState>,
    Path(iccid): Path<String>,
) -> ApiResult<CallStatus> {
    reply(state.calls.call_status(&iccid))
}

/// Dial through the modem; the browser session must already be connected
pub async fn dial(
    State(state): State<AppState>,
    Path(iccid): Path<String>,
    Json(request): Json<DialRequest>,
) -> ApiResult<CallControlResponse> {
    info!("[{}] API: dial request", iccid);
    let result = state.calls.dial(&iccid, &request.number).await;
    if let Err(e) = &result {
        warn!("[{}] Dial rejected: {}", iccid, e);
    }
    reply(result.map(CallControlResponse::ok))
}

pub async fn hangup(
    State(state): State<AppState>,
    Path(iccid): Path<String>,
) -> ApiResult<CallControlResponse> {
    info!("[{}] API: hangup request", iccid);
    reply(state.calls.hangup(&iccid).await.map(CallControlResponse::ok))
}
