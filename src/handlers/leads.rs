//! Lead API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::lead::{ActionOutcome, LeadView};
use crate::models::{ApiResponse, RecordActionRequest, SubmitLeadRequest};
use crate::state::AppState;

/// Register a submitted lead; its deadline comes from the configured window
pub async fn submit_lead(
    State(app_state): State<AppState>,
    Json(request): Json<SubmitLeadRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<LeadView>>)> {
    let now = app_state.clock.now();
    let lead = app_state
        .intake
        .submit(request.id.unwrap_or_else(Uuid::new_v4), now)
        .await?;

    let status = lead.status_at(now);
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(LeadView { lead, status }))))
}

/// Record an open/purchase/ignore action by a bank user
pub async fn record_action(
    State(app_state): State<AppState>,
    Path(lead_id): Path<Uuid>,
    Json(request): Json<RecordActionRequest>,
) -> ApiResult<Json<ApiResponse<ActionOutcome>>> {
    request.validate()?;

    let now = app_state.clock.now();
    let outcome = app_state
        .gateway
        .record_action(lead_id, request.user_id, request.action, now)
        .await?;

    Ok(Json(ApiResponse::ok(outcome)))
}

/// Get a lead with its current status
pub async fn get_lead(
    State(app_state): State<AppState>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<LeadView>>> {
    let lead = app_state
        .store
        .fetch_lead(lead_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Lead {}", lead_id)))?;

    let status = lead.status_at(app_state.clock.now());
    Ok(Json(ApiResponse::ok(LeadView { lead, status })))
}
