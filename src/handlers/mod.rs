//! API handlers

mod leads;
mod scheduler;

use axum::{extract::State, http::StatusCode, Json};

use crate::models::HealthResponse;
use crate::state::AppState;

pub use leads::{get_lead, record_action, submit_lead};
pub use scheduler::{get_monitoring_stats, get_performance_metrics};

pub async fn root() -> &'static str {
    "Lead Marketplace API Server"
}

/// Health check endpoint
pub async fn health_check(State(app_state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_status = match app_state.store.ping().await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };
    let scheduler_running = app_state.scheduler.is_running();

    let healthy = store_status == "connected" && scheduler_running;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            store: store_status,
            scheduler_running,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
