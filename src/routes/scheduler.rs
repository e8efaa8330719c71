//! Scheduler status routes

use axum::{routing::get, Router};

use crate::handlers::{get_monitoring_stats, get_performance_metrics};
use crate::state::AppState;

pub fn scheduler_routes() -> Router<AppState> {
    Router::new()
        .route("/api/scheduler/stats", get(get_monitoring_stats))
        .route("/api/scheduler/metrics", get(get_performance_metrics))
}
