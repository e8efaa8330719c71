//! Scheduler status handlers

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::models::ApiResponse;
use crate::scheduler::{JobScheduler, MonitoringStats, PerformanceMetrics};

pub async fn get_monitoring_stats(
    State(scheduler): State<Arc<JobScheduler>>,
) -> Json<ApiResponse<MonitoringStats>> {
    Json(ApiResponse::ok(scheduler.monitoring_stats().await))
}

pub async fn get_performance_metrics(
    State(scheduler): State<Arc<JobScheduler>>,
) -> Json<ApiResponse<PerformanceMetrics>> {
    Json(ApiResponse::ok(scheduler.performance_metrics().await))
}
