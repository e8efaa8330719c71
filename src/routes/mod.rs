//! Route definitions for the lead marketplace API

mod leads;
mod scheduler;

use axum::{routing::get, Router};

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

pub use leads::lead_routes;
pub use scheduler::scheduler_routes;

/// Full application router with middleware applied
pub fn app_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .merge(lead_routes())
        .merge(scheduler_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::request_tracing))
}
