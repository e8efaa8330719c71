//! Lead route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{get_lead, record_action, submit_lead};
use crate::state::AppState;

pub fn lead_routes() -> Router<AppState> {
    Router::new()
        .route("/api/leads", post(submit_lead))
        .route("/api/leads/:id", get(get_lead))
        .route("/api/leads/:id/actions", post(record_action))
}
