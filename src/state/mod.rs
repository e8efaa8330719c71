//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::clock::Clock;
use crate::lead::{ActionGateway, LeadIntake, LeadStore};
use crate::scheduler::JobScheduler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ActionGateway>,
    pub intake: Arc<LeadIntake>,
    pub store: Arc<dyn LeadStore>,
    pub scheduler: Arc<JobScheduler>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        gateway: Arc<ActionGateway>,
        intake: Arc<LeadIntake>,
        store: Arc<dyn LeadStore>,
        scheduler: Arc<JobScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            intake,
            store,
            scheduler,
            clock,
        }
    }
}

impl FromRef<AppState> for Arc<ActionGateway> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.gateway.clone()
    }
}

impl FromRef<AppState> for Arc<JobScheduler> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.scheduler.clone()
    }
}
