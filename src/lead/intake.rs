//! Lead intake
//!
//! Registers submitted leads with the engine. The exposure deadline is
//! always `created_at + auction_window` from configuration.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::model::Lead;
use super::store::LeadStore;
use crate::error::LeadError;

pub struct LeadIntake {
    store: Arc<dyn LeadStore>,
    auction_window: Duration,
}

impl LeadIntake {
    pub fn new(store: Arc<dyn LeadStore>, auction_window: Duration) -> Self {
        Self {
            store,
            auction_window,
        }
    }

    pub fn auction_window(&self) -> Duration {
        self.auction_window
    }

    /// Submit a lead created at `created_at`
    pub async fn submit(&self, lead_id: Uuid, created_at: DateTime<Utc>) -> Result<Lead, LeadError> {
        let lead = Lead::new(lead_id, created_at, self.auction_window);
        self.store.create_lead(lead.clone()).await?;

        tracing::info!(
            lead_id = %lead.id,
            exposure_deadline = %lead.exposure_deadline,
            "Lead submitted"
        );
        Ok(lead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::MemoryLeadStore;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_deadline_follows_configured_window() {
        let store = Arc::new(MemoryLeadStore::new());
        let intake = LeadIntake::new(store.clone(), Duration::hours(24));

        let lead = intake.submit(Uuid::new_v4(), t0()).await.unwrap();

        assert_eq!(lead.exposure_deadline, t0() + Duration::hours(24));
        let stored = store.fetch_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored, lead);
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_conflict() {
        let intake = LeadIntake::new(Arc::new(MemoryLeadStore::new()), Duration::hours(48));
        let id = Uuid::new_v4();

        intake.submit(id, t0()).await.unwrap();
        let err = intake.submit(id, t0() + Duration::hours(1)).await.unwrap_err();

        assert!(matches!(err, LeadError::ConflictingState(_)));
    }
}
