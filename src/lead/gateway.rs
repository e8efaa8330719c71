//! Action gateway for bank-user actions

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lifecycle::{self, LeadEvent, LifecycleRules, SideEffect};
use super::model::{BankUserId, Lead, LeadStatus};
use super::store::LeadStore;
use crate::error::LeadError;

/// Action a bank user can take on a lead
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Open,
    Purchase,
    Ignore,
}

impl ActionKind {
    fn into_event(self, user_id: BankUserId) -> LeadEvent {
        match self {
            ActionKind::Open => LeadEvent::UserOpened(user_id),
            ActionKind::Purchase => LeadEvent::UserPurchased(user_id),
            ActionKind::Ignore => LeadEvent::UserIgnored(user_id),
        }
    }
}

/// Result of a recorded action
#[derive(Debug, Serialize, Clone)]
pub struct ActionOutcome {
    pub lead_id: Uuid,
    pub changed: bool,
    pub status: LeadStatus,
    pub effects: Vec<SideEffect>,
}

/// Applies bank-user actions through the lifecycle state machine
pub struct ActionGateway {
    store: Arc<dyn LeadStore>,
    rules: LifecycleRules,
}

impl ActionGateway {
    pub fn new(store: Arc<dyn LeadStore>, rules: LifecycleRules) -> Self {
        Self { store, rules }
    }

    pub async fn record_action(
        &self,
        lead_id: Uuid,
        user_id: BankUserId,
        action: ActionKind,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, LeadError> {
        let event = action.into_event(user_id.clone());
        let rules = self.rules;

        let result = self
            .store
            .apply_atomically(
                lead_id,
                now,
                Box::new(move |lead: &Lead| lifecycle::apply(lead, &event, now, &rules)),
            )
            .await;

        let commit = match result {
            Ok(commit) => commit,
            Err(err @ LeadError::StaleEvent { .. }) => {
                tracing::warn!(
                    lead_id = %lead_id,
                    user_id = %user_id,
                    action = ?action,
                    "Dropping action timestamped before lead creation"
                );
                return Err(err);
            }
            Err(err) => {
                tracing::debug!(
                    lead_id = %lead_id,
                    user_id = %user_id,
                    action = ?action,
                    error = %err,
                    "Action rejected"
                );
                return Err(err);
            }
        };

        if commit.changed {
            tracing::info!(
                lead_id = %lead_id,
                user_id = %user_id,
                action = ?action,
                effects = ?commit.effects,
                "Lead action recorded"
            );
        }

        Ok(ActionOutcome {
            lead_id,
            changed: commit.changed,
            status: commit.lead.status_at(now),
            effects: commit.effects,
        })
    }
}
