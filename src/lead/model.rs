//! Lead and participant-set models

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LeadError;

/// Bank user identifier as issued by the external identity service
pub type BankUserId = String;

/// Lead lifecycle status, derived from participant sets and time
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "lead_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    Submitted,
    Open,
    Purchased,
    Expired,
}

impl LeadStatus {
    pub fn derive(participants: &ParticipantSets, exposure_deadline: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if !participants.purchased_by.is_empty() {
            LeadStatus::Purchased
        } else if now > exposure_deadline {
            LeadStatus::Expired
        } else if !participants.opened_by.is_empty() {
            LeadStatus::Open
        } else {
            LeadStatus::Submitted
        }
    }
}

/// One of the three per-lead participant sets
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "participant_relation", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParticipantSet {
    Opened,
    Purchased,
    Ignored,
}

impl fmt::Display for ParticipantSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParticipantSet::Opened => "opened_by",
            ParticipantSet::Purchased => "purchased_by",
            ParticipantSet::Ignored => "ignored_by",
        };
        f.write_str(name)
    }
}

/// A bank user's relationship to a lead
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    None,
    Opened,
    Purchased,
    Ignored,
}

/// Whether an explicit open/purchase may override a prior ignore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IgnoreOverride {
    #[default]
    Reject,
    Allow,
}

impl IgnoreOverride {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reject" => Some(IgnoreOverride::Reject),
            "allow" => Some(IgnoreOverride::Allow),
            _ => None,
        }
    }
}

/// The opened/purchased/ignored sets of a single lead. Add-only.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ParticipantSets {
    pub opened_by: BTreeSet<BankUserId>,
    pub purchased_by: BTreeSet<BankUserId>,
    pub ignored_by: BTreeSet<BankUserId>,
}

impl ParticipantSets {
    pub fn set(&self, set: ParticipantSet) -> &BTreeSet<BankUserId> {
        match set {
            ParticipantSet::Opened => &self.opened_by,
            ParticipantSet::Purchased => &self.purchased_by,
            ParticipantSet::Ignored => &self.ignored_by,
        }
    }

    fn set_mut(&mut self, set: ParticipantSet) -> &mut BTreeSet<BankUserId> {
        match set {
            ParticipantSet::Opened => &mut self.opened_by,
            ParticipantSet::Purchased => &mut self.purchased_by,
            ParticipantSet::Ignored => &mut self.ignored_by,
        }
    }

    /// Classify a user. Purchased wins over Ignored, which wins over Opened.
    pub fn classify(&self, user_id: &str) -> Relation {
        if self.purchased_by.contains(user_id) {
            Relation::Purchased
        } else if self.ignored_by.contains(user_id) {
            Relation::Ignored
        } else if self.opened_by.contains(user_id) {
            Relation::Opened
        } else {
            Relation::None
        }
    }

    pub fn contains_any(&self, user_id: &str) -> bool {
        self.classify(user_id) != Relation::None
    }

    /// Number of distinct users across all three sets
    pub fn union_len(&self) -> usize {
        self.opened_by
            .union(&self.purchased_by)
            .cloned()
            .collect::<BTreeSet<_>>()
            .union(&self.ignored_by)
            .count()
    }

    /// Add a user to one set. Returns whether the set changed.
    ///
    /// Ignoring a purchaser is always a conflict. Opening or purchasing as an
    /// ignored user is a conflict unless `ignore_override` allows it.
    pub fn add(
        &mut self,
        set: ParticipantSet,
        user_id: &str,
        ignore_override: IgnoreOverride,
    ) -> Result<bool, LeadError> {
        if self.set(set).contains(user_id) {
            return Ok(false);
        }

        match set {
            ParticipantSet::Ignored if self.purchased_by.contains(user_id) => {
                return Err(LeadError::ConflictingState(format!(
                    "user {} already purchased and cannot be ignored",
                    user_id
                )));
            }
            ParticipantSet::Opened | ParticipantSet::Purchased
                if ignore_override == IgnoreOverride::Reject
                    && self.ignored_by.contains(user_id) =>
            {
                return Err(LeadError::ConflictingState(format!(
                    "user {} is ignored for this lead",
                    user_id
                )));
            }
            _ => {}
        }

        Ok(self.set_mut(set).insert(user_id.to_string()))
    }

    /// Plain set union with no policy checks, for persisting an approved transition
    pub fn merge(&mut self, set: ParticipantSet, users: &[BankUserId]) -> bool {
        let target = self.set_mut(set);
        let mut changed = false;
        for user_id in users {
            changed |= target.insert(user_id.clone());
        }
        changed
    }
}

/// A financing application exposed to bank users
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Lead {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub exposure_deadline: DateTime<Utc>,
    #[serde(flatten)]
    pub participants: ParticipantSets,
}

impl Lead {
    /// A freshly submitted lead with empty participant sets
    pub fn new(id: Uuid, created_at: DateTime<Utc>, auction_window: Duration) -> Self {
        Self {
            id,
            created_at,
            exposure_deadline: created_at + auction_window,
            participants: ParticipantSets::default(),
        }
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.exposure_deadline
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> LeadStatus {
        LeadStatus::derive(&self.participants, self.exposure_deadline, now)
    }

    /// Users from `population` who hold no relation to this lead
    pub fn unaccounted_users<'a, I>(&self, population: I) -> Vec<BankUserId>
    where
        I: IntoIterator<Item = &'a BankUserId>,
    {
        population
            .into_iter()
            .filter(|user| !self.participants.contains_any(user))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Lead with its derived status, as returned by the API
#[derive(Debug, Serialize)]
pub struct LeadView {
    #[serde(flatten)]
    pub lead: Lead,
    pub status: LeadStatus,
}
