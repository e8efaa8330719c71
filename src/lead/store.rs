//! Lead store adapter
//!
//! The store owns no policy. `apply_atomically` locks one lead, hands the
//! fresh record to a mutation (normally a call into the lifecycle state
//! machine) and appends whatever the mutation approved as a set union.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::lifecycle::{SideEffect, Transition};
use super::model::{BankUserId, Lead, LeadStatus};
use crate::error::LeadError;

/// Transition computed against the locked, freshly read lead
pub type Mutation<'a> = Box<dyn FnOnce(&Lead) -> Result<Transition, LeadError> + Send + 'a>;

/// Keyset position in the expired-candidate ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CandidateCursor {
    pub exposure_deadline: DateTime<Utc>,
    pub id: Uuid,
}

impl CandidateCursor {
    pub fn of(lead: &Lead) -> Self {
        Self {
            exposure_deadline: lead.exposure_deadline,
            id: lead.id,
        }
    }
}

/// Outcome of one atomic commit
#[derive(Debug, Clone)]
pub struct Commit {
    /// Whether any participant set actually grew
    pub changed: bool,
    pub lead: Lead,
    pub effects: Vec<SideEffect>,
}

/// Persistence for leads and their participant sets
pub trait LeadStore: Send + Sync {
    fn fetch_lead(&self, lead_id: Uuid) -> BoxFuture<'_, Result<Option<Lead>, LeadError>>;

    /// Persist a newly submitted lead. An existing id is a conflict.
    fn create_lead(&self, lead: Lead) -> BoxFuture<'_, Result<(), LeadError>>;

    /// One page of leads past their deadline with at least one active bank
    /// user unaccounted for, ordered by `(exposure_deadline, id)` and
    /// starting strictly after `after`
    fn query_expired_candidates(
        &self,
        now: DateTime<Utc>,
        after: Option<CandidateCursor>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Lead>, LeadError>>;

    /// Atomic per-lead read, transition and set-union append
    fn apply_atomically<'a>(
        &'a self,
        lead_id: Uuid,
        now: DateTime<Utc>,
        mutation: Mutation<'a>,
    ) -> BoxFuture<'a, Result<Commit, LeadError>>;

    fn ping(&self) -> BoxFuture<'_, Result<(), LeadError>>;
}

/// The known bank-user population
pub trait BankDirectory: Send + Sync {
    fn active_bank_users(&self) -> BoxFuture<'_, Result<Vec<BankUserId>, LeadError>>;
}

#[derive(Debug, Clone)]
struct StoredLead {
    lead: Lead,
    status: LeadStatus,
}

/// In-process store. One lock guards every lead, which trivially gives
/// per-lead atomicity.
#[derive(Default)]
pub struct MemoryLeadStore {
    leads: RwLock<HashMap<Uuid, StoredLead>>,
    bank_users: RwLock<Vec<BankUserId>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bank_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<BankUserId>,
    {
        Self {
            leads: RwLock::new(HashMap::new()),
            bank_users: RwLock::new(users.into_iter().map(Into::into).collect()),
        }
    }

    /// Record a submitted lead. Submission itself happens upstream.
    pub async fn insert_lead(&self, lead: Lead) {
        let status = lead.status_at(lead.created_at);
        self.leads
            .write()
            .await
            .insert(lead.id, StoredLead { lead, status });
    }

    pub async fn set_bank_users(&self, users: Vec<BankUserId>) {
        *self.bank_users.write().await = users;
    }

    /// Status as last persisted by a commit
    pub async fn cached_status(&self, lead_id: Uuid) -> Option<LeadStatus> {
        self.leads.read().await.get(&lead_id).map(|s| s.status)
    }
}

impl LeadStore for MemoryLeadStore {
    fn fetch_lead(&self, lead_id: Uuid) -> BoxFuture<'_, Result<Option<Lead>, LeadError>> {
        Box::pin(async move {
            Ok(self
                .leads
                .read()
                .await
                .get(&lead_id)
                .map(|s| s.lead.clone()))
        })
    }

    fn create_lead(&self, lead: Lead) -> BoxFuture<'_, Result<(), LeadError>> {
        Box::pin(async move {
            let mut leads = self.leads.write().await;
            if leads.contains_key(&lead.id) {
                return Err(LeadError::ConflictingState(format!(
                    "lead {} already exists",
                    lead.id
                )));
            }
            let status = lead.status_at(lead.created_at);
            leads.insert(lead.id, StoredLead { lead, status });
            Ok(())
        })
    }

    fn query_expired_candidates(
        &self,
        now: DateTime<Utc>,
        after: Option<CandidateCursor>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Lead>, LeadError>> {
        Box::pin(async move {
            let population = self.bank_users.read().await.clone();
            let leads = self.leads.read().await;

            let mut candidates: Vec<Lead> = leads
                .values()
                .map(|s| &s.lead)
                .filter(|lead| lead.exposure_deadline < now)
                .filter(|lead| after.map_or(true, |cursor| CandidateCursor::of(lead) > cursor))
                .filter(|lead| !lead.unaccounted_users(&population).is_empty())
                .cloned()
                .collect();
            candidates.sort_by_key(CandidateCursor::of);
            candidates.truncate(limit);

            Ok(candidates)
        })
    }

    fn apply_atomically<'a>(
        &'a self,
        lead_id: Uuid,
        now: DateTime<Utc>,
        mutation: Mutation<'a>,
    ) -> BoxFuture<'a, Result<Commit, LeadError>> {
        Box::pin(async move {
            let mut leads = self.leads.write().await;
            let stored = leads
                .get_mut(&lead_id)
                .ok_or(LeadError::NotFound(lead_id))?;

            let transition = mutation(&stored.lead)?;

            let mut changed = false;
            for (set, users) in &transition.additions {
                changed |= stored.lead.participants.merge(*set, users);
            }
            stored.status = stored.lead.status_at(now);

            Ok(Commit {
                changed,
                lead: stored.lead.clone(),
                effects: transition.effects,
            })
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), LeadError>> {
        Box::pin(async { Ok(()) })
    }
}

impl BankDirectory for MemoryLeadStore {
    fn active_bank_users(&self) -> BoxFuture<'_, Result<Vec<BankUserId>, LeadError>> {
        Box::pin(async move { Ok(self.bank_users.read().await.clone()) })
    }
}
