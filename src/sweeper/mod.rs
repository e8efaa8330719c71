//! Auto-expiry sweeper
//!
//! Finds leads whose exposure window has passed and auto-ignores every known
//! bank user who never acted on them. Each lead is committed in one atomic
//! batch; a failure on one lead is reported and the sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use rand::Rng;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::LeadError;
use crate::lead::{
    lifecycle, BankDirectory, BankUserId, CandidateCursor, Commit, Lead, LeadEvent, LeadStore,
    LifecycleRules, ParticipantSet, SideEffect,
};
use crate::scheduler::{Job, JobContext};

/// Tuning for one sweeper instance
#[derive(Debug, Clone)]
pub struct SweeperSettings {
    /// Candidate leads fetched per page
    pub batch_size: usize,
    /// Storage retries per lead after the first attempt
    pub max_retries: u32,
    pub retry_base: Duration,
    pub rules: LifecycleRules,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_retries: 3,
            retry_base: Duration::from_millis(200),
            rules: LifecycleRules::default(),
        }
    }
}

/// A lead the sweep could not commit
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub lead_id: Uuid,
    pub error: String,
    pub attempts: u32,
}

/// Summary of one sweep
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Candidate pages fetched
    pub pages: usize,
    pub leads_scanned: usize,
    pub leads_updated: usize,
    pub users_ignored: usize,
    pub errors: Vec<SweepFailure>,
    /// Stopped early at a cancellation checkpoint
    pub cancelled: bool,
}

pub struct AutoExpirySweeper {
    store: Arc<dyn LeadStore>,
    directory: Arc<dyn BankDirectory>,
    settings: SweeperSettings,
}

impl AutoExpirySweeper {
    pub fn new(
        store: Arc<dyn LeadStore>,
        directory: Arc<dyn BankDirectory>,
        settings: SweeperSettings,
    ) -> Self {
        Self {
            store,
            directory,
            settings,
        }
    }

    /// Run one sweep at `now`, paging through every expired candidate.
    /// Fails only if a candidate scan itself fails.
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, LeadError> {
        let population = self.directory.active_bank_users().await?;
        let mut report = SweepReport::default();
        let mut cursor = None;

        'pages: loop {
            if cancel.is_cancelled() {
                tracing::info!("Sweep cancelled between pages");
                report.cancelled = true;
                break;
            }

            let page = self
                .store
                .query_expired_candidates(now, cursor, self.settings.batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            // Keyset paging: leads that failed on this page are not revisited
            cursor = Some(CandidateCursor::of(last));
            let full_page = page.len() >= self.settings.batch_size;
            report.pages += 1;

            for lead in page {
                if cancel.is_cancelled() {
                    tracing::info!(
                        remaining_from = %lead.id,
                        "Sweep cancelled, leaving remaining leads for the next run"
                    );
                    report.cancelled = true;
                    break 'pages;
                }

                report.leads_scanned += 1;
                self.expire_lead(&lead, &population, now, cancel, &mut report)
                    .await;
            }

            if !full_page {
                break;
            }
        }

        Ok(report)
    }

    async fn expire_lead(
        &self,
        lead: &Lead,
        population: &[BankUserId],
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut SweepReport,
    ) {
        let eligible = lead.unaccounted_users(population);
        if eligible.is_empty() {
            return;
        }

        match self.commit_with_retry(lead, eligible, now, cancel).await {
            Ok(commit) => {
                let ignored = ignored_count(&commit.effects);
                if commit.changed {
                    report.leads_updated += 1;
                    report.users_ignored += ignored;
                    tracing::debug!(lead_id = %lead.id, ignored, "Auto-ignored bank users");
                }
            }
            Err((error, attempts)) => {
                tracing::error!(
                    lead_id = %lead.id,
                    attempts,
                    error = %error,
                    "Failed to commit expiry for lead"
                );
                report.errors.push(SweepFailure {
                    lead_id: lead.id,
                    error: error.to_string(),
                    attempts,
                });
            }
        }
    }

    async fn commit_with_retry(
        &self,
        lead: &Lead,
        eligible: Vec<BankUserId>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Commit, (LeadError, u32)> {
        let rules = self.settings.rules;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let event = LeadEvent::SweepExpire(eligible.clone());
            let result = self
                .store
                .apply_atomically(
                    lead.id,
                    now,
                    Box::new(move |fresh: &Lead| lifecycle::apply(fresh, &event, now, &rules)),
                )
                .await;

            match result {
                Ok(commit) => return Ok(commit),
                Err(err) if err.is_retryable() && attempts <= self.settings.max_retries => {
                    let delay = self.backoff(attempts);
                    tracing::warn!(
                        lead_id = %lead.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying expiry commit"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err((err, attempts)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err((err, attempts)),
            }
        }
    }

    /// Exponential backoff with up to 50% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.settings.retry_base.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(16));
        let jitter = if base > 1 {
            rand::thread_rng().gen_range(0..base / 2 + 1)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}

fn ignored_count(effects: &[SideEffect]) -> usize {
    effects
        .iter()
        .map(|effect| match effect {
            SideEffect::ParticipantsAdded {
                set: ParticipantSet::Ignored,
                users,
            } => users.len(),
            _ => 0,
        })
        .sum()
}

/// Scheduler job wrapping the sweeper
pub struct SweepJob {
    sweeper: Arc<AutoExpirySweeper>,
    store: Arc<dyn LeadStore>,
    clock: Arc<dyn Clock>,
    last_report: RwLock<Option<SweepReport>>,
}

impl SweepJob {
    pub fn new(
        sweeper: Arc<AutoExpirySweeper>,
        store: Arc<dyn LeadStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sweeper,
            store,
            clock,
            last_report: RwLock::new(None),
        }
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        self.last_report.read().await.clone()
    }
}

impl Job for SweepJob {
    fn run(&self, ctx: JobContext) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let now = self.clock.now();
            let report = self.sweeper.sweep(now, &ctx.cancel).await?;

            if report.errors.is_empty() {
                tracing::info!(
                    leads_scanned = report.leads_scanned,
                    leads_updated = report.leads_updated,
                    users_ignored = report.users_ignored,
                    cancelled = report.cancelled,
                    "Expiry sweep completed"
                );
            } else {
                tracing::warn!(
                    leads_scanned = report.leads_scanned,
                    leads_updated = report.leads_updated,
                    users_ignored = report.users_ignored,
                    failed_leads = report.errors.len(),
                    "Expiry sweep completed with failures"
                );
            }

            *self.last_report.write().await = Some(report);
            Ok(())
        })
    }

    fn preflight(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.store.ping().await?;
            Ok(())
        })
    }
}
