//! PostgreSQL lead store
//!
//! Participant sets live in `lead_participants`, one row per
//! (lead, user, relation) with a uniqueness constraint, so appends are
//! `INSERT ... ON CONFLICT DO NOTHING` and never replace a whole set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::model::{BankUserId, Lead, ParticipantSet, ParticipantSets};
use super::store::{BankDirectory, CandidateCursor, Commit, LeadStore, Mutation};
use crate::error::LeadError;

#[derive(Debug, sqlx::FromRow)]
struct LeadRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    exposure_deadline: DateTime<Utc>,
}

impl LeadRow {
    fn into_lead(self, participants: ParticipantSets) -> Lead {
        Lead {
            id: self.id,
            created_at: self.created_at,
            exposure_deadline: self.exposure_deadline,
            participants,
        }
    }
}

/// Lead store backed by PostgreSQL
#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_participants(
        conn: &mut PgConnection,
        lead_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ParticipantSets>, LeadError> {
        let rows = sqlx::query_as::<_, (Uuid, String, ParticipantSet)>(
            r#"
            SELECT lead_id, user_id, relation
            FROM lead_participants
            WHERE lead_id = ANY($1)
            "#,
        )
        .bind(lead_ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut sets: HashMap<Uuid, ParticipantSets> = HashMap::new();
        for (lead_id, user_id, relation) in rows {
            sets.entry(lead_id)
                .or_default()
                .merge(relation, std::slice::from_ref(&user_id));
        }
        Ok(sets)
    }

    /// Set-union append for one participant set. Returns whether any row was new.
    async fn add_to_set(
        conn: &mut PgConnection,
        lead_id: Uuid,
        set: ParticipantSet,
        user_ids: &[BankUserId],
        now: DateTime<Utc>,
    ) -> Result<bool, LeadError> {
        if user_ids.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO lead_participants (lead_id, user_id, relation, recorded_at)
            SELECT $1, u, $3, $4 FROM UNNEST($2::text[]) AS u
            ON CONFLICT (lead_id, user_id, relation) DO NOTHING
            "#,
        )
        .bind(lead_id)
        .bind(user_ids)
        .bind(set)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl LeadStore for PgLeadStore {
    fn fetch_lead(&self, lead_id: Uuid) -> BoxFuture<'_, Result<Option<Lead>, LeadError>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;

            let row = sqlx::query_as::<_, LeadRow>(
                "SELECT id, created_at, exposure_deadline FROM leads WHERE id = $1",
            )
            .bind(lead_id)
            .fetch_optional(&mut *conn)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            let mut sets = Self::load_participants(&mut conn, &[lead_id]).await?;
            Ok(Some(row.into_lead(sets.remove(&lead_id).unwrap_or_default())))
        })
    }

    fn create_lead(&self, lead: Lead) -> BoxFuture<'_, Result<(), LeadError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO leads (id, created_at, exposure_deadline, status, updated_at)
                VALUES ($1, $2, $3, $4, $2)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(lead.id)
            .bind(lead.created_at)
            .bind(lead.exposure_deadline)
            .bind(lead.status_at(lead.created_at))
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(LeadError::ConflictingState(format!(
                    "lead {} already exists",
                    lead.id
                )));
            }
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
            let mut conn = self.pool.acquire().await?;

            let rows = sqlx::query_as::<_, LeadRow>(
                r#"
                SELECT l.id, l.created_at, l.exposure_deadline
                FROM leads l
                WHERE l.exposure_deadline < $1
                  AND ($2::timestamptz IS NULL OR (l.exposure_deadline, l.id) > ($2, $3))
                  AND EXISTS (
                      SELECT 1 FROM bank_users b
                      WHERE b.active
                        AND NOT EXISTS (
                            SELECT 1 FROM lead_participants p
                            WHERE p.lead_id = l.id AND p.user_id = b.id
                        )
                  )
                ORDER BY l.exposure_deadline, l.id
                LIMIT $4
                "#,
            )
            .bind(now)
            .bind(after.map(|c| c.exposure_deadline))
            .bind(after.map(|c| c.id))
            .bind(limit as i64)
            .fetch_all(&mut *conn)
            .await?;

            let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
            let mut sets = Self::load_participants(&mut conn, &ids).await?;

            Ok(rows
                .into_iter()
                .map(|row| {
                    let participants = sets.remove(&row.id).unwrap_or_default();
                    row.into_lead(participants)
                })
                .collect())
        })
    }

    fn apply_atomically<'a>(
        &'a self,
        lead_id: Uuid,
        now: DateTime<Utc>,
        mutation: Mutation<'a>,
    ) -> BoxFuture<'a, Result<Commit, LeadError>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            // Row lock serializes every writer of this lead until commit
            let row = sqlx::query_as::<_, LeadRow>(
                "SELECT id, created_at, exposure_deadline FROM leads WHERE id = $1 FOR UPDATE",
            )
            .bind(lead_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LeadError::NotFound(lead_id))?;

            let mut sets = Self::load_participants(&mut tx, &[lead_id]).await?;
            let lead = row.into_lead(sets.remove(&lead_id).unwrap_or_default());

            let transition = mutation(&lead)?;

            let mut changed = false;
            for (set, users) in &transition.additions {
                changed |= Self::add_to_set(&mut tx, lead_id, *set, users, now).await?;
            }

            sqlx::query(
                r#"
                UPDATE leads
                SET status = $1, updated_at = $2
                WHERE id = $3 AND status IS DISTINCT FROM $1
                "#,
            )
            .bind(transition.status(now))
            .bind(now)
            .bind(lead_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(Commit {
                changed,
                lead: transition.lead,
                effects: transition.effects,
            })
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), LeadError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
    }
}

impl BankDirectory for PgLeadStore {
    fn active_bank_users(&self) -> BoxFuture<'_, Result<Vec<BankUserId>, LeadError>> {
        Box::pin(async move {
            let users = sqlx::query_as::<_, (String,)>(
                "SELECT id FROM bank_users WHERE active ORDER BY id",
            )
            .fetch_all(&self.pool)
            .await?;

            Ok(users.into_iter().map(|(id,)| id).collect())
        })
    }
}
