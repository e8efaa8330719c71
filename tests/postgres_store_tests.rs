//! Postgres store tests. Need a migrated database at TEST_DATABASE_URL.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, DurationRound, Utc};
    use sqlx::PgPool;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use leadmarket_server::error::LeadError;
    use leadmarket_server::lead::{
        ActionGateway, ActionKind, LeadIntake, LeadStatus, LeadStore, LifecycleRules, PgLeadStore,
    };
    use leadmarket_server::sweeper::{AutoExpirySweeper, SweeperSettings};

    async fn setup_test_db() -> PgPool {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/leadmarket_test".to_string());

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    fn created_at() -> DateTime<Utc> {
        // Postgres keeps microseconds
        Utc::now()
            .duration_trunc(Duration::microseconds(1))
            .unwrap()
            - Duration::hours(100)
    }

    async fn insert_lead(pool: &PgPool, created_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO leads (id, created_at, exposure_deadline) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(created_at)
            .bind(created_at + Duration::hours(48))
            .execute(pool)
            .await
            .expect("Failed to insert lead");
        id
    }

    async fn insert_bank_user(pool: &PgPool) -> String {
        let id = format!("bank-{}", Uuid::new_v4());
        sqlx::query("INSERT INTO bank_users (id) VALUES ($1)")
            .bind(&id)
            .execute(pool)
            .await
            .expect("Failed to insert bank user");
        id
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_actions_and_sweep_persist() {
        let pool = setup_test_db().await;
        let store = Arc::new(PgLeadStore::new(pool.clone()));
        let created = created_at();
        let lead_id = insert_lead(&pool, created).await;
        let opener = insert_bank_user(&pool).await;
        let silent = insert_bank_user(&pool).await;

        let gateway = ActionGateway::new(store.clone(), LifecycleRules::default());
        let outcome = gateway
            .record_action(lead_id, opener.clone(), ActionKind::Open, created + Duration::hours(1))
            .await
            .unwrap();
        assert!(outcome.changed);

        let sweeper = AutoExpirySweeper::new(store.clone(), store.clone(), SweeperSettings::default());
        let now = created + Duration::hours(49);
        let report = sweeper.sweep(now, &CancellationToken::new()).await.unwrap();
        assert!(report.errors.is_empty());

        let lead = store.fetch_lead(lead_id).await.unwrap().unwrap();
        assert!(lead.participants.opened_by.contains(&opener));
        assert!(lead.participants.ignored_by.contains(&silent));
        assert!(!lead.participants.ignored_by.contains(&opener));

        let cached: (LeadStatus,) = sqlx::query_as("SELECT status FROM leads WHERE id = $1")
            .bind(lead_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(cached.0, LeadStatus::Expired);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_concurrent_purchases_are_all_recorded() {
        let pool = setup_test_db().await;
        let store = Arc::new(PgLeadStore::new(pool.clone()));
        let created = created_at();
        let lead_id = insert_lead(&pool, created).await;
        let gateway = Arc::new(ActionGateway::new(store.clone(), LifecycleRules::default()));
        let at = created + Duration::hours(2);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    gateway
                        .record_action(lead_id, format!("buyer-{}", i), ActionKind::Purchase, at)
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        let lead = store.fetch_lead(lead_id).await.unwrap().unwrap();
        assert_eq!(lead.participants.purchased_by.len(), 8);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_cap_holds_across_connections() {
        let pool = setup_test_db().await;
        let store = Arc::new(PgLeadStore::new(pool.clone()));
        let created = created_at();
        let lead_id = insert_lead(&pool, created).await;
        let rules = LifecycleRules {
            max_purchasers: Some(2),
            ..LifecycleRules::default()
        };
        let gateway = Arc::new(ActionGateway::new(store.clone(), rules));
        let at = created + Duration::hours(2);

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    gateway
                        .record_action(lead_id, format!("buyer-{}", i), ActionKind::Purchase, at)
                        .await
                })
            })
            .collect();
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 2);
        let lead = store.fetch_lead(lead_id).await.unwrap().unwrap();
        assert_eq!(lead.participants.purchased_by.len(), 2);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_intake_and_paged_sweep() {
        let pool = setup_test_db().await;
        let store = Arc::new(PgLeadStore::new(pool.clone()));
        let intake = LeadIntake::new(store.clone(), Duration::hours(24));
        let created = created_at();
        let user = insert_bank_user(&pool).await;

        let mut lead_ids = Vec::new();
        for offset in 0..3 {
            let lead = intake
                .submit(Uuid::new_v4(), created + Duration::seconds(offset))
                .await
                .unwrap();
            assert_eq!(lead.exposure_deadline, lead.created_at + Duration::hours(24));
            lead_ids.push(lead.id);
        }
        let duplicate = intake.submit(lead_ids[0], created).await.unwrap_err();
        assert!(matches!(duplicate, LeadError::ConflictingState(_)));

        let sweeper = AutoExpirySweeper::new(
            store.clone(),
            store.clone(),
            SweeperSettings {
                batch_size: 1,
                ..SweeperSettings::default()
            },
        );
        let report = sweeper
            .sweep(created + Duration::hours(25), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.errors.is_empty());

        for id in lead_ids {
            let lead = store.fetch_lead(id).await.unwrap().unwrap();
            assert!(lead.participants.ignored_by.contains(&user));
        }
    }
}
