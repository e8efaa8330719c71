//! Expiry sweep driven by the job scheduler under paused tokio time

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::BoxFuture;
use uuid::Uuid;

use leadmarket_server::clock::{Clock, ManualClock};
use leadmarket_server::error::LeadError;
use leadmarket_server::lead::{CandidateCursor, Commit, Lead, LeadStore, MemoryLeadStore, Mutation};
use leadmarket_server::scheduler::{JobScheduler, SchedulerError, SchedulerSettings, StartStatus};
use leadmarket_server::sweeper::{AutoExpirySweeper, SweepJob, SweeperSettings};

const JOB: &str = "lead-expiry-sweep";

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

struct Harness {
    store: Arc<MemoryLeadStore>,
    clock: Arc<ManualClock>,
    job: Arc<SweepJob>,
    scheduler: JobScheduler,
}

fn harness(store: Arc<dyn LeadStore>, memory: Arc<MemoryLeadStore>) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let sweeper = Arc::new(AutoExpirySweeper::new(
        store.clone(),
        memory.clone(),
        SweeperSettings::default(),
    ));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let job = Arc::new(SweepJob::new(sweeper, store, dyn_clock));

    let mut scheduler = JobScheduler::new(SchedulerSettings {
        graceful_stop_timeout: StdDuration::from_secs(5),
        metrics_window: 10,
    });
    scheduler.register(JOB, StdDuration::from_secs(3600), job.clone());

    Harness {
        store: memory,
        clock,
        job,
        scheduler,
    }
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_sweep_expires_leads_once_past_deadline() {
    let memory = Arc::new(MemoryLeadStore::with_bank_users(["A", "B"]));
    let lead_id = Uuid::new_v4();
    memory
        .insert_lead(Lead::new(lead_id, t0(), Duration::hours(48)))
        .await;
    let h = harness(memory.clone(), memory);

    assert_eq!(h.scheduler.start().await.unwrap(), StartStatus::Started);

    // first tick fires immediately, inside the window
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    let first = h.job.last_report().await.unwrap();
    assert_eq!(first.leads_scanned, 0);

    h.clock.advance(Duration::hours(49));
    tokio::time::sleep(StdDuration::from_secs(3600)).await;

    let report = h.job.last_report().await.unwrap();
    assert_eq!(report.leads_updated, 1);
    assert_eq!(report.users_ignored, 2);

    let lead = h.store.fetch_lead(lead_id).await.unwrap().unwrap();
    assert_eq!(lead.participants.ignored_by.len(), 2);

    let stats = h.scheduler.monitoring_stats().await;
    let job = stats.job(JOB).unwrap();
    assert_eq!(job.total_runs, 2);
    assert_eq!(job.successful_runs, 2);
    assert_eq!(job.failed_runs, 0);

    let metrics = h.scheduler.performance_metrics().await;
    assert_eq!(metrics.job(JOB).unwrap().samples, 2);

    let stop = h.scheduler.stop().await;
    assert!(stop.was_running);
    assert!(!stop.timed_out);
    assert!(!h.scheduler.is_running());
}

/// Store whose backing database is unreachable
struct DownStore;

impl LeadStore for DownStore {
    fn fetch_lead(&self, _lead_id: Uuid) -> BoxFuture<'_, Result<Option<Lead>, LeadError>> {
        Box::pin(async { Err(LeadError::Storage("connection refused".to_string())) })
    }

    fn create_lead(&self, _lead: Lead) -> BoxFuture<'_, Result<(), LeadError>> {
        Box::pin(async { Err(LeadError::Storage("connection refused".to_string())) })
    }

    fn query_expired_candidates(
        &self,
        _now: DateTime<Utc>,
        _after: Option<CandidateCursor>,
        _limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Lead>, LeadError>> {
        Box::pin(async { Err(LeadError::Storage("connection refused".to_string())) })
    }

    fn apply_atomically<'a>(
        &'a self,
        _lead_id: Uuid,
        _now: DateTime<Utc>,
        _mutation: Mutation<'a>,
    ) -> BoxFuture<'a, Result<Commit, LeadError>> {
        Box::pin(async { Err(LeadError::Storage("connection refused".to_string())) })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), LeadError>> {
        Box::pin(async { Err(LeadError::Storage("connection refused".to_string())) })
    }
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_store_blocks_start() {
    let memory = Arc::new(MemoryLeadStore::new());
    let h = harness(Arc::new(DownStore), memory);

    let err = h.scheduler.start().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Preflight { .. }));
    assert!(!h.scheduler.is_running());
}
