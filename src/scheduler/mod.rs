//! Background job scheduler
//!
//! Each registered job gets its own timer task. A tick that finds the
//! previous run of the same job still in flight is skipped and counted,
//! so a job never races with itself. Runs are spawned onto a task tracker
//! owned by the scheduler, which lets `stop()` wait for them.

mod stats;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use stats::{
    JobMonitoringStats, JobPerformance, MonitoringStats, PerformanceMetrics,
};
use stats::JobRecord;

/// Handed to every run
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Cancelled when the scheduler stops; check it at safe points
    pub cancel: CancellationToken,
}

/// A periodic unit of work
pub trait Job: Send + Sync {
    fn run(&self, ctx: JobContext) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Checked once by `start()`; a failure aborts startup
    fn preflight(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Preflight failed for job '{job}': {reason}")]
    Preflight { job: String, reason: String },
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    pub was_running: bool,
    /// In-flight runs outlived the grace period
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub graceful_stop_timeout: Duration,
    pub metrics_window: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            graceful_stop_timeout: Duration::from_secs(30),
            metrics_window: 100,
        }
    }
}

struct RegisteredJob {
    name: String,
    interval: Duration,
    job: Arc<dyn Job>,
    in_flight: AtomicBool,
    record: Mutex<JobRecord>,
}

impl RegisteredJob {
    async fn execute(self: Arc<Self>, ctx: JobContext) {
        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.job.run(ctx)).catch_unwind().await;
        let elapsed = start.elapsed();

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                tracing::error!(job = %self.name, error = %err, "Job run failed");
                Some(format!("{:#}", err))
            }
            Err(_) => {
                tracing::error!(job = %self.name, "Job run panicked");
                Some("job panicked".to_string())
            }
        };

        self.record
            .lock()
            .await
            .record_run(started_at, elapsed, error);
        self.in_flight.store(false, Ordering::Release);
    }

    async fn timer_loop(self: Arc<Self>, cancel: CancellationToken, runs: TaskTracker) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                tracing::debug!(job = %self.name, "Previous run still in flight, skipping tick");
                self.record.lock().await.skipped_overlaps += 1;
                continue;
            }

            let ctx = JobContext {
                cancel: cancel.child_token(),
            };
            runs.spawn(self.clone().execute(ctx));
        }

        tracing::debug!(job = %self.name, "Timer stopped");
    }

    async fn monitoring(&self) -> JobMonitoringStats {
        let record = self.record.lock().await;
        JobMonitoringStats {
            name: self.name.clone(),
            interval_secs: self.interval.as_secs(),
            total_runs: record.total_runs,
            successful_runs: record.successful_runs,
            failed_runs: record.failed_runs,
            skipped_overlaps: record.skipped_overlaps,
            in_flight: self.in_flight.load(Ordering::Acquire),
            last_run_at: record.last_run_at,
            last_run_duration_ms: record.last_run_duration.map(|d| d.as_millis() as u64),
            last_error: record.last_error.clone(),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    timers: TaskTracker,
    runs: TaskTracker,
    started_at: DateTime<Utc>,
}

/// Owns the periodic jobs of the process
pub struct JobScheduler {
    jobs: Vec<Arc<RegisteredJob>>,
    settings: SchedulerSettings,
    /// Serializes start and stop
    transition: Mutex<()>,
    /// Only held briefly, so stats stay readable while a stop drains
    state: Mutex<Option<Running>>,
    running: AtomicBool,
}

impl JobScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            jobs: Vec::new(),
            settings,
            transition: Mutex::new(()),
            state: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Add a job. Jobs are fixed once the scheduler is shared.
    pub fn register(&mut self, name: impl Into<String>, interval: Duration, job: Arc<dyn Job>) {
        let name = name.into();
        tracing::info!(job = %name, interval_secs = interval.as_secs(), "Registered job");
        self.jobs.push(Arc::new(RegisteredJob {
            name,
            interval,
            job,
            in_flight: AtomicBool::new(false),
            record: Mutex::new(JobRecord::new(self.settings.metrics_window)),
        }));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start every job timer. Idempotent while running.
    pub async fn start(&self) -> Result<StartStatus, SchedulerError> {
        let _transition = self.transition.lock().await;
        if self.state.lock().await.is_some() {
            tracing::debug!("Scheduler already running");
            return Ok(StartStatus::AlreadyRunning);
        }

        for job in &self.jobs {
            job.job
                .preflight()
                .await
                .map_err(|e| SchedulerError::Preflight {
                    job: job.name.clone(),
                    reason: format!("{:#}", e),
                })?;
        }

        let cancel = CancellationToken::new();
        let timers = TaskTracker::new();
        let runs = TaskTracker::new();

        for job in &self.jobs {
            timers.spawn(job.clone().timer_loop(cancel.clone(), runs.clone()));
        }
        timers.close();

        let started_at = Utc::now();
        *self.state.lock().await = Some(Running {
            cancel,
            timers,
            runs,
            started_at,
        });
        self.running.store(true, Ordering::Release);

        tracing::info!(jobs = self.jobs.len(), "Scheduler started");
        Ok(StartStatus::Started)
    }

    /// Cancel the timers and wait for in-flight runs, bounded by the grace timeout
    pub async fn stop(&self) -> StopReport {
        let _transition = self.transition.lock().await;
        let Some(running) = self.state.lock().await.take() else {
            return StopReport {
                was_running: false,
                timed_out: false,
            };
        };

        running.cancel.cancel();
        // Timers exit on their next poll, after which no run can be spawned
        running.timers.wait().await;

        running.runs.close();
        let timed_out = tokio::time::timeout(
            self.settings.graceful_stop_timeout,
            running.runs.wait(),
        )
        .await
        .is_err();

        self.running.store(false, Ordering::Release);

        if timed_out {
            tracing::warn!(
                grace_secs = self.settings.graceful_stop_timeout.as_secs(),
                "Scheduler stopped with runs still in flight"
            );
        } else {
            tracing::info!("Scheduler stopped");
        }

        StopReport {
            was_running: true,
            timed_out,
        }
    }

    pub async fn monitoring_stats(&self) -> MonitoringStats {
        let started_at = self.state.lock().await.as_ref().map(|r| r.started_at);

        let mut jobs = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            jobs.push(job.monitoring().await);
        }

        MonitoringStats {
            running: self.is_running(),
            started_at,
            jobs,
        }
    }

    pub async fn performance_metrics(&self) -> PerformanceMetrics {
        let mut jobs = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            jobs.push(job.record.lock().await.performance(&job.name));
        }
        PerformanceMetrics { jobs }
    }
}
