//! Monitoring counters and rolling performance metrics

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler-wide monitoring snapshot
#[derive(Debug, Serialize, Clone)]
pub struct MonitoringStats {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub jobs: Vec<JobMonitoringStats>,
}

impl MonitoringStats {
    pub fn job(&self, name: &str) -> Option<&JobMonitoringStats> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct JobMonitoringStats {
    pub name: String,
    pub interval_secs: u64,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub skipped_overlaps: u64,
    pub in_flight: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_duration_ms: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct PerformanceMetrics {
    pub jobs: Vec<JobPerformance>,
}

impl PerformanceMetrics {
    pub fn job(&self, name: &str) -> Option<&JobPerformance> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Run durations over the most recent `window` runs
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct JobPerformance {
    pub name: String,
    pub window: usize,
    pub samples: usize,
    pub average_ms: f64,
    pub max_ms: u64,
}

/// Mutable per-job bookkeeping behind the scheduler's lock
#[derive(Debug)]
pub(crate) struct JobRecord {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub skipped_overlaps: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_duration: Option<Duration>,
    pub last_error: Option<String>,
    window: usize,
    durations: VecDeque<Duration>,
}

impl JobRecord {
    pub fn new(window: usize) -> Self {
        Self {
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            skipped_overlaps: 0,
            last_run_at: None,
            last_run_duration: None,
            last_error: None,
            window: window.max(1),
            durations: VecDeque::new(),
        }
    }

    pub fn record_run(&mut self, started_at: DateTime<Utc>, elapsed: Duration, error: Option<String>) {
        self.total_runs += 1;
        match error {
            None => self.successful_runs += 1,
            Some(err) => {
                self.failed_runs += 1;
                self.last_error = Some(err);
            }
        }
        self.last_run_at = Some(started_at);
        self.last_run_duration = Some(elapsed);

        if self.durations.len() == self.window {
            self.durations.pop_front();
        }
        self.durations.push_back(elapsed);
    }

    pub fn performance(&self, name: &str) -> JobPerformance {
        let samples = self.durations.len();
        let total_ms: f64 = self.durations.iter().map(|d| d.as_micros() as f64 / 1000.0).sum();
        JobPerformance {
            name: name.to_string(),
            window: self.window,
            samples,
            average_ms: if samples == 0 { 0.0 } else { total_ms / samples as f64 },
            max_ms: self
                .durations
                .iter()
                .map(|d| d.as_millis() as u64)
                .max()
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window_drops_oldest() {
        let mut record = JobRecord::new(2);
        let now = Utc::now();
        record.record_run(now, Duration::from_millis(900), None);
        record.record_run(now, Duration::from_millis(100), None);
        record.record_run(now, Duration::from_millis(300), Some("boom".to_string()));

        let perf = record.performance("sweep");
        assert_eq!(perf.samples, 2);
        assert_eq!(perf.max_ms, 300);
        assert!((perf.average_ms - 200.0).abs() < 1e-9);

        assert_eq!(record.total_runs, 3);
        assert_eq!(record.successful_runs, 2);
        assert_eq!(record.failed_runs, 1);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_empty_metrics() {
        let perf = JobRecord::new(10).performance("idle");
        assert_eq!(perf.samples, 0);
        assert_eq!(perf.average_ms, 0.0);
        assert_eq!(perf.max_ms, 0);
    }
}
