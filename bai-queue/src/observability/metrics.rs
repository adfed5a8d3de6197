use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::JobType;

/// Live counters for queue operations
///
/// Counters only ever grow; they describe what the process has done since it
/// started, while [`QueueStats`](crate::QueueStats) describes what the
/// backend currently holds.
#[derive(Debug, Default)]
pub struct LiveMetrics {
    jobs_enqueued: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_canceled: AtomicU64,
    jobs_reclaimed: AtomicU64,

    // Per-job-type metrics
    job_type_metrics: RwLock<BTreeMap<JobType, JobTypeMetrics>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_jobs_enqueued(&self, job_type: JobType) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
        self.with_kind(job_type, |m| m.enqueued += 1);
    }

    pub fn increment_jobs_completed(&self, job_type: JobType) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.with_kind(job_type, |m| m.completed += 1);
    }

    pub fn increment_jobs_failed(&self, job_type: JobType) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.with_kind(job_type, |m| m.failed += 1);
    }

    pub fn increment_jobs_retried(&self, job_type: JobType) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
        self.with_kind(job_type, |m| m.retried += 1);
    }

    pub fn increment_jobs_canceled(&self, job_type: JobType) {
        self.jobs_canceled.fetch_add(1, Ordering::Relaxed);
        self.with_kind(job_type, |m| m.canceled += 1);
    }

    /// A lease ran out and the reaper took the job back
    pub fn increment_jobs_reclaimed(&self, job_type: JobType) {
        self.jobs_reclaimed.fetch_add(1, Ordering::Relaxed);
        self.with_kind(job_type, |m| m.reclaimed += 1);
    }

    /// Record how long one handler run took
    pub fn record_execution_time(&self, job_type: JobType, duration: Duration) {
        self.with_kind(job_type, |m| {
            m.executions += 1;
            m.total_execution_ms += duration.as_millis() as u64;
        });
    }

    fn with_kind(&self, job_type: JobType, update: impl FnOnce(&mut JobTypeMetrics)) {
        let mut metrics = self.job_type_metrics.write();
        update(metrics.entry(job_type).or_default());
    }

    // Getters for global metrics
    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_enqueued.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_canceled(&self) -> u64 {
        self.jobs_canceled.load(Ordering::Relaxed)
    }

    pub fn jobs_reclaimed(&self) -> u64 {
        self.jobs_reclaimed.load(Ordering::Relaxed)
    }

    pub fn job_type_metrics(&self, job_type: JobType) -> Option<JobTypeMetrics> {
        self.job_type_metrics.read().get(&job_type).cloned()
    }

    /// Copy of every counter at this instant
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            global: GlobalMetrics {
                jobs_enqueued: self.jobs_enqueued(),
                jobs_completed: self.jobs_completed(),
                jobs_failed: self.jobs_failed(),
                jobs_retried: self.jobs_retried(),
                jobs_canceled: self.jobs_canceled(),
                jobs_reclaimed: self.jobs_reclaimed(),
            },
            job_types: self.job_type_metrics.read().clone(),
        }
    }
}

/// Metrics for a specific job type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobTypeMetrics {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub canceled: u64,
    pub reclaimed: u64,
    pub executions: u64,
    pub total_execution_ms: u64,
}

impl JobTypeMetrics {
    /// Success rate as a percentage of finished jobs
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.completed + self.failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.completed as f64 / total_processed as f64) * 100.0
        }
    }

    pub fn average_execution_time(&self) -> Option<Duration> {
        if self.executions == 0 {
            return None;
        }
        Some(Duration::from_millis(self.total_execution_ms / self.executions))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub global: GlobalMetrics,
    pub job_types: BTreeMap<JobType, JobTypeMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalMetrics {
    pub jobs_enqueued: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_canceled: u64,
    pub jobs_reclaimed: u64,
}

impl GlobalMetrics {
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.jobs_completed + self.jobs_failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.jobs_completed as f64 / total_processed as f64) * 100.0
        }
    }

    /// Jobs accepted but not yet finished
    pub fn jobs_in_progress(&self) -> u64 {
        self.jobs_enqueued
            .saturating_sub(self.jobs_completed + self.jobs_failed + self.jobs_canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_metrics() {
        let metrics = LiveMetrics::new();

        metrics.increment_jobs_enqueued(JobType::Email);
        metrics.increment_jobs_completed(JobType::Email);
        metrics.increment_jobs_enqueued(JobType::Import);

        assert_eq!(metrics.jobs_enqueued(), 2);
        assert_eq!(metrics.jobs_completed(), 1);

        let email = metrics.job_type_metrics(JobType::Email).unwrap();
        assert_eq!(email.enqueued, 1);
        assert_eq!(email.completed, 1);
        assert_eq!(email.success_rate(), 100.0);
        assert!(metrics.job_type_metrics(JobType::Vectorization).is_none());
    }

    #[test]
    fn test_execution_time_average() {
        let metrics = LiveMetrics::new();
        metrics.record_execution_time(JobType::Vectorization, Duration::from_millis(100));
        metrics.record_execution_time(JobType::Vectorization, Duration::from_millis(300));

        let vectorization = metrics.job_type_metrics(JobType::Vectorization).unwrap();
        assert_eq!(vectorization.average_execution_time(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_global_metrics() {
        let global = GlobalMetrics {
            jobs_enqueued: 100,
            jobs_completed: 80,
            jobs_failed: 10,
            jobs_retried: 5,
            jobs_canceled: 5,
            jobs_reclaimed: 2,
        };

        assert_eq!(global.success_rate(), 88.88888888888889);
        assert_eq!(global.jobs_in_progress(), 5);
    }
}
