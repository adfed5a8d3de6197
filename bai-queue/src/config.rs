//! Queue configuration.
//!
//! Defaults suit a single worker process. Every field can be overridden from
//! `QUEUE_*` environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `QUEUE_MAX_WORKERS` | `max_workers` |
//! | `QUEUE_MAX_ATTEMPTS` | `max_attempts` |
//! | `QUEUE_LEASE_DURATION_SECS` | `lease_duration` |
//! | `QUEUE_JOB_TIMEOUT_SECS` | `job_timeout` |
//! | `QUEUE_POLL_INTERVAL_MS` | `poll_interval` |
//! | `QUEUE_BASE_RETRY_BACKOFF_MS` | `base_retry_backoff` |
//! | `QUEUE_MAX_RETRY_BACKOFF_SECS` | `max_retry_backoff` |
//! | `QUEUE_REAPER_INTERVAL_SECS` | `reaper_interval` |
//! | `QUEUE_RETENTION_SECS` | `retention` |
//! | `QUEUE_PRIORITY_ORDERING` | `priority_ordering` |
//! | `QUEUE_EVENT_CAPACITY` | `event_capacity` |
//! | `QUEUE_DATA_DIR` | `data_dir` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{QueueError, QueueResult};

/// Upper bound for every configured duration, so deadlines derived from
/// them stay within the clock's range
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Number of concurrent worker tasks
    pub max_workers: usize,
    /// Attempts per job unless the job overrides it
    pub max_attempts: u32,
    /// How long a worker owns a job before the reaper may reclaim it
    pub lease_duration: Duration,
    /// Handler run limit; must be shorter than the lease
    pub job_timeout: Duration,
    /// How long an idle worker sleeps before polling again
    pub poll_interval: Duration,
    pub base_retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    pub reaper_interval: Duration,
    /// How long terminal jobs are kept before being purged
    pub retention: Duration,
    /// Serve higher priorities first; plain FIFO when off
    pub priority_ordering: bool,
    /// Buffer size of the lifecycle event channel
    pub event_capacity: usize,
    /// Directory for the file store, if jobs should survive restarts
    pub data_dir: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            max_attempts: 3,
            lease_duration: Duration::from_secs(300),
            job_timeout: Duration::from_secs(240),
            poll_interval: Duration::from_millis(250),
            base_retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(3600),
            reaper_interval: Duration::from_secs(30),
            retention: Duration::from_secs(24 * 3600),
            priority_ordering: true,
            event_capacity: 1024,
            data_dir: None,
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `QUEUE_*` environment variables
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `QUEUE_*` key
    pub fn from_lookup<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse(&lookup, "QUEUE_MAX_WORKERS")? {
            config.max_workers = v;
        }
        if let Some(v) = parse(&lookup, "QUEUE_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(v) = parse(&lookup, "QUEUE_LEASE_DURATION_SECS")? {
            config.lease_duration = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "QUEUE_JOB_TIMEOUT_SECS")? {
            config.job_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "QUEUE_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse(&lookup, "QUEUE_BASE_RETRY_BACKOFF_MS")? {
            config.base_retry_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse(&lookup, "QUEUE_MAX_RETRY_BACKOFF_SECS")? {
            config.max_retry_backoff = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "QUEUE_REAPER_INTERVAL_SECS")? {
            config.reaper_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "QUEUE_RETENTION_SECS")? {
            config.retention = Duration::from_secs(v);
        }
        if let Some(v) = parse(&lookup, "QUEUE_PRIORITY_ORDERING")? {
            config.priority_ordering = v;
        }
        if let Some(v) = parse(&lookup, "QUEUE_EVENT_CAPACITY")? {
            config.event_capacity = v;
        }
        if let Some(dir) = lookup("QUEUE_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_retry_backoff = base;
        self.max_retry_backoff = max;
        self
    }

    pub fn with_reaper_interval(mut self, reaper_interval: Duration) -> Self {
        self.reaper_interval = reaper_interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_priority_ordering(mut self, enabled: bool) -> Self {
        self.priority_ordering = enabled;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.max_workers == 0 {
            return Err(QueueError::InvalidConfig("max_workers must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(QueueError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.poll_interval.is_zero() || self.reaper_interval.is_zero() {
            return Err(QueueError::InvalidConfig(
                "poll_interval and reaper_interval must be non-zero".into(),
            ));
        }
        for (name, value) in [
            ("lease_duration", self.lease_duration),
            ("poll_interval", self.poll_interval),
            ("max_retry_backoff", self.max_retry_backoff),
            ("reaper_interval", self.reaper_interval),
            ("retention", self.retention),
        ] {
            if value > MAX_DURATION {
                return Err(QueueError::InvalidConfig(format!(
                    "{} ({:?}) exceeds the maximum of {:?}",
                    name, value, MAX_DURATION
                )));
            }
        }
        if self.job_timeout >= self.lease_duration {
            return Err(QueueError::InvalidConfig(format!(
                "job_timeout ({:?}) must be shorter than lease_duration ({:?})",
                self.job_timeout, self.lease_duration
            )));
        }
        if self.base_retry_backoff > self.max_retry_backoff {
            return Err(QueueError::InvalidConfig(
                "base_retry_backoff must not exceed max_retry_backoff".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::InvalidConfig("event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Delay before retrying after `attempt` failed: exponential, capped, with up to 10% jitter
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self
            .base_retry_backoff
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_retry_backoff);

        let jitter_ms = (backoff.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff.saturating_add(Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1)))
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> QueueResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| QueueError::InvalidConfig(format!("{}='{}': {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn env_overrides_apply() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("QUEUE_MAX_WORKERS", "4"),
            ("QUEUE_MAX_ATTEMPTS", "5"),
            ("QUEUE_POLL_INTERVAL_MS", "50"),
            ("QUEUE_PRIORITY_ORDERING", "false"),
            ("QUEUE_DATA_DIR", "/var/lib/bai-queue"),
        ]))
        .unwrap();

        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(!config.priority_ordering);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/bai-queue")));
    }

    #[test]
    fn malformed_value_is_rejected() {
        let err = QueueConfig::from_lookup(lookup(&[("QUEUE_MAX_WORKERS", "many")])).unwrap_err();
        assert!(matches!(err, QueueError::InvalidConfig(msg) if msg.contains("QUEUE_MAX_WORKERS")));
    }

    #[test]
    fn timeout_must_fit_inside_lease() {
        let config = QueueConfig::default()
            .with_lease_duration(Duration::from_secs(10))
            .with_job_timeout(Duration::from_secs(10));
        assert!(matches!(config.validate(), Err(QueueError::InvalidConfig(_))));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let config =
            QueueConfig::default().with_retention(Duration::from_secs(10_000_000_000_000));
        assert!(matches!(
            config.validate(),
            Err(QueueError::InvalidConfig(msg)) if msg.contains("retention")
        ));

        let huge_lease = lookup(&[("QUEUE_LEASE_DURATION_SECS", "10000000000000")]);
        let err = QueueConfig::from_lookup(huge_lease).unwrap_err();
        assert!(matches!(err, QueueError::InvalidConfig(msg) if msg.contains("lease_duration")));

        let config = QueueConfig::default().with_retention(MAX_DURATION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = QueueConfig::default()
            .with_retry_backoff(Duration::from_millis(100), Duration::from_millis(350));

        let first = config.retry_backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));

        let second = config.retry_backoff(2);
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));

        let capped = config.retry_backoff(10);
        assert!(capped >= Duration::from_millis(350) && capped <= Duration::from_millis(385));
    }

    #[test]
    fn zero_backoff_stays_zero() {
        let config = QueueConfig::default().with_retry_backoff(Duration::ZERO, Duration::ZERO);
        assert_eq!(config.retry_backoff(3), Duration::ZERO);
    }
}
