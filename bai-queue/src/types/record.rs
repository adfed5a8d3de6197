use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobMessage, JobPayload, JobPriority, JobType, LeaseToken};

/// Job status lifecycle
///
/// `Pending → Running → Succeeded | Failed`, with `Running → Pending` when a
/// failed attempt is retried and `Pending | Running → Canceled` on withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker
    Pending,

    /// Leased by a worker until `lease_until`
    Running { lease_until: DateTime<Utc> },

    Succeeded { completed_at: DateTime<Utc> },

    /// Failed permanently or exhausted its attempts
    Failed { failed_at: DateTime<Utc>, error: String },

    Canceled { canceled_at: DateTime<Utc> },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Canceled { .. }
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// When the job reached its terminal state
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Succeeded { completed_at } => Some(*completed_at),
            Self::Failed { failed_at, .. } => Some(*failed_at),
            Self::Canceled { canceled_at } => Some(*canceled_at),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running { .. } => "running",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Canceled { .. } => "canceled",
        }
    }
}

/// Job envelope: immutable submission data plus mutable runtime state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: JobPayload,
    pub priority: JobPriority,
    pub status: JobStatus,

    /// Attempts started so far (0 until first dequeued)
    pub attempt: u32,
    pub max_attempts: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Earliest time the job may be dequeued (pushed out by retry backoff)
    pub available_at: DateTime<Utc>,

    pub last_error: Option<String>,
    pub lease_token: Option<LeaseToken>,
    pub lease_until: Option<DateTime<Utc>>,

    /// Set when a running job was asked to stop
    #[serde(default)]
    pub cancel_requested: bool,

    /// Enqueue order, reassigned when the job is re-enqueued for a retry
    pub sequence: u64,

    /// Bumped on every mutation; persistence drops writes older than what it has
    pub revision: u64,
}

impl Job {
    pub fn new(id: JobId, message: JobMessage, default_max_attempts: u32, sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type: message.job_type,
            payload: message.payload,
            priority: message.priority,
            status: JobStatus::Pending,
            attempt: 0,
            max_attempts: message.max_attempts.unwrap_or(default_max_attempts).max(1),
            created_at: now,
            updated_at: now,
            available_at: now,
            last_error: None,
            lease_token: None,
            lease_until: None,
            cancel_requested: false,
            sequence,
            revision: 1,
        }
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending) && self.available_at <= now
    }

    /// Whether another attempt may follow the current one
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Running { lease_until } if lease_until < now)
    }

    pub(crate) fn start(&mut self, lease_token: LeaseToken, lease_until: DateTime<Utc>) {
        self.attempt += 1;
        self.status = JobStatus::Running { lease_until };
        self.lease_token = Some(lease_token);
        self.lease_until = Some(lease_until);
        self.touch();
    }

    pub(crate) fn succeed(&mut self) {
        self.status = JobStatus::Succeeded { completed_at: Utc::now() };
        self.clear_lease();
        self.touch();
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.status = JobStatus::Failed { failed_at: Utc::now(), error: error.clone() };
        self.last_error = Some(error);
        self.clear_lease();
        self.touch();
    }

    pub(crate) fn retry(&mut self, available_at: DateTime<Utc>, error: String, sequence: u64) {
        self.status = JobStatus::Pending;
        self.available_at = available_at;
        self.last_error = Some(error);
        self.sequence = sequence;
        self.clear_lease();
        self.touch();
    }

    pub(crate) fn cancel(&mut self) {
        self.status = JobStatus::Canceled { canceled_at: Utc::now() };
        self.clear_lease();
        self.touch();
    }

    pub(crate) fn request_cancel(&mut self) {
        self.cancel_requested = true;
        self.touch();
    }

    /// Settle a job that was running when the process stopped. It goes back
    /// in line unless a cancel was pending or that run was its last attempt.
    pub(crate) fn reset_interrupted(&mut self) {
        if !self.status.is_running() {
            return;
        }
        if self.cancel_requested {
            self.cancel();
        } else if self.has_attempts_left() {
            self.status = JobStatus::Pending;
            self.available_at = Utc::now();
            self.last_error = Some("Interrupted by shutdown".to_string());
            self.clear_lease();
            self.touch();
        } else {
            self.fail(format!("Interrupted on final attempt {}", self.attempt));
        }
    }

    fn clear_lease(&mut self) {
        self.lease_token = None;
        self.lease_until = None;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.revision += 1;
    }
}

/// A job handed to a worker together with its lease
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: Job,
    pub lease_token: LeaseToken,
    pub lease_until: DateTime<Utc>,
}

impl LeasedJob {
    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    pub fn job_type(&self) -> JobType {
        self.job.job_type
    }

    pub fn payload(&self) -> &JobPayload {
        &self.job.payload
    }

    pub fn lease_valid(&self, now: DateTime<Utc>) -> bool {
        self.lease_until > now
    }
}
