use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobType};

/// Lifecycle events emitted by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Enqueued {
        job_id: JobId,
        job_type: JobType,
        at: DateTime<Utc>,
    },

    /// Handed to a worker
    Leased {
        job_id: JobId,
        attempt: u32,
        lease_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// Attempt failed, job is pending again
    Retrying {
        job_id: JobId,
        attempt: u32,
        retry_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    Succeeded {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },

    CancelRequested {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    Canceled {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Leased { .. } => "leased",
            Self::Retrying { .. } => "retrying",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::CancelRequested { .. } => "cancel_requested",
            Self::Canceled { .. } => "canceled",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Leased { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Succeeded { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::CancelRequested { job_id, .. }
            | Self::Canceled { job_id, .. } => job_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Leased { at, .. }
            | Self::Retrying { at, .. }
            | Self::Succeeded { at, .. }
            | Self::Failed { at, .. }
            | Self::CancelRequested { at, .. }
            | Self::Canceled { at, .. } => *at,
        }
    }
}
