use serde::{Deserialize, Serialize};

use super::{JobData, JobPayload, JobPriority, JobType};
use crate::{QueueError, QueueResult};

/// Job submission: the declared tag, its payload and per-job options.
///
/// The tag and the payload are carried separately so that callers speaking
/// an untyped protocol can declare one and send the other; the service
/// rejects pairs that disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_type: JobType,
    pub payload: JobPayload,
    #[serde(default)]
    pub priority: JobPriority,
    /// Overrides `QueueConfig::max_attempts` for this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl JobMessage {
    pub fn new(job_type: JobType, payload: impl Into<JobPayload>) -> Self {
        Self {
            job_type,
            payload: payload.into(),
            priority: JobPriority::default(),
            max_attempts: None,
        }
    }

    /// Build a message whose tag is taken from the data type itself
    pub fn typed<D: JobData>(data: D) -> Self {
        Self::new(D::JOB_TYPE, data)
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Check that the payload is of the declared kind and well formed
    pub fn validate(&self) -> QueueResult<()> {
        let actual = self.payload.kind();
        if actual != self.job_type {
            return Err(QueueError::InvalidJobKind {
                declared: self.job_type,
                reason: format!("payload is of kind '{}'", actual),
            });
        }
        if self.max_attempts == Some(0) {
            return Err(QueueError::InvalidPayload("max_attempts must be at least 1".to_string()));
        }
        self.payload.validate()
    }
}
