use thiserror::Error;

use crate::{JobId, JobType};

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by the queue
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Declared tag and payload shape disagree
    #[error("Invalid job kind: payload does not match declared type '{declared}': {reason}")]
    InvalidJobKind { declared: JobType, reason: String },

    #[error("No handler registered for job type '{0}'")]
    NoHandlerRegistered(JobType),

    #[error("Handler already registered for job type '{0}'")]
    HandlerAlreadyRegistered(JobType),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Nothing to dequeue right now; callers should wait and try again
    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Job execution failed: {0}")]
    HandlerExecutionFailure(#[from] JobError),

    #[error("Job {job_id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        job_id: JobId,
        attempts: u32,
        last_error: String,
    },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid lease token")]
    InvalidLeaseToken,

    #[error("Lease has expired")]
    LeaseExpired,

    #[error("Job has been canceled")]
    JobCanceled,

    #[error("Job is already in terminal state")]
    JobAlreadyTerminal,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Stable machine-readable name, used by the RPC surface
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidJobKind { .. } => "invalid_job_kind",
            Self::NoHandlerRegistered(_) => "no_handler_registered",
            Self::HandlerAlreadyRegistered(_) => "handler_already_registered",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::EmptyQueue => "empty_queue",
            Self::HandlerExecutionFailure(_) => "handler_execution_failure",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::JobNotFound(_) => "job_not_found",
            Self::InvalidLeaseToken => "invalid_lease_token",
            Self::LeaseExpired => "lease_expired",
            Self::JobCanceled => "job_canceled",
            Self::JobAlreadyTerminal => "job_already_terminal",
            Self::Persistence(_) => "persistence",
            Self::Serialization(_) => "serialization",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Internal(_) => "internal",
        }
    }

    /// Rejected at submission time; resubmitting the same job cannot succeed
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidJobKind { .. } | Self::NoHandlerRegistered(_) | Self::InvalidPayload(_)
        )
    }
}

/// Outcome of a failed handler run - determines retry behavior
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Retried while attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Fails the job immediately
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// The handler stopped because cancellation was requested
    #[error("Canceled")]
    Canceled,
}

impl JobError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
            Self::Canceled => "canceled",
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
