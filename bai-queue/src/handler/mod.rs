//! Job handlers.
//!
//! A handler is written against one concrete payload shape. The
//! [`HandlerRegistry`] erases that type so the service can dispatch any
//! stored [`Job`](crate::Job) to the handler registered for its tag.

pub mod registry;

pub use registry::HandlerRegistry;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{JobData, JobError, JobId, JobType};

/// Executes jobs of one kind
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Payload shape this handler consumes; fixes the job type it serves
    type Data: JobData;

    async fn handle(&self, data: Self::Data, ctx: JobContext) -> Result<(), JobError>;
}

/// Per-run information handed to a handler
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_type: JobType,
    /// 1-based attempt number of this run
    pub attempt: u32,
    pub max_attempts: u32,
    cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        job_type: JobType,
        attempt: u32,
        max_attempts: u32,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            job_type,
            attempt,
            max_attempts,
            cancellation,
        }
    }

    /// True once `QueueService::cancel` was called for this job.
    /// Long-running handlers should check it and return `JobError::Canceled`.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
