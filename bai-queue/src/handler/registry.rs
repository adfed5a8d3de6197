use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{JobContext, JobHandler};
use crate::{Job, JobData, JobError, JobPayload, JobType, QueueError, QueueResult};

/// Type-erased handler for runtime dispatch
#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn execute(&self, payload: JobPayload, ctx: JobContext) -> Result<(), JobError>;
}

struct TypedHandler<H> {
    inner: H,
}

#[async_trait]
impl<H: JobHandler> ErasedHandler for TypedHandler<H> {
    async fn execute(&self, payload: JobPayload, ctx: JobContext) -> Result<(), JobError> {
        let data = H::Data::try_from(payload).map_err(|other| {
            JobError::Permanent(format!(
                "Handler for '{}' received a '{}' payload",
                <H::Data as JobData>::JOB_TYPE,
                other.kind()
            ))
        })?;

        self.inner.handle(data, ctx).await
    }
}

/// One handler per job type
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `H::Data::JOB_TYPE`; a second handler for the same type is rejected
    pub fn register<H: JobHandler>(&mut self, handler: H) -> QueueResult<()> {
        let job_type = <H::Data as JobData>::JOB_TYPE;
        if self.handlers.contains_key(&job_type) {
            return Err(QueueError::HandlerAlreadyRegistered(job_type));
        }

        self.handlers
            .insert(job_type, Arc::new(TypedHandler { inner: handler }));
        Ok(())
    }

    pub fn is_registered(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Registered types in declaration order
    pub fn registered_types(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }

    /// Run the registered handler for `job`
    pub async fn dispatch(
        &self,
        job: &Job,
        cancellation: CancellationToken,
    ) -> Result<(), JobError> {
        let handler = self
            .handlers
            .get(&job.job_type)
            .ok_or_else(|| {
                JobError::Permanent(format!(
                    "No handler registered for job type '{}'",
                    job.job_type
                ))
            })?;

        let ctx = JobContext::new(
            job.id.clone(),
            job.job_type,
            job.attempt,
            job.max_attempts,
            cancellation,
        );

        handler.execute(job.payload.clone(), ctx).await
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered", &self.registered_types())
            .finish()
    }
}
