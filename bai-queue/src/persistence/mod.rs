//! Durable storage for job envelopes.
//!
//! The backend writes through to a [`JobStore`] on every transition and
//! reloads unfinished jobs from it at startup.

pub mod file;

pub use file::FileStore;

use async_trait::async_trait;

use crate::{Job, JobId, QueueResult};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly enqueued job
    async fn save(&self, job: &Job) -> QueueResult<()>;

    /// Persist a transition. Writes carrying an older `revision` than the
    /// stored one must be ignored.
    async fn update(&self, job: &Job) -> QueueResult<()>;

    /// All jobs that have not reached a terminal state
    async fn load_pending(&self) -> QueueResult<Vec<Job>>;

    /// Forget a job (retention expired)
    async fn remove(&self, id: &JobId) -> QueueResult<()>;
}

/// Store that keeps nothing; the queue lives only in memory
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl JobStore for NullStore {
    async fn save(&self, _job: &Job) -> QueueResult<()> {
        Ok(())
    }

    async fn update(&self, _job: &Job) -> QueueResult<()> {
        Ok(())
    }

    async fn load_pending(&self) -> QueueResult<Vec<Job>> {
        Ok(Vec::new())
    }

    async fn remove(&self, _id: &JobId) -> QueueResult<()> {
        Ok(())
    }
}
