//! # bai-queue: Typed Background Jobs for BuildingAI
//!
//! **Email, import, vectorization and generic jobs with lease-based processing**
//!
//! Every job carries a [`JobType`] tag and a payload of the matching shape.
//! The pair is checked at submission, so a handler only ever sees the data it
//! was written for.
//!
//! ## Features
//!
//! - **Typed Handlers**: one [`JobHandler`] per job type, dispatched through a
//!   type-erased [`HandlerRegistry`]
//! - **Lease Semantics**: each run holds a [`LeaseToken`]; only the holder can
//!   report, and a reaper reclaims jobs whose lease ran out
//! - **Bounded Retries**: retryable failures back off exponentially until
//!   `max_attempts`, then fail terminally and notify a [`NotificationSink`]
//! - **Durability**: optional write-through [`FileStore`], restored on startup
//! - **Observability**: `tracing` spans and events, [`LiveMetrics`] counters and a
//!   [`JobEvent`] stream
//!
//! ## Quick Start
//!
//! ```no_run
//! use bai_queue::prelude::*;
//!
//! struct Vectorize;
//!
//! #[async_trait::async_trait]
//! impl JobHandler for Vectorize {
//!     type Data = VectorizationJobData;
//!
//!     async fn handle(&self, data: VectorizationJobData, ctx: JobContext) -> Result<(), JobError> {
//!         if ctx.is_cancel_requested() {
//!             return Err(JobError::Canceled);
//!         }
//!         println!("embedding {} (attempt {})", data.document_id, ctx.attempt);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> QueueResult<()> {
//! let mut module = QueueModule::builder().handler(Vectorize).build().await?;
//! module.start()?;
//!
//! let service = module.service();
//! let id = service.enqueue_data(VectorizationJobData::new("doc-42")).await?;
//! println!("{:?}", service.status(&id).await?);
//!
//! module.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod codec;
pub mod handler;
pub mod backend;
pub mod persistence;
pub mod notify;
pub mod service;
pub mod reaper;
pub mod worker;
pub mod module;
pub mod rpc;
pub mod observability;

pub use types::{
    EmailJobData, GenericJobData, ImportJobData, Job, JobData, JobEvent, JobId, JobMessage,
    JobPayload, JobPriority, JobStatus, JobType, LeaseToken, LeasedJob, QueueStats,
    VectorizationJobData,
};
pub use error::{JobError, QueueError, QueueResult};
pub use config::QueueConfig;
pub use codec::{json::JsonCodec, JobCodec};
pub use handler::{HandlerRegistry, JobContext, JobHandler};
pub use backend::{
    memory::{MemoryBackend, RestoreReport},
    CancelOutcome, QueueBackend,
};
pub use persistence::{FileStore, JobStore, NullStore};
pub use notify::{NotificationSink, TracingSink};
pub use service::{QueueService, ReportOutcome};
pub use reaper::{LeaseReaper, ReapReport};
pub use worker::WorkerPool;
pub use module::{QueueModule, QueueModuleBuilder};
pub use observability::{LiveMetrics, MetricsSnapshot};

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

/// Everything a handler author or caller typically needs
pub mod prelude {
    pub use crate::{
        CancelOutcome, EmailJobData, GenericJobData, ImportJobData, JobContext, JobData,
        JobError, JobHandler, JobId, JobMessage, JobPriority, JobStatus, JobType, QueueConfig,
        QueueError, QueueModule, QueueResult, QueueService, ReportOutcome,
        VectorizationJobData,
    };
}
