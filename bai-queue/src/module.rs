//! Composition root.
//!
//! ```no_run
//! use bai_queue::prelude::*;
//!
//! struct SendEmail;
//!
//! #[async_trait::async_trait]
//! impl JobHandler for SendEmail {
//!     type Data = EmailJobData;
//!
//!     async fn handle(&self, data: EmailJobData, _ctx: JobContext) -> Result<(), JobError> {
//!         println!("sending '{}' to {}", data.template, data.to);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> QueueResult<()> {
//! let mut module = QueueModule::builder()
//!     .config(QueueConfig::default().with_max_workers(4))
//!     .handler(SendEmail)
//!     .build()
//!     .await?;
//! module.start()?;
//!
//! let id = module
//!     .service()
//!     .enqueue_data(EmailJobData::new("a@x.com", "welcome"))
//!     .await?;
//! println!("queued {}", id);
//!
//! module.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backend::memory::MemoryBackend;
use crate::handler::{HandlerRegistry, JobHandler};
use crate::notify::{NotificationSink, TracingSink};
use crate::persistence::{FileStore, JobStore, NullStore};
use crate::reaper::LeaseReaper;
use crate::service::QueueService;
use crate::worker::WorkerPool;
use crate::{QueueConfig, QueueError, QueueResult};

/// Owns the queue service and its background tasks
pub struct QueueModule {
    service: Arc<QueueService>,
    workers: Option<WorkerPool>,
    reaper: Option<(CancellationToken, JoinHandle<()>)>,
}

impl QueueModule {
    pub fn builder() -> QueueModuleBuilder {
        QueueModuleBuilder::default()
    }

    /// Shared handle for callers that enqueue and query jobs
    pub fn service(&self) -> Arc<QueueService> {
        self.service.clone()
    }

    pub fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    /// Spawn the worker pool and the lease reaper
    pub fn start(&mut self) -> QueueResult<()> {
        if self.is_running() {
            return Err(QueueError::Internal("queue module already started".to_string()));
        }

        self.workers = Some(WorkerPool::spawn(self.service.clone()));

        let shutdown = CancellationToken::new();
        let reaper = LeaseReaper::new(self.service.clone());
        let handle = tokio::spawn(reaper.run(shutdown.clone()));
        self.reaper = Some((shutdown, handle));

        info!("Queue module started");
        Ok(())
    }

    /// Stop the background tasks, waiting for in-flight jobs to finish
    pub async fn shutdown(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown().await;
        }

        if let Some((shutdown, handle)) = self.reaper.take() {
            shutdown.cancel();
            if let Err(e) = handle.await {
                error!("Lease reaper ended abnormally: {}", e);
            }
        }

        info!("Queue module stopped");
    }
}

#[derive(Default)]
pub struct QueueModuleBuilder {
    config: QueueConfig,
    store: Option<Arc<dyn JobStore>>,
    sink: Option<Arc<dyn NotificationSink>>,
    registry: HandlerRegistry,
    error: Option<QueueError>,
}

impl QueueModuleBuilder {
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Durable store; defaults to a `FileStore` under `config.data_dir`, or no
    /// durability when that is unset
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register the handler for `H::Data`'s job type. A duplicate is reported by `build`.
    pub fn handler<H: JobHandler>(mut self, handler: H) -> Self {
        if let Err(e) = self.registry.register(handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Assemble the module and reload unfinished jobs from the store
    pub async fn build(self) -> QueueResult<QueueModule> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.config.validate()?;

        let store: Arc<dyn JobStore> = match (self.store, &self.config.data_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileStore::open(dir).await?),
            (None, None) => Arc::new(NullStore),
        };

        let backend = MemoryBackend::with_store(&self.config, store);
        let restored = backend.restore().await?;

        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let service = QueueService::new(Arc::new(backend), self.registry, self.config)
            .with_notification_sink(sink);
        service.settle_restored(&restored.settled).await;

        info!(
            "Queue module built: handlers for {:?}, {} jobs restored",
            service.registry().registered_types(),
            restored.loaded
        );

        Ok(QueueModule {
            service: Arc::new(service),
            workers: None,
            reaper: None,
        })
    }
}
