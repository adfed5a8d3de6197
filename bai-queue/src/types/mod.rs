pub mod ids;
pub mod kind;
pub mod payload;
pub mod message;
pub mod record;
pub mod priority;
pub mod events;
pub mod stats;

pub use ids::{JobId, LeaseToken};
pub use kind::JobType;
pub use payload::{
    EmailJobData, GenericJobData, ImportJobData, JobData, JobPayload, VectorizationJobData,
};
pub use message::JobMessage;
pub use record::{Job, JobStatus, LeasedJob};
pub use priority::JobPriority;
pub use events::JobEvent;
pub use stats::QueueStats;
