pub mod json;

use crate::{Job, QueueResult};

/// Encoding of job envelopes for durable storage
pub trait JobCodec: Send + Sync {
    fn encode(&self, job: &Job) -> QueueResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> QueueResult<Job>;

    /// Codec identifier, also used as the file extension by the file store
    fn codec_id(&self) -> &'static str;
}
