use crate::{codec::JobCodec, Job, QueueResult};

/// JSON codec; documents are pretty-printed so stored jobs stay inspectable
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JobCodec for JsonCodec {
    fn encode(&self, job: &Job) -> QueueResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(job)?)
    }

    fn decode(&self, bytes: &[u8]) -> QueueResult<Job> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn codec_id(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EmailJobData, JobId, JobMessage, QueueError};

    #[test]
    fn decodes_what_it_encodes() {
        let codec = JsonCodec;
        let message = JobMessage::typed(EmailJobData::new("a@x.com", "welcome").with_subject("Hi"));
        let job = Job::new(JobId::new(), message, 3, 7);

        let bytes = codec.encode(&job).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), job);
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        let err = JsonCodec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, QueueError::Serialization(_)));
    }

    #[test]
    fn codec_id() {
        assert_eq!(JsonCodec.codec_id(), "json");
    }
}
