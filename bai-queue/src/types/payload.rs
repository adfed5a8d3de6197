//! Kind-specific job payloads.
//!
//! Each job kind has its own data shape. [`JobPayload`] is the closed sum
//! over those shapes and is what the queue stores; handlers receive the
//! concrete shape through the [`JobData`] trait.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::JobType;
use crate::{QueueError, QueueResult};

/// A concrete payload shape bound to exactly one [`JobType`]
pub trait JobData:
    Serialize
    + DeserializeOwned
    + Into<JobPayload>
    + TryFrom<JobPayload, Error = JobPayload>
    + Send
    + Sync
    + 'static
{
    /// Tag this shape is dispatched under
    const JOB_TYPE: JobType;
}

/// Send a templated email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailJobData {
    pub to: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Template variables
    #[serde(default = "empty_object")]
    pub context: Value,
}

impl EmailJobData {
    pub fn new(to: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            template: template.into(),
            subject: None,
            context: empty_object(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Import external content (file, URL, archive) into a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportJobData {
    /// Source reference, e.g. an uploaded file id or URL
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ImportJobData {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dataset_id: None,
            format: None,
        }
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self
    }
}

/// Embed a document for retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorizationJobData {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    /// Embedding model override; the handler's default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl VectorizationJobData {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            dataset_id: None,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Anything else: a named job with opaque arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenericJobData {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl GenericJobData {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Closed set of payload shapes, one variant per [`JobType`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobPayload {
    Email(EmailJobData),
    #[serde(rename = "generic")]
    Generic(GenericJobData),
    Import(ImportJobData),
    Vectorization(VectorizationJobData),
}

impl JobPayload {
    /// The tag this payload belongs to
    pub fn kind(&self) -> JobType {
        match self {
            Self::Email(_) => JobType::Email,
            Self::Generic(_) => JobType::GenericJobData,
            Self::Import(_) => JobType::Import,
            Self::Vectorization(_) => JobType::Vectorization,
        }
    }

    /// Decode untyped JSON against a declared tag.
    ///
    /// Fails with [`QueueError::InvalidJobKind`] when the value does not have
    /// the shape the tag requires.
    pub fn from_json(declared: JobType, value: Value) -> QueueResult<Self> {
        fn decode<T: DeserializeOwned>(declared: JobType, value: Value) -> QueueResult<T> {
            serde_json::from_value(value).map_err(|e| QueueError::InvalidJobKind {
                declared,
                reason: e.to_string(),
            })
        }

        Ok(match declared {
            JobType::Email => Self::Email(decode(declared, value)?),
            JobType::GenericJobData => Self::Generic(decode(declared, value)?),
            JobType::Import => Self::Import(decode(declared, value)?),
            JobType::Vectorization => Self::Vectorization(decode(declared, value)?),
        })
    }

    /// The inner data as untyped JSON
    pub fn to_json(&self) -> QueueResult<Value> {
        let value = match self {
            Self::Email(data) => serde_json::to_value(data)?,
            Self::Generic(data) => serde_json::to_value(data)?,
            Self::Import(data) => serde_json::to_value(data)?,
            Self::Vectorization(data) => serde_json::to_value(data)?,
        };
        Ok(value)
    }

    /// Semantic checks beyond shape: required text fields must not be blank
    pub fn validate(&self) -> QueueResult<()> {
        fn required(field: &str, value: &str) -> QueueResult<()> {
            if value.trim().is_empty() {
                return Err(QueueError::InvalidPayload(format!("'{}' must not be empty", field)));
            }
            Ok(())
        }

        match self {
            Self::Email(data) => {
                required("to", &data.to)?;
                required("template", &data.template)?;
                if !data.to.contains('@') {
                    return Err(QueueError::InvalidPayload(format!(
                        "'{}' is not an email address",
                        data.to
                    )));
                }
                Ok(())
            }
            Self::Generic(data) => required("name", &data.name),
            Self::Import(data) => required("source", &data.source),
            Self::Vectorization(data) => required("document_id", &data.document_id),
        }
    }
}

macro_rules! job_data {
    ($data:ty, $variant:ident, $kind:expr) => {
        impl JobData for $data {
            const JOB_TYPE: JobType = $kind;
        }

        impl From<$data> for JobPayload {
            fn from(data: $data) -> Self {
                JobPayload::$variant(data)
            }
        }

        impl TryFrom<JobPayload> for $data {
            type Error = JobPayload;

            fn try_from(payload: JobPayload) -> Result<Self, Self::Error> {
                match payload {
                    JobPayload::$variant(data) => Ok(data),
                    other => Err(other),
                }
            }
        }
    };
}

job_data!(EmailJobData, Email, JobType::Email);
job_data!(GenericJobData, Generic, JobType::GenericJobData);
job_data!(ImportJobData, Import, JobType::Import);
job_data!(VectorizationJobData, Vectorization, JobType::Vectorization);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_payload_for_declared_kind() {
        let payload = JobPayload::from_json(
            JobType::Email,
            json!({ "to": "a@x.com", "template": "welcome" }),
        )
        .unwrap();

        assert_eq!(payload.kind(), JobType::Email);
        assert_eq!(payload, JobPayload::Email(EmailJobData::new("a@x.com", "welcome")));
    }

    #[test]
    fn generic_shape_declared_as_vectorization_is_rejected() {
        let err = JobPayload::from_json(
            JobType::Vectorization,
            json!({ "name": "reindex", "args": { "all": true } }),
        )
        .unwrap_err();

        assert!(matches!(err, QueueError::InvalidJobKind { declared: JobType::Vectorization, .. }));
    }

    #[test]
    fn generic_accepts_any_args() {
        let payload =
            JobPayload::from_json(JobType::GenericJobData, json!({ "name": "cleanup" })).unwrap();
        assert_eq!(payload, JobPayload::Generic(GenericJobData::new("cleanup", Value::Null)));
    }

    #[test]
    fn typed_extraction_rejects_other_variants() {
        let payload: JobPayload = ImportJobData::new("file-1").into();
        let back = EmailJobData::try_from(payload.clone()).unwrap_err();
        assert_eq!(back, payload);
        assert_eq!(ImportJobData::try_from(payload).unwrap().source, "file-1");
    }

    #[test]
    fn validation_catches_blank_fields() {
        assert!(JobPayload::from(EmailJobData::new("a@x.com", "welcome")).validate().is_ok());
        assert!(matches!(
            JobPayload::from(EmailJobData::new("not-an-address", "welcome")).validate(),
            Err(QueueError::InvalidPayload(_))
        ));
        assert!(matches!(
            JobPayload::from(VectorizationJobData::new("  ")).validate(),
            Err(QueueError::InvalidPayload(_))
        ));
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload: JobPayload = VectorizationJobData::new("doc-7").with_model("bge-m3").into();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "vectorization",
                "data": { "document_id": "doc-7", "model": "bge-m3" }
            })
        );
    }
}
