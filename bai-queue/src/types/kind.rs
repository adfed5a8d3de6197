use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag identifying which payload shape and which handler apply to a job.
/// Serialized as its wire name; parsed leniently through `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum JobType {
    /// Transactional email rendered from a template
    Email,

    /// Opaque job with free-form arguments
    #[serde(rename = "generic")]
    GenericJobData,

    /// Import of external content into a dataset
    Import,

    /// Embedding of a document into the vector store
    Vectorization,
}

impl JobType {
    /// Every job type, in declaration order
    pub const ALL: [JobType; 4] = [
        Self::Email,
        Self::GenericJobData,
        Self::Import,
        Self::Vectorization,
    ];

    /// Stable wire name
    pub fn name(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::GenericJobData => "generic",
            Self::Import => "import",
            Self::Vectorization => "vectorization",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "generic" | "genericjobdata" | "generic_job_data" => Ok(Self::GenericJobData),
            "import" => Ok(Self::Import),
            "vectorization" => Ok(Self::Vectorization),
            _ => Err(format!("Unknown job type: {}", s)),
        }
    }
}

impl TryFrom<String> for JobType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
