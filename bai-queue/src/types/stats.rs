use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{JobStatus, JobType};

/// Point-in-time counts of the jobs the backend holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Non-terminal jobs per kind
    pub active_by_type: BTreeMap<JobType, usize>,
}

impl QueueStats {
    pub(crate) fn record(&mut self, job_type: JobType, status: &JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running { .. } => self.running += 1,
            JobStatus::Succeeded { .. } => self.succeeded += 1,
            JobStatus::Failed { .. } => self.failed += 1,
            JobStatus::Canceled { .. } => self.canceled += 1,
        }
        if !status.is_terminal() {
            *self.active_by_type.entry(job_type).or_default() += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed + self.canceled
    }
}
