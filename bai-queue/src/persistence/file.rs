use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::JobStore;
use crate::codec::{json::JsonCodec, JobCodec};
use crate::{Job, JobId, QueueResult};

/// One document per job in a directory.
///
/// Documents are replaced atomically (write to a temp file, then rename).
/// Terminal documents found while loading are deleted, since a restarted
/// queue only resumes unfinished work.
pub struct FileStore {
    dir: PathBuf,
    codec: Arc<dyn JobCodec>,
    /// Last revision written per job; also serializes writes
    revisions: Mutex<HashMap<JobId, u64>>,
}

impl FileStore {
    /// Open (creating if needed) a JSON store in `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> QueueResult<Self> {
        Self::with_codec(dir, Arc::new(JsonCodec)).await
    }

    pub async fn with_codec(
        dir: impl Into<PathBuf>,
        codec: Arc<dyn JobCodec>,
    ) -> QueueResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        info!("Opened job store at {}", dir.display());

        Ok(Self {
            dir,
            codec,
            revisions: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, self.codec.codec_id()))
    }

    async fn write(&self, job: &Job) -> QueueResult<()> {
        let mut revisions = self.revisions.lock().await;
        if let Some(stored) = revisions.get(&job.id) {
            if *stored >= job.revision {
                debug!(
                    "Skipping stale write for job {} (revision {} <= {})",
                    job.id, job.revision, stored
                );
                return Ok(());
            }
        }

        let bytes = self.codec.encode(job)?;
        let path = self.path_for(&job.id);
        let tmp = path.with_extension(format!("{}.tmp", self.codec.codec_id()));
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        revisions.insert(job.id.clone(), job.revision);
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn save(&self, job: &Job) -> QueueResult<()> {
        self.write(job).await
    }

    async fn update(&self, job: &Job) -> QueueResult<()> {
        self.write(job).await
    }

    async fn load_pending(&self) -> QueueResult<Vec<Job>> {
        let extension = self.codec.codec_id();
        let mut revisions = self.revisions.lock().await;
        let mut jobs = Vec::new();

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }

            let bytes = fs::read(&path).await?;
            let job = match self.codec.decode(&bytes) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Skipping unreadable job document {}: {}", path.display(), e);
                    continue;
                }
            };

            if job.status.is_terminal() {
                fs::remove_file(&path).await?;
                continue;
            }

            revisions.insert(job.id.clone(), job.revision);
            jobs.push(job);
        }

        jobs.sort_by_key(|job| job.sequence);
        info!("Loaded {} unfinished jobs from {}", jobs.len(), self.dir.display());
        Ok(jobs)
    }

    async fn remove(&self, id: &JobId) -> QueueResult<()> {
        let mut revisions = self.revisions.lock().await;
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        revisions.remove(id);
        Ok(())
    }
}
