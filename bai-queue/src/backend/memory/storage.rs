use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::backend::{BoxStream, CancelOutcome, QueueBackend};
use crate::persistence::{JobStore, NullStore};
use crate::{
    Job, JobEvent, JobId, JobMessage, JobPriority, JobStatus, JobType, LeaseToken, LeasedJob,
    QueueConfig, QueueError, QueueResult, QueueStats,
};

/// Position of a pending job in its kind's ready queue: priority first, then FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    rank: Reverse<JobPriority>,
    sequence: u64,
}

/// What `MemoryBackend::restore` brought back
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub loaded: usize,
    /// Interrupted jobs that became terminal instead of pending
    pub settled: Vec<Job>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    /// Pending jobs per kind, in dequeue order
    ready: HashMap<JobType, BTreeMap<ReadyKey, JobId>>,
    next_sequence: u64,
}

impl State {
    fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn job_mut(&mut self, job_id: &JobId) -> QueueResult<&mut Job> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))
    }
}

#[derive(Debug, Clone)]
struct Settings {
    lease_duration: chrono::Duration,
    max_attempts: u32,
    priority_ordering: bool,
}

/// In-process backend. Job state lives in memory behind one lock, so every
/// transition is atomic; each change is written through to a [`JobStore`].
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    store: Arc<dyn JobStore>,
    events: broadcast::Sender<JobEvent>,
    settings: Settings,
}

impl MemoryBackend {
    /// Memory-only backend
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_store(config, Arc::new(NullStore))
    }

    pub fn with_store(config: &QueueConfig, store: Arc<dyn JobStore>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let lease_duration = chrono::Duration::from_std(config.lease_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        Self {
            state: Arc::new(Mutex::new(State::default())),
            store,
            events,
            settings: Settings {
                lease_duration,
                max_attempts: config.max_attempts,
                priority_ordering: config.priority_ordering,
            },
        }
    }

    /// Reload unfinished jobs from the store. Jobs that were running when
    /// the previous process stopped are put back in line, or settled when
    /// that run was their last attempt.
    pub async fn restore(&self) -> QueueResult<RestoreReport> {
        let mut loaded = self.store.load_pending().await?;
        let mut interrupted = Vec::new();

        {
            let mut state = self.state.lock();
            for job in loaded.iter_mut() {
                if job.status.is_running() {
                    job.reset_interrupted();
                    interrupted.push(job.clone());
                }
                state.next_sequence = state.next_sequence.max(job.sequence);
                if state.jobs.contains_key(&job.id) {
                    continue;
                }
                if matches!(job.status, JobStatus::Pending) {
                    let key = self.ready_key(job);
                    state
                        .ready
                        .entry(job.job_type)
                        .or_default()
                        .insert(key, job.id.clone());
                }
                state.jobs.insert(job.id.clone(), job.clone());
            }
        }

        for job in &interrupted {
            self.persist(job).await;
        }

        let settled: Vec<Job> = interrupted
            .into_iter()
            .filter(|job| job.status.is_terminal())
            .collect();

        if !loaded.is_empty() {
            info!(
                "Restored {} jobs ({} settled after being interrupted on their last attempt)",
                loaded.len(),
                settled.len()
            );
        }
        Ok(RestoreReport {
            loaded: loaded.len(),
            settled,
        })
    }

    /// Subscribe to lifecycle events as a raw broadcast receiver
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn ready_key(&self, job: &Job) -> ReadyKey {
        let priority = if self.settings.priority_ordering {
            job.priority
        } else {
            JobPriority::Normal
        };
        ReadyKey {
            rank: Reverse(priority),
            sequence: job.sequence,
        }
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Write a transition through to the store. The in-memory state is
    /// already committed, so a store failure is logged rather than returned.
    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.update(job).await {
            error!("Failed to persist job {} at revision {}: {}", job.id, job.revision, e);
        }
    }

    /// Shared checks for lease holder operations
    fn check_lease(job: &Job, lease_token: &LeaseToken, now: DateTime<Utc>) -> QueueResult<()> {
        match &job.status {
            JobStatus::Canceled { .. } => return Err(QueueError::JobCanceled),
            status if status.is_terminal() => return Err(QueueError::JobAlreadyTerminal),
            _ => {}
        }

        if job.lease_token.as_ref() != Some(lease_token) {
            return Err(QueueError::InvalidLeaseToken);
        }

        if job.lease_expired(now) {
            return Err(QueueError::LeaseExpired);
        }

        Ok(())
    }

    /// Force a running job's lease to expire (test helper)
    pub fn force_lease_expiry(&self, job_id: &JobId) {
        let mut state = self.state.lock();
        if let Some(job) = state.jobs.get_mut(job_id) {
            let past = Utc::now() - chrono::Duration::seconds(1);
            if let JobStatus::Running { lease_until } = &mut job.status {
                *lease_until = past;
                job.lease_until = Some(past);
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId> {
        let job_id = JobId::new();
        let sequence = self.state.lock().next_sequence();
        let job = Job::new(job_id.clone(), message, self.settings.max_attempts, sequence);

        // Durable before visible
        self.store.save(&job).await?;

        {
            let mut state = self.state.lock();
            let key = self.ready_key(&job);
            state
                .ready
                .entry(job.job_type)
                .or_default()
                .insert(key, job_id.clone());
            state.jobs.insert(job_id.clone(), job.clone());
        }

        self.emit(JobEvent::Enqueued {
            job_id: job_id.clone(),
            job_type: job.job_type,
            at: job.created_at,
        });
        debug!("Stored job {} ({}) at sequence {}", job_id, job.job_type, sequence);

        Ok(job_id)
    }

    async fn dequeue(&self, kinds: &[JobType]) -> QueueResult<Option<LeasedJob>> {
        let now = Utc::now();
        let kinds: &[JobType] = if kinds.is_empty() { &JobType::ALL } else { kinds };

        let leased = {
            let mut state = self.state.lock();

            // Best eligible head across the requested kinds
            let mut best: Option<(ReadyKey, JobType)> = None;
            for kind in kinds {
                let Some(queue) = state.ready.get(kind) else {
                    continue;
                };
                let candidate = queue.iter().find_map(|(key, job_id)| {
                    state
                        .jobs
                        .get(job_id)
                        .filter(|job| job.is_eligible(now))
                        .map(|_| *key)
                });
                if let Some(key) = candidate {
                    if best.map_or(true, |(current, _)| key < current) {
                        best = Some((key, *kind));
                    }
                }
            }

            let Some((key, kind)) = best else {
                return Ok(None);
            };
            let lease_until = now
                .checked_add_signed(self.settings.lease_duration)
                .ok_or_else(|| {
                    QueueError::InvalidConfig("lease_duration overflows the clock".to_string())
                })?;

            let job_id = state
                .ready
                .get_mut(&kind)
                .and_then(|queue| queue.remove(&key))
                .ok_or_else(|| QueueError::Internal("ready queue changed under lock".to_string()))?;

            let lease_token = LeaseToken::new();
            let job = state.job_mut(&job_id)?;
            job.start(lease_token.clone(), lease_until);

            LeasedJob {
                job: job.clone(),
                lease_token,
                lease_until,
            }
        };

        self.emit(JobEvent::Leased {
            job_id: leased.job.id.clone(),
            attempt: leased.job.attempt,
            lease_until: leased.lease_until,
            at: now,
        });
        self.persist(&leased.job).await;

        Ok(Some(leased))
    }

    async fn ack_complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<Job> {
        let now = Utc::now();
        let job = {
            let mut state = self.state.lock();
            let job = state.job_mut(job_id)?;
            Self::check_lease(job, lease_token, now)?;
            job.succeed();
            job.clone()
        };

        self.emit(JobEvent::Succeeded {
            job_id: job_id.clone(),
            at: now,
        });
        self.persist(&job).await;

        Ok(job)
    }

    async fn ack_fail(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<Job> {
        let now = Utc::now();
        let (job, event) = {
            let mut state = self.state.lock();
            let sequence = state.next_sequence();
            let job = state.job_mut(job_id)?;
            Self::check_lease(job, lease_token, now)?;

            let event = match retry_at {
                // A requested cancel wins over another attempt
                Some(_) if job.cancel_requested => {
                    job.cancel();
                    JobEvent::Canceled {
                        job_id: job_id.clone(),
                        at: now,
                    }
                }
                Some(retry_at) if job.has_attempts_left() => {
                    job.retry(retry_at, error.clone(), sequence);
                    JobEvent::Retrying {
                        job_id: job_id.clone(),
                        attempt: job.attempt,
                        retry_at,
                        error,
                        at: now,
                    }
                }
                _ => {
                    job.fail(error.clone());
                    JobEvent::Failed {
                        job_id: job_id.clone(),
                        error,
                        at: now,
                    }
                }
            };

            let job = job.clone();
            if matches!(job.status, JobStatus::Pending) {
                let key = self.ready_key(&job);
                state
                    .ready
                    .entry(job.job_type)
                    .or_default()
                    .insert(key, job_id.clone());
            }
            (job, event)
        };

        self.emit(event);
        self.persist(&job).await;

        Ok(job)
    }

    async fn ack_canceled(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<Job> {
        let now = Utc::now();
        let job = {
            let mut state = self.state.lock();
            let job = state.job_mut(job_id)?;
            Self::check_lease(job, lease_token, now)?;
            job.cancel();
            job.clone()
        };

        self.emit(JobEvent::Canceled {
            job_id: job_id.clone(),
            at: now,
        });
        self.persist(&job).await;

        Ok(job)
    }

    async fn cancel(&self, job_id: &JobId) -> QueueResult<CancelOutcome> {
        let now = Utc::now();
        let (outcome, job) = {
            let mut state = self.state.lock();
            let job = state.job_mut(job_id)?;

            match job.status {
                JobStatus::Pending => {
                    let key = self.ready_key(job);
                    let kind = job.job_type;
                    job.cancel();
                    let job = job.clone();
                    if let Some(queue) = state.ready.get_mut(&kind) {
                        queue.remove(&key);
                    }
                    (CancelOutcome::Withdrawn, job)
                }
                JobStatus::Running { .. } => {
                    if job.cancel_requested {
                        return Ok(CancelOutcome::Requested);
                    }
                    job.request_cancel();
                    (CancelOutcome::Requested, job.clone())
                }
                _ => return Ok(CancelOutcome::AlreadyFinished),
            }
        };

        self.emit(match outcome {
            CancelOutcome::Withdrawn => JobEvent::Canceled {
                job_id: job_id.clone(),
                at: now,
            },
            _ => JobEvent::CancelRequested {
                job_id: job_id.clone(),
                at: now,
            },
        });
        self.persist(&job).await;

        Ok(outcome)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Job> {
        self.state
            .lock()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let mut reclaimed = Vec::new();
        let mut events = Vec::new();

        {
            let mut state = self.state.lock();
            let expired: Vec<JobId> = state
                .jobs
                .values()
                .filter(|job| job.lease_expired(now))
                .map(|job| job.id.clone())
                .collect();

            for job_id in expired {
                let sequence = state.next_sequence();
                let job = state.job_mut(&job_id)?;

                if job.cancel_requested {
                    job.cancel();
                    events.push(JobEvent::Canceled {
                        job_id: job_id.clone(),
                        at: now,
                    });
                } else if job.has_attempts_left() {
                    job.retry(now, "Lease expired".to_string(), sequence);
                    events.push(JobEvent::Retrying {
                        job_id: job_id.clone(),
                        attempt: job.attempt,
                        retry_at: now,
                        error: "Lease expired".to_string(),
                        at: now,
                    });
                } else {
                    let error = format!("Lease expired on final attempt {}", job.attempt);
                    job.fail(error.clone());
                    events.push(JobEvent::Failed {
                        job_id: job_id.clone(),
                        error,
                        at: now,
                    });
                }

                let job = job.clone();
                if matches!(job.status, JobStatus::Pending) {
                    let key = self.ready_key(&job);
                    state
                        .ready
                        .entry(job.job_type)
                        .or_default()
                        .insert(key, job_id.clone());
                }
                warn!("Reclaimed job {} after lease expiry, now {}", job_id, job.status.name());
                reclaimed.push(job);
            }
        }

        for event in events {
            self.emit(event);
        }
        for job in &reclaimed {
            self.persist(job).await;
        }

        Ok(reclaimed)
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<JobId>> {
        let purged: Vec<JobId> = {
            let mut state = self.state.lock();
            let expired: Vec<JobId> = state
                .jobs
                .values()
                .filter(|job| job.status.finished_at().map_or(false, |at| at < cutoff))
                .map(|job| job.id.clone())
                .collect();
            for job_id in &expired {
                state.jobs.remove(job_id);
            }
            expired
        };

        for job_id in &purged {
            self.store.remove(job_id).await?;
        }
        if !purged.is_empty() {
            debug!("Purged {} finished jobs", purged.len());
        }

        Ok(purged)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let state = self.state.lock();
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            stats.record(job.job_type, &job.status);
        }
        Ok(stats)
    }

    fn event_stream(&self) -> BoxStream<JobEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};

        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}
