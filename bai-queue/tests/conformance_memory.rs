use std::time::Duration;

use chrono::Utc;
use tokio_stream::StreamExt;

use bai_queue::{
    backend::{memory::MemoryBackend, BoxStream, CancelOutcome, QueueBackend},
    EmailJobData, GenericJobData, ImportJobData, JobEvent, JobMessage, JobPriority, JobStatus,
    JobType, LeaseToken, QueueConfig, QueueError, VectorizationJobData,
};

/// Test factory functions
fn create_backend() -> MemoryBackend {
    MemoryBackend::new(&QueueConfig::default())
}

fn create_email_message() -> JobMessage {
    JobMessage::typed(EmailJobData::new("a@x.com", "welcome"))
}

fn create_job_with_priority(priority: JobPriority) -> JobMessage {
    create_email_message().with_priority(priority)
}

async fn receive_next_event(stream: &mut BoxStream<JobEvent>) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended")
}

/// A1. Dequeue Leases Atomically
#[tokio::test]
async fn test_dequeue_leases_atomically() {
    let backend = create_backend();

    // Arrange: enqueue one job
    let job_id = backend.enqueue(create_email_message()).await.unwrap();

    // Act: dequeue
    let leased = backend.dequeue(&[]).await.unwrap().unwrap();

    // Assert: atomic lease assignment
    assert_eq!(leased.job.id, job_id);
    assert!(!leased.lease_token.as_str().is_empty());
    assert!(leased.lease_until > Utc::now());

    let status = backend.status(&job_id).await.unwrap();
    assert!(matches!(status, JobStatus::Running { .. }));

    let job = backend.get(&job_id).await.unwrap();
    assert_eq!(job.lease_token, Some(leased.lease_token));
    assert_eq!(job.lease_until, Some(leased.lease_until));
    assert_eq!(job.attempt, 1);
}

/// A2. Only Lease Holder Can Ack
#[tokio::test]
async fn test_only_lease_holder_can_ack() {
    let backend = create_backend();
    let job_id = backend.enqueue(create_email_message()).await.unwrap();
    let leased = backend.dequeue(&[]).await.unwrap().unwrap();

    let wrong = backend.ack_complete(&job_id, &LeaseToken::new()).await;
    assert_eq!(wrong.unwrap_err(), QueueError::InvalidLeaseToken);

    let right = backend.ack_complete(&job_id, &leased.lease_token).await.unwrap();
    assert!(matches!(right.status, JobStatus::Succeeded { .. }));
}

/// A3. Lease Expiry Race → LeaseExpired
#[tokio::test]
async fn test_lease_expiry_race() {
    let backend = create_backend();
    let job_id = backend.enqueue(create_email_message()).await.unwrap();
    let leased = backend.dequeue(&[]).await.unwrap().unwrap();

    backend.force_lease_expiry(&job_id);

    let result = backend.ack_complete(&job_id, &leased.lease_token).await;
    assert_eq!(result.unwrap_err(), QueueError::LeaseExpired);
}

/// A4. Expired Lease Becomes Eligible Again
#[tokio::test]
async fn test_expired_lease_becomes_eligible_again() {
    let backend = create_backend();
    let job_id = backend.enqueue(create_email_message()).await.unwrap();
    let first = backend.dequeue(&[]).await.unwrap().unwrap();

    backend.force_lease_expiry(&job_id);
    let reclaimed = backend.reclaim_expired(Utc::now()).await.unwrap();
    assert_eq!(reclaimed.len(), 1);

    let second = backend.dequeue(&[]).await.unwrap().unwrap();
    assert_eq!(second.job.id, job_id);
    assert_ne!(second.lease_token, first.lease_token);
    assert_eq!(second.job.last_error.as_deref(), Some("Lease expired"));
}

/// B1. At-Most-Once Completion Transition
#[tokio::test]
async fn test_at_most_once_completion_transition() {
    let backend = create_backend();
    let job_id = backend.enqueue(create_email_message()).await.unwrap();
    let leased = backend.dequeue(&[]).await.unwrap().unwrap();

    backend.ack_complete(&job_id, &leased.lease_token).await.unwrap();

    let again = backend.ack_complete(&job_id, &leased.lease_token).await;
    assert_eq!(again.unwrap_err(), QueueError::JobAlreadyTerminal);

    let fail = backend
        .ack_fail(&job_id, &leased.lease_token, "late".into(), None)
        .await;
    assert_eq!(fail.unwrap_err(), QueueError::JobAlreadyTerminal);
}

/// C1. Withdrawn Job Rejects Late Acks
#[tokio::test]
async fn test_withdrawn_job_rejects_late_acks() {
    let backend = create_backend();
    let job_id = backend.enqueue(create_email_message()).await.unwrap();
    let leased = backend.dequeue(&[]).await.unwrap().unwrap();

    assert_eq!(backend.cancel(&job_id).await.unwrap(), CancelOutcome::Requested);
    backend.ack_canceled(&job_id, &leased.lease_token).await.unwrap();

    let late = backend.ack_complete(&job_id, &leased.lease_token).await;
    assert_eq!(late.unwrap_err(), QueueError::JobCanceled);
}

/// C2. Cancel Request Expires Into Canceled
#[tokio::test]
async fn test_cancel_request_honored_by_reclaim() {
    let backend = create_backend();
    let job_id = backend.enqueue(create_email_message()).await.unwrap();
    backend.dequeue(&[]).await.unwrap().unwrap();

    backend.cancel(&job_id).await.unwrap();
    backend.force_lease_expiry(&job_id);
    backend.reclaim_expired(Utc::now()).await.unwrap();

    assert!(matches!(backend.status(&job_id).await.unwrap(), JobStatus::Canceled { .. }));
    assert!(backend.dequeue(&[]).await.unwrap().is_none());
}

/// D1. Retryable Error Schedules Retry
#[tokio::test]
async fn test_retryable_error_schedules_retry() {
    let backend = create_backend();
    let job_id = backend.enqueue(create_email_message()).await.unwrap();
    let leased = backend.dequeue(&[]).await.unwrap().unwrap();

    let retry_at = Utc::now() + chrono::Duration::seconds(60);
    let job = backend
        .ack_fail(&job_id, &leased.lease_token, "smtp timeout".into(), Some(retry_at))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.available_at, retry_at);
    assert_eq!(job.last_error.as_deref(), Some("smtp timeout"));

    // Not eligible before retry_at
    assert!(backend.dequeue(&[]).await.unwrap().is_none());
}

/// D2. Retry Request On Final Attempt Fails The Job
#[tokio::test]
async fn test_retry_on_final_attempt_fails() {
    let backend = create_backend();
    let job_id = backend
        .enqueue(create_email_message().with_max_attempts(1))
        .await
        .unwrap();
    let leased = backend.dequeue(&[]).await.unwrap().unwrap();

    let job = backend
        .ack_fail(&job_id, &leased.lease_token, "boom".into(), Some(Utc::now()))
        .await
        .unwrap();
    assert!(matches!(job.status, JobStatus::Failed { ref error, .. } if error == "boom"));
}

/// F1. Priority Then FIFO
#[tokio::test]
async fn test_priority_then_fifo_ordering() {
    let backend = create_backend();

    let low = backend.enqueue(create_job_with_priority(JobPriority::Low)).await.unwrap();
    let normal_1 = backend.enqueue(create_job_with_priority(JobPriority::Normal)).await.unwrap();
    let critical = backend.enqueue(create_job_with_priority(JobPriority::Critical)).await.unwrap();
    let normal_2 = backend.enqueue(create_job_with_priority(JobPriority::Normal)).await.unwrap();
    let high = backend.enqueue(create_job_with_priority(JobPriority::High)).await.unwrap();

    let mut order = Vec::new();
    while let Some(leased) = backend.dequeue(&[]).await.unwrap() {
        order.push(leased.job.id);
    }

    assert_eq!(order, vec![critical, high, normal_1, normal_2, low]);
}

/// F2. Kind Filter Respects Ordering Across Kinds
#[tokio::test]
async fn test_kind_filter() {
    let backend = create_backend();

    let import = backend
        .enqueue(JobMessage::typed(ImportJobData::new("upload-7")))
        .await
        .unwrap();
    let generic = backend
        .enqueue(JobMessage::typed(GenericJobData::new("reindex", serde_json::json!({}))))
        .await
        .unwrap();
    let vectorization = backend
        .enqueue(JobMessage::typed(VectorizationJobData::new("doc-1")))
        .await
        .unwrap();

    let kinds = [JobType::Vectorization, JobType::Import];
    assert_eq!(backend.dequeue(&kinds).await.unwrap().unwrap().job.id, import);
    assert_eq!(backend.dequeue(&kinds).await.unwrap().unwrap().job.id, vectorization);
    assert!(backend.dequeue(&kinds).await.unwrap().is_none());
    assert_eq!(backend.dequeue(&[]).await.unwrap().unwrap().job.id, generic);
}

/// G1. Emits Enqueued Event
#[tokio::test]
async fn test_emits_enqueued_event() {
    let backend = create_backend();
    let mut events = backend.event_stream();

    let job_id = backend.enqueue(create_email_message()).await.unwrap();

    match receive_next_event(&mut events).await {
        JobEvent::Enqueued {
            job_id: event_id,
            job_type,
            ..
        } => {
            assert_eq!(event_id, job_id);
            assert_eq!(job_type, JobType::Email);
        }
        other => panic!("Expected Enqueued event, got {:?}", other),
    }
}

/// G2. Emits Lifecycle Events
#[tokio::test]
async fn test_emits_lifecycle_events() {
    let backend = create_backend();
    let mut events = backend.event_stream();

    let job_id = backend.enqueue(create_email_message()).await.unwrap();
    let leased = backend.dequeue(&[]).await.unwrap().unwrap();
    backend
        .ack_fail(&job_id, &leased.lease_token, "flaky".into(), Some(Utc::now()))
        .await
        .unwrap();
    let leased = backend.dequeue(&[]).await.unwrap().unwrap();
    backend.ack_complete(&job_id, &leased.lease_token).await.unwrap();

    let names: Vec<&str> = {
        let mut names = Vec::new();
        for _ in 0..5 {
            let event = receive_next_event(&mut events).await;
            assert_eq!(event.job_id(), &job_id);
            names.push(event.event_name());
        }
        names
    };

    assert_eq!(names, vec!["enqueued", "leased", "retrying", "leased", "succeeded"]);
}
