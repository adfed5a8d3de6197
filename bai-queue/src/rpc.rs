//! Line-oriented JSON RPC.
//!
//! One request object per line, one response object per line:
//!
//! ```text
//! {"method":"enqueue","job_type":"email","payload":{"to":"a@x.com","template":"welcome"}}
//! {"ok":true,"id":"6f1c..."}
//! {"method":"status","id":"6f1c..."}
//! {"ok":true,"id":"6f1c...","job_type":"email","status":{"state":"pending"},"attempt":0,"max_attempts":3,"last_error":null}
//! {"method":"bogus"}
//! {"ok":false,"error":{"kind":"invalid_request","message":"..."}}
//! ```

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::service::QueueService;
use crate::{JobId, JobMessage, JobPayload, JobPriority, JobType, QueueError, QueueResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RpcRequest {
    Enqueue {
        job_type: JobType,
        payload: Value,
        #[serde(default)]
        priority: JobPriority,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    Status {
        id: JobId,
    },
    Cancel {
        id: JobId,
    },
    Stats,
}

/// Parse one request line, run it and render the response line
pub async fn handle_line(service: &QueueService, line: &str) -> String {
    let response = match serde_json::from_str::<RpcRequest>(line) {
        Ok(request) => handle_request(service, request).await,
        Err(e) => error_response("invalid_request", &e.to_string()),
    };
    response.to_string()
}

pub async fn handle_request(service: &QueueService, request: RpcRequest) -> Value {
    debug!("RPC request: {:?}", request);
    match dispatch(service, request).await {
        Ok(body) => body,
        Err(e) => error_response(e.kind(), &e.to_string()),
    }
}

async fn dispatch(service: &QueueService, request: RpcRequest) -> QueueResult<Value> {
    match request {
        RpcRequest::Enqueue {
            job_type,
            payload,
            priority,
            max_attempts,
        } => {
            let payload = JobPayload::from_json(job_type, payload)?;
            let mut message = JobMessage::new(job_type, payload).with_priority(priority);
            if let Some(max_attempts) = max_attempts {
                message = message.with_max_attempts(max_attempts);
            }
            let id = service.enqueue(message).await?;
            Ok(json!({ "ok": true, "id": id }))
        }
        RpcRequest::Status { id } => {
            let job = service.job(&id).await?;
            Ok(json!({
                "ok": true,
                "id": job.id,
                "job_type": job.job_type,
                "status": job.status,
                "attempt": job.attempt,
                "max_attempts": job.max_attempts,
                "last_error": job.last_error,
            }))
        }
        RpcRequest::Cancel { id } => {
            let outcome = service.cancel(&id).await?;
            Ok(json!({ "ok": true, "id": id, "outcome": outcome }))
        }
        RpcRequest::Stats => {
            let stats = service.stats().await?;
            let metrics = service.metrics();
            Ok(json!({
                "ok": true,
                "stats": serde_json::to_value(stats).map_err(QueueError::from)?,
                "metrics": serde_json::to_value(metrics).map_err(QueueError::from)?,
            }))
        }
    }
}

fn error_response(kind: &str, message: &str) -> Value {
    json!({
        "ok": false,
        "error": { "kind": kind, "message": message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enqueue_with_defaults() {
        let request: RpcRequest = serde_json::from_str(
            r#"{"method":"enqueue","job_type":"import","payload":{"source":"s3://bucket/a.csv"}}"#,
        )
        .unwrap();

        match request {
            RpcRequest::Enqueue {
                job_type,
                priority,
                max_attempts,
                ..
            } => {
                assert_eq!(job_type, JobType::Import);
                assert_eq!(priority, JobPriority::Normal);
                assert_eq!(max_attempts, None);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn parses_stats_without_fields() {
        let request: RpcRequest = serde_json::from_str(r#"{"method":"stats"}"#).unwrap();
        assert_eq!(request, RpcRequest::Stats);
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(serde_json::from_str::<RpcRequest>(r#"{"method":"drop_all"}"#).is_err());
    }
}
