//! Admin endpoints: reindex submission, task inspection, cluster health.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_ops::{
    AsyncOperation, AsyncOperationService, AsyncOperationStore, SubmitOutcome, TaskStatus,
};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Message, TaskId, TenantId, TxnId, message_types, properties};
use indexing::{ReindexFlags, ReindexTask};
use messaging::{Broker, ConsumerConfig, ReliableProducer, broadcast_request};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ApiError;

/// Topic on which every node answers health probes.
pub const HEALTH_TOPIC: &str = "repo.health";

/// Replies are collected for at most this long regardless of the request.
const MAX_BROADCAST_WAIT: Duration = Duration::from_secs(10);

/// Shared state for all admin handlers.
pub struct AppState<S: AsyncOperationStore> {
    pub async_ops: AsyncOperationService<S>,
    pub producer: Arc<ReliableProducer>,
    pub broker: Arc<dyn Broker>,
    pub channels: ConsumerConfig,
    pub config: Config,
}

#[derive(Debug, Deserialize)]
pub struct ReindexBody {
    pub tenant: String,
    /// Explicit transaction ids; takes precedence over the time range.
    pub tx_ids: Option<Vec<i64>>,
    /// Wire-form flag mask, e.g. `"1010"`.
    pub flags: Option<String>,
    pub completed: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub block_size: Option<u32>,
    pub priority: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: Option<String>,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        Self {
            task_id: outcome.task_id.map(|id| id.to_string()),
            status: outcome.status,
            error: outcome.error,
        }
    }
}

/// POST /admin/reindex — enqueues a tracked reindex.
///
/// Either `tx_ids` or a `from`/`to` time range selects the work. The reply
/// carries the task id to poll; enqueue failures surface as a terminal
/// `FAILED` handle rather than an error status.
#[tracing::instrument(skip(state, body), fields(tenant = %body.tenant))]
pub async fn reindex<S: AsyncOperationStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(body): Json<ReindexBody>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let tenant = TenantId::new(body.tenant.clone());
    let (destination, message, attributes) = build_reindex(&state.channels, &body)?;

    metrics::counter!("admin_reindex_requests").increment(1);
    let outcome = state
        .async_ops
        .submit(
            &*state.producer,
            &destination,
            message,
            &tenant,
            true,
            attributes,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(outcome.into())))
}

fn build_reindex(
    channels: &ConsumerConfig,
    body: &ReindexBody,
) -> Result<(String, Message, HashMap<String, serde_json::Value>), ApiError> {
    let flags = match &body.flags {
        Some(wire) => ReindexFlags::from_wire(wire)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => ReindexFlags::default(),
    };

    if let Some(tx_ids) = &body.tx_ids {
        if tx_ids.is_empty() {
            return Err(ApiError::BadRequest("tx_ids must not be empty".to_string()));
        }
        let priority = body.priority.unwrap_or(0);
        let task = ReindexTask::new(
            TenantId::new(body.tenant.clone()),
            tx_ids.iter().copied().map(TxnId::new).collect(),
        )
        .with_flags(flags)
        .with_completed(body.completed.unwrap_or(true))
        .with_priority(priority);
        let destination = channel_destination(channels, priority)?;
        let attributes = HashMap::from([
            ("request".to_string(), serde_json::json!("reindex")),
            ("txCount".to_string(), serde_json::json!(tx_ids.len())),
        ]);
        return Ok((destination, task.to_message(), attributes));
    }

    let (Some(from), Some(to)) = (body.from, body.to) else {
        return Err(ApiError::BadRequest(
            "either tx_ids or a from/to time range is required".to_string(),
        ));
    };
    if from > to {
        return Err(ApiError::BadRequest(
            "from must not be later than to".to_string(),
        ));
    }

    let mut message = Message::new(message_types::REINDEX_RANGE)
        .with_property(properties::TENANT, body.tenant.clone())
        .with_property(properties::FLAGS, flags.to_wire())
        .with_property("fromTime", from.to_rfc3339())
        .with_property("toTime", to.to_rfc3339());
    if let Some(block_size) = body.block_size {
        message = message.with_property("blockSize", block_size.to_string());
    }
    let destination = channel_destination(channels, body.priority.unwrap_or(0))?;
    let attributes = HashMap::from([
        ("request".to_string(), serde_json::json!("reindex-range")),
    ]);
    Ok((destination, message, attributes))
}

fn channel_destination(channels: &ConsumerConfig, priority: u8) -> Result<String, ApiError> {
    channels
        .channel_for_priority(priority)
        .map(|c| c.destination.clone())
        .ok_or_else(|| ApiError::Internal("no consumer channels configured".to_string()))
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub tenant: String,
    pub status: TaskStatus,
    pub attributes: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AsyncOperation> for TaskResponse {
    fn from(op: AsyncOperation) -> Self {
        Self {
            task_id: op.task_id.to_string(),
            tenant: op.tenant.to_string(),
            status: op.status,
            attributes: op.attributes,
            created_at: op.created_at,
            updated_at: op.updated_at,
        }
    }
}

/// GET /admin/tasks/{id} — returns the tracked operation.
pub async fn get_task<S: AsyncOperationStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task_id = TaskId::new(id);
    match state.async_ops.get_task(&task_id).await? {
        Some(op) => Ok(Json(op.into())),
        None => Err(ApiError::NotFound(format!("Task not found: {task_id}"))),
    }
}

/// DELETE /admin/tasks/{id} — removes a terminal operation.
pub async fn delete_task<S: AsyncOperationStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let task_id = TaskId::new(id);
    state
        .async_ops
        .remove_task(&task_id, None::<fn(&AsyncOperation) -> bool>)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct BroadcastBody {
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub nodes: usize,
    pub replies: Vec<HashMap<String, String>>,
}

/// POST /admin/health/broadcast — pings every node and collects replies
/// for a bounded window.
#[tracing::instrument(skip(state, body))]
pub async fn health_broadcast<S: AsyncOperationStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(body): Json<BroadcastBody>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let wait = body
        .wait_ms
        .map(Duration::from_millis)
        .unwrap_or(state.config.broadcast_wait)
        .min(MAX_BROADCAST_WAIT);

    let request = Message::new(message_types::EVENT).with_property("action", "ping");
    let replies = broadcast_request(state.broker.as_ref(), HEALTH_TOPIC, request, wait).await?;
    Ok(Json(BroadcastResponse {
        nodes: replies.len(),
        replies: replies.into_iter().map(|m| m.properties).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(tenant: &str) -> ReindexBody {
        ReindexBody {
            tenant: tenant.to_string(),
            tx_ids: None,
            flags: None,
            completed: None,
            from: None,
            to: None,
            block_size: None,
            priority: None,
        }
    }

    #[test]
    fn tx_ids_build_a_reindex_task_message() {
        let request = ReindexBody {
            tx_ids: Some(vec![1, 2]),
            priority: Some(7),
            ..body("acme")
        };
        let (destination, message, _) =
            build_reindex(&ConsumerConfig::default(), &request).unwrap();

        assert_eq!(destination, "index.high");
        assert_eq!(message.message_type, message_types::REINDEX);
        assert_eq!(message.property(properties::TX), Some("1,2"));
        assert_eq!(message.priority, Some(7));
    }

    #[test]
    fn time_range_builds_a_range_message() {
        let request = ReindexBody {
            from: Some(Utc::now() - chrono::Duration::hours(1)),
            to: Some(Utc::now()),
            block_size: Some(50),
            ..body("acme")
        };
        let (destination, message, _) =
            build_reindex(&ConsumerConfig::default(), &request).unwrap();

        assert_eq!(destination, "index.default");
        assert_eq!(message.message_type, message_types::REINDEX_RANGE);
        assert!(message.property("fromTime").is_some());
        assert_eq!(message.property("blockSize"), Some("50"));
    }

    #[test]
    fn missing_selection_is_rejected() {
        let result = build_reindex(&ConsumerConfig::default(), &body("acme"));
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let request = ReindexBody {
            from: Some(Utc::now()),
            to: Some(Utc::now() - chrono::Duration::hours(1)),
            ..body("acme")
        };
        let result = build_reindex(&ConsumerConfig::default(), &request);
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn malformed_flags_are_rejected() {
        let request = ReindexBody {
            tx_ids: Some(vec![1]),
            flags: Some("10".to_string()),
            ..body("acme")
        };
        let result = build_reindex(&ConsumerConfig::default(), &request);
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
