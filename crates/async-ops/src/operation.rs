use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{TaskId, TenantId};
use serde::{Deserialize, Serialize};

use crate::error::AsyncOpError;

/// Status of an asynchronous operation.
///
/// `Submitted → Running → {Success, Failed}`; the terminal states absorb,
/// any further transition is a precondition failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Registered, not picked up yet.
    Submitted,
    /// A worker is executing the task.
    Running,
    /// Finished successfully. Terminal.
    Success,
    /// Finished with an error. Terminal.
    Failed,
}

impl TaskStatus {
    /// Returns true for `Success` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Returns the wire/storage form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = AsyncOpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(TaskStatus::Submitted),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(AsyncOpError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One tracked asynchronous operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncOperation {
    /// Tenant the operation belongs to.
    pub tenant: TenantId,
    /// Caller-visible task identifier.
    pub task_id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Arbitrary feedback attributes, merged on completion.
    pub attributes: HashMap<String, serde_json::Value>,
    /// When the operation was registered.
    pub created_at: DateTime<Utc>,
    /// When the operation was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AsyncOperation {
    /// Creates a freshly submitted operation.
    pub fn submitted(
        tenant: TenantId,
        task_id: TaskId,
        attributes: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant,
            task_id,
            status: TaskStatus::Submitted,
            attributes,
            created_at: now,
            updated_at: now,
        }
    }
}
