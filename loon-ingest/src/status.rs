//! Task lifecycle states and the status record clients poll.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known state of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEntry {
    pub id: TaskId,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured result, e.g. the keys written by a successful task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StatusEntry {
    pub fn queued(id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: TaskState::Queued,
            message: None,
            detail: None,
            submitted_at: now,
            updated_at: now,
        }
    }
}

/// A state change to apply to a ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub state: TaskState,
    pub message: Option<String>,
    pub detail: Option<serde_json::Value>,
}

impl StatusUpdate {
    pub fn running() -> Self {
        Self {
            state: TaskState::Running,
            message: None,
            detail: None,
        }
    }

    pub fn succeeded(detail: serde_json::Value) -> Self {
        Self {
            state: TaskState::Succeeded,
            message: Some("success".to_string()),
            detail: Some(detail),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failed,
            message: Some(message.into()),
            detail: None,
        }
    }
}
