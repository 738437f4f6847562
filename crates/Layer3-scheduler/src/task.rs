//! Task definition and lifecycle
//!
//! ```text
//! PENDING ──► IN_PROGRESS ──► COMPLETED
//!    │             │     └──► FAILED
//!    └─────────────┴────────► CANCELLED
//! ```
//!
//! `started_at` is stamped on the first entry into `IN_PROGRESS`,
//! `completed_at` on entry into `COMPLETED`, `FAILED` or `CANCELLED`.
//! Anything else is rejected.

use crate::error::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use warden_foundation::TaskRecord;

// ============================================================================
// Status / Priority
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Pending, Cancelled)
                | (InProgress, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(warden_foundation::Error::InvalidInput(format!(
                "unknown task status: {}",
                other
            ))
            .into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = SchedulerError;

    /// Case-insensitive; models are not consistent about it
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            other => Err(warden_foundation::Error::InvalidInput(format!(
                "unknown task priority: {}",
                other
            ))
            .into()),
        }
    }
}

// ============================================================================
// Task
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub parent_id: Option<String>,
    /// Principal the root task belongs to; subtasks inherit it
    pub owner: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Ids of sibling subtasks that must succeed first
    pub dependencies: Vec<String>,
    pub subtasks: Vec<String>,
    pub assigned_role: Option<String>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// New root task owned by `owner`
    pub fn new(owner: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            owner: owner.into(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            dependencies: Vec::new(),
            subtasks: Vec::new(),
            assigned_role: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Subtask of `parent`. The id is `<parent>/<local>` so plan ids stay
    /// unique across runs.
    pub fn subtask(parent: &Task, local_id: &str, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id: Self::subtask_id(&parent.id, local_id),
            parent_id: Some(parent.id.clone()),
            owner: parent.owner.clone(),
            title: local_id.to_string(),
            description,
            ..Self::new(parent.owner.clone(), "", "")
        }
    }

    pub fn subtask_id(parent_id: &str, local_id: &str) -> String {
        format!("{}/{}", parent_id, local_id)
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.assigned_role = Some(role.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    pub fn transition(&mut self, next: TaskStatus) -> SchedulerResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            TaskStatus::InProgress => {
                self.started_at.get_or_insert(now);
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                self.completed_at.get_or_insert(now);
            }
            TaskStatus::Cancelled | TaskStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> SchedulerResult<()> {
        self.transition(TaskStatus::InProgress)
    }

    pub fn complete(&mut self, result: Value) -> SchedulerResult<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, result: Value) -> SchedulerResult<()> {
        self.transition(TaskStatus::Failed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn cancel(&mut self, result: Option<Value>) -> SchedulerResult<()> {
        self.transition(TaskStatus::Cancelled)?;
        if result.is_some() {
            self.result = result;
        }
        Ok(())
    }

    // ========================================================================
    // Persistence mapping
    // ========================================================================

    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            owner: self.owner.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status.as_str().to_string(),
            priority: self.priority.as_str().to_string(),
            dependencies: self.dependencies.clone(),
            subtasks: self.subtasks.clone(),
            assigned_role: self.assigned_role.clone(),
            result: self.result.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    pub fn from_record(record: TaskRecord) -> SchedulerResult<Self> {
        Ok(Self {
            status: record.status.parse()?,
            priority: record.priority.parse()?,
            id: record.id,
            parent_id: record.parent_id,
            owner: record.owner,
            title: record.title,
            description: record.description,
            dependencies: record.dependencies,
            subtasks: record.subtasks,
            assigned_role: record.assigned_role,
            result: record.result,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        })
    }
}
