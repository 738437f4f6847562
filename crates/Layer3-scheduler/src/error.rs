//! Scheduler errors
//!
//! `PlanParse` aborts the whole task. The others stay inside one subtask's
//! outcome.

use crate::task::TaskStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("No worker registered for role: {0}")]
    WorkerNotFound(String),

    #[error("Dependency failed: {0}")]
    DependencyFailed(String),

    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error(transparent)]
    Foundation(#[from] warden_foundation::Error),
}

impl From<SchedulerError> for warden_foundation::Error {
    fn from(err: SchedulerError) -> Self {
        use warden_foundation::Error;

        match err {
            SchedulerError::PlanParse(msg) => Error::PlanParse(msg),
            SchedulerError::WorkerNotFound(role) => Error::WorkerNotFound(role),
            SchedulerError::DependencyFailed(msg) => Error::DependencyFailed(msg),
            SchedulerError::InvalidTransition { from, to } => Error::invalid_transition(from, to),
            SchedulerError::TaskNotFound(id) => Error::NotFound(format!("task {}", id)),
            SchedulerError::Foundation(e) => e,
        }
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
