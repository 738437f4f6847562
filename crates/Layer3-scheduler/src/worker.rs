//! Worker contract and role registry
//!
//! One worker per role for the lifetime of a registry. No load balancing.

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::Task;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use warden_foundation::{Principal, Result};

/// What a worker reports back for one subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WorkerResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Executes subtasks for one role.
///
/// `principal` is the owner of the root task; tool calls made on its behalf
/// are authorized against it.
#[async_trait]
pub trait Worker: Send + Sync {
    fn role(&self) -> &str;

    /// What the role is good at; shown to the planner next to the role name
    fn description(&self) -> &str;

    /// An `Err` is recorded as a failed subtask, never as a failed run
    async fn execute_task(&self, task: &Task, principal: &Principal) -> Result<WorkerResult>;
}

#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the worker's own role, replacing any previous one
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.role().to_string(), worker);
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, role: &str) -> SchedulerResult<Arc<dyn Worker>> {
        self.workers
            .get(role)
            .cloned()
            .ok_or_else(|| SchedulerError::WorkerNotFound(role.to_string()))
    }

    pub fn roles(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }

    /// `(role, description)` for every registered worker, by role
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        self.workers
            .iter()
            .map(|(role, worker)| (role.as_str(), worker.description()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl Worker for Fixed {
        fn role(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "fixed reply"
        }

        async fn execute_task(&self, _task: &Task, _principal: &Principal) -> Result<WorkerResult> {
            Ok(WorkerResult::success(self.0))
        }
    }

    #[tokio::test]
    async fn test_lookup_by_role() {
        let registry = WorkerRegistry::new()
            .with_worker(Arc::new(Fixed("coder")))
            .with_worker(Arc::new(Fixed("security")));

        assert_eq!(registry.roles(), vec!["coder", "security"]);
        assert_eq!(
            registry.descriptions(),
            vec![("coder", "fixed reply"), ("security", "fixed reply")]
        );

        let worker = registry.get("coder").unwrap();
        let task = Task::new("alice", "t", "d");
        let result = worker
            .execute_task(&task, &Principal::new("alice"))
            .await
            .unwrap();
        assert_eq!(result.message, "coder");
    }

    #[test]
    fn test_missing_role_is_worker_not_found() {
        let registry = WorkerRegistry::new();
        assert!(matches!(
            registry.get("designer"),
            Err(SchedulerError::WorkerNotFound(role)) if role == "designer"
        ));
    }
}
