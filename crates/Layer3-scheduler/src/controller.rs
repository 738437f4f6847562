//! Controller
//!
//! ```text
//! root task ──► decompose (1 model call) ──► Plan
//!                                              │
//!          ┌───────────────────────────────────┘
//!          ▼
//!   independent subtasks (concurrent, bounded)
//!          │
//!          ▼
//!   dependent waves: every subtask whose dependencies are all terminal,
//!   fewest dependencies first; eligible ones run concurrently, the rest
//!   are skipped
//!          │
//!          ▼
//!   synthesize (1 model call, local summary on failure)
//! ```

use crate::error::{SchedulerError, SchedulerResult};
use crate::plan::{planning_prompt, Plan, PlannedSubtask};
use crate::store::TaskStore;
use crate::task::{Task, TaskStatus};
use crate::worker::{WorkerRegistry, WorkerResult};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_foundation::{
    AuditCategory, AuditDecision, AuditEntry, AuditSink, CompletionOptions, Error, Message,
    Principal, ReasoningModel, SchedulerSettings,
};

const SYNTHESIS_PROMPT: &str = "You write the final answer for a task that was split into \
subtasks. Summarize what was done, what failed or was skipped, and the result. Be concise.";

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskState {
    Completed,
    Failed,
    /// A dependency failed or was skipped; never dispatched
    Skipped,
    /// Cancellation arrived before dispatch
    Cancelled,
}

impl SubtaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskOutcome {
    /// Id from the plan
    pub id: String,
    /// Stored task id
    pub task_id: String,
    pub role: String,
    pub state: SubtaskState,
    pub message: String,
    pub data: Option<Value>,
}

impl SubtaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == SubtaskState::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub task_id: String,
    pub plan: Plan,
    /// Every subtask succeeded
    pub success: bool,
    pub cancelled: bool,
    pub answer: String,
    /// In plan order
    pub subtasks: Vec<SubtaskOutcome>,
}

impl TaskOutcome {
    pub fn subtask(&self, id: &str) -> Option<&SubtaskOutcome> {
        self.subtasks.iter().find(|s| s.id == id)
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct Controller {
    model: Arc<dyn ReasoningModel>,
    workers: WorkerRegistry,
    store: Arc<dyn TaskStore>,
    settings: SchedulerSettings,
    audit: Option<Arc<dyn AuditSink>>,
    history: Mutex<Vec<Message>>,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl Controller {
    pub fn new(
        model: Arc<dyn ReasoningModel>,
        workers: WorkerRegistry,
        store: Arc<dyn TaskStore>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            model,
            workers,
            store,
            settings,
            audit: None,
            history: Mutex::new(Vec::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    /// Dispatches and results of every run so far
    pub fn history(&self) -> Vec<Message> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    pub fn task(&self, id: &str) -> SchedulerResult<Option<Task>> {
        Ok(self.store.get(id)?)
    }

    pub fn subtasks(&self, parent_id: &str) -> SchedulerResult<Vec<Task>> {
        Ok(self.store.subtasks(parent_id)?)
    }

    /// Delete a root task and its subtasks
    pub fn remove_task(&self, id: &str) -> SchedulerResult<()> {
        let task = self
            .store
            .get(id)?
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))?;
        if !task.is_root() {
            return Err(Error::InvalidInput(
                "subtasks are removed together with their parent".to_string(),
            )
            .into());
        }
        self.store.delete(id)?;
        Ok(())
    }

    /// Stop dispatching for a running task. In-flight subtasks finish on
    /// their own. `false` when no run with that id is active.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.running.lock().get(task_id) {
            Some(token) => {
                info!(task_id, "Cancelling task");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Create a root task for `principal` and run it
    pub async fn execute(
        &self,
        principal: &Principal,
        title: &str,
        description: &str,
    ) -> SchedulerResult<TaskOutcome> {
        self.run(principal, Task::new(&principal.id, title, description))
            .await
    }

    /// Decompose, dispatch and synthesize one root task
    pub async fn run(&self, principal: &Principal, mut root: Task) -> SchedulerResult<TaskOutcome> {
        let token = CancellationToken::new();
        self.running.lock().insert(root.id.clone(), token.clone());

        let result = self.drive(principal, &mut root, &token).await;
        self.running.lock().remove(&root.id);

        if let Err(e) = &result {
            error!(task_id = %root.id, user = %principal.id, error = %e, "Task aborted");
            if !root.status.is_terminal() {
                let failed = json!({"success": false, "error": e.to_string()});
                let marked = if root.status == TaskStatus::Pending {
                    root.start().and_then(|_| root.fail(failed))
                } else {
                    root.fail(failed)
                };
                if let Err(te) = marked {
                    warn!(task_id = %root.id, error = %te, "Could not mark task failed");
                }
                self.persist(&root);
            }
            self.audit_task(&root, principal, AuditDecision::Error, &e.to_string())
                .await;
        }

        result
    }

    async fn drive(
        &self,
        principal: &Principal,
        root: &mut Task,
        token: &CancellationToken,
    ) -> SchedulerResult<TaskOutcome> {
        root.start()?;
        self.store.save(root)?;
        info!(task_id = %root.id, user = %principal.id, title = %root.title, "Task started");

        let plan = self.decompose(root).await?;
        info!(
            task_id = %root.id,
            plan = %plan.name,
            subtasks = plan.subtasks.len(),
            "Plan accepted"
        );

        let mut tasks = HashMap::with_capacity(plan.subtasks.len());
        for planned in &plan.subtasks {
            let task = Task::subtask(root, &planned.id, &planned.description)
                .with_role(&planned.assigned_role)
                .with_priority(planned.priority)
                .with_dependencies(
                    planned
                        .dependencies
                        .iter()
                        .map(|d| Task::subtask_id(&root.id, d))
                        .collect(),
                );
            self.store.save(&task)?;
            root.subtasks.push(task.id.clone());
            tasks.insert(planned.id.clone(), task);
        }
        self.store.save(root)?;

        let outcomes = self.execute_plan(principal, &plan, tasks, token).await;
        let success = outcomes.iter().all(SubtaskOutcome::succeeded);
        let cancelled = token.is_cancelled();
        let answer = self.synthesize(root, &plan, &outcomes).await;

        let result = json!({
            "success": success,
            "answer": answer,
            "plan": plan.name,
            "subtasks": outcomes,
        });
        if cancelled {
            root.cancel(Some(result))?;
        } else if success {
            root.complete(result)?;
        } else {
            root.fail(result)?;
        }
        self.store.save(root)?;

        let decision = if success {
            AuditDecision::Success
        } else {
            AuditDecision::Failure
        };
        self.audit_task(root, principal, decision, root.status.as_str())
            .await;
        info!(task_id = %root.id, success, cancelled, "Task finished");

        Ok(TaskOutcome {
            task_id: root.id.clone(),
            plan,
            success,
            cancelled,
            answer,
            subtasks: outcomes,
        })
    }

    // ========================================================================
    // Decomposition
    // ========================================================================

    async fn decompose(&self, root: &Task) -> SchedulerResult<Plan> {
        let roles = self.workers.descriptions();
        let options = CompletionOptions::default()
            .with_system_prompt(planning_prompt(&roles))
            .with_temperature(self.settings.temperature);
        let messages = vec![Message::user(format!(
            "{}\n\n{}",
            root.title, root.description
        ))];

        self.history.lock().extend(messages.iter().cloned());
        let reply = self.model.complete(&messages, &options).await?;
        self.history.lock().push(reply.clone());

        Plan::parse(&reply.content).map_err(|e| {
            warn!(task_id = %root.id, error = %e, "Plan rejected");
            e
        })
    }

    // ========================================================================
    // Execution
    // ========================================================================

    async fn execute_plan(
        &self,
        principal: &Principal,
        plan: &Plan,
        mut tasks: HashMap<String, Task>,
        token: &CancellationToken,
    ) -> Vec<SubtaskOutcome> {
        let mut outcomes: HashMap<String, SubtaskOutcome> = HashMap::new();

        let (independent, mut dependents): (Vec<&PlannedSubtask>, Vec<&PlannedSubtask>) =
            plan.subtasks.iter().partition(|s| s.dependencies.is_empty());

        let first: Vec<Task> = independent
            .iter()
            .filter_map(|s| tasks.remove(&s.id))
            .collect();
        for outcome in self.dispatch_wave(principal, first, token).await {
            outcomes.insert(outcome.id.clone(), outcome);
        }

        dependents.sort_by_key(|s| s.dependencies.len());

        while !dependents.is_empty() {
            let (ready, rest): (Vec<&PlannedSubtask>, Vec<&PlannedSubtask>) = dependents
                .into_iter()
                .partition(|s| s.dependencies.iter().all(|d| outcomes.contains_key(d)));
            dependents = rest;

            if ready.is_empty() {
                // Validated plans are acyclic; anything left here cannot run
                for s in dependents.drain(..) {
                    if let Some(task) = tasks.remove(&s.id) {
                        let outcome = self.skip(task, "unresolved dependencies");
                        outcomes.insert(outcome.id.clone(), outcome);
                    }
                }
                break;
            }

            let mut eligible = Vec::with_capacity(ready.len());
            for s in ready {
                let Some(task) = tasks.remove(&s.id) else {
                    continue;
                };
                let blocked = s
                    .dependencies
                    .iter()
                    .find(|d| outcomes.get(*d).map_or(true, |o| !o.succeeded()));
                match blocked {
                    Some(dep) => {
                        let reason = format!(
                            "dependency {} {}",
                            dep,
                            outcomes
                                .get(dep)
                                .map_or("missing", |o| o.state.as_str())
                        );
                        let outcome = self.skip(task, &reason);
                        outcomes.insert(outcome.id.clone(), outcome);
                    }
                    None => eligible.push(task),
                }
            }

            for outcome in self.dispatch_wave(principal, eligible, token).await {
                outcomes.insert(outcome.id.clone(), outcome);
            }
        }

        plan.subtasks
            .iter()
            .filter_map(|s| outcomes.remove(&s.id))
            .collect()
    }

    async fn dispatch_wave(
        &self,
        principal: &Principal,
        wave: Vec<Task>,
        token: &CancellationToken,
    ) -> Vec<SubtaskOutcome> {
        if wave.is_empty() {
            return Vec::new();
        }
        let limit = self.settings.max_concurrent_subtasks.max(1);
        debug!(subtasks = wave.len(), limit, "Dispatching wave");

        stream::iter(wave.into_iter().map(|task| self.dispatch(principal, task, token)))
            .buffer_unordered(limit)
            .collect()
            .await
    }

    async fn dispatch(
        &self,
        principal: &Principal,
        mut task: Task,
        token: &CancellationToken,
    ) -> SubtaskOutcome {
        let local_id = task.title.clone();
        let role = task.assigned_role.clone().unwrap_or_default();

        if token.is_cancelled() {
            let message = "cancelled before dispatch".to_string();
            if let Err(e) = task.cancel(Some(json!({"cancelled": true, "reason": message}))) {
                warn!(task_id = %task.id, error = %e, "Could not cancel subtask");
            }
            self.persist(&task);
            return outcome(&task, &role, SubtaskState::Cancelled, message, None);
        }

        let worker = match self.workers.get(&role) {
            Ok(worker) => worker,
            Err(e) => {
                warn!(task_id = %task.id, role = %role, "No worker for role");
                let message = e.to_string();
                self.record_result(&mut task, &WorkerResult::failure(&message));
                self.audit_subtask(&task, principal, AuditDecision::Failure, &message)
                    .await;
                return outcome(&task, &role, SubtaskState::Failed, message, None);
            }
        };

        if let Err(e) = task.start() {
            warn!(task_id = %task.id, error = %e, "Could not start subtask");
        }
        self.persist(&task);

        self.history.lock().push(Message::user(format!(
            "[{}] {}: {}",
            role, local_id, task.description
        )));
        info!(task_id = %task.id, role = %role, "Subtask dispatched");

        let result = match worker.execute_task(&task, principal).await {
            Ok(result) => result,
            Err(e) => {
                warn!(task_id = %task.id, role = %role, error = %e, "Worker error");
                WorkerResult::failure(e.to_string())
            }
        };

        self.history.lock().push(Message::assistant(format!(
            "[{}] {} {}: {}",
            role,
            local_id,
            if result.success { "succeeded" } else { "failed" },
            result.message
        )));

        self.record_result(&mut task, &result);
        let (state, decision) = if result.success {
            (SubtaskState::Completed, AuditDecision::Success)
        } else {
            (SubtaskState::Failed, AuditDecision::Failure)
        };
        self.audit_subtask(&task, principal, decision, &result.message)
            .await;
        info!(task_id = %task.id, role = %role, success = result.success, "Subtask finished");

        outcome(&task, &role, state, result.message, result.data)
    }

    /// Record a skipped subtask. Stored as `CANCELLED` with `skipped: true`.
    fn skip(&self, mut task: Task, reason: &str) -> SubtaskOutcome {
        let role = task.assigned_role.clone().unwrap_or_default();
        info!(task_id = %task.id, reason, "Subtask skipped");
        if let Err(e) = task.cancel(Some(json!({"skipped": true, "reason": reason}))) {
            warn!(task_id = %task.id, error = %e, "Could not skip subtask");
        }
        self.persist(&task);
        outcome(
            &task,
            &role,
            SubtaskState::Skipped,
            format!("Skipped: {}", reason),
            None,
        )
    }

    /// `PENDING` tasks are started first so that `FAILED` is reachable
    fn record_result(&self, task: &mut Task, result: &WorkerResult) {
        if task.status == TaskStatus::Pending {
            if let Err(e) = task.start() {
                warn!(task_id = %task.id, error = %e, "Could not start subtask");
            }
        }
        let value = serde_json::to_value(result).unwrap_or(Value::Null);
        let transition = if result.success {
            task.complete(value)
        } else {
            task.fail(value)
        };
        if let Err(e) = transition {
            warn!(task_id = %task.id, error = %e, "Could not record subtask result");
        }
        self.persist(task);
    }

    fn persist(&self, task: &Task) {
        if let Err(e) = self.store.save(task) {
            error!(task_id = %task.id, error = %e, "Failed to persist task");
        }
    }

    // ========================================================================
    // Synthesis
    // ========================================================================

    async fn synthesize(&self, root: &Task, plan: &Plan, outcomes: &[SubtaskOutcome]) -> String {
        let options = CompletionOptions::default()
            .with_system_prompt(SYNTHESIS_PROMPT)
            .with_temperature(self.settings.temperature);
        let prompt = format!(
            "Task: {}\n{}\n\n{}",
            root.title,
            root.description,
            summarize(plan, outcomes)
        );

        match self.model.complete(&[Message::user(prompt)], &options).await {
            Ok(reply) if !reply.content.trim().is_empty() => {
                self.history.lock().push(reply.clone());
                reply.content
            }
            Ok(_) => {
                warn!(task_id = %root.id, "Empty synthesis reply, using local summary");
                summarize(plan, outcomes)
            }
            Err(e) => {
                warn!(task_id = %root.id, error = %e, "Synthesis failed, using local summary");
                summarize(plan, outcomes)
            }
        }
    }

    // ========================================================================
    // Audit
    // ========================================================================

    async fn audit_task(
        &self,
        task: &Task,
        principal: &Principal,
        decision: AuditDecision,
        reason: &str,
    ) {
        self.record_audit(
            AuditEntry::new(AuditCategory::Task, "task", decision)
                .with_principal(&principal.id)
                .with_target(&task.id)
                .with_correlation(&task.id)
                .with_reason(reason),
        )
        .await;
    }

    async fn audit_subtask(
        &self,
        task: &Task,
        principal: &Principal,
        decision: AuditDecision,
        reason: &str,
    ) {
        let correlation = task.parent_id.clone().unwrap_or_else(|| task.id.clone());
        self.record_audit(
            AuditEntry::new(AuditCategory::Task, "subtask", decision)
                .with_principal(&principal.id)
                .with_target(&task.id)
                .with_correlation(correlation)
                .with_reason(reason)
                .with_data(json!({"role": task.assigned_role})),
        )
        .await;
    }

    async fn record_audit(&self, entry: AuditEntry) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(entry).await {
                error!(error = %e, "Failed to audit task event");
            }
        }
    }
}

fn outcome(
    task: &Task,
    role: &str,
    state: SubtaskState,
    message: String,
    data: Option<Value>,
) -> SubtaskOutcome {
    SubtaskOutcome {
        id: task.title.clone(),
        task_id: task.id.clone(),
        role: role.to_string(),
        state,
        message,
        data,
    }
}

/// Plain-text account of a plan and its outcomes
pub fn summarize(plan: &Plan, outcomes: &[SubtaskOutcome]) -> String {
    let mut out = format!("Plan: {}\n", plan.name);
    if !plan.description.is_empty() {
        out.push_str(&plan.description);
        out.push('\n');
    }
    out.push('\n');

    for o in outcomes {
        out.push_str(&format!(
            "- {} [{}] {}: {}\n",
            o.id,
            o.role,
            o.state.as_str(),
            o.message
        ));
    }

    let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
    out.push_str(&format!(
        "\n{} of {} subtasks succeeded",
        succeeded,
        outcomes.len()
    ));
    out
}
