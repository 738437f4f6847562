//! Decompose → dispatch → synthesize, driven by a scripted model

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use warden_foundation::{
    AuditCategory, AuditQuery, LimitType, MessageRole, Principal, SandboxSettings,
    SchedulerSettings, Storage, WardenConfig,
};
use warden_sandbox::testing::{FakeRuntime, FakeScript};
use warden_scheduler::testing::{CountingWorker, ScriptedModel};
use warden_scheduler::{
    Controller, MemoryTaskStore, SchedulerError, SqliteTaskStore, SubtaskState, Task, TaskStatus,
    TaskStore, WardenContext, WorkerRegistry,
};

const WRITE_AND_REVIEW: &str = r#"{
    "name": "write and test a function",
    "description": "implement then review",
    "subtasks": [
        {"id": "A", "description": "write the function", "assignedRole": "coder", "priority": "HIGH"},
        {"id": "B", "description": "review the function", "assignedRole": "security", "dependencies": ["A"]}
    ]
}"#;

fn alice() -> Principal {
    Principal::new("alice").with_role("user")
}

struct Setup {
    controller: Controller,
    model: Arc<ScriptedModel>,
    store: Arc<MemoryTaskStore>,
}

fn setup(model: ScriptedModel, workers: WorkerRegistry) -> Setup {
    let model = Arc::new(model);
    let store = Arc::new(MemoryTaskStore::new());
    let controller = Controller::new(
        model.clone(),
        workers,
        store.clone(),
        SchedulerSettings::default(),
    );
    Setup {
        controller,
        model,
        store,
    }
}

#[tokio::test]
async fn test_dependent_is_dispatched_after_its_dependency_succeeds() {
    let coder = Arc::new(CountingWorker::succeeding("coder"));
    let security = Arc::new(CountingWorker::succeeding("security"));
    let s = setup(
        ScriptedModel::new([WRITE_AND_REVIEW, "Function written and reviewed."]),
        WorkerRegistry::new()
            .with_worker(coder.clone())
            .with_worker(security.clone()),
    );

    let outcome = s
        .controller
        .execute(&alice(), "fn", "write and test a function")
        .await
        .unwrap();

    assert!(outcome.success);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.answer, "Function written and reviewed.");
    assert_eq!(coder.seen(), vec!["A"]);
    assert_eq!(security.seen(), vec!["B"]);
    assert_eq!(s.model.call_count(), 2);

    let planning = s.model.calls()[0].options.system_prompt.clone().unwrap();
    assert!(planning.contains("- coder: Handles coder subtasks"));
    assert!(planning.contains("- security: Handles security subtasks"));

    let root = s.store.get(&outcome.task_id).unwrap().unwrap();
    assert_eq!(root.status, TaskStatus::Completed);
    assert_eq!(root.subtasks.len(), 2);

    let subtasks = s.store.subtasks(&outcome.task_id).unwrap();
    assert!(subtasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(subtasks[1].dependencies, vec![subtasks[0].id.clone()]);

    let history = s.controller.history();
    let dispatched: Vec<&str> = history
        .iter()
        .filter(|m| m.role == MessageRole::User && m.content.starts_with('['))
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(
        dispatched,
        vec![
            "[coder] A: write the function",
            "[security] B: review the function"
        ]
    );
}

#[tokio::test]
async fn test_failed_dependency_skips_dependent() {
    let coder = Arc::new(CountingWorker::failing("coder"));
    let security = Arc::new(CountingWorker::succeeding("security"));
    let s = setup(
        ScriptedModel::new([WRITE_AND_REVIEW, "The function could not be written."]),
        WorkerRegistry::new()
            .with_worker(coder.clone())
            .with_worker(security.clone()),
    );

    let outcome = s
        .controller
        .execute(&alice(), "fn", "write and test a function")
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.answer, "The function could not be written.");
    assert_eq!(outcome.subtask("A").unwrap().state, SubtaskState::Failed);
    let b = outcome.subtask("B").unwrap();
    assert_eq!(b.state, SubtaskState::Skipped);
    assert!(b.message.contains("dependency A failed"));
    assert_eq!(security.calls(), 0);

    let stored_b = s.store.get(&b.task_id).unwrap().unwrap();
    assert_eq!(stored_b.status, TaskStatus::Cancelled);
    assert!(stored_b.started_at.is_none());
    assert!(stored_b.completed_at.is_none());
    assert_eq!(stored_b.result.unwrap()["skipped"], json!(true));

    let root = s.store.get(&outcome.task_id).unwrap().unwrap();
    assert_eq!(root.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_unparseable_plan_aborts_the_task() {
    let coder = Arc::new(CountingWorker::succeeding("coder"));
    let s = setup(
        ScriptedModel::new(["First I will think about the function."]),
        WorkerRegistry::new().with_worker(coder.clone()),
    );
    let root = Task::new("alice", "fn", "write a function");
    let root_id = root.id.clone();

    let err = s.controller.run(&alice(), root).await.unwrap_err();

    assert!(matches!(err, SchedulerError::PlanParse(_)));
    assert_eq!(coder.calls(), 0);
    assert_eq!(s.model.call_count(), 1);
    let stored = s.store.get(&root_id).unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(s.store.subtasks(&root_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_cyclic_plan_is_rejected_before_dispatch() {
    let coder = Arc::new(CountingWorker::succeeding("coder"));
    let s = setup(
        ScriptedModel::new([r#"{"name": "loop", "subtasks": [
            {"id": "A", "description": "a", "assignedRole": "coder", "dependencies": ["B"]},
            {"id": "B", "description": "b", "assignedRole": "coder", "dependencies": ["A"]}
        ]}"#]),
        WorkerRegistry::new().with_worker(coder.clone()),
    );

    let err = s.controller.execute(&alice(), "loop", "d").await.unwrap_err();
    assert!(matches!(err, SchedulerError::PlanParse(_)));
    assert_eq!(coder.calls(), 0);
}

#[tokio::test]
async fn test_missing_worker_fails_only_that_subtask() {
    let coder = Arc::new(CountingWorker::succeeding("coder"));
    let s = setup(
        ScriptedModel::new([
            r#"{"name": "mixed", "subtasks": [
                {"id": "A", "description": "code", "assignedRole": "coder"},
                {"id": "B", "description": "draw", "assignedRole": "designer"}
            ]}"#,
            "Partly done.",
        ]),
        WorkerRegistry::new().with_worker(coder.clone()),
    );

    let outcome = s.controller.execute(&alice(), "mixed", "d").await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.answer, "Partly done.");
    assert_eq!(outcome.subtask("A").unwrap().state, SubtaskState::Completed);
    let b = outcome.subtask("B").unwrap();
    assert_eq!(b.state, SubtaskState::Failed);
    assert_eq!(b.message, "No worker registered for role: designer");
    assert_eq!(
        s.store.get(&b.task_id).unwrap().unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn test_synthesis_failure_falls_back_to_local_summary() {
    let coder = Arc::new(CountingWorker::succeeding("coder"));
    let s = setup(
        ScriptedModel::new([r#"{"name": "one", "subtasks": [
            {"id": "A", "description": "code", "assignedRole": "coder"}
        ]}"#])
        .then_fail("model overloaded"),
        WorkerRegistry::new().with_worker(coder),
    );

    let outcome = s.controller.execute(&alice(), "one", "d").await.unwrap();

    assert!(outcome.success);
    assert!(outcome.answer.contains("Plan: one"));
    assert!(outcome.answer.contains("- A [coder] completed: coder done"));
    assert!(outcome.answer.ends_with("1 of 1 subtasks succeeded"));
}

#[tokio::test]
async fn test_chains_resolve_in_waves() {
    let coder = Arc::new(CountingWorker::succeeding("coder"));
    let s = setup(
        ScriptedModel::new([
            r#"{"name": "chain", "subtasks": [
                {"id": "D", "description": "d", "assignedRole": "coder", "dependencies": ["A", "C"]},
                {"id": "C", "description": "c", "assignedRole": "coder", "dependencies": ["B"]},
                {"id": "B", "description": "b", "assignedRole": "coder", "dependencies": ["A"]},
                {"id": "A", "description": "a", "assignedRole": "coder"}
            ]}"#,
            "done",
        ]),
        WorkerRegistry::new().with_worker(coder.clone()),
    );

    let outcome = s.controller.execute(&alice(), "chain", "d").await.unwrap();

    assert!(outcome.success);
    assert_eq!(coder.seen(), vec!["A", "B", "C", "D"]);
    // reported in plan order
    let ids: Vec<&str> = outcome.subtasks.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["D", "C", "B", "A"]);
}

#[tokio::test]
async fn test_independent_subtasks_run_concurrently() {
    let coder = Arc::new(CountingWorker::succeeding("coder").with_delay(Duration::from_millis(150)));
    let s = setup(
        ScriptedModel::new([
            r#"{"name": "fan-out", "subtasks": [
                {"id": "A", "description": "a", "assignedRole": "coder"},
                {"id": "B", "description": "b", "assignedRole": "coder"},
                {"id": "C", "description": "c", "assignedRole": "coder"}
            ]}"#,
            "done",
        ]),
        WorkerRegistry::new().with_worker(coder.clone()),
    );

    let started = std::time::Instant::now();
    let outcome = s.controller.execute(&alice(), "fan-out", "d").await.unwrap();

    assert!(outcome.success);
    assert_eq!(coder.calls(), 3);
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn test_cancel_stops_undispatched_subtasks() {
    let coder = Arc::new(CountingWorker::succeeding("coder").with_delay(Duration::from_millis(200)));
    let security = Arc::new(CountingWorker::succeeding("security"));
    let s = setup(
        ScriptedModel::new([WRITE_AND_REVIEW, "Stopped early."]),
        WorkerRegistry::new()
            .with_worker(coder.clone())
            .with_worker(security.clone()),
    );
    let controller = Arc::new(s.controller);
    let root = Task::new("alice", "fn", "write and test a function");
    let root_id = root.id.clone();

    let handle = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run(&alice(), root).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(controller.cancel(&root_id));

    let outcome = handle.await.unwrap().unwrap();
    assert!(outcome.cancelled);
    assert!(!outcome.success);
    // in-flight work finished on its own
    assert_eq!(outcome.subtask("A").unwrap().state, SubtaskState::Completed);
    assert_eq!(outcome.subtask("B").unwrap().state, SubtaskState::Cancelled);
    assert_eq!(security.calls(), 0);

    assert_eq!(
        s.store.get(&root_id).unwrap().unwrap().status,
        TaskStatus::Cancelled
    );
    assert!(!controller.cancel(&root_id));
}

#[tokio::test]
async fn test_tasks_persist_through_sqlite() {
    let storage = Storage::in_memory().unwrap();
    let store = Arc::new(SqliteTaskStore::new(storage.clone()));
    let controller = Controller::new(
        Arc::new(ScriptedModel::new([WRITE_AND_REVIEW, "ok"])),
        WorkerRegistry::new()
            .with_worker(Arc::new(CountingWorker::succeeding("coder")))
            .with_worker(Arc::new(CountingWorker::succeeding("security"))),
        store,
        SchedulerSettings::default(),
    );

    let outcome = controller.execute(&alice(), "fn", "d").await.unwrap();

    let reopened = SqliteTaskStore::new(storage);
    let root = reopened.get(&outcome.task_id).unwrap().unwrap();
    assert_eq!(root.status, TaskStatus::Completed);
    assert!(root.started_at.is_some() && root.completed_at.is_some());
    let subtasks = reopened.subtasks(&outcome.task_id).unwrap();
    assert_eq!(subtasks.len(), 2);
    assert_eq!(subtasks[0].assigned_role.as_deref(), Some("coder"));

    controller.remove_task(&outcome.task_id).unwrap();
    assert!(reopened.get(&subtasks[0].id).unwrap().is_none());
}

#[tokio::test]
async fn test_model_worker_runs_code_through_gate_and_sandbox() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = WardenConfig::default();
    config.sandbox = SandboxSettings {
        scratch_root: Some(scratch.path().to_path_buf()),
        ..config.sandbox
    };
    let runtime = Arc::new(FakeRuntime::new(FakeScript::exit(0).with_stdout("120\n")));
    let ctx = WardenContext::in_memory(config, runtime.clone()).unwrap();

    let model = Arc::new(ScriptedModel::new([
        r#"{"name": "factorial", "subtasks": [
            {"id": "A", "description": "compute 5!", "assignedRole": "coder"}
        ]}"#,
        r#"{"success": true, "message": "computed",
            "tool_calls": [{"tool": "code_execution",
                            "params": {"code": "import math; print(math.factorial(5))", "language": "python"}}]}"#,
        "5! = 120",
    ]));
    let controller = ctx.controller(model.clone(), ctx.model_workers(model.clone()));

    let outcome = controller
        .execute(&alice(), "factorial", "compute 5 factorial")
        .await
        .unwrap();

    assert!(outcome.success, "{:?}", outcome.subtasks);
    assert_eq!(outcome.answer, "5! = 120");
    assert_eq!(runtime.calls().created, 1);
    assert_eq!(runtime.calls().removed, 1);
    let data = outcome.subtask("A").unwrap().data.clone().unwrap();
    assert_eq!(data["toolResults"][0]["content"], "120\n");

    let task_events = ctx
        .audit()
        .query(&AuditQuery::new().with_categories(vec![AuditCategory::Task]))
        .await
        .unwrap();
    assert_eq!(task_events.len(), 2);

    // the fake runtime reports ~0 ms, billed as one sandbox second
    let limiter = ctx.gate().limiter();
    let alice = alice();
    assert_eq!(
        limiter
            .remaining(&alice, LimitType::ComputeResources, None)
            .unwrap(),
        limiter.limit_for(&alice, LimitType::ComputeResources) - 1
    );
    assert!(
        limiter.remaining(&alice, LimitType::TokenUsage, None).unwrap()
            < limiter.limit_for(&alice, LimitType::TokenUsage)
    );
}
