//! # warden-scheduler
//!
//! Turns one request into a plan of subtasks and runs them through workers.
//!
//! - `Task`: lifecycle state machine, persisted through `TaskStore`
//! - `Plan`: parsed and validated model decomposition
//! - `Worker` / `WorkerRegistry`: one worker per role; `ModelWorker` is the
//!   stock one and calls tools through the security gate
//! - `Controller`: decompose → dispatch (concurrent waves) → synthesize,
//!   with cancellation of not-yet-dispatched subtasks
//! - `WardenContext`: storage, audit, gate, sandbox and tools for a process

pub mod context;
pub mod controller;
pub mod error;
pub mod model_worker;
pub mod plan;
pub mod store;
pub mod task;
pub mod testing;
pub mod tools;
pub mod worker;

pub use context::WardenContext;
pub use controller::{summarize, Controller, SubtaskOutcome, SubtaskState, TaskOutcome};
pub use error::{SchedulerError, SchedulerResult};
pub use model_worker::ModelWorker;
pub use plan::{extract_json, planning_prompt, Plan, PlannedSubtask};
pub use store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
pub use task::{Task, TaskPriority, TaskStatus};
pub use tools::ToolRegistry;
pub use worker::{Worker, WorkerRegistry, WorkerResult};
