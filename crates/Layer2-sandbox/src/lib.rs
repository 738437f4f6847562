//! # warden-sandbox
//!
//! Runs untrusted code in ephemeral, resource-capped isolation units.
//!
//! - `Language`: fixed set of runnable languages (image, source file, command)
//! - `IsolationRuntime`: unit lifecycle contract; `DockerRuntime` is the
//!   production implementation, `testing::FakeRuntime` the in-process one
//! - `ExecutionManager`: one execution = one unit + one scratch directory,
//!   wall-clock timeout, guaranteed teardown
//! - `CodeExecutionTool`: the manager exposed as a `Tool`
//!
//! Callers are expected to have passed the security gate before reaching
//! `ExecutionManager::execute`.

pub mod docker;
pub mod error;
pub mod language;
pub mod manager;
pub mod runtime;
pub mod scratch;
pub mod testing;
pub mod tool;

pub use docker::DockerRuntime;
pub use error::SandboxError;
pub use language::{Language, INPUT_FILE, SANDBOX_MOUNT};
pub use manager::ExecutionManager;
pub use runtime::{CapturedOutput, IsolationRuntime, Mount, UnitHandle, UnitSpec};
pub use scratch::ScratchDir;
pub use tool::{CodeExecutionTool, CODE_EXECUTION_TOOL_ID};
