//! In-process isolation runtime for tests
//!
//! `FakeRuntime` plays back a `FakeScript` instead of starting containers and
//! counts every lifecycle call so tests can assert teardown happened.

use crate::error::SandboxError;
use crate::runtime::{append_limited, CapturedOutput, IsolationRuntime, UnitHandle, UnitSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// What the fake unit does once started
#[derive(Debug, Clone, Default)]
pub struct FakeScript {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// How long `wait` takes to resolve
    pub delay: Duration,
    /// Lifecycle op (`create`, `start`, `wait`, `output`, `kill`, `remove`) that errors
    pub fail_op: Option<&'static str>,
    pub available: bool,
}

impl FakeScript {
    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: code,
            available: true,
            ..Default::default()
        }
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_on(mut self, op: &'static str) -> Self {
        self.fail_op = Some(op);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FakeCalls {
    pub created: usize,
    pub started: usize,
    pub waited: usize,
    pub killed: usize,
    pub removed: usize,
}

#[derive(Default)]
struct FakeState {
    calls: FakeCalls,
    last_spec: Option<UnitSpec>,
    seen_files: Vec<String>,
}

pub struct FakeRuntime {
    script: FakeScript,
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn calls(&self) -> FakeCalls {
        self.state.lock().calls
    }

    pub fn last_spec(&self) -> Option<UnitSpec> {
        self.state.lock().last_spec.clone()
    }

    /// File names present in the first mount when the unit was created
    pub fn seen_files(&self) -> Vec<String> {
        self.state.lock().seen_files.clone()
    }

    fn check(&self, op: &'static str) -> Result<(), SandboxError> {
        match self.script.fail_op {
            Some(fail) if fail == op => Err(SandboxError::runtime(op, "injected failure")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl IsolationRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        self.script.available
    }

    async fn create(&self, spec: &UnitSpec) -> Result<UnitHandle, SandboxError> {
        let mut files: Vec<String> = spec
            .mounts
            .first()
            .and_then(|m| std::fs::read_dir(&m.host_path).ok())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();

        {
            let mut state = self.state.lock();
            state.calls.created += 1;
            state.last_spec = Some(spec.clone());
            state.seen_files = files;
        }

        self.check("create")?;
        Ok(UnitHandle {
            id: format!("fake-{}", spec.name),
            name: spec.name.clone(),
        })
    }

    async fn start(&self, _unit: &UnitHandle) -> Result<(), SandboxError> {
        self.state.lock().calls.started += 1;
        self.check("start")
    }

    async fn wait(&self, _unit: &UnitHandle) -> Result<i64, SandboxError> {
        self.state.lock().calls.waited += 1;
        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
        self.check("wait")?;
        Ok(self.script.exit_code)
    }

    async fn output(
        &self,
        _unit: &UnitHandle,
        max_bytes: usize,
    ) -> Result<CapturedOutput, SandboxError> {
        self.check("output")?;
        let mut captured = CapturedOutput {
            total_bytes: (self.script.stdout.len() + self.script.stderr.len()) as u64,
            ..Default::default()
        };
        let mut budget = max_bytes;
        if append_limited(&mut captured.stdout, &self.script.stdout, &mut budget) {
            captured.truncated = true;
        }
        if append_limited(&mut captured.stderr, &self.script.stderr, &mut budget) {
            captured.truncated = true;
        }
        Ok(captured)
    }

    async fn kill(&self, _unit: &UnitHandle) -> Result<(), SandboxError> {
        self.state.lock().calls.killed += 1;
        self.check("kill")
    }

    async fn remove(&self, _unit: &UnitHandle) -> Result<(), SandboxError> {
        self.state.lock().calls.removed += 1;
        self.check("remove")
    }
}
