//! Execution manager
//!
//! Runs already-authorized code in a fresh isolation unit:
//!
//! ```text
//! language? ──no──► UnsupportedLanguage (no unit, no scratch dir)
//!    │
//!    ▼
//! scratch dir ─► write code/input ─► create unit ─► start ─► wait ⟷ timeout
//!                                                              │      │
//!                                                              │    kill
//!                                                              ▼      ▼
//!                                                         output ─► remove unit ─► delete scratch
//! ```
//!
//! Every exit path after `create` removes the unit, and every exit path after
//! the scratch directory exists deletes it. Infrastructure failures become
//! unsuccessful results carrying the execution id; nothing is thrown.

use crate::error::SandboxError;
use crate::language::{Language, INPUT_FILE, SANDBOX_MOUNT};
use crate::runtime::{CapturedOutput, IsolationRuntime, Mount, UnitHandle, UnitSpec};
use crate::scratch::ScratchDir;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use warden_foundation::{
    AuditCategory, AuditDecision, AuditEntry, AuditSink, ExecutionResult, FailureKind,
    ResourceUsage, SandboxConfig, SandboxSettings, Storage,
};

/// How a started unit finished
enum UnitOutcome {
    Exited(i64),
    TimedOut,
}

pub struct ExecutionManager {
    runtime: Arc<dyn IsolationRuntime>,
    settings: SandboxSettings,
    audit: Option<Arc<dyn AuditSink>>,
    storage: Option<Storage>,
}

impl ExecutionManager {
    pub fn new(runtime: Arc<dyn IsolationRuntime>, settings: SandboxSettings) -> Self {
        Self {
            runtime,
            settings,
            audit: None,
            storage: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Persist every result in the `execution_results` table
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn default_profile(&self) -> &SandboxConfig {
        &self.settings.default_profile
    }

    pub fn runtime(&self) -> &Arc<dyn IsolationRuntime> {
        &self.runtime
    }

    pub async fn is_available(&self) -> bool {
        self.runtime.is_available().await
    }

    /// Execute `code` in a new isolation unit.
    ///
    /// `config` overrides the process-wide default profile for this run only.
    pub async fn execute(
        &self,
        code: &str,
        language: &str,
        input: Option<&str>,
        config: Option<&SandboxConfig>,
    ) -> ExecutionResult {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let profile = config.unwrap_or(&self.settings.default_profile);
        let started = Instant::now();

        let result = match Language::from_str(language) {
            Ok(lang) => {
                info!(
                    execution_id = %execution_id,
                    language = %lang,
                    timeout_ms = profile.timeout_ms,
                    "Starting sandboxed execution"
                );
                match self
                    .run(&execution_id, lang, code, input, profile, started)
                    .await
                {
                    Ok(result) => result,
                    Err(e) => {
                        error!(
                            execution_id = %execution_id,
                            error = %e,
                            "Sandbox infrastructure failure"
                        );
                        ExecutionResult::failure(
                            &execution_id,
                            FailureKind::Infrastructure,
                            format!(
                                "Sandbox infrastructure error (execution id: {})",
                                execution_id
                            ),
                            elapsed_ms(started),
                        )
                    }
                }
            }
            Err(e) => {
                warn!(execution_id = %execution_id, language = %language, "Unsupported language");
                ExecutionResult::failure(
                    &execution_id,
                    FailureKind::UnsupportedLanguage,
                    e.to_string(),
                    0,
                )
            }
        };

        self.record(&result, language).await;
        result
    }

    async fn run(
        &self,
        execution_id: &str,
        language: Language,
        code: &str,
        input: Option<&str>,
        profile: &SandboxConfig,
        started: Instant,
    ) -> Result<ExecutionResult, SandboxError> {
        let scratch = ScratchDir::create(&self.settings.scratch_root(), execution_id).await?;

        let outcome = self
            .run_in_scratch(&scratch, execution_id, language, code, input, profile, started)
            .await;

        if let Err(e) = scratch.cleanup().await {
            warn!(execution_id = %execution_id, error = %e, "Scratch cleanup failed");
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_in_scratch(
        &self,
        scratch: &ScratchDir,
        execution_id: &str,
        language: Language,
        code: &str,
        input: Option<&str>,
        profile: &SandboxConfig,
        started: Instant,
    ) -> Result<ExecutionResult, SandboxError> {
        scratch.write(language.source_file(), code).await?;
        if let Some(input) = input {
            scratch.write(INPUT_FILE, input).await?;
        }

        let spec = self.unit_spec(execution_id, language, input.is_some(), scratch, profile);
        let unit = self.runtime.create(&spec).await?;

        let lifecycle = self.drive(&unit, profile).await;

        if let Err(e) = self.runtime.remove(&unit).await {
            error!(execution_id = %execution_id, unit = %unit.id, error = %e, "Failed to remove isolation unit");
        }

        let (outcome, output) = lifecycle?;
        let elapsed = elapsed_ms(started);
        let usage = ResourceUsage {
            memory_limit_bytes: u64::try_from(spec.memory_bytes).ok(),
            nano_cpus: Some(spec.nano_cpus),
            output_bytes: output.total_bytes,
            output_truncated: output.truncated,
        };

        let result = match outcome {
            UnitOutcome::Exited(0) => {
                ExecutionResult::success(execution_id, output.combined(), elapsed)
            }
            UnitOutcome::Exited(code) => ExecutionResult::failure(
                execution_id,
                FailureKind::NonZeroExit { code },
                format!("Process exited with code {}", code),
                elapsed,
            )
            .with_output(output.combined()),
            UnitOutcome::TimedOut => ExecutionResult::failure(
                execution_id,
                FailureKind::Timeout,
                format!("Execution timed out after {}ms", profile.timeout_ms),
                elapsed,
            )
            .with_output(output.combined()),
        };

        Ok(result.with_usage(usage))
    }

    /// start → wait raced against the timeout → kill on timeout → output
    async fn drive(
        &self,
        unit: &UnitHandle,
        profile: &SandboxConfig,
    ) -> Result<(UnitOutcome, CapturedOutput), SandboxError> {
        self.runtime.start(unit).await?;

        let outcome = match tokio::time::timeout(profile.timeout(), self.runtime.wait(unit)).await {
            Ok(exit) => UnitOutcome::Exited(exit?),
            Err(_) => {
                warn!(unit = %unit.name, timeout_ms = profile.timeout_ms, "Execution timed out, killing unit");
                if let Err(e) = self.runtime.kill(unit).await {
                    error!(unit = %unit.name, error = %e, "Failed to kill timed out unit");
                }
                UnitOutcome::TimedOut
            }
        };

        let output = match self
            .runtime
            .output(unit, self.settings.max_output_bytes)
            .await
        {
            Ok(output) => output,
            Err(e) if matches!(outcome, UnitOutcome::TimedOut) => {
                debug!(unit = %unit.name, error = %e, "No output from killed unit");
                CapturedOutput::default()
            }
            Err(e) => return Err(e),
        };

        Ok((outcome, output))
    }

    fn unit_spec(
        &self,
        execution_id: &str,
        language: Language,
        with_input: bool,
        scratch: &ScratchDir,
        profile: &SandboxConfig,
    ) -> UnitSpec {
        let image = self
            .settings
            .images
            .get(language.as_str())
            .cloned()
            .unwrap_or_else(|| language.default_image().to_string());

        let memory_bytes = profile.memory_limit_mb.saturating_mul(1024 * 1024);
        let nano_cpus = (profile.cpu_limit_fraction.max(0.01) * 1e9) as i64;

        UnitSpec {
            name: format!("warden-{}", execution_id),
            image,
            command: language.command(with_input),
            env: language.env(),
            working_dir: SANDBOX_MOUNT.to_string(),
            mounts: vec![Mount::read_only(scratch.path(), SANDBOX_MOUNT)],
            tmpfs: vec![(
                "/tmp".to_string(),
                "rw,noexec,nosuid,size=64m".to_string(),
            )],
            memory_bytes: i64::try_from(memory_bytes).unwrap_or(i64::MAX),
            nano_cpus,
            pids_limit: self.settings.pids_limit,
            network: profile.network_access,
            read_only_rootfs: true,
            no_new_privileges: true,
            cap_drop: vec!["ALL".to_string()],
            user: Some("65534:65534".to_string()),
        }
    }

    async fn record(&self, result: &ExecutionResult, language: &str) {
        let decision = if result.success {
            AuditDecision::Success
        } else if result.is_timeout() {
            AuditDecision::Timeout
        } else {
            AuditDecision::Failure
        };

        if let Some(audit) = &self.audit {
            let mut entry = AuditEntry::new(AuditCategory::Sandbox, "code_execution", decision)
                .with_target(language)
                .with_correlation(&result.execution_id)
                .with_duration(result.execution_time_ms)
                .with_data(json!({
                    "failure": result.failure,
                    "resourceUsage": result.resource_usage,
                }));
            if let Some(kind) = &result.failure {
                entry = entry.with_reason(kind.as_str());
            }
            if let Err(e) = audit.record(entry).await {
                error!(execution_id = %result.execution_id, error = %e, "Failed to audit execution");
            }
        }

        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_execution_result(result, None, language) {
                error!(execution_id = %result.execution_id, error = %e, "Failed to persist execution result");
            }
        }

        info!(
            execution_id = %result.execution_id,
            success = result.success,
            time_ms = result.execution_time_ms,
            "Sandboxed execution finished"
        );
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRuntime, FakeScript};
    use std::time::Duration;
    use warden_foundation::MemoryAuditLog;

    fn manager(runtime: Arc<FakeRuntime>, root: &std::path::Path) -> ExecutionManager {
        let settings = SandboxSettings {
            scratch_root: Some(root.to_path_buf()),
            max_output_bytes: 32,
            ..Default::default()
        };
        ExecutionManager::new(runtime, settings)
    }

    #[tokio::test]
    async fn test_success_captures_output() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(FakeScript::exit(0).with_stdout("hello\n")));
        let mgr = manager(runtime.clone(), root.path());

        let result = mgr.execute("print('hello')", "python", None, None).await;

        assert!(result.success, "{:?}", result);
        assert_eq!(result.output, "hello\n");
        assert!(result.failure.is_none());
        assert_eq!(runtime.calls().removed, 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(FakeScript::exit(3).with_stderr("boom")));
        let mgr = manager(runtime.clone(), root.path());

        let result = mgr.execute("exit 3", "bash", None, None).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::NonZeroExit { code: 3 }));
        assert_eq!(result.error.as_deref(), Some("Process exited with code 3"));
        assert!(result.output.contains("boom"));
    }

    #[tokio::test]
    async fn test_unsupported_language_creates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(FakeScript::exit(0)));
        let mgr = manager(runtime.clone(), root.path());

        let result = mgr.execute("IDENTIFICATION DIVISION.", "cobol", None, None).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::UnsupportedLanguage));
        assert_eq!(runtime.calls().created, 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(
            FakeScript::exit(0).with_delay(Duration::from_secs(5)),
        ));
        let mgr = manager(runtime.clone(), root.path());
        let profile = SandboxConfig::default().with_timeout_ms(50);

        let result = mgr.execute("while True: pass", "python", None, Some(&profile)).await;

        assert!(!result.success);
        assert!(result.is_timeout());
        assert_eq!(result.error.as_deref(), Some("Execution timed out after 50ms"));

        let calls = runtime.calls();
        assert_eq!(calls.killed, 1);
        assert_eq!(calls.removed, 1);
        let scratch = runtime.last_spec().unwrap().mounts[0].host_path.clone();
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_infrastructure_error_is_generic_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(FakeScript::exit(0).fail_on("start")));
        let audit = Arc::new(MemoryAuditLog::new());
        let mgr = manager(runtime.clone(), root.path()).with_audit(audit.clone());

        let result = mgr.execute("print(1)", "python", None, None).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Infrastructure));
        let message = result.error.clone().unwrap();
        assert!(message.contains(&result.execution_id));
        assert!(!message.contains("injected"));
        assert_eq!(runtime.calls().removed, 1);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decision, AuditDecision::Failure);
        assert_eq!(entries[0].correlation_id.as_deref(), Some(result.execution_id.as_str()));
    }

    #[tokio::test]
    async fn test_unit_spec_applies_profile() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(FakeScript::exit(0)));
        let mgr = manager(runtime.clone(), root.path());
        let profile = SandboxConfig::default()
            .with_memory_limit_mb(64)
            .with_cpu_limit(0.25)
            .with_network(true);

        mgr.execute("console.log(1)", "javascript", Some("stdin data"), Some(&profile))
            .await;

        let spec = runtime.last_spec().unwrap();
        assert_eq!(spec.memory_bytes, 64 * 1024 * 1024);
        assert_eq!(spec.nano_cpus, 250_000_000);
        assert!(spec.network);
        assert!(spec.read_only_rootfs);
        assert!(spec.no_new_privileges);
        assert_eq!(spec.cap_drop, vec!["ALL".to_string()]);
        assert!(spec.mounts[0].read_only);
        assert_eq!(spec.command[0], "sh");
        assert_eq!(runtime.seen_files(), vec!["input".to_string(), "main.js".to_string()]);
    }

    #[tokio::test]
    async fn test_output_truncated() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(
            FakeScript::exit(0).with_stdout(&"x".repeat(100)),
        ));
        let mgr = manager(runtime, root.path());

        let result = mgr.execute("print('x' * 100)", "python", None, None).await;

        assert!(result.success);
        assert!(result.output.starts_with(&"x".repeat(32)));
        assert!(result.output.ends_with("[output truncated]"));
        let usage = result.resource_usage.unwrap();
        assert!(usage.output_truncated);
        assert_eq!(usage.output_bytes, 100);
    }

    #[tokio::test]
    async fn test_result_persisted() {
        let root = tempfile::tempdir().unwrap();
        let storage = Storage::in_memory().unwrap();
        let runtime = Arc::new(FakeRuntime::new(FakeScript::exit(0).with_stdout("4")));
        let mgr = manager(runtime, root.path()).with_storage(storage.clone());

        let result = mgr.execute("print(2 + 2)", "python", None, None).await;

        let stored = storage.get_execution_result(&result.execution_id).unwrap();
        assert_eq!(stored, Some(result));
    }
}
