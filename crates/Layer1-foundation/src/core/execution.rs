//! Execution types - sandbox profile and execution outcome
//!
//! `SandboxConfig` lives here (not in the sandbox crate) because it is part of
//! `WardenConfig` and is checked by the gate when a tool is invoked.

use serde::{Deserialize, Serialize};

// ============================================================================
// SandboxConfig
// ============================================================================

/// Resource and access profile for one execution.
///
/// A process-wide default is loaded from config; callers may pass their own
/// profile per execution. Never mutated once handed to the execution manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxConfig {
    pub memory_limit_mb: u64,
    pub cpu_limit_fraction: f64,
    pub timeout_ms: u64,
    pub network_access: bool,
    pub allowed_commands: Vec<String>,
    pub allowed_file_paths: Vec<String>,
    pub allowed_tool_ids: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 256,
            cpu_limit_fraction: 0.5,
            timeout_ms: 30_000,
            network_access: false,
            allowed_commands: Vec::new(),
            allowed_file_paths: Vec::new(),
            allowed_tool_ids: Vec::new(),
        }
    }
}

impl SandboxConfig {
    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    pub fn with_cpu_limit(mut self, fraction: f64) -> Self {
        self.cpu_limit_fraction = fraction;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_network(mut self, enabled: bool) -> Self {
        self.network_access = enabled;
        self
    }

    pub fn allow_command(mut self, cmd: impl Into<String>) -> Self {
        self.allowed_commands.push(cmd.into());
        self
    }

    pub fn allow_path(mut self, path: impl Into<String>) -> Self {
        self.allowed_file_paths.push(path.into());
        self
    }

    pub fn allow_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.allowed_tool_ids.push(tool_id.into());
        self
    }

    /// First whitespace-separated token must be in `allowed_commands`.
    /// Empty list denies everything.
    pub fn is_command_allowed(&self, command: &str) -> bool {
        let Some(program) = command.split_whitespace().next() else {
            return false;
        };
        self.allowed_commands.iter().any(|c| c == program)
    }

    /// Path must equal or descend from an allowed root once both are
    /// normalized. Leading `..` segments are dropped rather than resolved.
    /// Empty list denies everything.
    pub fn is_file_path_allowed(&self, path: &str) -> bool {
        if self.allowed_file_paths.is_empty() {
            return false;
        }
        let candidate = normalize_path(path);
        self.allowed_file_paths
            .iter()
            .map(|root| normalize_path(root))
            .any(|root| path_within(&candidate, &root))
    }

    /// Same default-deny rule as commands
    pub fn is_tool_allowed(&self, tool_id: &str) -> bool {
        self.allowed_tool_ids.iter().any(|t| t == tool_id)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Lexical normalization: collapses `.` and empty segments, applies `..`
/// against preceding segments and drops any `..` that would climb above the
/// start of the path.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

fn path_within(candidate: &str, root: &str) -> bool {
    if candidate == root {
        return true;
    }
    if root == "/" {
        return candidate.starts_with('/');
    }
    if root.is_empty() {
        return !candidate.starts_with('/');
    }
    candidate
        .strip_prefix(root)
        .is_some_and(|rest| rest.starts_with('/'))
}

// ============================================================================
// ExecutionResult
// ============================================================================

/// Why an execution did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedLanguage,
    NonZeroExit { code: i64 },
    Timeout,
    Infrastructure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedLanguage => "unsupported_language",
            Self::NonZeroExit { .. } => "non_zero_exit",
            Self::Timeout => "timeout",
            Self::Infrastructure => "infrastructure",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub memory_limit_bytes: Option<u64>,
    pub nano_cpus: Option<i64>,
    pub output_bytes: u64,
    pub output_truncated: bool,
}

/// Outcome of one sandboxed execution. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub resource_usage: Option<ResourceUsage>,
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    pub fn success(
        execution_id: impl Into<String>,
        output: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            success: true,
            output: output.into(),
            error: None,
            execution_time_ms,
            resource_usage: None,
            failure: None,
        }
    }

    pub fn failure(
        execution_id: impl Into<String>,
        kind: FailureKind,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            execution_time_ms,
            resource_usage: None,
            failure: Some(kind),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.resource_usage = Some(usage);
        self
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, Some(FailureKind::Timeout))
    }
}
