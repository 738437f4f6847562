//! Isolation runtime contract
//!
//! One `UnitSpec` becomes one isolation unit. The execution manager drives
//! the lifecycle `create → start → wait → output → remove` (plus `kill` when
//! the timeout wins) and never reuses a unit.

use crate::error::SandboxError;
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host_path: host.into(),
            container_path: container.into(),
            read_only: true,
        }
    }
}

/// Everything a runtime needs to build one unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
    /// Unique per execution
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub mounts: Vec<Mount>,
    /// Writable in-memory mounts (path → options)
    pub tmpfs: Vec<(String, String)>,
    pub memory_bytes: i64,
    /// CPU quota in units of 1e-9 CPUs
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub network: bool,
    pub read_only_rootfs: bool,
    pub no_new_privileges: bool,
    /// Capabilities to drop; `ALL` drops everything
    pub cap_drop: Vec<String>,
    pub user: Option<String>,
}

/// Reference to a created unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitHandle {
    pub id: String,
    pub name: String,
}

/// stdout / stderr captured from a finished (or killed) unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Bytes seen before truncation
    pub total_bytes: u64,
    pub truncated: bool,
}

impl CapturedOutput {
    /// stdout, then stderr under a separator
    pub fn combined(&self) -> String {
        let mut content = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !content.is_empty() {
                content.push_str("\n--- stderr ---\n");
            }
            content.push_str(&self.stderr);
        }
        if self.truncated {
            content.push_str("\n... [output truncated]");
        }
        content
    }
}

/// Appends `chunk` to `buf` while `remaining` bytes are left. Cuts on a char
/// boundary.
pub fn append_limited(buf: &mut String, chunk: &str, remaining: &mut usize) -> bool {
    if chunk.len() <= *remaining {
        buf.push_str(chunk);
        *remaining -= chunk.len();
        return false;
    }

    let mut cut = *remaining;
    while cut > 0 && !chunk.is_char_boundary(cut) {
        cut -= 1;
    }
    buf.push_str(&chunk[..cut]);
    *remaining = 0;
    true
}

#[async_trait]
pub trait IsolationRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn create(&self, spec: &UnitSpec) -> Result<UnitHandle, SandboxError>;

    async fn start(&self, unit: &UnitHandle) -> Result<(), SandboxError>;

    /// Resolves with the exit code once the unit stops
    async fn wait(&self, unit: &UnitHandle) -> Result<i64, SandboxError>;

    /// Output captured so far, capped at `max_bytes` across both streams
    async fn output(&self, unit: &UnitHandle, max_bytes: usize)
        -> Result<CapturedOutput, SandboxError>;

    async fn kill(&self, unit: &UnitHandle) -> Result<(), SandboxError>;

    /// Idempotent; removes the unit whatever state it is in
    async fn remove(&self, unit: &UnitHandle) -> Result<(), SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_limited_cuts_on_char_boundary() {
        let mut buf = String::new();
        let mut remaining = 4;
        assert!(append_limited(&mut buf, "ab€cd", &mut remaining));
        assert_eq!(buf, "ab");
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_combined_output() {
        let output = CapturedOutput {
            stdout: "ok".into(),
            stderr: "warn".into(),
            total_bytes: 6,
            truncated: false,
        };
        assert_eq!(output.combined(), "ok\n--- stderr ---\nwarn");
    }
}
