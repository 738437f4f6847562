//! Warden Config - process-wide settings
//!
//! Loaded from the global file first, then the project file. Each section
//! present in the project file replaces the global one wholesale.

use super::{ContentFilterConfig, RateLimitsConfig, RolesConfig};
use crate::core::SandboxConfig;
use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const WARDEN_CONFIG_FILE: &str = "config.json";

// ============================================================================
// WardenConfig
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenConfig {
    pub sandbox: SandboxSettings,
    pub rate_limits: RateLimitsConfig,
    pub roles: RolesConfig,
    pub content_filter: ContentFilterConfig,
    pub scheduler: SchedulerSettings,
    pub storage: StorageSettings,
}

/// On-disk shape: every section optional so a file only overrides what it names
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigLayer {
    sandbox: Option<SandboxSettings>,
    rate_limits: Option<RateLimitsConfig>,
    roles: Option<RolesConfig>,
    content_filter: Option<ContentFilterConfig>,
    scheduler: Option<SchedulerSettings>,
    storage: Option<StorageSettings>,
}

impl WardenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Global + current project, merged
    pub fn load() -> Result<Self> {
        let global = JsonStore::global().ok();
        let project = JsonStore::current_project().ok();
        Self::load_from(global.as_ref(), project.as_ref())
    }

    /// Merge explicit stores (later wins per section)
    pub fn load_from(global: Option<&JsonStore>, project: Option<&JsonStore>) -> Result<Self> {
        let mut config = Self::new();

        for store in [global, project].into_iter().flatten() {
            if let Some(layer) = store.load_optional::<ConfigLayer>(WARDEN_CONFIG_FILE)? {
                config.apply(layer);
            }
        }

        Ok(config)
    }

    pub fn save_global(&self) -> Result<()> {
        JsonStore::global()?.save(WARDEN_CONFIG_FILE, self)
    }

    pub fn save_project(&self) -> Result<()> {
        JsonStore::current_project()?.save(WARDEN_CONFIG_FILE, self)
    }

    fn apply(&mut self, layer: ConfigLayer) {
        if let Some(sandbox) = layer.sandbox {
            self.sandbox = sandbox;
        }
        if let Some(rate_limits) = layer.rate_limits {
            self.rate_limits = rate_limits;
        }
        if let Some(roles) = layer.roles {
            self.roles = roles;
        }
        if let Some(content_filter) = layer.content_filter {
            self.content_filter = content_filter;
        }
        if let Some(scheduler) = layer.scheduler {
            self.scheduler = scheduler;
        }
        if let Some(storage) = layer.storage {
            self.storage = storage;
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxSettings {
    pub default_profile: SandboxConfig,
    /// Language name -> container image, overriding the built-in image
    pub images: BTreeMap<String, String>,
    /// Parent of per-execution scratch directories (system temp dir if unset)
    pub scratch_root: Option<PathBuf>,
    pub max_output_bytes: usize,
    pub pids_limit: i64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            // The bare profile allows nothing; the shipped one runs code
            default_profile: SandboxConfig::default().allow_tool("code_execution"),
            images: BTreeMap::new(),
            scratch_root: None,
            max_output_bytes: 64 * 1024,
            pids_limit: 64,
        }
    }
}

impl SandboxSettings {
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("warden-sandbox"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    pub temperature: f32,
    /// Upper bound on subtasks dispatched at once
    pub max_concurrent_subtasks: usize,
    /// Role -> system prompt used by model-backed workers
    pub worker_prompts: BTreeMap<String, String>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let mut worker_prompts = BTreeMap::new();
        worker_prompts.insert(
            "coder".to_string(),
            "You are a careful software engineer. Write correct, minimal code and run it when useful."
                .to_string(),
        );
        worker_prompts.insert(
            "security".to_string(),
            "You are a security reviewer. Look for unsafe behaviour, injection and data exposure."
                .to_string(),
        );
        worker_prompts.insert(
            "tester".to_string(),
            "You are a test engineer. Write and run tests that exercise edge cases.".to_string(),
        );
        worker_prompts.insert(
            "researcher".to_string(),
            "You are a researcher. Gather facts and summarize them with sources.".to_string(),
        );

        Self {
            temperature: 0.2,
            max_concurrent_subtasks: 4,
            worker_prompts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Directory for `warden.db` and `audit.db`
    pub data_dir: Option<PathBuf>,
}

impl StorageSettings {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("warden")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LimitType;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert_eq!(config.sandbox.default_profile.timeout_ms, 30_000);
        assert!(!config.sandbox.default_profile.network_access);
        assert_eq!(config.rate_limits.rule(LimitType::ApiCalls).limit, 100);
        assert!(config.scheduler.worker_prompts.contains_key("coder"));
    }

    #[test]
    fn test_project_section_replaces_global() {
        let global_dir = tempfile::tempdir().unwrap();
        let project_dir = tempfile::tempdir().unwrap();
        let global = JsonStore::new(global_dir.path());
        let project = JsonStore::new(project_dir.path());

        std::fs::write(
            global.file_path(WARDEN_CONFIG_FILE),
            r#"{
                "sandbox": { "maxOutputBytes": 10 },
                "scheduler": { "temperature": 0.9 }
            }"#,
        )
        .unwrap();
        std::fs::write(
            project.file_path(WARDEN_CONFIG_FILE),
            r#"{ "sandbox": { "defaultProfile": { "timeoutMs": 500 } } }"#,
        )
        .unwrap();

        let config = WardenConfig::load_from(Some(&global), Some(&project)).unwrap();

        // project sandbox section wins wholesale
        assert_eq!(config.sandbox.default_profile.timeout_ms, 500);
        assert_eq!(config.sandbox.max_output_bytes, 64 * 1024);
        // untouched global section survives
        assert!((config.scheduler.temperature - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_missing_files_yield_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let config = WardenConfig::load_from(Some(&store), None).unwrap();
        assert_eq!(config, WardenConfig::default());
    }
}
