//! Subcommand handlers. Each returns `Ok(false)` when the process should
//! exit non-zero without an error message of its own.

use crate::{ConfigAction, ExecArgs};
use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use warden_foundation::{
    AuditLogger, AuditLoggerConfig, AuditSink, JsonStore, Permission, PermissionLevel,
    ResourceRef, Storage, WardenConfig, WARDEN_CONFIG_FILE,
};
use warden_gate::{ContentFilter, NoOwnership, PermissionStore, SqlitePermissionStore};
use warden_sandbox::{DockerRuntime, Language, CODE_EXECUTION_TOOL_ID};
use warden_scheduler::WardenContext;

// ============================================================================
// exec
// ============================================================================

pub async fn exec(config: WardenConfig, args: ExecArgs) -> anyhow::Result<bool> {
    let (code, language) = resolve_source(&args)?;
    let principal = args.principal.principal()?;
    debug!(principal = %principal.id, language = %language, "exec requested");

    let runtime = Arc::new(DockerRuntime::connect()?);
    let ctx = WardenContext::open(config, runtime, Arc::new(NoOwnership))?;
    let tool = ctx
        .tools()
        .get(CODE_EXECUTION_TOOL_ID)
        .ok_or_else(|| anyhow!("code execution tool is not registered"))?;

    let mut params = json!({ "code": code, "language": language });
    if let Some(input) = args.input {
        params["input"] = json!(input);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        params["timeoutMs"] = json!(timeout_ms);
    }

    let output = ctx
        .gate()
        .invoke_tool(&principal, tool.as_ref(), params)
        .await?;

    if args.json {
        let result = output.metadata.clone().unwrap_or(Value::Null);
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", output.content);
        if !output.content.ends_with('\n') {
            println!();
        }
    }

    Ok(!output.is_error)
}

/// Code and language from `--code`/`--file` and `--language`
fn resolve_source(args: &ExecArgs) -> anyhow::Result<(String, String)> {
    let code = match (&args.code, &args.file) {
        (Some(code), _) => code.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => bail!("either --code or --file is required"),
    };

    let language = match (&args.language, &args.file) {
        (Some(language), _) => language.clone(),
        (None, Some(path)) => language_for(path)
            .ok_or_else(|| anyhow!("cannot infer language of {}; pass --language", path.display()))?
            .as_str()
            .to_string(),
        (None, None) => bail!("--language is required with --code"),
    };

    Ok((code, language))
}

fn language_for(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?;
    let name = match ext {
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" => "typescript",
        "sh" | "bash" => "bash",
        _ => return None,
    };
    name.parse().ok()
}

// ============================================================================
// scan
// ============================================================================

pub fn scan(
    config: &WardenConfig,
    text: Option<String>,
    file: Option<PathBuf>,
    json_out: bool,
) -> anyhow::Result<bool> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let filter = ContentFilter::new(config.content_filter.clone())?;
    let verdict = filter.evaluate(&text)?;

    if json_out {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(verdict.is_allowed);
    }

    if verdict.is_allowed {
        println!("allowed");
    } else {
        println!(
            "blocked: {}",
            verdict.reason.as_deref().unwrap_or("content policy violation")
        );
    }
    for score in verdict.categories.iter().filter(|s| s.confidence > 0.0) {
        println!("  {:<16} {:.2}", score.category.to_string(), score.confidence);
    }
    if let Some(redacted) = &verdict.redacted_content {
        println!("\n{}", redacted);
    }

    Ok(verdict.is_allowed)
}

// ============================================================================
// check-command / check-path
// ============================================================================

pub fn check_command(config: &WardenConfig, command: &str) -> bool {
    let allowed = config.sandbox.default_profile.is_command_allowed(command);
    println!("{}", if allowed { "allowed" } else { "denied" });
    allowed
}

pub fn check_path(config: &WardenConfig, path: &str) -> bool {
    let allowed = config.sandbox.default_profile.is_file_path_allowed(path);
    println!("{}", if allowed { "allowed" } else { "denied" });
    allowed
}

// ============================================================================
// grant
// ============================================================================

pub fn grant(
    config: &WardenConfig,
    principal: &str,
    resource: &str,
    level: Option<&str>,
    revoke: bool,
) -> anyhow::Result<bool> {
    let storage = Storage::new(&config.storage.data_dir())?;
    apply_grant(
        &SqlitePermissionStore::new(storage, config.roles.clone()),
        principal,
        resource,
        level,
        revoke,
    )
}

fn apply_grant(
    store: &dyn PermissionStore,
    principal: &str,
    resource: &str,
    level: Option<&str>,
    revoke: bool,
) -> anyhow::Result<bool> {
    let resource: ResourceRef = resource.parse()?;
    debug!(principal, resource = %resource, revoke, "updating grant");

    if revoke {
        let removed = store.revoke(principal, &resource)?;
        if removed {
            println!("revoked {} on {}", principal, resource);
        } else {
            println!("no grant for {} on {}", principal, resource);
        }
        return Ok(removed);
    }

    let level: PermissionLevel = level
        .ok_or_else(|| anyhow!("a permission level is required"))?
        .parse()?;
    store.grant(&Permission::new(principal, resource.clone(), level))?;
    println!("granted {} {} on {}", principal, level, resource);
    Ok(true)
}

// ============================================================================
// audit
// ============================================================================

pub async fn audit(config: &WardenConfig, limit: usize) -> anyhow::Result<bool> {
    let logger = AuditLogger::with_config(AuditLoggerConfig {
        db_path: config.storage.data_dir().join("audit.db"),
        ..Default::default()
    })?;

    let entries = logger.recent(limit).await?;
    if entries.is_empty() {
        println!("No audit records.");
        return Ok(true);
    }

    for entry in entries {
        println!(
            "{} {:<13} {:<9} {:<16} {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.category.as_str(),
            entry.decision.as_str(),
            entry.action,
            entry.principal.as_deref().unwrap_or("-"),
            entry.reason.as_deref().unwrap_or("")
        );
    }
    Ok(true)
}

// ============================================================================
// config
// ============================================================================

pub fn config(config: &WardenConfig, action: ConfigAction) -> anyhow::Result<bool> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Init { global, force } => {
            let store = if global {
                JsonStore::global()?
            } else {
                JsonStore::current_project()?
            };
            if store.exists(WARDEN_CONFIG_FILE) && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    store.file_path(WARDEN_CONFIG_FILE).display()
                );
            }
            store.save(WARDEN_CONFIG_FILE, &WardenConfig::default())?;
            println!("wrote {}", store.file_path(WARDEN_CONFIG_FILE).display());
        }
        ConfigAction::Path => {
            if let Ok(store) = JsonStore::global() {
                println!("global:  {}", store.file_path(WARDEN_CONFIG_FILE).display());
            }
            if let Ok(store) = JsonStore::current_project() {
                println!("project: {}", store.file_path(WARDEN_CONFIG_FILE).display());
            }
            println!("data:    {}", config.storage.data_dir().display());
        }
    }
    Ok(true)
}
