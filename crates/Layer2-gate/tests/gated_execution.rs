//! The gate in front of the sandbox: denials never reach the runtime

use serde_json::json;
use std::sync::Arc;
use warden_foundation::{
    AuditCategory, AuditDecision, AuditQuery, AuditSink, Error, LimitType, MemoryAuditLog,
    Principal, SandboxSettings, Storage, Tier, WardenConfig,
};
use warden_gate::{Action, NoOwnership, SecurityGate};
use warden_sandbox::testing::{FakeRuntime, FakeScript};
use warden_sandbox::{CodeExecutionTool, ExecutionManager};

struct Harness {
    gate: SecurityGate,
    runtime: Arc<FakeRuntime>,
    tool: CodeExecutionTool,
    audit: Arc<MemoryAuditLog>,
    _scratch: tempfile::TempDir,
}

fn harness(config: WardenConfig, storage: Option<Storage>) -> Harness {
    let scratch = tempfile::tempdir().unwrap();
    let audit = Arc::new(MemoryAuditLog::new());
    let gate = match storage {
        Some(storage) => SecurityGate::with_storage(&config, storage, Arc::new(NoOwnership)),
        None => SecurityGate::in_memory(&config),
    }
    .unwrap()
    .with_audit(audit.clone());

    let runtime = Arc::new(FakeRuntime::new(FakeScript::exit(0).with_stdout("ok\n")));
    let settings = SandboxSettings {
        scratch_root: Some(scratch.path().to_path_buf()),
        ..config.sandbox.clone()
    };
    let manager = Arc::new(ExecutionManager::new(runtime.clone(), settings));

    Harness {
        gate,
        runtime,
        tool: CodeExecutionTool::new(manager),
        audit,
        _scratch: scratch,
    }
}

#[tokio::test]
async fn test_exhausted_tool_usage_is_denied_before_any_unit_exists() {
    let h = harness(WardenConfig::default(), None);
    let alice = Principal::new("alice").with_role("user").with_tier(Tier::Basic);

    let quota = h.gate.limiter().limit_for(&alice, LimitType::ToolUsage);
    assert_eq!(quota, 100);
    let outcome = h
        .gate
        .limiter()
        .consume(&alice, LimitType::ToolUsage, quota, None)
        .unwrap();
    assert!(outcome.allowed);

    let result = h
        .gate
        .invoke_tool(&alice, &h.tool, json!({"code": "print(1)", "language": "python"}))
        .await;

    assert!(matches!(result, Err(Error::RateLimitExceeded(_))));
    assert_eq!(h.runtime.calls().created, 0);

    let denied = h
        .audit
        .query(
            &AuditQuery::new()
                .with_categories(vec![AuditCategory::Authorization])
                .with_decisions(vec![AuditDecision::Denied]),
        )
        .await
        .unwrap();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].principal.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_allowed_execution_reaches_the_sandbox() {
    let h = harness(WardenConfig::default(), None);
    let alice = Principal::new("alice").with_role("user");

    let output = h
        .gate
        .invoke_tool(&alice, &h.tool, json!({"code": "print('ok')", "language": "python"}))
        .await
        .unwrap();

    assert!(!output.is_error);
    assert_eq!(output.content, "ok\n");
    assert_eq!(h.runtime.calls().created, 1);
    assert_eq!(
        h.gate
            .limiter()
            .remaining(&alice, LimitType::ToolUsage, None)
            .unwrap(),
        49
    );
}

#[tokio::test]
async fn test_block_list_phrase_denies_regardless_of_scores() {
    let mut config = WardenConfig::default();
    config.content_filter = config.content_filter.block("operation nightfall");
    let h = harness(config, None);
    let alice = Principal::new("alice").with_role("user");

    let result = h
        .gate
        .invoke_tool(
            &alice,
            &h.tool,
            json!({"code": "print('Operation Nightfall status')", "language": "python"}),
        )
        .await;

    assert!(matches!(result, Err(Error::ContentBlocked(_))));
    assert_eq!(h.runtime.calls().created, 0);
    assert_eq!(
        h.gate
            .limiter()
            .remaining(&alice, LimitType::ToolUsage, None)
            .unwrap(),
        h.gate.limiter().limit_for(&alice, LimitType::ToolUsage)
    );
}

#[tokio::test]
async fn test_guest_cannot_execute_code() {
    let h = harness(WardenConfig::default(), None);
    let guest = Principal::new("visitor").with_role("guest");

    assert!(
        !h.gate
            .authorize_and_consume(&guest, &Action::CodeExecution, None)
            .await
    );
    let result = h
        .gate
        .invoke_tool(&guest, &h.tool, json!({"code": "print(1)", "language": "python"}))
        .await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
    assert_eq!(h.runtime.calls().created, 0);
}

#[tokio::test]
async fn test_sqlite_backed_quota_survives_gate_rebuild() {
    let storage = Storage::in_memory().unwrap();
    let alice = Principal::new("alice").with_role("user");

    let mut config = WardenConfig::default();
    config.rate_limits = config.rate_limits.with_rule(
        LimitType::ToolUsage,
        warden_foundation::RateLimitRule::new(1, 3_600),
    );

    let first = harness(config.clone(), Some(storage.clone()));
    assert!(
        first
            .gate
            .authorize_and_consume(&alice, &Action::CodeExecution, None)
            .await
    );

    let second = harness(config, Some(storage.clone()));
    assert!(
        !second
            .gate
            .authorize_and_consume(&alice, &Action::CodeExecution, None)
            .await
    );
}
