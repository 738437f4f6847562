//! Security gate
//!
//! Composes permission, rate limit and content checks into one decision per
//! requested action:
//!
//! ```text
//! action ─► policy (resource type, level, limit type)
//!              │
//!              ▼
//!        permission? ──no──► Denied(PermissionDenied)   (no quota consumed)
//!              │
//!              ▼
//!      try_consume(1) ──no──► Denied(RateLimitExceeded) (counter unchanged)
//!              │
//!              ▼
//!           Allowed
//! ```
//!
//! Evaluation errors deny (`InternalError`) and are logged in full. Every
//! decision is audited.

use crate::action::Action;
use crate::content_filter::ContentFilter;
use crate::permission::{
    MemoryPermissionStore, NoOwnership, OwnershipResolver, PermissionChecker,
    SqlitePermissionStore,
};
use crate::rate_limit::{MemoryCounterStore, RateLimiter, SqliteCounterStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_foundation::{
    AuditCategory, AuditDecision, AuditEntry, AuditSink, ContentSafetyResult, Error, LimitType,
    Principal, ResourceRef, ResourceType, Result, SandboxConfig, Storage, Tool, ToolOutput,
    WardenConfig,
};

pub const INTERNAL_ERROR_REASON: &str = "Internal error during authorization";

// ============================================================================
// Decision
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    PermissionDenied,
    RateLimitExceeded,
    ContentBlocked,
    InternalError,
}

impl DenialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::ContentBlocked => "content_blocked",
            Self::InternalError => "internal_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied { kind: DenialKind, reason: String },
}

impl GateDecision {
    pub fn denied(kind: DenialKind, reason: impl Into<String>) -> Self {
        Self::Denied {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn kind(&self) -> Option<DenialKind> {
        match self {
            Self::Allowed => None,
            Self::Denied { kind, .. } => Some(*kind),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Denied { reason, .. } => Some(reason),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied { kind, reason } => Err(match kind {
                DenialKind::PermissionDenied => Error::PermissionDenied(reason),
                DenialKind::RateLimitExceeded => Error::RateLimitExceeded(reason),
                DenialKind::ContentBlocked => Error::ContentBlocked(reason),
                DenialKind::InternalError => Error::Internal(reason),
            }),
        }
    }
}

// ============================================================================
// Gate
// ============================================================================

pub struct SecurityGate {
    checker: PermissionChecker,
    limiter: RateLimiter,
    filter: ContentFilter,
    /// Allowed tool ids for `invoke_tool`
    tool_profile: SandboxConfig,
    audit: Option<Arc<dyn AuditSink>>,
}

impl SecurityGate {
    pub fn new(checker: PermissionChecker, limiter: RateLimiter, filter: ContentFilter) -> Self {
        Self {
            checker,
            limiter,
            filter,
            tool_profile: WardenConfig::default().sandbox.default_profile,
            audit: None,
        }
    }

    /// Memory-backed grants and counters, no ownership lookups
    pub fn in_memory(config: &WardenConfig) -> Result<Self> {
        let checker = PermissionChecker::new(
            Arc::new(MemoryPermissionStore::new(config.roles.clone())),
            Arc::new(NoOwnership),
        );
        let limiter = RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            config.rate_limits.clone(),
        );
        let filter = ContentFilter::new(config.content_filter.clone())?;
        Ok(Self::new(checker, limiter, filter)
            .with_tool_profile(config.sandbox.default_profile.clone()))
    }

    /// SQLite-backed grants, counters and moderation log
    pub fn with_storage(
        config: &WardenConfig,
        storage: Storage,
        ownership: Arc<dyn OwnershipResolver>,
    ) -> Result<Self> {
        let checker = PermissionChecker::new(
            Arc::new(SqlitePermissionStore::new(storage.clone(), config.roles.clone())),
            ownership,
        );
        let limiter = RateLimiter::new(
            Arc::new(SqliteCounterStore::new(storage.clone())),
            config.rate_limits.clone(),
        );
        let filter = ContentFilter::new(config.content_filter.clone())?.with_storage(storage);
        Ok(Self::new(checker, limiter, filter)
            .with_tool_profile(config.sandbox.default_profile.clone()))
    }

    /// Audits gate decisions and content verdicts
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.filter = self.filter.with_audit(audit.clone());
        self.audit = Some(audit);
        self
    }

    pub fn with_tool_profile(mut self, profile: SandboxConfig) -> Self {
        self.tool_profile = profile;
        self
    }

    pub fn checker(&self) -> &PermissionChecker {
        &self.checker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn filter(&self) -> &ContentFilter {
        &self.filter
    }

    /// Check without consuming quota
    pub async fn authorize(
        &self,
        principal: &Principal,
        action: &Action,
        resource: Option<&ResourceRef>,
    ) -> GateDecision {
        self.evaluate(principal, action, resource, false).await
    }

    /// Check, then atomically consume one unit of the action's quota
    pub async fn authorize_consuming(
        &self,
        principal: &Principal,
        action: &Action,
        resource: Option<&ResourceRef>,
    ) -> GateDecision {
        self.evaluate(principal, action, resource, true).await
    }

    pub async fn authorize_and_consume(
        &self,
        principal: &Principal,
        action: &Action,
        resource: Option<&ResourceRef>,
    ) -> bool {
        self.authorize_consuming(principal, action, resource)
            .await
            .is_allowed()
    }

    async fn evaluate(
        &self,
        principal: &Principal,
        action: &Action,
        resource: Option<&ResourceRef>,
        consume: bool,
    ) -> GateDecision {
        let resource = resource
            .cloned()
            .unwrap_or_else(|| action.default_resource());

        let decision = match self.decide(principal, action, &resource, consume).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    user = %principal.id,
                    action = %action,
                    resource = %resource,
                    error = %e,
                    "Authorization failed, denying"
                );
                GateDecision::denied(DenialKind::InternalError, INTERNAL_ERROR_REASON)
            }
        };

        match &decision {
            GateDecision::Allowed => {
                info!(user = %principal.id, action = %action, resource = %resource, "Action authorized")
            }
            GateDecision::Denied { kind, reason } => warn!(
                user = %principal.id,
                action = %action,
                resource = %resource,
                denial = kind.as_str(),
                reason = %reason,
                "Action denied"
            ),
        }

        self.audit_decision(
            AuditEntry::new(
                AuditCategory::Authorization,
                action.as_str(),
                audit_decision(&decision),
            )
            .with_principal(&principal.id)
            .with_target(resource.to_string())
            .with_data(json!({
                "consume": consume,
                "denial": decision.kind(),
            })),
            &decision,
        )
        .await;

        decision
    }

    async fn decide(
        &self,
        principal: &Principal,
        action: &Action,
        resource: &ResourceRef,
        consume: bool,
    ) -> Result<GateDecision> {
        let policy = action.policy();

        let resolution = self
            .checker
            .resolve(principal, resource, policy.level)
            .await?;
        if !resolution.is_granted() {
            return Ok(GateDecision::denied(
                DenialKind::PermissionDenied,
                format!("{} requires {} on {}", action, policy.level, resource),
            ));
        }

        let limit_type = policy.limit_type;
        if consume {
            let outcome = self.limiter.consume(principal, limit_type, 1, None)?;
            if !outcome.allowed {
                return Ok(GateDecision::denied(
                    DenialKind::RateLimitExceeded,
                    format!(
                        "{} quota exhausted ({}/{})",
                        limit_type.as_str(),
                        outcome.count,
                        outcome.limit
                    ),
                ));
            }
        } else if !self.limiter.is_allowed(principal, limit_type, 1, None)? {
            let limit = self.limiter.limit_for(principal, limit_type);
            let used = limit.saturating_sub(self.limiter.remaining(principal, limit_type, None)?);
            return Ok(GateDecision::denied(
                DenialKind::RateLimitExceeded,
                format!("{} quota exhausted ({}/{})", limit_type.as_str(), used, limit),
            ));
        }

        Ok(GateDecision::Allowed)
    }

    /// Run the content filter for `principal`; the verdict is audited there
    pub async fn screen_content(&self, principal: &Principal, text: &str) -> ContentSafetyResult {
        self.filter.analyze_content(Some(&principal.id), text).await
    }

    /// Charge post-hoc usage (tokens, compute ms). Refuses charges that would
    /// overflow the quota; the counter is left unchanged then.
    pub async fn record_cost(&self, principal: &Principal, limit_type: LimitType, amount: u64) -> bool {
        let decision = match self.limiter.consume(principal, limit_type, amount, None) {
            Ok(outcome) if outcome.allowed => GateDecision::Allowed,
            Ok(outcome) => {
                warn!(
                    user = %principal.id,
                    limit_type = limit_type.as_str(),
                    amount,
                    count = outcome.count,
                    limit = outcome.limit,
                    "Cost charge refused"
                );
                GateDecision::denied(
                    DenialKind::RateLimitExceeded,
                    format!(
                        "{} charge of {} refused ({}/{})",
                        limit_type.as_str(),
                        amount,
                        outcome.count,
                        outcome.limit
                    ),
                )
            }
            Err(e) => {
                error!(user = %principal.id, limit_type = limit_type.as_str(), error = %e, "Cost charge failed");
                GateDecision::denied(DenialKind::InternalError, INTERNAL_ERROR_REASON)
            }
        };

        self.audit_decision(
            AuditEntry::new(
                AuditCategory::Cost,
                limit_type.as_str(),
                audit_decision(&decision),
            )
            .with_principal(&principal.id)
            .with_data(json!({ "amount": amount })),
            &decision,
        )
        .await;

        decision.is_allowed()
    }

    /// Availability → allowed-tool list → capability authorization (no quota
    /// yet) → content screening for code-bearing tools → one quota unit for
    /// the primary capability → `tool.execute` → compute charge.
    ///
    /// A request denied at any step consumes nothing.
    pub async fn invoke_tool(
        &self,
        principal: &Principal,
        tool: &dyn Tool,
        params: Value,
    ) -> Result<ToolOutput> {
        let tool_id = tool.id().to_string();

        if !tool.is_available().await {
            return Err(Error::Tool(format!("Tool '{}' is not available", tool_id)));
        }

        if !self.tool_profile.is_tool_allowed(&tool_id) {
            let decision = GateDecision::denied(
                DenialKind::PermissionDenied,
                format!("tool {} is not in the allowed tool list", tool_id),
            );
            self.audit_decision(
                AuditEntry::new(AuditCategory::Tool, &tool_id, audit_decision(&decision))
                    .with_principal(&principal.id),
                &decision,
            )
            .await;
            decision.into_result()?;
        }

        let capabilities = tool.capabilities();
        let mut actions: Vec<Action> = capabilities
            .iter()
            .map(|c| Action::for_capability(*c))
            .collect();
        if actions.is_empty() {
            actions.push(Action::ToolUse);
        }
        let checks: Vec<(Action, ResourceRef)> = actions
            .into_iter()
            .map(|action| {
                let resource = if action.policy().resource_type == ResourceType::Tool {
                    ResourceRef::new(ResourceType::Tool, &tool_id)
                } else {
                    action.default_resource()
                };
                (action, resource)
            })
            .collect();

        for (action, resource) in &checks {
            self.authorize(principal, action, Some(resource))
                .await
                .into_result()?;
        }

        let code_bearing = capabilities.iter().any(|c| c.is_code_bearing());
        if code_bearing {
            if !self
                .limiter
                .is_allowed(principal, LimitType::ComputeResources, 1, None)?
            {
                let limit = self.limiter.limit_for(principal, LimitType::ComputeResources);
                let used = limit.saturating_sub(self.limiter.remaining(
                    principal,
                    LimitType::ComputeResources,
                    None,
                )?);
                return Err(Error::RateLimitExceeded(format!(
                    "{} quota exhausted ({}/{})",
                    LimitType::ComputeResources.as_str(),
                    used,
                    limit
                )));
            }

            let text = collect_strings(&params);
            let verdict = self.screen_content(principal, &text).await;
            if !verdict.is_allowed {
                let reason = verdict
                    .reason
                    .unwrap_or_else(|| "content policy violation".to_string());
                return Err(Error::ContentBlocked(reason));
            }
        }

        if let Some((action, resource)) = checks.first() {
            self.authorize_consuming(principal, action, Some(resource))
                .await
                .into_result()?;
        }

        let started = std::time::Instant::now();
        let output = tool.execute(params).await;
        let elapsed = started.elapsed().as_millis() as u64;

        let decision = match &output {
            Ok(o) if !o.is_error => AuditDecision::Success,
            Ok(_) => AuditDecision::Failure,
            Err(_) => AuditDecision::Error,
        };
        if let Some(audit) = &self.audit {
            let entry = AuditEntry::new(AuditCategory::Tool, &tool_id, decision)
                .with_principal(&principal.id)
                .with_duration(elapsed);
            if let Err(e) = audit.record(entry).await {
                error!(tool = %tool_id, error = %e, "Failed to audit tool invocation");
            }
        }

        if let Ok(o) = &output {
            self.charge_compute(principal, &tool_id, o).await;
        }

        output
    }

    /// Charge the sandbox time reported in `executionTimeMs` as compute
    /// seconds, rounded up
    async fn charge_compute(&self, principal: &Principal, tool_id: &str, output: &ToolOutput) {
        let Some(ms) = output
            .metadata
            .as_ref()
            .and_then(|m| m.get("executionTimeMs"))
            .and_then(Value::as_u64)
        else {
            return;
        };
        let seconds = ms.div_ceil(1_000).max(1);
        if !self
            .record_cost(principal, LimitType::ComputeResources, seconds)
            .await
        {
            warn!(user = %principal.id, tool = %tool_id, seconds, "Compute charge not recorded");
        }
    }

    async fn audit_decision(&self, entry: AuditEntry, decision: &GateDecision) {
        let Some(audit) = &self.audit else {
            return;
        };
        let entry = match decision.reason() {
            Some(reason) => entry.with_reason(reason),
            None => entry,
        };
        if let Err(e) = audit.record(entry).await {
            error!(error = %e, "Failed to audit gate decision");
        }
    }
}

fn audit_decision(decision: &GateDecision) -> AuditDecision {
    if decision.is_allowed() {
        AuditDecision::Allowed
    } else {
        AuditDecision::Denied
    }
}

/// Every string value in `params`, newline separated
fn collect_strings(params: &Value) -> String {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(params, &mut out);
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_foundation::{
        AuditQuery, Capability, MemoryAuditLog, Permission, PermissionLevel, RateLimitRule, Tier,
    };

    fn config() -> WardenConfig {
        let mut config = WardenConfig::default();
        config.rate_limits = config
            .rate_limits
            .with_rule(LimitType::ToolUsage, RateLimitRule::new(2, 3_600));
        config.content_filter = config.content_filter.block("project nightingale");
        config
    }

    fn gate() -> (SecurityGate, Arc<MemoryAuditLog>) {
        let audit = Arc::new(MemoryAuditLog::new());
        let gate = SecurityGate::in_memory(&config())
            .unwrap()
            .with_audit(audit.clone());
        (gate, audit)
    }

    struct EchoTool {
        calls: AtomicUsize,
        capabilities: Vec<Capability>,
        execution_ms: Option<u64>,
    }

    impl EchoTool {
        fn new(capabilities: Vec<Capability>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                capabilities,
                execution_ms: None,
            }
        }

        fn reporting_ms(mut self, ms: u64) -> Self {
            self.execution_ms = Some(ms);
            self
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn id(&self) -> &str {
            "code_execution"
        }

        fn capabilities(&self) -> Vec<Capability> {
            self.capabilities.clone()
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, params: Value) -> Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let output = ToolOutput::success(params.to_string());
            Ok(match self.execution_ms {
                Some(ms) => output.with_metadata(json!({ "executionTimeMs": ms })),
                None => output,
            })
        }
    }

    #[tokio::test]
    async fn test_permission_denial_consumes_nothing() {
        let (gate, audit) = gate();
        let guest = Principal::new("guest-1").with_role("guest");

        let decision = gate
            .authorize_consuming(&guest, &Action::CodeExecution, None)
            .await;

        assert_eq!(decision.kind(), Some(DenialKind::PermissionDenied));
        assert_eq!(
            decision.reason(),
            Some("code_execution requires execute on tool:code_execution")
        );
        assert_eq!(
            gate.limiter()
                .remaining(&guest, LimitType::ToolUsage, None)
                .unwrap(),
            2
        );
        assert_eq!(audit.entries()[0].decision, AuditDecision::Denied);
    }

    #[tokio::test]
    async fn test_quota_exhaustion() {
        let (gate, _) = gate();
        let user = Principal::new("alice").with_role("user");

        assert!(gate.authorize_and_consume(&user, &Action::CodeExecution, None).await);
        assert!(gate.authorize_and_consume(&user, &Action::CodeExecution, None).await);

        let decision = gate
            .authorize_consuming(&user, &Action::CodeExecution, None)
            .await;
        assert_eq!(decision.kind(), Some(DenialKind::RateLimitExceeded));
        assert_eq!(decision.reason(), Some("tool_usage quota exhausted (2/2)"));

        // authorize() reports the same without consuming
        let peek = gate.authorize(&user, &Action::CodeExecution, None).await;
        assert_eq!(peek.kind(), Some(DenialKind::RateLimitExceeded));
    }

    #[tokio::test]
    async fn test_tier_scales_quota() {
        let (gate, _) = gate();
        let pro = Principal::new("pro")
            .with_role("user")
            .with_tier(Tier::Enterprise);

        for _ in 0..20 {
            assert!(gate.authorize_and_consume(&pro, &Action::CodeExecution, None).await);
        }
        assert!(!gate.authorize_and_consume(&pro, &Action::CodeExecution, None).await);
    }

    #[tokio::test]
    async fn test_unknown_action_needs_system_read() {
        let (gate, _) = gate();
        let user = Principal::new("alice").with_role("user");
        let unknown: Action = "teleport".parse().unwrap();

        assert!(!gate.authorize_and_consume(&user, &unknown, None).await);

        gate.checker()
            .store()
            .grant(&Permission::new(
                "alice",
                ResourceRef::wildcard(ResourceType::System),
                PermissionLevel::Read,
            ))
            .unwrap();
        assert!(gate.authorize_and_consume(&user, &unknown, None).await);
        assert_eq!(
            gate.limiter()
                .remaining(&user, LimitType::ApiCalls, None)
                .unwrap(),
            99
        );
    }

    #[tokio::test]
    async fn test_record_cost_refuses_overflow() {
        let (gate, audit) = gate();
        let user = Principal::new("alice");

        assert!(gate.record_cost(&user, LimitType::TokenUsage, 99_000).await);
        assert!(!gate.record_cost(&user, LimitType::TokenUsage, 2_000).await);
        assert_eq!(
            gate.limiter()
                .remaining(&user, LimitType::TokenUsage, None)
                .unwrap(),
            1_000
        );

        let costs = audit
            .query(&AuditQuery::new().with_categories(vec![AuditCategory::Cost]))
            .await
            .unwrap();
        assert_eq!(costs.len(), 2);
    }

    #[tokio::test]
    async fn test_screen_content_block_list() {
        let (gate, _) = gate();
        let user = Principal::new("alice");

        let verdict = gate
            .screen_content(&user, "print('Project Nightingale launch codes')")
            .await;
        assert!(!verdict.is_allowed);
    }

    #[tokio::test]
    async fn test_invoke_tool_pipeline() {
        let (gate, _) = gate();
        let user = Principal::new("alice").with_role("user");
        let tool = EchoTool::new(vec![Capability::CodeExecution]);

        let output = gate
            .invoke_tool(&user, &tool, json!({"code": "print(1)", "language": "python"}))
            .await
            .unwrap();
        assert!(!output.is_error);

        let blocked = gate
            .invoke_tool(&user, &tool, json!({"code": ":(){ :|:& };:", "language": "bash"}))
            .await;
        assert!(matches!(blocked, Err(Error::ContentBlocked(_))));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);

        gate.invoke_tool(&user, &tool, json!({"code": "print(2)", "language": "python"}))
            .await
            .unwrap();
        let exhausted = gate
            .invoke_tool(&user, &tool, json!({"code": "print(3)", "language": "python"}))
            .await;
        assert!(matches!(exhausted, Err(Error::RateLimitExceeded(_))));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_content_blocked_call_consumes_nothing() {
        let (gate, _) = gate();
        let user = Principal::new("alice").with_role("user");
        let tool = EchoTool::new(vec![Capability::CodeExecution]);

        for _ in 0..2 {
            let blocked = gate
                .invoke_tool(
                    &user,
                    &tool,
                    json!({"code": "print('project nightingale')", "language": "python"}),
                )
                .await;
            assert!(matches!(blocked, Err(Error::ContentBlocked(_))));
        }
        assert_eq!(
            gate.limiter()
                .remaining(&user, LimitType::ToolUsage, None)
                .unwrap(),
            2
        );

        gate.invoke_tool(&user, &tool, json!({"code": "print(1)", "language": "python"}))
            .await
            .unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_tool_charges_compute_seconds() {
        let mut config = config();
        config.rate_limits = config
            .rate_limits
            .with_rule(LimitType::ComputeResources, RateLimitRule::new(3, 3_600));
        let audit = Arc::new(MemoryAuditLog::new());
        let gate = SecurityGate::in_memory(&config)
            .unwrap()
            .with_audit(audit.clone());
        let user = Principal::new("alice").with_role("user");
        let tool = EchoTool::new(vec![Capability::CodeExecution]).reporting_ms(2_500);

        gate.invoke_tool(&user, &tool, json!({"code": "print(1)", "language": "python"}))
            .await
            .unwrap();
        assert_eq!(
            gate.limiter()
                .remaining(&user, LimitType::ComputeResources, None)
                .unwrap(),
            0
        );
        let costs = audit
            .query(&AuditQuery::new().with_categories(vec![AuditCategory::Cost]))
            .await
            .unwrap();
        assert_eq!(costs.len(), 1);

        let result = gate
            .invoke_tool(&user, &tool, json!({"code": "print(2)", "language": "python"}))
            .await;
        assert!(matches!(result, Err(Error::RateLimitExceeded(_))));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            gate.limiter()
                .remaining(&user, LimitType::ToolUsage, None)
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_invoke_tool_respects_allow_list() {
        let (gate, _) = gate();
        let gate = gate.with_tool_profile(SandboxConfig::default());
        let user = Principal::new("alice").with_role("user");
        let tool = EchoTool::new(vec![Capability::CodeExecution]);

        let result = gate.invoke_tool(&user, &tool, json!({})).await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_collect_strings() {
        let params = json!({"code": "a", "nested": {"list": ["b", 1, "c"]}});
        let text = collect_strings(&params);
        for s in ["a", "b", "c"] {
            assert!(text.contains(s));
        }
    }
}
