//! Audit Log Types
//!
//! One immutable record per authorization decision, sandbox outcome and
//! content verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Audit Entry ID
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditId(pub String);

impl AuditId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Category / Decision
// ============================================================================

/// Which subsystem produced the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Permission + quota decision
    Authorization,
    /// Post-hoc cost charge
    Cost,
    /// Content filter verdict
    Content,
    /// Sandbox execution outcome
    Sandbox,
    /// Gated tool invocation
    Tool,
    /// Scheduler task lifecycle
    Task,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::Cost => "cost",
            Self::Content => "content",
            Self::Sandbox => "sandbox",
            Self::Tool => "tool",
            Self::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authorization" => Some(Self::Authorization),
            "cost" => Some(Self::Cost),
            "content" => Some(Self::Content),
            "sandbox" => Some(Self::Sandbox),
            "tool" => Some(Self::Tool),
            "task" => Some(Self::Task),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Allowed,
    Denied,
    Success,
    Failure,
    Timeout,
    Error,
}

impl AuditDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allowed" => Some(Self::Allowed),
            "denied" => Some(Self::Denied),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "timeout" => Some(Self::Timeout),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Allowed | Self::Success)
    }
}

// ============================================================================
// Audit Entry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: AuditId,
    pub timestamp: DateTime<Utc>,
    pub principal: Option<String>,
    pub category: AuditCategory,
    pub decision: AuditDecision,
    /// Stable reason string for denials and failures
    pub reason: Option<String>,
    /// Action name (e.g. `code_execution`, `scan`)
    pub action: String,
    /// Resource, tool id or language the record is about
    pub target: Option<String>,
    /// Execution id, task id or scan id
    pub correlation_id: Option<String>,
    pub data: Value,
    pub duration_ms: Option<u64>,
}

impl AuditEntry {
    pub fn new(
        category: AuditCategory,
        action: impl Into<String>,
        decision: AuditDecision,
    ) -> Self {
        Self {
            id: AuditId::new(),
            timestamp: Utc::now(),
            principal: None,
            category,
            decision,
            reason: None,
            action: action.into(),
            target: None,
            correlation_id: None,
            data: Value::Null,
            duration_ms: None,
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

// ============================================================================
// Audit Query
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub principal: Option<String>,
    pub categories: Option<Vec<AuditCategory>>,
    pub decisions: Option<Vec<AuditDecision>>,
    pub correlation_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_categories(mut self, categories: Vec<AuditCategory>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn with_decisions(mut self, decisions: Vec<AuditDecision>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref principal) = self.principal {
            if entry.principal.as_ref() != Some(principal) {
                return false;
            }
        }

        if let Some(ref categories) = self.categories {
            if !categories.contains(&entry.category) {
                return false;
            }
        }

        if let Some(ref decisions) = self.decisions {
            if !decisions.contains(&entry.decision) {
                return false;
            }
        }

        if let Some(ref correlation_id) = self.correlation_id {
            if entry.correlation_id.as_ref() != Some(correlation_id) {
                return false;
            }
        }

        if let Some(ref from) = self.from {
            if entry.timestamp < *from {
                return false;
            }
        }

        if let Some(ref to) = self.to {
            if entry.timestamp > *to {
                return false;
            }
        }

        true
    }
}

// ============================================================================
// Audit Statistics
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    pub total_entries: u64,
    pub by_category: HashMap<String, u64>,
    pub by_decision: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_matches() {
        let entry = AuditEntry::new(
            AuditCategory::Authorization,
            "code_execution",
            AuditDecision::Denied,
        )
        .with_principal("alice")
        .with_reason("rate_limit_exceeded");

        assert!(AuditQuery::new().with_principal("alice").matches(&entry));
        assert!(!AuditQuery::new().with_principal("bob").matches(&entry));
        assert!(AuditQuery::new()
            .with_decisions(vec![AuditDecision::Denied])
            .matches(&entry));
        assert!(!AuditQuery::new()
            .with_categories(vec![AuditCategory::Sandbox])
            .matches(&entry));
    }

    #[test]
    fn test_category_parse() {
        for c in [
            AuditCategory::Authorization,
            AuditCategory::Cost,
            AuditCategory::Content,
            AuditCategory::Sandbox,
            AuditCategory::Tool,
            AuditCategory::Task,
        ] {
            assert_eq!(AuditCategory::parse(c.as_str()), Some(c));
        }
    }
}
