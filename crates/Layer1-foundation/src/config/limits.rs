//! Rate-limit quotas
//!
//! Base limit per limit type inside a fixed window. The effective quota is
//! `limit × tier multiplier`.

use crate::core::{LimitType, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    /// Base quota for a free-tier principal
    pub limit: u64,
    pub window_seconds: u64,
}

impl RateLimitRule {
    pub const fn new(limit: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    pub fn effective_limit(&self, tier: Tier) -> u64 {
        self.limit.saturating_mul(tier.multiplier())
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_seconds.min(i64::MAX as u64) as i64)
    }

    pub fn default_for(limit_type: LimitType) -> Self {
        match limit_type {
            LimitType::ApiCalls => Self::new(100, 60),
            LimitType::ToolUsage => Self::new(50, 3_600),
            // sandbox seconds
            LimitType::ComputeResources => Self::new(600, 3_600),
            LimitType::Storage => Self::new(1_000, 86_400),
            LimitType::Network => Self::new(200, 3_600),
            // estimated tokens
            LimitType::TokenUsage => Self::new(100_000, 86_400),
        }
    }
}

/// Per limit type overrides; missing entries fall back to the built-in table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitsConfig {
    pub rules: BTreeMap<LimitType, RateLimitRule>,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            rules: LimitType::ALL
                .iter()
                .map(|t| (*t, RateLimitRule::default_for(*t)))
                .collect(),
        }
    }
}

impl RateLimitsConfig {
    pub fn rule(&self, limit_type: LimitType) -> RateLimitRule {
        self.rules
            .get(&limit_type)
            .copied()
            .unwrap_or_else(|| RateLimitRule::default_for(limit_type))
    }

    pub fn with_rule(mut self, limit_type: LimitType, rule: RateLimitRule) -> Self {
        self.rules.insert(limit_type, rule);
        self
    }
}
