//! Rate limiter
//!
//! Fixed windows per `(principal, limit type, resource?)`. The quota is the
//! configured base limit times the principal's tier multiplier.

use super::store::CounterStore;
use std::sync::Arc;
use tracing::{debug, warn};
use warden_foundation::{
    Clock, ConsumeOutcome, CounterKey, LimitType, Principal, RateLimitRule, RateLimitsConfig,
    Result, SystemClock,
};

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitsConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitsConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rule(&self, limit_type: LimitType) -> RateLimitRule {
        self.config.rule(limit_type)
    }

    /// `limit × tier multiplier`
    pub fn limit_for(&self, principal: &Principal, limit_type: LimitType) -> u64 {
        self.rule(limit_type).effective_limit(principal.tier)
    }

    fn key(principal: &Principal, limit_type: LimitType, resource_id: Option<&str>) -> CounterKey {
        let key = CounterKey::new(&principal.id, limit_type);
        match resource_id {
            Some(id) => key.with_resource(id),
            None => key,
        }
    }

    /// Would consuming `amount` stay within quota? Does not consume.
    pub fn is_allowed(
        &self,
        principal: &Principal,
        limit_type: LimitType,
        amount: u64,
        resource_id: Option<&str>,
    ) -> Result<bool> {
        let key = Self::key(principal, limit_type, resource_id);
        let used = self
            .store
            .get(&key, self.clock.now())?
            .map(|s| s.count)
            .unwrap_or(0);
        Ok(used.saturating_add(amount) <= self.limit_for(principal, limit_type))
    }

    /// Atomic check-and-increment
    pub fn consume(
        &self,
        principal: &Principal,
        limit_type: LimitType,
        amount: u64,
        resource_id: Option<&str>,
    ) -> Result<ConsumeOutcome> {
        let key = Self::key(principal, limit_type, resource_id);
        let rule = self.rule(limit_type);
        let limit = rule.effective_limit(principal.tier);

        let outcome = self
            .store
            .try_consume(&key, amount, limit, rule.window(), self.clock.now())?;

        if outcome.allowed {
            debug!(
                user = %principal.id,
                limit_type = limit_type.as_str(),
                count = outcome.count,
                limit,
                "Quota consumed"
            );
        } else {
            warn!(
                user = %principal.id,
                limit_type = limit_type.as_str(),
                count = outcome.count,
                limit,
                requested = amount,
                "Rate limit exceeded"
            );
        }

        Ok(outcome)
    }

    pub fn remaining(
        &self,
        principal: &Principal,
        limit_type: LimitType,
        resource_id: Option<&str>,
    ) -> Result<u64> {
        let key = Self::key(principal, limit_type, resource_id);
        let used = self
            .store
            .get(&key, self.clock.now())?
            .map(|s| s.count)
            .unwrap_or(0);
        Ok(self.limit_for(principal, limit_type).saturating_sub(used))
    }

    pub fn reset(
        &self,
        principal: &Principal,
        limit_type: LimitType,
        resource_id: Option<&str>,
    ) -> Result<()> {
        self.store
            .reset(&Self::key(principal, limit_type, resource_id))
    }
}
