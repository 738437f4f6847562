//! Counter storage
//!
//! `try_consume` is the only mutating path and is atomic per key: the
//! check and the increment happen under one lock (memory) or one immediate
//! transaction (SQLite). Reads never create counters; the memory store drops
//! a principal's expired counters on its next `try_consume`.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use warden_foundation::{
    ConsumeOutcome, CounterKey, CounterState, LimitType, Result, Storage,
};

pub trait CounterStore: Send + Sync {
    /// Adds `amount` unless the result would exceed `limit`. A fresh window
    /// (`now + window`) starts when the key is absent or expired.
    fn try_consume(
        &self,
        key: &CounterKey,
        amount: u64,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>;

    /// Live counter, `None` when absent or expired
    fn get(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<Option<CounterState>>;

    fn reset(&self, key: &CounterKey) -> Result<()>;
}

// ============================================================================
// In-memory
// ============================================================================

type ShardKey = (LimitType, Option<String>);
type Shard = Arc<Mutex<HashMap<ShardKey, CounterState>>>;

/// One lock per principal; different principals never contend
#[derive(Default)]
pub struct MemoryCounterStore {
    shards: RwLock<HashMap<String, Shard>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_shard(&self, principal_id: &str) -> Option<Shard> {
        self.shards.read().get(principal_id).cloned()
    }

    fn shard(&self, principal_id: &str) -> Shard {
        if let Some(shard) = self.existing_shard(principal_id) {
            return shard;
        }
        self.shards
            .write()
            .entry(principal_id.to_string())
            .or_default()
            .clone()
    }

    fn shard_key(key: &CounterKey) -> ShardKey {
        (key.limit_type, key.resource_id.clone())
    }

    #[cfg(test)]
    fn slot_count(&self) -> (usize, usize) {
        let shards = self.shards.read();
        let slots = shards.values().map(|s| s.lock().len()).sum();
        (shards.len(), slots)
    }
}

impl CounterStore for MemoryCounterStore {
    fn try_consume(
        &self,
        key: &CounterKey,
        amount: u64,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let shard = self.shard(&key.principal_id);
        let mut counters = shard.lock();
        counters.retain(|_, state| state.window_expiry > now);
        let slot = Self::shard_key(key);

        let (current, expiry) = match counters.get(&slot) {
            Some(state) if state.window_expiry > now => (state.count, state.window_expiry),
            _ => (0, now + window),
        };

        let projected = current.saturating_add(amount);
        if projected > limit {
            return Ok(ConsumeOutcome {
                allowed: false,
                count: current,
                limit,
                window_expiry: expiry,
            });
        }

        counters.insert(
            slot,
            CounterState {
                count: projected,
                window_expiry: expiry,
            },
        );

        Ok(ConsumeOutcome {
            allowed: true,
            count: projected,
            limit,
            window_expiry: expiry,
        })
    }

    fn get(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<Option<CounterState>> {
        let Some(shard) = self.existing_shard(&key.principal_id) else {
            return Ok(None);
        };
        let counters = shard.lock();
        Ok(counters
            .get(&Self::shard_key(key))
            .copied()
            .filter(|s| s.window_expiry > now))
    }

    fn reset(&self, key: &CounterKey) -> Result<()> {
        if let Some(shard) = self.existing_shard(&key.principal_id) {
            shard.lock().remove(&Self::shard_key(key));
        }
        Ok(())
    }
}

// ============================================================================
// SQLite
// ============================================================================

pub struct SqliteCounterStore {
    storage: Storage,
}

impl SqliteCounterStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl CounterStore for SqliteCounterStore {
    fn try_consume(
        &self,
        key: &CounterKey,
        amount: u64,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        self.storage
            .try_consume_counter(key, amount, limit, window, now)
    }

    fn get(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<Option<CounterState>> {
        self.storage.get_counter(key, now)
    }

    fn reset(&self, key: &CounterKey) -> Result<()> {
        self.storage.reset_counter(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn exercise(store: &dyn CounterStore) {
        let key = CounterKey::new("alice", LimitType::ApiCalls);
        let t0 = Utc::now();
        let window = Duration::seconds(60);

        let first = store.try_consume(&key, 1, 3, window, t0).unwrap();
        assert!(first.allowed);
        assert_eq!(first.count, 1);
        assert_eq!(first.window_expiry, t0 + window);

        // Later consumptions keep the window opened by the first one
        let second = store
            .try_consume(&key, 2, 3, window, t0 + Duration::seconds(10))
            .unwrap();
        assert!(second.allowed);
        assert_eq!(second.count, 3);
        assert_eq!(second.window_expiry, t0 + window);

        let rejected = store
            .try_consume(&key, 1, 3, window, t0 + Duration::seconds(20))
            .unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.count, 3);
        assert_eq!(store.get(&key, t0).unwrap().unwrap().count, 3);

        // Window over: fresh start
        let later = t0 + Duration::seconds(61);
        assert!(store.get(&key, later).unwrap().is_none());
        let fresh = store.try_consume(&key, 1, 3, window, later).unwrap();
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.window_expiry, later + window);

        // Keys are independent per limit type and resource
        let scoped = CounterKey::new("alice", LimitType::ApiCalls).with_resource("tool-a");
        assert_eq!(store.try_consume(&scoped, 3, 3, window, later).unwrap().count, 3);
        assert_eq!(store.get(&key, later).unwrap().unwrap().count, 1);

        store.reset(&key).unwrap();
        assert!(store.get(&key, later).unwrap().is_none());
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryCounterStore::new());
    }

    #[test]
    fn test_memory_reads_do_not_allocate() {
        let store = MemoryCounterStore::new();
        let now = Utc::now();
        for id in ["alice", "bob", "carol"] {
            let key = CounterKey::new(id, LimitType::ApiCalls);
            assert!(store.get(&key, now).unwrap().is_none());
            store.reset(&key).unwrap();
        }
        assert_eq!(store.slot_count(), (0, 0));
    }

    #[test]
    fn test_memory_expired_counters_are_dropped() {
        let store = MemoryCounterStore::new();
        let t0 = Utc::now();
        let window = Duration::seconds(60);
        for limit_type in [LimitType::ApiCalls, LimitType::ToolUsage] {
            let key = CounterKey::new("alice", limit_type);
            store.try_consume(&key, 1, 10, window, t0).unwrap();
            let scoped = key.with_resource("tool-a");
            store.try_consume(&scoped, 1, 10, window, t0).unwrap();
        }
        assert_eq!(store.slot_count(), (1, 4));

        let later = t0 + Duration::seconds(61);
        let key = CounterKey::new("alice", LimitType::TokenUsage);
        store.try_consume(&key, 5, 10, window, later).unwrap();
        assert_eq!(store.slot_count(), (1, 1));
        assert_eq!(store.get(&key, later).unwrap().unwrap().count, 5);
    }

    #[test]
    fn test_sqlite_store() {
        exercise(&SqliteCounterStore::new(Storage::in_memory().unwrap()));
    }

    #[test]
    fn test_concurrent_consumers_never_exceed_limit() {
        let store = Arc::new(MemoryCounterStore::new());
        let now = Utc::now();
        let key = CounterKey::new("alice", LimitType::ToolUsage);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                thread::spawn(move || {
                    (0..50)
                        .filter(|_| {
                            store
                                .try_consume(&key, 1, 100, Duration::hours(1), now)
                                .unwrap()
                                .allowed
                        })
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
        assert_eq!(store.get(&key, now).unwrap().unwrap().count, 100);
    }
}
