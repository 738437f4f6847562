//! Rate limiting
//!
//! - `store`: atomic fixed-window counters (memory / SQLite)
//! - `limiter`: quotas per limit type scaled by tier

mod limiter;
mod store;

pub use limiter::RateLimiter;
pub use store::{CounterStore, MemoryCounterStore, SqliteCounterStore};
