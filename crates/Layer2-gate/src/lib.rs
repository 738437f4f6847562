//! # warden-gate
//!
//! Authorizes every sandboxed action before it runs and charges its cost:
//!
//! - `permission`: explicit grants, role defaults, ownership
//! - `rate_limit`: fixed-window quotas scaled by tier
//! - `content_filter`: block/allow lists and weighted category patterns
//! - `action`: action → (resource type, level, limit type) table
//! - `gate`: `SecurityGate`, the single entry point, plus gated tool invocation
//!
//! The gate fails closed: evaluation errors are denials.

pub mod action;
pub mod content_filter;
pub mod gate;
pub mod permission;
pub mod rate_limit;

pub use action::{Action, ActionPolicy};
pub use content_filter::ContentFilter;
pub use gate::{DenialKind, GateDecision, SecurityGate};
pub use permission::{
    MemoryPermissionStore, NoOwnership, OwnershipResolver, PermissionChecker, PermissionStore,
    Resolution, SqlitePermissionStore, StaticOwnership,
};
pub use rate_limit::{CounterStore, MemoryCounterStore, RateLimiter, SqliteCounterStore};
