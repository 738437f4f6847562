//! Config - process-wide settings
//!
//! - `warden.rs` - WardenConfig (merged global + project JSON)
//! - `limits.rs` - rate-limit quotas
//! - `roles.rs` - role-default grants
//! - `filter.rs` - content filter rules

mod filter;
mod limits;
mod roles;
mod warden;

pub use filter::{CategoryRule, ContentFilterConfig, PatternRule, DEFAULT_REDACTION};
pub use limits::{RateLimitRule, RateLimitsConfig};
pub use roles::RolesConfig;
pub use warden::{
    SandboxSettings, SchedulerSettings, StorageSettings, WardenConfig, WARDEN_CONFIG_FILE,
};
