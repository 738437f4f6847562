//! # warden-foundation
//!
//! Foundation layer for Warden:
//! - Core: shared types (principal, resources, levels, limits, execution
//!   result, content verdict) and collaborator traits (Tool, ReasoningModel, Clock)
//! - Audit: immutable decision records (SQLite / in-memory)
//! - Storage: SQLite (runtime records), JsonStore (config files)
//! - Config: WardenConfig (sandbox, rate limits, roles, content filter, scheduler)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Layer4-cli        warden binary                         │
//! ├─────────────────────────────────────────────────────────┤
//! │  Layer3-scheduler  plan → subtask DAG → workers          │
//! ├─────────────────────────────────────────────────────────┤
//! │  Layer2-gate       permission / rate limit / content     │
//! │  Layer2-sandbox    isolation units, timeouts, teardown   │
//! ├─────────────────────────────────────────────────────────┤
//! │  Layer1-foundation (this crate)                          │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Core
// ============================================================================
pub use crate::core::{
    // Content
    CategoryScore,
    ContentCategory,
    ContentSafetyResult,
    // Execution
    ExecutionResult,
    FailureKind,
    ResourceUsage,
    SandboxConfig,
    // Types
    LimitType,
    Permission,
    PermissionLevel,
    Principal,
    ResourceRef,
    ResourceType,
    RoleGrant,
    Tier,
    ADMIN_ROLE,
    // Traits
    estimate_tokens,
    Capability,
    Clock,
    CompletionOptions,
    ManualClock,
    Message,
    MessageRole,
    ReasoningModel,
    SystemClock,
    Tool,
    ToolDescriptor,
    ToolOutput,
};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    CategoryRule, ContentFilterConfig, PatternRule, RateLimitRule, RateLimitsConfig,
    RolesConfig, SandboxSettings, SchedulerSettings, StorageSettings, WardenConfig,
    WARDEN_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{
    ConsumeOutcome, CounterKey, CounterState, JsonStore, ModerationRecord, Storage, TaskRecord,
};

// ============================================================================
// Audit
// ============================================================================
pub use audit::{
    AuditCategory, AuditDecision, AuditEntry, AuditId, AuditLogger, AuditLoggerConfig,
    AuditQuery, AuditSink, AuditStatistics, MemoryAuditLog,
};
