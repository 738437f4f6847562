//! Audit System
//!
//! Every authorization decision, sandbox outcome and content verdict produces
//! one immutable `AuditEntry`.
//!
//! ```text
//! SecurityGate ──┐
//! ContentFilter ─┼──► dyn AuditSink ──► AuditLogger (SQLite)
//! ExecutionMgr ──┘                  └─► MemoryAuditLog (tests)
//! ```
//!
//! Sinks never veto: a failed write is logged with `tracing` and the caller
//! carries on with its decision.

pub mod logger;
pub mod types;

pub use logger::{AuditLogger, AuditLoggerConfig, AuditSink, MemoryAuditLog};
pub use types::{
    AuditCategory, AuditDecision, AuditEntry, AuditId, AuditQuery, AuditStatistics,
};
