//! Core - shared types and collaborator traits
//!
//! - `types`: principal, resources, permission levels, limit types
//! - `execution`: sandbox profile and execution result
//! - `content`: content safety verdicts
//! - `traits`: Tool, ReasoningModel, Clock

pub mod content;
pub mod execution;
pub mod traits;
pub mod types;

pub use content::{CategoryScore, ContentCategory, ContentSafetyResult};
pub use execution::{normalize_path, ExecutionResult, FailureKind, ResourceUsage, SandboxConfig};
pub use traits::{
    estimate_tokens, Capability, Clock, CompletionOptions, ManualClock, Message, MessageRole,
    ReasoningModel, SystemClock, Tool, ToolDescriptor, ToolOutput,
};
pub use types::{
    LimitType, Permission, PermissionLevel, Principal, ResourceRef, ResourceType, RoleGrant, Tier,
    ADMIN_ROLE,
};
