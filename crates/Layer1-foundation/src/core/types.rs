//! Core Types - principals, resources, permission levels, limit types
//!
//! Shared by the gate, the sandbox and the scheduler.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Tier
// ============================================================================

/// Subscription tier; scales every rate-limit quota by a fixed multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl Tier {
    pub fn multiplier(&self) -> u64 {
        match self {
            Self::Free => 1,
            Self::Basic => 2,
            Self::Premium => 5,
            Self::Enterprise => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
        }
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "premium" => Ok(Self::Premium),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(Error::InvalidInput(format!("unknown tier: {}", other))),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Principal
// ============================================================================

/// Role name that bypasses role-default and ownership checks
pub const ADMIN_ROLE: &str = "admin";

/// The identity an action is requested on behalf of.
///
/// Resolved outside of Warden (authentication is someone else's job); the
/// core only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier: Tier::Free,
            roles: Vec::new(),
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Tool,
    File,
    Network,
    Workspace,
    UserData,
    System,
    Deployment,
}

impl ResourceType {
    pub const ALL: [ResourceType; 7] = [
        Self::Tool,
        Self::File,
        Self::Network,
        Self::Workspace,
        Self::UserData,
        Self::System,
        Self::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::File => "file",
            Self::Network => "network",
            Self::Workspace => "workspace",
            Self::UserData => "user_data",
            Self::System => "system",
            Self::Deployment => "deployment",
        }
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown resource type: {}", s)))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(type, id)` pair. `"*"` matches every id of the type; `"own"` matches
/// resources owned by the requesting principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl ResourceRef {
    pub const WILDCARD: &'static str = "*";
    pub const OWN: &'static str = "own";

    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    pub fn wildcard(resource_type: ResourceType) -> Self {
        Self::new(resource_type, Self::WILDCARD)
    }

    pub fn own(resource_type: ResourceType) -> Self {
        Self::new(resource_type, Self::OWN)
    }

    pub fn is_wildcard(&self) -> bool {
        self.resource_id == Self::WILDCARD
    }

    pub fn is_own(&self) -> bool {
        self.resource_id == Self::OWN
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

/// `type:id`
impl FromStr for ResourceRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource_type, resource_id) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("expected type:id, got {}", s)))?;
        if resource_id.is_empty() {
            return Err(Error::InvalidInput(format!("empty resource id in {}", s)));
        }
        Ok(Self::new(resource_type.parse()?, resource_id))
    }
}

// ============================================================================
// Permission levels
// ============================================================================

/// Totally ordered: `none < read < execute < write < admin`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    #[default]
    None,
    Read,
    Execute,
    Write,
    Admin,
}

impl PermissionLevel {
    pub const ALL: [PermissionLevel; 5] = [
        Self::None,
        Self::Read,
        Self::Execute,
        Self::Write,
        Self::Admin,
    ];

    /// A grant at `self` suffices for a request at `required`
    pub fn satisfies(&self, required: PermissionLevel) -> bool {
        *self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Execute => "execute",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for PermissionLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown permission level: {}", s)))
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit per-user grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub principal_id: String,
    #[serde(flatten)]
    pub resource: ResourceRef,
    pub level: PermissionLevel,
}

impl Permission {
    pub fn new(
        principal_id: impl Into<String>,
        resource: ResourceRef,
        level: PermissionLevel,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            resource,
            level,
        }
    }
}

/// Grant attached to a role rather than a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    #[serde(flatten)]
    pub resource: ResourceRef,
    pub level: PermissionLevel,
}

impl RoleGrant {
    pub fn new(resource: ResourceRef, level: PermissionLevel) -> Self {
        Self { resource, level }
    }
}

// ============================================================================
// Rate limits
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    ApiCalls,
    ToolUsage,
    ComputeResources,
    Storage,
    Network,
    TokenUsage,
}

impl LimitType {
    pub const ALL: [LimitType; 6] = [
        Self::ApiCalls,
        Self::ToolUsage,
        Self::ComputeResources,
        Self::Storage,
        Self::Network,
        Self::TokenUsage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiCalls => "api_calls",
            Self::ToolUsage => "tool_usage",
            Self::ComputeResources => "compute_resources",
            Self::Storage => "storage",
            Self::Network => "network",
            Self::TokenUsage => "token_usage",
        }
    }
}

impl FromStr for LimitType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown limit type: {}", s)))
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_level_order() {
        assert!(PermissionLevel::None < PermissionLevel::Read);
        assert!(PermissionLevel::Read < PermissionLevel::Execute);
        assert!(PermissionLevel::Execute < PermissionLevel::Write);
        assert!(PermissionLevel::Write < PermissionLevel::Admin);
        assert!(PermissionLevel::Write.satisfies(PermissionLevel::Execute));
        assert!(!PermissionLevel::Read.satisfies(PermissionLevel::Write));
    }

    #[test]
    fn test_tier_multiplier() {
        assert_eq!(Tier::Free.multiplier(), 1);
        assert_eq!(Tier::Basic.multiplier(), 2);
        assert_eq!(Tier::Premium.multiplier(), 5);
        assert_eq!(Tier::Enterprise.multiplier(), 10);
    }

    #[test]
    fn test_parse_round_trip() {
        for t in ResourceType::ALL {
            assert_eq!(t.as_str().parse::<ResourceType>().unwrap(), t);
        }
        for l in LimitType::ALL {
            assert_eq!(l.as_str().parse::<LimitType>().unwrap(), l);
        }
        assert!("root".parse::<PermissionLevel>().is_err());
    }

    #[test]
    fn test_resource_ref_parse() {
        let r: ResourceRef = "tool:code_execution".parse().unwrap();
        assert_eq!(r, ResourceRef::new(ResourceType::Tool, "code_execution"));
        assert_eq!(r.to_string().parse::<ResourceRef>().unwrap(), r);
        assert!("workspace:*".parse::<ResourceRef>().unwrap().is_wildcard());
        assert!("tool".parse::<ResourceRef>().is_err());
        assert!("planet:earth".parse::<ResourceRef>().is_err());
    }

    #[test]
    fn test_permission_serde_is_flat() {
        let p = Permission::new(
            "u1",
            ResourceRef::new(ResourceType::Tool, "python"),
            PermissionLevel::Execute,
        );
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["principalId"], "u1");
        assert_eq!(json["resourceType"], "tool");
        assert_eq!(json["resourceId"], "python");
        assert_eq!(json["level"], "execute");
    }

    #[test]
    fn test_principal_admin() {
        let p = Principal::new("alice").with_role("user");
        assert!(!p.is_admin());
        assert!(p.with_role(ADMIN_ROLE).is_admin());
    }
}
