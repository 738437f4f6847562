//! Action table
//!
//! Every requested action maps to the resource type and level it needs and
//! to the quota it is charged against. Names arriving from outside that do
//! not match a known action become `Unknown` and take the conservative
//! default `(system, read, api_calls)`.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use warden_foundation::{Capability, LimitType, PermissionLevel, ResourceRef, ResourceType};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CodeExecution,
    ToolUse,
    FileRead,
    FileWrite,
    NetworkRequest,
    WorkspaceRead,
    WorkspaceWrite,
    WorkspaceAdmin,
    UserDataRead,
    UserDataWrite,
    Deployment,
    ModelInference,
    StorageWrite,
    SystemAdmin,
    Unknown(String),
}

/// What an action requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionPolicy {
    pub resource_type: ResourceType,
    pub level: PermissionLevel,
    pub limit_type: LimitType,
}

impl ActionPolicy {
    const fn new(resource_type: ResourceType, level: PermissionLevel, limit_type: LimitType) -> Self {
        Self {
            resource_type,
            level,
            limit_type,
        }
    }
}

impl Action {
    pub fn policy(&self) -> ActionPolicy {
        use LimitType as L;
        use PermissionLevel as P;
        use ResourceType as R;

        match self {
            Self::CodeExecution => ActionPolicy::new(R::Tool, P::Execute, L::ToolUsage),
            Self::ToolUse => ActionPolicy::new(R::Tool, P::Execute, L::ToolUsage),
            Self::FileRead => ActionPolicy::new(R::File, P::Read, L::ApiCalls),
            Self::FileWrite => ActionPolicy::new(R::File, P::Write, L::Storage),
            Self::NetworkRequest => ActionPolicy::new(R::Network, P::Read, L::Network),
            Self::WorkspaceRead => ActionPolicy::new(R::Workspace, P::Read, L::ApiCalls),
            Self::WorkspaceWrite => ActionPolicy::new(R::Workspace, P::Write, L::ApiCalls),
            Self::WorkspaceAdmin => ActionPolicy::new(R::Workspace, P::Admin, L::ApiCalls),
            Self::UserDataRead => ActionPolicy::new(R::UserData, P::Read, L::ApiCalls),
            Self::UserDataWrite => ActionPolicy::new(R::UserData, P::Write, L::Storage),
            Self::Deployment => ActionPolicy::new(R::Deployment, P::Write, L::ComputeResources),
            Self::ModelInference => ActionPolicy::new(R::Tool, P::Execute, L::TokenUsage),
            Self::StorageWrite => ActionPolicy::new(R::UserData, P::Write, L::Storage),
            Self::SystemAdmin => ActionPolicy::new(R::System, P::Admin, L::ApiCalls),
            Self::Unknown(_) => ActionPolicy::new(R::System, P::Read, L::ApiCalls),
        }
    }

    /// Resource checked when the caller names none
    pub fn default_resource(&self) -> ResourceRef {
        match self {
            Self::CodeExecution => ResourceRef::new(ResourceType::Tool, "code_execution"),
            Self::ModelInference => ResourceRef::new(ResourceType::Tool, "model_inference"),
            other => ResourceRef::wildcard(other.policy().resource_type),
        }
    }

    pub fn for_capability(capability: Capability) -> Self {
        match capability {
            Capability::CodeExecution => Self::CodeExecution,
            Capability::FileRead => Self::FileRead,
            Capability::FileWrite => Self::FileWrite,
            Capability::Network => Self::NetworkRequest,
            Capability::WorkspaceRead => Self::WorkspaceRead,
            Capability::WorkspaceWrite => Self::WorkspaceWrite,
            Capability::UserDataRead => Self::UserDataRead,
            Capability::UserDataWrite => Self::UserDataWrite,
            Capability::Deployment => Self::Deployment,
            Capability::ModelInference => Self::ModelInference,
            Capability::Storage => Self::StorageWrite,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::CodeExecution => "code_execution",
            Self::ToolUse => "tool_use",
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::NetworkRequest => "network_request",
            Self::WorkspaceRead => "workspace_read",
            Self::WorkspaceWrite => "workspace_write",
            Self::WorkspaceAdmin => "workspace_admin",
            Self::UserDataRead => "user_data_read",
            Self::UserDataWrite => "user_data_write",
            Self::Deployment => "deployment",
            Self::ModelInference => "model_inference",
            Self::StorageWrite => "storage_write",
            Self::SystemAdmin => "system_admin",
            Self::Unknown(name) => name,
        }
    }
}

impl FromStr for Action {
    type Err = Infallible;

    /// `code-execution` and `code_execution` name the same action
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().replace('-', "_");
        Ok(match name.as_str() {
            "code_execution" => Self::CodeExecution,
            "tool_use" => Self::ToolUse,
            "file_read" => Self::FileRead,
            "file_write" => Self::FileWrite,
            "network_request" => Self::NetworkRequest,
            "workspace_read" => Self::WorkspaceRead,
            "workspace_write" => Self::WorkspaceWrite,
            "workspace_admin" => Self::WorkspaceAdmin,
            "user_data_read" => Self::UserDataRead,
            "user_data_write" => Self::UserDataWrite,
            "deployment" => Self::Deployment,
            "model_inference" => Self::ModelInference,
            "storage_write" => Self::StorageWrite,
            "system_admin" => Self::SystemAdmin,
            _ => Self::Unknown(s.to_string()),
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_names_round_trip() {
        for name in [
            "code_execution",
            "tool_use",
            "file_read",
            "file_write",
            "network_request",
            "workspace_read",
            "workspace_write",
            "workspace_admin",
            "user_data_read",
            "user_data_write",
            "deployment",
            "model_inference",
            "storage_write",
            "system_admin",
        ] {
            let action: Action = name.parse().unwrap();
            assert!(!matches!(action, Action::Unknown(_)), "{name}");
            assert_eq!(action.as_str(), name);
        }
    }

    #[test]
    fn test_hyphenated_names() {
        let action: Action = "code-execution".parse().unwrap();
        assert_eq!(action, Action::CodeExecution);
        assert_eq!(action.policy().limit_type, LimitType::ToolUsage);
        assert_eq!(
            "user-data-write".parse::<Action>().unwrap(),
            Action::UserDataWrite
        );
    }

    #[test]
    fn test_unknown_takes_conservative_default() {
        let action: Action = "launch_rockets".parse().unwrap();
        assert_eq!(action, Action::Unknown("launch_rockets".into()));
        assert_eq!(
            action.policy(),
            ActionPolicy {
                resource_type: ResourceType::System,
                level: PermissionLevel::Read,
                limit_type: LimitType::ApiCalls,
            }
        );
    }

    #[test]
    fn test_code_execution_policy() {
        let policy = Action::CodeExecution.policy();
        assert_eq!(policy.resource_type, ResourceType::Tool);
        assert_eq!(policy.level, PermissionLevel::Execute);
        assert_eq!(policy.limit_type, LimitType::ToolUsage);
        assert_eq!(
            Action::CodeExecution.default_resource(),
            ResourceRef::new(ResourceType::Tool, "code_execution")
        );
        assert_eq!(
            Action::for_capability(Capability::CodeExecution),
            Action::CodeExecution
        );
    }
}
