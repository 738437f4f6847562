//! Role-default grants
//!
//! Flat role table; roles do not inherit from one another. `admin` is not
//! listed because the permission checker passes it unconditionally.

use crate::core::{PermissionLevel, ResourceRef, ResourceType, RoleGrant};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RolesConfig {
    pub roles: BTreeMap<String, Vec<RoleGrant>>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        use PermissionLevel::*;
        use ResourceType::*;

        let mut roles = BTreeMap::new();
        roles.insert(
            "user".to_string(),
            vec![
                RoleGrant::new(ResourceRef::wildcard(Tool), Execute),
                RoleGrant::new(ResourceRef::own(File), Write),
                RoleGrant::new(ResourceRef::own(Workspace), Admin),
                RoleGrant::new(ResourceRef::own(UserData), Write),
                RoleGrant::new(ResourceRef::wildcard(Network), Read),
            ],
        );
        roles.insert(
            "guest".to_string(),
            vec![
                RoleGrant::new(ResourceRef::wildcard(Tool), Read),
                RoleGrant::new(ResourceRef::own(Workspace), Read),
            ],
        );
        Self { roles }
    }
}

impl RolesConfig {
    pub fn grants(&self, role: &str) -> &[RoleGrant] {
        self.roles.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn with_role(mut self, role: impl Into<String>, grants: Vec<RoleGrant>) -> Self {
        self.roles.insert(role.into(), grants);
        self
    }
}
