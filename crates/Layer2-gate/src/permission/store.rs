//! Grant storage
//!
//! Explicit per-user grants plus role-default grants. Role defaults come from
//! `RolesConfig`; the SQLite store lets persisted role tables override them.

use parking_lot::RwLock;
use std::collections::HashMap;
use warden_foundation::{
    Permission, PermissionLevel, ResourceRef, Result, RoleGrant, RolesConfig, Storage,
};

pub trait PermissionStore: Send + Sync {
    /// Explicit grant on exactly this `(type, id)`
    fn user_grant(&self, principal_id: &str, resource: &ResourceRef)
        -> Result<Option<PermissionLevel>>;

    fn user_grants(&self, principal_id: &str) -> Result<Vec<Permission>>;

    fn role_grants(&self, role: &str) -> Result<Vec<RoleGrant>>;

    /// Insert or replace
    fn grant(&self, permission: &Permission) -> Result<()>;

    /// `true` when a grant existed
    fn revoke(&self, principal_id: &str, resource: &ResourceRef) -> Result<bool>;
}

// ============================================================================
// In-memory
// ============================================================================

/// Grants keyed by principal, role defaults straight from config
pub struct MemoryPermissionStore {
    grants: RwLock<HashMap<String, HashMap<ResourceRef, PermissionLevel>>>,
    roles: RolesConfig,
}

impl MemoryPermissionStore {
    pub fn new(roles: RolesConfig) -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            roles,
        }
    }
}

impl Default for MemoryPermissionStore {
    fn default() -> Self {
        Self::new(RolesConfig::default())
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn user_grant(
        &self,
        principal_id: &str,
        resource: &ResourceRef,
    ) -> Result<Option<PermissionLevel>> {
        Ok(self
            .grants
            .read()
            .get(principal_id)
            .and_then(|g| g.get(resource))
            .copied())
    }

    fn user_grants(&self, principal_id: &str) -> Result<Vec<Permission>> {
        let grants = self.grants.read();
        let mut list: Vec<Permission> = grants
            .get(principal_id)
            .map(|g| {
                g.iter()
                    .map(|(resource, level)| {
                        Permission::new(principal_id, resource.clone(), *level)
                    })
                    .collect()
            })
            .unwrap_or_default();
        list.sort_by(|a, b| {
            (a.resource.resource_type.as_str(), &a.resource.resource_id)
                .cmp(&(b.resource.resource_type.as_str(), &b.resource.resource_id))
        });
        Ok(list)
    }

    fn role_grants(&self, role: &str) -> Result<Vec<RoleGrant>> {
        Ok(self.roles.grants(role).to_vec())
    }

    fn grant(&self, permission: &Permission) -> Result<()> {
        self.grants
            .write()
            .entry(permission.principal_id.clone())
            .or_default()
            .insert(permission.resource.clone(), permission.level);
        Ok(())
    }

    fn revoke(&self, principal_id: &str, resource: &ResourceRef) -> Result<bool> {
        Ok(self
            .grants
            .write()
            .get_mut(principal_id)
            .map(|g| g.remove(resource).is_some())
            .unwrap_or(false))
    }
}

// ============================================================================
// SQLite
// ============================================================================

pub struct SqlitePermissionStore {
    storage: Storage,
    roles: RolesConfig,
}

impl SqlitePermissionStore {
    pub fn new(storage: Storage, roles: RolesConfig) -> Self {
        Self { storage, roles }
    }
}

impl PermissionStore for SqlitePermissionStore {
    fn user_grant(
        &self,
        principal_id: &str,
        resource: &ResourceRef,
    ) -> Result<Option<PermissionLevel>> {
        Ok(self
            .storage
            .get_permission(principal_id, resource)?
            .map(|p| p.level))
    }

    fn user_grants(&self, principal_id: &str) -> Result<Vec<Permission>> {
        self.storage.list_permissions(principal_id)
    }

    fn role_grants(&self, role: &str) -> Result<Vec<RoleGrant>> {
        match self.storage.role_grants(role)? {
            Some(grants) => Ok(grants),
            None => Ok(self.roles.grants(role).to_vec()),
        }
    }

    fn grant(&self, permission: &Permission) -> Result<()> {
        self.storage.upsert_permission(permission)
    }

    fn revoke(&self, principal_id: &str, resource: &ResourceRef) -> Result<bool> {
        self.storage.revoke_permission(principal_id, resource)
    }
}
