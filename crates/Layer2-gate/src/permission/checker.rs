//! Permission resolution
//!
//! Order for a request `(principal, type:id, level)`:
//!
//! 1. An explicit user grant on exactly `type:id` decides alone.
//! 2. Principals with the `admin` role pass.
//! 3. Wildcard grants, first sufficient match wins: the user's own `*`/`own`
//!    grants on the type, then each role's defaults in role order. A grant
//!    matches on the exact id, on `*`, or on `own` when the ownership
//!    resolver confirms the principal owns the resource. A failed ownership
//!    lookup counts as "not owner".
//!
//! No match is a denial, never an error.

use super::store::PermissionStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use warden_foundation::{PermissionLevel, Principal, ResourceRef, Result};

// ============================================================================
// Ownership
// ============================================================================

/// Resolves whether a principal owns a concrete resource
#[async_trait]
pub trait OwnershipResolver: Send + Sync {
    async fn is_owner(&self, principal_id: &str, resource: &ResourceRef) -> Result<bool>;
}

/// Owns nothing; `own` grants never match
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOwnership;

#[async_trait]
impl OwnershipResolver for NoOwnership {
    async fn is_owner(&self, _principal_id: &str, _resource: &ResourceRef) -> Result<bool> {
        Ok(false)
    }
}

/// Fixed ownership table
#[derive(Debug, Default)]
pub struct StaticOwnership {
    owned: RwLock<HashSet<(String, ResourceRef)>>,
}

impl StaticOwnership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(self, principal_id: impl Into<String>, resource: ResourceRef) -> Self {
        self.set_owner(principal_id, resource);
        self
    }

    pub fn set_owner(&self, principal_id: impl Into<String>, resource: ResourceRef) {
        self.owned.write().insert((principal_id.into(), resource));
    }
}

#[async_trait]
impl OwnershipResolver for StaticOwnership {
    async fn is_owner(&self, principal_id: &str, resource: &ResourceRef) -> Result<bool> {
        Ok(self
            .owned
            .read()
            .contains(&(principal_id.to_string(), resource.clone())))
    }
}

// ============================================================================
// Checker
// ============================================================================

/// Which rule settled a permission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exact user grant; `level` may or may not suffice
    UserGrant { level: PermissionLevel, sufficient: bool },
    Admin,
    /// Wildcard or ownership grant; `role` is `None` for the user's own grants
    Grant {
        role: Option<String>,
        resource: ResourceRef,
        level: PermissionLevel,
    },
    NoMatch,
}

impl Resolution {
    pub fn is_granted(&self) -> bool {
        match self {
            Self::UserGrant { sufficient, .. } => *sufficient,
            Self::Admin | Self::Grant { .. } => true,
            Self::NoMatch => false,
        }
    }
}

pub struct PermissionChecker {
    store: Arc<dyn PermissionStore>,
    ownership: Arc<dyn OwnershipResolver>,
}

impl PermissionChecker {
    pub fn new(store: Arc<dyn PermissionStore>, ownership: Arc<dyn OwnershipResolver>) -> Self {
        Self { store, ownership }
    }

    pub fn store(&self) -> &Arc<dyn PermissionStore> {
        &self.store
    }

    pub async fn has_permission(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
        required: PermissionLevel,
    ) -> Result<bool> {
        Ok(self.resolve(principal, resource, required).await?.is_granted())
    }

    pub async fn resolve(
        &self,
        principal: &Principal,
        resource: &ResourceRef,
        required: PermissionLevel,
    ) -> Result<Resolution> {
        if let Some(level) = self.store.user_grant(&principal.id, resource)? {
            let sufficient = level.satisfies(required);
            debug!(
                user = %principal.id,
                resource = %resource,
                granted = %level,
                required = %required,
                "Explicit grant decides"
            );
            return Ok(Resolution::UserGrant { level, sufficient });
        }

        if principal.is_admin() {
            return Ok(Resolution::Admin);
        }

        let own_wildcards = self
            .store
            .user_grants(&principal.id)?
            .into_iter()
            .filter(|p| p.resource.is_wildcard() || p.resource.is_own())
            .map(|p| (None, p.resource, p.level));

        let mut candidates: Vec<(Option<String>, ResourceRef, PermissionLevel)> =
            own_wildcards.collect();
        for role in &principal.roles {
            for grant in self.store.role_grants(role)? {
                candidates.push((Some(role.clone()), grant.resource, grant.level));
            }
        }

        for (role, granted, level) in candidates {
            if granted.resource_type != resource.resource_type || !level.satisfies(required) {
                continue;
            }
            if self.matches(principal, &granted, resource).await? {
                debug!(
                    user = %principal.id,
                    resource = %resource,
                    role = role.as_deref().unwrap_or("-"),
                    via = %granted,
                    "Default grant matched"
                );
                return Ok(Resolution::Grant {
                    role,
                    resource: granted,
                    level,
                });
            }
        }

        Ok(Resolution::NoMatch)
    }

    async fn matches(
        &self,
        principal: &Principal,
        granted: &ResourceRef,
        requested: &ResourceRef,
    ) -> Result<bool> {
        if granted.is_wildcard() || granted.resource_id == requested.resource_id {
            return Ok(true);
        }
        if granted.is_own() && !requested.is_wildcard() && !requested.is_own() {
            return match self.ownership.is_owner(&principal.id, requested).await {
                Ok(owner) => Ok(owner),
                Err(e) => {
                    warn!(
                        user = %principal.id,
                        resource = %requested,
                        error = %e,
                        "Ownership lookup failed, treating as not owner"
                    );
                    Ok(false)
                }
            };
        }
        Ok(false)
    }
}
