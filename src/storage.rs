//! Storage abstractions for principals, roles and the permission catalog.
//!
//! [`DataProvider`] is the read side the resolution engine consumes.
//! [`Storage`] adds the writes used by mutation operations. Replace-all
//! association writes must be atomic: a reader sees either the old or the new
//! association set, never an empty one in between.

use crate::{
    error::Result,
    permission::PermissionNode,
    principal::Principal,
    role::Role,
};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Read access to RBAC records.
pub trait DataProvider: Send + Sync {
    /// Get a principal by ID.
    fn find_principal_by_id(&self, id: &str) -> Result<Option<Principal>>;

    /// Active roles assigned to a principal.
    fn find_roles_for_principal(&self, principal_id: &str) -> Result<Vec<Role>>;

    /// Enabled permissions assigned to a role.
    fn find_permissions_for_role(&self, role_id: &str) -> Result<Vec<PermissionNode>>;

    /// Get a permission by ID, enabled or not.
    fn find_permission_by_id(&self, id: &str) -> Result<Option<PermissionNode>>;

    /// Get a role by ID, active or not.
    fn find_role_by_id(&self, id: &str) -> Result<Option<Role>>;

    /// Every permission in the catalog, enabled or not.
    fn list_permissions(&self) -> Result<Vec<PermissionNode>>;

    /// Every role, active or not.
    fn list_roles(&self) -> Result<Vec<Role>>;

    /// Every principal, active or not.
    fn list_principals(&self) -> Result<Vec<Principal>>;

    /// Role IDs assigned to a principal, active or not.
    fn role_ids_for_principal(&self, principal_id: &str) -> Result<Vec<String>>;

    /// Permission IDs assigned to a role, enabled or not.
    fn permission_ids_for_role(&self, role_id: &str) -> Result<Vec<String>>;

    /// Principal IDs holding a role.
    fn principal_ids_with_role(&self, role_id: &str) -> Result<Vec<String>>;

    /// Role IDs granting a permission.
    fn role_ids_with_permission(&self, permission_id: &str) -> Result<Vec<String>>;
}

/// Write access to RBAC records.
pub trait Storage: DataProvider {
    /// Insert or replace a principal.
    fn store_principal(&self, principal: Principal) -> Result<()>;

    /// Insert or replace a role.
    fn store_role(&self, role: Role) -> Result<()>;

    /// Delete a role and its permission associations.
    fn delete_role(&self, id: &str) -> Result<bool>;

    /// Insert or replace a permission.
    fn store_permission(&self, permission: PermissionNode) -> Result<()>;

    /// Delete a permission.
    fn delete_permission(&self, id: &str) -> Result<bool>;

    /// Atomically replace a role's permission associations.
    fn replace_role_permissions(&self, role_id: &str, permission_ids: &[String]) -> Result<()>;

    /// Atomically replace a principal's role associations.
    fn replace_principal_roles(&self, principal_id: &str, role_ids: &[String]) -> Result<()>;

    /// Add one role association. Returns false if it already existed.
    fn add_principal_role(&self, principal_id: &str, role_id: &str) -> Result<bool>;

    /// Remove one role association. Returns false if it did not exist.
    fn remove_principal_role(&self, principal_id: &str, role_id: &str) -> Result<bool>;
}

/// In-memory storage implementation using DashMap for thread safety.
///
/// The two association tables sit behind one `RwLock` each so that a
/// replace-all write swaps the whole set under a single guard.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    principals: Arc<DashMap<String, Principal>>,
    roles: Arc<DashMap<String, Role>>,
    permissions: Arc<DashMap<String, PermissionNode>>,
    // (principal_id, role_id)
    principal_roles: Arc<RwLock<Vec<(String, String)>>>,
    // (role_id, permission_id)
    role_permissions: Arc<RwLock<Vec<(String, String)>>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn principal_count(&self) -> usize {
        self.principals.len()
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn permission_count(&self) -> usize {
        self.permissions.len()
    }

    /// Clear all stored data.
    pub fn clear(&self) -> Result<()> {
        self.principals.clear();
        self.roles.clear();
        self.permissions.clear();
        write(&self.principal_roles)?.clear();
        write(&self.role_permissions)?.clear();
        Ok(())
    }

    fn right_of(table: &RwLock<Vec<(String, String)>>, left: &str) -> Result<Vec<String>> {
        Ok(read(table)?
            .iter()
            .filter(|(l, _)| l == left)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn left_of(table: &RwLock<Vec<(String, String)>>, right: &str) -> Result<Vec<String>> {
        Ok(read(table)?
            .iter()
            .filter(|(_, r)| r == right)
            .map(|(l, _)| l.clone())
            .collect())
    }

    fn replace(table: &RwLock<Vec<(String, String)>>, left: &str, rights: &[String]) -> Result<()> {
        let mut seen = HashSet::new();
        let mut rows = write(table)?;
        rows.retain(|(l, _)| l != left);
        rows.extend(
            rights
                .iter()
                .filter(|r| seen.insert(r.as_str()))
                .map(|r| (left.to_string(), r.clone())),
        );
        Ok(())
    }
}

fn read(
    table: &RwLock<Vec<(String, String)>>,
) -> Result<std::sync::RwLockReadGuard<'_, Vec<(String, String)>>> {
    table
        .read()
        .map_err(|_| crate::Error::Storage("association table lock poisoned".to_string()))
}

fn write(
    table: &RwLock<Vec<(String, String)>>,
) -> Result<std::sync::RwLockWriteGuard<'_, Vec<(String, String)>>> {
    table
        .write()
        .map_err(|_| crate::Error::Storage("association table lock poisoned".to_string()))
}

impl DataProvider for MemoryStorage {
    fn find_principal_by_id(&self, id: &str) -> Result<Option<Principal>> {
        Ok(self.principals.get(id).map(|p| p.clone()))
    }

    fn find_roles_for_principal(&self, principal_id: &str) -> Result<Vec<Role>> {
        Ok(Self::right_of(&self.principal_roles, principal_id)?
            .iter()
            .filter_map(|role_id| self.roles.get(role_id).map(|r| r.clone()))
            .filter(Role::is_active)
            .collect())
    }

    fn find_permissions_for_role(&self, role_id: &str) -> Result<Vec<PermissionNode>> {
        Ok(Self::right_of(&self.role_permissions, role_id)?
            .iter()
            .filter_map(|permission_id| self.permissions.get(permission_id).map(|p| p.clone()))
            .filter(PermissionNode::is_enabled)
            .collect())
    }

    fn find_permission_by_id(&self, id: &str) -> Result<Option<PermissionNode>> {
        Ok(self.permissions.get(id).map(|p| p.clone()))
    }

    fn find_role_by_id(&self, id: &str) -> Result<Option<Role>> {
        Ok(self.roles.get(id).map(|r| r.clone()))
    }

    fn list_permissions(&self) -> Result<Vec<PermissionNode>> {
        Ok(self.permissions.iter().map(|entry| entry.value().clone()).collect())
    }

    fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.roles.iter().map(|entry| entry.value().clone()).collect())
    }

    fn list_principals(&self) -> Result<Vec<Principal>> {
        Ok(self.principals.iter().map(|entry| entry.value().clone()).collect())
    }

    fn role_ids_for_principal(&self, principal_id: &str) -> Result<Vec<String>> {
        Self::right_of(&self.principal_roles, principal_id)
    }

    fn permission_ids_for_role(&self, role_id: &str) -> Result<Vec<String>> {
        Self::right_of(&self.role_permissions, role_id)
    }

    fn principal_ids_with_role(&self, role_id: &str) -> Result<Vec<String>> {
        Self::left_of(&self.principal_roles, role_id)
    }

    fn role_ids_with_permission(&self, permission_id: &str) -> Result<Vec<String>> {
        Self::left_of(&self.role_permissions, permission_id)
    }
}

impl Storage for MemoryStorage {
    fn store_principal(&self, principal: Principal) -> Result<()> {
        self.principals.insert(principal.id().to_string(), principal);
        Ok(())
    }

    fn store_role(&self, role: Role) -> Result<()> {
        self.roles.insert(role.id().to_string(), role);
        Ok(())
    }

    fn delete_role(&self, id: &str) -> Result<bool> {
        let mut associations = write(&self.role_permissions)?;
        associations.retain(|(role_id, _)| role_id != id);
        Ok(self.roles.remove(id).is_some())
    }

    fn store_permission(&self, permission: PermissionNode) -> Result<()> {
        self.permissions
            .insert(permission.id().to_string(), permission);
        Ok(())
    }

    fn delete_permission(&self, id: &str) -> Result<bool> {
        Ok(self.permissions.remove(id).is_some())
    }

    fn replace_role_permissions(&self, role_id: &str, permission_ids: &[String]) -> Result<()> {
        Self::replace(&self.role_permissions, role_id, permission_ids)
    }

    fn replace_principal_roles(&self, principal_id: &str, role_ids: &[String]) -> Result<()> {
        Self::replace(&self.principal_roles, principal_id, role_ids)
    }

    fn add_principal_role(&self, principal_id: &str, role_id: &str) -> Result<bool> {
        let mut rows = write(&self.principal_roles)?;
        if rows.iter().any(|(p, r)| p == principal_id && r == role_id) {
            return Ok(false);
        }
        rows.push((principal_id.to_string(), role_id.to_string()));
        Ok(true)
    }

    fn remove_principal_role(&self, principal_id: &str, role_id: &str) -> Result<bool> {
        let mut rows = write(&self.principal_roles)?;
        let before = rows.len();
        rows.retain(|(p, r)| !(p == principal_id && r == role_id));
        Ok(rows.len() != before)
    }
}
