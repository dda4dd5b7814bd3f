//! JSON seed documents for populating and exporting storage.
//!
//! ```json
//! {
//!   "permissions": [
//!     { "id": "sys", "key": "system", "name": "System", "type": "MENU" },
//!     { "id": "usr", "key": "user.list", "name": "Users", "type": "PAGE", "parent_id": "sys" }
//!   ],
//!   "roles": [{ "id": "r-admin", "name": "Admin", "code": "admin" }],
//!   "principals": [{ "id": "u1", "account": "alice", "type": "ADMIN" }],
//!   "role_permissions": { "r-admin": ["usr"] },
//!   "principal_roles": { "u1": ["r-admin"] }
//! }
//! ```

#[cfg(feature = "audit")]
use log::info;

use crate::{
    core::PermissionEngine,
    error::{Error, Result},
    permission::PermissionNode,
    principal::Principal,
    role::Role,
    storage::{DataProvider, Storage},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A complete catalog with its associations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedDocument {
    #[serde(default)]
    pub permissions: Vec<PermissionNode>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub principals: Vec<Principal>,
    /// Role ID to granted permission IDs.
    #[serde(default)]
    pub role_permissions: BTreeMap<String, Vec<String>>,
    /// Principal ID to assigned role IDs.
    #[serde(default)]
    pub principal_roles: BTreeMap<String, Vec<String>>,
}

/// Counts of records written by [`SeedDocument::load_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedSummary {
    pub permissions: usize,
    pub roles: usize,
    pub principals: usize,
    pub role_permissions: usize,
    pub principal_roles: usize,
}

impl SeedDocument {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| Error::Storage(format!("Failed to open seed file: {e}")))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Capture everything a provider holds.
    pub fn export<P: DataProvider + ?Sized>(provider: &P) -> Result<Self> {
        let mut document = SeedDocument {
            permissions: provider.list_permissions()?,
            roles: provider.list_roles()?,
            principals: provider.list_principals()?,
            ..Default::default()
        };
        document.permissions.sort_by(|a, b| a.key().cmp(b.key()));
        document.roles.sort_by(|a, b| a.code().cmp(b.code()));
        document.principals.sort_by(|a, b| a.account().cmp(b.account()));

        for role in &document.roles {
            let mut ids = provider.permission_ids_for_role(role.id())?;
            if !ids.is_empty() {
                ids.sort();
                document.role_permissions.insert(role.id().to_string(), ids);
            }
            for principal_id in provider.principal_ids_with_role(role.id())? {
                document
                    .principal_roles
                    .entry(principal_id)
                    .or_default()
                    .push(role.id().to_string());
            }
        }

        for role_ids in document.principal_roles.values_mut() {
            role_ids.sort();
        }
        Ok(document)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())
            .map_err(|e| Error::Storage(format!("Failed to create seed file: {e}")))?;
        self.to_writer(BufWriter::new(file))
    }

    /// Check uniqueness and that every association names a known record.
    ///
    /// Permission parents are not checked: a dangling parent is tolerated and
    /// surfaces as an orphan in the tree.
    pub fn validate(&self) -> Result<()> {
        let mut permission_ids = HashSet::new();
        let mut permission_keys = HashSet::new();
        for permission in &self.permissions {
            if !permission_ids.insert(permission.id()) {
                return Err(duplicate("permission id", permission.id()));
            }
            if !permission_keys.insert(permission.key()) {
                return Err(duplicate("permission key", permission.key()));
            }
        }

        let mut role_ids = HashSet::new();
        let mut role_codes = HashSet::new();
        let mut role_names = HashSet::new();
        for role in &self.roles {
            if !role_ids.insert(role.id()) {
                return Err(duplicate("role id", role.id()));
            }
            if !role_codes.insert(role.code()) {
                return Err(duplicate("role code", role.code()));
            }
            if !role_names.insert(role.name()) {
                return Err(duplicate("role name", role.name()));
            }
        }

        let mut principal_ids = HashSet::new();
        for principal in &self.principals {
            if !principal_ids.insert(principal.id()) {
                return Err(duplicate("principal id", principal.id()));
            }
        }

        for (role_id, ids) in &self.role_permissions {
            if !role_ids.contains(role_id.as_str()) {
                return Err(unknown("role", role_id));
            }
            if let Some(id) = ids.iter().find(|id| !permission_ids.contains(id.as_str())) {
                return Err(unknown("permission", id));
            }
        }
        for (principal_id, ids) in &self.principal_roles {
            if !principal_ids.contains(principal_id.as_str()) {
                return Err(unknown("principal", principal_id));
            }
            if let Some(id) = ids.iter().find(|id| !role_ids.contains(id.as_str())) {
                return Err(unknown("role", id));
            }
        }
        Ok(())
    }

    /// Validate, then write every record and association into `storage`.
    ///
    /// Existing records with the same IDs are replaced. Nothing is written
    /// when validation fails.
    ///
    /// This bypasses any engine cache over `storage`. To seed a running
    /// engine use [`PermissionEngine::load_seed`], which also clears its cache.
    pub fn load_into<S: Storage + ?Sized>(&self, storage: &S) -> Result<SeedSummary> {
        self.validate()?;

        for permission in &self.permissions {
            storage.store_permission(permission.clone())?;
        }
        for role in &self.roles {
            storage.store_role(role.clone())?;
        }
        for principal in &self.principals {
            storage.store_principal(principal.clone())?;
        }
        for (role_id, ids) in &self.role_permissions {
            storage.replace_role_permissions(role_id, ids)?;
        }
        for (principal_id, ids) in &self.principal_roles {
            storage.replace_principal_roles(principal_id, ids)?;
        }

        let summary = SeedSummary {
            permissions: self.permissions.len(),
            roles: self.roles.len(),
            principals: self.principals.len(),
            role_permissions: self.role_permissions.values().map(Vec::len).sum(),
            principal_roles: self.principal_roles.values().map(Vec::len).sum(),
        };

        #[cfg(feature = "audit")]
        info!(
            "Seeded {} permissions, {} roles, {} principals",
            summary.permissions, summary.roles, summary.principals
        );

        Ok(summary)
    }
}

impl<S> PermissionEngine<S>
where
    S: Storage,
{
    /// Load a seed document into this engine's storage and clear its cache.
    pub fn load_seed(&self, document: &SeedDocument) -> Result<SeedSummary> {
        let summary = document.load_into(self.provider())?;
        self.cache().clear();
        Ok(summary)
    }
}

fn duplicate(field: &'static str, value: &str) -> Error {
    Error::DuplicateKey {
        field,
        value: value.to_string(),
    }
}

fn unknown(kind: &str, id: &str) -> Error {
    Error::InvalidReference(format!("{kind} '{id}' does not exist"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const SEED: &str = r#"{
        "permissions": [
            { "id": "sys", "key": "system", "name": "System", "type": "MENU" },
            { "id": "usr", "key": "user.list", "name": "Users", "type": "PAGE", "parent_id": "sys" },
            { "id": "del", "key": "user.delete", "name": "Delete", "type": "ACTION", "parent_id": "usr", "enabled": false }
        ],
        "roles": [{ "id": "r-admin", "name": "Admin", "code": "admin" }],
        "principals": [
            { "id": "u1", "account": "alice", "type": "ADMIN" },
            { "id": "root", "account": "root", "type": "SUPER_ADMIN" }
        ],
        "role_permissions": { "r-admin": ["usr", "del"] },
        "principal_roles": { "u1": ["r-admin"] }
    }"#;

    #[test]
    fn test_load_seed_into_engine() {
        let storage = MemoryStorage::new();
        let summary = SeedDocument::from_json(SEED).unwrap().load_into(&storage).unwrap();
        assert_eq!(summary.permissions, 3);
        assert_eq!(summary.role_permissions, 2);

        let engine = PermissionEngine::with_storage(storage, Default::default()).unwrap();
        let resolved = engine.resolve("u1").unwrap().unwrap();
        assert_eq!(resolved.permission_keys().sorted(), vec!["system", "user.list"]);
        assert!(engine.resolve("root").unwrap().unwrap().is_super_admin());
    }

    #[test]
    fn test_reseeding_a_running_engine_is_fresh() {
        let engine = PermissionEngine::new();
        engine.load_seed(&SeedDocument::from_json(SEED).unwrap()).unwrap();
        assert!(!engine.has_permission("u1", "user.delete").unwrap());
        assert_eq!(engine.permission_tree().unwrap().len(), 1);

        let mut document = SeedDocument::from_json(SEED).unwrap();
        document.permissions[2].set_enabled(true);
        document.permissions.push(PermissionNode::with_id(
            "audit",
            "audit",
            "Audit",
            crate::permission::PermissionType::Menu,
        ));
        let summary = engine.load_seed(&document).unwrap();
        assert_eq!(summary.permissions, 4);

        assert!(engine.has_permission("u1", "user.delete").unwrap());
        assert_eq!(engine.permission_tree().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_seed_leaves_engine_cache_alone() {
        let engine = PermissionEngine::new();
        engine.load_seed(&SeedDocument::from_json(SEED).unwrap()).unwrap();
        engine.resolve("u1").unwrap();

        let mut document = SeedDocument::from_json(SEED).unwrap();
        document
            .role_permissions
            .insert("r-admin".to_string(), vec!["missing".to_string()]);
        assert!(engine.load_seed(&document).is_err());
        assert_eq!(engine.cache().stats().user_permissions, 1);
    }

    #[test]
    fn test_invalid_references_write_nothing() {
        let mut document = SeedDocument::from_json(SEED).unwrap();
        document
            .principal_roles
            .insert("u1".to_string(), vec!["missing".to_string()]);

        let storage = MemoryStorage::new();
        assert!(matches!(document.load_into(&storage), Err(Error::InvalidReference(_))));
        assert_eq!(storage.permission_count(), 0);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let mut document = SeedDocument::from_json(SEED).unwrap();
        document.permissions.push(PermissionNode::with_id(
            "dup",
            "system",
            "Again",
            crate::permission::PermissionType::Menu,
        ));
        assert!(matches!(
            document.validate(),
            Err(Error::DuplicateKey { field: "permission key", .. })
        ));
    }

    #[test]
    fn test_export_matches_loaded_document() {
        let storage = MemoryStorage::new();
        SeedDocument::from_json(SEED).unwrap().load_into(&storage).unwrap();

        let exported = SeedDocument::export(&storage).unwrap();
        assert_eq!(exported.permissions.len(), 3);
        assert_eq!(exported.role_permissions["r-admin"], vec!["del".to_string(), "usr".to_string()]);
        assert_eq!(exported.principal_roles["u1"], vec!["r-admin".to_string()]);

        let reloaded = SeedDocument::from_json(&exported.to_json().unwrap()).unwrap();
        assert_eq!(reloaded, exported);
    }

    #[test]
    fn test_malformed_json_is_a_serialization_error() {
        assert!(matches!(
            SeedDocument::from_json("{ not json"),
            Err(Error::Serialization(_))
        ));
    }
}
