//! Core permission engine implementation.
//!
//! This module contains [`PermissionEngine`], which resolves a principal's
//! effective roles and permission keys, serves the cached catalog trees, and
//! performs the catalog, role and assignment mutations that must invalidate
//! cached state.
//!
//! # Resolution
//!
//! 1. A live cache entry for the principal is returned as-is.
//! 2. An unknown principal resolves to `None`.
//! 3. A superadmin resolves to the wildcard key set without touching roles.
//! 4. Otherwise the principal's active roles are loaded, their enabled
//!    permissions merged by ID, and missing enabled ancestors fetched so that
//!    every granted leaf can be walked up to its page and menu.
//!
//! The result is computed in full, then cached and returned.
//!
//! # Thread Safety
//!
//! The engine only needs `&self`. The cache is a concurrent map and storage
//! backends are `Send + Sync`; two concurrent misses for the same principal may
//! both hit storage, and either result is a valid cache value.
//!
//! Every cache write is fenced by a [`Generation`](crate::cache::Generation)
//! taken before the storage reads. A mutation that commits and invalidates
//! while a resolution is in flight may still be missed by that one call, but
//! its result is discarded instead of cached.

#[cfg(feature = "audit")]
use log::{debug, info};

use crate::{
    cache::{CacheTtls, PermissionCache, SweeperHandle, TreeKind},
    error::{Error, Result},
    hierarchy::{self, PermissionTreeNode},
    metrics::EngineMetrics,
    permission::{PermissionKeys, PermissionNode, PermissionType},
    principal::Principal,
    role::{Role, RoleSummary},
    storage::{DataProvider, MemoryStorage, Storage},
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the permission engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Whether to cache resolutions, role permission lists and trees.
    pub enable_caching: bool,
    /// Whether to memoise single-key checks made by principal ID.
    pub enable_check_memo: bool,
    /// Lifetime of each cache namespace.
    pub cache_ttls: CacheTtls,
    /// How often the background sweep reclaims expired entries.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            enable_check_memo: true,
            cache_ttls: CacheTtls::default(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Reject zero lifetimes and a zero sweep interval.
    pub fn validate(&self) -> Result<()> {
        let ttls = [
            ("user_permissions", self.cache_ttls.user_permissions),
            ("permission_checks", self.cache_ttls.permission_checks),
            ("role_permissions", self.cache_ttls.role_permissions),
            ("permission_tree", self.cache_ttls.permission_tree),
        ];
        for (name, ttl) in ttls {
            if ttl.is_zero() {
                return Err(Error::InvalidConfiguration(format!(
                    "{name} TTL must be greater than zero"
                )));
            }
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::InvalidConfiguration(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for creating engine configurations.
///
/// # Example
/// ```rust
/// use admin_rbac::core::EngineConfigBuilder;
/// use std::time::Duration;
///
/// let config = EngineConfigBuilder::new()
///     .user_permission_ttl(Duration::from_secs(60))
///     .sweep_interval(Duration::from_secs(30))
///     .build()?;
/// # Ok::<(), admin_rbac::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder starting from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_caching(mut self, enable: bool) -> Self {
        self.config.enable_caching = enable;
        self
    }

    pub fn enable_check_memo(mut self, enable: bool) -> Self {
        self.config.enable_check_memo = enable;
        self
    }

    pub fn user_permission_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttls.user_permissions = ttl;
        self
    }

    pub fn permission_check_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttls.permission_checks = ttl;
        self
    }

    pub fn role_permission_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttls.role_permissions = ttl;
        self
    }

    pub fn permission_tree_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttls.permission_tree = ttl;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A principal's effective roles and permissions.
///
/// Values are created by [`PermissionEngine::resolve`] (or assembled from a
/// previously fetched snapshot with [`ResolvedPermissions::from_parts`]) and
/// are never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct ResolvedPermissions {
    principal_id: String,
    roles: Vec<RoleSummary>,
    permissions: Vec<PermissionNode>,
    permission_keys: PermissionKeys,
    menus: Vec<PermissionTreeNode>,
    resolved_at: DateTime<Utc>,
    /// Principal status at resolution time.
    #[cfg_attr(feature = "persistence", serde(default = "active_by_default"))]
    active: bool,
}

#[cfg(feature = "persistence")]
fn active_by_default() -> bool {
    true
}

impl ResolvedPermissions {
    /// The superadmin value: wildcard keys, no role or permission joins.
    pub fn super_admin(principal_id: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            roles: Vec::new(),
            permissions: Vec::new(),
            permission_keys: PermissionKeys::All,
            menus: Vec::new(),
            resolved_at: Utc::now(),
            active: true,
        }
    }

    /// Assemble a value from roles and an already-completed permission list.
    ///
    /// Keys and the menu forest are derived from `permissions`. Duplicate
    /// permission IDs are collapsed.
    pub fn from_parts(
        principal_id: impl Into<String>,
        roles: Vec<RoleSummary>,
        permissions: Vec<PermissionNode>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut permissions: Vec<PermissionNode> = permissions
            .into_iter()
            .filter(|permission| seen.insert(permission.id().to_string()))
            .collect();
        permissions.sort_by(|a, b| a.key().cmp(b.key()));

        let permission_keys = permissions
            .iter()
            .map(|permission| permission.key().to_string())
            .collect();
        let menus = hierarchy::build_menu_tree(permissions.iter().cloned());

        Self {
            principal_id: principal_id.into(),
            roles,
            permissions,
            permission_keys,
            menus,
            resolved_at: Utc::now(),
            active: true,
        }
    }

    /// Record the principal's status as of this resolution.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    pub fn roles(&self) -> &[RoleSummary] {
        &self.roles
    }

    /// Retained permissions, sorted by key. Empty for a superadmin.
    pub fn permissions(&self) -> &[PermissionNode] {
        &self.permissions
    }

    pub fn permission_keys(&self) -> &PermissionKeys {
        &self.permission_keys
    }

    /// MENU and PAGE permissions as a forest.
    pub fn menus(&self) -> &[PermissionTreeNode] {
        &self.menus
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    /// Whether the principal was active when this value was resolved.
    /// Gates treat an inactive principal as unauthenticated.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether this is the superadmin wildcard value.
    pub fn is_super_admin(&self) -> bool {
        self.permission_keys.is_wildcard()
    }

    /// No roles means no access, regardless of keys.
    fn has_no_roles(&self) -> bool {
        self.roles.is_empty()
    }

    /// Check a single permission key.
    pub fn has_permission(&self, key: &str) -> bool {
        if self.is_super_admin() {
            return true;
        }
        if self.has_no_roles() {
            return false;
        }
        self.permission_keys.contains(key)
    }

    /// True if any of `keys` is granted. An empty list is never satisfied.
    pub fn has_any_permission<K: AsRef<str>>(&self, keys: &[K]) -> bool {
        if self.is_super_admin() {
            return true;
        }
        if keys.is_empty() || self.has_no_roles() {
            return false;
        }
        keys.iter().any(|key| self.permission_keys.contains(key.as_ref()))
    }

    /// True if all of `keys` are granted. An empty list is never satisfied.
    pub fn has_all_permissions<K: AsRef<str>>(&self, keys: &[K]) -> bool {
        if self.is_super_admin() {
            return true;
        }
        if keys.is_empty() || self.has_no_roles() {
            return false;
        }
        keys.iter().all(|key| self.permission_keys.contains(key.as_ref()))
    }

    /// Check a role by code.
    pub fn has_role(&self, code: &str) -> bool {
        if self.is_super_admin() {
            return true;
        }
        self.roles.iter().any(|role| role.code == code)
    }

    /// True if any of `codes` is held. An empty list is never satisfied.
    pub fn has_any_role<C: AsRef<str>>(&self, codes: &[C]) -> bool {
        if self.is_super_admin() {
            return true;
        }
        if codes.is_empty() {
            return false;
        }
        codes.iter().any(|code| self.has_role(code.as_ref()))
    }

    /// Search the menu forest for an enabled node with this key.
    pub fn has_menu_permission(&self, key: &str) -> bool {
        if self.is_super_admin() {
            return true;
        }
        if self.has_no_roles() || self.menus.is_empty() {
            return false;
        }
        hierarchy::contains_enabled_key(&self.menus, key)
    }

    /// Menu forest with disabled nodes and emptied branches removed.
    pub fn accessible_menus(&self) -> Vec<PermissionTreeNode> {
        hierarchy::prune_disabled(&self.menus)
    }
}

/// Changes to apply to a permission. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct PermissionUpdate {
    pub name: Option<String>,
    pub permission_type: Option<PermissionType>,
    /// `Some(None)` detaches the permission to the root level.
    pub parent_id: Option<Option<String>>,
    pub path: Option<Option<String>>,
    pub method: Option<Option<String>>,
    pub order: Option<i32>,
    pub enabled: Option<bool>,
}

/// Changes to apply to a role. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub active: Option<bool>,
}

/// The permission resolution engine.
pub struct PermissionEngine<P = MemoryStorage>
where
    P: DataProvider,
{
    provider: P,
    config: EngineConfig,
    cache: Arc<PermissionCache>,
}

impl PermissionEngine<MemoryStorage> {
    /// Create an engine over fresh in-memory storage with default configuration.
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let cache = Arc::new(PermissionCache::new(
            config.cache_ttls,
            Arc::new(EngineMetrics::new()),
        ));
        Self {
            provider: MemoryStorage::new(),
            config,
            cache,
        }
    }
}

impl Default for PermissionEngine<MemoryStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PermissionEngine<P>
where
    P: DataProvider,
{
    /// Create an engine with its own cache.
    pub fn with_storage(provider: P, config: EngineConfig) -> Result<Self> {
        let cache = Arc::new(PermissionCache::new(
            config.cache_ttls,
            Arc::new(EngineMetrics::new()),
        ));
        Self::with_cache(provider, config, cache)
    }

    /// Create an engine that shares an existing cache.
    ///
    /// The cache keeps its own namespace lifetimes; `config.cache_ttls` only
    /// applies to caches the engine creates itself.
    pub fn with_cache(provider: P, config: EngineConfig, cache: Arc<PermissionCache>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            provider,
            config,
            cache,
        })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        self.cache.metrics()
    }

    /// Start the periodic cache sweep on a background thread.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        self.cache.spawn_sweeper(self.config.sweep_interval)
    }

    /// Resolve a principal's effective roles and permissions.
    ///
    /// Returns `Ok(None)` for an unknown principal. Storage errors propagate
    /// unchanged.
    pub fn resolve(&self, principal_id: &str) -> Result<Option<Arc<ResolvedPermissions>>> {
        if self.config.enable_caching {
            if let Some(cached) = self.cache.get_resolved(principal_id) {
                #[cfg(feature = "audit")]
                debug!("Retrieved permissions from cache for principal '{principal_id}'");
                return Ok(Some(cached));
            }
        }

        let generation = self.cache.principal_generation(principal_id);
        let Some(principal) = self.provider.find_principal_by_id(principal_id)? else {
            return Ok(None);
        };

        let resolved = if principal.is_super_admin() {
            self.metrics().record_superadmin_bypass();
            ResolvedPermissions::super_admin(principal.id())
        } else {
            self.resolve_roles(&principal)?
        }
        .with_active(principal.is_active());
        self.metrics().record_resolution();

        let resolved = Arc::new(resolved);
        if self.config.enable_caching && self.cache.put_resolved_since(Arc::clone(&resolved), generation) {
            #[cfg(feature = "audit")]
            debug!("Cached permissions for principal '{principal_id}'");
        }

        Ok(Some(resolved))
    }

    /// Resolve only what a principal's roles grant, ignoring the superadmin
    /// type. Never cached.
    pub fn resolve_role_grants(&self, principal_id: &str) -> Result<Option<ResolvedPermissions>> {
        match self.provider.find_principal_by_id(principal_id)? {
            Some(principal) => self
                .resolve_roles(&principal)
                .map(|resolved| Some(resolved.with_active(principal.is_active()))),
            None => Ok(None),
        }
    }

    fn resolve_roles(&self, principal: &Principal) -> Result<ResolvedPermissions> {
        let mut role_ids = HashSet::new();
        let roles: Vec<Role> = self
            .provider
            .find_roles_for_principal(principal.id())?
            .into_iter()
            .filter(|role| role.is_active() && role_ids.insert(role.id().to_string()))
            .collect();

        // IDs already retained or already looked up; never fetched twice.
        let mut seen: HashSet<String> = HashSet::new();
        let mut retained: Vec<PermissionNode> = Vec::new();
        for role in &roles {
            for permission in self.load_role_permissions(role.id())?.iter() {
                if permission.is_enabled() && seen.insert(permission.id().to_string()) {
                    retained.push(permission.clone());
                }
            }
        }

        let mut missing: Vec<String> = retained
            .iter()
            .filter_map(|permission| permission.parent_id())
            .filter(|parent| !seen.contains(*parent))
            .map(str::to_string)
            .collect();
        while let Some(parent_id) = missing.pop() {
            if !seen.insert(parent_id.clone()) {
                continue;
            }
            match self.provider.find_permission_by_id(&parent_id)? {
                Some(ancestor) if ancestor.is_enabled() => {
                    if let Some(next) = ancestor.parent_id() {
                        if !seen.contains(next) {
                            missing.push(next.to_string());
                        }
                    }
                    retained.push(ancestor);
                }
                // Disabled or dangling: the chain stops here.
                _ => {}
            }
        }

        Ok(ResolvedPermissions::from_parts(
            principal.id(),
            roles.iter().map(Role::summary).collect(),
            retained,
        ))
    }

    fn load_role_permissions(&self, role_id: &str) -> Result<Arc<Vec<PermissionNode>>> {
        if self.config.enable_caching {
            if let Some(cached) = self.cache.get_role_permissions(role_id) {
                return Ok(cached);
            }
        }
        let generation = self.cache.catalog_generation();
        let permissions = Arc::new(self.provider.find_permissions_for_role(role_id)?);
        if self.config.enable_caching {
            self.cache
                .put_role_permissions_since(role_id, Arc::clone(&permissions), generation);
        }
        Ok(permissions)
    }

    /// Enabled permissions of a role, or `None` for an unknown role.
    pub fn role_permissions(&self, role_id: &str) -> Result<Option<Arc<Vec<PermissionNode>>>> {
        if self.provider.find_role_by_id(role_id)?.is_none() {
            return Ok(None);
        }
        self.load_role_permissions(role_id).map(Some)
    }

    /// Forest of every enabled permission in the catalog.
    pub fn permission_tree(&self) -> Result<Arc<Vec<PermissionTreeNode>>> {
        self.catalog_tree(TreeKind::Full)
    }

    /// Forest of enabled MENU and PAGE permissions in the catalog.
    pub fn menu_tree(&self) -> Result<Arc<Vec<PermissionTreeNode>>> {
        self.catalog_tree(TreeKind::Menu)
    }

    fn catalog_tree(&self, kind: TreeKind) -> Result<Arc<Vec<PermissionTreeNode>>> {
        if self.config.enable_caching {
            if let Some(cached) = self.cache.get_tree(kind) {
                return Ok(cached);
            }
        }
        let generation = self.cache.catalog_generation();
        let permissions = self.provider.list_permissions()?;
        let tree = Arc::new(match kind {
            TreeKind::Full => {
                hierarchy::build_tree(permissions.into_iter().filter(PermissionNode::is_enabled))
            }
            TreeKind::Menu => hierarchy::build_menu_tree(permissions),
        });
        if self.config.enable_caching {
            self.cache.put_tree_since(kind, Arc::clone(&tree), generation);
        }
        Ok(tree)
    }

    /// Check one permission key for a principal by ID. Unknown principals are denied.
    pub fn has_permission(&self, principal_id: &str, key: &str) -> Result<bool> {
        Ok(self
            .resolve(principal_id)?
            .is_some_and(|resolved| resolved.has_permission(key)))
    }

    /// Like [`has_permission`](Self::has_permission), memoising the answer
    /// under the permission-check namespace.
    pub fn check_permission(&self, principal_id: &str, key: &str) -> Result<bool> {
        let memo = self.config.enable_caching && self.config.enable_check_memo;
        if memo {
            if let Some(granted) = self.cache.get_check(principal_id, key) {
                return Ok(granted);
            }
        }

        let generation = self.cache.principal_generation(principal_id);
        let granted = self.has_permission(principal_id, key)?;
        if memo {
            self.cache.put_check_since(principal_id, key, granted, generation);
        }
        Ok(granted)
    }

    pub fn has_any_permission<K: AsRef<str>>(&self, principal_id: &str, keys: &[K]) -> Result<bool> {
        Ok(self
            .resolve(principal_id)?
            .is_some_and(|resolved| resolved.has_any_permission(keys)))
    }

    pub fn has_all_permissions<K: AsRef<str>>(&self, principal_id: &str, keys: &[K]) -> Result<bool> {
        Ok(self
            .resolve(principal_id)?
            .is_some_and(|resolved| resolved.has_all_permissions(keys)))
    }

    pub fn has_role(&self, principal_id: &str, code: &str) -> Result<bool> {
        Ok(self
            .resolve(principal_id)?
            .is_some_and(|resolved| resolved.has_role(code)))
    }

    pub fn has_any_role<C: AsRef<str>>(&self, principal_id: &str, codes: &[C]) -> Result<bool> {
        Ok(self
            .resolve(principal_id)?
            .is_some_and(|resolved| resolved.has_any_role(codes)))
    }

    pub fn has_menu_permission(&self, principal_id: &str, key: &str) -> Result<bool> {
        Ok(self
            .resolve(principal_id)?
            .is_some_and(|resolved| resolved.has_menu_permission(key)))
    }

    /// Principals granted an enabled permission through an active role.
    pub fn principals_with_permission(&self, key: &str) -> Result<Vec<Principal>> {
        let Some(permission) = self
            .provider
            .list_permissions()?
            .into_iter()
            .find(|permission| permission.key() == key && permission.is_enabled())
        else {
            return Ok(Vec::new());
        };

        let mut principal_ids = Vec::new();
        for role_id in self.provider.role_ids_with_permission(permission.id())? {
            if self
                .provider
                .find_role_by_id(&role_id)?
                .is_some_and(|role| role.is_active())
            {
                principal_ids.extend(self.provider.principal_ids_with_role(&role_id)?);
            }
        }
        self.principals_by_ids(principal_ids)
    }

    /// Principals holding an active role with this code.
    pub fn principals_with_role(&self, code: &str) -> Result<Vec<Principal>> {
        let Some(role) = self
            .provider
            .list_roles()?
            .into_iter()
            .find(|role| role.code() == code && role.is_active())
        else {
            return Ok(Vec::new());
        };
        self.principals_by_ids(self.provider.principal_ids_with_role(role.id())?)
    }

    fn principals_by_ids(&self, ids: Vec<String>) -> Result<Vec<Principal>> {
        let mut seen = HashSet::new();
        let mut principals = Vec::new();
        for id in ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(principal) = self.provider.find_principal_by_id(&id)? {
                principals.push(principal);
            }
        }
        Ok(principals)
    }

    /// Every transitive child of a permission, enabled or not.
    pub fn permission_descendants(&self, permission_id: &str) -> Result<Vec<PermissionNode>> {
        let all = self.provider.list_permissions()?;
        let ids: HashSet<String> = hierarchy::descendant_ids(permission_id, &all)
            .into_iter()
            .collect();
        Ok(all
            .into_iter()
            .filter(|permission| ids.contains(permission.id()))
            .collect())
    }

    /// Drop a principal's cached resolution, e.g. after an out-of-band change.
    pub fn invalidate_principal(&self, principal_id: &str) {
        self.cache.invalidate_principal(principal_id);
    }

    /// Drop a role's cached permission list and the catalog trees.
    pub fn invalidate_role(&self, role_id: &str) {
        self.cache.invalidate_role(role_id);
    }

    /// Drop the catalog trees and all role permission lists.
    pub fn invalidate_catalog(&self) {
        self.cache.invalidate_catalog();
    }

    fn invalidate_role_holders(&self, role_id: &str) -> Result<()> {
        self.cache.invalidate_role(role_id);
        for principal_id in self.provider.principal_ids_with_role(role_id)? {
            self.cache.invalidate_principal(&principal_id);
        }
        Ok(())
    }
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

impl<S> PermissionEngine<S>
where
    S: Storage,
{
    /// Insert or replace a principal.
    pub fn register_principal(&self, principal: Principal) -> Result<()> {
        let principal_id = principal.id().to_string();
        self.provider.store_principal(principal)?;
        self.cache.invalidate_principal(&principal_id);

        #[cfg(feature = "audit")]
        info!("Principal '{principal_id}' registered");

        Ok(())
    }

    /// Add a permission to the catalog.
    pub fn create_permission(&self, permission: PermissionNode) -> Result<PermissionNode> {
        let catalog = self.provider.list_permissions()?;
        if catalog.iter().any(|existing| existing.key() == permission.key()) {
            return Err(Error::DuplicateKey {
                field: "permission key",
                value: permission.key().to_string(),
            });
        }
        if catalog.iter().any(|existing| existing.id() == permission.id()) {
            return Err(Error::DuplicateKey {
                field: "permission id",
                value: permission.id().to_string(),
            });
        }
        if let Some(parent_id) = permission.parent_id() {
            if !catalog.iter().any(|existing| existing.id() == parent_id) {
                return Err(Error::InvalidReference(format!(
                    "parent permission '{parent_id}' does not exist"
                )));
            }
        }

        self.provider.store_permission(permission.clone())?;
        self.cache.invalidate_catalog();

        #[cfg(feature = "audit")]
        info!("Permission created: {} ({})", permission.name(), permission.id());

        Ok(permission)
    }

    /// Update a permission. Re-parenting under a descendant is rejected.
    pub fn update_permission(&self, permission_id: &str, update: PermissionUpdate) -> Result<PermissionNode> {
        let mut permission = self
            .provider
            .find_permission_by_id(permission_id)?
            .ok_or_else(|| Error::PermissionNotFound(permission_id.to_string()))?;

        if let Some(Some(parent_id)) = &update.parent_id {
            if permission.parent_id() != Some(parent_id.as_str()) {
                if self.provider.find_permission_by_id(parent_id)?.is_none() {
                    return Err(Error::InvalidReference(format!(
                        "parent permission '{parent_id}' does not exist"
                    )));
                }
                let circular = hierarchy::would_create_cycle(permission_id, parent_id, |id| {
                    Ok(self
                        .provider
                        .find_permission_by_id(id)?
                        .and_then(|p| p.parent_id().map(str::to_string)))
                })?;
                if circular {
                    return Err(Error::CircularAssignment {
                        permission_id: permission_id.to_string(),
                        parent_id: parent_id.clone(),
                    });
                }
            }
        }

        if let Some(name) = update.name {
            permission.set_name(name);
        }
        if let Some(permission_type) = update.permission_type {
            permission.set_permission_type(permission_type);
        }
        if let Some(parent_id) = update.parent_id {
            permission.set_parent_id(parent_id);
        }
        if let Some(path) = update.path {
            permission.set_path(path);
        }
        if let Some(method) = update.method {
            permission.set_method(method);
        }
        if let Some(order) = update.order {
            permission.set_order(order);
        }
        if let Some(enabled) = update.enabled {
            permission.set_enabled(enabled);
        }

        self.provider.store_permission(permission.clone())?;
        self.cache.invalidate_catalog();
        self.cache.invalidate_all_principals();

        #[cfg(feature = "audit")]
        info!("Permission updated: {} ({})", permission.name(), permission.id());

        Ok(permission)
    }

    /// Delete a permission that has no children and is not granted by any role.
    pub fn delete_permission(&self, permission_id: &str) -> Result<()> {
        let permission = self
            .provider
            .find_permission_by_id(permission_id)?
            .ok_or_else(|| Error::PermissionNotFound(permission_id.to_string()))?;

        let has_children = self
            .provider
            .list_permissions()?
            .iter()
            .any(|other| other.parent_id() == Some(permission_id));
        if has_children {
            return Err(Error::PermissionHasChildren(permission_id.to_string()));
        }
        if !self.provider.role_ids_with_permission(permission_id)?.is_empty() {
            return Err(Error::PermissionInUse(permission_id.to_string()));
        }

        self.provider.delete_permission(permission_id)?;
        self.cache.invalidate_catalog();
        self.cache.invalidate_all_principals();

        #[cfg(feature = "audit")]
        info!("Permission deleted: {} ({})", permission.name(), permission.id());
        #[cfg(not(feature = "audit"))]
        let _ = permission;

        Ok(())
    }

    /// Enable or disable permissions in bulk. Unknown IDs are skipped.
    pub fn set_permissions_enabled(&self, permission_ids: &[String], enabled: bool) -> Result<usize> {
        let mut updated = 0;
        for id in dedup(permission_ids) {
            if let Some(mut permission) = self.provider.find_permission_by_id(&id)? {
                permission.set_enabled(enabled);
                self.provider.store_permission(permission)?;
                updated += 1;
            }
        }
        self.cache.invalidate_catalog();
        self.cache.invalidate_all_principals();

        #[cfg(feature = "audit")]
        info!("Batch updated {updated} permissions enabled={enabled}");

        Ok(updated)
    }

    /// Add a role. Name and code must be unique.
    pub fn create_role(&self, role: Role) -> Result<Role> {
        for existing in self.provider.list_roles()? {
            if existing.code() == role.code() {
                return Err(Error::DuplicateKey {
                    field: "role code",
                    value: role.code().to_string(),
                });
            }
            if existing.name() == role.name() {
                return Err(Error::DuplicateKey {
                    field: "role name",
                    value: role.name().to_string(),
                });
            }
            if existing.id() == role.id() {
                return Err(Error::DuplicateKey {
                    field: "role id",
                    value: role.id().to_string(),
                });
            }
        }

        self.provider.store_role(role.clone())?;
        self.cache.invalidate_role(role.id());

        #[cfg(feature = "audit")]
        info!("Role created: {} ({})", role.name(), role.id());

        Ok(role)
    }

    /// Update a role's name, description or status.
    pub fn update_role(&self, role_id: &str, update: RoleUpdate) -> Result<Role> {
        let mut role = self
            .provider
            .find_role_by_id(role_id)?
            .ok_or_else(|| Error::RoleNotFound(role_id.to_string()))?;

        if let Some(name) = update.name {
            if name != role.name() {
                let taken = self
                    .provider
                    .list_roles()?
                    .iter()
                    .any(|other| other.id() != role_id && other.name() == name);
                if taken {
                    return Err(Error::DuplicateKey {
                        field: "role name",
                        value: name,
                    });
                }
            }
            role.set_name(name);
        }
        if let Some(description) = update.description {
            role.set_description(description);
        }
        if let Some(active) = update.active {
            role.set_active(active);
        }

        self.provider.store_role(role.clone())?;
        self.invalidate_role_holders(role_id)?;

        #[cfg(feature = "audit")]
        info!("Role updated: {} ({})", role.name(), role.id());

        Ok(role)
    }

    /// Delete a role that no principal holds, along with its permission associations.
    pub fn delete_role(&self, role_id: &str) -> Result<()> {
        if self.provider.find_role_by_id(role_id)?.is_none() {
            return Err(Error::RoleNotFound(role_id.to_string()));
        }
        if !self.provider.principal_ids_with_role(role_id)?.is_empty() {
            return Err(Error::RoleInUse(role_id.to_string()));
        }

        self.provider.delete_role(role_id)?;
        self.cache.invalidate_role(role_id);

        #[cfg(feature = "audit")]
        info!("Role deleted: {role_id}");

        Ok(())
    }

    /// Enable or disable roles in bulk. Unknown IDs are skipped.
    pub fn set_roles_status(&self, role_ids: &[String], active: bool) -> Result<usize> {
        let mut updated = 0;
        for id in dedup(role_ids) {
            if let Some(mut role) = self.provider.find_role_by_id(&id)? {
                role.set_active(active);
                self.provider.store_role(role)?;
                self.invalidate_role_holders(&id)?;
                updated += 1;
            }
        }

        #[cfg(feature = "audit")]
        info!("Batch updated {updated} roles active={active}");

        Ok(updated)
    }

    /// Replace a role's permissions. Every ID must name an enabled permission.
    pub fn assign_permissions_to_role(&self, role_id: &str, permission_ids: &[String]) -> Result<()> {
        if self.provider.find_role_by_id(role_id)?.is_none() {
            return Err(Error::RoleNotFound(role_id.to_string()));
        }
        let permission_ids = dedup(permission_ids);
        for id in &permission_ids {
            match self.provider.find_permission_by_id(id)? {
                Some(permission) if permission.is_enabled() => {}
                Some(_) => {
                    return Err(Error::InvalidReference(format!("permission '{id}' is disabled")))
                }
                None => {
                    return Err(Error::InvalidReference(format!("permission '{id}' does not exist")))
                }
            }
        }

        self.provider
            .replace_role_permissions(role_id, &permission_ids)?;
        self.invalidate_role_holders(role_id)?;

        #[cfg(feature = "audit")]
        info!("Assigned {} permissions to role '{role_id}'", permission_ids.len());

        Ok(())
    }

    /// Replace a principal's roles. Every ID must name an active role.
    pub fn assign_roles_to_principal(&self, principal_id: &str, role_ids: &[String]) -> Result<()> {
        if self.provider.find_principal_by_id(principal_id)?.is_none() {
            return Err(Error::PrincipalNotFound(principal_id.to_string()));
        }
        let role_ids = dedup(role_ids);
        self.check_active_roles(&role_ids)?;

        self.provider
            .replace_principal_roles(principal_id, &role_ids)?;
        self.cache.invalidate_principal(principal_id);

        #[cfg(feature = "audit")]
        info!("Assigned {} roles to principal '{principal_id}'", role_ids.len());

        Ok(())
    }

    /// Replace the roles of several principals. All IDs are validated first.
    pub fn batch_assign_roles(&self, principal_ids: &[String], role_ids: &[String]) -> Result<()> {
        let principal_ids = dedup(principal_ids);
        for principal_id in &principal_ids {
            if self.provider.find_principal_by_id(principal_id)?.is_none() {
                return Err(Error::InvalidReference(format!(
                    "principal '{principal_id}' does not exist"
                )));
            }
        }
        let role_ids = dedup(role_ids);
        self.check_active_roles(&role_ids)?;

        for principal_id in &principal_ids {
            self.provider
                .replace_principal_roles(principal_id, &role_ids)?;
            self.cache.invalidate_principal(principal_id);
        }

        #[cfg(feature = "audit")]
        info!(
            "Batch assigned {} roles to {} principals",
            role_ids.len(),
            principal_ids.len()
        );

        Ok(())
    }

    /// Grant one more role to a principal.
    pub fn add_principal_role(&self, principal_id: &str, role_id: &str) -> Result<()> {
        if self.provider.find_principal_by_id(principal_id)?.is_none() {
            return Err(Error::PrincipalNotFound(principal_id.to_string()));
        }
        self.check_active_roles(&[role_id.to_string()])?;

        if !self.provider.add_principal_role(principal_id, role_id)? {
            return Err(Error::DuplicateKey {
                field: "role assignment",
                value: format!("{principal_id}/{role_id}"),
            });
        }
        self.cache.invalidate_principal(principal_id);

        #[cfg(feature = "audit")]
        info!("Added role '{role_id}' to principal '{principal_id}'");

        Ok(())
    }

    /// Take one role away from a principal.
    pub fn remove_principal_role(&self, principal_id: &str, role_id: &str) -> Result<()> {
        if !self.provider.remove_principal_role(principal_id, role_id)? {
            return Err(Error::InvalidReference(format!(
                "principal '{principal_id}' does not hold role '{role_id}'"
            )));
        }
        self.cache.invalidate_principal(principal_id);

        #[cfg(feature = "audit")]
        info!("Removed role '{role_id}' from principal '{principal_id}'");

        Ok(())
    }

    fn check_active_roles(&self, role_ids: &[String]) -> Result<()> {
        for id in role_ids {
            match self.provider.find_role_by_id(id)? {
                Some(role) if role.is_active() => {}
                Some(_) => return Err(Error::InvalidReference(format!("role '{id}' is disabled"))),
                None => return Err(Error::InvalidReference(format!("role '{id}' does not exist"))),
            }
        }
        Ok(())
    }
}
