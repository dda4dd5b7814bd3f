//! TTL caching in front of the resolution engine.
//!
//! [`TtlCache`] is a flat, concurrent key/value store where every entry carries
//! its own time-to-live. An entry older than its TTL is treated as absent on
//! read and removed on the spot; [`TtlCache::sweep`] reclaims the rest so keys
//! that are written and never read again do not accumulate.
//!
//! [`PermissionCache`] layers the engine's namespaces on top of one flat cache:
//!
//! | Namespace | Key | Holds |
//! |---|---|---|
//! | user permissions | `user_permissions:<principal>` | resolved permission set |
//! | permission checks | `permission_check:<principal>:<key>` | memoised boolean |
//! | role permissions | `role_permissions:<role>` | a role's permission list |
//! | permission tree | `permission_tree`, `permission_tree:menu` | catalog forests |

#[cfg(feature = "audit")]
use log::debug;

use crate::{
    core::ResolvedPermissions, hierarchy::PermissionTreeNode, metrics::EngineMetrics,
    permission::PermissionNode,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A cached value with its storage time and lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Create an entry stored now.
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// An entry is expired once its age exceeds its TTL.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// Concurrent key/value cache with per-entry expiry.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    metrics: Arc<EngineMetrics>,
}

impl<V: Clone> TtlCache<V> {
    /// Create an empty cache reporting into `metrics`.
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        Self {
            entries: DashMap::new(),
            metrics,
        }
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(key.into(), CacheEntry::new(value, ttl));
    }

    /// Get a live value. Expired entries are evicted and reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.metrics.record_cache_hit();
                return Some(entry.value.clone());
            }
            drop(entry);
            self.evict_if_expired(key, now);
        }

        self.metrics.record_cache_miss();
        None
    }

    /// Whether a live entry exists. Expired entries are evicted.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let live = match self.entries.get(key) {
            Some(entry) => !entry.is_expired(now),
            None => return false,
        };
        if !live {
            self.evict_if_expired(key, now);
        }
        live
    }

    /// Remove an entry. Returns whether one was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`. Returns the count removed.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before.saturating_sub(self.entries.len())
    }

    /// Remove every expired entry. Returns the count removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            self.metrics.record_swept(removed);
            #[cfg(feature = "audit")]
            debug!("Cleaned up {removed} expired cache items");
        }
        removed
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of stored keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Clear all cache entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Metrics this cache reports into.
    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    // A concurrent `set` may have replaced the entry since it was read.
    fn evict_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &str, by: Duration) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if let Some(earlier) = entry.stored_at.checked_sub(by) {
                entry.stored_at = earlier;
            }
        }
    }
}

/// Lifetimes per cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Resolved permission sets.
    pub user_permissions: Duration,
    /// Memoised single-key checks.
    pub permission_checks: Duration,
    /// Per-role permission lists.
    pub role_permissions: Duration,
    /// Catalog forests.
    pub permission_tree: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            user_permissions: Duration::from_secs(3 * 60),
            permission_checks: Duration::from_secs(3 * 60),
            role_permissions: Duration::from_secs(5 * 60),
            permission_tree: Duration::from_secs(5 * 60),
        }
    }
}

/// Values stored by the engine.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Resolved(Arc<ResolvedPermissions>),
    RolePermissions(Arc<Vec<PermissionNode>>),
    Tree(Arc<Vec<PermissionTreeNode>>),
    Check(bool),
}

/// Which catalog forest a tree entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    /// Every enabled permission.
    Full,
    /// Enabled MENU and PAGE permissions.
    Menu,
}

const USER_PERMISSIONS: &str = "user_permissions:";
const PERMISSION_CHECK: &str = "permission_check:";
const ROLE_PERMISSIONS: &str = "role_permissions:";
const PERMISSION_TREE: &str = "permission_tree";

/// Invalidation counters observed before reading from storage.
///
/// A value computed from storage is only worth caching if no invalidation
/// covering it happened while it was being computed. Take a generation with
/// [`PermissionCache::principal_generation`] or
/// [`PermissionCache::catalog_generation`] before the reads and hand it to
/// the matching `*_since` writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    scoped: u64,
}

/// Namespaced view over one flat [`TtlCache`].
///
/// # Thread Safety
///
/// The `*_since` writers insert first and re-check the generation afterwards.
/// Invalidation bumps the generation first and deletes afterwards. Whichever
/// way the two interleave, a value read before a committed mutation never
/// outlives that mutation's invalidation. The plain `put_*` writers skip the
/// check.
#[derive(Debug)]
pub struct PermissionCache {
    inner: TtlCache<CachedValue>,
    ttls: CacheTtls,
    principal_epoch: AtomicU64,
    principal_generations: DashMap<String, u64>,
    catalog_epoch: AtomicU64,
}

impl PermissionCache {
    /// Create a cache with the given namespace lifetimes.
    pub fn new(ttls: CacheTtls, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            inner: TtlCache::new(metrics),
            ttls,
            principal_epoch: AtomicU64::new(0),
            principal_generations: DashMap::new(),
            catalog_epoch: AtomicU64::new(0),
        }
    }

    /// Current generation for values derived from one principal.
    pub fn principal_generation(&self, principal_id: &str) -> Generation {
        Generation {
            epoch: self.principal_epoch.load(Ordering::SeqCst),
            scoped: self
                .principal_generations
                .get(principal_id)
                .map_or(0, |generation| *generation),
        }
    }

    /// Current generation for role permission lists and catalog forests.
    pub fn catalog_generation(&self) -> Generation {
        Generation {
            epoch: self.catalog_epoch.load(Ordering::SeqCst),
            scoped: 0,
        }
    }

    fn set_since<F>(&self, key: String, value: CachedValue, ttl: Duration, observed: Generation, current: F) -> bool
    where
        F: Fn() -> Generation,
    {
        self.inner.set(key.clone(), value, ttl);
        if current() == observed {
            return true;
        }
        self.inner.delete(&key);
        #[cfg(feature = "audit")]
        debug!("Discarded cache write for '{key}' after a concurrent invalidation");
        false
    }

    /// Cache a resolution unless the principal was invalidated since `observed`.
    pub fn put_resolved_since(&self, resolved: Arc<ResolvedPermissions>, observed: Generation) -> bool {
        let principal_id = resolved.principal_id().to_string();
        self.set_since(
            user_key(&principal_id),
            CachedValue::Resolved(resolved),
            self.ttls.user_permissions,
            observed,
            || self.principal_generation(&principal_id),
        )
    }

    /// Memoise a check unless the principal was invalidated since `observed`.
    pub fn put_check_since(&self, principal_id: &str, permission_key: &str, granted: bool, observed: Generation) -> bool {
        self.set_since(
            check_key(principal_id, permission_key),
            CachedValue::Check(granted),
            self.ttls.permission_checks,
            observed,
            || self.principal_generation(principal_id),
        )
    }

    /// Cache a role's permissions unless the catalog was invalidated since `observed`.
    pub fn put_role_permissions_since(
        &self,
        role_id: &str,
        permissions: Arc<Vec<PermissionNode>>,
        observed: Generation,
    ) -> bool {
        self.set_since(
            role_key(role_id),
            CachedValue::RolePermissions(permissions),
            self.ttls.role_permissions,
            observed,
            || self.catalog_generation(),
        )
    }

    /// Cache a forest unless the catalog was invalidated since `observed`.
    pub fn put_tree_since(&self, kind: TreeKind, tree: Arc<Vec<PermissionTreeNode>>, observed: Generation) -> bool {
        self.set_since(
            tree_key(kind).to_string(),
            CachedValue::Tree(tree),
            self.ttls.permission_tree,
            observed,
            || self.catalog_generation(),
        )
    }

    /// The underlying flat cache.
    pub fn inner(&self) -> &TtlCache<CachedValue> {
        &self.inner
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        self.inner.metrics()
    }

    pub fn get_resolved(&self, principal_id: &str) -> Option<Arc<ResolvedPermissions>> {
        match self.inner.get(&user_key(principal_id))? {
            CachedValue::Resolved(resolved) => Some(resolved),
            _ => None,
        }
    }

    pub fn put_resolved(&self, resolved: Arc<ResolvedPermissions>) {
        let key = user_key(resolved.principal_id());
        self.inner
            .set(key, CachedValue::Resolved(resolved), self.ttls.user_permissions);
    }

    pub fn get_check(&self, principal_id: &str, permission_key: &str) -> Option<bool> {
        match self.inner.get(&check_key(principal_id, permission_key))? {
            CachedValue::Check(granted) => Some(granted),
            _ => None,
        }
    }

    pub fn put_check(&self, principal_id: &str, permission_key: &str, granted: bool) {
        self.inner.set(
            check_key(principal_id, permission_key),
            CachedValue::Check(granted),
            self.ttls.permission_checks,
        );
    }

    pub fn get_role_permissions(&self, role_id: &str) -> Option<Arc<Vec<PermissionNode>>> {
        match self.inner.get(&role_key(role_id))? {
            CachedValue::RolePermissions(permissions) => Some(permissions),
            _ => None,
        }
    }

    pub fn put_role_permissions(&self, role_id: &str, permissions: Arc<Vec<PermissionNode>>) {
        self.inner.set(
            role_key(role_id),
            CachedValue::RolePermissions(permissions),
            self.ttls.role_permissions,
        );
    }

    pub fn get_tree(&self, kind: TreeKind) -> Option<Arc<Vec<PermissionTreeNode>>> {
        match self.inner.get(tree_key(kind))? {
            CachedValue::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn put_tree(&self, kind: TreeKind, tree: Arc<Vec<PermissionTreeNode>>) {
        self.inner
            .set(tree_key(kind), CachedValue::Tree(tree), self.ttls.permission_tree);
    }

    /// Drop a principal's resolved set and check memos.
    pub fn invalidate_principal(&self, principal_id: &str) {
        *self
            .principal_generations
            .entry(principal_id.to_string())
            .or_insert(0) += 1;
        self.inner.delete(&user_key(principal_id));
        self.inner
            .delete_prefix(&format!("{PERMISSION_CHECK}{principal_id}:"));
        #[cfg(feature = "audit")]
        debug!("Invalidated cached permissions for principal '{principal_id}'");
    }

    /// Drop every principal's resolved set and check memos.
    pub fn invalidate_all_principals(&self) {
        self.principal_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_prefix(USER_PERMISSIONS);
        self.inner.delete_prefix(PERMISSION_CHECK);
    }

    /// Drop a role's permission list and the catalog forests.
    pub fn invalidate_role(&self, role_id: &str) {
        self.catalog_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(&role_key(role_id));
        self.inner.delete_prefix(PERMISSION_TREE);
        #[cfg(feature = "audit")]
        debug!("Invalidated cached permissions for role '{role_id}'");
    }

    /// Drop the catalog forests and every role's permission list.
    pub fn invalidate_catalog(&self) {
        self.catalog_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_prefix(PERMISSION_TREE);
        self.inner.delete_prefix(ROLE_PERMISSIONS);
        #[cfg(feature = "audit")]
        debug!("Invalidated cached permission catalog");
    }

    /// Reclaim expired entries.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Clear all cache entries.
    pub fn clear(&self) {
        self.principal_epoch.fetch_add(1, Ordering::SeqCst);
        self.catalog_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.clear();
    }

    /// Entry counts per namespace.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for key in self.inner.keys() {
            stats.total += 1;
            if key.starts_with(USER_PERMISSIONS) {
                stats.user_permissions += 1;
            } else if key.starts_with(PERMISSION_CHECK) {
                stats.permission_checks += 1;
            } else if key.starts_with(ROLE_PERMISSIONS) {
                stats.role_permissions += 1;
            } else if key.starts_with(PERMISSION_TREE) {
                stats.permission_tree += 1;
            } else {
                stats.other += 1;
            }
        }
        stats
    }

    /// Start a background thread that sweeps every `interval`.
    ///
    /// The thread holds only a weak reference and exits once the cache is
    /// dropped or the handle is stopped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let cache = Arc::downgrade(self);
        SweeperHandle::spawn(interval, move || match Weak::upgrade(&cache) {
            Some(cache) => {
                cache.sweep();
                true
            }
            None => false,
        })
    }
}

fn user_key(principal_id: &str) -> String {
    format!("{USER_PERMISSIONS}{principal_id}")
}

fn check_key(principal_id: &str, permission_key: &str) -> String {
    format!("{PERMISSION_CHECK}{principal_id}:{permission_key}")
}

fn role_key(role_id: &str) -> String {
    format!("{ROLE_PERMISSIONS}{role_id}")
}

fn tree_key(kind: TreeKind) -> &'static str {
    match kind {
        TreeKind::Full => PERMISSION_TREE,
        TreeKind::Menu => "permission_tree:menu",
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Total number of cache entries.
    pub total: usize,
    pub user_permissions: usize,
    pub permission_checks: usize,
    pub role_permissions: usize,
    pub permission_tree: usize,
    pub other: usize,
}

/// Handle to a periodic sweep thread. Stops the thread when dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    fn spawn<F>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            let mut next = Instant::now() + interval;
            while !flag.load(Ordering::Acquire) {
                let now = Instant::now();
                if now < next {
                    thread::park_timeout(next - now);
                    continue;
                }
                next = now + interval;
                if !tick() {
                    break;
                }
            }
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Stop the sweep thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResolvedPermissions;
    use crate::permission::PermissionType;

    fn cache() -> TtlCache<u32> {
        TtlCache::new(Arc::new(EngineMetrics::new()))
    }

    fn permission_cache() -> PermissionCache {
        PermissionCache::new(CacheTtls::default(), Arc::new(EngineMetrics::new()))
    }

    #[test]
    fn test_set_get_delete() {
        let cache = cache();
        cache.set("a", 1, Duration::from_secs(60));

        assert_eq!(cache.get("a"), Some(1));
        assert!(cache.has("a"));
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.get("a"), None);
        assert!(!cache.has("a"));
    }

    #[test]
    fn test_expired_entry_is_absent_and_evicted_on_read() {
        let cache = cache();
        cache.set("a", 1, Duration::from_secs(60));
        cache.backdate("a", Duration::from_secs(61));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_has_evicts_expired_entry() {
        let cache = cache();
        cache.set("a", 1, Duration::from_secs(10));
        cache.backdate("a", Duration::from_secs(11));

        assert!(!cache.has("a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_at_exact_ttl_is_live() {
        let entry = CacheEntry::new(1, Duration::from_secs(10));
        let at_ttl = entry.stored_at() + Duration::from_secs(10);
        assert!(!entry.is_expired(at_ttl));
        assert!(entry.is_expired(at_ttl + Duration::from_millis(1)));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let metrics = Arc::new(EngineMetrics::new());
        let cache: TtlCache<u32> = TtlCache::new(Arc::clone(&metrics));
        cache.set("stale", 1, Duration::from_secs(60));
        cache.set("fresh", 2, Duration::from_secs(60));
        cache.backdate("stale", Duration::from_secs(120));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.keys(), vec!["fresh".to_string()]);
        assert_eq!(metrics.snapshot().swept_entries, 1);
    }

    #[test]
    fn test_delete_prefix() {
        let cache = cache();
        cache.set("permission_check:u1:a", 1, Duration::from_secs(60));
        cache.set("permission_check:u1:b", 1, Duration::from_secs(60));
        cache.set("permission_check:u10:a", 1, Duration::from_secs(60));

        assert_eq!(cache.delete_prefix("permission_check:u1:"), 2);
        assert_eq!(cache.keys(), vec!["permission_check:u10:a".to_string()]);
    }

    #[test]
    fn test_hit_and_miss_metrics() {
        let metrics = Arc::new(EngineMetrics::new());
        let cache: TtlCache<u32> = TtlCache::new(Arc::clone(&metrics));
        cache.set("a", 1, Duration::from_secs(60));
        cache.get("a");
        cache.get("b");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[test]
    fn test_invalidate_principal_leaves_similar_ids() {
        let cache = permission_cache();
        cache.put_resolved(Arc::new(ResolvedPermissions::super_admin("u1")));
        cache.put_resolved(Arc::new(ResolvedPermissions::super_admin("u10")));
        cache.put_check("u1", "user.list", true);
        cache.put_check("u10", "user.list", false);

        cache.invalidate_principal("u1");

        assert!(cache.get_resolved("u1").is_none());
        assert!(cache.get_check("u1", "user.list").is_none());
        assert!(cache.get_resolved("u10").is_some());
        assert_eq!(cache.get_check("u10", "user.list"), Some(false));
    }

    #[test]
    fn test_invalidate_role_drops_trees() {
        let cache = permission_cache();
        let node = PermissionNode::with_id("p1", "user.list", "Users", PermissionType::Page);
        cache.put_role_permissions("r1", Arc::new(vec![node]));
        cache.put_role_permissions("r2", Arc::new(Vec::new()));
        cache.put_tree(TreeKind::Full, Arc::new(Vec::new()));
        cache.put_tree(TreeKind::Menu, Arc::new(Vec::new()));

        cache.invalidate_role("r1");

        assert!(cache.get_role_permissions("r1").is_none());
        assert!(cache.get_role_permissions("r2").is_some());
        assert!(cache.get_tree(TreeKind::Full).is_none());
        assert!(cache.get_tree(TreeKind::Menu).is_none());
    }

    #[test]
    fn test_invalidate_catalog_drops_all_role_lists() {
        let cache = permission_cache();
        cache.put_role_permissions("r1", Arc::new(Vec::new()));
        cache.put_role_permissions("r2", Arc::new(Vec::new()));
        cache.put_tree(TreeKind::Full, Arc::new(Vec::new()));
        cache.put_resolved(Arc::new(ResolvedPermissions::super_admin("u1")));

        cache.invalidate_catalog();

        let stats = cache.stats();
        assert_eq!(stats.role_permissions, 0);
        assert_eq!(stats.permission_tree, 0);
        assert_eq!(stats.user_permissions, 1);
    }

    #[test]
    fn test_stats_by_namespace() {
        let cache = permission_cache();
        cache.put_resolved(Arc::new(ResolvedPermissions::super_admin("u1")));
        cache.put_check("u1", "a", true);
        cache.put_check("u1", "b", true);
        cache.put_role_permissions("r1", Arc::new(Vec::new()));
        cache.put_tree(TreeKind::Full, Arc::new(Vec::new()));
        cache.inner().set("custom", CachedValue::Check(true), Duration::from_secs(1));

        let stats = cache.stats();
        assert_eq!(stats.total, 6);
        assert_eq!(stats.user_permissions, 1);
        assert_eq!(stats.permission_checks, 2);
        assert_eq!(stats.role_permissions, 1);
        assert_eq!(stats.permission_tree, 1);
        assert_eq!(stats.other, 1);
    }

    #[test]
    fn test_write_racing_an_invalidation_is_discarded() {
        let cache = permission_cache();
        let observed = cache.principal_generation("u1");
        let untouched = cache.principal_generation("u2");
        cache.invalidate_principal("u1");

        assert!(!cache.put_resolved_since(Arc::new(ResolvedPermissions::super_admin("u1")), observed));
        assert!(cache.get_resolved("u1").is_none());
        assert!(!cache.put_check_since("u1", "a", true, observed));
        assert!(cache.get_check("u1", "a").is_none());
        assert!(cache.put_check_since("u2", "a", true, untouched));

        let current = cache.principal_generation("u1");
        assert!(cache.put_resolved_since(Arc::new(ResolvedPermissions::super_admin("u1")), current));
        assert!(cache.get_resolved("u1").is_some());
    }

    #[test]
    fn test_catalog_writes_are_fenced() {
        let cache = permission_cache();
        let observed = cache.catalog_generation();
        cache.invalidate_role("r9");

        assert!(!cache.put_role_permissions_since("r1", Arc::new(Vec::new()), observed));
        assert!(!cache.put_tree_since(TreeKind::Full, Arc::new(Vec::new()), observed));
        assert_eq!(cache.stats().total, 0);

        let observed = cache.catalog_generation();
        assert!(cache.put_tree_since(TreeKind::Menu, Arc::new(Vec::new()), observed));
        cache.invalidate_catalog();
        assert!(cache.get_tree(TreeKind::Menu).is_none());
    }

    #[test]
    fn test_clear_and_bulk_invalidation_advance_generations() {
        let cache = permission_cache();
        let principal = cache.principal_generation("u3");
        let catalog = cache.catalog_generation();
        cache.clear();
        assert!(!cache.put_check_since("u3", "a", true, principal));
        assert!(!cache.put_tree_since(TreeKind::Full, Arc::new(Vec::new()), catalog));

        let principal = cache.principal_generation("u3");
        cache.invalidate_all_principals();
        assert!(!cache.put_check_since("u3", "a", true, principal));
    }

    #[test]
    fn test_namespace_ttls_differ() {
        let ttls = CacheTtls::default();
        assert!(ttls.user_permissions < ttls.role_permissions);
        assert!(ttls.permission_checks < ttls.permission_tree);
    }

    #[test]
    fn test_sweeper_thread_reclaims_expired_entries() {
        let cache = Arc::new(permission_cache());
        cache.put_check("u1", "a", true);
        cache.inner().backdate("permission_check:u1:a", Duration::from_secs(3600));

        let handle = cache.spawn_sweeper(Duration::from_millis(5));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cache.inner().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.stop();

        assert!(cache.inner().is_empty());
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(cache());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100 {
                        cache.set(format!("k{t}:{i}"), i, Duration::from_secs(60));
                        cache.get(&format!("k{t}:{i}"));
                        cache.sweep();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 800);
    }
}
