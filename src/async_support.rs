//! Async support for the permission engine (requires 'async' feature).
//!
//! Storage backends are synchronous and may block on I/O, so every call is
//! moved onto tokio's blocking pool. The engine itself is shared behind an
//! `Arc` and needs no async lock: its cache is concurrent and its storage is
//! `Send + Sync`.

#[cfg(feature = "audit")]
use log::debug;

use crate::{
    cache::PermissionCache,
    check::Requirement,
    core::{PermissionEngine, ResolvedPermissions},
    error::{Error, Result},
    gate::{AccessDecision, AuthorizationGate},
    hierarchy::PermissionTreeNode,
    permission::PermissionNode,
    principal::Principal,
    storage::{DataProvider, MemoryStorage, Storage},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

async fn blocking<T, F>(operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| Error::Storage(format!("Blocking task failed: {e}")))?
}

/// Async wrapper around the permission engine for non-blocking operations.
pub struct AsyncPermissionEngine<P = MemoryStorage>
where
    P: DataProvider + 'static,
{
    inner: Arc<PermissionEngine<P>>,
}

impl<P> AsyncPermissionEngine<P>
where
    P: DataProvider + 'static,
{
    pub fn new(engine: PermissionEngine<P>) -> Self {
        Self {
            inner: Arc::new(engine),
        }
    }

    pub fn from_shared(engine: Arc<PermissionEngine<P>>) -> Self {
        Self { inner: engine }
    }

    /// The shared synchronous engine.
    pub fn engine(&self) -> &Arc<PermissionEngine<P>> {
        &self.inner
    }

    /// An authorization gate over the same engine.
    pub fn gate(&self) -> AuthorizationGate<P> {
        AuthorizationGate::new(Arc::clone(&self.inner))
    }

    /// Run a closure against the engine on the blocking pool.
    pub async fn with_engine<F, R>(&self, operation: F) -> Result<R>
    where
        F: FnOnce(&PermissionEngine<P>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let engine = Arc::clone(&self.inner);
        blocking(move || operation(&engine)).await
    }

    pub async fn resolve(&self, principal_id: &str) -> Result<Option<Arc<ResolvedPermissions>>> {
        let principal_id = principal_id.to_string();
        self.with_engine(move |engine| engine.resolve(&principal_id))
            .await
    }

    pub async fn has_permission(&self, principal_id: &str, key: &str) -> Result<bool> {
        let (principal_id, key) = (principal_id.to_string(), key.to_string());
        self.with_engine(move |engine| engine.has_permission(&principal_id, &key))
            .await
    }

    /// Memoised single-key check.
    pub async fn check_permission(&self, principal_id: &str, key: &str) -> Result<bool> {
        let (principal_id, key) = (principal_id.to_string(), key.to_string());
        self.with_engine(move |engine| engine.check_permission(&principal_id, &key))
            .await
    }

    pub async fn has_any_permission(&self, principal_id: &str, keys: &[String]) -> Result<bool> {
        let (principal_id, keys) = (principal_id.to_string(), keys.to_vec());
        self.with_engine(move |engine| engine.has_any_permission(&principal_id, &keys))
            .await
    }

    pub async fn has_all_permissions(&self, principal_id: &str, keys: &[String]) -> Result<bool> {
        let (principal_id, keys) = (principal_id.to_string(), keys.to_vec());
        self.with_engine(move |engine| engine.has_all_permissions(&principal_id, &keys))
            .await
    }

    pub async fn has_role(&self, principal_id: &str, code: &str) -> Result<bool> {
        let (principal_id, code) = (principal_id.to_string(), code.to_string());
        self.with_engine(move |engine| engine.has_role(&principal_id, &code))
            .await
    }

    pub async fn has_menu_permission(&self, principal_id: &str, key: &str) -> Result<bool> {
        let (principal_id, key) = (principal_id.to_string(), key.to_string());
        self.with_engine(move |engine| engine.has_menu_permission(&principal_id, &key))
            .await
    }

    /// Check several keys for one principal with a single resolution.
    pub async fn batch_check_permissions(
        &self,
        principal_id: &str,
        keys: &[String],
    ) -> Result<Vec<(String, bool)>> {
        let Some(resolved) = self.resolve(principal_id).await? else {
            return Ok(keys.iter().map(|key| (key.clone(), false)).collect());
        };
        Ok(keys
            .iter()
            .map(|key| (key.clone(), resolved.has_permission(key)))
            .collect())
    }

    pub async fn permission_tree(&self) -> Result<Arc<Vec<PermissionTreeNode>>> {
        self.with_engine(|engine| engine.permission_tree()).await
    }

    pub async fn menu_tree(&self) -> Result<Arc<Vec<PermissionTreeNode>>> {
        self.with_engine(|engine| engine.menu_tree()).await
    }

    pub async fn role_permissions(&self, role_id: &str) -> Result<Option<Arc<Vec<PermissionNode>>>> {
        let role_id = role_id.to_string();
        self.with_engine(move |engine| engine.role_permissions(&role_id))
            .await
    }

    /// Sweep the engine's cache every `sweep_interval` on a tokio task.
    ///
    /// The task holds a weak reference and ends once the cache is dropped;
    /// abort the handle to stop it earlier.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        spawn_sweep_task(self.inner.cache(), self.inner.config().sweep_interval)
    }
}

impl<S> AsyncPermissionEngine<S>
where
    S: Storage + 'static,
{
    pub async fn register_principal(&self, principal: Principal) -> Result<()> {
        self.with_engine(move |engine| engine.register_principal(principal))
            .await
    }

    pub async fn assign_roles_to_principal(&self, principal_id: &str, role_ids: &[String]) -> Result<()> {
        let (principal_id, role_ids) = (principal_id.to_string(), role_ids.to_vec());
        self.with_engine(move |engine| engine.assign_roles_to_principal(&principal_id, &role_ids))
            .await
    }

    pub async fn assign_permissions_to_role(&self, role_id: &str, permission_ids: &[String]) -> Result<()> {
        let (role_id, permission_ids) = (role_id.to_string(), permission_ids.to_vec());
        self.with_engine(move |engine| engine.assign_permissions_to_role(&role_id, &permission_ids))
            .await
    }
}

impl<P> Clone for AsyncPermissionEngine<P>
where
    P: DataProvider + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Sweep `cache` every `interval` until the cache is dropped.
pub fn spawn_sweep_task(cache: &Arc<PermissionCache>, interval: Duration) -> JoinHandle<()> {
    let cache = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(cache) = cache.upgrade() else {
                break;
            };
            let removed = cache.sweep();
            #[cfg(feature = "audit")]
            debug!("Async sweep removed {removed} expired cache entries");
            #[cfg(not(feature = "audit"))]
            let _ = removed;
        }
    })
}

/// Async authorization for request handlers.
#[async_trait::async_trait]
pub trait AsyncAuthorizer: Send + Sync {
    /// Decide whether the caller meets `requirement`.
    async fn authorize(&self, principal_id: Option<&str>, requirement: &Requirement) -> Result<AccessDecision>;

    /// Authorize, mapping a refusal onto [`Error::Unauthenticated`] or
    /// [`Error::PermissionDenied`].
    async fn enforce(&self, principal_id: Option<&str>, requirement: &Requirement) -> Result<()> {
        self.authorize(principal_id, requirement).await?.into_result()
    }
}

#[async_trait::async_trait]
impl<P> AsyncAuthorizer for AuthorizationGate<P>
where
    P: DataProvider + 'static,
{
    async fn authorize(&self, principal_id: Option<&str>, requirement: &Requirement) -> Result<AccessDecision> {
        let gate = self.clone();
        let principal_id = principal_id.map(str::to_string);
        let requirement = requirement.clone();
        blocking(move || AuthorizationGate::authorize(&gate, principal_id.as_deref(), &requirement)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        check::PermissionCheck,
        permission::{PermissionNode, PermissionType},
        role::Role,
    };

    fn engine() -> AsyncPermissionEngine {
        let engine = PermissionEngine::new();
        engine
            .create_permission(PermissionNode::with_id("p1", "report.view", "View", PermissionType::Page))
            .unwrap();
        engine
            .create_permission(PermissionNode::with_id("p2", "report.export", "Export", PermissionType::Action))
            .unwrap();
        engine.create_role(Role::with_id("r1", "Analyst", "analyst")).unwrap();
        engine
            .assign_permissions_to_role("r1", &["p1".to_string()])
            .unwrap();
        AsyncPermissionEngine::new(engine)
    }

    #[tokio::test]
    async fn test_async_resolution() {
        let engine = engine();
        engine
            .register_principal(Principal::admin("dana").with_id("u1"))
            .await
            .unwrap();
        engine
            .assign_roles_to_principal("u1", &["r1".to_string()])
            .await
            .unwrap();

        assert!(engine.has_permission("u1", "report.view").await.unwrap());
        assert!(!engine.check_permission("u1", "report.export").await.unwrap());
        assert!(engine.has_role("u1", "analyst").await.unwrap());
        assert!(engine.resolve("ghost").await.unwrap().is_none());
        assert_eq!(engine.permission_tree().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_async_batch_permissions() {
        let engine = engine();
        engine
            .register_principal(Principal::admin("dana").with_id("u1"))
            .await
            .unwrap();
        engine
            .assign_roles_to_principal("u1", &["r1".to_string()])
            .await
            .unwrap();

        let keys = vec!["report.view".to_string(), "report.export".to_string()];
        let results = engine.batch_check_permissions("u1", &keys).await.unwrap();
        assert_eq!(
            results,
            vec![("report.view".to_string(), true), ("report.export".to_string(), false)]
        );

        let unknown = engine.batch_check_permissions("ghost", &keys).await.unwrap();
        assert!(unknown.iter().all(|(_, granted)| !granted));
    }

    #[tokio::test]
    async fn test_async_authorizer() {
        let engine = engine();
        engine
            .register_principal(Principal::admin("dana").with_id("u1"))
            .await
            .unwrap();
        engine
            .assign_roles_to_principal("u1", &["r1".to_string()])
            .await
            .unwrap();

        let gate = engine.gate();
        let export = Requirement::new(PermissionCheck::permission("report.export"));
        assert!(matches!(
            gate.enforce(Some("u1"), &export).await,
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(gate.enforce(None, &export).await, Err(Error::Unauthenticated)));

        let view = Requirement::new(PermissionCheck::permission("report.view"));
        assert!(gate.enforce(Some("u1"), &view).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_evicts_expired_entries() {
        let engine = engine();
        let cache = Arc::clone(engine.engine().cache());
        cache.put_check("u1", "report.view", true);
        cache.inner().backdate("permission_check:u1:report.view", Duration::from_secs(600));

        let handle = engine.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.stats().permission_checks, 0);
        assert!(engine.engine().metrics().snapshot().swept_entries >= 1);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_ends_with_cache() {
        let cache = Arc::new(PermissionCache::new(
            Default::default(),
            Arc::new(crate::metrics::EngineMetrics::new()),
        ));
        let handle = spawn_sweep_task(&cache, Duration::from_secs(1));
        drop(cache);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
