//! Request-level authorization gate.
//!
//! The gate sits between a request handler and the [`PermissionEngine`]. It
//! turns an optional principal ID plus a [`Requirement`] into an
//! [`AccessDecision`] that keeps "who are you?" and "you may not" apart.

#[cfg(feature = "audit")]
use log::{debug, warn};

use crate::{
    check::{MatchMode, PermissionCheck, Requirement},
    core::{PermissionEngine, ResolvedPermissions},
    error::{Error, Result},
    storage::{DataProvider, MemoryStorage},
};
use std::fmt;
use std::sync::Arc;

/// Outcome of an authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    /// Authenticated but not allowed.
    Forbidden { reason: String },
    /// No principal, or the principal is unknown or inactive.
    Unauthenticated,
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }

    /// Map the decision onto the crate error type.
    pub fn into_result(self) -> Result<()> {
        match self {
            AccessDecision::Granted => Ok(()),
            AccessDecision::Forbidden { reason } => Err(Error::PermissionDenied(reason)),
            AccessDecision::Unauthenticated => Err(Error::Unauthenticated),
        }
    }
}

/// CRUD action derived from an HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    /// `get` reads, `post` creates, `put` and `patch` update, `delete` deletes.
    /// Any other method reads. Matching ignores case.
    pub fn from_method(method: &str) -> Self {
        match method.to_ascii_lowercase().as_str() {
            "post" => Action::Create,
            "put" | "patch" => Action::Update,
            "delete" => Action::Delete,
            _ => Action::Read,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission key for an action on a resource, e.g. `user.delete`.
pub fn resource_key(resource: &str, action: Action) -> String {
    format!("{resource}.{action}")
}

/// Authorization gate over a shared engine.
pub struct AuthorizationGate<P = MemoryStorage>
where
    P: DataProvider,
{
    engine: Arc<PermissionEngine<P>>,
    skip_super_admin: bool,
}

impl<P> AuthorizationGate<P>
where
    P: DataProvider,
{
    pub fn new(engine: Arc<PermissionEngine<P>>) -> Self {
        Self {
            engine,
            skip_super_admin: false,
        }
    }

    /// When set, superadmins are judged by their role grants like everyone else.
    pub fn skip_super_admin(mut self, skip: bool) -> Self {
        self.skip_super_admin = skip;
        self
    }

    pub fn engine(&self) -> &Arc<PermissionEngine<P>> {
        &self.engine
    }

    /// Look up the caller's permissions. `None` means the caller is not
    /// authenticated: no ID, an unknown ID, or an inactive principal.
    ///
    /// Status comes from the cached resolution, so a warm cache answers
    /// without touching storage. Status changes made through
    /// [`PermissionEngine::register_principal`] invalidate that entry.
    pub fn authenticate(&self, principal_id: Option<&str>) -> Result<Option<Arc<ResolvedPermissions>>> {
        let Some(principal_id) = principal_id else {
            return Ok(None);
        };
        let Some(resolved) = self.engine.resolve(principal_id)? else {
            return Ok(None);
        };
        if !resolved.is_active() {
            return Ok(None);
        }
        if self.skip_super_admin && resolved.is_super_admin() {
            return Ok(self.engine.resolve_role_grants(principal_id)?.map(Arc::new));
        }
        Ok(Some(resolved))
    }

    /// Decide whether the caller meets `requirement`.
    pub fn authorize(&self, principal_id: Option<&str>, requirement: &Requirement) -> Result<AccessDecision> {
        let resolved = self.authenticate(principal_id)?;
        let metrics = self.engine.metrics();

        let decision = match resolved.as_deref() {
            None if requirement.evaluate(None) => AccessDecision::Granted,
            None => AccessDecision::Unauthenticated,
            Some(resolved) if requirement.evaluate(Some(resolved)) => AccessDecision::Granted,
            Some(_) => AccessDecision::Forbidden {
                reason: format!("requires {requirement}"),
            },
        };

        match &decision {
            AccessDecision::Granted => {
                metrics.record_granted();
                #[cfg(feature = "audit")]
                debug!("Access granted to {principal_id:?} for {requirement}");
            }
            AccessDecision::Forbidden { reason } => {
                metrics.record_denied();
                #[cfg(feature = "audit")]
                warn!("Access denied to {principal_id:?}: {reason}");
                #[cfg(not(feature = "audit"))]
                let _ = reason;
            }
            AccessDecision::Unauthenticated => {
                metrics.record_unauthenticated();
                #[cfg(feature = "audit")]
                debug!("Unauthenticated request for {requirement}");
            }
        }

        Ok(decision)
    }

    /// Authorize a single check.
    pub fn require(&self, principal_id: Option<&str>, check: PermissionCheck) -> Result<AccessDecision> {
        self.authorize(principal_id, &Requirement::new(check))
    }

    /// Authorize against a list of keys matched with `mode`.
    pub fn require_permissions<I, K>(
        &self,
        principal_id: Option<&str>,
        keys: I,
        mode: MatchMode,
    ) -> Result<AccessDecision>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let check = match mode {
            MatchMode::Any => PermissionCheck::any_of(keys),
            MatchMode::All => PermissionCheck::all_of(keys),
        };
        self.require(principal_id, check)
    }

    pub fn require_any<I, K>(&self, principal_id: Option<&str>, keys: I) -> Result<AccessDecision>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.require_permissions(principal_id, keys, MatchMode::Any)
    }

    pub fn require_all<I, K>(&self, principal_id: Option<&str>, keys: I) -> Result<AccessDecision>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.require_permissions(principal_id, keys, MatchMode::All)
    }

    /// Require `<resource>.<action>`, taking the action from the HTTP method
    /// unless one is given.
    pub fn require_resource(
        &self,
        principal_id: Option<&str>,
        resource: &str,
        method: &str,
        action: Option<Action>,
    ) -> Result<AccessDecision> {
        let action = action.unwrap_or_else(|| Action::from_method(method));
        self.require(principal_id, PermissionCheck::permission(resource_key(resource, action)))
    }

    /// Apply `requirement` only when `condition` holds; otherwise grant.
    pub fn require_if(
        &self,
        principal_id: Option<&str>,
        condition: bool,
        requirement: &Requirement,
    ) -> Result<AccessDecision> {
        if !condition {
            return Ok(AccessDecision::Granted);
        }
        self.authorize(principal_id, requirement)
    }

    /// Wrap `operation` so that it only runs for callers meeting `requirement`.
    ///
    /// # Example
    /// ```rust
    /// use admin_rbac::{AuthorizationGate, Error, PermissionCheck, PermissionEngine, Principal, Result};
    /// use std::sync::Arc;
    ///
    /// let engine = Arc::new(PermissionEngine::new());
    /// engine.register_principal(Principal::super_admin("root").with_id("root"))?;
    /// let gate = AuthorizationGate::new(engine);
    ///
    /// let delete_user = gate.guarded(
    ///     PermissionCheck::permission("user.delete"),
    ///     |id: &str| -> Result<String> { Ok(format!("deleted {id}")) },
    /// );
    /// assert_eq!(delete_user.call(Some("root"), "u42")?, "deleted u42");
    /// assert!(matches!(delete_user.call(None, "u42"), Err(Error::Unauthenticated)));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn guarded<F>(&self, requirement: impl Into<Requirement>, operation: F) -> Guarded<'_, P, F> {
        Guarded {
            gate: self,
            requirement: requirement.into(),
            operation,
        }
    }
}

impl<P> Clone for AuthorizationGate<P>
where
    P: DataProvider,
{
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            skip_super_admin: self.skip_super_admin,
        }
    }
}

/// An operation gated by a requirement. Created by [`AuthorizationGate::guarded`].
pub struct Guarded<'g, P, F>
where
    P: DataProvider,
{
    gate: &'g AuthorizationGate<P>,
    requirement: Requirement,
    operation: F,
}

impl<'g, P, F> Guarded<'g, P, F>
where
    P: DataProvider,
{
    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// Authorize the caller, then run the operation with `input`.
    ///
    /// Returns [`Error::Unauthenticated`] or [`Error::PermissionDenied`]
    /// without running the operation when the caller fails the requirement.
    pub fn call<A, T>(&self, principal_id: Option<&str>, input: A) -> Result<T>
    where
        F: Fn(A) -> Result<T>,
    {
        self.gate
            .authorize(principal_id, &self.requirement)?
            .into_result()?;
        (self.operation)(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{PermissionNode, PermissionType};
    use crate::principal::{Principal, PrincipalStatus};
    use crate::role::Role;

    fn gate() -> AuthorizationGate {
        let engine = PermissionEngine::new();
        for (id, key) in [("p1", "user.read"), ("p2", "user.create"), ("p3", "user.delete")] {
            engine
                .create_permission(PermissionNode::with_id(id, key, key, PermissionType::Api))
                .unwrap();
        }
        engine.create_role(Role::with_id("r1", "Viewer", "viewer")).unwrap();
        engine
            .assign_permissions_to_role("r1", &["p1".to_string(), "p2".to_string()])
            .unwrap();
        engine
            .register_principal(Principal::admin("alice").with_id("u1"))
            .unwrap();
        engine
            .register_principal(
                Principal::admin("mallory")
                    .with_id("u2")
                    .with_status(PrincipalStatus::Inactive),
            )
            .unwrap();
        engine
            .register_principal(Principal::super_admin("root").with_id("root"))
            .unwrap();
        engine
            .assign_roles_to_principal("u1", &["r1".to_string()])
            .unwrap();
        engine
            .assign_roles_to_principal("u2", &["r1".to_string()])
            .unwrap();
        AuthorizationGate::new(Arc::new(engine))
    }

    #[test]
    fn test_action_from_method() {
        assert_eq!(Action::from_method("GET"), Action::Read);
        assert_eq!(Action::from_method("post"), Action::Create);
        assert_eq!(Action::from_method("put"), Action::Update);
        assert_eq!(Action::from_method("PATCH"), Action::Update);
        assert_eq!(Action::from_method("delete"), Action::Delete);
        assert_eq!(Action::from_method("options"), Action::Read);
        assert_eq!(resource_key("user", Action::Delete), "user.delete");
    }

    #[test]
    fn test_authentication_and_authorization_are_distinct() {
        let gate = gate();
        let check = || PermissionCheck::permission("user.delete");

        assert_eq!(gate.require(None, check()).unwrap(), AccessDecision::Unauthenticated);
        assert_eq!(gate.require(Some("ghost"), check()).unwrap(), AccessDecision::Unauthenticated);
        assert_eq!(gate.require(Some("u2"), check()).unwrap(), AccessDecision::Unauthenticated);
        assert!(matches!(
            gate.require(Some("u1"), check()).unwrap(),
            AccessDecision::Forbidden { .. }
        ));
        assert!(gate.require(Some("root"), check()).unwrap().is_granted());

        let snapshot = gate.engine().metrics().snapshot();
        assert_eq!(snapshot.access_unauthenticated, 3);
        assert_eq!(snapshot.access_denied, 1);
        assert_eq!(snapshot.access_granted, 1);
    }

    #[test]
    fn test_any_and_all() {
        let gate = gate();
        assert!(gate
            .require_any(Some("u1"), ["user.delete", "user.read"])
            .unwrap()
            .is_granted());
        assert!(!gate
            .require_all(Some("u1"), ["user.delete", "user.read"])
            .unwrap()
            .is_granted());
        assert!(gate
            .require_all(Some("u1"), ["user.create", "user.read"])
            .unwrap()
            .is_granted());
    }

    #[test]
    fn test_resource_requirement() {
        let gate = gate();
        assert!(gate.require_resource(Some("u1"), "user", "GET", None).unwrap().is_granted());
        assert!(gate.require_resource(Some("u1"), "user", "POST", None).unwrap().is_granted());
        assert!(!gate.require_resource(Some("u1"), "user", "DELETE", None).unwrap().is_granted());
        assert!(gate
            .require_resource(Some("u1"), "user", "DELETE", Some(Action::Read))
            .unwrap()
            .is_granted());
    }

    #[test]
    fn test_conditional_requirement() {
        let gate = gate();
        let requirement = Requirement::new(PermissionCheck::permission("user.delete"));
        assert!(gate.require_if(None, false, &requirement).unwrap().is_granted());
        assert_eq!(
            gate.require_if(None, true, &requirement).unwrap(),
            AccessDecision::Unauthenticated
        );
    }

    #[test]
    fn test_skip_super_admin() {
        let gate = gate().skip_super_admin(true);
        assert!(!gate
            .require(Some("root"), PermissionCheck::permission("user.read"))
            .unwrap()
            .is_granted());
    }

    #[test]
    fn test_reversed_requirement_admits_anonymous() {
        let gate = gate();
        let guest_only = Requirement::new(PermissionCheck::Authenticated).reversed();
        assert!(gate.authorize(None, &guest_only).unwrap().is_granted());
        assert!(!gate.authorize(Some("u1"), &guest_only).unwrap().is_granted());
    }

    #[test]
    fn test_guarded_operation() {
        let gate = gate();
        let delete = gate.guarded(
            PermissionCheck::permission("user.delete"),
            |id: &str| -> Result<String> { Ok(format!("deleted {id}")) },
        );

        assert!(matches!(delete.call(None, "u9"), Err(Error::Unauthenticated)));
        assert!(matches!(delete.call(Some("u1"), "u9"), Err(Error::PermissionDenied(_))));
        assert_eq!(delete.call(Some("root"), "u9").unwrap(), "deleted u9");
    }

    #[test]
    fn test_decision_into_result() {
        assert!(AccessDecision::Granted.into_result().is_ok());
        assert!(AccessDecision::Unauthenticated
            .into_result()
            .unwrap_err()
            .is_authentication_failure());
        assert!(AccessDecision::Forbidden {
            reason: "requires permission x".to_string()
        }
        .into_result()
        .unwrap_err()
        .is_authorization_failure());
    }
}
