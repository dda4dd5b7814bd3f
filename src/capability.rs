//! UI capability gate.
//!
//! A client fetches its resolved permission set once and keeps it as a
//! snapshot. [`CapabilityGate`] answers the same predicates as the engine over
//! that snapshot, without any storage access, and turns the outcome of a
//! [`CapabilityBinding`] into an [`ElementState`] for rendering.
//!
//! Bindings are built explicitly in code. With the `persistence` feature they
//! can also be parsed from JSON: a string is a single permission key, an array
//! is a list of keys of which any suffices, and an object names its fields:
//!
//! ```json
//! { "permissions": ["user.edit", "user.delete"], "permissionMode": "all", "action": "disable" }
//! ```

use crate::{
    check::{PermissionCheck, Requirement},
    core::ResolvedPermissions,
};
#[cfg(feature = "persistence")]
use crate::{
    check::MatchMode,
    error::{Error, Result},
};
use std::sync::Arc;

/// What to do with an element whose binding fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "persistence", serde(rename_all = "lowercase"))]
pub enum DisplayAction {
    /// Remove the element from layout.
    #[default]
    Show,
    /// Make the element invisible but keep its space.
    Hide,
    /// Render the element but disable interaction.
    Disable,
}

/// Rendering state for a bound element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementState {
    pub visible: bool,
    /// Whether the element occupies layout space.
    pub keeps_space: bool,
    pub disabled: bool,
}

impl DisplayAction {
    /// Rendering state for a binding that evaluated to `allowed`.
    pub fn render(self, allowed: bool) -> ElementState {
        match self {
            DisplayAction::Show => ElementState {
                visible: allowed,
                keeps_space: allowed,
                disabled: false,
            },
            DisplayAction::Hide => ElementState {
                visible: allowed,
                keeps_space: true,
                disabled: false,
            },
            DisplayAction::Disable => ElementState {
                visible: true,
                keeps_space: true,
                disabled: !allowed,
            },
        }
    }
}

/// A requirement attached to a UI element.
#[derive(Debug, Clone)]
pub struct CapabilityBinding {
    requirement: Requirement,
    action: DisplayAction,
}

impl CapabilityBinding {
    pub fn new(check: PermissionCheck) -> Self {
        Self {
            requirement: Requirement::new(check),
            action: DisplayAction::default(),
        }
    }

    /// Show the element exactly when the check fails.
    pub fn reversed(mut self) -> Self {
        self.requirement = self.requirement.reversed();
        self
    }

    pub fn with_action(mut self, action: DisplayAction) -> Self {
        self.action = action;
        self
    }

    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    pub fn action(&self) -> DisplayAction {
        self.action
    }

    /// Parse a JSON binding value.
    ///
    /// Object fields are checked in a fixed order: `permission`,
    /// `permissions` (with `permissionMode`), `role`, `roles`, `menu`. An
    /// object naming none of them only requires authentication. Numbers,
    /// booleans and null are rejected.
    #[cfg(feature = "persistence")]
    pub fn parse(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::String(key) => Ok(Self::new(PermissionCheck::permission(key.as_str()))),
            Value::Array(items) => {
                let keys = items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            Error::InvalidBinding(format!("permission list entry {item} is not a string"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::new(PermissionCheck::any_of(keys)))
            }
            Value::Object(_) => {
                let fields: BindingFields = serde_json::from_value(value.clone())
                    .map_err(|e| Error::InvalidBinding(e.to_string()))?;
                Ok(fields.into_binding())
            }
            other => Err(Error::InvalidBinding(format!("unsupported binding value {other}"))),
        }
    }

    /// Parse a binding from JSON text.
    #[cfg(feature = "persistence")]
    pub fn parse_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::parse(&value)
    }
}

impl From<PermissionCheck> for CapabilityBinding {
    fn from(check: PermissionCheck) -> Self {
        CapabilityBinding::new(check)
    }
}

#[cfg(feature = "persistence")]
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BindingFields {
    permission: Option<String>,
    permissions: Option<Vec<String>>,
    #[serde(default)]
    permission_mode: MatchMode,
    role: Option<String>,
    roles: Option<Vec<String>>,
    menu: Option<String>,
    #[serde(default)]
    reverse: bool,
    #[serde(default)]
    action: DisplayAction,
}

#[cfg(feature = "persistence")]
impl BindingFields {
    fn into_binding(self) -> CapabilityBinding {
        let check = if let Some(key) = self.permission {
            PermissionCheck::Permission(key)
        } else if let Some(keys) = self.permissions {
            PermissionCheck::Permissions {
                keys,
                mode: self.permission_mode,
            }
        } else if let Some(code) = self.role {
            PermissionCheck::Role(code)
        } else if let Some(codes) = self.roles {
            PermissionCheck::Roles(codes)
        } else if let Some(key) = self.menu {
            PermissionCheck::Menu(key)
        } else {
            PermissionCheck::Authenticated
        };

        let binding = CapabilityBinding::new(check).with_action(self.action);
        if self.reverse {
            binding.reversed()
        } else {
            binding
        }
    }
}

/// Predicate surface over a client-held permission snapshot.
#[derive(Debug, Clone, Default)]
pub struct CapabilityGate {
    snapshot: Option<Arc<ResolvedPermissions>>,
}

impl CapabilityGate {
    /// A gate for a client that has not signed in.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(snapshot: impl Into<Arc<ResolvedPermissions>>) -> Self {
        Self {
            snapshot: Some(snapshot.into()),
        }
    }

    /// Load a snapshot serialized by the serving side.
    #[cfg(feature = "persistence")]
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: ResolvedPermissions = serde_json::from_str(json)?;
        Ok(Self::new(snapshot))
    }

    /// Replace the snapshot, e.g. after signing in or refreshing.
    pub fn set_snapshot(&mut self, snapshot: impl Into<Arc<ResolvedPermissions>>) {
        self.snapshot = Some(snapshot.into());
    }

    /// Drop the snapshot on sign-out.
    pub fn clear(&mut self) {
        self.snapshot = None;
    }

    pub fn snapshot(&self) -> Option<&ResolvedPermissions> {
        self.snapshot.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn has_permission(&self, key: &str) -> bool {
        self.snapshot().is_some_and(|s| s.has_permission(key))
    }

    pub fn has_any_permission<K: AsRef<str>>(&self, keys: &[K]) -> bool {
        self.snapshot().is_some_and(|s| s.has_any_permission(keys))
    }

    pub fn has_all_permissions<K: AsRef<str>>(&self, keys: &[K]) -> bool {
        self.snapshot().is_some_and(|s| s.has_all_permissions(keys))
    }

    pub fn has_role(&self, code: &str) -> bool {
        self.snapshot().is_some_and(|s| s.has_role(code))
    }

    pub fn has_any_role<C: AsRef<str>>(&self, codes: &[C]) -> bool {
        self.snapshot().is_some_and(|s| s.has_any_role(codes))
    }

    pub fn has_menu_permission(&self, key: &str) -> bool {
        self.snapshot().is_some_and(|s| s.has_menu_permission(key))
    }

    pub fn allows(&self, requirement: &Requirement) -> bool {
        requirement.evaluate(self.snapshot())
    }

    /// Rendering state for an element carrying `binding`.
    pub fn element_state(&self, binding: &CapabilityBinding) -> ElementState {
        binding.action.render(self.allows(&binding.requirement))
    }

    /// Rendering state for an element shown only to (or, reversed, only
    /// hidden from) signed-in clients.
    pub fn auth_state(&self, reverse: bool) -> ElementState {
        DisplayAction::Show.render(self.is_authenticated() != reverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{PermissionNode, PermissionType};
    use crate::role::Role;

    fn snapshot() -> ResolvedPermissions {
        ResolvedPermissions::from_parts(
            "u1",
            vec![Role::with_id("r1", "Operator", "operator").summary()],
            vec![
                PermissionNode::with_id("m", "system", "System", PermissionType::Menu),
                PermissionNode::with_id("p", "user.page", "Users", PermissionType::Page).with_parent("m"),
                PermissionNode::with_id("e", "user.edit", "Edit", PermissionType::Action).with_parent("p"),
            ],
        )
    }

    #[test]
    fn test_display_actions() {
        assert_eq!(
            DisplayAction::Show.render(false),
            ElementState { visible: false, keeps_space: false, disabled: false }
        );
        assert_eq!(
            DisplayAction::Hide.render(false),
            ElementState { visible: false, keeps_space: true, disabled: false }
        );
        assert_eq!(
            DisplayAction::Disable.render(false),
            ElementState { visible: true, keeps_space: true, disabled: true }
        );
        for action in [DisplayAction::Show, DisplayAction::Hide, DisplayAction::Disable] {
            let state = action.render(true);
            assert!(state.visible && state.keeps_space && !state.disabled);
        }
    }

    #[test]
    fn test_anonymous_gate_denies() {
        let gate = CapabilityGate::anonymous();
        assert!(!gate.has_permission("user.edit"));
        assert!(!gate.has_menu_permission("system"));
        assert!(!gate.is_authenticated());

        let reversed = CapabilityBinding::new(PermissionCheck::permission("user.edit")).reversed();
        assert!(gate.element_state(&reversed).visible);
        assert!(gate.auth_state(true).visible);
        assert!(!gate.auth_state(false).visible);
    }

    #[test]
    fn test_snapshot_predicates() {
        let mut gate = CapabilityGate::new(snapshot());
        assert!(gate.has_permission("user.edit"));
        assert!(gate.has_any_permission(&["user.delete", "user.edit"]));
        assert!(!gate.has_all_permissions(&["user.delete", "user.edit"]));
        assert!(gate.has_role("operator"));
        assert!(gate.has_menu_permission("user.page"));

        let binding = CapabilityBinding::new(PermissionCheck::permission("user.delete"))
            .with_action(DisplayAction::Disable);
        assert!(gate.element_state(&binding).disabled);

        gate.clear();
        assert!(!gate.has_permission("user.edit"));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_parse_bindings() {
        use crate::check::MatchMode;
        use serde_json::json;

        let single = CapabilityBinding::parse(&json!("user.edit")).unwrap();
        assert!(matches!(single.requirement().check(), PermissionCheck::Permission(k) if k == "user.edit"));

        let list = CapabilityBinding::parse(&json!(["a", "b"])).unwrap();
        assert!(matches!(
            list.requirement().check(),
            PermissionCheck::Permissions { mode: MatchMode::Any, .. }
        ));

        let object = CapabilityBinding::parse(&json!({
            "permissions": ["user.edit", "user.delete"],
            "permissionMode": "all",
            "reverse": true,
            "action": "hide"
        }))
        .unwrap();
        assert!(object.requirement().is_reversed());
        assert_eq!(object.action(), DisplayAction::Hide);

        let gate = CapabilityGate::new(snapshot());
        assert!(gate.element_state(&object).visible);

        let empty = CapabilityBinding::parse(&json!({})).unwrap();
        assert!(matches!(empty.requirement().check(), PermissionCheck::Authenticated));

        assert!(matches!(CapabilityBinding::parse(&json!(42)), Err(Error::InvalidBinding(_))));
        assert!(matches!(CapabilityBinding::parse(&json!([1])), Err(Error::InvalidBinding(_))));
        assert!(matches!(
            CapabilityBinding::parse(&json!({ "check": "x" })),
            Err(Error::InvalidBinding(_))
        ));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_snapshot_round_trip_through_json() {
        let json = serde_json::to_string(&snapshot()).unwrap();
        let gate = CapabilityGate::from_json(&json).unwrap();
        assert!(gate.has_permission("user.edit"));
        assert!(gate.has_menu_permission("user.page"));
    }
}
