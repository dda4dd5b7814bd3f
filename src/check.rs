//! Declarative permission checks.
//!
//! A [`PermissionCheck`] names what a caller needs: a key, several keys, a
//! role, a menu entry, or an arbitrary predicate. A [`Requirement`] pairs a
//! check with the reversal option and evaluates it against an optional
//! resolved permission set, where `None` means the caller is not
//! authenticated.

use crate::core::ResolvedPermissions;
use std::fmt;
use std::sync::Arc;

/// How a list of permission keys is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "persistence", serde(rename_all = "lowercase"))]
pub enum MatchMode {
    /// At least one key must be granted.
    #[default]
    Any,
    /// Every key must be granted.
    All,
}

/// Predicate over a resolved permission set.
pub type CheckFn = Arc<dyn Fn(&ResolvedPermissions) -> bool + Send + Sync>;

/// A single authorization check.
#[derive(Clone)]
pub enum PermissionCheck {
    /// Passes for any authenticated principal.
    Authenticated,
    /// One permission key.
    Permission(String),
    /// Several permission keys matched with `mode`.
    Permissions { keys: Vec<String>, mode: MatchMode },
    /// One role code.
    Role(String),
    /// Any of several role codes.
    Roles(Vec<String>),
    /// An enabled entry in the principal's menu forest.
    Menu(String),
    /// Caller-supplied predicate.
    Custom { description: String, predicate: CheckFn },
}

impl PermissionCheck {
    pub fn permission(key: impl Into<String>) -> Self {
        PermissionCheck::Permission(key.into())
    }

    pub fn any_of<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        PermissionCheck::Permissions {
            keys: keys.into_iter().map(Into::into).collect(),
            mode: MatchMode::Any,
        }
    }

    pub fn all_of<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        PermissionCheck::Permissions {
            keys: keys.into_iter().map(Into::into).collect(),
            mode: MatchMode::All,
        }
    }

    pub fn role(code: impl Into<String>) -> Self {
        PermissionCheck::Role(code.into())
    }

    pub fn any_role<I, C>(codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        PermissionCheck::Roles(codes.into_iter().map(Into::into).collect())
    }

    pub fn menu(key: impl Into<String>) -> Self {
        PermissionCheck::Menu(key.into())
    }

    /// Wrap an arbitrary predicate. `description` is used in denial reasons.
    pub fn custom<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ResolvedPermissions) -> bool + Send + Sync + 'static,
    {
        PermissionCheck::Custom {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Evaluate against an authenticated principal's permissions.
    ///
    /// A superadmin satisfies every check, custom predicates included.
    pub fn is_satisfied_by(&self, resolved: &ResolvedPermissions) -> bool {
        if resolved.is_super_admin() {
            return true;
        }
        match self {
            PermissionCheck::Authenticated => true,
            PermissionCheck::Permission(key) => resolved.has_permission(key),
            PermissionCheck::Permissions { keys, mode: MatchMode::Any } => {
                resolved.has_any_permission(keys)
            }
            PermissionCheck::Permissions { keys, mode: MatchMode::All } => {
                resolved.has_all_permissions(keys)
            }
            PermissionCheck::Role(code) => resolved.has_role(code),
            PermissionCheck::Roles(codes) => resolved.has_any_role(codes),
            PermissionCheck::Menu(key) => resolved.has_menu_permission(key),
            PermissionCheck::Custom { predicate, .. } => predicate(resolved),
        }
    }
}

impl fmt::Debug for PermissionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionCheck::Authenticated => f.write_str("Authenticated"),
            PermissionCheck::Permission(key) => f.debug_tuple("Permission").field(key).finish(),
            PermissionCheck::Permissions { keys, mode } => f
                .debug_struct("Permissions")
                .field("keys", keys)
                .field("mode", mode)
                .finish(),
            PermissionCheck::Role(code) => f.debug_tuple("Role").field(code).finish(),
            PermissionCheck::Roles(codes) => f.debug_tuple("Roles").field(codes).finish(),
            PermissionCheck::Menu(key) => f.debug_tuple("Menu").field(key).finish(),
            PermissionCheck::Custom { description, .. } => f
                .debug_struct("Custom")
                .field("description", description)
                .finish_non_exhaustive(),
        }
    }
}

impl fmt::Display for PermissionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionCheck::Authenticated => write!(f, "authentication"),
            PermissionCheck::Permission(key) => write!(f, "permission {key}"),
            PermissionCheck::Permissions { keys, mode } => {
                let mode = match mode {
                    MatchMode::Any => "any",
                    MatchMode::All => "all",
                };
                write!(f, "{mode} of permissions [{}]", keys.join(", "))
            }
            PermissionCheck::Role(code) => write!(f, "role {code}"),
            PermissionCheck::Roles(codes) => write!(f, "any of roles [{}]", codes.join(", ")),
            PermissionCheck::Menu(key) => write!(f, "menu {key}"),
            PermissionCheck::Custom { description, .. } => f.write_str(description),
        }
    }
}

/// A check plus the option to reverse its outcome.
#[derive(Debug, Clone)]
pub struct Requirement {
    check: PermissionCheck,
    reverse: bool,
}

impl Requirement {
    pub fn new(check: PermissionCheck) -> Self {
        Self {
            check,
            reverse: false,
        }
    }

    /// Pass exactly when the check would fail, including for callers that
    /// are not authenticated.
    pub fn reversed(mut self) -> Self {
        self.reverse = !self.reverse;
        self
    }

    pub fn check(&self) -> &PermissionCheck {
        &self.check
    }

    pub fn is_reversed(&self) -> bool {
        self.reverse
    }

    /// Evaluate the requirement. `None` stands for an unauthenticated caller,
    /// which fails unless the requirement is reversed.
    pub fn evaluate(&self, resolved: Option<&ResolvedPermissions>) -> bool {
        match resolved {
            None => self.reverse,
            Some(resolved) => self.check.is_satisfied_by(resolved) != self.reverse,
        }
    }
}

impl From<PermissionCheck> for Requirement {
    fn from(check: PermissionCheck) -> Self {
        Requirement::new(check)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reverse {
            write!(f, "not {}", self.check)
        } else {
            fmt::Display::fmt(&self.check, f)
        }
    }
}
