//! Permission catalog records and resolved key sets.

use crate::error::{Error, Result};
use std::collections::HashSet;
use uuid::Uuid;

/// Kind of capability a permission node describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "persistence", serde(rename_all = "UPPERCASE"))]
pub enum PermissionType {
    /// A navigation menu entry.
    Menu,
    /// A routable page.
    Page,
    /// An API endpoint.
    Api,
    /// A fine-grained action inside a page (button, field).
    Action,
}

impl PermissionType {
    /// Whether nodes of this type belong in a menu tree.
    pub fn is_menu_like(&self) -> bool {
        matches!(self, PermissionType::Menu | PermissionType::Page)
    }
}

impl std::fmt::Display for PermissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PermissionType::Menu => "MENU",
            PermissionType::Page => "PAGE",
            PermissionType::Api => "API",
            PermissionType::Action => "ACTION",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for PermissionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MENU" => Ok(PermissionType::Menu),
            "PAGE" => Ok(PermissionType::Page),
            "API" => Ok(PermissionType::Api),
            "ACTION" => Ok(PermissionType::Action),
            other => Err(Error::InvalidReference(format!(
                "unknown permission type '{other}'"
            ))),
        }
    }
}

/// A single entry of the permission catalog.
///
/// `key` is globally unique and dot-namespaced (`user.list`). `parent_id` is a
/// weak reference: it may point at a node that no longer exists, and the tree
/// builder tolerates that.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct PermissionNode {
    id: String,
    key: String,
    name: String,
    #[cfg_attr(feature = "persistence", serde(rename = "type"))]
    permission_type: PermissionType,
    #[cfg_attr(feature = "persistence", serde(default))]
    parent_id: Option<String>,
    #[cfg_attr(feature = "persistence", serde(default))]
    path: Option<String>,
    #[cfg_attr(feature = "persistence", serde(default))]
    method: Option<String>,
    #[cfg_attr(feature = "persistence", serde(default))]
    order: i32,
    #[cfg_attr(feature = "persistence", serde(default = "enabled_by_default"))]
    enabled: bool,
}

#[cfg(feature = "persistence")]
fn enabled_by_default() -> bool {
    true
}

impl PermissionNode {
    /// Create a new enabled root permission with a generated ID.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        permission_type: PermissionType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: key.into(),
            name: name.into(),
            permission_type,
            parent_id: None,
            path: None,
            method: None,
            order: 0,
            enabled: true,
        }
    }

    /// Create a new permission with a specific ID.
    pub fn with_id(
        id: impl Into<String>,
        key: impl Into<String>,
        name: impl Into<String>,
        permission_type: PermissionType,
    ) -> Self {
        let mut node = Self::new(key, name, permission_type);
        node.id = id.into();
        node
    }

    /// Set the parent permission ID.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the route path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the HTTP method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set the sort order among siblings.
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Mark the permission as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permission_type(&self) -> PermissionType {
        self.permission_type
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_permission_type(&mut self, permission_type: PermissionType) {
        self.permission_type = permission_type;
    }

    pub fn set_parent_id(&mut self, parent_id: Option<String>) {
        self.parent_id = parent_id;
    }

    pub fn set_path(&mut self, path: Option<String>) {
        self.path = path;
    }

    pub fn set_method(&mut self, method: Option<String>) {
        self.method = method;
    }

    pub fn set_order(&mut self, order: i32) {
        self.order = order;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// The resolved set of permission keys for a principal.
///
/// `All` is the superadmin wildcard: it contains every key, including keys
/// that are not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "persistence", serde(rename_all = "snake_case"))]
pub enum PermissionKeys {
    /// Every permission is granted.
    All,
    /// Exactly these keys are granted.
    Set(HashSet<String>),
}

impl PermissionKeys {
    /// An empty key set.
    pub fn empty() -> Self {
        PermissionKeys::Set(HashSet::new())
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, PermissionKeys::All)
    }

    /// Set membership test.
    pub fn contains(&self, key: &str) -> bool {
        match self {
            PermissionKeys::All => true,
            PermissionKeys::Set(keys) => keys.contains(key),
        }
    }

    /// Number of explicit keys; `None` for the wildcard.
    pub fn len(&self) -> Option<usize> {
        match self {
            PermissionKeys::All => None,
            PermissionKeys::Set(keys) => Some(keys.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PermissionKeys::Set(keys) if keys.is_empty())
    }

    /// Explicit keys, sorted. Empty for the wildcard.
    pub fn sorted(&self) -> Vec<&str> {
        match self {
            PermissionKeys::All => Vec::new(),
            PermissionKeys::Set(keys) => {
                let mut sorted: Vec<&str> = keys.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                sorted
            }
        }
    }
}

impl FromIterator<String> for PermissionKeys {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        PermissionKeys::Set(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_node_builder() {
        let node = PermissionNode::with_id("p1", "user.list", "User list", PermissionType::Page)
            .with_parent("m1")
            .with_path("/users")
            .with_method("GET")
            .with_order(3);

        assert_eq!(node.id(), "p1");
        assert_eq!(node.key(), "user.list");
        assert_eq!(node.parent_id(), Some("m1"));
        assert_eq!(node.path(), Some("/users"));
        assert_eq!(node.method(), Some("GET"));
        assert_eq!(node.order(), 3);
        assert!(node.is_enabled());
        assert!(!node.disabled().is_enabled());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = PermissionNode::new("a", "A", PermissionType::Menu);
        let b = PermissionNode::new("b", "B", PermissionType::Menu);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_permission_type_parsing() {
        assert_eq!("menu".parse::<PermissionType>().unwrap(), PermissionType::Menu);
        assert_eq!("ACTION".parse::<PermissionType>().unwrap(), PermissionType::Action);
        assert!("widget".parse::<PermissionType>().is_err());
        assert_eq!(PermissionType::Api.to_string(), "API");
        assert!(PermissionType::Page.is_menu_like());
        assert!(!PermissionType::Api.is_menu_like());
    }

    #[test]
    fn test_wildcard_keys_contain_everything() {
        let all = PermissionKeys::All;
        assert!(all.contains("user.list"));
        assert!(all.contains("not.in.catalog"));
        assert_eq!(all.len(), None);
        assert!(!all.is_empty());
    }

    #[test]
    fn test_explicit_keys() {
        let keys: PermissionKeys = vec!["user.list".to_string(), "user.create".to_string()]
            .into_iter()
            .collect();
        assert!(keys.contains("user.list"));
        assert!(!keys.contains("user.delete"));
        assert_eq!(keys.sorted(), vec!["user.create", "user.list"]);
        assert!(PermissionKeys::empty().is_empty());
    }
}
