//! Role definitions.

use crate::error::{Error, Result};
use uuid::Uuid;

/// A named bundle of permissions that can be assigned to principals.
///
/// Permission associations are held by the storage backend, not by the role
/// itself, so that assignment can be replaced atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct Role {
    /// Unique identifier for the role.
    id: String,
    /// Unique human-readable name.
    name: String,
    /// Unique stable external identifier (e.g. `admin`).
    code: String,
    /// Optional description of the role.
    #[cfg_attr(feature = "persistence", serde(default))]
    description: Option<String>,
    /// Whether this role is enabled.
    #[cfg_attr(feature = "persistence", serde(default = "active_by_default"))]
    active: bool,
}

#[cfg(feature = "persistence")]
fn active_by_default() -> bool {
    true
}

impl Role {
    /// Create a new enabled role with a generated ID.
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            code: code.into(),
            description: None,
            active: true,
        }
    }

    /// Create a new role with a specific ID.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, code: impl Into<String>) -> Self {
        let mut role = Self::new(name, code);
        role.id = id.into();
        role
    }

    /// Get the role's unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the role's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the role's code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Set the role's description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Get the role's description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Rename the role.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Replace the description.
    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }

    /// Set whether this role is active.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Check if this role is active.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Deactivate this role.
    pub fn deactivate(mut self) -> Self {
        self.active = false;
        self
    }

    /// The projection carried by a resolved permission set.
    pub fn summary(&self) -> RoleSummary {
        RoleSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            code: self.code.clone(),
        }
    }
}

/// Role projection stored in a resolved permission set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct RoleSummary {
    pub id: String,
    pub name: String,
    pub code: String,
}

/// Builder for creating roles with a fluent API.
#[derive(Debug, Default)]
pub struct RoleBuilder {
    id: Option<String>,
    name: Option<String>,
    code: Option<String>,
    description: Option<String>,
    active: bool,
}

impl RoleBuilder {
    /// Create a new role builder.
    pub fn new() -> Self {
        Self {
            active: true,
            ..Default::default()
        }
    }

    /// Use a specific ID instead of a generated one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the role name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the role code.
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the role description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set whether the role is active.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Build the role.
    pub fn build(self) -> Result<Role> {
        let name = self
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfiguration("Role name is required".to_string()))?;
        let code = self
            .code
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfiguration("Role code is required".to_string()))?;

        let mut role = match self.id {
            Some(id) => Role::with_id(id, name, code),
            None => Role::new(name, code),
        };
        role.description = self.description;
        role.set_active(self.active);

        Ok(role)
    }
}
