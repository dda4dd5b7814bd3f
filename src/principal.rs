//! Principals: the admin accounts whose access is evaluated.

use uuid::Uuid;

/// An authenticated admin account.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
pub struct Principal {
    /// Unique identifier for the principal.
    id: String,
    /// Unique login account.
    account: String,
    /// Regular admin or superadmin.
    #[cfg_attr(feature = "persistence", serde(rename = "type"))]
    principal_type: PrincipalType,
    /// Account status.
    #[cfg_attr(feature = "persistence", serde(default))]
    status: PrincipalStatus,
}

/// Types of principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "persistence", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum PrincipalType {
    /// Bypasses every permission and role check.
    SuperAdmin,
    /// Access is governed by assigned roles.
    Admin,
}

/// Account status of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "persistence", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "persistence", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum PrincipalStatus {
    #[default]
    Active,
    Inactive,
}

impl Principal {
    /// Create a new regular admin with a generated ID.
    pub fn admin(account: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account: account.into(),
            principal_type: PrincipalType::Admin,
            status: PrincipalStatus::Active,
        }
    }

    /// Create a new superadmin with a generated ID.
    pub fn super_admin(account: impl Into<String>) -> Self {
        Self {
            principal_type: PrincipalType::SuperAdmin,
            ..Self::admin(account)
        }
    }

    /// Replace the generated ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the account status.
    pub fn with_status(mut self, status: PrincipalStatus) -> Self {
        self.status = status;
        self
    }

    /// Get the principal's unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the login account.
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn principal_type(&self) -> PrincipalType {
        self.principal_type
    }

    pub fn status(&self) -> PrincipalStatus {
        self.status
    }

    /// Whether this principal bypasses RBAC entirely.
    pub fn is_super_admin(&self) -> bool {
        self.principal_type == PrincipalType::SuperAdmin
    }

    pub fn is_active(&self) -> bool {
        self.status == PrincipalStatus::Active
    }
}
