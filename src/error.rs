//! Error types for the permission engine.

use thiserror::Error;

/// The main error type for permission engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Principal with the given ID was not found.
    #[error("Principal '{0}' not found")]
    PrincipalNotFound(String),

    /// Role with the given ID was not found.
    #[error("Role '{0}' not found")]
    RoleNotFound(String),

    /// Permission with the given ID was not found.
    #[error("Permission '{0}' not found")]
    PermissionNotFound(String),

    /// An assignment named an ID that does not resolve to an existing, enabled record.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Setting this parent would make a permission its own ancestor.
    #[error("Permission '{permission_id}' cannot take its descendant '{parent_id}' as parent")]
    CircularAssignment {
        /// The permission being re-parented.
        permission_id: String,
        /// The proposed parent.
        parent_id: String,
    },

    /// A unique field (permission key, role name, role code) is already taken.
    #[error("Duplicate {field}: '{value}'")]
    DuplicateKey {
        /// Which field collided.
        field: &'static str,
        /// The colliding value.
        value: String,
    },

    /// Role is still assigned to at least one principal.
    #[error("Role '{0}' is assigned to principals and cannot be deleted")]
    RoleInUse(String),

    /// Permission is still granted by at least one role.
    #[error("Permission '{0}' is granted by roles and cannot be deleted")]
    PermissionInUse(String),

    /// Permission still has child permissions.
    #[error("Permission '{0}' has child permissions and cannot be deleted")]
    PermissionHasChildren(String),

    /// No principal, or a principal that no longer exists, made the request.
    #[error("Authentication required")]
    Unauthenticated,

    /// The principal is known but lacks the required permission or role.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Storage operation failed.
    #[error("Storage operation failed: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A UI capability binding could not be interpreted.
    #[error("Invalid capability binding: {0}")]
    InvalidBinding(String),

    /// Serialization error.
    #[cfg(feature = "persistence")]
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for errors that a gate should render as an authentication failure.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Error::Unauthenticated | Error::PrincipalNotFound(_))
    }

    /// True for errors that a gate should render as an authorization denial.
    pub fn is_authorization_failure(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
    }
}

/// Result type alias for permission engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_and_authorization_failures_are_distinct() {
        assert!(Error::Unauthenticated.is_authentication_failure());
        assert!(!Error::Unauthenticated.is_authorization_failure());

        let denied = Error::PermissionDenied("user.delete".to_string());
        assert!(denied.is_authorization_failure());
        assert!(!denied.is_authentication_failure());
    }

    #[test]
    fn test_circular_assignment_message() {
        let err = Error::CircularAssignment {
            permission_id: "a".to_string(),
            parent_id: "c".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Permission 'a' cannot take its descendant 'c' as parent"
        );
    }
}
