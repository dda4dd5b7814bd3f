//! # Admin RBAC
//!
//! Permission resolution for an admin back office: principals hold roles,
//! roles grant permissions, and permissions form a catalog tree of menus,
//! pages, API endpoints and in-page actions.
//!
//! ## Features
//!
//! - Permission catalog trees that tolerate dangling parents and cycles
//! - Resolution of a principal's effective roles and permission keys,
//!   completed with the enabled ancestors of every granted permission
//! - Superadmin principals that pass every check
//! - Namespaced TTL caching with explicit invalidation on every mutation
//! - Membership predicates with a strict "empty input is never satisfied" policy
//! - An authorization gate that keeps authentication and authorization
//!   failures apart, and a capability gate for client-held snapshots
//! - Catalog, role and assignment mutations with eager reference checks
//! - Thread-safe implementation, with an optional tokio wrapper
//!
//! ## Quick Start
//!
//! ```rust
//! use admin_rbac::{PermissionEngine, PermissionNode, PermissionType, Principal, Role};
//!
//! let engine = PermissionEngine::new();
//!
//! // Build a small catalog
//! engine.create_permission(PermissionNode::with_id("sys", "system", "System", PermissionType::Menu))?;
//! engine.create_permission(
//!     PermissionNode::with_id("users", "user.list", "Users", PermissionType::Page).with_parent("sys"),
//! )?;
//!
//! // Grant it through a role
//! engine.create_role(Role::with_id("r-admin", "Admin", "admin"))?;
//! engine.assign_permissions_to_role("r-admin", &["users".to_string()])?;
//!
//! engine.register_principal(Principal::admin("alice").with_id("u1"))?;
//! engine.assign_roles_to_principal("u1", &["r-admin".to_string()])?;
//!
//! // The menu ancestor comes along with the page
//! assert!(engine.has_permission("u1", "user.list")?);
//! assert!(engine.has_menu_permission("u1", "system")?);
//! assert!(!engine.has_permission("u1", "user.delete")?);
//! # Ok::<(), admin_rbac::Error>(())
//! ```
//!
//! ## Audit Logging
//!
//! When the `audit` feature is enabled, mutations and access decisions are
//! logged through the `log` facade. To enable logging:
//!
//! ```rust
//! use admin_rbac::init_audit_logger;
//!
//! // Initialize logging (must be called early in program execution)
//! init_audit_logger();
//!
//! // Configure log level through RUST_LOG environment variable:
//! // RUST_LOG=info,admin_rbac=debug
//! ```
//!
//! The following events are logged:
//! - Catalog, role and assignment changes (info)
//! - Orphaned or cyclic catalog entries and access denials (warn)
//! - Cache hits, invalidations and sweeps (debug)

#[cfg(feature = "audit")]
pub fn init_audit_logger() {
    let _ = env_logger::try_init();
}

pub mod cache;
pub mod capability;
pub mod check;
pub mod core;
pub mod error;
pub mod gate;
pub mod hierarchy;
pub mod metrics;
pub mod permission;
pub mod principal;
pub mod role;
pub mod storage;

#[cfg(feature = "persistence")]
pub mod seed;

#[cfg(feature = "async")]
pub mod async_support;


// Re-export main types for convenience
pub use crate::{
    cache::{CacheStats, CacheTtls, Generation, PermissionCache, TtlCache},
    capability::{CapabilityBinding, CapabilityGate, DisplayAction, ElementState},
    check::{MatchMode, PermissionCheck, Requirement},
    core::{
        EngineConfig, EngineConfigBuilder, PermissionEngine, PermissionUpdate, ResolvedPermissions,
        RoleUpdate,
    },
    error::{Error, Result},
    gate::{AccessDecision, Action, AuthorizationGate},
    hierarchy::{build_menu_tree, build_tree, PermissionTreeNode},
    metrics::{EngineMetrics, MetricsSnapshot},
    permission::{PermissionKeys, PermissionNode, PermissionType},
    principal::{Principal, PrincipalStatus, PrincipalType},
    role::{Role, RoleBuilder, RoleSummary},
    storage::{DataProvider, MemoryStorage, Storage},
};

#[cfg(feature = "persistence")]
pub use crate::seed::SeedDocument;

#[cfg(feature = "async")]
pub use crate::async_support::{AsyncAuthorizer, AsyncPermissionEngine};
