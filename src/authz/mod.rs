//! Authorization module - permission catalog, toggle reconciler and policy engine
//!
//! This module implements:
//! - The permission catalog (modules, granular codes, one wildcard per module)
//! - The toggle reconciler that keeps wildcard and granular grants exclusive
//! - Per-request sessions and the policy evaluator guarding admin endpoints
//! - Configurable enforcement modes (off/advisory/strict)

pub mod catalog;
mod evaluator;
pub mod reconciler;
mod session;

pub use catalog::PermissionCatalog;
pub use evaluator::{DefaultPolicyEvaluator, PolicyEvaluator};
pub use reconciler::{
    plan_toggle, AssignmentOp, AssignmentStore, ModuleOutcome, OpKind, ToggleError, ToggleOutcome,
    ToggleReconciler,
};
pub use session::Session;

/// Authorization enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzMode {
    /// No permission checks (development mode)
    Off,
    /// Log denials but allow requests (testing mode)
    Advisory,
    /// Enforce 403 on denied requests (production mode)
    Strict,
}

impl AuthzMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "advisory" => AuthzMode::Advisory,
            "strict" => AuthzMode::Strict,
            _ => AuthzMode::Off,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(&std::env::var("AUTHZ_MODE").unwrap_or_default())
    }
}

/// Permission codes guarding the admin endpoints
pub mod permissions {
    pub const ROLE_VIEW: &str = "ROLE_VIEW";
    pub const ROLE_CREATE: &str = "ROLE_CREATE";
    pub const ROLE_UPDATE: &str = "ROLE_UPDATE";
    pub const ROLE_DELETE: &str = "ROLE_DELETE";

    pub const USER_VIEW: &str = "USER_VIEW";
    pub const USER_UPDATE: &str = "USER_UPDATE";
}
