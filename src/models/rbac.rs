use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "warehouse_keeper")]
    pub name: String,
    #[schema(example = "Receives and dispatches vaccine lots")]
    pub description: Option<String>,
}

// =============================================================================
// PERMISSION CATALOG
// =============================================================================

/// Action a permission grants inside its module. `All` is the module wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionAction {
    View,
    Read,
    Create,
    Update,
    Delete,
    All,
}

impl PermissionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionAction::View => "VIEW",
            PermissionAction::Read => "READ",
            PermissionAction::Create => "CREATE",
            PermissionAction::Update => "UPDATE",
            PermissionAction::Delete => "DELETE",
            PermissionAction::All => "ALL",
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PermissionAction::All)
    }
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIEW" => Ok(PermissionAction::View),
            "READ" => Ok(PermissionAction::Read),
            "CREATE" => Ok(PermissionAction::Create),
            "UPDATE" => Ok(PermissionAction::Update),
            "DELETE" => Ok(PermissionAction::Delete),
            "ALL" => Ok(PermissionAction::All),
            other => Err(format!("unknown permission action: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    #[schema(example = "VACCINE_VIEW")]
    pub code: String,
    #[schema(example = "VACCINE")]
    pub module: String,
    pub action: PermissionAction,
    #[schema(example = "Vaccines: view")]
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Catalog entries of one module, as shown on the assignment screen.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PermissionModule {
    pub module: String,
    pub all_code: String,
    pub permissions: Vec<Permission>,
}

// =============================================================================
// PRINCIPALS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Role,
    User,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::Role => "role",
            PrincipalKind::User => "user",
        }
    }
}

/// Subject of a permission grant: a role, or a user directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PrincipalRef {
    pub kind: PrincipalKind,
    pub id: Uuid,
}

impl PrincipalRef {
    pub fn role(id: Uuid) -> Self {
        Self { kind: PrincipalKind::Role, id }
    }

    pub fn user(id: Uuid) -> Self {
        Self { kind: PrincipalKind::User, id }
    }
}

impl fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

// =============================================================================
// ASSIGNMENTS
// =============================================================================

/// A grant record. Existence means granted; there is no "denied" state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Assignment {
    pub principal: PrincipalRef,
    pub permission_code: String,
    pub created_at: DateTime<Utc>,
}

impl Loggable for Assignment {
    fn entity_type() -> &'static str { "permission_assignment" }
    fn subject_id(&self) -> Uuid { self.principal.id }
    fn severity(&self) -> Severity { Severity::Critical }

    fn severity_for_action(&self, _action: &str) -> Severity {
        Severity::Critical
    }
}

/// Raw grants of a principal as read from the assignment store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSet {
    /// Assignments recorded on the principal itself (a user's direct grants).
    pub assigned: BTreeSet<String>,
    /// Codes a user receives through its role. Always empty for a role.
    pub inherited: BTreeSet<String>,
    pub role_id: Option<Uuid>,
}

impl GrantSet {
    pub fn is_granted(&self, code: &str) -> bool {
        self.assigned.contains(code) || self.inherited.contains(code)
    }

    pub fn granted(&self) -> BTreeSet<String> {
        self.assigned.union(&self.inherited).cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PermissionSource {
    Role,
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EffectivePermission {
    pub code: String,
    pub module: String,
    pub action: PermissionAction,
    pub display_name: String,
    pub granted: bool,
    /// Granted by an assignment on this principal (the only grants a toggle touches).
    pub assigned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PermissionSource>,
    /// Toggle is disabled because the module wildcard is granted.
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EffectivePermissionView {
    pub principal: PrincipalRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<Uuid>,
    pub permissions: Vec<EffectivePermission>,
}

impl EffectivePermissionView {
    pub fn entry(&self, code: &str) -> Option<&EffectivePermission> {
        self.permissions.iter().find(|p| p.code == code)
    }

    pub fn is_granted(&self, code: &str) -> bool {
        self.entry(code).map(|p| p.granted).unwrap_or(false)
    }

    pub fn is_locked(&self, code: &str) -> bool {
        self.entry(code).map(|p| p.locked).unwrap_or(false)
    }

    pub fn assigned_codes(&self) -> BTreeSet<String> {
        self.permissions
            .iter()
            .filter(|p| p.assigned)
            .map(|p| p.code.clone())
            .collect()
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct TogglePermissionRequest {
    /// Role or user whose grant is toggled. Missing means nothing was selected.
    #[serde(default)]
    pub principal: Option<PrincipalRef>,
    #[schema(example = "VACCINE_VIEW")]
    pub permission_code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetModulePermissionsRequest {
    pub principal: PrincipalRef,
    /// Full set of codes the principal should hold in the module afterwards.
    #[schema(example = json!(["VACCINE_VIEW", "VACCINE_UPDATE"]))]
    pub codes: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetUserRoleRequest {
    /// `null` removes the user's role.
    pub role_id: Option<Uuid>,
}

// =============================================================================
// ACTIVITY
// =============================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub event_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub severity: String,
}
