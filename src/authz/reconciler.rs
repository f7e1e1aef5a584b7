//! Toggle reconciler.
//!
//! Turns "flip permission X for principal P" into the grant/revoke calls that
//! keep a module's wildcard code and its granular codes mutually exclusive
//! for every principal. Calls are issued one at a time, each awaited before
//! the next, and the view is re-read from the store afterwards.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

use super::catalog::PermissionCatalog;
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{EffectivePermissionView, GrantSet, Permission, PrincipalRef};

/// Backend operations the reconciler relies on.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn principal_exists(&self, principal: PrincipalRef) -> AppResult<bool>;

    /// Idempotent: granting an existing assignment is a no-op.
    async fn grant(&self, principal: PrincipalRef, permission_code: &str) -> AppResult<()>;

    /// Idempotent: revoking a missing assignment is a no-op.
    async fn revoke(&self, principal: PrincipalRef, permission_code: &str) -> AppResult<()>;

    /// Current grants of the principal, including role-inherited codes for a user.
    async fn load_grants(&self, principal: PrincipalRef) -> AppResult<GrantSet>;

    /// Atomically replaces the principal's assignments among `module_codes`
    /// with `codes`. Returns the revokes and grants that took effect, computed
    /// against the state seen inside the same unit of work.
    async fn replace_module(
        &self,
        principal: PrincipalRef,
        module_codes: &[String],
        codes: &[String],
    ) -> AppResult<Vec<AssignmentOp>>;
}

#[async_trait]
impl<S: AssignmentStore + ?Sized> AssignmentStore for Arc<S> {
    async fn principal_exists(&self, principal: PrincipalRef) -> AppResult<bool> {
        (**self).principal_exists(principal).await
    }

    async fn grant(&self, principal: PrincipalRef, permission_code: &str) -> AppResult<()> {
        (**self).grant(principal, permission_code).await
    }

    async fn revoke(&self, principal: PrincipalRef, permission_code: &str) -> AppResult<()> {
        (**self).revoke(principal, permission_code).await
    }

    async fn load_grants(&self, principal: PrincipalRef) -> AppResult<GrantSet> {
        (**self).load_grants(principal).await
    }

    async fn replace_module(
        &self,
        principal: PrincipalRef,
        module_codes: &[String],
        codes: &[String],
    ) -> AppResult<Vec<AssignmentOp>> {
        (**self).replace_module(principal, module_codes, codes).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Grant,
    Revoke,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AssignmentOp {
    pub op: OpKind,
    pub permission_code: String,
}

impl AssignmentOp {
    pub fn grant(code: impl Into<String>) -> Self {
        Self { op: OpKind::Grant, permission_code: code.into() }
    }

    pub fn revoke(code: impl Into<String>) -> Self {
        Self { op: OpKind::Revoke, permission_code: code.into() }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ToggleOutcome {
    pub principal: PrincipalRef,
    pub permission_code: String,
    /// Calls issued against the store, in order.
    pub operations: Vec<AssignmentOp>,
    /// View re-read after the last call.
    pub view: EffectivePermissionView,
}

/// Result of replacing a principal's selection inside one module.
#[derive(Debug, Clone)]
pub struct ModuleOutcome {
    pub principal: PrincipalRef,
    pub module: String,
    pub operations: Vec<AssignmentOp>,
    pub view: EffectivePermissionView,
}

#[derive(thiserror::Error, Debug)]
pub enum ToggleError {
    #[error("select a role or user before changing permissions")]
    NoPrincipal,
    #[error("{0} does not exist")]
    UnknownPrincipal(PrincipalRef),
    #[error("unknown permission code {0}")]
    UnknownPermission(String),
    #[error("{code} is locked while {all_code} is granted")]
    Locked { code: String, all_code: String },
    #[error("a permission change for {0} is already in progress")]
    Busy(PrincipalRef),
    #[error(transparent)]
    Invalid(AppError),
    #[error("permission update failed")]
    Failed {
        applied: Vec<AssignmentOp>,
        #[source]
        source: AppError,
    },
}

impl ToggleError {
    fn failed(applied: &[AssignmentOp], source: AppError) -> Self {
        ToggleError::Failed { applied: applied.to_vec(), source }
    }
}

impl From<ToggleError> for AppError {
    fn from(err: ToggleError) -> Self {
        match err {
            ToggleError::NoPrincipal => AppError::bad_request(err.to_string()),
            ToggleError::UnknownPrincipal(_) | ToggleError::UnknownPermission(_) => {
                AppError::not_found(err.to_string())
            }
            ToggleError::Locked { .. } | ToggleError::Busy(_) => AppError::conflict(err.to_string()),
            ToggleError::Invalid(inner) => inner,
            ToggleError::Failed { ref applied, ref source } => {
                tracing::error!(
                    error = %source,
                    applied = applied.len(),
                    "permission toggle aborted"
                );
                AppError::internal("permission update failed, reload and try again")
            }
        }
    }
}

/// Computes the calls that toggle `permission` given the principal's own
/// assignments.
///
/// Revokes always come before the grant so an interrupted sequence can leave
/// neither code granted, never both.
pub fn plan_toggle(
    catalog: &PermissionCatalog,
    permission: &Permission,
    assigned: &BTreeSet<String>,
) -> Vec<AssignmentOp> {
    if assigned.contains(&permission.code) {
        return vec![AssignmentOp::revoke(&permission.code)];
    }

    let mut ops = Vec::new();
    if permission.action.is_all() {
        ops.extend(
            catalog
                .module_codes(&permission.module)
                .filter(|p| !p.action.is_all() && assigned.contains(&p.code))
                .map(|p| AssignmentOp::revoke(&p.code)),
        );
    } else if let Some(all_code) = catalog.all_code_for(&permission.module) {
        if assigned.contains(all_code) {
            ops.push(AssignmentOp::revoke(all_code));
        }
    }
    ops.push(AssignmentOp::grant(&permission.code));
    ops
}

pub struct ToggleReconciler<S> {
    store: S,
    catalog: Arc<PermissionCatalog>,
    in_flight: Mutex<HashSet<PrincipalRef>>,
}

/// Releases the principal's processing flag on every exit path.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<PrincipalRef>>,
    principal: PrincipalRef,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.principal);
    }
}

impl<S: AssignmentStore> ToggleReconciler<S> {
    pub fn new(store: S, catalog: Arc<PermissionCatalog>) -> Self {
        Self {
            store,
            catalog,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    fn begin(&self, principal: PrincipalRef) -> Result<InFlight<'_>, ToggleError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(principal) {
            return Err(ToggleError::Busy(principal));
        }
        Ok(InFlight { set: &self.in_flight, principal })
    }

    pub async fn view(&self, principal: PrincipalRef) -> AppResult<EffectivePermissionView> {
        if !self.store.principal_exists(principal).await? {
            return Err(ToggleError::UnknownPrincipal(principal).into());
        }
        let grants = self.store.load_grants(principal).await?;
        Ok(self.catalog.view_for(principal, &grants))
    }

    pub async fn toggle(
        &self,
        principal: Option<PrincipalRef>,
        permission_code: &str,
    ) -> Result<ToggleOutcome, ToggleError> {
        let principal = principal.ok_or(ToggleError::NoPrincipal)?;
        let permission = self
            .catalog
            .get(permission_code)
            .ok_or_else(|| ToggleError::UnknownPermission(permission_code.to_string()))?;

        let _flag = self.begin(principal)?;

        let exists = self
            .store
            .principal_exists(principal)
            .await
            .map_err(|e| ToggleError::failed(&[], e))?;
        if !exists {
            return Err(ToggleError::UnknownPrincipal(principal));
        }

        let grants = self
            .store
            .load_grants(principal)
            .await
            .map_err(|e| ToggleError::failed(&[], e))?;

        if self.catalog.is_locked(&permission.code, &grants) {
            let all_code = self
                .catalog
                .all_code_for(&permission.module)
                .unwrap_or_default()
                .to_string();
            tracing::info!(
                principal = %principal,
                permission = %permission.code,
                wildcard = %all_code,
                "toggle rejected, module wildcard granted"
            );
            return Err(ToggleError::Locked { code: permission.code.clone(), all_code });
        }

        let plan = plan_toggle(&self.catalog, permission, &grants.assigned);
        let mut applied = Vec::with_capacity(plan.len());
        for op in plan {
            let result = match op.op {
                OpKind::Grant => self.store.grant(principal, &op.permission_code).await,
                OpKind::Revoke => self.store.revoke(principal, &op.permission_code).await,
            };
            if let Err(source) = result {
                tracing::warn!(
                    principal = %principal,
                    permission = %op.permission_code,
                    op = ?op.op,
                    applied = applied.len(),
                    "assignment call failed, aborting toggle"
                );
                return Err(ToggleError::failed(&applied, source));
            }
            tracing::info!(
                principal = %principal,
                permission = %op.permission_code,
                op = ?op.op,
                "assignment updated"
            );
            applied.push(op);
        }

        let refreshed = self
            .store
            .load_grants(principal)
            .await
            .map_err(|e| ToggleError::failed(&applied, e))?;

        Ok(ToggleOutcome {
            principal,
            permission_code: permission.code.clone(),
            operations: applied,
            view: self.catalog.view_for(principal, &refreshed),
        })
    }

    /// Replaces the principal's whole selection inside `module` in one unit of
    /// work. Shares the processing flag with `toggle`, so the two never
    /// interleave for the same principal.
    ///
    /// A role-inherited wildcard locks granular codes the user does not hold
    /// yet. The principal's own wildcard does not: the selection replaces it.
    pub async fn set_module(
        &self,
        principal: PrincipalRef,
        module: &str,
        codes: &[String],
    ) -> Result<ModuleOutcome, ToggleError> {
        self.catalog
            .validate_module_selection(module, codes)
            .map_err(ToggleError::Invalid)?;
        let codes: Vec<String> = codes.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();

        let _flag = self.begin(principal)?;

        let exists = self
            .store
            .principal_exists(principal)
            .await
            .map_err(|e| ToggleError::failed(&[], e))?;
        if !exists {
            return Err(ToggleError::UnknownPrincipal(principal));
        }

        let grants = self
            .store
            .load_grants(principal)
            .await
            .map_err(|e| ToggleError::failed(&[], e))?;

        let all_code = self.catalog.all_code_for(module).unwrap_or_default().to_string();
        if grants.inherited.contains(&all_code) {
            if let Some(code) = codes
                .iter()
                .find(|code| **code != all_code && !grants.assigned.contains(*code))
            {
                tracing::info!(
                    principal = %principal,
                    permission = %code,
                    wildcard = %all_code,
                    "module update rejected, wildcard inherited from role"
                );
                return Err(ToggleError::Locked { code: code.clone(), all_code });
            }
        }

        let module_codes: Vec<String> =
            self.catalog.module_codes(module).map(|p| p.code.clone()).collect();
        let operations = self
            .store
            .replace_module(principal, &module_codes, &codes)
            .await
            .map_err(|e| ToggleError::failed(&[], e))?;

        tracing::info!(
            principal = %principal,
            module = %module,
            changes = operations.len(),
            "module permissions replaced"
        );

        let refreshed = self
            .store
            .load_grants(principal)
            .await
            .map_err(|e| ToggleError::failed(&operations, e))?;

        Ok(ModuleOutcome {
            principal,
            module: module.to_string(),
            operations,
            view: self.catalog.view_for(principal, &refreshed),
        })
    }
}
