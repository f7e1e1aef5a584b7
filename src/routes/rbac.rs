//! RBAC Admin API Routes
//!
//! Endpoints for the permission catalog, roles, user role assignment and the
//! permission toggle. Every grant and revoke is logged to the activity log
//! with Critical severity.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{permissions, AssignmentOp, OpKind, ToggleError, ToggleOutcome};
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::rbac::*;
use crate::models::user::User;
use crate::routes::auth::fetch_user_by_id;

const DEFAULT_ACTIVITY_LIMIT: i64 = 50;
const MAX_ACTIVITY_LIMIT: i64 = 500;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // Catalog
        .route("/permissions", get(list_permissions))
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).delete(delete_role))
        .route("/roles/:role_id/permissions", get(get_role_permissions))
        // Users
        .route("/users", get(list_users))
        .route("/users/:user_id/role", put(set_user_role))
        .route("/users/:user_id/permissions", get(get_user_permissions))
        // Assignment changes
        .route("/toggle", post(toggle_permission))
        .route("/modules/:module", put(set_module_permissions))
        // Audit
        .route("/activity", get(list_activity))
}

fn update_permission_for(principal: &PrincipalRef) -> &'static str {
    match principal.kind {
        PrincipalKind::Role => permissions::ROLE_UPDATE,
        PrincipalKind::User => permissions::USER_UPDATE,
    }
}

fn log_assignment_ops(
    state: &AppState,
    auth: &AuthUser,
    headers: &HeaderMap,
    principal: PrincipalRef,
    ops: &[AssignmentOp],
) {
    let now = Utc::now();
    for op in ops {
        let assignment = Assignment {
            principal,
            permission_code: op.permission_code.clone(),
            created_at: now,
        };
        let action = match op.op {
            OpKind::Grant => "granted",
            OpKind::Revoke => "revoked",
        };
        log_activity_with_context(
            &state.event_bus,
            action,
            Some(auth.user_id),
            &assignment,
            None,
            Some(RequestContext::from_headers(headers)),
        );
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// List the permission catalog grouped by module
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses(
        (status = 200, description = "Permission modules", body = Vec<PermissionModule>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<PermissionModule>>> {
    state.authorize(&auth, permissions::ROLE_VIEW).await?;
    Ok(Json(state.catalog.modules()))
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

/// List all roles
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Role>>> {
    state.authorize(&auth, permissions::ROLE_VIEW).await?;

    let rows = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM roles ORDER BY name"
    )
    .fetch_all(&state.pool)
    .await?;

    let roles = rows
        .iter()
        .map(row_parsers::role_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(roles))
}

/// Create a new role
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Role name missing"),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    state.authorize(&auth, permissions::ROLE_CREATE).await?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("role name is required"));
    }

    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE name = ?")
        .bind(&name)
        .fetch_one(&state.pool)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict(format!("role {name} already exists")));
    }

    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)"
    )
    .bind(id.to_string())
    .bind(&name)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let role = Role {
        id,
        name,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    log_activity_with_context(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(role)))
}

async fn fetch_role(state: &AppState, role_id: Uuid) -> AppResult<Role> {
    let row = sqlx::query(
        "SELECT id, name, description, created_at, updated_at FROM roles WHERE id = ?"
    )
    .bind(role_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Role not found"))?;

    row_parsers::role_from_row(&row)
}

/// Get a role by ID
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Role>> {
    state.authorize(&auth, permissions::ROLE_VIEW).await?;
    Ok(Json(fetch_role(&state, role_id).await?))
}

/// Delete a role. Its grants go with it and its users are left without a role.
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.authorize(&auth, permissions::ROLE_DELETE).await?;

    let role = fetch_role(&state, role_id).await?;

    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Get the permission view of a role
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "One entry per catalog code", body = EffectivePermissionView),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissionView>> {
    state.authorize(&auth, permissions::ROLE_VIEW).await?;
    Ok(Json(state.reconciler.view(PrincipalRef::role(role_id)).await?))
}

// =============================================================================
// USER ENDPOINTS
// =============================================================================

/// List staff accounts
#[utoipa::path(
    get,
    path = "/rbac/users",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of users", body = Vec<User>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<User>>> {
    state.authorize(&auth, permissions::USER_VIEW).await?;

    let rows = sqlx::query(
        "SELECT id, name, email, password_hash, role_id, created_at, updated_at, deleted_at FROM users WHERE deleted_at IS NULL ORDER BY name"
    )
    .fetch_all(&state.pool)
    .await?;

    let users = rows
        .iter()
        .map(|r| row_parsers::db_user_from_row(r).and_then(User::try_from))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(users))
}

/// Set or clear the role of a user
#[utoipa::path(
    put,
    path = "/rbac/users/{user_id}/role",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    request_body = SetUserRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = User),
        (status = 404, description = "User or role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn set_user_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(req): Json<SetUserRoleRequest>,
) -> AppResult<Json<User>> {
    state.authorize(&auth, permissions::USER_UPDATE).await?;

    let before: User = fetch_user_by_id(&state.pool, user_id).await?.try_into()?;
    if let Some(role_id) = req.role_id {
        fetch_role(&state, role_id).await?;
    }

    sqlx::query("UPDATE users SET role_id = ?, updated_at = ? WHERE id = ?")
        .bind(req.role_id.map(|id| id.to_string()))
        .bind(Utc::now())
        .bind(user_id.to_string())
        .execute(&state.pool)
        .await?;

    let user: User = fetch_user_by_id(&state.pool, user_id).await?.try_into()?;

    log_activity_with_context(
        &state.event_bus,
        "role_changed",
        Some(auth.user_id),
        &user,
        Some(&before),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(user))
}

/// Get the effective permissions of a user (direct and role-inherited)
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/permissions",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "One entry per catalog code", body = EffectivePermissionView),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissionView>> {
    state.authorize(&auth, permissions::USER_VIEW).await?;
    Ok(Json(state.reconciler.view(PrincipalRef::user(user_id)).await?))
}

// =============================================================================
// ASSIGNMENT CHANGES
// =============================================================================

/// Toggle one permission for a role or user
///
/// Turning a module's wildcard on revokes the principal's granular codes in
/// that module first. Granular codes cannot be toggled while the wildcard is
/// granted.
#[utoipa::path(
    post,
    path = "/rbac/toggle",
    tag = "RBAC",
    request_body = TogglePermissionRequest,
    responses(
        (status = 200, description = "Toggle applied, refreshed view returned", body = ToggleOutcome),
        (status = 400, description = "No role or user selected"),
        (status = 404, description = "Unknown principal or permission"),
        (status = 409, description = "Locked by the module wildcard, or another change in progress"),
        (status = 500, description = "A grant or revoke call failed; reload and retry"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn toggle_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(req): Json<TogglePermissionRequest>,
) -> AppResult<Json<ToggleOutcome>> {
    let principal = req.principal.ok_or(ToggleError::NoPrincipal)?;
    state.authorize(&auth, update_permission_for(&principal)).await?;

    match state.reconciler.toggle(Some(principal), &req.permission_code).await {
        Ok(outcome) => {
            log_assignment_ops(&state, &auth, &headers, principal, &outcome.operations);
            Ok(Json(outcome))
        }
        Err(err) => {
            if let ToggleError::Failed { applied, .. } = &err {
                log_assignment_ops(&state, &auth, &headers, principal, applied);
            }
            Err(err.into())
        }
    }
}

/// Replace a principal's permissions inside one module atomically
#[utoipa::path(
    put,
    path = "/rbac/modules/{module}",
    tag = "RBAC",
    params(
        ("module" = String, Path, description = "Permission module, e.g. VACCINE"),
    ),
    request_body = SetModulePermissionsRequest,
    responses(
        (status = 200, description = "Module replaced, refreshed view returned", body = EffectivePermissionView),
        (status = 400, description = "Wildcard mixed with granular codes, or code outside the module"),
        (status = 404, description = "Unknown module, code or principal"),
        (status = 409, description = "Code locked by a role-inherited wildcard, or another change in progress"),
        (status = 500, description = "Transaction failed; nothing was changed"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn set_module_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(module): Path<String>,
    Json(req): Json<SetModulePermissionsRequest>,
) -> AppResult<Json<EffectivePermissionView>> {
    let principal = req.principal;
    state.authorize(&auth, update_permission_for(&principal)).await?;

    let outcome = state.reconciler.set_module(principal, &module, &req.codes).await?;
    log_assignment_ops(&state, &auth, &headers, principal, &outcome.operations);

    Ok(Json(outcome.view))
}

// =============================================================================
// ACTIVITY
// =============================================================================

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActivityQuery {
    /// Maximum entries to return (default 50, max 500)
    pub limit: Option<i64>,
}

/// Recent activity, newest first
#[utoipa::path(
    get,
    path = "/rbac/activity",
    tag = "RBAC",
    params(ActivityQuery),
    responses(
        (status = 200, description = "Activity entries", body = Vec<ActivityEntry>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Json<Vec<ActivityEntry>>> {
    state.authorize(&auth, permissions::ROLE_VIEW).await?;

    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT).clamp(1, MAX_ACTIVITY_LIMIT);
    let rows = sqlx::query(
        r#"
        SELECT id, event_name, description, actor_id, subject_id, occurred_at, severity
        FROM activity_log
        ORDER BY occurred_at DESC
        LIMIT ?
        "#
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    let entries = rows
        .iter()
        .map(row_parsers::activity_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(entries))
}
