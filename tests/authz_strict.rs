use anyhow::Result;
use axum::http::StatusCode;
use uuid::Uuid;

use vax_admin::app::{router, AppState};
use vax_admin::authz::{AssignmentStore, AuthzMode};
use vax_admin::db::SqliteAssignmentStore;
use vax_admin::events::init_event_bus;
use vax_admin::jwt::JwtConfig;
use vax_admin::models::rbac::PrincipalRef;

mod common;

#[tokio::test]
async fn strict_mode_enforces_admin_permissions() -> Result<()> {
    let (_dir, pool) = common::migrated_pool().await?;
    let (bus, _rx) = init_event_bus();
    let state = AppState::new(pool.clone(), JwtConfig::new("strict-secret", 1), bus, AuthzMode::Strict).await?;
    let app = router(state);

    let (token, admin_id) = common::register(&app, "Admin", "admin@clinic.example").await?;
    let (_, clerk_id) = common::register(&app, "Clerk", "clerk@clinic.example").await?;

    let (status, body) = common::send(&app, "GET", "/rbac/roles", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);
    assert_eq!(body["error"], "forbidden");

    // Bootstrap the first administrator straight through the store.
    let store = SqliteAssignmentStore::new(pool.clone());
    store.grant(PrincipalRef::user(Uuid::parse_str(&admin_id)?), "ROLE_ALL").await?;

    let (status, _) = common::send(&app, "GET", "/rbac/roles", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK, "ROLE_ALL should cover ROLE_VIEW");

    let role = common::create_role(&app, &token, "Nurse").await?;
    let (status, _) = common::toggle(&app, &token, "role", &role, "VACCINE_VIEW").await?;
    assert_eq!(status, StatusCode::OK);

    // User administration is a separate module.
    let (status, _) = common::send(&app, "GET", "/rbac/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = common::toggle(&app, &token, "user", &clerk_id, "VACCINE_VIEW").await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn role_inherited_permission_authorizes_requests() -> Result<()> {
    let (_dir, pool) = common::migrated_pool().await?;
    let (bus, _rx) = init_event_bus();
    let state = AppState::new(pool.clone(), JwtConfig::new("strict-secret", 1), bus, AuthzMode::Strict).await?;
    let app = router(state);

    let (token, user_id) = common::register(&app, "Auditor", "auditor@clinic.example").await?;

    let role_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    sqlx::query("INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, NULL, ?, ?)")
        .bind(role_id.to_string())
        .bind("Auditors")
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await?;
    sqlx::query("UPDATE users SET role_id = ? WHERE id = ?")
        .bind(role_id.to_string())
        .bind(&user_id)
        .execute(&pool)
        .await?;

    let store = SqliteAssignmentStore::new(pool.clone());
    store.grant(PrincipalRef::role(role_id), "USER_VIEW").await?;

    let (status, users) = common::send(&app, "GET", "/rbac/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().map(Vec::len), Some(1));

    let (status, _) = common::send(&app, "GET", "/rbac/roles", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}
