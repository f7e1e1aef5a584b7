#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use vax_admin::create_app;

pub struct TestApp {
    // Keeps the database file alive for the duration of the test.
    _dir: TempDir,
    pub pool: SqlitePool,
    pub app: Router,
}

pub async fn migrated_pool() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

pub async fn setup() -> Result<TestApp> {
    let (dir, pool) = migrated_pool().await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok(TestApp { _dir: dir, pool, app })
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };

    Ok((status, value))
}

/// Registers a staff account and returns `(token, user_id)`.
pub async fn register(app: &Router, name: &str, email: &str) -> Result<(String, String)> {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": name, "email": email, "password": "password123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);

    let token = body["token"].as_str().context("missing token")?.to_string();
    let user_id = body["user"]["id"].as_str().context("missing user id")?.to_string();
    Ok((token, user_id))
}

pub async fn create_role(app: &Router, token: &str, name: &str) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/rbac/roles",
        Some(token),
        Some(json!({ "name": name, "description": null })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "create role failed: {}", body);

    Ok(body["id"].as_str().context("missing role id")?.to_string())
}

pub async fn toggle(
    app: &Router,
    token: &str,
    kind: &str,
    id: &str,
    code: &str,
) -> Result<(StatusCode, Value)> {
    send(
        app,
        "POST",
        "/rbac/toggle",
        Some(token),
        Some(json!({ "principal": { "kind": kind, "id": id }, "permission_code": code })),
    )
    .await
}

/// Find one entry of an effective permission view by code.
pub fn entry<'a>(view: &'a Value, code: &str) -> &'a Value {
    view["permissions"]
        .as_array()
        .and_then(|perms| perms.iter().find(|p| p["code"] == code))
        .unwrap_or_else(|| panic!("{} missing from view {}", code, view))
}

pub fn granted_in_module(view: &Value, module: &str) -> Vec<String> {
    view["permissions"]
        .as_array()
        .map(|perms| {
            perms
                .iter()
                .filter(|p| p["module"] == module && p["granted"] == true)
                .filter_map(|p| p["code"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
