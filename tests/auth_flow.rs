use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

mod common;

#[tokio::test]
async fn register_login_and_me() -> Result<()> {
    let ctx = common::setup().await?;

    let (token, user_id) = common::register(&ctx.app, "Head Nurse", " Nurse@Clinic.Example ").await?;

    let (status, me) = common::send(&ctx.app, "GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user_id.as_str());
    assert_eq!(me["email"], "nurse@clinic.example");

    let (status, login) = common::send(
        &ctx.app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "nurse@clinic.example", "password": "password123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(login["token"].as_str().map(|t| !t.is_empty()).unwrap_or(false));

    Ok(())
}

#[tokio::test]
async fn wrong_password_and_missing_token_are_unauthorized() -> Result<()> {
    let ctx = common::setup().await?;
    common::register(&ctx.app, "Clerk", "clerk@clinic.example").await?;

    let (status, body) = common::send(
        &ctx.app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "clerk@clinic.example", "password": "not-the-password" })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = common::send(&ctx.app, "GET", "/auth/me", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = common::send(&ctx.app, "GET", "/rbac/roles", Some("garbage"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn duplicate_email_and_short_password_are_rejected() -> Result<()> {
    let ctx = common::setup().await?;
    common::register(&ctx.app, "Clerk", "clerk@clinic.example").await?;

    let (status, _) = common::send(
        &ctx.app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": "Other", "email": "CLERK@clinic.example", "password": "password123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = common::send(
        &ctx.app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": "Short", "email": "short@clinic.example", "password": "abc" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    Ok(())
}
