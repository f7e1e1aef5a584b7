use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::{entry, granted_in_module};

#[tokio::test]
async fn module_selection_replaces_codes_in_one_module() -> Result<()> {
    let ctx = common::setup().await?;
    let (token, _) = common::register(&ctx.app, "Admin", "admin@clinic.example").await?;
    let role = common::create_role(&ctx.app, &token, "Stock Keeper").await?;

    common::toggle(&ctx.app, &token, "role", &role, "INVENTORY_ALL").await?;
    common::toggle(&ctx.app, &token, "role", &role, "SUPPLIER_VIEW").await?;

    let (status, view) = common::send(
        &ctx.app,
        "PUT",
        "/rbac/modules/INVENTORY",
        Some(&token),
        Some(json!({
            "principal": { "kind": "role", "id": role },
            "codes": ["INVENTORY_VIEW", "INVENTORY_CREATE", "INVENTORY_VIEW"]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{}", view);

    assert_eq!(
        granted_in_module(&view, "INVENTORY"),
        vec!["INVENTORY_VIEW".to_string(), "INVENTORY_CREATE".to_string()]
    );
    assert_eq!(entry(&view, "INVENTORY_UPDATE")["locked"], false);
    assert_eq!(granted_in_module(&view, "SUPPLIER"), vec!["SUPPLIER_VIEW".to_string()]);

    // An empty selection clears the module.
    let (status, view) = common::send(
        &ctx.app,
        "PUT",
        "/rbac/modules/INVENTORY",
        Some(&token),
        Some(json!({ "principal": { "kind": "role", "id": role }, "codes": [] })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(granted_in_module(&view, "INVENTORY").is_empty());

    Ok(())
}

#[tokio::test]
async fn wildcard_mixed_with_granular_is_rejected() -> Result<()> {
    let ctx = common::setup().await?;
    let (token, _) = common::register(&ctx.app, "Admin", "admin@clinic.example").await?;
    let role = common::create_role(&ctx.app, &token, "Stock Keeper").await?;
    common::toggle(&ctx.app, &token, "role", &role, "INVENTORY_VIEW").await?;

    let (status, body) = common::send(
        &ctx.app,
        "PUT",
        "/rbac/modules/INVENTORY",
        Some(&token),
        Some(json!({
            "principal": { "kind": "role", "id": role },
            "codes": ["INVENTORY_ALL", "INVENTORY_VIEW"]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, _) = common::send(
        &ctx.app,
        "PUT",
        "/rbac/modules/INVENTORY",
        Some(&token),
        Some(json!({
            "principal": { "kind": "role", "id": role },
            "codes": ["SUPPLIER_VIEW"]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = common::send(
        &ctx.app,
        "PUT",
        "/rbac/modules/WAREHOUSE",
        Some(&token),
        Some(json!({ "principal": { "kind": "role", "id": role }, "codes": [] })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Nothing changed.
    let (_, view) = common::send(
        &ctx.app,
        "GET",
        &format!("/rbac/roles/{}/permissions", role),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(granted_in_module(&view, "INVENTORY"), vec!["INVENTORY_VIEW".to_string()]);

    Ok(())
}

#[tokio::test]
async fn module_selection_cannot_add_codes_under_role_wildcard() -> Result<()> {
    let ctx = common::setup().await?;
    let (token, _) = common::register(&ctx.app, "Admin", "admin@clinic.example").await?;
    let (_, nurse_id) = common::register(&ctx.app, "Nurse", "nurse@clinic.example").await?;
    let role = common::create_role(&ctx.app, &token, "Vaccinator").await?;

    common::toggle(&ctx.app, &token, "role", &role, "VACCINE_ALL").await?;
    let (status, _) = common::send(
        &ctx.app,
        "PUT",
        &format!("/rbac/users/{}/role", nurse_id),
        Some(&token),
        Some(json!({ "role_id": role })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = common::send(
        &ctx.app,
        "PUT",
        "/rbac/modules/VACCINE",
        Some(&token),
        Some(json!({
            "principal": { "kind": "user", "id": nurse_id },
            "codes": ["VACCINE_VIEW"]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM user_permissions WHERE user_id = ?")
        .bind(&nurse_id)
        .fetch_one(&ctx.pool)
        .await?;
    assert_eq!(count, 0);

    Ok(())
}

#[tokio::test]
async fn concurrent_toggle_and_module_selection_keep_wildcard_exclusive() -> Result<()> {
    let ctx = common::setup().await?;
    let (token, _) = common::register(&ctx.app, "Admin", "admin@clinic.example").await?;
    let role = common::create_role(&ctx.app, &token, "Vaccinator").await?;

    for round in 0..30 {
        let selection = json!({
            "principal": { "kind": "role", "id": role },
            "codes": ["VACCINE_VIEW"]
        });
        let (toggled, replaced) = tokio::join!(
            common::toggle(&ctx.app, &token, "role", &role, "VACCINE_ALL"),
            common::send(&ctx.app, "PUT", "/rbac/modules/VACCINE", Some(&token), Some(selection)),
        );
        for (status, body) in [toggled?, replaced?] {
            assert!(
                status == StatusCode::OK || status == StatusCode::CONFLICT,
                "round {}: {} {}",
                round,
                status,
                body
            );
        }

        let codes: Vec<String> = sqlx::query_scalar(
            "SELECT permission_code FROM role_permissions WHERE role_id = ? AND permission_code LIKE 'VACCINE_%'",
        )
        .bind(&role)
        .fetch_all(&ctx.pool)
        .await?;
        assert!(
            !codes.iter().any(|c| c == "VACCINE_ALL") || codes.len() == 1,
            "round {}: role holds {:?}",
            round,
            codes
        );
    }

    Ok(())
}

#[tokio::test]
async fn catalog_lists_each_module_with_its_wildcard() -> Result<()> {
    let ctx = common::setup().await?;
    let (token, _) = common::register(&ctx.app, "Admin", "admin@clinic.example").await?;

    let (status, modules) = common::send(&ctx.app, "GET", "/rbac/permissions", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    let modules = modules.as_array().cloned().unwrap_or_default();
    assert_eq!(modules.len(), 8);
    let vaccine = modules
        .iter()
        .find(|m| m["module"] == "VACCINE")
        .expect("VACCINE module listed");
    assert_eq!(vaccine["all_code"], "VACCINE_ALL");
    assert_eq!(vaccine["permissions"][0]["code"], "VACCINE_ALL");

    Ok(())
}

#[tokio::test]
async fn deleting_role_removes_its_grants_and_detaches_users() -> Result<()> {
    let ctx = common::setup().await?;
    let (token, _) = common::register(&ctx.app, "Admin", "admin@clinic.example").await?;
    let (_, nurse_id) = common::register(&ctx.app, "Nurse", "nurse@clinic.example").await?;
    let role = common::create_role(&ctx.app, &token, "Temporary").await?;
    common::toggle(&ctx.app, &token, "role", &role, "VACCINE_ALL").await?;
    common::send(
        &ctx.app,
        "PUT",
        &format!("/rbac/users/{}/role", nurse_id),
        Some(&token),
        Some(json!({ "role_id": role })),
    )
    .await?;

    let (status, _) =
        common::send(&ctx.app, "DELETE", &format!("/rbac/roles/{}", role), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) =
        common::send(&ctx.app, "GET", &format!("/rbac/roles/{}", role), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let leftover: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM role_permissions WHERE role_id = ?")
        .bind(&role)
        .fetch_one(&ctx.pool)
        .await?;
    assert_eq!(leftover, 0);

    let (_, view) = common::send(
        &ctx.app,
        "GET",
        &format!("/rbac/users/{}/permissions", nurse_id),
        Some(&token),
        None,
    )
    .await?;
    assert!(view.get("role_id").map(|v| v.is_null()).unwrap_or(true));
    assert_eq!(entry(&view, "VACCINE_ALL")["granted"], false);

    Ok(())
}

#[tokio::test]
async fn duplicate_role_name_conflicts() -> Result<()> {
    let ctx = common::setup().await?;
    let (token, _) = common::register(&ctx.app, "Admin", "admin@clinic.example").await?;
    common::create_role(&ctx.app, &token, "Nurse").await?;

    let (status, _) = common::send(
        &ctx.app,
        "POST",
        "/rbac/roles",
        Some(&token),
        Some(json!({ "name": " Nurse " })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, roles) = common::send(&ctx.app, "GET", "/rbac/roles", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roles.as_array().map(Vec::len), Some(1));

    Ok(())
}
