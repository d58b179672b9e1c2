mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use erp_api::{
    auth::{hash_password, INVENTORY_VIEW, MANUFACTURING_BOM, MANUFACTURING_VIEW},
    entities::user,
};
use rstest::rstest;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use uuid::Uuid;

#[rstest]
#[case("/api/v1/products")]
#[case("/api/v1/production")]
#[case("/api/v1/bom")]
#[case("/api/v1/stock-movements")]
#[tokio::test]
async fn protected_routes_require_a_token(#[case] uri: &str) {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn malformed_and_foreign_tokens_are_unauthorized() {
    let app = TestApp::new().await;

    let (status, _) = app
        .request(Method::GET, "/api/v1/products", None, Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &json!({ "sub": "x", "exp": 4_102_444_800_i64 }),
        &jsonwebtoken::EncodingKey::from_secret(b"some-other-secret-of-sufficient-length"),
    )
    .unwrap();
    let (status, _) = app
        .request(Method::GET, "/api/v1/products", None, Some(&forged))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_permission_is_forbidden() {
    let app = TestApp::new().await;
    let reader = app.read_only_token().await;

    let (status, _) = app
        .request(Method::GET, "/api/v1/products", None, Some(&reader))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/products",
            Some(json!({ "name": "Nope", "sku": "NOPE-1" })),
            Some(&reader),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/production",
            Some(json!({ "bomId": Uuid::new_v4(), "qtyPlanned": 1 })),
            Some(&reader),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn permissions_are_checked_per_area() {
    let app = TestApp::new().await;
    let bom_editor = app
        .token_for("USER", &[MANUFACTURING_VIEW, MANUFACTURING_BOM])
        .await;

    let (status, _) = app
        .request(Method::GET, "/api/v1/bom", None, Some(&bom_editor))
        .await;
    assert_eq!(status, StatusCode::OK);

    // BOM editing does not grant inventory reads.
    let (status, _) = app
        .request(Method::GET, "/api/v1/products", None, Some(&bom_editor))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let inventory_only = app.token_for("USER", &[INVENTORY_VIEW]).await;
    let (status, _) = app
        .request(
            Method::GET,
            "/api/v1/production",
            None,
            Some(&inventory_only),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[rstest]
#[case("ADMIN")]
#[case("MASTER_ADMIN")]
#[case("admin")]
#[tokio::test]
async fn admin_roles_bypass_permission_checks(#[case] role: &str) {
    let app = TestApp::new().await;
    let token = app.token_for(role, &[]).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/warehouses",
            Some(json!({ "name": format!("{role} depot") })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn all_permission_grants_every_route() {
    let app = TestApp::new().await;
    let token = app.token_for("USER", &["all"]).await;
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/warehouses",
            Some(json!({ "name": "Everything" })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn login_refresh_and_logout_round_trip() {
    let app = TestApp::new().await;
    user::ActiveModel {
        name: Set("Planner".to_string()),
        email: Set("planner@erp.test".to_string()),
        password_hash: Set(hash_password("correct horse battery").unwrap()),
        role: Set("USER".to_string()),
        permissions: Set(json!([MANUFACTURING_VIEW]).to_string()),
        tenant_id: Set(Some("tenant-a".to_string())),
        active: Set(true),
        ..Default::default()
    }
    .insert(&*app.state.db)
    .await
    .unwrap();

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "planner@erp.test", "password": "wrong" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, tokens) = app
        .request(
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "planner@erp.test", "password": "correct horse battery" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{tokens}");
    let access = tokens["access_token"].as_str().unwrap().to_string();
    let refresh = tokens["refresh_token"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(Method::GET, "/api/v1/production", None, Some(&access))
        .await;
    assert_eq!(status, StatusCode::OK);

    // A refresh token is not an access token.
    let (status, _) = app
        .request(Method::GET, "/api/v1/production", None, Some(&refresh))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, renewed) = app
        .request(
            Method::POST,
            "/api/v1/auth/refresh",
            Some(json!({ "refresh_token": refresh })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{renewed}");

    // The old refresh token is spent.
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/auth/refresh",
            Some(json!({ "refresh_token": refresh })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(Method::POST, "/api/v1/auth/logout", None, Some(&access))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .request(Method::GET, "/api/v1/production", None, Some(&access))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_and_status_are_public() {
    let app = TestApp::new().await;

    let (status, health) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK, "{health}");
    let (status, _) = app.request(Method::GET, "/health/live", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.request(Method::GET, "/api/v1/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "erp-api");
}
