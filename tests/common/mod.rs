#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use erp_api::{
    auth::{ALL_PERMISSIONS, INVENTORY_VIEW, MANUFACTURING_VIEW},
    config::AppConfig,
    db,
    entities::user,
    events::{self, EventSender, RealtimeHub},
    AppState,
};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

const TEST_JWT_SECRET: &str = "integration-test-secret-that-is-long-enough-for-hs256";

/// Application backed by a throwaway SQLite file, with an admin token ready.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    admin_token: String,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for test database");
        let database_url = format!(
            "sqlite://{}?mode=rwc",
            db_dir.path().join("erp-test.db").display()
        );

        let cfg = AppConfig::new(
            database_url,
            TEST_JWT_SECRET.to_string(),
            3600,
            86400,
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("connect to sqlite test database");
        db::run_migrations(&pool)
            .await
            .expect("run migrations on test database");

        let (tx, rx) = mpsc::channel(256);
        let realtime = RealtimeHub::new(64);
        let event_task = tokio::spawn(events::process_events(rx, realtime.clone()));

        let state = AppState::new(
            std::sync::Arc::new(pool),
            cfg,
            EventSender::new(tx),
            realtime,
        );
        let router = erp_api::app_router(state.clone());

        let mut app = Self {
            router,
            state,
            admin_token: String::new(),
            _event_task: event_task,
            _db_dir: db_dir,
        };
        app.admin_token = app.token_for("ADMIN", &[]).await;
        app
    }

    /// Inserts a user and returns an access token for it.
    pub async fn token_for(&self, role: &str, permissions: &[&str]) -> String {
        let id = Uuid::new_v4();
        let model = user::ActiveModel {
            id: Set(id),
            name: Set(format!("{} user", role.to_lowercase())),
            email: Set(format!("{}@erp.test", id.simple())),
            password_hash: Set(String::new()),
            role: Set(role.to_string()),
            permissions: Set(serde_json::to_string(permissions).expect("serialize permissions")),
            tenant_id: Set(Some("tenant-test".to_string())),
            active: Set(true),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("insert test user");

        self.state
            .auth
            .generate_token(&model)
            .expect("issue token for test user")
            .access_token
    }

    /// Token holding every permission without an admin role.
    pub async fn full_access_token(&self) -> String {
        self.token_for("USER", &ALL_PERMISSIONS).await
    }

    /// Token that may only read.
    pub async fn read_only_token(&self) -> String {
        self.token_for("USER", &[INVENTORY_VIEW, MANUFACTURING_VIEW])
            .await
    }

    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Sends a request and decodes the JSON body (`Value::Null` when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None, Some(self.admin_token()))
            .await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body), Some(self.admin_token()))
            .await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(body), Some(self.admin_token()))
            .await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, Some(body), Some(self.admin_token()))
            .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, None, Some(self.admin_token()))
            .await
    }

    pub async fn seed_warehouse(&self, name: &str) -> Uuid {
        let (status, body) = self
            .post("/api/v1/warehouses", json!({ "name": name }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "seed warehouse: {body}");
        id_of(&body)
    }

    /// Creates a product with an opening balance booked to `warehouse`.
    pub async fn seed_product(
        &self,
        sku: &str,
        product_type: &str,
        cost: f64,
        stock: f64,
        warehouse: Option<Uuid>,
    ) -> Uuid {
        let (status, body) = self
            .post(
                "/api/v1/products",
                json!({
                    "name": format!("Product {sku}"),
                    "sku": sku,
                    "type": product_type,
                    "unit": "pcs",
                    "cost": cost,
                    "price": cost * 2.0,
                    "stock": stock,
                    "warehouseId": warehouse,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "seed product: {body}");
        id_of(&body)
    }

    /// Creates a BOM whose lines are `(raw product, qty per unit, waste %)`.
    pub async fn seed_bom(&self, finished: Uuid, lines: &[(Uuid, f64, f64)]) -> Uuid {
        let items: Vec<Value> = lines
            .iter()
            .map(|(raw, qty, waste)| {
                json!({
                    "rawProductId": raw,
                    "quantityPerUnit": qty,
                    "wastePercent": waste,
                })
            })
            .collect();
        let (status, body) = self
            .post(
                "/api/v1/bom",
                json!({
                    "finishedProductId": finished,
                    "name": "Standard recipe",
                    "items": items,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "seed bom: {body}");
        id_of(&body)
    }

    pub async fn product(&self, id: Uuid) -> Value {
        let (status, body) = self.get(&format!("/api/v1/products/{id}")).await;
        assert_eq!(status, StatusCode::OK, "fetch product: {body}");
        body
    }

    pub async fn product_stock(&self, id: Uuid) -> f64 {
        self.product(id).await["stock"]
            .as_f64()
            .expect("numeric stock")
    }

    /// Stock of a product in one warehouse, 0 when there is no row.
    pub async fn warehouse_stock(&self, product: Uuid, warehouse: Uuid) -> f64 {
        let (status, body) = self
            .get(&format!("/api/v1/product-stocks/product/{product}"))
            .await;
        assert_eq!(status, StatusCode::OK, "fetch product stocks: {body}");
        body.as_array()
            .expect("stock rows")
            .iter()
            .find(|row| row["warehouseId"] == json!(warehouse))
            .and_then(|row| row["stock"].as_f64())
            .unwrap_or(0.0)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn id_of(body: &Value) -> Uuid {
    body["id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| panic!("response has no id: {body}"))
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
