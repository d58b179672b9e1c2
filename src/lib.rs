//! ERP API Library
//!
//! Inventory, bills of materials and production orders for a multi-tenant
//! ERP backend, served as a JSON HTTP API with realtime change events.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod middleware_helpers;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::{AuthConfig, AuthRouterExt, AuthService};
use crate::auth::{
    INVENTORY_MANAGE, INVENTORY_VIEW, MANUFACTURING_BOM, MANUFACTURING_PRODUCTION,
    MANUFACTURING_VIEW,
};
use crate::events::{EventSender, RealtimeHub};
use crate::services::factory::{ServiceContainer, ServiceFactory};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: EventSender,
    pub services: ServiceContainer,
    pub auth: Arc<AuthService>,
    pub realtime: RealtimeHub,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: EventSender,
        realtime: RealtimeHub,
    ) -> Self {
        let factory = ServiceFactory::new(db.clone(), event_sender.clone());
        let auth = Arc::new(AuthService::new(AuthConfig::from(&config), db.clone()));
        Self {
            services: ServiceContainer::new(&factory),
            db,
            config,
            event_sender,
            auth,
            realtime,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_outside_a_request_has_no_request_id() {
        let response = ApiResponse::<()>::error("oops".into());
        let meta = response.meta.expect("metadata expected");
        assert!(meta.request_id.is_none());
        assert_eq!(response.message.as_deref(), Some("oops"));
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Versioned JSON API, grouped by the permission each route requires.
pub fn api_v1_routes() -> Router<AppState> {
    use axum::routing::{delete, patch, put};
    use handlers::{bom, product_stocks, production, products, scrap, stock_movements, warehouses};

    // Inventory: products, warehouses, stock rows and the movement ledger
    let inventory_read = Router::new()
        .route("/products", get(products::list_products))
        .route("/products/next-sku", get(products::next_sku))
        .route("/products/:id", get(products::get_product))
        .route(
            "/products/:id/availability",
            get(products::product_availability),
        )
        .route("/warehouses", get(warehouses::list_warehouses))
        .route("/warehouses/:id", get(warehouses::get_warehouse))
        .route("/product-stocks", get(product_stocks::list_product_stocks))
        .route(
            "/product-stocks/product/:product_id",
            get(product_stocks::stocks_by_product),
        )
        .route(
            "/product-stocks/warehouse/:warehouse_id",
            get(product_stocks::stocks_by_warehouse),
        )
        .route("/stock-movements", get(stock_movements::list_movements))
        .route(
            "/stock-movements/stats",
            get(stock_movements::movement_stats),
        )
        .route(
            "/stock-movements/product/:product_id",
            get(stock_movements::product_history),
        )
        .with_permission(INVENTORY_VIEW);

    let inventory_manage = Router::new()
        .route("/products", post(products::create_product))
        .route(
            "/products/:id",
            put(products::update_product).delete(products::delete_product),
        )
        .route("/warehouses", post(warehouses::create_warehouse))
        .route(
            "/warehouses/:id",
            put(warehouses::update_warehouse).delete(warehouses::delete_warehouse),
        )
        .route(
            "/product-stocks",
            post(product_stocks::upsert_product_stock),
        )
        .route(
            "/product-stocks/:id",
            delete(product_stocks::delete_product_stock),
        )
        .route("/stock-movements", post(stock_movements::create_movement))
        .route(
            "/stock-movements/reconcile",
            post(stock_movements::reconcile_stock),
        )
        .with_permission(INVENTORY_MANAGE);

    // Manufacturing: BOMs and production orders
    let manufacturing_read = Router::new()
        .route("/bom", get(bom::list_boms))
        .route("/bom/:id", get(bom::get_bom))
        .route(
            "/bom/calculate-requirements",
            post(bom::calculate_requirements),
        )
        .route("/production", get(production::list_orders))
        .route("/production/:id", get(production::get_order))
        .route("/production/:id/scrap", get(production::list_scrap))
        .route(
            "/production/:id/reservations",
            get(production::list_reservations),
        )
        .route("/scrap", get(scrap::list_scrap))
        .route("/scrap/stats", get(scrap::scrap_stats))
        .with_permission(MANUFACTURING_VIEW);

    let bom_manage = Router::new()
        .route("/bom", post(bom::create_bom))
        .route("/bom/:id", put(bom::update_bom).delete(bom::delete_bom))
        .with_permission(MANUFACTURING_BOM);

    let production_manage = Router::new()
        .route("/production", post(production::create_order))
        .route(
            "/production/:id",
            put(production::update_order).delete(production::delete_order),
        )
        .route("/production/:id/start", post(production::start_order))
        .route("/production/:id/finish", post(production::finish_order))
        .route("/production/:id/cancel", post(production::cancel_order))
        .route("/scrap", post(scrap::create_scrap))
        .route("/scrap/:id", delete(scrap::delete_scrap))
        .route("/scrap/:id/disposal", patch(scrap::update_scrap_disposal))
        .with_permission(MANUFACTURING_PRODUCTION);

    Router::new()
        .route("/status", get(api_status))
        .merge(inventory_read)
        .merge(inventory_manage)
        .merge(manufacturing_read)
        .merge(bom_manage)
        .merge(production_manage)
}

/// Full application router without the deployment-specific outer layers
/// (CORS, compression, timeouts), which `main` adds.
pub fn app_router(state: AppState) -> Router {
    let auth_service = state.auth.clone();

    Router::new()
        .route("/", get(|| async { "erp-api up" }))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/metrics/json", get(metrics::metrics_json_handler))
        .route("/ws", get(handlers::realtime::realtime_handler))
        .nest("/health", handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .nest(
            "/api/v1/auth",
            auth::auth_routes().with_state(auth_service.clone()),
        )
        .merge(openapi::swagger_ui())
        .layer(axum::middleware::from_fn(tracing::http_metrics_middleware))
        .layer(tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::security_headers_middleware,
        ))
        // Auth middleware reads the service from request extensions
        .layer(Extension(auth_service))
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git": option_env!("GIT_HASH").unwrap_or("unknown"),
        "service": "erp-api",
        "environment": state.config.environment,
        "uptime_secs": handlers::health::uptime_secs(),
        "realtime_subscribers": state.realtime.subscriber_count(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    Json(ApiResponse::success(status_data))
}
