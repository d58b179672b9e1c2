use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

/// Registers the bearer JWT scheme referenced by every secured path.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ERP API",
        version = "1.0.0",
        description = r#"
# ERP Manufacturing and Inventory API

Products, warehouses, stock ledger, bills of materials and production orders.

## Authentication

Every `/api/v1` endpoint requires a bearer JWT obtained from `/api/v1/auth/login`:

```
Authorization: Bearer <your-jwt-token>
```

Each route also requires a permission (`inventory.view`, `inventory.manage`,
`manufacturing.view`, `manufacturing.bom`, `manufacturing.production`).
`ADMIN` and `MASTER_ADMIN` roles pass every check.

## Realtime

Connect to `/ws?token=<jwt>` to receive `entity:changed`, `entity:deleted`,
`production:completed`, `stock:updated` and `product:cost_updated` frames.

## Errors

```json
{
  "error": "Not Found",
  "code": "NOT_FOUND",
  "message": "Production order 6f1c... not found",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Products", description = "Product catalogue"),
        (name = "Warehouses", description = "Warehouse master data"),
        (name = "Stock", description = "Warehouse stock rows and the movement ledger"),
        (name = "BOM", description = "Bills of materials and requirement planning"),
        (name = "Production", description = "Production order lifecycle"),
        (name = "Scrap", description = "Production scrap and its disposal")
    ),
    paths(
        // Products
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::product_availability,
        crate::handlers::products::create_product,
        crate::handlers::products::update_product,
        crate::handlers::products::delete_product,

        // Warehouses
        crate::handlers::warehouses::list_warehouses,
        crate::handlers::warehouses::get_warehouse,
        crate::handlers::warehouses::create_warehouse,
        crate::handlers::warehouses::update_warehouse,
        crate::handlers::warehouses::delete_warehouse,

        // Stock
        crate::handlers::product_stocks::list_product_stocks,
        crate::handlers::product_stocks::stocks_by_product,
        crate::handlers::product_stocks::stocks_by_warehouse,
        crate::handlers::product_stocks::upsert_product_stock,
        crate::handlers::product_stocks::delete_product_stock,
        crate::handlers::stock_movements::list_movements,
        crate::handlers::stock_movements::product_history,
        crate::handlers::stock_movements::movement_stats,
        crate::handlers::stock_movements::create_movement,
        crate::handlers::stock_movements::reconcile_stock,

        // BOM
        crate::handlers::bom::list_boms,
        crate::handlers::bom::get_bom,
        crate::handlers::bom::create_bom,
        crate::handlers::bom::update_bom,
        crate::handlers::bom::delete_bom,
        crate::handlers::bom::calculate_requirements,

        // Production
        crate::handlers::production::list_orders,
        crate::handlers::production::get_order,
        crate::handlers::production::create_order,
        crate::handlers::production::update_order,
        crate::handlers::production::start_order,
        crate::handlers::production::finish_order,
        crate::handlers::production::cancel_order,
        crate::handlers::production::delete_order,
        crate::handlers::production::list_scrap,
        crate::handlers::production::list_reservations,

        // Scrap
        crate::handlers::scrap::list_scrap,
        crate::handlers::scrap::scrap_stats,
        crate::handlers::scrap::create_scrap,
        crate::handlers::scrap::update_scrap_disposal,
        crate::handlers::scrap::delete_scrap,
    ),
    components(
        schemas(
            crate::handlers::common::MessageResponse,
            crate::services::Pagination,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
