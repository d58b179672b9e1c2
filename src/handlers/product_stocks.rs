use super::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    auth::AuthenticatedUser,
    errors::ApiError,
    handlers::AppState,
    services::stock::{ProductStockView, UpsertOutcome, UpsertProductStock},
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/product-stocks",
    responses((status = 200, description = "All warehouse stock rows", body = [ProductStockView])),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn list_product_stocks(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .services
        .product_stocks
        .list(None, None)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(rows))
}

#[utoipa::path(
    get,
    path = "/api/v1/product-stocks/product/{productId}",
    params(("productId" = Uuid, Path, description = "Product ID")),
    responses((status = 200, description = "Stock of one product per warehouse", body = [ProductStockView])),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn stocks_by_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .services
        .product_stocks
        .list(Some(product_id), None)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(rows))
}

#[utoipa::path(
    get,
    path = "/api/v1/product-stocks/warehouse/{warehouseId}",
    params(("warehouseId" = Uuid, Path, description = "Warehouse ID")),
    responses((status = 200, description = "Stock held in one warehouse", body = [ProductStockView])),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn stocks_by_warehouse(
    State(state): State<AppState>,
    Path(warehouse_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .services
        .product_stocks
        .list(None, Some(warehouse_id))
        .await
        .map_err(map_service_error)?;
    Ok(success_response(rows))
}

/// Sets a warehouse row; 201 when the row did not exist yet.
#[utoipa::path(
    post,
    path = "/api/v1/product-stocks",
    request_body = UpsertProductStock,
    responses(
        (status = 200, description = "Row updated"),
        (status = 201, description = "Row created"),
        (status = 404, description = "Unknown product or warehouse", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn upsert_product_stock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpsertProductStock>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let (row, outcome) = state
        .services
        .product_stocks
        .upsert(payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(match outcome {
        UpsertOutcome::Created => created_response(row),
        UpsertOutcome::Updated => success_response(row),
    })
}

#[utoipa::path(
    delete,
    path = "/api/v1/product-stocks/{id}",
    params(("id" = Uuid, Path, description = "Stock row ID")),
    responses(
        (status = 204, description = "Row deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn delete_product_stock(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .product_stocks
        .delete(id, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
