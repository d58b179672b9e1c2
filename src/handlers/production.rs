use super::common::{
    created_response, map_service_error, success_response, validate_input, MessageResponse,
};
use crate::{
    auth::AuthenticatedUser,
    entities::material_reservation,
    errors::ApiError,
    handlers::AppState,
    services::production::{
        CreateProductionOrder, FinishProduction, ProductionOrderFilter, ProductionOrderPage,
        ProductionOrderView, UpdateProductionOrder,
    },
    services::scrap::ScrapView,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/production",
    params(ProductionOrderFilter),
    responses(
        (status = 200, description = "Orders with status counts", body = ProductionOrderPage),
        (status = 400, description = "Unknown status filter", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<ProductionOrderFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .services
        .production
        .list(filter)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/production/{id}",
    params(("id" = Uuid, Path, description = "Production order ID")),
    responses(
        (status = 200, description = "Production order", body = ProductionOrderView),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .production
        .get(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// Plans an order and reserves its materials. The order is created even
/// when materials are short; its status tells the outcome.
#[utoipa::path(
    post,
    path = "/api/v1/production",
    request_body = CreateProductionOrder,
    responses(
        (status = 201, description = "Order created", body = ProductionOrderView),
        (status = 404, description = "Unknown BOM", body = crate::errors::ErrorResponse),
        (status = 409, description = "Duplicate order number", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateProductionOrder>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .production
        .create(payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    info!(order_id = %order.order.id, status = %order.order.status, "Production order created");
    Ok(created_response(order))
}

#[utoipa::path(
    put,
    path = "/api/v1/production/{id}",
    params(("id" = Uuid, Path, description = "Production order ID")),
    request_body = UpdateProductionOrder,
    responses((status = 200, description = "Order updated", body = ProductionOrderView)),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn update_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductionOrder>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .production
        .update(id, payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/production/{id}/start",
    params(("id" = Uuid, Path, description = "Production order ID")),
    responses(
        (status = 200, description = "Materials consumed, order in progress", body = ProductionOrderView),
        (status = 400, description = "Order cannot start", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn start_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .production
        .start(id, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/production/{id}/finish",
    params(("id" = Uuid, Path, description = "Production order ID")),
    request_body = FinishProduction,
    responses(
        (status = 200, description = "Output booked and variances recorded", body = ProductionOrderView),
        (status = 400, description = "Order is not in progress", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn finish_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<FinishProduction>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let order = state
        .services
        .production
        .finish(id, payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/production/{id}/cancel",
    params(("id" = Uuid, Path, description = "Production order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = ProductionOrderView),
        (status = 400, description = "Completed orders cannot be cancelled", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .production
        .cancel(id, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

#[utoipa::path(
    delete,
    path = "/api/v1/production/{id}",
    params(("id" = Uuid, Path, description = "Production order ID")),
    responses(
        (status = 200, description = "Order deleted and its stock effects reversed", body = MessageResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .services
        .production
        .delete(id, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(MessageResponse::new(outcome.message())))
}

#[utoipa::path(
    get,
    path = "/api/v1/production/{id}/scrap",
    params(("id" = Uuid, Path, description = "Production order ID")),
    responses(
        (status = 200, description = "Scrap recorded for the order", body = [ScrapView]),
        (status = 404, description = "Production order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn list_scrap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let scrap = state
        .services
        .scrap
        .list_for_order(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(scrap))
}

#[utoipa::path(
    get,
    path = "/api/v1/production/{id}/reservations",
    params(("id" = Uuid, Path, description = "Production order ID")),
    responses((status = 200, description = "Material reservations of the order", body = [material_reservation::Model])),
    security(("bearer_auth" = [])),
    tag = "Production"
)]
pub async fn list_reservations(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let reservations = state
        .services
        .reservations
        .list_for_order(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(reservations))
}
