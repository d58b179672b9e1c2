use super::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    auth::AuthenticatedUser,
    entities::warehouse,
    errors::ApiError,
    handlers::AppState,
    services::warehouses::{CreateWarehouse, UpdateWarehouse},
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/warehouses",
    responses((status = 200, description = "Warehouses, default first", body = [warehouse::Model])),
    security(("bearer_auth" = [])),
    tag = "Warehouses"
)]
pub async fn list_warehouses(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let warehouses = state
        .services
        .warehouses
        .list()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(warehouses))
}

#[utoipa::path(
    get,
    path = "/api/v1/warehouses/{id}",
    params(("id" = Uuid, Path, description = "Warehouse ID")),
    responses(
        (status = 200, description = "Warehouse", body = warehouse::Model),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Warehouses"
)]
pub async fn get_warehouse(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let warehouse = state
        .services
        .warehouses
        .get(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(warehouse))
}

#[utoipa::path(
    post,
    path = "/api/v1/warehouses",
    request_body = CreateWarehouse,
    responses(
        (status = 201, description = "Warehouse created", body = warehouse::Model),
        (status = 409, description = "Duplicate name", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Warehouses"
)]
pub async fn create_warehouse(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateWarehouse>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let warehouse = state
        .services
        .warehouses
        .create(payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(created_response(warehouse))
}

#[utoipa::path(
    put,
    path = "/api/v1/warehouses/{id}",
    params(("id" = Uuid, Path, description = "Warehouse ID")),
    request_body = UpdateWarehouse,
    responses((status = 200, description = "Warehouse updated", body = warehouse::Model)),
    security(("bearer_auth" = [])),
    tag = "Warehouses"
)]
pub async fn update_warehouse(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateWarehouse>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let warehouse = state
        .services
        .warehouses
        .update(id, payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(warehouse))
}

#[utoipa::path(
    delete,
    path = "/api/v1/warehouses/{id}",
    params(("id" = Uuid, Path, description = "Warehouse ID")),
    responses(
        (status = 204, description = "Warehouse deleted"),
        (status = 400, description = "Warehouse still in use", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Warehouses"
)]
pub async fn delete_warehouse(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .warehouses
        .delete(id, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
