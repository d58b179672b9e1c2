use super::common::{
    created_response, map_service_error, success_response, validate_input, MessageResponse,
};
use crate::{
    auth::AuthenticatedUser,
    errors::ApiError,
    handlers::AppState,
    services::bom::{
        BomDetail, BomFilter, BomRemoval, BomSummary, CreateBom, RequirementsReport,
        RequirementsRequest, UpdateBom,
    },
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/bom",
    params(BomFilter),
    responses((status = 200, description = "BOMs with item counts", body = [BomSummary])),
    security(("bearer_auth" = [])),
    tag = "BOM"
)]
pub async fn list_boms(
    State(state): State<AppState>,
    Query(filter): Query<BomFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let boms = state
        .services
        .bom
        .list(filter)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(boms))
}

#[utoipa::path(
    get,
    path = "/api/v1/bom/{id}",
    params(("id" = Uuid, Path, description = "BOM ID")),
    responses(
        (status = 200, description = "BOM with items", body = BomDetail),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "BOM"
)]
pub async fn get_bom(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let bom = state
        .services
        .bom
        .get(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(bom))
}

/// Creates a BOM; an active BOM also re-prices its finished product.
#[utoipa::path(
    post,
    path = "/api/v1/bom",
    request_body = CreateBom,
    responses(
        (status = 201, description = "BOM created", body = BomDetail),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "BOM"
)]
pub async fn create_bom(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateBom>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let bom = state
        .services
        .bom
        .create(payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    info!(bom_id = %bom.bom.id, "BOM created");
    Ok(created_response(bom))
}

#[utoipa::path(
    put,
    path = "/api/v1/bom/{id}",
    params(("id" = Uuid, Path, description = "BOM ID")),
    request_body = UpdateBom,
    responses(
        (status = 200, description = "BOM updated", body = BomDetail),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "BOM"
)]
pub async fn update_bom(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateBom>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let bom = state
        .services
        .bom
        .update(id, payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(bom))
}

#[utoipa::path(
    delete,
    path = "/api/v1/bom/{id}",
    params(("id" = Uuid, Path, description = "BOM ID")),
    responses(
        (status = 200, description = "BOM deleted, or deactivated when orders use it", body = MessageResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "BOM"
)]
pub async fn delete_bom(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let removal = state
        .services
        .bom
        .delete(id, &user.display_name())
        .await
        .map_err(map_service_error)?;
    let message = match removal {
        BomRemoval::Deleted => "BOM deleted",
        BomRemoval::Deactivated => "BOM is used by production orders and was deactivated",
    };
    Ok(success_response(MessageResponse::new(message)))
}

#[utoipa::path(
    post,
    path = "/api/v1/bom/calculate-requirements",
    request_body = RequirementsRequest,
    responses(
        (status = 200, description = "Material requirements and shortages", body = RequirementsReport),
        (status = 404, description = "Unknown BOM", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "BOM"
)]
pub async fn calculate_requirements(
    State(state): State<AppState>,
    Json(payload): Json<RequirementsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let report = state
        .services
        .bom
        .calculate_requirements(payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(report))
}
