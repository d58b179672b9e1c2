use super::common::{
    created_response, map_service_error, success_response, validate_input, MessageResponse,
};
use crate::{
    auth::AuthenticatedUser,
    entities::production_scrap,
    errors::ApiError,
    handlers::{stock_movements::StatsQuery, AppState},
    services::scrap::{CreateScrap, ScrapFilter, ScrapStats, ScrapView, UpdateDisposal},
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/scrap",
    params(ScrapFilter),
    responses((status = 200, description = "Scrap records, newest first", body = [ScrapView])),
    security(("bearer_auth" = [])),
    tag = "Scrap"
)]
pub async fn list_scrap(
    State(state): State<AppState>,
    Query(filter): Query<ScrapFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let scrap = state
        .services
        .scrap
        .list(filter)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(scrap))
}

#[utoipa::path(
    get,
    path = "/api/v1/scrap/stats",
    params(StatsQuery),
    responses((status = 200, description = "Scrap totals by type, disposal status and product", body = ScrapStats)),
    security(("bearer_auth" = [])),
    tag = "Scrap"
)]
pub async fn scrap_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .services
        .scrap
        .stats(query.start_date, query.end_date)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(stats))
}

#[utoipa::path(
    post,
    path = "/api/v1/scrap",
    request_body = CreateScrap,
    responses(
        (status = 201, description = "Scrap recorded", body = ScrapView),
        (status = 404, description = "Unknown order or product", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Scrap"
)]
pub async fn create_scrap(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateScrap>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let scrap = state
        .services
        .scrap
        .create(payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(created_response(scrap))
}

#[utoipa::path(
    patch,
    path = "/api/v1/scrap/{id}/disposal",
    params(("id" = Uuid, Path, description = "Scrap record ID")),
    request_body = UpdateDisposal,
    responses(
        (status = 200, description = "Disposal status updated", body = production_scrap::Model),
        (status = 404, description = "Scrap record not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Scrap"
)]
pub async fn update_scrap_disposal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDisposal>,
) -> Result<impl IntoResponse, ApiError> {
    let scrap = state
        .services
        .scrap
        .update_disposal(id, payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(scrap))
}

#[utoipa::path(
    delete,
    path = "/api/v1/scrap/{id}",
    params(("id" = Uuid, Path, description = "Scrap record ID")),
    responses(
        (status = 200, description = "Scrap record deleted", body = MessageResponse),
        (status = 404, description = "Scrap record not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Scrap"
)]
pub async fn delete_scrap(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .scrap
        .delete(id, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(success_response(MessageResponse::new(
        "Scrap record deleted successfully",
    )))
}
