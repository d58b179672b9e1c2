use super::common::{created_response, map_service_error, success_response, validate_input};
use crate::{
    auth::AuthenticatedUser,
    entities::stock_movement,
    errors::ApiError,
    handlers::AppState,
    services::stock_movements::{
        CreateMovement, HistoryEntry, MovementFilter, MovementPage, MovementStat, ReconcileReport,
    },
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[utoipa::path(
    get,
    path = "/api/v1/stock-movements",
    params(MovementFilter),
    responses((status = 200, description = "Movements, newest first", body = MovementPage)),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    Query(filter): Query<MovementFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .services
        .stock_movements
        .list(filter)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock-movements/product/{productId}",
    params(("productId" = Uuid, Path, description = "Product ID"), HistoryQuery),
    responses((status = 200, description = "Stock card with running balance", body = [HistoryEntry])),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn product_history(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state
        .services
        .stock_movements
        .product_history(product_id, query.warehouse_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(history))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock-movements/stats",
    params(StatsQuery),
    responses((status = 200, description = "Totals per movement type", body = [MovementStat])),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn movement_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .services
        .stock_movements
        .stats(query.start_date, query.end_date)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(stats))
}

#[utoipa::path(
    post,
    path = "/api/v1/stock-movements",
    request_body = CreateMovement,
    responses(
        (status = 201, description = "Movement recorded", body = stock_movement::Model),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn create_movement(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateMovement>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let movement = state
        .services
        .stock_movements
        .create(payload, &user.display_name())
        .await
        .map_err(map_service_error)?;
    Ok(created_response(movement))
}

#[utoipa::path(
    post,
    path = "/api/v1/stock-movements/reconcile",
    responses((status = 200, description = "Products whose stock disagrees with the ledger", body = ReconcileReport)),
    security(("bearer_auth" = [])),
    tag = "Stock"
)]
pub async fn reconcile_stock(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .services
        .stock_movements
        .reconcile()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(report))
}
