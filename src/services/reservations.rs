//! Material reservations for production orders.
//!
//! Reserving walks the BOM of an order and greedily allocates each raw
//! material across warehouses, net of what other orders already hold. Either
//! every line is covered or nothing is written.

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        bom_item::{self, Entity as BomItemEntity},
        material_reservation::{self, Entity as ReservationEntity, ReservationStatus},
        product::Entity as ProductEntity,
        product_stock::{self, Entity as ProductStockEntity},
    },
    errors::ServiceError,
    metrics::RESERVATION_SHORTAGES,
};

/// Remaining quantities at or below this are treated as fully covered.
pub const QUANTITY_EPSILON: f64 = 0.0001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReservedAllocation {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: f64,
}

/// A BOM line that could not be covered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaterialShortage {
    pub product_id: Uuid,
    pub required: f64,
    /// Set when no warehouse held any of the material.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<f64>,
    /// Set when stock ran out part way through the allocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReservationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub reservations: Vec<ReservedAllocation>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub insufficient_materials: Vec<MaterialShortage>,
}

impl ReservationOutcome {
    fn reserved(reservations: Vec<ReservedAllocation>) -> Self {
        Self {
            success: true,
            reservations,
            insufficient_materials: Vec::new(),
        }
    }

    fn short(insufficient_materials: Vec<MaterialShortage>) -> Self {
        Self {
            success: false,
            reservations: Vec::new(),
            insufficient_materials,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Availability {
    pub physical: f64,
    pub reserved: f64,
    pub available: f64,
}

/// Warehouse stock considered for one material.
#[derive(Debug, Clone, Copy)]
struct StockCandidate {
    warehouse_id: Uuid,
    physical: f64,
}

/// Reserves every BOM line of an order for `quantity` finished units.
///
/// Runs inside a nested transaction of `db`: on any shortage the inserted
/// rows are rolled back and the outcome lists what was missing.
pub async fn reserve<C>(
    db: &C,
    order_id: Uuid,
    bom_id: Uuid,
    quantity: f64,
    warehouse_id: Option<Uuid>,
) -> Result<ReservationOutcome, ServiceError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await.map_err(ServiceError::db_error)?;

    let items = BomItemEntity::find()
        .filter(bom_item::Column::BomId.eq(bom_id))
        .all(&txn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut reservations = Vec::new();
    let mut shortages = Vec::new();

    for item in &items {
        let required = item.quantity_with_waste() * quantity;
        let candidates = stock_candidates(&txn, item.raw_product_id, warehouse_id).await?;

        if candidates.is_empty() {
            shortages.push(MaterialShortage {
                product_id: item.raw_product_id,
                required,
                available: Some(0.0),
                missing: None,
            });
            continue;
        }

        let held = open_reservations_by_warehouse(&txn, item.raw_product_id, warehouse_id).await?;
        let mut remaining = required;

        for candidate in candidates {
            if remaining <= QUANTITY_EPSILON {
                break;
            }
            let already_reserved = held.get(&candidate.warehouse_id).copied().unwrap_or(0.0);
            let available = candidate.physical - already_reserved;
            if available <= 0.0 {
                continue;
            }

            let amount = available.min(remaining);
            let row = material_reservation::ActiveModel {
                production_order_id: Set(order_id),
                product_id: Set(item.raw_product_id),
                warehouse_id: Set(candidate.warehouse_id),
                quantity_reserved: Set(amount),
                quantity_consumed: Set(0.0),
                status: Set(ReservationStatus::Reserved),
                released_at: Set(None),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;

            reservations.push(ReservedAllocation {
                id: row.id,
                product_id: row.product_id,
                warehouse_id: row.warehouse_id,
                quantity: amount,
            });
            remaining -= amount;
        }

        if remaining > QUANTITY_EPSILON {
            shortages.push(MaterialShortage {
                product_id: item.raw_product_id,
                required,
                available: None,
                missing: Some(remaining),
            });
        }
    }

    if !shortages.is_empty() {
        txn.rollback().await.map_err(ServiceError::db_error)?;
        RESERVATION_SHORTAGES.inc();
        warn!(
            %order_id,
            shortages = shortages.len(),
            "materials could not be reserved"
        );
        return Ok(ReservationOutcome::short(shortages));
    }

    txn.commit().await.map_err(ServiceError::db_error)?;
    info!(%order_id, rows = reservations.len(), "materials reserved");
    Ok(ReservationOutcome::reserved(reservations))
}

/// Stock a material can be reserved from, richest warehouse first.
async fn stock_candidates<C>(
    db: &C,
    product_id: Uuid,
    warehouse_id: Option<Uuid>,
) -> Result<Vec<StockCandidate>, ServiceError>
where
    C: ConnectionTrait,
{
    let Some(warehouse_id) = warehouse_id else {
        let rows = ProductStockEntity::find()
            .filter(product_stock::Column::ProductId.eq(product_id))
            .filter(product_stock::Column::Stock.gt(0.0))
            .order_by_desc(product_stock::Column::Stock)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        return Ok(rows
            .into_iter()
            .map(|row| StockCandidate {
                warehouse_id: row.warehouse_id,
                physical: row.stock,
            })
            .collect());
    };

    let row = super::stock::find_warehouse_stock(db, product_id, warehouse_id).await?;
    if let Some(row) = row.filter(|row| row.stock > 0.0) {
        return Ok(vec![StockCandidate {
            warehouse_id,
            physical: row.stock,
        }]);
    }

    // Stock kept only at product level is attributed to the requested warehouse.
    let global = ProductEntity::find_by_id(product_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .map(|product| product.stock)
        .unwrap_or(0.0);
    if global > 0.0 {
        debug!(%product_id, %warehouse_id, global, "using product-level stock");
    }

    Ok(vec![StockCandidate {
        warehouse_id,
        physical: global.max(0.0),
    }])
}

/// Σ(reserved − consumed) of open reservations of a product, per warehouse.
async fn open_reservations_by_warehouse<C>(
    db: &C,
    product_id: Uuid,
    warehouse_id: Option<Uuid>,
) -> Result<HashMap<Uuid, f64>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut query = ReservationEntity::find()
        .filter(material_reservation::Column::ProductId.eq(product_id))
        .filter(material_reservation::Column::Status.eq(ReservationStatus::Reserved));
    if let Some(warehouse_id) = warehouse_id {
        query = query.filter(material_reservation::Column::WarehouseId.eq(warehouse_id));
    }

    let mut held = HashMap::new();
    for row in query.all(db).await.map_err(ServiceError::db_error)? {
        *held.entry(row.warehouse_id).or_insert(0.0) += row.open_quantity();
    }
    Ok(held)
}

/// Marks every open reservation of an order as released.
pub async fn release<C>(db: &C, order_id: Uuid) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let result = ReservationEntity::update_many()
        .col_expr(
            material_reservation::Column::Status,
            Expr::value(ReservationStatus::Released),
        )
        .col_expr(
            material_reservation::Column::ReleasedAt,
            Expr::value(Some(Utc::now())),
        )
        .filter(material_reservation::Column::ProductionOrderId.eq(order_id))
        .filter(material_reservation::Column::Status.eq(ReservationStatus::Reserved))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;

    debug!(%order_id, released = result.rows_affected, "reservations released");
    Ok(result.rows_affected)
}

/// Marks every open reservation of an order as fully consumed.
pub async fn consume<C>(db: &C, order_id: Uuid) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let result = ReservationEntity::update_many()
        .col_expr(
            material_reservation::Column::Status,
            Expr::value(ReservationStatus::FullyConsumed),
        )
        .col_expr(
            material_reservation::Column::QuantityConsumed,
            Expr::col(material_reservation::Column::QuantityReserved).into(),
        )
        .filter(material_reservation::Column::ProductionOrderId.eq(order_id))
        .filter(material_reservation::Column::Status.eq(ReservationStatus::Reserved))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;

    debug!(%order_id, consumed = result.rows_affected, "reservations consumed");
    Ok(result.rows_affected)
}

pub async fn availability<C>(db: &C, product_id: Uuid) -> Result<Availability, ServiceError>
where
    C: ConnectionTrait,
{
    let physical: f64 = ProductStockEntity::find()
        .filter(product_stock::Column::ProductId.eq(product_id))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?
        .iter()
        .map(|row| row.stock)
        .sum();

    let reserved: f64 = open_reservations_by_warehouse(db, product_id, None)
        .await?
        .values()
        .sum();

    Ok(Availability {
        physical,
        reserved,
        available: physical - reserved,
    })
}

pub async fn list_for_order<C>(
    db: &C,
    order_id: Uuid,
) -> Result<Vec<material_reservation::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    ReservationEntity::find()
        .filter(material_reservation::Column::ProductionOrderId.eq(order_id))
        .order_by_asc(material_reservation::Column::ReservedAt)
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Read-side facade over the reservation functions for HTTP handlers.
#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
}

impl ReservationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn availability(&self, product_id: Uuid) -> Result<Availability, ServiceError> {
        availability(&*self.db, product_id).await
    }

    #[instrument(skip(self))]
    pub async fn list_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<material_reservation::Model>, ServiceError> {
        list_for_order(&*self.db, order_id).await
    }
}
