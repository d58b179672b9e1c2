use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    sea_query::{Expr, Func, SimpleExpr},
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        product::{self, Entity as ProductEntity},
        stock_movement::{self, Entity as StockMovementEntity, MovementType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        map_txn_error,
        stock::{
            add_to_warehouse_stock, adjust_product_stock, default_warehouse, record_movement,
            NewMovement,
        },
        Pagination,
    },
};

const DEFAULT_LIMIT: u64 = 100;
const RECONCILE_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct MovementFilter {
    pub product_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    /// Inclusive, `YYYY-MM-DD`
    pub start_date: Option<NaiveDate>,
    /// Inclusive, `YYYY-MM-DD`
    pub end_date: Option<NaiveDate>,
    pub warehouse_id: Option<Uuid>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementView {
    #[serde(flatten)]
    pub movement: stock_movement::Model,
    pub product_name: Option<String>,
    pub product_sku: Option<String>,
    pub product_unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MovementPage {
    pub movements: Vec<MovementView>,
    pub pagination: Pagination,
}

/// One line of a product's stock card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub movement_type: MovementType,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub description: Option<String>,
    pub warehouse_id: Option<Uuid>,
    pub in_qty: f64,
    pub out_qty: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateMovement {
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    pub qty_change: f64,
    pub movement_type: MovementType,
    #[validate(length(max = 50))]
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    #[validate(range(min = 0.0))]
    pub unit_cost: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementStat {
    pub movement_type: MovementType,
    pub count: u64,
    pub total_quantity: f64,
    pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockDiscrepancy {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub current_stock: f64,
    pub calculated_stock: f64,
    pub difference: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub total_products: usize,
    pub discrepancies_found: usize,
    pub discrepancies: Vec<StockDiscrepancy>,
}

#[derive(Debug, FromQueryResult)]
struct MovementTotals {
    movement_type: MovementType,
    count: i64,
    total_quantity: Option<f64>,
    total_value: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct LedgerTotal {
    product_id: Uuid,
    total: Option<f64>,
}

pub(crate) fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn apply_date_range(
    mut query: Select<StockMovementEntity>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Select<StockMovementEntity> {
    if let Some(start) = start {
        query = query.filter(stock_movement::Column::MovementDate.gte(day_start(start)));
    }
    if let Some(next_day) = end.and_then(|end| end.succ_opt()) {
        query = query.filter(stock_movement::Column::MovementDate.lt(day_start(next_day)));
    }
    query
}

/// Folds movements (oldest first) into a stock card, newest first.
pub fn running_balance(movements: Vec<stock_movement::Model>) -> Vec<HistoryEntry> {
    let mut balance = 0.0;
    let mut entries: Vec<HistoryEntry> = movements
        .into_iter()
        .map(|m| {
            let in_qty = m.qty_change.max(0.0);
            let out_qty = (-m.qty_change).max(0.0);
            balance += in_qty - out_qty;
            HistoryEntry {
                id: m.id,
                date: m.movement_date,
                movement_type: m.movement_type,
                reference_type: m.reference_type,
                reference_id: m.reference_id,
                description: m.notes,
                warehouse_id: m.warehouse_id,
                in_qty,
                out_qty,
                balance,
            }
        })
        .collect();
    entries.reverse();
    entries
}

#[derive(Clone)]
pub struct StockMovementService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockMovementService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, filter: MovementFilter) -> Result<MovementPage, ServiceError> {
        let db = &*self.db;
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT);
        let offset = filter.offset.unwrap_or(0);

        let mut query = StockMovementEntity::find();
        if let Some(product_id) = filter.product_id {
            query = query.filter(stock_movement::Column::ProductId.eq(product_id));
        }
        if let Some(movement_type) = filter.movement_type {
            query = query.filter(stock_movement::Column::MovementType.eq(movement_type));
        }
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(stock_movement::Column::WarehouseId.eq(warehouse_id));
        }
        query = apply_date_range(query, filter.start_date, filter.end_date);

        let total = query
            .clone()
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;

        let rows = query
            .order_by_desc(stock_movement::Column::MovementDate)
            .order_by_desc(stock_movement::Column::Id)
            .limit(limit)
            .offset(offset)
            .find_also_related(ProductEntity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let movements: Vec<MovementView> = rows
            .into_iter()
            .map(|(movement, product)| MovementView {
                movement,
                product_name: product.as_ref().map(|p| p.name.clone()),
                product_sku: product.as_ref().map(|p| p.sku.clone()),
                product_unit: product.and_then(|p| p.unit),
            })
            .collect();

        let pagination = Pagination::new(total, limit, offset, movements.len());
        Ok(MovementPage {
            movements,
            pagination,
        })
    }

    /// Stock card of one product. With a warehouse, movements without a
    /// warehouse are included as well.
    #[instrument(skip(self))]
    pub async fn product_history(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<Vec<HistoryEntry>, ServiceError> {
        let mut query =
            StockMovementEntity::find().filter(stock_movement::Column::ProductId.eq(product_id));
        if let Some(warehouse_id) = warehouse_id {
            query = query.filter(
                sea_orm::Condition::any()
                    .add(stock_movement::Column::WarehouseId.eq(warehouse_id))
                    .add(stock_movement::Column::WarehouseId.is_null()),
            );
        }
        let movements = query
            .order_by_asc(stock_movement::Column::MovementDate)
            .order_by_asc(stock_movement::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(running_balance(movements))
    }

    /// Records a manual movement and applies it to product and warehouse stock.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        input: CreateMovement,
        actor: &str,
    ) -> Result<stock_movement::Model, ServiceError> {
        input.validate()?;
        let actor_name = actor.to_string();

        let movement = self
            .db
            .transaction::<_, stock_movement::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let product = ProductEntity::find_by_id(input.product_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| ServiceError::not_found("Product", input.product_id))?;

                    let mut movement =
                        NewMovement::new(product.id, input.qty_change, input.movement_type)
                            .warehouse(input.warehouse_id)
                            .created_by(&actor_name);
                    movement.reference_type = input.reference_type;
                    movement.reference_id = input.reference_id;
                    movement.unit_cost = Some(input.unit_cost.unwrap_or(product.cost));
                    movement.notes = input.notes;
                    let recorded = record_movement(txn, movement).await?;

                    adjust_product_stock(txn, product.id, input.qty_change).await?;

                    let warehouse_id = match input.warehouse_id {
                        Some(id) => Some(id),
                        None => default_warehouse(txn).await?.map(|w| w.id),
                    };
                    match warehouse_id {
                        Some(warehouse_id) => {
                            add_to_warehouse_stock(txn, product.id, warehouse_id, input.qty_change)
                                .await?
                        }
                        None => {
                            warn!(product_id = %product.id, "no warehouse to book movement into")
                        }
                    }
                    Ok(recorded)
                })
            })
            .await
            .map_err(map_txn_error)?;

        info!(
            movement_id = %movement.id,
            product_id = %movement.product_id,
            qty_change = movement.qty_change,
            movement_type = %movement.movement_type,
            "stock movement recorded"
        );
        metrics::counter!("inventory.movements", 1, "type" => movement.movement_type.to_string());
        self.event_sender
            .send_or_log(Event::StockUpdated {
                product_id: movement.product_id,
                warehouse_id: movement.warehouse_id,
                change_type: movement.movement_type,
                updated_by: actor.to_string(),
            })
            .await;
        Ok(movement)
    }

    /// Count, absolute quantity and value per movement type.
    #[instrument(skip(self))]
    pub async fn stats(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<MovementStat>, ServiceError> {
        let qty = SimpleExpr::from(Func::abs(Expr::col(stock_movement::Column::QtyChange)));
        let value = qty.clone().mul(Func::coalesce([
            Expr::col(stock_movement::Column::UnitCost).into(),
            Expr::val(0.0).into(),
        ]));

        let rows = apply_date_range(StockMovementEntity::find(), start_date, end_date)
            .select_only()
            .column(stock_movement::Column::MovementType)
            .column_as(Expr::col(stock_movement::Column::Id).count(), "count")
            .column_as(SimpleExpr::from(Func::sum(qty)), "total_quantity")
            .column_as(SimpleExpr::from(Func::sum(value)), "total_value")
            .group_by(stock_movement::Column::MovementType)
            .order_by_asc(stock_movement::Column::MovementType)
            .into_model::<MovementTotals>()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| MovementStat {
                movement_type: row.movement_type,
                count: row.count.max(0) as u64,
                total_quantity: row.total_quantity.unwrap_or(0.0),
                total_value: row.total_value.unwrap_or(0.0),
            })
            .collect())
    }

    /// Products whose stored stock disagrees with their movement ledger.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport, ServiceError> {
        let db = &*self.db;
        let products = ProductEntity::find()
            .order_by_asc(product::Column::Name)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let ledger: HashMap<Uuid, f64> = StockMovementEntity::find()
            .select_only()
            .column(stock_movement::Column::ProductId)
            .column_as(
                SimpleExpr::from(Func::sum(Expr::col(stock_movement::Column::QtyChange))),
                "total",
            )
            .group_by(stock_movement::Column::ProductId)
            .into_model::<LedgerTotal>()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|row| (row.product_id, row.total.unwrap_or(0.0)))
            .collect();

        let total_products = products.len();
        let discrepancies: Vec<StockDiscrepancy> = products
            .into_iter()
            .filter_map(|p| {
                let calculated = ledger.get(&p.id).copied().unwrap_or(0.0);
                let difference = p.stock - calculated;
                (difference.abs() > RECONCILE_TOLERANCE).then(|| StockDiscrepancy {
                    product_id: p.id,
                    product_name: p.name,
                    sku: p.sku,
                    current_stock: p.stock,
                    calculated_stock: calculated,
                    difference,
                })
            })
            .collect();

        if !discrepancies.is_empty() {
            warn!(
                count = discrepancies.len(),
                "stock ledger discrepancies found"
            );
        }
        Ok(ReconcileReport {
            total_products,
            discrepancies_found: discrepancies.len(),
            discrepancies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn movement(qty: f64, minutes: i64) -> stock_movement::Model {
        let at = Utc::now() + chrono::Duration::minutes(minutes);
        stock_movement::Model {
            id: Uuid::new_v4(),
            movement_date: at,
            product_id: Uuid::nil(),
            warehouse_id: None,
            qty_change: qty,
            movement_type: if qty >= 0.0 {
                MovementType::Purchase
            } else {
                MovementType::ProductionUse
            },
            reference_type: None,
            reference_id: None,
            unit_cost: None,
            notes: None,
            created_by: None,
            created_at: at,
        }
    }

    #[test]
    fn running_balance_is_returned_newest_first() {
        let entries = running_balance(vec![movement(10.0, 0), movement(-4.0, 1), movement(2.5, 2)]);
        let balances: Vec<f64> = entries.iter().map(|e| e.balance).collect();
        assert_eq!(balances, vec![8.5, 6.0, 10.0]);
        assert_eq!(entries[1].out_qty, 4.0);
        assert_eq!(entries[1].in_qty, 0.0);
    }

    #[test]
    fn end_date_includes_the_whole_day() {
        let end = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let next = day_start(end.succ_opt().unwrap());
        assert_eq!(next.to_rfc3339(), "2025-03-02T00:00:00+00:00");
    }

    proptest! {
        #[test]
        fn latest_balance_is_the_sum_of_changes(
            changes in proptest::collection::vec(-1000.0f64..1000.0, 1..40)
        ) {
            let total: f64 = changes.iter().sum();
            let entries = running_balance(
                changes
                    .iter()
                    .enumerate()
                    .map(|(i, qty)| movement(*qty, i as i64))
                    .collect(),
            );
            prop_assert_eq!(entries.len(), changes.len());
            prop_assert!((entries[0].balance - total).abs() < 1e-6);
            for entry in &entries {
                prop_assert!(entry.in_qty >= 0.0 && entry.out_qty >= 0.0);
            }
        }
    }
}
