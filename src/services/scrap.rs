//! Production scrap: the waste ledger written by order completion and by
//! hand, with disposal tracking and value statistics.

use chrono::{NaiveDate, Utc};
use sea_orm::{
    sea_query::{Expr, Func, SimpleExpr},
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter,
    QueryOrder, QuerySelect, Select, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        product::{self, Entity as ProductEntity},
        production_order::{self, Entity as ProductionOrderEntity},
        production_scrap::{self, DisposalStatus, Entity as ScrapEntity, ScrapType},
        warehouse::{self, Entity as WarehouseEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock_movements::day_start,
};

const ENTITY_TYPE: &str = "production_scrap";
const TOP_PRODUCTS: u64 = 10;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ScrapFilter {
    pub production_order_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub scrap_type: Option<ScrapType>,
    pub disposal_status: Option<DisposalStatus>,
    /// Inclusive, `YYYY-MM-DD`
    pub start_date: Option<NaiveDate>,
    /// Inclusive, `YYYY-MM-DD`
    pub end_date: Option<NaiveDate>,
}

/// A scrap row with the names a listing shows next to it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapView {
    #[serde(flatten)]
    pub scrap: production_scrap::Model,
    pub order_number: Option<String>,
    pub finished_product_name: Option<String>,
    pub scrap_product_name: Option<String>,
    pub scrap_product_sku: Option<String>,
    pub warehouse_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateScrap {
    pub production_order_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    #[validate(range(min = 0.000001))]
    pub quantity: f64,
    #[validate(length(max = 50))]
    pub unit: Option<String>,
    pub scrap_type: Option<ScrapType>,
    pub reason: Option<String>,
    #[validate(range(min = 0.0))]
    pub unit_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDisposal {
    pub disposal_status: DisposalStatus,
    pub disposal_notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapSummary {
    pub total_records: u64,
    pub total_quantity: f64,
    pub total_value: f64,
    pub avg_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapTypeStat {
    pub scrap_type: ScrapType,
    pub count: u64,
    pub total_quantity: f64,
    pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisposalStat {
    pub disposal_status: DisposalStatus,
    pub count: u64,
    pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapProductStat {
    pub id: Uuid,
    pub name: Option<String>,
    pub sku: Option<String>,
    pub scrap_count: u64,
    pub total_quantity: f64,
    pub total_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapStats {
    pub summary: ScrapSummary,
    pub by_type: Vec<ScrapTypeStat>,
    pub by_status: Vec<DisposalStat>,
    pub top_products: Vec<ScrapProductStat>,
}

#[derive(Debug, FromQueryResult)]
struct SummaryRow {
    total_records: i64,
    total_quantity: Option<f64>,
    total_value: Option<f64>,
    avg_value: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct TypeRow {
    scrap_type: ScrapType,
    count: i64,
    total_quantity: Option<f64>,
    total_value: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct StatusRow {
    disposal_status: DisposalStatus,
    count: i64,
    total_value: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct ProductRow {
    product_id: Uuid,
    scrap_count: i64,
    total_quantity: Option<f64>,
    total_value: Option<f64>,
}

fn apply_created_range(
    mut query: Select<ScrapEntity>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Select<ScrapEntity> {
    if let Some(start) = start {
        query = query.filter(production_scrap::Column::CreatedAt.gte(day_start(start)));
    }
    if let Some(next_day) = end.and_then(|end| end.succ_opt()) {
        query = query.filter(production_scrap::Column::CreatedAt.lt(day_start(next_day)));
    }
    query
}

fn count(value: i64) -> u64 {
    value.max(0) as u64
}

/// Scrap value, as recorded: `unit_cost × quantity`.
pub fn scrap_value(unit_cost: Option<f64>, quantity: f64) -> f64 {
    unit_cost.unwrap_or(0.0) * quantity
}

#[derive(Clone)]
pub struct ScrapService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ScrapService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Scrap records, newest first.
    #[instrument(skip(self))]
    pub async fn list(&self, filter: ScrapFilter) -> Result<Vec<ScrapView>, ServiceError> {
        let mut query = ScrapEntity::find();
        if let Some(order_id) = filter.production_order_id {
            query = query.filter(production_scrap::Column::ProductionOrderId.eq(order_id));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(production_scrap::Column::ProductId.eq(product_id));
        }
        if let Some(scrap_type) = filter.scrap_type {
            query = query.filter(production_scrap::Column::ScrapType.eq(scrap_type));
        }
        if let Some(status) = filter.disposal_status {
            query = query.filter(production_scrap::Column::DisposalStatus.eq(status));
        }
        let rows = apply_created_range(query, filter.start_date, filter.end_date)
            .order_by_desc(production_scrap::Column::CreatedAt)
            .order_by_desc(production_scrap::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        self.with_names(rows).await
    }

    /// Scrap of one order; unknown orders are a 404 rather than an empty list.
    #[instrument(skip(self))]
    pub async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<ScrapView>, ServiceError> {
        ProductionOrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Production order", order_id))?;
        self.list(ScrapFilter {
            production_order_id: Some(order_id),
            ..Default::default()
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<ScrapView, ServiceError> {
        let scrap = self.find(id).await?;
        let mut views = self.with_names(vec![scrap]).await?;
        views
            .pop()
            .ok_or_else(|| ServiceError::not_found("Scrap record", id))
    }

    /// Records scrap by hand against an existing order.
    #[instrument(skip(self))]
    pub async fn create(&self, input: CreateScrap, actor: &str) -> Result<ScrapView, ServiceError> {
        input.validate()?;
        let db = &*self.db;

        ProductionOrderEntity::find_by_id(input.production_order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::not_found("Production order", input.production_order_id)
            })?;
        ProductEntity::find_by_id(input.product_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Product", input.product_id))?;

        let total_value = scrap_value(input.unit_cost, input.quantity);
        let scrap = production_scrap::ActiveModel {
            production_order_id: Set(input.production_order_id),
            product_id: Set(input.product_id),
            warehouse_id: Set(input.warehouse_id),
            quantity: Set(input.quantity),
            unit: Set(input.unit),
            scrap_type: Set(input.scrap_type.unwrap_or_default()),
            reason: Set(input.reason),
            unit_cost: Set(input.unit_cost.unwrap_or(0.0)),
            total_value: Set(total_value),
            created_by: Set(Some(actor.to_string())),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(
            scrap_id = %scrap.id,
            order_id = %scrap.production_order_id,
            quantity = scrap.quantity,
            total_value,
            "scrap recorded"
        );
        self.event_sender
            .send_or_log(Event::entity_changed(ENTITY_TYPE, Some(scrap.id), actor))
            .await;
        self.get(scrap.id).await
    }

    /// Moves scrap through disposal. Leaving the plant stamps the disposal date;
    /// returning to PENDING keeps the earlier one.
    #[instrument(skip(self))]
    pub async fn update_disposal(
        &self,
        id: Uuid,
        input: UpdateDisposal,
        actor: &str,
    ) -> Result<production_scrap::Model, ServiceError> {
        let scrap = self.find(id).await?;

        let mut active: production_scrap::ActiveModel = scrap.into();
        active.disposal_status = Set(input.disposal_status);
        if input.disposal_status.is_final() {
            active.disposal_date = Set(Some(Utc::now()));
        }
        active.disposal_notes = Set(input.disposal_notes);
        let updated = active
            .update(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        info!(scrap_id = %id, status = %updated.disposal_status, "scrap disposal updated");
        self.event_sender
            .send_or_log(Event::entity_changed(ENTITY_TYPE, Some(id), actor))
            .await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, actor: &str) -> Result<(), ServiceError> {
        self.find(id).await?;
        ScrapEntity::delete_by_id(id)
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        info!(scrap_id = %id, "scrap record deleted");
        self.event_sender
            .send_or_log(Event::entity_deleted(ENTITY_TYPE, id, actor))
            .await;
        Ok(())
    }

    /// Totals, by type, by disposal status and the ten costliest products.
    #[instrument(skip(self))]
    pub async fn stats(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<ScrapStats, ServiceError> {
        let db = &*self.db;
        let scoped = || apply_created_range(ScrapEntity::find(), start_date, end_date);
        let id = || Expr::col(production_scrap::Column::Id).count();
        let quantity =
            || SimpleExpr::from(Func::sum(Expr::col(production_scrap::Column::Quantity)));
        let value = || SimpleExpr::from(Func::sum(Expr::col(production_scrap::Column::TotalValue)));

        let summary = scoped()
            .select_only()
            .column_as(id(), "total_records")
            .column_as(quantity(), "total_quantity")
            .column_as(value(), "total_value")
            .column_as(
                SimpleExpr::from(Func::avg(Expr::col(production_scrap::Column::TotalValue))),
                "avg_value",
            )
            .into_model::<SummaryRow>()
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .map(|row| ScrapSummary {
                total_records: count(row.total_records),
                total_quantity: row.total_quantity.unwrap_or(0.0),
                total_value: row.total_value.unwrap_or(0.0),
                avg_value: row.avg_value.unwrap_or(0.0),
            })
            .unwrap_or_default();

        let by_type = scoped()
            .select_only()
            .column(production_scrap::Column::ScrapType)
            .column_as(id(), "count")
            .column_as(quantity(), "total_quantity")
            .column_as(value(), "total_value")
            .group_by(production_scrap::Column::ScrapType)
            .order_by_desc(value())
            .into_model::<TypeRow>()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|row| ScrapTypeStat {
                scrap_type: row.scrap_type,
                count: count(row.count),
                total_quantity: row.total_quantity.unwrap_or(0.0),
                total_value: row.total_value.unwrap_or(0.0),
            })
            .collect();

        let by_status = scoped()
            .select_only()
            .column(production_scrap::Column::DisposalStatus)
            .column_as(id(), "count")
            .column_as(value(), "total_value")
            .group_by(production_scrap::Column::DisposalStatus)
            .into_model::<StatusRow>()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|row| DisposalStat {
                disposal_status: row.disposal_status,
                count: count(row.count),
                total_value: row.total_value.unwrap_or(0.0),
            })
            .collect();

        let product_rows = scoped()
            .select_only()
            .column(production_scrap::Column::ProductId)
            .column_as(id(), "scrap_count")
            .column_as(quantity(), "total_quantity")
            .column_as(value(), "total_value")
            .group_by(production_scrap::Column::ProductId)
            .order_by_desc(value())
            .limit(TOP_PRODUCTS)
            .into_model::<ProductRow>()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let products: HashMap<Uuid, product::Model> = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_rows.iter().map(|r| r.product_id)))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let top_products = product_rows
            .into_iter()
            .map(|row| {
                let product = products.get(&row.product_id);
                ScrapProductStat {
                    id: row.product_id,
                    name: product.map(|p| p.name.clone()),
                    sku: product.map(|p| p.sku.clone()),
                    scrap_count: count(row.scrap_count),
                    total_quantity: row.total_quantity.unwrap_or(0.0),
                    total_value: row.total_value.unwrap_or(0.0),
                }
            })
            .collect();

        Ok(ScrapStats {
            summary,
            by_type,
            by_status,
            top_products,
        })
    }

    async fn find(&self, id: Uuid) -> Result<production_scrap::Model, ServiceError> {
        ScrapEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Scrap record", id))
    }

    async fn with_names(
        &self,
        rows: Vec<production_scrap::Model>,
    ) -> Result<Vec<ScrapView>, ServiceError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let db = &*self.db;

        let order_ids: HashSet<Uuid> = rows.iter().map(|s| s.production_order_id).collect();
        let orders: HashMap<Uuid, production_order::Model> = ProductionOrderEntity::find()
            .filter(production_order::Column::Id.is_in(order_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();

        let product_ids: HashSet<Uuid> = rows
            .iter()
            .map(|s| s.product_id)
            .chain(orders.values().map(|o| o.finished_product_id))
            .collect();
        let products: HashMap<Uuid, product::Model> = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let warehouse_ids: HashSet<Uuid> = rows.iter().filter_map(|s| s.warehouse_id).collect();
        let warehouses: HashMap<Uuid, warehouse::Model> = if warehouse_ids.is_empty() {
            HashMap::new()
        } else {
            WarehouseEntity::find()
                .filter(warehouse::Column::Id.is_in(warehouse_ids))
                .all(db)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|w| (w.id, w))
                .collect()
        };

        Ok(rows
            .into_iter()
            .map(|scrap| {
                let order = orders.get(&scrap.production_order_id);
                let scrap_product = products.get(&scrap.product_id);
                ScrapView {
                    order_number: order.map(|o| o.order_number.clone()),
                    finished_product_name: order
                        .and_then(|o| products.get(&o.finished_product_id))
                        .map(|p| p.name.clone()),
                    scrap_product_name: scrap_product.map(|p| p.name.clone()),
                    scrap_product_sku: scrap_product.map(|p| p.sku.clone()),
                    warehouse_name: scrap
                        .warehouse_id
                        .and_then(|id| warehouses.get(&id))
                        .map(|w| w.name.clone()),
                    scrap,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Some(2.5), 4.0, 10.0 ; "priced")]
    #[test_case(None, 4.0, 0.0 ; "unpriced")]
    fn scrap_value_is_unit_cost_times_quantity(
        unit_cost: Option<f64>,
        quantity: f64,
        expected: f64,
    ) {
        assert_eq!(scrap_value(unit_cost, quantity), expected);
    }

    #[test]
    fn create_rejects_non_positive_quantity() {
        let input = CreateScrap {
            production_order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            warehouse_id: None,
            quantity: 0.0,
            unit: None,
            scrap_type: None,
            reason: None,
            unit_cost: None,
        };
        assert!(input.validate().is_err());
    }
}
