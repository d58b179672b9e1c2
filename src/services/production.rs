//! Production orders: planning, material reservation, stock consumption,
//! completion with cost variances, and reversal on cancel or delete.

use chrono::{NaiveDate, Utc};
use rand::{distributions::Alphanumeric, Rng};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, Iterable, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        bom::{self, Entity as BomEntity},
        bom_item::{self, Entity as BomItemEntity},
        material_reservation::{self, Entity as ReservationEntity},
        product::{self, Entity as ProductEntity},
        production_order::{self, Entity as ProductionOrderEntity, ProductionStatus},
        production_scrap::{self, Entity as ScrapEntity, ScrapType},
        stock_movement::{
            self, Entity as StockMovementEntity, MovementType, REFERENCE_PRODUCTION_ORDER,
        },
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::record_transition,
    services::{
        bom::material_cost_per_unit,
        map_txn_error,
        reservations::{self, ReservationOutcome},
        scrap::scrap_value,
        stock::{
            add_to_warehouse_stock, adjust_product_stock, adjust_warehouse_stock,
            find_warehouse_stock, insert_warehouse_stock, record_movement, NewMovement,
        },
        Pagination,
    },
};

const DEFAULT_LIMIT: u64 = 50;
const ENTITY_TYPE: &str = "production_orders";

/// `PO-YYYYMMDD-XXXXXX`
pub fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!("PO-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

/// Status filter of the order list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    /// PLANNED or CONFIRMED
    Pending,
    Only(ProductionStatus),
}

impl FromStr for StatusFilter {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALL" => Ok(Self::All),
            "PENDING" => Ok(Self::Pending),
            other => ProductionStatus::from_str(other)
                .map(Self::Only)
                .map_err(|_| {
                    ServiceError::ValidationError(format!("Unknown status filter {}", other))
                }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ProductionOrderFilter {
    /// `ALL`, `PENDING` or a status
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub product_id: Option<Uuid>,
    /// Substring of the order number or finished product name
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductionOrderView {
    #[serde(flatten)]
    pub order: production_order::Model,
    pub bom_name: Option<String>,
    pub finished_product_name: Option<String>,
    pub finished_product_sku: Option<String>,
    pub finished_product_unit: Option<String>,
    pub cost_per_unit: Option<f64>,
}

impl ProductionOrderView {
    fn new(
        order: production_order::Model,
        product: Option<product::Model>,
        bom_name: Option<String>,
    ) -> Self {
        Self {
            cost_per_unit: order.cost_per_unit(),
            bom_name,
            finished_product_name: product.as_ref().map(|p| p.name.clone()),
            finished_product_sku: product.as_ref().map(|p| p.sku.clone()),
            finished_product_unit: product.and_then(|p| p.unit),
            order,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductionStats {
    pub total: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductionOrderPage {
    pub orders: Vec<ProductionOrderView>,
    pub stats: ProductionStats,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductionOrder {
    #[validate(length(min = 1, max = 50))]
    pub order_number: Option<String>,
    pub bom_id: Uuid,
    /// Defaults to the BOM's finished product
    pub finished_product_id: Option<Uuid>,
    #[validate(range(min = 0.000001))]
    pub qty_planned: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Used for both source and destination when those are not given
    pub warehouse_id: Option<Uuid>,
    pub source_warehouse_id: Option<Uuid>,
    pub dest_warehouse_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductionOrder {
    #[validate(range(min = 0.000001))]
    pub qty_planned: Option<f64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapEntry {
    pub product_id: Uuid,
    #[validate(range(min = 0.0))]
    pub quantity: f64,
    pub unit: Option<String>,
    pub scrap_type: Option<ScrapType>,
    pub reason: Option<String>,
    #[validate(range(min = 0.0))]
    pub unit_cost: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinishProduction {
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub qty_finished: f64,
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub qty_scrapped: f64,
    #[validate]
    #[serde(default)]
    pub scrap_entries: Vec<ScrapEntry>,
}

/// What deleting an order had to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionOutcome {
    Deleted,
    MaterialsReturned,
    CompletedReversed,
}

impl DeletionOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::Deleted => "Production order deleted",
            Self::MaterialsReturned => {
                "Production order deleted and consumed materials returned to stock"
            }
            Self::CompletedReversed => {
                "Completed production order deleted: finished goods removed and materials returned to stock"
            }
        }
    }
}

/// Σ qty_with_waste × planned × raw cost.
fn standard_material_cost(
    lines: &[(bom_item::Model, Option<product::Model>)],
    qty_planned: f64,
) -> f64 {
    lines
        .iter()
        .map(|(item, raw)| {
            item.quantity_with_waste() * qty_planned * raw.as_ref().map_or(0.0, |p| p.cost)
        })
        .sum()
}

async fn bom_lines<C>(
    db: &C,
    bom_id: Uuid,
) -> Result<Vec<(bom_item::Model, Option<product::Model>)>, ServiceError>
where
    C: ConnectionTrait,
{
    BomItemEntity::find()
        .filter(bom_item::Column::BomId.eq(bom_id))
        .find_also_related(ProductEntity)
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

async fn find_order<C>(db: &C, id: Uuid) -> Result<production_order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    ProductionOrderEntity::find_by_id(id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Production order", id))
}

async fn production_use_movements<C>(
    db: &C,
    order_id: Uuid,
) -> Result<Vec<(stock_movement::Model, Option<product::Model>)>, ServiceError>
where
    C: ConnectionTrait,
{
    StockMovementEntity::find()
        .filter(stock_movement::Column::ReferenceType.eq(REFERENCE_PRODUCTION_ORDER))
        .filter(stock_movement::Column::ReferenceId.eq(order_id))
        .filter(stock_movement::Column::MovementType.eq(MovementType::ProductionUse))
        .find_also_related(ProductEntity)
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Puts consumed BOM materials back into stock with `ADJUSTMENT` movements.
async fn return_materials(
    txn: &DatabaseTransaction,
    order: &production_order::Model,
    note: &str,
    actor: &str,
) -> Result<(), ServiceError> {
    let source = order.source_warehouse();
    for (item, _) in bom_lines(txn, order.bom_id).await? {
        let consumed = item.quantity_with_waste() * order.qty_planned;
        adjust_product_stock(txn, item.raw_product_id, consumed).await?;
        if let Some(warehouse_id) = source {
            add_to_warehouse_stock(txn, item.raw_product_id, warehouse_id, consumed).await?;
        }
        record_movement(
            txn,
            NewMovement::new(item.raw_product_id, consumed, MovementType::Adjustment)
                .warehouse(source)
                .reference(REFERENCE_PRODUCTION_ORDER, order.id)
                .notes(format!("{} {}", note, order.order_number))
                .created_by(actor),
        )
        .await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct ProductionService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ProductionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: ProductionOrderFilter,
    ) -> Result<ProductionOrderPage, ServiceError> {
        let db = &*self.db;
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT);
        let offset = filter.offset.unwrap_or(0);

        let mut query = ProductionOrderEntity::find().find_also_related(ProductEntity);

        match filter
            .status
            .as_deref()
            .map(StatusFilter::from_str)
            .transpose()?
        {
            None | Some(StatusFilter::All) => {}
            Some(StatusFilter::Pending) => {
                query = query.filter(
                    production_order::Column::Status
                        .is_in([ProductionStatus::Planned, ProductionStatus::Confirmed]),
                )
            }
            Some(StatusFilter::Only(status)) => {
                query = query.filter(production_order::Column::Status.eq(status))
            }
        }
        if let Some(start) = filter.start_date {
            query = query.filter(production_order::Column::StartDate.gte(start));
        }
        if let Some(end) = filter.end_date {
            query = query.filter(production_order::Column::EndDate.lte(end));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(production_order::Column::FinishedProductId.eq(product_id));
        }
        if let Some(search) = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            query = query.filter(
                Condition::any()
                    .add(production_order::Column::OrderNumber.contains(search))
                    .add(product::Column::Name.contains(search)),
            );
        }

        let total = query
            .clone()
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;

        let rows = query
            .order_by_desc(production_order::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let bom_ids: Vec<Uuid> = rows.iter().map(|(order, _)| order.bom_id).collect();
        let bom_names: HashMap<Uuid, String> = BomEntity::find()
            .filter(bom::Column::Id.is_in(bom_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|b| (b.id, b.name))
            .collect();

        let orders: Vec<ProductionOrderView> = rows
            .into_iter()
            .map(|(order, product)| {
                let bom_name = bom_names.get(&order.bom_id).cloned();
                ProductionOrderView::new(order, product, bom_name)
            })
            .collect();

        let pagination = Pagination::new(total, limit, offset, orders.len());
        Ok(ProductionOrderPage {
            orders,
            stats: self.stats().await?,
            pagination,
        })
    }

    /// Counts over all orders, ignoring list filters.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<ProductionStats, ServiceError> {
        let db = &*self.db;
        let mut stats = ProductionStats::default();
        for status in ProductionStatus::iter() {
            let count = ProductionOrderEntity::find()
                .filter(production_order::Column::Status.eq(status))
                .count(db)
                .await
                .map_err(ServiceError::db_error)?;
            stats.total += count;
            match status {
                s if s.is_pending() => stats.pending += count,
                ProductionStatus::InProgress => stats.in_progress += count,
                ProductionStatus::Completed => stats.completed += count,
                ProductionStatus::Cancelled => stats.cancelled += count,
                _ => {}
            }
        }
        Ok(stats)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<ProductionOrderView, ServiceError> {
        let db = &*self.db;
        let (order, product) = ProductionOrderEntity::find_by_id(id)
            .find_also_related(ProductEntity)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Production order", id))?;
        let bom_name = BomEntity::find_by_id(order.bom_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .map(|b| b.name);
        Ok(ProductionOrderView::new(order, product, bom_name))
    }

    /// Plans an order and tries to reserve its materials from the source
    /// warehouse. The order is kept whatever the reservation outcome.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        input: CreateProductionOrder,
        actor: &str,
    ) -> Result<ProductionOrderView, ServiceError> {
        input.validate()?;
        let actor_name = actor.to_string();

        let (order, outcome) = self
            .db
            .transaction::<_, (production_order::Model, Option<ReservationOutcome>), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let bom = BomEntity::find_by_id(input.bom_id)
                            .one(txn)
                            .await
                            .map_err(ServiceError::db_error)?
                            .ok_or_else(|| ServiceError::not_found("BOM", input.bom_id))?;

                        let unit_cost = material_cost_per_unit(txn, bom.id).await?
                            + bom.labor_cost
                            + bom.overhead_cost;
                        let source = input.source_warehouse_id.or(input.warehouse_id);
                        let dest = input.dest_warehouse_id.or(input.warehouse_id);

                        let order = production_order::ActiveModel {
                            order_number: Set(input
                                .order_number
                                .unwrap_or_else(generate_order_number)),
                            bom_id: Set(bom.id),
                            finished_product_id: Set(input
                                .finished_product_id
                                .unwrap_or(bom.finished_product_id)),
                            qty_planned: Set(input.qty_planned),
                            qty_finished: Set(0.0),
                            qty_scrapped: Set(0.0),
                            status: Set(ProductionStatus::Planned),
                            start_date: Set(input.start_date),
                            end_date: Set(input.end_date),
                            actual_start_date: Set(None),
                            actual_end_date: Set(None),
                            warehouse_id: Set(source),
                            source_warehouse_id: Set(source),
                            dest_warehouse_id: Set(dest),
                            notes: Set(input.notes),
                            created_by: Set(Some(actor_name)),
                            standard_cost: Set(unit_cost * input.qty_planned),
                            actual_material_cost: Set(0.0),
                            actual_scrap_cost: Set(0.0),
                            material_variance: Set(0.0),
                            yield_variance: Set(0.0),
                            total_variance: Set(0.0),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                        let outcome = match reservations::reserve(
                            txn,
                            order.id,
                            order.bom_id,
                            order.qty_planned,
                            source,
                        )
                        .await
                        {
                            Ok(outcome) => outcome,
                            Err(err) => {
                                error!(order_id = %order.id, error = %err, "material reservation failed");
                                return Ok((order, None));
                            }
                        };

                        let mut active: production_order::ActiveModel = order.clone().into();
                        if outcome.success {
                            active.status = Set(ProductionStatus::Confirmed);
                        } else {
                            let missing: Vec<String> = outcome
                                .insufficient_materials
                                .iter()
                                .map(|m| m.product_id.to_string())
                                .collect();
                            active.status = Set(ProductionStatus::WaitingMaterials);
                            active.notes = Set(Some(format!(
                                "{}\n[System]: Missing materials: {}",
                                order.notes.clone().unwrap_or_default(),
                                missing.join(", ")
                            )));
                        }
                        let order = active.update(txn).await.map_err(ServiceError::db_error)?;
                        Ok((order, Some(outcome)))
                    })
                },
            )
            .await
            .map_err(map_txn_error)?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            status = %order.status,
            reserved = outcome.as_ref().map(|o| o.reservations.len()).unwrap_or(0),
            "production order created"
        );
        record_transition(&order.status.to_string());
        self.event_sender
            .send_or_log(Event::entity_changed(ENTITY_TYPE, Some(order.id), actor))
            .await;
        self.get(order.id).await
    }

    /// Partial update; absent fields keep their value.
    #[instrument(skip(self))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateProductionOrder,
        actor: &str,
    ) -> Result<ProductionOrderView, ServiceError> {
        input.validate()?;
        let order = find_order(&*self.db, id).await?;

        let mut active: production_order::ActiveModel = order.into();
        if let Some(qty) = input.qty_planned {
            active.qty_planned = Set(qty);
        }
        if input.start_date.is_some() {
            active.start_date = Set(input.start_date);
        }
        if input.end_date.is_some() {
            active.end_date = Set(input.end_date);
        }
        if input.notes.is_some() {
            active.notes = Set(input.notes);
        }
        if input.warehouse_id.is_some() {
            active.warehouse_id = Set(input.warehouse_id);
        }
        active
            .update(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        self.event_sender
            .send_or_log(Event::entity_changed(ENTITY_TYPE, Some(id), actor))
            .await;
        self.get(id).await
    }

    /// Consumes reservations and deducts BOM materials from stock.
    /// Shortages against current stock are logged, not enforced.
    #[instrument(skip(self))]
    pub async fn start(&self, id: Uuid, actor: &str) -> Result<ProductionOrderView, ServiceError> {
        let actor_name = actor.to_string();

        let order = self
            .db
            .transaction::<_, production_order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = find_order(txn, id).await?;
                    if !order.status.can_start() {
                        return Err(ServiceError::InvalidOperation(format!(
                            "Order must be in PLANNED or CONFIRMED status to start (current: {})",
                            order.status
                        )));
                    }

                    let lines = bom_lines(txn, order.bom_id).await?;
                    for (item, raw) in &lines {
                        let required = item.quantity_with_waste() * order.qty_planned;
                        let available = raw.as_ref().map_or(0.0, |p| p.stock);
                        if available < required {
                            warn!(
                                order_id = %order.id,
                                product_id = %item.raw_product_id,
                                required,
                                available,
                                shortage = required - available,
                                "starting production with insufficient stock"
                            );
                        }
                    }

                    reservations::consume(txn, order.id).await?;

                    let source = order.source_warehouse();
                    for (item, raw) in &lines {
                        let required = item.quantity_with_waste() * order.qty_planned;
                        adjust_product_stock(txn, item.raw_product_id, -required).await?;
                        if let Some(warehouse_id) = source {
                            if !adjust_warehouse_stock(
                                txn,
                                item.raw_product_id,
                                warehouse_id,
                                -required,
                            )
                            .await?
                            {
                                warn!(
                                    order_id = %order.id,
                                    product_id = %item.raw_product_id,
                                    %warehouse_id,
                                    "no warehouse stock row; skipping warehouse deduction"
                                );
                            }
                        }
                        let mut movement = NewMovement::new(
                            item.raw_product_id,
                            -required,
                            MovementType::ProductionUse,
                        )
                        .warehouse(source)
                        .reference(REFERENCE_PRODUCTION_ORDER, order.id)
                        .notes(format!(
                            "Production deduction for order {}",
                            order.order_number
                        ))
                        .created_by(&actor_name);
                        movement.unit_cost = raw.as_ref().map(|p| p.cost);
                        record_movement(txn, movement).await?;
                    }

                    let mut active: production_order::ActiveModel = order.into();
                    active.status = Set(ProductionStatus::InProgress);
                    active.actual_start_date = Set(Some(Utc::now()));
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(map_txn_error)?;

        info!(order_id = %order.id, order_number = %order.order_number, "production started");
        record_transition(&ProductionStatus::InProgress.to_string());
        self.event_sender
            .send_or_log(Event::entity_changed(ENTITY_TYPE, Some(order.id), actor))
            .await;
        self.event_sender
            .send_or_log(Event::entity_changed("products", None, actor))
            .await;
        self.get(order.id).await
    }

    /// Books finished goods and scrap, and records cost variances.
    #[instrument(skip(self))]
    pub async fn finish(
        &self,
        id: Uuid,
        input: FinishProduction,
        actor: &str,
    ) -> Result<ProductionOrderView, ServiceError> {
        input.validate()?;
        let started = Instant::now();
        let actor_name = actor.to_string();

        let order = self
            .db
            .transaction::<_, production_order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = find_order(txn, id).await?;
                    if !order.status.can_finish() {
                        return Err(ServiceError::InvalidOperation(format!(
                            "Order must be IN_PROGRESS to finish (current: {})",
                            order.status
                        )));
                    }

                    let lines = bom_lines(txn, order.bom_id).await?;
                    let standard_cost = standard_material_cost(&lines, order.qty_planned);
                    let actual_material_cost: f64 = production_use_movements(txn, order.id)
                        .await?
                        .iter()
                        .map(|(m, p)| m.qty_change.abs() * p.as_ref().map_or(0.0, |p| p.cost))
                        .sum();

                    let good = (input.qty_finished - input.qty_scrapped).max(0.0);
                    let dest = order.dest_warehouse();
                    if good > 0.0 {
                        adjust_product_stock(txn, order.finished_product_id, good).await?;
                        if let Some(warehouse_id) = dest {
                            add_to_warehouse_stock(
                                txn,
                                order.finished_product_id,
                                warehouse_id,
                                good,
                            )
                            .await?;
                        }
                        record_movement(
                            txn,
                            NewMovement::new(
                                order.finished_product_id,
                                good,
                                MovementType::ProductionOutput,
                            )
                            .warehouse(dest)
                            .reference(REFERENCE_PRODUCTION_ORDER, order.id)
                            .notes(format!(
                                "Production output for order {} (good: {}, scrap: {})",
                                order.order_number, good, input.qty_scrapped
                            ))
                            .created_by(&actor_name),
                        )
                        .await?;
                    }

                    let mut actual_scrap_cost = 0.0;
                    if input.qty_scrapped > 0.0 {
                        let finished = ProductEntity::find_by_id(order.finished_product_id)
                            .one(txn)
                            .await
                            .map_err(ServiceError::db_error)?;
                        let unit_cost = finished.as_ref().map_or(0.0, |p| p.cost);
                        let total_value = input.qty_scrapped * unit_cost;
                        actual_scrap_cost += total_value;
                        production_scrap::ActiveModel {
                            production_order_id: Set(order.id),
                            product_id: Set(order.finished_product_id),
                            warehouse_id: Set(order.warehouse_id),
                            quantity: Set(input.qty_scrapped),
                            unit: Set(finished.as_ref().and_then(|p| p.unit.clone())),
                            scrap_type: Set(ScrapType::DefectiveMaterial),
                            reason: Set(Some(format!(
                                "Scrap from production order {} - {}",
                                order.order_number,
                                finished.as_ref().map_or("product", |p| p.name.as_str())
                            ))),
                            unit_cost: Set(unit_cost),
                            total_value: Set(total_value),
                            created_by: Set(Some(actor_name.clone())),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    }

                    for entry in &input.scrap_entries {
                        let unit_cost = entry.unit_cost.unwrap_or(0.0);
                        let total_value = scrap_value(entry.unit_cost, entry.quantity);
                        actual_scrap_cost += total_value;
                        production_scrap::ActiveModel {
                            production_order_id: Set(order.id),
                            product_id: Set(entry.product_id),
                            warehouse_id: Set(order.warehouse_id),
                            quantity: Set(entry.quantity),
                            unit: Set(entry.unit.clone()),
                            scrap_type: Set(entry.scrap_type.unwrap_or_default()),
                            reason: Set(entry.reason.clone()),
                            unit_cost: Set(unit_cost),
                            total_value: Set(total_value),
                            created_by: Set(Some(actor_name.clone())),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    }

                    let material_variance = actual_material_cost - standard_cost;
                    let yield_variance = actual_scrap_cost;

                    let mut active: production_order::ActiveModel = order.into();
                    active.status = Set(ProductionStatus::Completed);
                    active.qty_finished = Set(input.qty_finished);
                    active.qty_scrapped = Set(input.qty_scrapped);
                    active.actual_end_date = Set(Some(Utc::now()));
                    active.standard_cost = Set(standard_cost);
                    active.actual_material_cost = Set(actual_material_cost);
                    active.actual_scrap_cost = Set(actual_scrap_cost);
                    active.material_variance = Set(material_variance);
                    active.yield_variance = Set(yield_variance);
                    active.total_variance = Set(material_variance + yield_variance);
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(map_txn_error)?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            qty_finished = order.qty_finished,
            total_variance = order.total_variance,
            "production completed"
        );
        record_transition(&ProductionStatus::Completed.to_string());
        metrics::histogram!("production.finish.duration_seconds", started.elapsed());

        self.event_sender
            .send_or_log(Event::ProductionCompleted {
                order_id: order.id,
                order_number: order.order_number.clone(),
                product_id: order.finished_product_id,
                qty_finished: order.qty_finished,
                completed_by: actor.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::StockUpdated {
                product_id: order.finished_product_id,
                warehouse_id: order.warehouse_id,
                change_type: MovementType::ProductionOutput,
                updated_by: actor.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::entity_changed("products", None, actor))
            .await;
        self.get(order.id).await
    }

    /// Releases reservations and, for a started order, returns what it consumed.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid, actor: &str) -> Result<ProductionOrderView, ServiceError> {
        let actor_name = actor.to_string();

        let order = self
            .db
            .transaction::<_, production_order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = find_order(txn, id).await?;
                    if !order.status.can_cancel() {
                        return Err(ServiceError::InvalidOperation(
                            "Cannot cancel completed orders".to_string(),
                        ));
                    }

                    reservations::release(txn, order.id).await?;

                    if order.status == ProductionStatus::InProgress {
                        for (movement, _) in production_use_movements(txn, order.id).await? {
                            let returned = -movement.qty_change;
                            adjust_product_stock(txn, movement.product_id, returned).await?;
                            if let Some(warehouse_id) = movement.warehouse_id {
                                if find_warehouse_stock(txn, movement.product_id, warehouse_id)
                                    .await?
                                    .is_some()
                                {
                                    adjust_warehouse_stock(
                                        txn,
                                        movement.product_id,
                                        warehouse_id,
                                        returned,
                                    )
                                    .await?;
                                } else {
                                    // Seed the missing row from the (already restored) global stock.
                                    let global = ProductEntity::find_by_id(movement.product_id)
                                        .one(txn)
                                        .await
                                        .map_err(ServiceError::db_error)?
                                        .map_or(0.0, |p| p.stock);
                                    insert_warehouse_stock(
                                        txn,
                                        movement.product_id,
                                        warehouse_id,
                                        global,
                                    )
                                    .await?;
                                }
                            }
                            record_movement(
                                txn,
                                NewMovement::new(
                                    movement.product_id,
                                    returned,
                                    MovementType::Adjustment,
                                )
                                .warehouse(movement.warehouse_id)
                                .reference(REFERENCE_PRODUCTION_ORDER, order.id)
                                .notes(format!(
                                    "Cancellation reversal for order {}",
                                    order.order_number
                                ))
                                .created_by(&actor_name),
                            )
                            .await?;
                        }
                    }

                    let mut active: production_order::ActiveModel = order.into();
                    active.status = Set(ProductionStatus::Cancelled);
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(map_txn_error)?;

        info!(order_id = %order.id, order_number = %order.order_number, "production order cancelled");
        record_transition(&ProductionStatus::Cancelled.to_string());
        self.event_sender
            .send_or_log(Event::entity_changed(ENTITY_TYPE, Some(order.id), actor))
            .await;
        self.get(order.id).await
    }

    /// Deletes an order with everything it wrote, reversing its stock effects.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, actor: &str) -> Result<DeletionOutcome, ServiceError> {
        let actor_name = actor.to_string();

        let (order_number, outcome) = self
            .db
            .transaction::<_, (String, DeletionOutcome), ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = find_order(txn, id).await?;

                    let outcome = match order.status {
                        ProductionStatus::Completed => {
                            let dest = order.dest_warehouse();
                            let produced = if order.qty_finished != 0.0 {
                                order.qty_finished
                            } else {
                                order.qty_planned
                            };
                            adjust_product_stock(txn, order.finished_product_id, -produced).await?;
                            if let Some(warehouse_id) = dest {
                                adjust_warehouse_stock(
                                    txn,
                                    order.finished_product_id,
                                    warehouse_id,
                                    -produced,
                                )
                                .await?;
                            }
                            record_movement(
                                txn,
                                NewMovement::new(
                                    order.finished_product_id,
                                    -produced,
                                    MovementType::Adjustment,
                                )
                                .warehouse(dest)
                                .reference(REFERENCE_PRODUCTION_ORDER, order.id)
                                .notes(format!(
                                    "Finished goods removed on deletion of order {}",
                                    order.order_number
                                ))
                                .created_by(&actor_name),
                            )
                            .await?;
                            return_materials(
                                txn,
                                &order,
                                "Materials returned on deletion of completed order",
                                &actor_name,
                            )
                            .await?;
                            DeletionOutcome::CompletedReversed
                        }
                        ProductionStatus::InProgress => {
                            return_materials(
                                txn,
                                &order,
                                "Materials returned on deletion of order",
                                &actor_name,
                            )
                            .await?;
                            DeletionOutcome::MaterialsReturned
                        }
                        _ => DeletionOutcome::Deleted,
                    };

                    reservations::release(txn, order.id).await?;

                    StockMovementEntity::delete_many()
                        .filter(
                            stock_movement::Column::ReferenceType.eq(REFERENCE_PRODUCTION_ORDER),
                        )
                        .filter(stock_movement::Column::ReferenceId.eq(order.id))
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    ReservationEntity::delete_many()
                        .filter(material_reservation::Column::ProductionOrderId.eq(order.id))
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    ScrapEntity::delete_many()
                        .filter(production_scrap::Column::ProductionOrderId.eq(order.id))
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    ProductionOrderEntity::delete_by_id(order.id)
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                    Ok((order.order_number, outcome))
                })
            })
            .await
            .map_err(map_txn_error)?;

        info!(order_id = %id, %order_number, ?outcome, "production order deleted");
        self.event_sender
            .send_or_log(Event::entity_deleted(ENTITY_TYPE, id, actor))
            .await;
        if outcome != DeletionOutcome::Deleted {
            self.event_sender
                .send_or_log(Event::entity_changed("products", None, actor))
                .await;
        }
        Ok(outcome)
    }
}
