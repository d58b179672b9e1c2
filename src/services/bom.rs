use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        bom::{self, Entity as BomEntity},
        bom_item::{self, Entity as BomItemEntity},
        material_reservation::{self, Entity as ReservationEntity, ReservationStatus},
        product::{self, Entity as ProductEntity, ProductType},
        production_order::{self, Entity as ProductionOrderEntity},
        stock_movement::{self, Entity as StockMovementEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{map_txn_error, stock::find_warehouse_stock},
};

/// Shortages at or below this are ignored.
const SHORTAGE_TOLERANCE: f64 = 0.001;

/// Actor name on events emitted by automatic cost roll-ups.
pub const COST_ROLLUP_ACTOR: &str = "BOM Auto-Cost";

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct BomFilter {
    pub product_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BomItemInput {
    pub raw_product_id: Uuid,
    #[validate(range(min = 0.0))]
    pub quantity_per_unit: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    #[serde(default)]
    pub waste_percent: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBom {
    pub finished_product_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub version: Option<String>,
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub labor_cost: f64,
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub overhead_cost: f64,
    pub notes: Option<String>,
    #[validate]
    #[serde(default)]
    pub items: Vec<BomItemInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBom {
    pub finished_product_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub version: Option<String>,
    #[validate(range(min = 0.0))]
    pub labor_cost: Option<f64>,
    #[validate(range(min = 0.0))]
    pub overhead_cost: Option<f64>,
    pub notes: Option<String>,
    pub is_active: Option<bool>,
    /// Replaces every line when present.
    #[validate]
    pub items: Option<Vec<BomItemInput>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BomSummary {
    #[serde(flatten)]
    pub bom: bom::Model,
    pub finished_product_name: Option<String>,
    pub finished_product_sku: Option<String>,
    pub items_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BomItemView {
    #[serde(flatten)]
    pub item: bom_item::Model,
    pub raw_product_name: Option<String>,
    pub raw_product_sku: Option<String>,
    pub unit: Option<String>,
    pub current_stock: f64,
    pub unit_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BomDetail {
    #[serde(flatten)]
    pub bom: bom::Model,
    pub finished_product_name: Option<String>,
    pub finished_product_sku: Option<String>,
    pub finished_product_unit: Option<String>,
    pub items: Vec<BomItemView>,
}

/// Outcome of deleting a BOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum BomRemoval {
    Deleted,
    /// Production orders reference it, so it was only deactivated.
    Deactivated,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequirementsRequest {
    pub bom_id: Uuid,
    #[validate(range(min = 0.000001))]
    pub quantity: f64,
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequirement {
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub sku: Option<String>,
    pub unit: Option<String>,
    pub quantity_per_unit: f64,
    pub waste_percent: f64,
    pub quantity_with_waste: f64,
    pub total_required: f64,
    pub current_stock: f64,
    pub shortage: f64,
    pub has_shortage: bool,
    pub unit_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequirementsReport {
    pub bom_id: Uuid,
    pub quantity: f64,
    pub warehouse_id: Option<Uuid>,
    pub requirements: Vec<MaterialRequirement>,
    pub total_material_cost: f64,
    pub has_shortage: bool,
}

/// Per-unit cost roll-up of a BOM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CostRollup {
    pub product_id: Uuid,
    pub material_cost: f64,
    pub labor_cost: f64,
    pub overhead_cost: f64,
    pub total_cost: f64,
}

/// Material cost of one finished unit, waste included.
pub async fn material_cost_per_unit<C>(db: &C, bom_id: Uuid) -> Result<f64, ServiceError>
where
    C: ConnectionTrait,
{
    let lines = BomItemEntity::find()
        .filter(bom_item::Column::BomId.eq(bom_id))
        .find_also_related(ProductEntity)
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(lines
        .iter()
        .map(|(item, raw)| item.quantity_with_waste() * raw.as_ref().map_or(0.0, |p| p.cost))
        .sum())
}

/// Writes the rolled-up cost of an active BOM onto its finished product.
async fn roll_up_product_cost<C>(
    db: &C,
    bom: &bom::Model,
) -> Result<Option<CostRollup>, ServiceError>
where
    C: ConnectionTrait,
{
    if !bom.is_active {
        return Ok(None);
    }
    let material_cost = material_cost_per_unit(db, bom.id).await?;
    let rollup = CostRollup {
        product_id: bom.finished_product_id,
        material_cost,
        labor_cost: bom.labor_cost,
        overhead_cost: bom.overhead_cost,
        total_cost: material_cost + bom.labor_cost + bom.overhead_cost,
    };

    ProductEntity::update_many()
        .col_expr(
            product::Column::Cost,
            sea_orm::sea_query::Expr::value(rollup.total_cost),
        )
        .filter(product::Column::Id.eq(rollup.product_id))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;

    debug!(product_id = %rollup.product_id, total_cost = rollup.total_cost, "product cost rolled up");
    Ok(Some(rollup))
}

async fn insert_items<C>(db: &C, bom_id: Uuid, items: &[BomItemInput]) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    for item in items {
        ProductEntity::find_by_id(item.raw_product_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Raw product", item.raw_product_id))?;

        bom_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            bom_id: Set(bom_id),
            raw_product_id: Set(item.raw_product_id),
            quantity_per_unit: Set(item.quantity_per_unit),
            waste_percent: Set(item.waste_percent),
            notes: Set(item.notes.clone()),
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;
    }
    Ok(())
}

async fn ensure_finished_product<C>(
    db: &C,
    product_id: Uuid,
) -> Result<product::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let product = ProductEntity::find_by_id(product_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Finished product", product_id))?;
    if product.product_type != ProductType::Finished {
        return Err(ServiceError::ValidationError(format!(
            "Product {} must be of type FINISHED",
            product.sku
        )));
    }
    Ok(product)
}

#[derive(Clone)]
pub struct BomService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl BomService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, filter: BomFilter) -> Result<Vec<BomSummary>, ServiceError> {
        let db = &*self.db;
        let mut query = BomEntity::find();
        if let Some(product_id) = filter.product_id {
            query = query.filter(bom::Column::FinishedProductId.eq(product_id));
        }
        if let Some(is_active) = filter.is_active {
            query = query.filter(bom::Column::IsActive.eq(is_active));
        }
        let rows = query
            .order_by_desc(bom::Column::CreatedAt)
            .find_also_related(ProductEntity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for (bom, product) in rows {
            let items_count = BomItemEntity::find()
                .filter(bom_item::Column::BomId.eq(bom.id))
                .count(db)
                .await
                .map_err(ServiceError::db_error)?;
            summaries.push(BomSummary {
                bom,
                finished_product_name: product.as_ref().map(|p| p.name.clone()),
                finished_product_sku: product.map(|p| p.sku),
                items_count,
            });
        }
        Ok(summaries)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<BomDetail, ServiceError> {
        let db = &*self.db;
        let (bom, product) = BomEntity::find_by_id(id)
            .find_also_related(ProductEntity)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("BOM", id))?;

        let items = BomItemEntity::find()
            .filter(bom_item::Column::BomId.eq(id))
            .order_by_asc(bom_item::Column::Id)
            .find_also_related(ProductEntity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|(item, raw)| BomItemView {
                raw_product_name: raw.as_ref().map(|p| p.name.clone()),
                raw_product_sku: raw.as_ref().map(|p| p.sku.clone()),
                unit: raw.as_ref().and_then(|p| p.unit.clone()),
                current_stock: raw.as_ref().map_or(0.0, |p| p.stock),
                unit_cost: raw.as_ref().map_or(0.0, |p| p.cost),
                item,
            })
            .collect();

        Ok(BomDetail {
            bom,
            finished_product_name: product.as_ref().map(|p| p.name.clone()),
            finished_product_sku: product.as_ref().map(|p| p.sku.clone()),
            finished_product_unit: product.and_then(|p| p.unit),
            items,
        })
    }

    #[instrument(skip(self))]
    pub async fn create(&self, input: CreateBom, actor: &str) -> Result<BomDetail, ServiceError> {
        input.validate()?;

        let (bom, rollup) = self
            .db
            .transaction::<_, (bom::Model, Option<CostRollup>), ServiceError>(move |txn| {
                Box::pin(async move {
                    ensure_finished_product(txn, input.finished_product_id).await?;

                    let bom = bom::ActiveModel {
                        finished_product_id: Set(input.finished_product_id),
                        name: Set(input.name.trim().to_string()),
                        version: Set(input.version.unwrap_or_else(|| "1.0".to_string())),
                        is_active: Set(true),
                        labor_cost: Set(input.labor_cost),
                        overhead_cost: Set(input.overhead_cost),
                        notes: Set(input.notes),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                    insert_items(txn, bom.id, &input.items).await?;
                    let rollup = roll_up_product_cost(txn, &bom).await?;
                    Ok((bom, rollup))
                })
            })
            .await
            .map_err(map_txn_error)?;

        info!(bom_id = %bom.id, name = %bom.name, "BOM created");
        self.publish_changes(bom.id, rollup, actor).await;
        self.get(bom.id).await
    }

    #[instrument(skip(self))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateBom,
        actor: &str,
    ) -> Result<BomDetail, ServiceError> {
        input.validate()?;
        let existing = BomEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("BOM", id))?;

        let rollup = self
            .db
            .transaction::<_, Option<CostRollup>, ServiceError>(move |txn| {
                Box::pin(async move {
                    let mut active: bom::ActiveModel = existing.into();
                    if let Some(product_id) = input.finished_product_id {
                        ensure_finished_product(txn, product_id).await?;
                        active.finished_product_id = Set(product_id);
                    }
                    if let Some(name) = input.name {
                        active.name = Set(name.trim().to_string());
                    }
                    if let Some(version) = input.version {
                        active.version = Set(version);
                    }
                    if let Some(labor_cost) = input.labor_cost {
                        active.labor_cost = Set(labor_cost);
                    }
                    if let Some(overhead_cost) = input.overhead_cost {
                        active.overhead_cost = Set(overhead_cost);
                    }
                    if input.notes.is_some() {
                        active.notes = Set(input.notes);
                    }
                    if let Some(is_active) = input.is_active {
                        active.is_active = Set(is_active);
                    }
                    let bom = active.update(txn).await.map_err(ServiceError::db_error)?;

                    if let Some(items) = input.items {
                        BomItemEntity::delete_many()
                            .filter(bom_item::Column::BomId.eq(id))
                            .exec(txn)
                            .await
                            .map_err(ServiceError::db_error)?;
                        insert_items(txn, id, &items).await?;
                    }
                    roll_up_product_cost(txn, &bom).await
                })
            })
            .await
            .map_err(map_txn_error)?;

        info!(bom_id = %id, "BOM updated");
        self.publish_changes(id, rollup, actor).await;
        self.get(id).await
    }

    /// Deletes a BOM, or deactivates it when production orders use it.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, actor: &str) -> Result<BomRemoval, ServiceError> {
        let db = &*self.db;
        let bom = BomEntity::find_by_id(id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("BOM", id))?;

        let orders = ProductionOrderEntity::find()
            .filter(production_order::Column::BomId.eq(id))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;

        if orders > 0 {
            let mut active: bom::ActiveModel = bom.into();
            active.is_active = Set(false);
            active.update(db).await.map_err(ServiceError::db_error)?;
            info!(bom_id = %id, orders, "BOM deactivated");
            self.event_sender
                .send_or_log(Event::entity_changed("bom", Some(id), actor))
                .await;
            return Ok(BomRemoval::Deactivated);
        }

        BomEntity::delete_by_id(id)
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
        info!(bom_id = %id, "BOM deleted");
        self.event_sender
            .send_or_log(Event::entity_deleted("bom", id, actor))
            .await;
        Ok(BomRemoval::Deleted)
    }

    /// Material needed to build `quantity` units, against current stock.
    ///
    /// With a warehouse, stock is that warehouse's row (or its movement
    /// ledger when it has no row) net of open reservations there; products
    /// unknown to the warehouse fall back to global stock.
    #[instrument(skip(self))]
    pub async fn calculate_requirements(
        &self,
        request: RequirementsRequest,
    ) -> Result<RequirementsReport, ServiceError> {
        request.validate()?;
        let db = &*self.db;

        BomEntity::find_by_id(request.bom_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("BOM", request.bom_id))?;

        let lines = BomItemEntity::find()
            .filter(bom_item::Column::BomId.eq(request.bom_id))
            .find_also_related(ProductEntity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let warehouse_stock = match request.warehouse_id {
            Some(warehouse_id) => {
                let product_ids: Vec<Uuid> =
                    lines.iter().map(|(item, _)| item.raw_product_id).collect();
                Some(warehouse_stock_net_of_reservations(db, warehouse_id, &product_ids).await?)
            }
            None => None,
        };

        let requirements: Vec<MaterialRequirement> = lines
            .into_iter()
            .map(|(item, raw)| {
                let quantity_with_waste = item.quantity_with_waste();
                let total_required = quantity_with_waste * request.quantity;
                let global = raw.as_ref().map_or(0.0, |p| p.stock);
                let current_stock = warehouse_stock
                    .as_ref()
                    .and_then(|stock| stock.get(&item.raw_product_id).copied())
                    .unwrap_or(global);
                let shortage = (total_required - current_stock).max(0.0);
                let unit_cost = raw.as_ref().map_or(0.0, |p| p.cost);
                MaterialRequirement {
                    product_id: item.raw_product_id,
                    product_name: raw.as_ref().map(|p| p.name.clone()),
                    sku: raw.as_ref().map(|p| p.sku.clone()),
                    unit: raw.and_then(|p| p.unit),
                    quantity_per_unit: item.quantity_per_unit,
                    waste_percent: item.waste_percent,
                    quantity_with_waste,
                    total_required,
                    current_stock,
                    shortage,
                    has_shortage: shortage > SHORTAGE_TOLERANCE,
                    unit_cost,
                    total_cost: total_required * unit_cost,
                }
            })
            .collect();

        Ok(RequirementsReport {
            bom_id: request.bom_id,
            quantity: request.quantity,
            warehouse_id: request.warehouse_id,
            total_material_cost: requirements.iter().map(|r| r.total_cost).sum(),
            has_shortage: requirements.iter().any(|r| r.has_shortage),
            requirements,
        })
    }

    async fn publish_changes(&self, bom_id: Uuid, rollup: Option<CostRollup>, actor: &str) {
        self.event_sender
            .send_or_log(Event::entity_changed("bom", Some(bom_id), actor))
            .await;
        if let Some(rollup) = rollup {
            self.event_sender
                .send_or_log(Event::ProductCostUpdated {
                    product_id: rollup.product_id,
                    bom_id,
                    material_cost: rollup.material_cost,
                    labor_cost: rollup.labor_cost,
                    overhead_cost: rollup.overhead_cost,
                    total_cost: rollup.total_cost,
                    updated_at: Utc::now(),
                })
                .await;
            self.event_sender
                .send_or_log(Event::entity_changed("products", None, COST_ROLLUP_ACTOR))
                .await;
        }
    }
}

async fn warehouse_stock_net_of_reservations<C>(
    db: &C,
    warehouse_id: Uuid,
    product_ids: &[Uuid],
) -> Result<HashMap<Uuid, f64>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut stock = HashMap::new();
    for &product_id in product_ids {
        if let Some(row) = find_warehouse_stock(db, product_id, warehouse_id).await? {
            stock.insert(product_id, row.stock);
            continue;
        }
        let ledger = StockMovementEntity::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .filter(stock_movement::Column::WarehouseId.eq(warehouse_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        if !ledger.is_empty() {
            stock.insert(product_id, ledger.iter().map(|m| m.qty_change).sum());
        }
    }

    let open = ReservationEntity::find()
        .filter(material_reservation::Column::WarehouseId.eq(warehouse_id))
        .filter(material_reservation::Column::Status.eq(ReservationStatus::Reserved))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;
    for reservation in open {
        *stock.entry(reservation.product_id).or_insert(0.0) -= reservation.open_quantity();
    }
    Ok(stock)
}
