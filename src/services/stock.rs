//! Stock ledger primitives shared by the inventory and production services,
//! plus the per-warehouse stock service.
//!
//! Quantities are changed with `stock = stock + delta` updates so concurrent
//! writers never overwrite each other's totals.

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        product::{self, Entity as ProductEntity},
        product_stock::{self, Entity as ProductStockEntity},
        stock_movement::{self, MovementType},
        warehouse::{self, Entity as WarehouseEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Adds `delta` (which may be negative) to a product's global stock.
pub async fn adjust_product_stock<C>(
    db: &C,
    product_id: Uuid,
    delta: f64,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    ProductEntity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).add(delta),
        )
        .filter(product::Column::Id.eq(product_id))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

/// Looks up the stock row of a product in a warehouse.
pub async fn find_warehouse_stock<C>(
    db: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Result<Option<product_stock::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    ProductStockEntity::find()
        .filter(product_stock::Column::ProductId.eq(product_id))
        .filter(product_stock::Column::WarehouseId.eq(warehouse_id))
        .one(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Adds `delta` to an existing warehouse row. Returns `false` when the
/// product has no row in that warehouse.
pub async fn adjust_warehouse_stock<C>(
    db: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
    delta: f64,
) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let result = ProductStockEntity::update_many()
        .col_expr(
            product_stock::Column::Stock,
            Expr::col(product_stock::Column::Stock).add(delta),
        )
        .filter(product_stock::Column::ProductId.eq(product_id))
        .filter(product_stock::Column::WarehouseId.eq(warehouse_id))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(result.rows_affected > 0)
}

/// Adds `delta` to a warehouse row, creating the row with `delta` as its
/// stock when none exists.
pub async fn add_to_warehouse_stock<C>(
    db: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
    delta: f64,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if !adjust_warehouse_stock(db, product_id, warehouse_id, delta).await? {
        insert_warehouse_stock(db, product_id, warehouse_id, delta).await?;
    }
    Ok(())
}

pub async fn insert_warehouse_stock<C>(
    db: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
    stock: f64,
) -> Result<product_stock::Model, ServiceError>
where
    C: ConnectionTrait,
{
    product_stock::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        warehouse_id: Set(warehouse_id),
        stock: Set(stock),
    }
    .insert(db)
    .await
    .map_err(ServiceError::db_error)
}

/// A stock movement about to be written to the ledger.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    pub qty_change: f64,
    pub movement_type: MovementType,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub unit_cost: Option<f64>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub movement_date: Option<DateTime<Utc>>,
}

impl NewMovement {
    pub fn new(product_id: Uuid, qty_change: f64, movement_type: MovementType) -> Self {
        Self {
            product_id,
            warehouse_id: None,
            qty_change,
            movement_type,
            reference_type: None,
            reference_id: None,
            unit_cost: None,
            notes: None,
            created_by: None,
            movement_date: None,
        }
    }

    pub fn warehouse(mut self, warehouse_id: Option<Uuid>) -> Self {
        self.warehouse_id = warehouse_id;
        self
    }

    pub fn reference(mut self, reference_type: &str, reference_id: Uuid) -> Self {
        self.reference_type = Some(reference_type.to_string());
        self.reference_id = Some(reference_id);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn created_by(mut self, actor: &str) -> Self {
        self.created_by = Some(actor.to_string());
        self
    }
}

pub async fn record_movement<C>(
    db: &C,
    movement: NewMovement,
) -> Result<stock_movement::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let mut model = stock_movement::ActiveModel {
        product_id: Set(movement.product_id),
        warehouse_id: Set(movement.warehouse_id),
        qty_change: Set(movement.qty_change),
        movement_type: Set(movement.movement_type),
        reference_type: Set(movement.reference_type),
        reference_id: Set(movement.reference_id),
        unit_cost: Set(movement.unit_cost),
        notes: Set(movement.notes),
        created_by: Set(movement.created_by),
        ..Default::default()
    };
    if let Some(date) = movement.movement_date {
        model.movement_date = Set(date);
    }
    model.insert(db).await.map_err(ServiceError::db_error)
}

/// Stock row joined with product and warehouse names.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductStockView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub stock: f64,
    pub product_name: Option<String>,
    pub product_sku: Option<String>,
    pub warehouse_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpsertProductStock {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(range(min = 0.0))]
    pub stock: f64,
}

/// Whether an upsert touched an existing row or inserted a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    Created,
}

#[derive(Clone)]
pub struct ProductStockService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ProductStockService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        product_id: Option<Uuid>,
        warehouse_id: Option<Uuid>,
    ) -> Result<Vec<ProductStockView>, ServiceError> {
        let db = &*self.db;
        let mut query = ProductStockEntity::find();
        if let Some(product_id) = product_id {
            query = query.filter(product_stock::Column::ProductId.eq(product_id));
        }
        if let Some(warehouse_id) = warehouse_id {
            query = query.filter(product_stock::Column::WarehouseId.eq(warehouse_id));
        }
        let rows = query
            .order_by_asc(product_stock::Column::ProductId)
            .find_also_related(ProductEntity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let warehouses: std::collections::HashMap<Uuid, String> = WarehouseEntity::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|w| (w.id, w.name))
            .collect();

        Ok(rows
            .into_iter()
            .map(|(row, product)| ProductStockView {
                id: row.id,
                product_id: row.product_id,
                warehouse_id: row.warehouse_id,
                stock: row.stock,
                product_name: product.as_ref().map(|p| p.name.clone()),
                product_sku: product.map(|p| p.sku),
                warehouse_name: warehouses.get(&row.warehouse_id).cloned(),
            })
            .collect())
    }

    /// Sets the absolute stock of a product in a warehouse.
    #[instrument(skip(self))]
    pub async fn upsert(
        &self,
        input: UpsertProductStock,
        actor: &str,
    ) -> Result<(product_stock::Model, UpsertOutcome), ServiceError> {
        input.validate()?;
        let db = &*self.db;

        ProductEntity::find_by_id(input.product_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Product", input.product_id))?;
        WarehouseEntity::find_by_id(input.warehouse_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Warehouse", input.warehouse_id))?;

        let (model, outcome) = match find_warehouse_stock(db, input.product_id, input.warehouse_id)
            .await?
        {
            Some(existing) => {
                let mut active: product_stock::ActiveModel = existing.into();
                active.stock = Set(input.stock);
                let updated = active.update(db).await.map_err(ServiceError::db_error)?;
                (updated, UpsertOutcome::Updated)
            }
            None => {
                let created =
                    insert_warehouse_stock(db, input.product_id, input.warehouse_id, input.stock)
                        .await?;
                (created, UpsertOutcome::Created)
            }
        };

        info!(
            product_id = %model.product_id,
            warehouse_id = %model.warehouse_id,
            stock = model.stock,
            ?outcome,
            "warehouse stock set"
        );
        self.event_sender
            .send_or_log(Event::entity_changed(
                "product_stocks",
                Some(model.id),
                actor,
            ))
            .await;
        Ok((model, outcome))
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, actor: &str) -> Result<(), ServiceError> {
        let result = ProductStockEntity::delete_by_id(id)
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("Product stock", id));
        }
        self.event_sender
            .send_or_log(Event::entity_deleted("product_stocks", id, actor))
            .await;
        Ok(())
    }
}

/// Default warehouse for movements that name none: the one flagged default,
/// else the first active warehouse by name.
pub async fn default_warehouse<C>(db: &C) -> Result<Option<warehouse::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let flagged = WarehouseEntity::find()
        .filter(warehouse::Column::IsDefault.eq(true))
        .filter(warehouse::Column::IsActive.eq(true))
        .one(db)
        .await
        .map_err(ServiceError::db_error)?;
    if flagged.is_some() {
        return Ok(flagged);
    }
    WarehouseEntity::find()
        .filter(warehouse::Column::IsActive.eq(true))
        .order_by_asc(warehouse::Column::Name)
        .one(db)
        .await
        .map_err(ServiceError::db_error)
}
