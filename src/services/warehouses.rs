use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        product_stock::{self, Entity as ProductStockEntity},
        production_order::{self, Entity as ProductionOrderEntity},
        stock_movement::{self, Entity as StockMovementEntity},
        warehouse::{self, Entity as WarehouseEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::map_txn_error,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateWarehouse {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWarehouse {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Clone)]
pub struct WarehouseService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl WarehouseService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<warehouse::Model>, ServiceError> {
        WarehouseEntity::find()
            .order_by_desc(warehouse::Column::IsDefault)
            .order_by_asc(warehouse::Column::Name)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<warehouse::Model, ServiceError> {
        WarehouseEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Warehouse", id))
    }

    /// Creates a warehouse. Flagging it default clears the flag elsewhere.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        input: CreateWarehouse,
        actor: &str,
    ) -> Result<warehouse::Model, ServiceError> {
        input.validate()?;

        let created = self
            .db
            .transaction::<_, warehouse::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    if input.is_default {
                        clear_default(txn).await?;
                    }
                    warehouse::ActiveModel {
                        name: Set(input.name.trim().to_string()),
                        is_default: Set(input.is_default),
                        is_active: Set(input.is_active),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(map_txn_error)?;

        info!(warehouse_id = %created.id, name = %created.name, "warehouse created");
        self.event_sender
            .send_or_log(Event::entity_changed("warehouses", Some(created.id), actor))
            .await;
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateWarehouse,
        actor: &str,
    ) -> Result<warehouse::Model, ServiceError> {
        input.validate()?;
        let existing = self.get(id).await?;

        let updated = self
            .db
            .transaction::<_, warehouse::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    if input.is_default == Some(true) {
                        clear_default(txn).await?;
                    }
                    let mut active: warehouse::ActiveModel = existing.into();
                    if let Some(name) = input.name {
                        active.name = Set(name.trim().to_string());
                    }
                    if let Some(is_default) = input.is_default {
                        active.is_default = Set(is_default);
                    }
                    if let Some(is_active) = input.is_active {
                        active.is_active = Set(is_active);
                    }
                    active.update(txn).await.map_err(ServiceError::db_error)
                })
            })
            .await
            .map_err(map_txn_error)?;

        self.event_sender
            .send_or_log(Event::entity_changed("warehouses", Some(id), actor))
            .await;
        Ok(updated)
    }

    /// Deletes an empty warehouse.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, actor: &str) -> Result<(), ServiceError> {
        let db = &*self.db;
        let warehouse = self.get(id).await?;

        let stocked = ProductStockEntity::find()
            .filter(product_stock::Column::WarehouseId.eq(id))
            .filter(product_stock::Column::Stock.ne(0.0))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        if stocked > 0 {
            return Err(ServiceError::ReferenceExists(format!(
                "Warehouse {} still holds stock for {} product(s)",
                warehouse.name, stocked
            )));
        }

        let movements = StockMovementEntity::find()
            .filter(stock_movement::Column::WarehouseId.eq(id))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        let orders = ProductionOrderEntity::find()
            .filter(
                Condition::any()
                    .add(production_order::Column::WarehouseId.eq(id))
                    .add(production_order::Column::SourceWarehouseId.eq(id))
                    .add(production_order::Column::DestWarehouseId.eq(id)),
            )
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        if movements + orders > 0 {
            return Err(ServiceError::ReferenceExists(format!(
                "Warehouse {} is referenced by {} stock movement(s) and {} production order(s)",
                warehouse.name, movements, orders
            )));
        }

        WarehouseEntity::delete_by_id(id)
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        info!(warehouse_id = %id, "warehouse deleted");
        self.event_sender
            .send_or_log(Event::entity_deleted("warehouses", id, actor))
            .await;
        Ok(())
    }
}

async fn clear_default<C>(db: &C) -> Result<(), ServiceError>
where
    C: sea_orm::ConnectionTrait,
{
    WarehouseEntity::update_many()
        .col_expr(warehouse::Column::IsDefault, Expr::value(false))
        .filter(warehouse::Column::IsDefault.eq(true))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}
