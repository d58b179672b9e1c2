use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        bom::{self, Entity as BomEntity},
        bom_item::{self, Entity as BomItemEntity},
        product::{self, Entity as ProductEntity, ProductType},
        production_order::{self, Entity as ProductionOrderEntity},
        stock_movement::{self, Entity as StockMovementEntity, MovementType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        map_txn_error,
        stock::{add_to_warehouse_stock, record_movement, NewMovement},
    },
};

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    /// Product type, e.g. `RAW`
    #[serde(rename = "type")]
    pub product_type: Option<ProductType>,
    /// Substring of name or SKU
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProduct {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub sku: String,
    #[serde(rename = "type", default = "default_product_type")]
    pub product_type: ProductType,
    pub unit: Option<String>,
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub cost: f64,
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub price: f64,
    /// Opening balance
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub stock: f64,
    /// Warehouse receiving the opening balance
    pub warehouse_id: Option<Uuid>,
}

fn default_product_type() -> ProductType {
    ProductType::Raw
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProduct {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub sku: Option<String>,
    #[serde(rename = "type")]
    pub product_type: Option<ProductType>,
    pub unit: Option<String>,
    #[validate(range(min = 0.0))]
    pub cost: Option<f64>,
    #[validate(range(min = 0.0))]
    pub price: Option<f64>,
}

#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, filter: ProductFilter) -> Result<Vec<product::Model>, ServiceError> {
        let mut query = ProductEntity::find();
        if let Some(product_type) = filter.product_type {
            query = query.filter(product::Column::ProductType.eq(product_type));
        }
        if let Some(search) = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            query = query.filter(
                Condition::any()
                    .add(product::Column::Name.contains(search))
                    .add(product::Column::Sku.contains(search)),
            );
        }
        query
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Product", id))
    }

    /// Creates a product; an opening balance is booked to the given
    /// warehouse with an `OPENING_BALANCE` movement.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        input: CreateProduct,
        actor: &str,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let actor_name = actor.to_string();

        let created = self
            .db
            .transaction::<_, product::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let created = product::ActiveModel {
                        name: Set(input.name.trim().to_string()),
                        sku: Set(input.sku.trim().to_string()),
                        product_type: Set(input.product_type),
                        unit: Set(input.unit),
                        cost: Set(input.cost),
                        price: Set(input.price),
                        stock: Set(input.stock),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                    if input.stock > 0.0 {
                        if let Some(warehouse_id) = input.warehouse_id {
                            add_to_warehouse_stock(txn, created.id, warehouse_id, input.stock)
                                .await?;
                        }
                        record_movement(
                            txn,
                            NewMovement::new(created.id, input.stock, MovementType::OpeningBalance)
                                .warehouse(input.warehouse_id)
                                .notes("Opening balance")
                                .created_by(&actor_name),
                        )
                        .await?;
                    }
                    Ok(created)
                })
            })
            .await
            .map_err(map_txn_error)?;

        info!(product_id = %created.id, sku = %created.sku, "product created");
        self.event_sender
            .send_or_log(Event::entity_changed("products", Some(created.id), actor))
            .await;
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateProduct,
        actor: &str,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let existing = self.get(id).await?;

        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(sku) = input.sku {
            active.sku = Set(sku.trim().to_string());
        }
        if let Some(product_type) = input.product_type {
            active.product_type = Set(product_type);
        }
        if input.unit.is_some() {
            active.unit = Set(input.unit);
        }
        if let Some(cost) = input.cost {
            active.cost = Set(cost);
        }
        if let Some(price) = input.price {
            active.price = Set(price);
        }

        let updated = active
            .update(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        self.event_sender
            .send_or_log(Event::entity_changed("products", Some(id), actor))
            .await;
        Ok(updated)
    }

    /// Deletes a product that no BOM, order or ledger entry refers to.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, actor: &str) -> Result<(), ServiceError> {
        let db = &*self.db;
        let product = self.get(id).await?;

        let in_boms = BomEntity::find()
            .filter(bom::Column::FinishedProductId.eq(id))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?
            + BomItemEntity::find()
                .filter(bom_item::Column::RawProductId.eq(id))
                .count(db)
                .await
                .map_err(ServiceError::db_error)?;
        let in_orders = ProductionOrderEntity::find()
            .filter(production_order::Column::FinishedProductId.eq(id))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        let movements = StockMovementEntity::find()
            .filter(stock_movement::Column::ProductId.eq(id))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;

        if in_boms + in_orders + movements > 0 {
            return Err(ServiceError::ReferenceExists(format!(
                "Product {} is used by {} BOM(s), {} production order(s) and {} stock movement(s)",
                product.sku, in_boms, in_orders, movements
            )));
        }

        ProductEntity::delete_by_id(id)
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        info!(product_id = %id, sku = %product.sku, "product deleted");
        self.event_sender
            .send_or_log(Event::entity_deleted("products", id, actor))
            .await;
        Ok(())
    }

    /// Next free numeric SKU, starting after 1000.
    #[instrument(skip(self))]
    pub async fn next_sku(&self) -> Result<String, ServiceError> {
        let skus = ProductEntity::find()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        let max = skus
            .iter()
            .filter_map(|p| p.sku.parse::<u64>().ok())
            .max()
            .unwrap_or(1000)
            .max(1000);
        Ok((max + 1).to_string())
    }
}
