use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle of a production order.
///
/// ```text
/// PLANNED --reserve ok--> CONFIRMED
/// PLANNED --shortage----> WAITING_MATERIALS
/// PLANNED|CONFIRMED --start--> IN_PROGRESS --finish--> COMPLETED
/// any but COMPLETED --cancel--> CANCELLED
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(30))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductionStatus {
    #[sea_orm(string_value = "PLANNED")]
    Planned,
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "WAITING_MATERIALS")]
    WaitingMaterials,
    #[sea_orm(string_value = "IN_PROGRESS")]
    InProgress,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl ProductionStatus {
    pub fn can_start(self) -> bool {
        matches!(self, Self::Planned | Self::Confirmed)
    }

    pub fn can_finish(self) -> bool {
        self == Self::InProgress
    }

    pub fn can_cancel(self) -> bool {
        self != Self::Completed
    }

    /// Statuses counted as "pending" in list statistics.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::Planned | Self::Confirmed | Self::WaitingMaterials
        )
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "production_orders")]
#[serde(rename_all = "camelCase")]
#[schema(as = ProductionOrder)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub bom_id: Uuid,
    pub finished_product_id: Uuid,
    pub qty_planned: f64,
    pub qty_finished: f64,
    pub qty_scrapped: f64,
    pub status: ProductionStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub actual_start_date: Option<DateTime<Utc>>,
    pub actual_end_date: Option<DateTime<Utc>>,
    pub warehouse_id: Option<Uuid>,
    pub source_warehouse_id: Option<Uuid>,
    pub dest_warehouse_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub standard_cost: f64,
    pub actual_material_cost: f64,
    pub actual_scrap_cost: f64,
    pub material_variance: f64,
    pub yield_variance: f64,
    pub total_variance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Warehouse raw materials are drawn from.
    pub fn source_warehouse(&self) -> Option<Uuid> {
        self.source_warehouse_id.or(self.warehouse_id)
    }

    /// Warehouse finished goods are put into.
    pub fn dest_warehouse(&self) -> Option<Uuid> {
        self.dest_warehouse_id.or(self.warehouse_id)
    }

    pub fn cost_per_unit(&self) -> Option<f64> {
        (self.qty_finished > 0.0).then(|| self.actual_material_cost / self.qty_finished)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::bom::Entity",
        from = "Column::BomId",
        to = "super::bom::Column::Id"
    )]
    Bom,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::FinishedProductId",
        to = "super::product::Column::Id"
    )]
    FinishedProduct,
    #[sea_orm(has_many = "super::material_reservation::Entity")]
    Reservations,
    #[sea_orm(has_many = "super::production_scrap::Entity")]
    Scrap,
}

impl Related<super::bom::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bom.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FinishedProduct.def()
    }
}

impl Related<super::material_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl Related<super::production_scrap::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Scrap.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            active_model.created_at = Set(now);
            if let ActiveValue::NotSet = active_model.id {
                active_model.id = Set(Uuid::new_v4());
            }
        }
        active_model.updated_at = Set(now);

        Ok(active_model)
    }
}
