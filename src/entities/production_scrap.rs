use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
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
pub enum ScrapType {
    #[default]
    #[sea_orm(string_value = "CUTTING_WASTE")]
    CuttingWaste,
    #[sea_orm(string_value = "DEFECTIVE_MATERIAL")]
    DefectiveMaterial,
    #[sea_orm(string_value = "PROCESS_LOSS")]
    ProcessLoss,
    #[sea_orm(string_value = "DAMAGED_GOODS")]
    DamagedGoods,
    #[sea_orm(string_value = "EXPIRED_MATERIALS")]
    ExpiredMaterials,
    #[sea_orm(string_value = "OTHER")]
    Other,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DisposalStatus {
    #[default]
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "DISPOSED")]
    Disposed,
    #[sea_orm(string_value = "SOLD")]
    Sold,
    #[sea_orm(string_value = "RECYCLED")]
    Recycled,
}

impl DisposalStatus {
    /// The scrap has left the plant; a disposal date is stamped.
    pub fn is_final(self) -> bool {
        !matches!(self, DisposalStatus::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "production_scrap")]
#[serde(rename_all = "camelCase")]
#[schema(as = ProductionScrap)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub production_order_id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Option<Uuid>,
    pub quantity: f64,
    pub unit: Option<String>,
    pub scrap_type: ScrapType,
    pub reason: Option<String>,
    pub unit_cost: f64,
    pub total_value: f64,
    pub disposal_status: DisposalStatus,
    pub disposal_date: Option<DateTime<Utc>>,
    pub disposal_notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::production_order::Entity",
        from = "Column::ProductionOrderId",
        to = "super::production_order::Column::Id",
        on_delete = "Cascade"
    )]
    ProductionOrder,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::production_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionOrder.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
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
            if let ActiveValue::NotSet = active_model.disposal_status {
                active_model.disposal_status = Set(DisposalStatus::Pending);
            }
        }
        active_model.updated_at = Set(now);

        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn only_pending_is_not_final() {
        assert!(!DisposalStatus::Pending.is_final());
        for status in [
            DisposalStatus::Disposed,
            DisposalStatus::Sold,
            DisposalStatus::Recycled,
        ] {
            assert!(status.is_final(), "{status}");
        }
    }

    #[test]
    fn disposal_status_parses_wire_names() {
        assert_eq!(
            DisposalStatus::from_str("RECYCLED").unwrap(),
            DisposalStatus::Recycled
        );
        assert!(DisposalStatus::from_str("BURIED").is_err());
    }
}
