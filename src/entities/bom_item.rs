use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "bom_items")]
#[serde(rename_all = "camelCase")]
#[schema(as = BomItem)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub bom_id: Uuid,
    pub raw_product_id: Uuid,
    pub quantity_per_unit: f64,
    pub waste_percent: f64,
    pub notes: Option<String>,
}

impl Model {
    /// Quantity of raw material consumed per finished unit, waste included.
    pub fn quantity_with_waste(&self) -> f64 {
        self.quantity_per_unit * (1.0 + self.waste_percent / 100.0)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::bom::Entity",
        from = "Column::BomId",
        to = "super::bom::Column::Id",
        on_delete = "Cascade"
    )]
    Bom,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::RawProductId",
        to = "super::product::Column::Id"
    )]
    RawProduct,
}

impl Related<super::bom::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bom.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RawProduct.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waste_is_applied_as_percentage() {
        let item = Model {
            id: Uuid::new_v4(),
            bom_id: Uuid::new_v4(),
            raw_product_id: Uuid::new_v4(),
            quantity_per_unit: 2.0,
            waste_percent: 10.0,
            notes: None,
        };
        assert!((item.quantity_with_waste() - 2.2).abs() < 1e-9);
    }
}
