use sea_orm_migration::prelude::*;

use crate::m20250301_000002_create_inventory_tables::Products;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Bom::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Bom::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Bom::FinishedProductId).uuid().not_null())
                    .col(ColumnDef::new(Bom::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Bom::Version)
                            .string_len(20)
                            .not_null()
                            .default("1.0"),
                    )
                    .col(
                        ColumnDef::new(Bom::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Bom::LaborCost)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Bom::OverheadCost)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(Bom::Notes).text().null())
                    .col(
                        ColumnDef::new(Bom::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bom::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bom_finished_product")
                            .from(Bom::Table, Bom::FinishedProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bom_finished_product")
                    .table(Bom::Table)
                    .col(Bom::FinishedProductId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BomItems::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(BomItems::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(BomItems::BomId).uuid().not_null())
                    .col(ColumnDef::new(BomItems::RawProductId).uuid().not_null())
                    .col(
                        ColumnDef::new(BomItems::QuantityPerUnit)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BomItems::WastePercent)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(BomItems::Notes).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bom_items_bom")
                            .from(BomItems::Table, BomItems::BomId)
                            .to(Bom::Table, Bom::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bom_items_raw_product")
                            .from(BomItems::Table, BomItems::RawProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_bom_items_bom_raw")
                    .table(BomItems::Table)
                    .col(BomItems::BomId)
                    .col(BomItems::RawProductId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BomItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Bom::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Bom {
    Table,
    Id,
    FinishedProductId,
    Name,
    Version,
    IsActive,
    LaborCost,
    OverheadCost,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum BomItems {
    Table,
    Id,
    BomId,
    RawProductId,
    QuantityPerUnit,
    WastePercent,
    Notes,
}
