use sea_orm_migration::prelude::*;

use crate::m20250301_000002_create_inventory_tables::{Products, Warehouses};
use crate::m20250301_000003_create_bom_tables::Bom;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProductionOrders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductionOrders::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::OrderNumber)
                            .string_len(50)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ProductionOrders::BomId).uuid().not_null())
                    .col(
                        ColumnDef::new(ProductionOrders::FinishedProductId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::QtyPlanned)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::QtyFinished)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::QtyScrapped)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::Status)
                            .string_len(30)
                            .not_null()
                            .default("PLANNED"),
                    )
                    .col(ColumnDef::new(ProductionOrders::StartDate).date().null())
                    .col(ColumnDef::new(ProductionOrders::EndDate).date().null())
                    .col(
                        ColumnDef::new(ProductionOrders::ActualStartDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::ActualEndDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ProductionOrders::WarehouseId).uuid().null())
                    .col(
                        ColumnDef::new(ProductionOrders::SourceWarehouseId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::DestWarehouseId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(ProductionOrders::Notes).text().null())
                    .col(
                        ColumnDef::new(ProductionOrders::CreatedBy)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::StandardCost)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::ActualMaterialCost)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::ActualScrapCost)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::MaterialVariance)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::YieldVariance)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::TotalVariance)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductionOrders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_production_orders_bom")
                            .from(ProductionOrders::Table, ProductionOrders::BomId)
                            .to(Bom::Table, Bom::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_production_orders_product")
                            .from(ProductionOrders::Table, ProductionOrders::FinishedProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_production_orders_warehouse")
                            .from(ProductionOrders::Table, ProductionOrders::WarehouseId)
                            .to(Warehouses::Table, Warehouses::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_production_orders_source_warehouse")
                            .from(ProductionOrders::Table, ProductionOrders::SourceWarehouseId)
                            .to(Warehouses::Table, Warehouses::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_production_orders_dest_warehouse")
                            .from(ProductionOrders::Table, ProductionOrders::DestWarehouseId)
                            .to(Warehouses::Table, Warehouses::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_production_orders_status")
                    .table(ProductionOrders::Table)
                    .col(ProductionOrders::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MaterialReservations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MaterialReservations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MaterialReservations::ProductionOrderId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaterialReservations::ProductId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaterialReservations::WarehouseId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaterialReservations::QuantityReserved)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaterialReservations::QuantityConsumed)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(MaterialReservations::Status)
                            .string_len(30)
                            .not_null()
                            .default("RESERVED"),
                    )
                    .col(
                        ColumnDef::new(MaterialReservations::ReservedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MaterialReservations::ReleasedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_material_reservations_order")
                            .from(
                                MaterialReservations::Table,
                                MaterialReservations::ProductionOrderId,
                            )
                            .to(ProductionOrders::Table, ProductionOrders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_material_reservations_product")
                            .from(MaterialReservations::Table, MaterialReservations::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_material_reservations_warehouse")
                            .from(
                                MaterialReservations::Table,
                                MaterialReservations::WarehouseId,
                            )
                            .to(Warehouses::Table, Warehouses::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_material_reservations_product_status")
                    .table(MaterialReservations::Table)
                    .col(MaterialReservations::ProductId)
                    .col(MaterialReservations::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ProductionScrap::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductionScrap::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProductionScrap::ProductionOrderId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProductionScrap::ProductId).uuid().not_null())
                    .col(ColumnDef::new(ProductionScrap::WarehouseId).uuid().null())
                    .col(
                        ColumnDef::new(ProductionScrap::Quantity)
                            .double()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProductionScrap::Unit).string_len(50).null())
                    .col(
                        ColumnDef::new(ProductionScrap::ScrapType)
                            .string_len(30)
                            .not_null()
                            .default("OTHER"),
                    )
                    .col(ColumnDef::new(ProductionScrap::Reason).text().null())
                    .col(
                        ColumnDef::new(ProductionScrap::UnitCost)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionScrap::TotalValue)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionScrap::DisposalStatus)
                            .string_len(20)
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        ColumnDef::new(ProductionScrap::CreatedBy)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProductionScrap::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductionScrap::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_production_scrap_order")
                            .from(ProductionScrap::Table, ProductionScrap::ProductionOrderId)
                            .to(ProductionOrders::Table, ProductionOrders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_production_scrap_product")
                            .from(ProductionScrap::Table, ProductionScrap::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProductionScrap::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MaterialReservations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProductionOrders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProductionOrders {
    Table,
    Id,
    OrderNumber,
    BomId,
    FinishedProductId,
    QtyPlanned,
    QtyFinished,
    QtyScrapped,
    Status,
    StartDate,
    EndDate,
    ActualStartDate,
    ActualEndDate,
    WarehouseId,
    SourceWarehouseId,
    DestWarehouseId,
    Notes,
    CreatedBy,
    StandardCost,
    ActualMaterialCost,
    ActualScrapCost,
    MaterialVariance,
    YieldVariance,
    TotalVariance,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MaterialReservations {
    Table,
    Id,
    ProductionOrderId,
    ProductId,
    WarehouseId,
    QuantityReserved,
    QuantityConsumed,
    Status,
    ReservedAt,
    ReleasedAt,
}

#[derive(DeriveIden)]
enum ProductionScrap {
    Table,
    Id,
    ProductionOrderId,
    ProductId,
    WarehouseId,
    Quantity,
    Unit,
    ScrapType,
    Reason,
    UnitCost,
    TotalValue,
    DisposalStatus,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}
