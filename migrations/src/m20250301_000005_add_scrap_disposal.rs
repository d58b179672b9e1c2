use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if !manager
            .has_column(
                "production_scrap",
                ProductionScrap::DisposalDate.to_string().as_str(),
            )
            .await?
        {
            let mut col = ColumnDef::new(ProductionScrap::DisposalDate);
            col.timestamp_with_time_zone().null();
            manager
                .alter_table(
                    Table::alter()
                        .table(ProductionScrap::Table)
                        .add_column(col)
                        .to_owned(),
                )
                .await?;
        }

        if !manager
            .has_column(
                "production_scrap",
                ProductionScrap::DisposalNotes.to_string().as_str(),
            )
            .await?
        {
            let mut col = ColumnDef::new(ProductionScrap::DisposalNotes);
            col.text().null();
            manager
                .alter_table(
                    Table::alter()
                        .table(ProductionScrap::Table)
                        .add_column(col)
                        .to_owned(),
                )
                .await?;
        }

        manager
            .create_index(
                Index::create()
                    .name("idx_production_scrap_disposal_status")
                    .table(ProductionScrap::Table)
                    .col(ProductionScrap::DisposalStatus)
                    .to_owned(),
            )
            .await?;

        // Scrap listings sort newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_production_scrap_created")
                    .table(ProductionScrap::Table)
                    .col((ProductionScrap::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_production_scrap_created")
                    .table(ProductionScrap::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_production_scrap_disposal_status")
                    .table(ProductionScrap::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .alter_table(
                Table::alter()
                    .table(ProductionScrap::Table)
                    .drop_column(ProductionScrap::DisposalNotes)
                    .to_owned(),
            )
            .await?;
        manager
            .alter_table(
                Table::alter()
                    .table(ProductionScrap::Table)
                    .drop_column(ProductionScrap::DisposalDate)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum ProductionScrap {
    Table,
    DisposalStatus,
    DisposalDate,
    DisposalNotes,
    CreatedAt,
}
