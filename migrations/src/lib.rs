pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_users_table;
mod m20250301_000002_create_inventory_tables;
mod m20250301_000003_create_bom_tables;
mod m20250301_000004_create_production_tables;
mod m20250301_000005_add_scrap_disposal;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_users_table::Migration),
            Box::new(m20250301_000002_create_inventory_tables::Migration),
            Box::new(m20250301_000003_create_bom_tables::Migration),
            Box::new(m20250301_000004_create_production_tables::Migration),
            Box::new(m20250301_000005_add_scrap_disposal::Migration),
        ]
    }
}
