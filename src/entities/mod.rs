//! sea-orm entities for the manufacturing and inventory schema.

pub mod bom;
pub mod bom_item;
pub mod material_reservation;
pub mod product;
pub mod product_stock;
pub mod production_order;
pub mod production_scrap;
pub mod stock_movement;
pub mod user;
pub mod warehouse;

pub use material_reservation::ReservationStatus;
pub use product::ProductType;
pub use production_order::ProductionStatus;
pub use production_scrap::{DisposalStatus, ScrapType};
pub use stock_movement::MovementType;
