pub mod bom;
pub mod common;
pub mod health;
pub mod product_stocks;
pub mod production;
pub mod products;
pub mod realtime;
pub mod scrap;
pub mod stock_movements;
pub mod warehouses;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
