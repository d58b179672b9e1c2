use std::sync::Arc;

use crate::{
    db::DbPool,
    events::EventSender,
    services::{
        bom::BomService, production::ProductionService, products::ProductService,
        reservations::ReservationService, scrap::ScrapService, stock::ProductStockService,
        stock_movements::StockMovementService, warehouses::WarehouseService,
    },
};

/// Builds services that share one pool and one event channel.
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl ServiceFactory {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    pub fn product_service(&self) -> ProductService {
        ProductService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn warehouse_service(&self) -> WarehouseService {
        WarehouseService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn product_stock_service(&self) -> ProductStockService {
        ProductStockService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn stock_movement_service(&self) -> StockMovementService {
        StockMovementService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn bom_service(&self) -> BomService {
        BomService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn production_service(&self) -> ProductionService {
        ProductionService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn scrap_service(&self) -> ScrapService {
        ScrapService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    /// Read-only; never publishes events.
    pub fn reservation_service(&self) -> ReservationService {
        ReservationService::new(self.db_pool.clone())
    }

    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    pub fn event_sender(&self) -> &EventSender {
        &self.event_sender
    }
}

/// Every service instance, shared through the router state.
#[derive(Clone)]
pub struct ServiceContainer {
    pub products: Arc<ProductService>,
    pub warehouses: Arc<WarehouseService>,
    pub product_stocks: Arc<ProductStockService>,
    pub stock_movements: Arc<StockMovementService>,
    pub bom: Arc<BomService>,
    pub production: Arc<ProductionService>,
    pub reservations: Arc<ReservationService>,
    pub scrap: Arc<ScrapService>,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            products: Arc::new(factory.product_service()),
            warehouses: Arc::new(factory.warehouse_service()),
            product_stocks: Arc::new(factory.product_stock_service()),
            stock_movements: Arc::new(factory.stock_movement_service()),
            bom: Arc::new(factory.bom_service()),
            production: Arc::new(factory.production_service()),
            reservations: Arc::new(factory.reservation_service()),
            scrap: Arc::new(factory.scrap_service()),
        }
    }
}
