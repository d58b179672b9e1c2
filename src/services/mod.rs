// Inventory
pub mod products;
pub mod stock;
pub mod stock_movements;
pub mod warehouses;

// Manufacturing
pub mod bom;
pub mod production;
pub mod reservations;
pub mod scrap;

// Service factory for dependency injection
pub mod factory;

use sea_orm::TransactionError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ServiceError;

/// Flattens the error of a `TransactionTrait::transaction` closure.
pub fn map_txn_error(err: TransactionError<ServiceError>) -> ServiceError {
    match err {
        TransactionError::Connection(e) => ServiceError::db_error(e),
        TransactionError::Transaction(e) => e,
    }
}

/// Offset pagination metadata returned with list responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(total: u64, limit: u64, offset: u64, returned: usize) -> Self {
        Self {
            total,
            limit,
            offset,
            has_more: offset + (returned as u64) < total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DbErr;

    #[test]
    fn pagination_reports_remaining_rows() {
        assert!(Pagination::new(120, 50, 0, 50).has_more);
        assert!(!Pagination::new(120, 50, 100, 20).has_more);
        assert!(!Pagination::new(0, 50, 0, 0).has_more);
    }

    #[test]
    fn transaction_errors_unwrap_to_service_errors() {
        let inner = map_txn_error(TransactionError::Transaction(
            ServiceError::InvalidOperation("nope".into()),
        ));
        assert!(matches!(inner, ServiceError::InvalidOperation(_)));

        let conn = map_txn_error(TransactionError::Connection(DbErr::Custom("down".into())));
        assert!(!matches!(conn, ServiceError::InvalidOperation(_)));
    }
}
