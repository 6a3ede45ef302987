use std::sync::Arc;

use model::{LineItem, ProductType};
use repository::ProductCatalog;
use tracing::{debug, instrument};

use crate::ServiceError;

/// Outcome of comparing a requested quantity with current stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockCheck {
    Available,
    InsufficientStock(u32),
    ProductNotFound,
}

/// Checks requested quantities against the product catalogue. Never touches
/// stock levels.
#[derive(Clone)]
pub struct InventoryValidator {
    catalog: Arc<dyn ProductCatalog>,
}

impl InventoryValidator {
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { catalog }
    }

    #[instrument(skip(self))]
    pub async fn check(
        &self,
        product_type: ProductType,
        product_id: &str,
        requested: u32,
    ) -> Result<StockCheck, ServiceError> {
        let outcome = match self.catalog.stock_of(product_type, product_id).await? {
            None => StockCheck::ProductNotFound,
            Some(available) if requested > available => StockCheck::InsufficientStock(available),
            Some(_) => StockCheck::Available,
        };
        debug!(?outcome, "stock checked");
        Ok(outcome)
    }

    /// Like [`check`](Self::check) but turns a shortfall into an error.
    pub async fn require(
        &self,
        product_type: ProductType,
        product_id: &str,
        requested: u32,
    ) -> Result<(), ServiceError> {
        match self.check(product_type, product_id, requested).await? {
            StockCheck::Available => Ok(()),
            StockCheck::InsufficientStock(available) => Err(ServiceError::InsufficientStock {
                product_id: product_id.to_string(),
                available,
            }),
            StockCheck::ProductNotFound => Err(ServiceError::not_found(format!("Product {product_id}"))),
        }
    }

    /// Re-validates every line, failing on the first one that now exceeds
    /// stock. A product that disappeared counts as zero available.
    pub async fn revalidate(&self, items: &[LineItem]) -> Result<(), ServiceError> {
        for item in items {
            let available = match self.check(item.product_type, &item.product_id, item.quantity).await? {
                StockCheck::Available => continue,
                StockCheck::InsufficientStock(available) => available,
                StockCheck::ProductNotFound => 0,
            };
            return Err(ServiceError::StaleCartItem {
                product_id: item.product_id.clone(),
                requested: item.quantity,
                available,
            });
        }
        Ok(())
    }
}
