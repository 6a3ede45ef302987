use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::ProductType;

use crate::{ProductCatalog, RepositoryError};

/// Stock lookup over the per-type product collections.
pub struct PgProductCatalog {
    pool: Pool,
}

impl PgProductCatalog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductCatalog for PgProductCatalog {
    async fn stock_of(&self, product_type: ProductType, product_id: &str) -> Result<Option<u32>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT COALESCE((doc->>'stockQuantity')::int, 0) AS stock FROM {} WHERE id = $1",
            product_type.collection()
        );
        let row = client.query_opt(query.as_str(), &[&product_id]).await?;
        match row {
            Some(row) => {
                let stock: i32 = row.try_get("stock")?;
                Ok(Some(u32::try_from(stock).unwrap_or(0)))
            }
            None => Ok(None),
        }
    }
}
