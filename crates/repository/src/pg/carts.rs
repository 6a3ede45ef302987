use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use model::Cart;
use tokio_postgres::types::Json;

use crate::{CartRepository, RepositoryError, Versioned};

/// PostgreSQL implementation of the CartRepository trait.
///
/// Every write is an `UPDATE ... WHERE version = $expected`, so two writers
/// that read the same version cannot both succeed.
pub struct PgCartsRepository {
    pool: Pool,
}

impl PgCartsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartRepository for PgCartsRepository {
    async fn get(&self, user_id: &str) -> Result<Option<Versioned<Cart>>, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT version, doc FROM carts WHERE user_id = $1", &[&user_id])
            .await?;
        match row {
            Some(row) => {
                let Json(cart): Json<Cart> = row.try_get("doc")?;
                Ok(Some(Versioned { version: row.try_get("version")?, value: cart }))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, cart: &Cart, expected_version: Option<i64>) -> Result<i64, RepositoryError> {
        let client = self.pool.get().await?;
        let (written, version) = match expected_version {
            None => {
                let query = r#"
                    INSERT INTO carts (user_id, version, updated_at, doc)
                    VALUES ($1, 1, $2, $3)
                    ON CONFLICT (user_id) DO NOTHING
                "#;
                let n = client
                    .execute(query, &[&cart.user_id, &cart.updated_at, &Json(cart)])
                    .await?;
                (n, 1)
            }
            Some(expected) => {
                let query = r#"
                    UPDATE carts SET version = version + 1, updated_at = $2, doc = $3
                    WHERE user_id = $1 AND version = $4
                "#;
                let n = client
                    .execute(query, &[&cart.user_id, &cart.updated_at, &Json(cart), &expected])
                    .await?;
                (n, expected + 1)
            }
        };
        if written == 0 {
            return Err(RepositoryError::Conflict);
        }
        Ok(version)
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let client = self.pool.get().await?;
        let n = client
            .execute("DELETE FROM carts WHERE updated_at < $1", &[&cutoff])
            .await?;
        Ok(n)
    }
}
