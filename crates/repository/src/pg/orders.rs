use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{Order, OrderHistoryEntry, OrderStatus};
use tokio_postgres::Row;
use tokio_postgres::types::Json;

use crate::{CartClaim, OrdersRepository, RepositoryError};

/// PostgreSQL implementation of the OrdersRepository trait.
pub struct PgOrdersRepository {
    pool: Pool,
}

impl PgOrdersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn order_from_row(row: &Row) -> Result<Order, RepositoryError> {
    let Json(order): Json<Order> = row.try_get("doc")?;
    Ok(order)
}

const INSERT_HISTORY: &str = r#"
    INSERT INTO order_history (id, order_id, created_at, doc)
    VALUES ($1, $2, $3, $4)
"#;

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn place(
        &self,
        order: &Order,
        entry: &OrderHistoryEntry,
        claim: Option<&CartClaim>,
    ) -> Result<(), RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        if let Some(claim) = claim {
            let query = r#"
                UPDATE carts SET version = version + 1, updated_at = $2, doc = $3
                WHERE user_id = $1 AND version = $4
            "#;
            let n = tx
                .execute(query, &[
                    &claim.cleared.user_id,
                    &claim.cleared.updated_at,
                    &Json(&claim.cleared),
                    &claim.version,
                ])
                .await?;
            if n == 0 {
                return Err(RepositoryError::Conflict);
            }
        }

        let query = r#"
            INSERT INTO orders (id, user_id, status, created_at, doc)
            VALUES ($1, $2, $3, $4, $5)
        "#;
        tx.execute(query, &[
            &order.id,
            &order.user_id,
            &order.status.as_str(),
            &order.created_at,
            &Json(order),
        ])
        .await?;
        tx.execute(INSERT_HISTORY, &[&entry.id, &entry.order_id, &entry.created_at, &Json(entry)])
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client.query_opt("SELECT doc FROM orders WHERE id = $1", &[&id]).await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT doc FROM orders WHERE user_id = $1 ORDER BY created_at DESC", &[&user_id])
            .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT doc FROM orders ORDER BY created_at DESC", &[]).await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn transition(
        &self,
        order: &Order,
        expected: OrderStatus,
        entry: &OrderHistoryEntry,
    ) -> Result<(), RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let n = tx
            .execute(
                "UPDATE orders SET status = $2, doc = $3 WHERE id = $1 AND status = $4",
                &[&order.id, &order.status.as_str(), &Json(order), &expected.as_str()],
            )
            .await?;
        if n == 0 {
            let exists = tx.query_opt("SELECT 1 FROM orders WHERE id = $1", &[&order.id]).await?;
            return Err(if exists.is_some() { RepositoryError::Conflict } else { RepositoryError::NotFound });
        }
        tx.execute(INSERT_HISTORY, &[&entry.id, &entry.order_id, &entry.created_at, &Json(entry)])
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn history(&self, order_id: &str) -> Result<Vec<OrderHistoryEntry>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT doc FROM order_history WHERE order_id = $1 ORDER BY created_at ASC",
                &[&order_id],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let Json(entry): Json<OrderHistoryEntry> = row.try_get("doc")?;
                Ok(entry)
            })
            .collect()
    }
}
