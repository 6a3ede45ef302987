use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::Notification;
use tokio_postgres::Row;
use tokio_postgres::types::Json;

use super::{to_i64, to_u64};
use crate::{NotificationsRepository, RepositoryError};

/// PostgreSQL implementation of the NotificationsRepository trait.
pub struct PgNotificationsRepository {
    pool: Pool,
}

impl PgNotificationsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn notification_from_row(row: &Row) -> Result<Notification, RepositoryError> {
    let Json(notification): Json<Notification> = row.try_get("doc")?;
    Ok(notification)
}

#[async_trait]
impl NotificationsRepository for PgNotificationsRepository {
    async fn insert(&self, notification: &Notification) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO notifications (id, user_id, read, created_at, doc)
            VALUES ($1, $2, $3, $4, $5)
        "#;
        client
            .execute(query, &[
                &notification.id,
                &notification.user_id,
                &notification.read,
                &notification.created_at,
                &Json(notification),
            ])
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client.query_opt("SELECT doc FROM notifications WHERE id = $1", &[&id]).await?;
        row.as_ref().map(notification_from_row).transpose()
    }

    async fn list_by_user(&self, user_id: &str, offset: u64, limit: u64) -> Result<Vec<Notification>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT doc FROM notifications WHERE user_id = $1
            ORDER BY created_at DESC
            OFFSET $2 LIMIT $3
        "#;
        let rows = client.query(query, &[&user_id, &to_i64(offset), &to_i64(limit)]).await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn count_by_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) AS n FROM notifications WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(to_u64(row.try_get("n")?))
    }

    async fn unread_count(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS n FROM notifications WHERE user_id = $1 AND NOT read",
                &[&user_id],
            )
            .await?;
        Ok(to_u64(row.try_get("n")?))
    }

    async fn update(&self, notification: &Notification) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let n = client
            .execute(
                "UPDATE notifications SET read = $2, doc = $3 WHERE id = $1",
                &[&notification.id, &notification.read, &Json(notification)],
            )
            .await?;
        if n == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE notifications SET read = TRUE, doc = jsonb_set(doc, '{read}', 'true'::jsonb)
            WHERE user_id = $1 AND NOT read
        "#;
        Ok(client.execute(query, &[&user_id]).await?)
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let n = client.execute("DELETE FROM notifications WHERE id = $1", &[&id]).await?;
        Ok(n > 0)
    }

    async fn delete_read(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let client = self.pool.get().await?;
        Ok(client
            .execute("DELETE FROM notifications WHERE user_id = $1 AND read", &[&user_id])
            .await?)
    }
}
