use std::marker::PhantomData;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::DefaultFlagged;
use tokio_postgres::types::Json;
use tokio_postgres::{Row, Transaction};

use super::advisory_lock;
use crate::{FlaggedRepository, RepositoryError};

/// PostgreSQL implementation of [`FlaggedRepository`] for any
/// [`DefaultFlagged`] entity; the table comes from `T::COLLECTION`.
///
/// Flag changes run in a transaction holding an advisory lock on
/// `<table>:<user>`, and the table carries a partial unique index on
/// `(user_id) WHERE is_default` as a backstop.
pub struct PgFlaggedRepository<T> {
    pool: Pool,
    table: &'static str,
    _entity: PhantomData<fn() -> T>,
}

impl<T: DefaultFlagged> PgFlaggedRepository<T> {
    pub fn new(pool: Pool) -> Self {
        Self { pool, table: T::COLLECTION.table(), _entity: PhantomData }
    }

    async fn lock_user(&self, tx: &Transaction<'_>, user_id: &str) -> Result<(), RepositoryError> {
        advisory_lock(tx, &format!("{}:{}", self.table, user_id)).await
    }

    /// Clears the flag on every entity of `user_id` except `keep_id`.
    async fn clear_siblings(&self, tx: &Transaction<'_>, user_id: &str, keep_id: &str) -> Result<(), RepositoryError> {
        let query = format!(
            "UPDATE {} SET is_default = FALSE, doc = jsonb_set(doc, '{{isDefault}}', 'false'::jsonb) \
             WHERE user_id = $1 AND id <> $2 AND is_default",
            self.table
        );
        tx.execute(query.as_str(), &[&user_id, &keep_id]).await?;
        Ok(())
    }
}

fn entity_from_row<T: DefaultFlagged>(row: &Row) -> Result<T, RepositoryError> {
    let Json(entity): Json<T> = row.try_get("doc")?;
    Ok(entity)
}

#[async_trait]
impl<T: DefaultFlagged> FlaggedRepository<T> for PgFlaggedRepository<T> {
    async fn list(&self, user_id: &str) -> Result<Vec<T>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT doc FROM {} WHERE user_id = $1 ORDER BY created_at ASC", self.table);
        let rows = client.query(query.as_str(), &[&user_id]).await?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<T>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT doc FROM {} WHERE id = $1", self.table);
        let row = client.query_opt(query.as_str(), &[&id]).await?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn find_default(&self, user_id: &str) -> Result<Option<T>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT doc FROM {} WHERE user_id = $1 AND is_default", self.table);
        let row = client.query_opt(query.as_str(), &[&user_id]).await?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn insert(&self, entity: &T) -> Result<(), RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        self.lock_user(&tx, entity.owner()).await?;
        if entity.is_default() {
            self.clear_siblings(&tx, entity.owner(), entity.id()).await?;
        }
        let query = format!(
            "INSERT INTO {} (id, user_id, is_default, created_at, doc) VALUES ($1, $2, $3, NOW(), $4)",
            self.table
        );
        tx.execute(query.as_str(), &[&entity.id(), &entity.owner(), &entity.is_default(), &Json(entity)])
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, entity: &T) -> Result<(), RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        self.lock_user(&tx, entity.owner()).await?;
        if entity.is_default() {
            self.clear_siblings(&tx, entity.owner(), entity.id()).await?;
        }
        let query = format!("UPDATE {} SET is_default = $2, doc = $3 WHERE id = $1", self.table);
        let n = tx
            .execute(query.as_str(), &[&entity.id(), &entity.is_default(), &Json(entity)])
            .await?;
        if n == 0 {
            return Err(RepositoryError::NotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!("DELETE FROM {} WHERE id = $1", self.table);
        let n = client.execute(query.as_str(), &[&id]).await?;
        Ok(n > 0)
    }

    async fn set_default(&self, user_id: &str, id: &str) -> Result<Option<T>, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        self.lock_user(&tx, user_id).await?;

        let query = format!("SELECT doc FROM {} WHERE id = $1 AND user_id = $2", self.table);
        let Some(row) = tx.query_opt(query.as_str(), &[&id, &user_id]).await? else {
            return Ok(None);
        };
        let mut entity: T = entity_from_row(&row)?;
        entity.set_default(true);
        entity.touch(chrono::Utc::now());

        self.clear_siblings(&tx, user_id, id).await?;
        let query = format!("UPDATE {} SET is_default = TRUE, doc = $2 WHERE id = $1", self.table);
        tx.execute(query.as_str(), &[&id, &Json(&entity)]).await?;

        tx.commit().await?;
        Ok(Some(entity))
    }
}
