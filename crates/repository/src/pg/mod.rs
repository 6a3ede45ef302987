//! PostgreSQL implementations of the repository traits.
//!
//! Each collection is a table with a key column, a few indexed columns used
//! for filtering and conditional writes, and a `doc JSONB` body holding the
//! serialized entity (see `migrations/`).

use tokio_postgres::Transaction;

use crate::RepositoryError;

mod appointments;
mod carts;
mod flagged;
mod notifications;
mod orders;
mod products;

pub use appointments::PgAppointmentsRepository;
pub use carts::PgCartsRepository;
pub use flagged::PgFlaggedRepository;
pub use notifications::PgNotificationsRepository;
pub use orders::PgOrdersRepository;
pub use products::PgProductCatalog;

/// Takes a transaction-scoped advisory lock on `key`. Released on commit or rollback.
async fn advisory_lock(tx: &Transaction<'_>, key: &str) -> Result<(), RepositoryError> {
    tx.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&key]).await?;
    Ok(())
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or_default()
}
