//! # Data Repository Layer
//!
//! This module provides the persistence capability the business-rule engine
//! consumes: one repository trait per aggregate, plus PostgreSQL
//! implementations (see [`pg`]) that keep every collection as JSONB documents.
//!
//! Single-writer semantics per aggregate are expressed in the trait contracts:
//! carts use versioned conditional writes, order status changes are
//! conditional on the expected status, and default-flag changes are
//! serialized per user and collection.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use model::{
    AppointmentStatus, Cart, DefaultFlagged, Notification, Order, OrderHistoryEntry, OrderStatus, ProductType,
    ServiceAppointment,
};
use thiserror::Error;

pub mod pg;

pub use pg::{
    PgAppointmentsRepository, PgCartsRepository, PgFlaggedRepository, PgNotificationsRepository,
    PgOrdersRepository, PgProductCatalog,
};

/// # RepositoryError
///
/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// Failed to obtain a connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    /// A stored document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// No result found.
    #[error("Not found")]
    NotFound,
    /// A conditional write lost against a concurrent writer.
    #[error("Write conflict")]
    Conflict,
}

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: i64,
    pub value: T,
}

/// Cart to be emptied as part of a checkout, valid only if the stored cart is
/// still at `version`.
#[derive(Debug, Clone)]
pub struct CartClaim {
    pub version: i64,
    pub cleared: Cart,
}

/// # CartRepository
///
/// One cart per user, written with optimistic concurrency.
#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<Versioned<Cart>>, RepositoryError>;

    /// Writes `cart` if the stored version still equals `expected_version`
    /// (`None` means "no cart stored yet"). Returns the new version, or
    /// [`RepositoryError::Conflict`] if another writer got there first.
    async fn save(&self, cart: &Cart, expected_version: Option<i64>) -> Result<i64, RepositoryError>;

    /// Deletes carts not updated since `cutoff`. Returns how many were removed.
    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// # OrdersRepository
///
/// Orders and their append-only status history.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// Inserts the order with its first history entry. With a `claim`, the
    /// owner's cart is replaced by `claim.cleared` in the same atomic write;
    /// a stale claim yields [`RepositoryError::Conflict`] and nothing is written.
    async fn place(
        &self,
        order: &Order,
        entry: &OrderHistoryEntry,
        claim: Option<&CartClaim>,
    ) -> Result<(), RepositoryError>;

    async fn get(&self, id: &str) -> Result<Option<Order>, RepositoryError>;

    /// Orders of one user, newest first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Order>, RepositoryError>;

    /// All orders, newest first.
    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError>;

    /// Stores `order` (carrying its new status) only if the stored status is
    /// still `expected`, and appends `entry`. Conflict otherwise.
    async fn transition(
        &self,
        order: &Order,
        expected: OrderStatus,
        entry: &OrderHistoryEntry,
    ) -> Result<(), RepositoryError>;

    /// History of one order, oldest first.
    async fn history(&self, order_id: &str) -> Result<Vec<OrderHistoryEntry>, RepositoryError>;
}

/// # FlaggedRepository
///
/// A user-scoped collection in which at most one entity per user is flagged
/// default. Every write that raises the flag clears the siblings' flags in the
/// same atomic step, serialized against other writers of the same user.
#[async_trait]
pub trait FlaggedRepository<T: DefaultFlagged>: Send + Sync {
    async fn list(&self, user_id: &str) -> Result<Vec<T>, RepositoryError>;
    async fn get(&self, id: &str) -> Result<Option<T>, RepositoryError>;
    async fn find_default(&self, user_id: &str) -> Result<Option<T>, RepositoryError>;
    async fn insert(&self, entity: &T) -> Result<(), RepositoryError>;
    /// [`RepositoryError::NotFound`] if the entity does not exist.
    async fn update(&self, entity: &T) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &str) -> Result<bool, RepositoryError>;
    /// Clears every flag of `user_id` and raises the one of `id`. Returns the
    /// promoted entity, or `None` (and no change) if `id` is not the user's.
    async fn set_default(&self, user_id: &str, id: &str) -> Result<Option<T>, RepositoryError>;
}

/// # AppointmentsRepository
///
/// A single global service schedule. Writes that occupy a slot re-check
/// overlap under a per-date lock so two bookings cannot both win.
#[async_trait]
pub trait AppointmentsRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<ServiceAppointment>, RepositoryError>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ServiceAppointment>, RepositoryError>;
    /// Non-cancelled appointments on `date`, ordered by start time.
    async fn list_active_on(&self, date: NaiveDate) -> Result<Vec<ServiceAppointment>, RepositoryError>;
    /// Inserts unless an active appointment overlaps. Returns whether it was stored.
    async fn insert_if_available(&self, appointment: &ServiceAppointment) -> Result<bool, RepositoryError>;
    /// Replaces the stored appointment unless its new slot overlaps another
    /// active one. [`RepositoryError::NotFound`] if it does not exist,
    /// [`RepositoryError::Conflict`] if its stored status is no longer `expected`.
    async fn update_if_available(
        &self,
        appointment: &ServiceAppointment,
        expected: AppointmentStatus,
    ) -> Result<bool, RepositoryError>;
    /// Replaces the stored appointment without an availability check, provided
    /// its stored status is still `expected`.
    async fn update(&self, appointment: &ServiceAppointment, expected: AppointmentStatus) -> Result<(), RepositoryError>;
}

/// # NotificationsRepository
#[async_trait]
pub trait NotificationsRepository: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<(), RepositoryError>;
    async fn get(&self, id: &str) -> Result<Option<Notification>, RepositoryError>;
    /// A page of one user's notifications, newest first.
    async fn list_by_user(&self, user_id: &str, offset: u64, limit: u64) -> Result<Vec<Notification>, RepositoryError>;
    async fn count_by_user(&self, user_id: &str) -> Result<u64, RepositoryError>;
    async fn unread_count(&self, user_id: &str) -> Result<u64, RepositoryError>;
    async fn update(&self, notification: &Notification) -> Result<(), RepositoryError>;
    async fn mark_all_read(&self, user_id: &str) -> Result<u64, RepositoryError>;
    async fn delete(&self, id: &str) -> Result<bool, RepositoryError>;
    async fn delete_read(&self, user_id: &str) -> Result<u64, RepositoryError>;
}

/// # ProductCatalog
///
/// Read-only stock lookup; `None` when the product does not exist.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn stock_of(&self, product_type: ProductType, product_id: &str) -> Result<Option<u32>, RepositoryError>;
}
