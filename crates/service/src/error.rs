use repository::RepositoryError;
use thiserror::Error;

/// The error type returned by every business operation.
///
/// Validation and ownership failures are detected before anything is written,
/// so an error never leaves a partial mutation behind.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The named entity does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The caller neither owns the entity nor holds the admin role.
    #[error("Not authorized")]
    Unauthorized,
    /// A status change that the lifecycle rules do not allow.
    #[error("Cannot change status from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Insufficient stock for {product_id}: only {available} available")]
    InsufficientStock { product_id: String, available: u32 },
    /// A cart line asks for more than is now in stock.
    #[error("Cart item {product_id} requests {requested} but only {available} available")]
    StaleCartItem {
        product_id: String,
        requested: u32,
        available: u32,
    },
    #[error("The requested time slot is not available")]
    SlotUnavailable,
    /// The product is not in the caller's cart.
    #[error("Item {0} not found in cart")]
    ItemNotFound(String),
    #[error("Invalid line item: {0}")]
    InvalidLineItem(String),
    #[error("{0}")]
    Validation(String),
    /// Concurrent writers kept winning the conditional write.
    #[error("Too many concurrent updates, please retry")]
    Contention,
    #[error("Storage error: {0}")]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "NotFound",
            ServiceError::Unauthorized => "Unauthorized",
            ServiceError::InvalidTransition { .. } => "InvalidTransition",
            ServiceError::InsufficientStock { .. } => "InsufficientStock",
            ServiceError::StaleCartItem { .. } => "StaleCartItem",
            ServiceError::SlotUnavailable => "SlotUnavailable",
            ServiceError::ItemNotFound(_) => "ItemNotFound",
            ServiceError::InvalidLineItem(_) => "InvalidLineItem",
            ServiceError::Validation(_) => "Validation",
            ServiceError::Contention => "Contention",
            ServiceError::Repository(_) => "Repository",
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        ServiceError::NotFound(what.into())
    }

    pub(crate) fn transition(from: impl ToString, to: impl ToString) -> Self {
        ServiceError::InvalidTransition { from: from.to_string(), to: to.to_string() }
    }
}
