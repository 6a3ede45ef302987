//! Domain types shared by every layer of the marketplace backend.
//!
//! Everything here is plain data plus a handful of pure helpers (line totals,
//! appointment intervals, the default-flag rule). Persistence and business
//! orchestration live in the `repository` and `service` crates.

pub mod appointment;
pub mod cart;
pub mod identity;
pub mod notification;
pub mod order;
pub mod product;
pub mod profile;

use thiserror::Error;

pub use appointment::{AppointmentStatus, ServiceAppointment, ServiceType, TimeInterval, VehicleInfo};
pub use cart::{Cart, CartSummary, ItemTypeCounts, LineItem, Totals, Variant};
pub use identity::{Identity, Role};
pub use notification::{Notification, NotificationKind, NotificationPage, Priority};
pub use order::{
    DailyRevenue, Order, OrderHistoryEntry, OrderStats, OrderStatus, PaymentKind, ShippingAddress,
    StatusCounts, TransitionPolicy,
};
pub use product::ProductType;
pub use profile::{
    Address, AddressDraft, AddressKind, DefaultFlagged, FlaggedCollection, FlaggedDraft, PaymentDetails,
    PaymentMethod, PaymentMethodDraft, promote_default,
};

/// Generates a fresh opaque document key.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Error returned when a textual enum value cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
