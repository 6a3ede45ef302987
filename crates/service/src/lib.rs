//! Business-rule engine of the marketplace backend.
//!
//! Each service owns one aggregate and talks to storage only through the
//! repository traits, so the same rules run against PostgreSQL or the
//! in-memory store.
//!
//! # Components
//! - [`totals`]: exact subtotal/tax/total computation.
//! - [`inventory`]: stock checks against the product catalogue.
//! - [`cart`]: the per-user cart engine with versioned writes.
//! - [`defaults`]: the single-default rule for addresses and payment methods.
//! - [`orders`]: order placement, status lifecycle and statistics.
//! - [`schedule`]: appointment slot availability and booking.
//! - [`notify`]: best-effort in-app and email notifications.

use std::sync::Arc;

use model::{Address, PaymentMethod};
use repository::{
    AppointmentsRepository, CartRepository, FlaggedRepository, NotificationsRepository, OrdersRepository,
    ProductCatalog,
};

pub mod cart;
pub mod defaults;
mod error;
pub mod inventory;
pub mod notify;
pub mod orders;
pub mod schedule;
mod settings;
pub mod totals;

pub use cart::CartService;
pub use defaults::FlaggedService;
pub use error::ServiceError;
pub use inventory::{InventoryValidator, StockCheck};
pub use notify::{Email, HttpMailer, LogMailer, MailError, Mailer, NotificationService, Notifier};
pub use orders::{OrderService, PlaceOrder, StatusUpdate};
pub use schedule::{AppointmentChanges, AppointmentService, BookAppointment};
pub use settings::EngineSettings;

/// The storage capabilities the engine runs against.
#[derive(Clone)]
pub struct Backend {
    pub carts: Arc<dyn CartRepository>,
    pub orders: Arc<dyn OrdersRepository>,
    pub addresses: Arc<dyn FlaggedRepository<Address>>,
    pub payment_methods: Arc<dyn FlaggedRepository<PaymentMethod>>,
    pub appointments: Arc<dyn AppointmentsRepository>,
    pub notifications: Arc<dyn NotificationsRepository>,
    pub catalog: Arc<dyn ProductCatalog>,
}

impl Backend {
    /// Uses one store for every capability.
    pub fn single<S>(store: Arc<S>) -> Self
    where
        S: CartRepository
            + OrdersRepository
            + FlaggedRepository<Address>
            + FlaggedRepository<PaymentMethod>
            + AppointmentsRepository
            + NotificationsRepository
            + ProductCatalog
            + 'static,
    {
        Self {
            carts: store.clone(),
            orders: store.clone(),
            addresses: store.clone(),
            payment_methods: store.clone(),
            appointments: store.clone(),
            notifications: store.clone(),
            catalog: store,
        }
    }
}

/// Every service, wired to one backend.
pub struct Services {
    pub carts: CartService,
    pub orders: OrderService,
    pub addresses: FlaggedService<Address>,
    pub payment_methods: FlaggedService<PaymentMethod>,
    pub appointments: AppointmentService,
    pub notifications: NotificationService,
}

impl Services {
    pub fn new(backend: Backend, settings: &EngineSettings, mailer: Arc<dyn Mailer>) -> Self {
        let inventory = InventoryValidator::new(backend.catalog.clone());
        let notifier = Arc::new(Notifier::new(
            backend.notifications.clone(),
            mailer,
            settings.mail_from.clone(),
        ));

        Self {
            carts: CartService::new(backend.carts.clone(), inventory.clone(), settings.tax_rate),
            orders: OrderService::new(
                backend.orders.clone(),
                backend.carts.clone(),
                backend.addresses.clone(),
                inventory,
                notifier.clone(),
                settings.tax_rate,
                settings.transition_policy,
            ),
            addresses: FlaggedService::new(backend.addresses),
            payment_methods: FlaggedService::new(backend.payment_methods),
            appointments: AppointmentService::new(
                backend.appointments,
                notifier,
                settings.business_hours_start,
                settings.business_hours_end,
                settings.slot_step_minutes,
            ),
            notifications: NotificationService::new(backend.notifications),
        }
    }
}
