//! Order lifecycle: placement from explicit items or the caller's cart,
//! status transitions with an append-only history, and admin statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use model::{
    Address, Cart, DailyRevenue, Identity, LineItem, NotificationKind, Order, OrderHistoryEntry, OrderStats,
    OrderStatus, PaymentKind, Priority, ShippingAddress, StatusCounts, Totals, TransitionPolicy,
};
use repository::{CartClaim, CartRepository, FlaggedRepository, OrdersRepository, RepositoryError};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::cart::MAX_WRITE_ATTEMPTS;
use crate::inventory::InventoryValidator;
use crate::notify::{Notice, Notifier};
use crate::totals::{compute_totals, validate_line};
use crate::ServiceError;

/// Days covered by the daily revenue series, today included.
pub const REVENUE_WINDOW_DAYS: i64 = 30;

/// Checks an admin-issued status change against `policy`.
///
/// Under [`TransitionPolicy::Strict`] only the forward moves
/// Processing→{Shipped, Delivered, Cancelled} and Shipped→{Delivered, Cancelled}
/// are allowed; Delivered and Cancelled are terminal.
pub fn check_transition(policy: TransitionPolicy, from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    use OrderStatus::*;

    let allowed = match policy {
        TransitionPolicy::Permissive => true,
        TransitionPolicy::Strict => matches!(
            (from, to),
            (Processing, Shipped) | (Processing, Delivered) | (Processing, Cancelled) | (Shipped, Delivered) | (Shipped, Cancelled)
        ),
    };
    if allowed {
        Ok(())
    } else {
        Err(ServiceError::transition(from, to))
    }
}

/// Aggregates orders for the admin dashboard.
///
/// Counts cover every order; revenue and the daily series skip cancelled
/// orders. The daily series spans the last [`REVENUE_WINDOW_DAYS`] UTC days
/// and omits days without orders.
pub fn order_stats(orders: &[Order], now: DateTime<Utc>) -> OrderStats {
    let window_start = now.date_naive() - Duration::days(REVENUE_WINDOW_DAYS - 1);
    let mut by_status = StatusCounts::default();
    let mut revenue = Decimal::ZERO;
    let mut daily: BTreeMap<_, (u64, Decimal)> = BTreeMap::new();

    for order in orders {
        by_status.record(order.status);
        if order.status == OrderStatus::Cancelled {
            continue;
        }
        revenue += order.totals.total;
        let day = order.created_at.date_naive();
        if day >= window_start {
            let bucket = daily.entry(day).or_insert((0, Decimal::ZERO));
            bucket.0 += 1;
            bucket.1 += order.totals.total;
        }
    }

    OrderStats {
        total_orders: orders.len() as u64,
        by_status,
        revenue,
        daily_revenue: daily
            .into_iter()
            .map(|(date, (orders, revenue))| DailyRevenue { date, orders, revenue })
            .collect(),
    }
}

/// Body of a place-order request. Without `items` the caller's cart is
/// checked out; without `shippingAddress` the caller's default address is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrder {
    #[serde(default)]
    pub items: Option<Vec<LineItem>>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: PaymentKind,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of an admin status update.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: OrderStatus,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            status,
            note: None,
            location: None,
            estimated_delivery_date: None,
            tracking_number: None,
        }
    }
}

pub struct OrderService {
    orders: Arc<dyn OrdersRepository>,
    carts: Arc<dyn CartRepository>,
    addresses: Arc<dyn FlaggedRepository<Address>>,
    inventory: InventoryValidator,
    notifier: Arc<Notifier>,
    tax_rate: Decimal,
    policy: TransitionPolicy,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrdersRepository>,
        carts: Arc<dyn CartRepository>,
        addresses: Arc<dyn FlaggedRepository<Address>>,
        inventory: InventoryValidator,
        notifier: Arc<Notifier>,
        tax_rate: Decimal,
        policy: TransitionPolicy,
    ) -> Self {
        Self { orders, carts, addresses, inventory, notifier, tax_rate, policy }
    }

    async fn load(&self, id: &str) -> Result<Order, ServiceError> {
        self.orders.get(id).await?.ok_or_else(|| ServiceError::not_found("Order"))
    }

    async fn shipping_address(
        &self,
        user_id: &str,
        explicit: Option<ShippingAddress>,
    ) -> Result<ShippingAddress, ServiceError> {
        let address = match explicit {
            Some(address) => address,
            None => self
                .addresses
                .find_default(user_id)
                .await?
                .map(|a| ShippingAddress::from(&a))
                .ok_or_else(|| ServiceError::Validation("shipping address is required".into()))?,
        };
        let required = [
            ("street", &address.street),
            ("city", &address.city),
            ("zip", &address.zip),
            ("country", &address.country),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ServiceError::Validation(format!("shipping address {field} is required")));
        }
        Ok(address)
    }

    fn new_order(
        &self,
        user_id: &str,
        items: Vec<LineItem>,
        totals: Totals,
        shipping_address: ShippingAddress,
        request: &PlaceOrder,
    ) -> (Order, OrderHistoryEntry) {
        let now = Utc::now();
        let order = Order {
            id: model::new_id(),
            user_id: user_id.to_string(),
            items,
            shipping_address,
            payment_method: request.payment_method,
            totals,
            status: OrderStatus::Processing,
            tracking_number: None,
            notes: request.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        let entry = OrderHistoryEntry {
            id: model::new_id(),
            order_id: order.id.clone(),
            status: OrderStatus::Processing,
            note: "Order placed".to_string(),
            updated_by: user_id.to_string(),
            location: None,
            estimated_delivery_date: None,
            created_at: now,
        };
        (order, entry)
    }

    /// Places an order for the caller.
    ///
    /// Explicit items are validated line by line against stock. Without
    /// items the caller's cart is re-validated and emptied in the same atomic
    /// write that stores the order.
    ///
    /// # Errors
    /// [`ServiceError::Validation`] for an empty order or a missing address,
    /// [`ServiceError::InvalidLineItem`], [`ServiceError::InsufficientStock`]
    /// or [`ServiceError::NotFound`] for bad explicit items,
    /// [`ServiceError::StaleCartItem`] when a cart line exceeds stock.
    #[instrument(skip(self, identity, request), fields(user_id = %identity.user_id))]
    pub async fn place_order(&self, identity: &Identity, request: PlaceOrder) -> Result<Order, ServiceError> {
        let user_id = identity.user_id.as_str();
        let shipping = self.shipping_address(user_id, request.shipping_address.clone()).await?;

        let order = match request.items.clone() {
            Some(items) => {
                if items.is_empty() {
                    return Err(ServiceError::Validation("order has no items".into()));
                }
                for item in &items {
                    validate_line(item)?;
                    self.inventory
                        .require(item.product_type, &item.product_id, item.quantity)
                        .await?;
                }
                let totals = compute_totals(&items, self.tax_rate)?;
                let (order, entry) = self.new_order(user_id, items, totals, shipping, &request);
                self.orders.place(&order, &entry, None).await?;
                order
            }
            None => self.checkout(user_id, shipping, &request).await?,
        };

        info!(order_id = %order.id, total = %order.totals.total, "Order placed");
        self.notifier
            .notify(
                user_id,
                identity.email.as_deref(),
                Notice::new(
                    NotificationKind::Order,
                    "Order placed",
                    format!("Your order {} has been placed. Total: {}", order.id, order.totals.rounded().total),
                )
                .related_to(order.id.clone()),
            )
            .await;
        Ok(order)
    }

    async fn checkout(
        &self,
        user_id: &str,
        shipping: ShippingAddress,
        request: &PlaceOrder,
    ) -> Result<Order, ServiceError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(stored) = self.carts.get(user_id).await? else {
                return Err(ServiceError::Validation("order has no items".into()));
            };
            let cart = stored.value;
            if cart.is_empty() {
                return Err(ServiceError::Validation("order has no items".into()));
            }
            self.inventory.revalidate(&cart.items).await?;
            let totals = compute_totals(&cart.items, self.tax_rate)?;

            let now = Utc::now();
            let cleared = Cart { items: Vec::new(), totals: Totals::default(), updated_at: now, ..cart.clone() };
            let claim = CartClaim { version: stored.version, cleared };

            let (order, entry) = self.new_order(user_id, cart.items, totals, shipping.clone(), request);
            match self.orders.place(&order, &entry, Some(&claim)).await {
                Ok(()) => return Ok(order),
                Err(RepositoryError::Conflict) => debug!(attempt, "Cart changed during checkout, retrying"),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ServiceError::Contention)
    }

    /// # Errors
    /// [`ServiceError::Unauthorized`] unless the caller owns the order or is an admin.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn get(&self, identity: &Identity, id: &str) -> Result<Order, ServiceError> {
        let order = self.load(id).await?;
        if !identity.can_access(&order.user_id) {
            return Err(ServiceError::Unauthorized);
        }
        Ok(order)
    }

    /// The caller's orders, newest first.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn list_mine(&self, identity: &Identity) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders.list_by_user(&identity.user_id).await?)
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn list_all(&self, identity: &Identity) -> Result<Vec<Order>, ServiceError> {
        if !identity.is_admin() {
            return Err(ServiceError::Unauthorized);
        }
        Ok(self.orders.list_all().await?)
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn stats(&self, identity: &Identity) -> Result<OrderStats, ServiceError> {
        if !identity.is_admin() {
            return Err(ServiceError::Unauthorized);
        }
        let orders = self.orders.list_all().await?;
        Ok(order_stats(&orders, Utc::now()))
    }

    /// Status history of an order, oldest first.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn history(&self, identity: &Identity, id: &str) -> Result<Vec<OrderHistoryEntry>, ServiceError> {
        self.get(identity, id).await?;
        Ok(self.orders.history(id).await?)
    }

    /// Admin status change, checked against the configured transition policy.
    #[instrument(skip(self, identity, update), fields(user_id = %identity.user_id, to = %update.status))]
    pub async fn update_status(
        &self,
        identity: &Identity,
        id: &str,
        update: StatusUpdate,
    ) -> Result<Order, ServiceError> {
        if !identity.is_admin() {
            return Err(ServiceError::Unauthorized);
        }
        let to = update.status;
        let policy = self.policy;
        let note = update.note.clone().unwrap_or_else(|| format!("Status updated to {to}"));
        self.transition(identity, id, to, note, &update, |order| check_transition(policy, order.status, to))
            .await
    }

    /// Cancels an order. The owner may cancel only while it is still
    /// Processing; an admin is held to the transition policy.
    #[instrument(skip(self, identity, reason), fields(user_id = %identity.user_id))]
    pub async fn cancel(&self, identity: &Identity, id: &str, reason: Option<String>) -> Result<Order, ServiceError> {
        let policy = self.policy;
        let note = reason.unwrap_or_else(|| "Order cancelled".to_string());
        let update = StatusUpdate::to(OrderStatus::Cancelled);
        self.transition(identity, id, OrderStatus::Cancelled, note, &update, |order| {
            if !identity.can_access(&order.user_id) {
                return Err(ServiceError::Unauthorized);
            }
            if identity.is_admin() {
                check_transition(policy, order.status, OrderStatus::Cancelled)
            } else if order.status != OrderStatus::Processing {
                Err(ServiceError::transition(order.status, OrderStatus::Cancelled))
            } else {
                Ok(())
            }
        })
        .await
    }

    /// Moves an order to `to` if `guard` accepts its current state, appending
    /// one history entry. The write is conditional on the status that was
    /// read, so a concurrent change forces a re-read and a fresh check.
    async fn transition<G>(
        &self,
        identity: &Identity,
        id: &str,
        to: OrderStatus,
        note: String,
        update: &StatusUpdate,
        guard: G,
    ) -> Result<Order, ServiceError>
    where
        G: Fn(&Order) -> Result<(), ServiceError> + Send + Sync,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.load(id).await?;
            guard(&current)?;

            let now = Utc::now();
            let mut next = current.clone();
            next.status = to;
            next.updated_at = now;
            if let Some(tracking) = &update.tracking_number {
                next.tracking_number = Some(tracking.clone());
            }
            let entry = OrderHistoryEntry {
                id: model::new_id(),
                order_id: id.to_string(),
                status: to,
                note: note.clone(),
                updated_by: identity.user_id.clone(),
                location: update.location.clone(),
                estimated_delivery_date: update.estimated_delivery_date,
                created_at: now,
            };

            match self.orders.transition(&next, current.status, &entry).await {
                Ok(()) => {
                    info!(order_id = id, from = %current.status, to = %to, "Order status changed");
                    self.notify_status(identity, &next).await;
                    return Ok(next);
                }
                Err(RepositoryError::Conflict) => debug!(attempt, "Order status changed concurrently, retrying"),
                Err(RepositoryError::NotFound) => return Err(ServiceError::not_found("Order")),
                Err(e) => return Err(e.into()),
            }
        }
        warn!(order_id = id, "Giving up on status change after {} attempts", MAX_WRITE_ATTEMPTS);
        Err(ServiceError::Contention)
    }

    async fn notify_status(&self, actor: &Identity, order: &Order) {
        let email = if actor.owns(&order.user_id) { actor.email.as_deref() } else { None };
        let mut notice = Notice::new(
            NotificationKind::Order,
            "Order status updated",
            format!("Your order {} is now {}", order.id, order.status),
        )
        .related_to(order.id.clone());
        if order.status == OrderStatus::Cancelled {
            notice.priority = Priority::High;
        }
        self.notifier.notify(&order.user_id, email, notice).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogMailer;
    use memstore::MemoryStore;
    use model::{AddressDraft, AddressKind, ProductType, Role};

    use crate::cart::CartService;
    use crate::defaults::FlaggedService;

    struct Fixture {
        store: Arc<MemoryStore>,
        carts: CartService,
        orders: OrderService,
    }

    async fn fixture(policy: TransitionPolicy) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.set_stock(ProductType::Electronic, "phone", 10).await;
        store.set_stock(ProductType::Car, "sedan", 1).await;
        let inventory = InventoryValidator::new(store.clone());
        let notifier = Arc::new(Notifier::new(store.clone(), Arc::new(LogMailer), "shop@example.com"));
        let rate = Decimal::new(10, 2);
        Fixture {
            carts: CartService::new(store.clone(), inventory.clone(), rate),
            orders: OrderService::new(store.clone(), store.clone(), store.clone(), inventory, notifier, rate, policy),
            store,
        }
    }

    fn buyer() -> Identity {
        Identity::new("u1", Role::Buyer)
    }

    fn admin() -> Identity {
        Identity::new("root", Role::Admin)
    }

    fn item(product_type: ProductType, product_id: &str, cents: i64, quantity: u32) -> LineItem {
        LineItem {
            product_type,
            product_id: product_id.to_string(),
            name: product_id.to_string(),
            unit_price: Decimal::new(cents, 2),
            quantity,
            variant: None,
            image: None,
            last_updated: None,
        }
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            name: Some("Jo".into()),
            street: "1 Main St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            zip: "62701".into(),
            country: "US".into(),
        }
    }

    fn request(items: Option<Vec<LineItem>>) -> PlaceOrder {
        PlaceOrder {
            items,
            shipping_address: Some(address()),
            payment_method: PaymentKind::Card,
            notes: None,
        }
    }

    async fn placed(f: &Fixture) -> Order {
        f.orders
            .place_order(&buyer(), request(Some(vec![item(ProductType::Electronic, "phone", 10000, 2)])))
            .await
            .unwrap()
    }

    #[test]
    fn test_strict_transition_table() {
        use OrderStatus::*;
        let strict = TransitionPolicy::Strict;
        assert!(check_transition(strict, Processing, Shipped).is_ok());
        assert!(check_transition(strict, Processing, Delivered).is_ok());
        assert!(check_transition(strict, Shipped, Cancelled).is_ok());
        assert!(check_transition(strict, Delivered, Shipped).is_err());
        assert!(check_transition(strict, Cancelled, Processing).is_err());
        assert!(check_transition(strict, Shipped, Processing).is_err());
        assert!(check_transition(TransitionPolicy::Permissive, Delivered, Shipped).is_ok());
    }

    #[test]
    fn test_order_stats() {
        let now = Utc::now();
        let make = |status, cents, days_ago| Order {
            id: model::new_id(),
            user_id: "u1".into(),
            items: Vec::new(),
            shipping_address: address(),
            payment_method: PaymentKind::Paypal,
            totals: Totals { subtotal: Decimal::ZERO, tax: Decimal::ZERO, total: Decimal::new(cents, 2) },
            status,
            tracking_number: None,
            notes: None,
            created_at: now - Duration::days(days_ago),
            updated_at: now,
        };
        let orders = vec![
            make(OrderStatus::Processing, 1000, 0),
            make(OrderStatus::Delivered, 2000, 0),
            make(OrderStatus::Cancelled, 5000, 0),
            make(OrderStatus::Shipped, 700, 3),
            make(OrderStatus::Delivered, 9900, 45),
        ];

        let stats = order_stats(&orders, now);
        assert_eq!(stats.total_orders, 5);
        assert_eq!(stats.by_status.delivered, 2);
        assert_eq!(stats.by_status.cancelled, 1);
        assert_eq!(stats.revenue, Decimal::new(13600, 2));
        assert_eq!(stats.daily_revenue.len(), 2);
        let today = stats.daily_revenue.last().unwrap();
        assert_eq!(today.date, now.date_naive());
        assert_eq!(today.orders, 2);
        assert_eq!(today.revenue, Decimal::new(3000, 2));
    }

    #[tokio::test]
    async fn test_place_order_from_items() {
        let f = fixture(TransitionPolicy::Strict).await;
        let order = placed(&f).await;
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.totals.total, Decimal::new(220, 0));

        let history = f.orders.history(&buyer(), &order.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].note, "Order placed");
    }

    #[tokio::test]
    async fn test_place_order_rejects_bad_items() {
        let f = fixture(TransitionPolicy::Strict).await;
        let too_many = request(Some(vec![item(ProductType::Car, "sedan", 100, 2)]));
        assert!(matches!(
            f.orders.place_order(&buyer(), too_many).await,
            Err(ServiceError::InsufficientStock { available: 1, .. })
        ));
        let unknown = request(Some(vec![item(ProductType::Car, "ghost", 100, 1)]));
        assert!(matches!(f.orders.place_order(&buyer(), unknown).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(
            f.orders.place_order(&buyer(), request(Some(Vec::new()))).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            f.orders.place_order(&buyer(), request(None)).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_checkout_clears_cart() {
        let f = fixture(TransitionPolicy::Strict).await;
        f.carts.add_item("u1", item(ProductType::Electronic, "phone", 5000, 3)).await.unwrap();

        let order = f.orders.place_order(&buyer(), request(None)).await.unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.totals.subtotal, Decimal::new(150, 0));
        assert!(f.carts.get("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_with_stale_cart_writes_nothing() {
        let f = fixture(TransitionPolicy::Strict).await;
        f.carts.add_item("u1", item(ProductType::Car, "sedan", 100, 2)).await.unwrap();

        let err = f.orders.place_order(&buyer(), request(None)).await.unwrap_err();
        assert!(matches!(err, ServiceError::StaleCartItem { requested: 2, available: 1, .. }));
        assert_eq!(f.carts.get("u1").await.unwrap().items.len(), 1);
        assert!(f.orders.list_mine(&buyer()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_address_fallback() {
        let f = fixture(TransitionPolicy::Strict).await;
        let mut req = request(Some(vec![item(ProductType::Electronic, "phone", 100, 1)]));
        req.shipping_address = None;
        assert!(matches!(
            f.orders.place_order(&buyer(), req.clone()).await,
            Err(ServiceError::Validation(_))
        ));

        let addresses: FlaggedService<Address> = FlaggedService::new(f.store.clone());
        let draft = AddressDraft {
            kind: AddressKind::Work,
            name: None,
            street: "5 Office Rd".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            zip: "62701".into(),
            country: "US".into(),
            is_default: true,
        };
        addresses.add(&buyer(), draft).await.unwrap();

        let order = f.orders.place_order(&buyer(), req).await.unwrap();
        assert_eq!(order.shipping_address.street, "5 Office Rd");
    }

    #[tokio::test]
    async fn test_strict_lifecycle() {
        let f = fixture(TransitionPolicy::Strict).await;
        let order = placed(&f).await;

        let delivered = f
            .orders
            .update_status(&admin(), &order.id, StatusUpdate::to(OrderStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);

        let err = f
            .orders
            .update_status(&admin(), &order.id, StatusUpdate::to(OrderStatus::Shipped))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { ref from, ref to } if from == "Delivered" && to == "Shipped"));
        assert_eq!(f.orders.history(&admin(), &order.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_permissive_policy_allows_any_admin_move() {
        let f = fixture(TransitionPolicy::Permissive).await;
        let order = placed(&f).await;
        f.orders
            .update_status(&admin(), &order.id, StatusUpdate::to(OrderStatus::Delivered))
            .await
            .unwrap();
        let back = f
            .orders
            .update_status(&admin(), &order.id, StatusUpdate::to(OrderStatus::Shipped))
            .await
            .unwrap();
        assert_eq!(back.status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn test_status_update_records_tracking() {
        let f = fixture(TransitionPolicy::Strict).await;
        let order = placed(&f).await;
        let mut update = StatusUpdate::to(OrderStatus::Shipped);
        update.tracking_number = Some("TRK-1".into());
        update.location = Some("Hub A".into());

        let shipped = f.orders.update_status(&admin(), &order.id, update).await.unwrap();
        assert_eq!(shipped.tracking_number.as_deref(), Some("TRK-1"));
        let history = f.orders.history(&buyer(), &order.id).await.unwrap();
        assert_eq!(history[1].location.as_deref(), Some("Hub A"));
        assert_eq!(history[1].updated_by, "root");
    }

    #[tokio::test]
    async fn test_cancellation_rules() {
        let f = fixture(TransitionPolicy::Strict).await;
        let order = placed(&f).await;
        let stranger = Identity::new("u2", Role::Buyer);

        assert!(matches!(
            f.orders.update_status(&buyer(), &order.id, StatusUpdate::to(OrderStatus::Shipped)).await,
            Err(ServiceError::Unauthorized)
        ));
        assert!(matches!(f.orders.cancel(&stranger, &order.id, None).await, Err(ServiceError::Unauthorized)));

        f.orders
            .update_status(&admin(), &order.id, StatusUpdate::to(OrderStatus::Shipped))
            .await
            .unwrap();
        assert!(matches!(
            f.orders.cancel(&buyer(), &order.id, None).await,
            Err(ServiceError::InvalidTransition { .. })
        ));

        let cancelled = f.orders.cancel(&admin(), &order.id, Some("lost in transit".into())).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_owner_cancels_processing_order() {
        let f = fixture(TransitionPolicy::Strict).await;
        let order = placed(&f).await;
        let cancelled = f.orders.cancel(&buyer(), &order.id, None).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(f.orders.cancel(&buyer(), &order.id, None).await.is_err());
    }

    #[tokio::test]
    async fn test_access_rules() {
        let f = fixture(TransitionPolicy::Strict).await;
        let order = placed(&f).await;
        let stranger = Identity::new("u2", Role::Seller);

        assert!(matches!(f.orders.get(&stranger, &order.id).await, Err(ServiceError::Unauthorized)));
        assert!(f.orders.get(&admin(), &order.id).await.is_ok());
        assert!(matches!(f.orders.list_all(&buyer()).await, Err(ServiceError::Unauthorized)));
        assert_eq!(f.orders.list_all(&admin()).await.unwrap().len(), 1);
        assert_eq!(f.orders.stats(&admin()).await.unwrap().total_orders, 1);
        assert!(matches!(f.orders.get(&admin(), "missing").await, Err(ServiceError::NotFound(_))));
    }
}
