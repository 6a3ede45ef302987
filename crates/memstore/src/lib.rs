//! In-memory document store implementing every repository trait, with
//! thread-safe access behind a single lock.
//!
//! Each trait method takes the lock once, so conditional writes and the
//! clear-then-set default rule are trivially atomic. Used by tests and by the
//! `memory` storage backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use model::{
    Address, AppointmentStatus, Cart, DefaultFlagged, Notification, Order, OrderHistoryEntry, OrderStatus,
    PaymentMethod, ProductType, ServiceAppointment, promote_default,
};
use repository::{
    AppointmentsRepository, CartClaim, CartRepository, FlaggedRepository, NotificationsRepository,
    OrdersRepository, ProductCatalog, RepositoryError, Versioned,
};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    carts: HashMap<String, Versioned<Cart>>,
    orders: HashMap<String, Order>,
    history: Vec<OrderHistoryEntry>,
    addresses: HashMap<String, Address>,
    payment_methods: HashMap<String, PaymentMethod>,
    appointments: HashMap<String, ServiceAppointment>,
    notifications: HashMap<String, Notification>,
    stock: HashMap<(ProductType, String), u32>,
}

/// Thread-safe in-memory document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<State>,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a product with the given stock, replacing any previous level.
    pub async fn set_stock(&self, product_type: ProductType, product_id: &str, stock: u32) {
        let mut state = self.inner.write().await;
        state.stock.insert((product_type, product_id.to_string()), stock);
    }

    /// Removes a product from the catalogue.
    pub async fn remove_product(&self, product_type: ProductType, product_id: &str) {
        let mut state = self.inner.write().await;
        state.stock.remove(&(product_type, product_id.to_string()));
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn get(&self, user_id: &str) -> Result<Option<Versioned<Cart>>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(state.carts.get(user_id).cloned())
    }

    async fn save(&self, cart: &Cart, expected_version: Option<i64>) -> Result<i64, RepositoryError> {
        let mut state = self.inner.write().await;
        let current = state.carts.get(&cart.user_id).map(|v| v.version);
        if current != expected_version {
            return Err(RepositoryError::Conflict);
        }
        let version = current.unwrap_or(0) + 1;
        state
            .carts
            .insert(cart.user_id.clone(), Versioned { version, value: cart.clone() });
        Ok(version)
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.inner.write().await;
        let before = state.carts.len();
        state.carts.retain(|_, c| c.value.updated_at >= cutoff);
        Ok((before - state.carts.len()) as u64)
    }
}

fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

#[async_trait]
impl OrdersRepository for MemoryStore {
    async fn place(
        &self,
        order: &Order,
        entry: &OrderHistoryEntry,
        claim: Option<&CartClaim>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.inner.write().await;
        if let Some(claim) = claim {
            let stored = state
                .carts
                .get_mut(&claim.cleared.user_id)
                .filter(|c| c.version == claim.version)
                .ok_or(RepositoryError::Conflict)?;
            stored.version += 1;
            stored.value = claim.cleared.clone();
        }
        state.orders.insert(order.id.clone(), order.clone());
        state.history.push(entry.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Order>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(state.orders.get(id).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Order>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(newest_first(
            state.orders.values().filter(|o| o.user_id == user_id).cloned().collect(),
        ))
    }

    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(newest_first(state.orders.values().cloned().collect()))
    }

    async fn transition(
        &self,
        order: &Order,
        expected: OrderStatus,
        entry: &OrderHistoryEntry,
    ) -> Result<(), RepositoryError> {
        let mut state = self.inner.write().await;
        let stored = state.orders.get_mut(&order.id).ok_or(RepositoryError::NotFound)?;
        if stored.status != expected {
            return Err(RepositoryError::Conflict);
        }
        *stored = order.clone();
        state.history.push(entry.clone());
        Ok(())
    }

    async fn history(&self, order_id: &str) -> Result<Vec<OrderHistoryEntry>, RepositoryError> {
        let state = self.inner.read().await;
        let mut entries: Vec<_> = state.history.iter().filter(|h| h.order_id == order_id).cloned().collect();
        entries.sort_by_key(|h| h.created_at);
        Ok(entries)
    }
}

/// Maps a flagged entity type to its table inside [`State`].
trait FlaggedTable: DefaultFlagged {
    fn table(state: &State) -> &HashMap<String, Self>;
    fn table_mut(state: &mut State) -> &mut HashMap<String, Self>;
}

impl FlaggedTable for Address {
    fn table(state: &State) -> &HashMap<String, Self> {
        &state.addresses
    }

    fn table_mut(state: &mut State) -> &mut HashMap<String, Self> {
        &mut state.addresses
    }
}

impl FlaggedTable for PaymentMethod {
    fn table(state: &State) -> &HashMap<String, Self> {
        &state.payment_methods
    }

    fn table_mut(state: &mut State) -> &mut HashMap<String, Self> {
        &mut state.payment_methods
    }
}

#[allow(private_bounds)]
#[async_trait]
impl<T: FlaggedTable> FlaggedRepository<T> for MemoryStore {
    async fn list(&self, user_id: &str) -> Result<Vec<T>, RepositoryError> {
        let state = self.inner.read().await;
        let mut owned: Vec<T> = T::table(&state).values().filter(|e| e.owner() == user_id).cloned().collect();
        owned.sort_by_key(|e| e.created_at());
        Ok(owned)
    }

    async fn get(&self, id: &str) -> Result<Option<T>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(T::table(&state).get(id).cloned())
    }

    async fn find_default(&self, user_id: &str) -> Result<Option<T>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(T::table(&state)
            .values()
            .find(|e| e.owner() == user_id && e.is_default())
            .cloned())
    }

    async fn insert(&self, entity: &T) -> Result<(), RepositoryError> {
        let mut state = self.inner.write().await;
        let table = T::table_mut(&mut state);
        table.insert(entity.id().to_string(), entity.clone());
        if entity.is_default() {
            promote_default(table.values_mut(), entity.owner(), entity.id());
        }
        Ok(())
    }

    async fn update(&self, entity: &T) -> Result<(), RepositoryError> {
        let mut state = self.inner.write().await;
        let table = T::table_mut(&mut state);
        let stored = table.get_mut(entity.id()).ok_or(RepositoryError::NotFound)?;
        *stored = entity.clone();
        if entity.is_default() {
            promote_default(table.values_mut(), entity.owner(), entity.id());
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        let mut state = self.inner.write().await;
        Ok(T::table_mut(&mut state).remove(id).is_some())
    }

    async fn set_default(&self, user_id: &str, id: &str) -> Result<Option<T>, RepositoryError> {
        let mut state = self.inner.write().await;
        let table = T::table_mut(&mut state);
        if !promote_default(table.values_mut(), user_id, id) {
            return Ok(None);
        }
        let promoted = table.get_mut(id).map(|e| {
            e.touch(Utc::now());
            e.clone()
        });
        Ok(promoted)
    }
}

fn active_on(state: &State, date: NaiveDate) -> Vec<ServiceAppointment> {
    let mut active: Vec<_> = state
        .appointments
        .values()
        .filter(|a| a.date == date && a.is_active())
        .cloned()
        .collect();
    active.sort_by_key(|a| a.time);
    active
}

fn slot_is_free(state: &State, candidate: &ServiceAppointment) -> bool {
    !state.appointments.values().any(|existing| candidate.conflicts_with(existing))
}

#[async_trait]
impl AppointmentsRepository for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<ServiceAppointment>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(state.appointments.get(id).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ServiceAppointment>, RepositoryError> {
        let state = self.inner.read().await;
        let mut mine: Vec<_> = state.appointments.values().filter(|a| a.user_id == user_id).cloned().collect();
        mine.sort_by_key(|a| (a.date, a.time));
        Ok(mine)
    }

    async fn list_active_on(&self, date: NaiveDate) -> Result<Vec<ServiceAppointment>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(active_on(&state, date))
    }

    async fn insert_if_available(&self, appointment: &ServiceAppointment) -> Result<bool, RepositoryError> {
        let mut state = self.inner.write().await;
        if !slot_is_free(&state, appointment) {
            return Ok(false);
        }
        state.appointments.insert(appointment.id.clone(), appointment.clone());
        Ok(true)
    }

    async fn update_if_available(
        &self,
        appointment: &ServiceAppointment,
        expected: AppointmentStatus,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.inner.write().await;
        let stored = state.appointments.get(&appointment.id).ok_or(RepositoryError::NotFound)?;
        if stored.status != expected {
            return Err(RepositoryError::Conflict);
        }
        if !slot_is_free(&state, appointment) {
            return Ok(false);
        }
        state.appointments.insert(appointment.id.clone(), appointment.clone());
        Ok(true)
    }

    async fn update(&self, appointment: &ServiceAppointment, expected: AppointmentStatus) -> Result<(), RepositoryError> {
        let mut state = self.inner.write().await;
        let stored = state.appointments.get_mut(&appointment.id).ok_or(RepositoryError::NotFound)?;
        if stored.status != expected {
            return Err(RepositoryError::Conflict);
        }
        *stored = appointment.clone();
        Ok(())
    }
}

#[async_trait]
impl NotificationsRepository for MemoryStore {
    async fn insert(&self, notification: &Notification) -> Result<(), RepositoryError> {
        let mut state = self.inner.write().await;
        state.notifications.insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(state.notifications.get(id).cloned())
    }

    async fn list_by_user(&self, user_id: &str, offset: u64, limit: u64) -> Result<Vec<Notification>, RepositoryError> {
        let state = self.inner.read().await;
        let mut mine: Vec<_> = state.notifications.values().filter(|n| n.user_id == user_id).cloned().collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(mine
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn count_by_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let state = self.inner.read().await;
        Ok(state.notifications.values().filter(|n| n.user_id == user_id).count() as u64)
    }

    async fn unread_count(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let state = self.inner.read().await;
        Ok(state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && !n.read)
            .count() as u64)
    }

    async fn update(&self, notification: &Notification) -> Result<(), RepositoryError> {
        let mut state = self.inner.write().await;
        let stored = state
            .notifications
            .get_mut(&notification.id)
            .ok_or(RepositoryError::NotFound)?;
        *stored = notification.clone();
        Ok(())
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let mut state = self.inner.write().await;
        let mut marked = 0;
        for n in state.notifications.values_mut().filter(|n| n.user_id == user_id && !n.read) {
            n.read = true;
            marked += 1;
        }
        Ok(marked)
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        let mut state = self.inner.write().await;
        Ok(state.notifications.remove(id).is_some())
    }

    async fn delete_read(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let mut state = self.inner.write().await;
        let before = state.notifications.len();
        state.notifications.retain(|_, n| !(n.user_id == user_id && n.read));
        Ok((before - state.notifications.len()) as u64)
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn stock_of(&self, product_type: ProductType, product_id: &str) -> Result<Option<u32>, RepositoryError> {
        let state = self.inner.read().await;
        Ok(state.stock.get(&(product_type, product_id.to_string())).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use model::{AddressKind, PaymentKind, ServiceType, ShippingAddress, Totals};
    use rust_decimal::Decimal;

    fn address(id: &str, user_id: &str, is_default: bool) -> Address {
        let now = Utc::now();
        Address {
            id: id.to_string(),
            user_id: user_id.to_string(),
            kind: AddressKind::Home,
            name: None,
            street: "Street".to_string(),
            city: "Test City".to_string(),
            state: "Test Region".to_string(),
            zip: "0000".to_string(),
            country: "US".to_string(),
            is_default,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_order(id: &str, user_id: &str) -> Order {
        let now = Utc::now();
        Order {
            id: id.to_string(),
            user_id: user_id.to_string(),
            items: Vec::new(),
            shipping_address: ShippingAddress {
                name: None,
                street: "Street".to_string(),
                city: "Test City".to_string(),
                state: "Test Region".to_string(),
                zip: "0000".to_string(),
                country: "US".to_string(),
            },
            payment_method: PaymentKind::Card,
            totals: Totals { subtotal: Decimal::ONE, tax: Decimal::ZERO, total: Decimal::ONE },
            status: OrderStatus::Processing,
            tracking_number: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn entry(order_id: &str, status: OrderStatus) -> OrderHistoryEntry {
        OrderHistoryEntry {
            id: model::new_id(),
            order_id: order_id.to_string(),
            status,
            note: "test".to_string(),
            updated_by: "admin".to_string(),
            location: None,
            estimated_delivery_date: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_cart_versioned_writes() {
        let store = MemoryStore::new();
        let cart = Cart::new("u1", Utc::now());

        assert_eq!(store.save(&cart, None).await.unwrap(), 1);
        assert!(matches!(store.save(&cart, None).await, Err(RepositoryError::Conflict)));
        assert_eq!(store.save(&cart, Some(1)).await.unwrap(), 2);
        assert!(matches!(store.save(&cart, Some(1)).await, Err(RepositoryError::Conflict)));

        let stored = CartRepository::get(&store, "u1").await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_purge_idle_carts() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let stale = Cart::new("old", now - chrono::Duration::days(8));
        let fresh = Cart::new("new", now);
        store.save(&stale, None).await.unwrap();
        store.save(&fresh, None).await.unwrap();

        let purged = store.purge_idle(now - chrono::Duration::days(7)).await.unwrap();

        assert_eq!(purged, 1);
        assert!(CartRepository::get(&store, "old").await.unwrap().is_none());
        assert!(CartRepository::get(&store, "new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_place_with_stale_claim_writes_nothing() {
        let store = MemoryStore::new();
        let cart = Cart::new("u1", Utc::now());
        store.save(&cart, None).await.unwrap();

        let order = sample_order("o1", "u1");
        let claim = CartClaim { version: 7, cleared: cart.clone() };
        let result = store.place(&order, &entry("o1", OrderStatus::Processing), Some(&claim)).await;

        assert!(matches!(result, Err(RepositoryError::Conflict)));
        assert!(OrdersRepository::get(&store, "o1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_conditional_on_status() {
        let store = MemoryStore::new();
        let mut order = sample_order("o1", "u1");
        store.place(&order, &entry("o1", OrderStatus::Processing), None).await.unwrap();

        order.status = OrderStatus::Shipped;
        store
            .transition(&order, OrderStatus::Processing, &entry("o1", OrderStatus::Shipped))
            .await
            .unwrap();

        order.status = OrderStatus::Cancelled;
        let stale = store
            .transition(&order, OrderStatus::Processing, &entry("o1", OrderStatus::Cancelled))
            .await;
        assert!(matches!(stale, Err(RepositoryError::Conflict)));
        assert_eq!(store.history("o1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_default_clears_siblings() {
        let store = MemoryStore::new();
        FlaggedRepository::<Address>::insert(&store, &address("a1", "u1", true)).await.unwrap();
        FlaggedRepository::<Address>::insert(&store, &address("a2", "u1", true)).await.unwrap();
        FlaggedRepository::<Address>::insert(&store, &address("b1", "u2", true)).await.unwrap();

        let mine = FlaggedRepository::<Address>::list(&store, "u1").await.unwrap();
        let defaults: Vec<_> = mine.iter().filter(|a| a.is_default).map(|a| a.id.as_str()).collect();
        assert_eq!(defaults, vec!["a2"]);

        let theirs = FlaggedRepository::<Address>::find_default(&store, "u2").await.unwrap();
        assert_eq!(theirs.unwrap().id, "b1");
    }

    #[tokio::test]
    async fn test_set_default_for_foreign_entity_is_none() {
        let store = MemoryStore::new();
        FlaggedRepository::<Address>::insert(&store, &address("b1", "u2", false)).await.unwrap();

        let result = FlaggedRepository::<Address>::set_default(&store, "u1", "b1").await.unwrap();
        assert!(result.is_none());
    }

    fn appointment(id: &str, hour: u32) -> ServiceAppointment {
        let now = Utc::now();
        ServiceAppointment {
            id: id.to_string(),
            user_id: "u1".to_string(),
            service: "Inspection".to_string(),
            service_type: ServiceType::Inspection,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            duration_minutes: 60,
            status: AppointmentStatus::Scheduled,
            notes: None,
            price: Decimal::ZERO,
            vehicle: None,
            location_id: None,
            payment_method_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_appointment_writes_are_conditional_on_status() {
        let store = MemoryStore::new();
        let booked = appointment("s1", 9);
        assert!(store.insert_if_available(&booked).await.unwrap());

        let mut cancelled = booked.clone();
        cancelled.status = AppointmentStatus::Cancelled;
        AppointmentsRepository::update(&store, &cancelled, AppointmentStatus::Scheduled).await.unwrap();

        let mut edited = booked.clone();
        edited.notes = Some("bring keys".to_string());
        let stale = AppointmentsRepository::update(&store, &edited, AppointmentStatus::Scheduled).await;
        assert!(matches!(stale, Err(RepositoryError::Conflict)));

        edited.time = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let stale = store.update_if_available(&edited, AppointmentStatus::Scheduled).await;
        assert!(matches!(stale, Err(RepositoryError::Conflict)));

        let stored = AppointmentsRepository::get(&store, "s1").await.unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);
        assert_eq!(stored.notes, None);

        let missing = AppointmentsRepository::update(&store, &appointment("nope", 9), AppointmentStatus::Scheduled).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }
}
