//! Integration tests against a live PostgreSQL. They run only when
//! `TEST_DATABASE_URL` is set (e.g. `host=localhost user=marketplace
//! password=marketplace dbname=marketplace_test`), and are no-ops otherwise.

use chrono::{NaiveDate, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use model::{
    Address, AddressKind, AppointmentStatus, Cart, Order, OrderHistoryEntry, OrderStatus, PaymentKind,
    ServiceAppointment, ServiceType, ShippingAddress, Totals,
};
use repository::{
    AppointmentsRepository, CartClaim, CartRepository, FlaggedRepository, OrdersRepository,
    PgAppointmentsRepository, PgCartsRepository, PgFlaggedRepository, PgOrdersRepository, RepositoryError,
};
use rust_decimal::Decimal;
use tokio_postgres::NoTls;

const MIGRATIONS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../migrations");
const MIGRATION_LOCK: i64 = 7_340_001;

async fn pool() -> Option<Pool> {
    let Ok(dsn) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let config: tokio_postgres::Config = dsn.parse().unwrap();
    let mgr = Manager::from_config(config, NoTls, ManagerConfig { recycling_method: RecyclingMethod::Fast });
    let pool = Pool::builder(mgr).max_size(4).runtime(Runtime::Tokio1).build().unwrap();

    // Tests run in parallel; concurrent CREATE TABLE IF NOT EXISTS can still collide.
    let client = pool.get().await.unwrap();
    client.execute("SELECT pg_advisory_lock($1)", &[&MIGRATION_LOCK]).await.unwrap();
    let migrated = db::run_migrations(&client, MIGRATIONS).await;
    client.execute("SELECT pg_advisory_unlock($1)", &[&MIGRATION_LOCK]).await.unwrap();
    migrated.unwrap();
    Some(pool)
}

/// Removes leftovers of earlier runs from the appointments on `date`.
async fn clear_day(pool: &Pool, date: NaiveDate) {
    let client = pool.get().await.unwrap();
    client
        .execute("DELETE FROM service_appointments WHERE date = $1", &[&date])
        .await
        .unwrap();
}

fn address(user_id: &str, is_default: bool) -> Address {
    let now = Utc::now();
    Address {
        id: model::new_id(),
        user_id: user_id.to_string(),
        kind: AddressKind::Home,
        name: None,
        street: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip: "62701".to_string(),
        country: "US".to_string(),
        is_default,
        created_at: now,
        updated_at: now,
    }
}

fn order(user_id: &str) -> Order {
    let now = Utc::now();
    Order {
        id: model::new_id(),
        user_id: user_id.to_string(),
        items: Vec::new(),
        shipping_address: ShippingAddress {
            name: None,
            street: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            zip: "62701".to_string(),
            country: "US".to_string(),
        },
        payment_method: PaymentKind::Card,
        totals: Totals::default(),
        status: OrderStatus::Processing,
        tracking_number: None,
        notes: None,
        created_at: now,
        updated_at: now,
    }
}

fn placed(order: &Order) -> OrderHistoryEntry {
    OrderHistoryEntry {
        id: model::new_id(),
        order_id: order.id.clone(),
        status: OrderStatus::Processing,
        note: "Order placed".to_string(),
        updated_by: order.user_id.clone(),
        location: None,
        estimated_delivery_date: None,
        created_at: Utc::now(),
    }
}

fn appointment(date: NaiveDate, hour: u32) -> ServiceAppointment {
    let now = Utc::now();
    ServiceAppointment {
        id: model::new_id(),
        user_id: model::new_id(),
        service: "Inspection".to_string(),
        service_type: ServiceType::Inspection,
        date,
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
async fn test_cart_save_is_versioned() {
    let Some(pool) = pool().await else { return };
    let carts = PgCartsRepository::new(pool);
    let cart = Cart::new(model::new_id(), Utc::now());

    assert_eq!(carts.save(&cart, None).await.unwrap(), 1);
    assert!(matches!(carts.save(&cart, None).await, Err(RepositoryError::Conflict)));
    assert_eq!(carts.save(&cart, Some(1)).await.unwrap(), 2);
    assert!(matches!(carts.save(&cart, Some(1)).await, Err(RepositoryError::Conflict)));
    assert_eq!(carts.get(&cart.user_id).await.unwrap().unwrap().version, 2);
}

#[tokio::test]
async fn test_stale_claim_places_nothing() {
    let Some(pool) = pool().await else { return };
    let carts = PgCartsRepository::new(pool.clone());
    let orders = PgOrdersRepository::new(pool);
    let user_id = model::new_id();
    let cart = Cart::new(user_id.clone(), Utc::now());
    carts.save(&cart, None).await.unwrap();
    carts.save(&cart, Some(1)).await.unwrap();

    let stale = CartClaim { version: 1, cleared: cart.clone() };
    let first = order(&user_id);
    let result = orders.place(&first, &placed(&first), Some(&stale)).await;
    assert!(matches!(result, Err(RepositoryError::Conflict)));
    assert!(OrdersRepository::get(&orders, &first.id).await.unwrap().is_none());
    assert!(orders.history(&first.id).await.unwrap().is_empty());

    let fresh = CartClaim { version: 2, cleared: cart };
    orders.place(&first, &placed(&first), Some(&fresh)).await.unwrap();
    assert_eq!(OrdersRepository::get(&orders, &first.id).await.unwrap().unwrap().id, first.id);
    assert_eq!(carts.get(&user_id).await.unwrap().unwrap().version, 3);
}

#[tokio::test]
async fn test_set_default_twice_leaves_one_default() {
    let Some(pool) = pool().await else { return };
    let repo = PgFlaggedRepository::<Address>::new(pool);
    let user_id = model::new_id();
    let a = address(&user_id, true);
    let b = address(&user_id, false);
    let c = address(&user_id, false);
    for entity in [&a, &b, &c] {
        repo.insert(entity).await.unwrap();
    }

    repo.set_default(&user_id, &b.id).await.unwrap().unwrap();
    let promoted = repo.set_default(&user_id, &c.id).await.unwrap().unwrap();
    assert!(promoted.is_default);

    let all = repo.list(&user_id).await.unwrap();
    let defaults: Vec<_> = all.iter().filter(|x| x.is_default).map(|x| x.id.clone()).collect();
    assert_eq!(defaults, vec![c.id.clone()]);
    assert_eq!(repo.find_default(&user_id).await.unwrap().unwrap().id, c.id);

    let (left, right) = tokio::join!(repo.set_default(&user_id, &a.id), repo.set_default(&user_id, &b.id));
    left.unwrap().unwrap();
    right.unwrap().unwrap();
    let all = repo.list(&user_id).await.unwrap();
    assert_eq!(all.iter().filter(|x| x.is_default).count(), 1);
}

#[tokio::test]
async fn test_set_default_for_foreign_entity_is_none() {
    let Some(pool) = pool().await else { return };
    let repo = PgFlaggedRepository::<Address>::new(pool);
    let theirs = address(&model::new_id(), true);
    repo.insert(&theirs).await.unwrap();

    assert!(repo.set_default(&model::new_id(), &theirs.id).await.unwrap().is_none());
    assert!(repo.get(&theirs.id).await.unwrap().unwrap().is_default);
}

#[tokio::test]
async fn test_appointment_writes_are_conditional_on_status() {
    let Some(pool) = pool().await else { return };
    let date = NaiveDate::from_ymd_opt(2998, 6, 1).unwrap();
    clear_day(&pool, date).await;
    let repo = PgAppointmentsRepository::new(pool);
    let booked = appointment(date, 9);
    assert!(repo.insert_if_available(&booked).await.unwrap());

    let mut cancelled = booked.clone();
    cancelled.status = AppointmentStatus::Cancelled;
    repo.update(&cancelled, AppointmentStatus::Scheduled).await.unwrap();

    let mut edited = booked.clone();
    edited.notes = Some("bring keys".to_string());
    assert!(matches!(
        repo.update(&edited, AppointmentStatus::Scheduled).await,
        Err(RepositoryError::Conflict)
    ));
    edited.time = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
    assert!(matches!(
        repo.update_if_available(&edited, AppointmentStatus::Scheduled).await,
        Err(RepositoryError::Conflict)
    ));
    assert!(matches!(
        repo.update(&appointment(date, 9), AppointmentStatus::Scheduled).await,
        Err(RepositoryError::NotFound)
    ));

    let stored = repo.get(&booked.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Cancelled);
    assert_eq!(stored.notes, None);
}

#[tokio::test]
async fn test_overlapping_bookings_one_wins() {
    let Some(pool) = pool().await else { return };
    let date = NaiveDate::from_ymd_opt(2999, 1, 1).unwrap();
    clear_day(&pool, date).await;
    let repo = PgAppointmentsRepository::new(pool);

    let first = appointment(date, 10);
    let second = appointment(date, 10);
    let (a, b) = tokio::join!(repo.insert_if_available(&first), repo.insert_if_available(&second));
    assert_ne!(a.unwrap(), b.unwrap());
    assert_eq!(repo.list_active_on(date).await.unwrap().len(), 1);
}
