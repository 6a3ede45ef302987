//! The cart engine: one cart per user, mutated through versioned
//! compare-and-swap writes.
//!
//! The line-level rules are plain functions over [`Cart`] so they can be
//! tested without storage; [`CartService`] wraps them in the read, apply,
//! conditional-write loop.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use model::{Cart, CartSummary, LineItem};
use repository::{CartRepository, RepositoryError, Versioned};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::inventory::InventoryValidator;
use crate::totals::{compute_totals, validate_line};
use crate::ServiceError;

/// How many times a conditional cart write is retried after losing a race.
pub const MAX_WRITE_ATTEMPTS: usize = 8;

/// Adds `item` to the cart, merging it into an existing line for the same
/// product and variant.
pub fn add_item(cart: &mut Cart, mut item: LineItem, now: DateTime<Utc>) {
    let variant_id = item.variant_id().map(str::to_string);
    match cart
        .items
        .iter_mut()
        .find(|line| line.matches(&item.product_id, variant_id.as_deref()))
    {
        Some(line) => {
            line.quantity = line.quantity.saturating_add(item.quantity);
            line.last_updated = Some(now);
        }
        None => {
            item.last_updated = Some(now);
            cart.items.push(item);
        }
    }
}

/// Drops every line of `product_id`. Returns whether anything was removed.
pub fn remove_item(cart: &mut Cart, product_id: &str) -> bool {
    let before = cart.items.len();
    cart.items.retain(|line| line.product_id != product_id);
    cart.items.len() != before
}

/// Index of the line addressed by `product_id` and, when given, `variant_id`.
fn locate(cart: &Cart, product_id: &str, variant_id: Option<&str>) -> Option<usize> {
    cart.items.iter().position(|line| match variant_id {
        Some(_) => line.matches(product_id, variant_id),
        None => line.product_id == product_id,
    })
}

/// Sets the quantity of an existing line; a quantity of zero or less removes it.
pub fn set_quantity(
    cart: &mut Cart,
    product_id: &str,
    variant_id: Option<&str>,
    quantity: i64,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let idx = locate(cart, product_id, variant_id).ok_or_else(|| ServiceError::ItemNotFound(product_id.to_string()))?;
    if quantity <= 0 {
        cart.items.remove(idx);
        return Ok(());
    }
    let line = &mut cart.items[idx];
    line.quantity = u32::try_from(quantity)
        .map_err(|_| ServiceError::InvalidLineItem(format!("{product_id}: quantity out of range")))?;
    line.last_updated = Some(now);
    Ok(())
}

/// Cart operations for the owning user.
pub struct CartService {
    carts: Arc<dyn CartRepository>,
    inventory: InventoryValidator,
    tax_rate: Decimal,
}

impl CartService {
    pub fn new(carts: Arc<dyn CartRepository>, inventory: InventoryValidator, tax_rate: Decimal) -> Self {
        Self { carts, inventory, tax_rate }
    }

    async fn load(&self, user_id: &str) -> Result<Versioned<Cart>, ServiceError> {
        self.carts
            .get(user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cart"))
    }

    /// Applies `apply` to the stored cart (a fresh one when `create` is set and
    /// none exists), recomputes totals and writes it back conditionally on the
    /// version that was read. Lost races are retried from a fresh read.
    async fn mutate<F>(&self, user_id: &str, create: bool, mut apply: F) -> Result<Cart, ServiceError>
    where
        F: FnMut(&mut Cart, DateTime<Utc>) -> Result<(), ServiceError> + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let now = Utc::now();
            let (mut cart, version) = match self.carts.get(user_id).await? {
                Some(stored) => (stored.value, Some(stored.version)),
                None if create => (Cart::new(user_id, now), None),
                None => return Err(ServiceError::not_found("Cart")),
            };

            apply(&mut cart, now)?;
            cart.totals = compute_totals(&cart.items, self.tax_rate)?;
            cart.updated_at = now;

            match self.carts.save(&cart, version).await {
                Ok(_) => return Ok(cart),
                Err(RepositoryError::Conflict) => {
                    debug!(attempt, "Cart write lost a race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(user_id, "Giving up on cart write after {} attempts", MAX_WRITE_ATTEMPTS);
        Err(ServiceError::Contention)
    }

    /// Returns the user's cart.
    ///
    /// # Errors
    /// [`ServiceError::NotFound`] if the user never added anything.
    #[instrument(skip(self))]
    pub async fn get(&self, user_id: &str) -> Result<Cart, ServiceError> {
        Ok(self.load(user_id).await?.value)
    }

    /// Adds an item, creating the cart on first use. Stock is not checked here;
    /// it is enforced on quantity updates, on save and at checkout.
    #[instrument(skip(self, item), fields(product_id = %item.product_id, quantity = item.quantity))]
    pub async fn add_item(&self, user_id: &str, item: LineItem) -> Result<Cart, ServiceError> {
        validate_line(&item)?;
        let cart = self
            .mutate(user_id, true, |cart, now| {
                add_item(cart, item.clone(), now);
                Ok(())
            })
            .await?;
        info!(lines = cart.items.len(), "Item added to cart");
        Ok(cart)
    }

    /// Removes every line of `product_id`; removing an absent product is a no-op.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: &str, product_id: &str) -> Result<Cart, ServiceError> {
        self.mutate(user_id, false, |cart, _| {
            remove_item(cart, product_id);
            Ok(())
        })
        .await
    }

    /// Sets the quantity of a line, removing it when `quantity <= 0`.
    ///
    /// # Errors
    /// [`ServiceError::ItemNotFound`] if the line is absent,
    /// [`ServiceError::InsufficientStock`] if `quantity` exceeds current stock.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: i64,
    ) -> Result<Cart, ServiceError> {
        if quantity > 0 {
            let cart = self.load(user_id).await?.value;
            let idx = locate(&cart, product_id, variant_id)
                .ok_or_else(|| ServiceError::ItemNotFound(product_id.to_string()))?;
            let requested = u32::try_from(quantity)
                .map_err(|_| ServiceError::InvalidLineItem(format!("{product_id}: quantity out of range")))?;
            self.inventory
                .require(cart.items[idx].product_type, product_id, requested)
                .await?;
        }
        self.mutate(user_id, false, |cart, now| {
            set_quantity(cart, product_id, variant_id, quantity, now)
        })
        .await
    }

    /// Re-validates every line against stock and, if all pass, confirms the
    /// cart as saved. Nothing is written when any line is stale.
    ///
    /// # Errors
    /// [`ServiceError::StaleCartItem`] for the first line that exceeds stock.
    #[instrument(skip(self))]
    pub async fn save_for_later(&self, user_id: &str) -> Result<Cart, ServiceError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Versioned { version, value: mut cart } = self.load(user_id).await?;
            self.inventory.revalidate(&cart.items).await?;

            cart.updated_at = Utc::now();
            match self.carts.save(&cart, Some(version)).await {
                Ok(_) => {
                    info!("Cart saved");
                    return Ok(cart);
                }
                Err(RepositoryError::Conflict) => debug!(attempt, "Cart changed during validation, retrying"),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ServiceError::Contention)
    }

    /// Read-only projection; a user without a cart gets an empty summary.
    #[instrument(skip(self))]
    pub async fn summary(&self, user_id: &str) -> Result<CartSummary, ServiceError> {
        let cart = match self.carts.get(user_id).await? {
            Some(stored) => stored.value,
            None => Cart::new(user_id, Utc::now()),
        };
        Ok(cart.summary())
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: &str) -> Result<Cart, ServiceError> {
        self.mutate(user_id, false, |cart, _| {
            cart.items.clear();
            Ok(())
        })
        .await
    }

    /// Deletes carts idle for longer than `ttl`. Returns how many were purged.
    #[instrument(skip(self))]
    pub async fn purge_idle(&self, ttl: Duration) -> Result<u64, ServiceError> {
        let purged = self.carts.purge_idle(Utc::now() - ttl).await?;
        if purged > 0 {
            info!(purged, "Purged idle carts");
        }
        Ok(purged)
    }
}
