//! Money arithmetic for carts and orders.
//!
//! Amounts are [`Decimal`] and stay exact: nothing is rounded here, rounding
//! is applied only when a summary is presented.

use model::{LineItem, Totals};
use rust_decimal::Decimal;

use crate::ServiceError;

/// Rejects a line with a negative unit price or a zero quantity.
pub fn validate_line(item: &LineItem) -> Result<(), ServiceError> {
    if item.unit_price < Decimal::ZERO {
        return Err(ServiceError::InvalidLineItem(format!(
            "{}: unit price must not be negative",
            item.product_id
        )));
    }
    if item.quantity < 1 {
        return Err(ServiceError::InvalidLineItem(format!(
            "{}: quantity must be at least 1",
            item.product_id
        )));
    }
    Ok(())
}

/// Computes subtotal, tax and total of `items`.
///
/// `subtotal = Σ unit_price × quantity`, `tax = subtotal × tax_rate`,
/// `total = subtotal + tax`. An empty sequence yields all zeros.
///
/// # Errors
/// [`ServiceError::InvalidLineItem`] if any line is malformed or the amounts
/// overflow the decimal range.
pub fn compute_totals(items: &[LineItem], tax_rate: Decimal) -> Result<Totals, ServiceError> {
    let overflow = || ServiceError::InvalidLineItem("amount out of range".to_string());

    let mut subtotal = Decimal::ZERO;
    for item in items {
        validate_line(item)?;
        let line = item
            .unit_price
            .checked_mul(Decimal::from(item.quantity))
            .ok_or_else(overflow)?;
        subtotal = subtotal.checked_add(line).ok_or_else(overflow)?;
    }
    let tax = subtotal.checked_mul(tax_rate).ok_or_else(overflow)?;
    let total = subtotal.checked_add(tax).ok_or_else(overflow)?;
    Ok(Totals { subtotal, tax, total })
}
