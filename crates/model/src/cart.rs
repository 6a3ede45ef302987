use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::ProductType;

/// Variant of a product picked by the buyer (colour, trim, size...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

/// One product entry in a cart or an order snapshot.
///
/// `unit_price` is authoritative; a variant's own price is informational and
/// is expected to be resolved into `unit_price` by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_type: ProductType,
    pub product_id: String,
    pub name: String,
    #[serde(alias = "price")]
    pub unit_price: Decimal,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl LineItem {
    pub fn variant_id(&self) -> Option<&str> {
        self.variant.as_ref().map(|v| v.id.as_str())
    }

    /// Whether this line is the one identified by `product_id` + `variant_id`.
    pub fn matches(&self, product_id: &str, variant_id: Option<&str>) -> bool {
        self.product_id == product_id && self.variant_id() == variant_id
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Derived subtotal/tax/total of a cart or an order.
///
/// Values are kept exact; [`Totals::rounded`] is for presentation only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub fn rounded(&self) -> Totals {
        let round = |d: Decimal| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let subtotal = round(self.subtotal);
        let tax = round(self.tax);
        // total is derived so that total == subtotal + tax holds on the rounded figures
        Totals {
            subtotal,
            tax,
            total: subtotal + tax,
        }
    }
}

/// The single shopping cart of one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub user_id: String,
    pub items: Vec<LineItem>,
    pub totals: Totals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            items: Vec::new(),
            totals: Totals::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }

    pub fn find(&self, product_id: &str, variant_id: Option<&str>) -> Option<&LineItem> {
        self.items.iter().find(|i| i.matches(product_id, variant_id))
    }

    pub fn summary(&self) -> CartSummary {
        let mut item_types = ItemTypeCounts::default();
        for item in &self.items {
            match item.product_type {
                ProductType::Electronic => item_types.electronic += 1,
                ProductType::Car => item_types.car += 1,
                ProductType::Sparepart => item_types.sparepart += 1,
            }
        }
        CartSummary {
            total_items: self.items.len(),
            total_quantity: self.total_quantity(),
            totals: self.totals.rounded(),
            item_types,
            last_updated: self.updated_at,
        }
    }
}

/// Number of cart lines per product type.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemTypeCounts {
    pub electronic: usize,
    pub car: usize,
    pub sparepart: usize,
}

/// Read-only projection of a cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub total_items: usize,
    pub total_quantity: u64,
    pub totals: Totals,
    pub item_types: ItemTypeCounts,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product_id: &str, product_type: ProductType, price: i64, quantity: u32) -> LineItem {
        LineItem {
            product_type,
            product_id: product_id.to_string(),
            name: product_id.to_uppercase(),
            unit_price: Decimal::new(price, 2),
            quantity,
            variant: None,
            image: None,
            last_updated: None,
        }
    }

    #[test]
    fn test_deserialize_line_item_with_price_alias() {
        let json = r#"
        {
            "productType": "electronic",
            "productId": "tv-55",
            "name": "Television",
            "price": "499.99",
            "quantity": 2,
            "variant": { "id": "black", "name": "Black" }
        }
        "#;
        let line: LineItem = serde_json::from_str(json).unwrap();
        assert_eq!(line.unit_price, Decimal::new(49999, 2));
        assert_eq!(line.variant_id(), Some("black"));
        assert!(line.matches("tv-55", Some("black")));
        assert!(!line.matches("tv-55", None));
        assert_eq!(line.line_total(), Decimal::new(99998, 2));
    }

    #[test]
    fn test_summary_counts_per_type() {
        let mut cart = Cart::new("u1", Utc::now());
        cart.items.push(item("a", ProductType::Electronic, 100, 2));
        cart.items.push(item("b", ProductType::Electronic, 100, 1));
        cart.items.push(item("c", ProductType::Sparepart, 100, 5));

        let summary = cart.summary();
        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.total_quantity, 8);
        assert_eq!(summary.item_types.electronic, 2);
        assert_eq!(summary.item_types.car, 0);
        assert_eq!(summary.item_types.sparepart, 1);
    }

    #[test]
    fn test_rounded_totals() {
        let totals = Totals {
            subtotal: Decimal::new(10005, 3),
            tax: Decimal::new(10005, 4),
            total: Decimal::new(110055, 4),
        };
        let rounded = totals.rounded();
        assert_eq!(rounded.subtotal, Decimal::new(1001, 2));
        assert_eq!(rounded.tax, Decimal::new(100, 2));
        assert_eq!(rounded.total, Decimal::new(1101, 2));
    }

    #[test]
    fn test_rounded_total_is_sum_of_rounded_parts() {
        let totals = Totals {
            subtotal: Decimal::new(1005, 3),
            tax: Decimal::new(1005, 3),
            total: Decimal::new(2010, 3),
        };
        let rounded = totals.rounded();
        assert_eq!(rounded.subtotal, Decimal::new(101, 2));
        assert_eq!(rounded.tax, Decimal::new(101, 2));
        assert_eq!(rounded.total, Decimal::new(202, 2));
        assert_eq!(rounded.total, rounded.subtotal + rounded.tax);
    }
}
