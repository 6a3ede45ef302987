//! User-scoped profile collections: shipping addresses and payment methods.
//!
//! Both carry an `isDefault` flag with the same rule: at most one entity per
//! user may be flagged. [`DefaultFlagged`] is the capability the generic
//! enforcer in `service` and the repositories work against.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ShippingAddress;

/// Collections whose entities carry a per-user default flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlaggedCollection {
    Addresses,
    PaymentMethods,
}

impl FlaggedCollection {
    pub fn table(self) -> &'static str {
        match self {
            FlaggedCollection::Addresses => "addresses",
            FlaggedCollection::PaymentMethods => "payment_methods",
        }
    }

    /// Human readable entity name used in error messages.
    pub fn entity(self) -> &'static str {
        match self {
            FlaggedCollection::Addresses => "address",
            FlaggedCollection::PaymentMethods => "payment method",
        }
    }
}

/// An owned entity that may be the user's preferred one.
pub trait DefaultFlagged: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: FlaggedCollection;

    fn id(&self) -> &str;
    fn owner(&self) -> &str;
    fn is_default(&self) -> bool;
    fn created_at(&self) -> DateTime<Utc>;
    fn set_default(&mut self, is_default: bool);
    fn touch(&mut self, now: DateTime<Utc>);

    /// Field-level checks run before the entity is written.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Flags `entity_id` as the default of `user_id` and clears every sibling.
///
/// Entities of other users are left untouched. Returns `false` without
/// mutating anything when `entity_id` is not one of the user's entities.
pub fn promote_default<'a, T: DefaultFlagged + 'a>(
    entities: impl IntoIterator<Item = &'a mut T>,
    user_id: &str,
    entity_id: &str,
) -> bool {
    let mut owned: Vec<&mut T> = entities.into_iter().filter(|e| e.owner() == user_id).collect();
    if !owned.iter().any(|e| e.id() == entity_id) {
        return false;
    }
    for entity in owned.iter_mut() {
        let flag = entity.id() == entity_id;
        entity.set_default(flag);
    }
    true
}

/// Client-supplied fields of a flagged entity; the server assigns the rest.
pub trait FlaggedDraft: DeserializeOwned + Send + 'static {
    type Entity: DefaultFlagged;

    fn build(self, id: String, user_id: String, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self::Entity;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    #[default]
    Home,
    Work,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub kind: AddressKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressDraft {
    #[serde(rename = "type", default)]
    pub kind: AddressKind,
    #[serde(default)]
    pub name: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}

impl FlaggedDraft for AddressDraft {
    type Entity = Address;

    fn build(self, id: String, user_id: String, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Address {
        Address {
            id,
            user_id,
            kind: self.kind,
            name: self.name,
            street: self.street,
            city: self.city,
            state: self.state,
            zip: self.zip,
            country: self.country,
            is_default: self.is_default,
            created_at,
            updated_at,
        }
    }
}

impl From<&Address> for ShippingAddress {
    fn from(a: &Address) -> Self {
        ShippingAddress {
            name: a.name.clone(),
            street: a.street.clone(),
            city: a.city.clone(),
            state: a.state.clone(),
            zip: a.zip.clone(),
            country: a.country.clone(),
        }
    }
}

impl DefaultFlagged for Address {
    const COLLECTION: FlaggedCollection = FlaggedCollection::Addresses;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &str {
        &self.user_id
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_default(&mut self, is_default: bool) {
        self.is_default = is_default;
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        let required = [
            ("street", &self.street),
            ("city", &self.city),
            ("zip", &self.zip),
            ("country", &self.country),
        ];
        match required.iter().find(|(_, v)| v.trim().is_empty()) {
            Some((field, _)) => Err(format!("{field} is required")),
            None => Ok(()),
        }
    }
}

/// Card or bank account details. Serialized flat next to the common fields,
/// discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PaymentDetails {
    #[serde(rename_all = "camelCase")]
    Card {
        last4: String,
        expiry_month: String,
        expiry_year: String,
        brand: String,
    },
    #[serde(rename_all = "camelCase")]
    Bank {
        account_number: String,
        routing_number: String,
        bank_name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(flatten)]
    pub details: PaymentDetails,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodDraft {
    pub name: String,
    #[serde(flatten)]
    pub details: PaymentDetails,
    #[serde(default)]
    pub is_default: bool,
}

impl FlaggedDraft for PaymentMethodDraft {
    type Entity = PaymentMethod;

    fn build(self, id: String, user_id: String, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> PaymentMethod {
        PaymentMethod {
            id,
            user_id,
            name: self.name,
            details: self.details,
            is_default: self.is_default,
            created_at,
            updated_at,
        }
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

impl DefaultFlagged for PaymentMethod {
    const COLLECTION: FlaggedCollection = FlaggedCollection::PaymentMethods;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &str {
        &self.user_id
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_default(&mut self, is_default: bool) {
        self.is_default = is_default;
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".into());
        }
        match &self.details {
            PaymentDetails::Card { last4, expiry_month, expiry_year, brand } => {
                if last4.len() != 4 || !all_digits(last4) {
                    return Err("last4 must be exactly 4 digits".into());
                }
                match expiry_month.parse::<u8>() {
                    Ok(1..=12) => {}
                    _ => return Err("expiryMonth must be between 01 and 12".into()),
                }
                if !(expiry_year.len() == 2 || expiry_year.len() == 4) || !all_digits(expiry_year) {
                    return Err("expiryYear must have 2 or 4 digits".into());
                }
                if brand.trim().is_empty() {
                    return Err("brand is required".into());
                }
            }
            PaymentDetails::Bank { account_number, routing_number, bank_name } => {
                if !all_digits(account_number) {
                    return Err("accountNumber must be numeric".into());
                }
                if routing_number.len() != 9 || !all_digits(routing_number) {
                    return Err("routingNumber must be exactly 9 digits".into());
                }
                if bank_name.trim().is_empty() {
                    return Err("bankName is required".into());
                }
            }
        }
        Ok(())
    }
}
