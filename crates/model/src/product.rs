use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

/// Product families sold on the marketplace. Each one lives in its own
/// collection; [`ProductType::collection`] is the dispatch table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Electronic,
    Car,
    Sparepart,
}

impl ProductType {
    pub const ALL: [ProductType; 3] = [ProductType::Electronic, ProductType::Car, ProductType::Sparepart];

    /// Name of the collection holding products of this type.
    pub fn collection(self) -> &'static str {
        match self {
            ProductType::Electronic => "electronics",
            ProductType::Car => "cars",
            ProductType::Sparepart => "spare_parts",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Electronic => "electronic",
            ProductType::Car => "car",
            ProductType::Sparepart => "sparepart",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProductType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError { kind: "product type", value: s.to_string() })
    }
}
