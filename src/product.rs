//! Product record and lifecycle status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};
use crate::identity::Identity;

pub type ProductId = u64;

/// Supply-chain stage.  The discriminants are the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Status {
    #[default]
    Originated = 0,
    /// In transit.
    Shipped = 1,
    /// Received into storage.
    Received = 2,
    Delivered = 3,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Originated,
        Status::Shipped,
        Status::Received,
        Status::Delivered,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Status::ALL
            .get(usize::from(code))
            .copied()
            .ok_or_else(|| ChainError::InvalidInput(format!("unknown status code {code}")))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Originated => "originated",
            Status::Shipped => "shipped",
            Status::Received => "received",
            Status::Delivered => "delivered",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ChainError;

    /// Accepts a wire code (`"1"`), a canonical name, or one of the aliases
    /// `in_transit`, `stored`, `in_storage`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Status::from_code(code);
        }
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "originated" | "created" => Ok(Status::Originated),
            "shipped" | "in_transit" | "intransit" => Ok(Status::Shipped),
            "received" | "stored" | "in_storage" | "instorage" => Ok(Status::Received),
            "delivered" => Ok(Status::Delivered),
            _ => Err(ChainError::InvalidInput(format!("unknown status '{s}'"))),
        }
    }
}

/// A tracked batch.
///
/// Callers must check `is_valid` before trusting the other fields: reads of
/// an id that was never created return `Product::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    pub batch_number: String,
    pub manufacturing_date: i64,
    pub expiry_date: i64,
    pub manufacturer: Identity,
    pub current_owner: Identity,
    pub status: Status,
    pub certificate_ref: String,
    pub is_verified: bool,
    pub is_valid: bool,
}
