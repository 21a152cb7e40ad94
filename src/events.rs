//! Audit events emitted by successful state changes.
//!
//! Events carry the product or grantee, the nature of the change, the
//! originating actor and the ledger timestamp.  They are returned in the
//! transaction receipt and logged; the hash-chained ledger entry is the
//! durable record.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::product::{ProductId, Status};
use crate::roles::Capability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleChange {
    Granted,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEvent {
    pub identity: Identity,
    pub capability: Capability,
    pub change: RoleChange,
    pub actor: Identity,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProductEventKind {
    Created { manufacturer: Identity },
    StatusChanged { from: Status, to: Status },
    OwnerChanged { from: Identity, to: Identity },
    Verified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEvent {
    pub product_id: ProductId,
    #[serde(flatten)]
    pub kind: ProductEventKind,
    pub actor: Identity,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ChainEvent {
    Role(RoleEvent),
    Product(ProductEvent),
}

impl From<RoleEvent> for ChainEvent {
    fn from(e: RoleEvent) -> Self {
        Self::Role(e)
    }
}

impl From<ProductEvent> for ChainEvent {
    fn from(e: ProductEvent) -> Self {
        Self::Product(e)
    }
}
