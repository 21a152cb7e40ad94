//! Transactions: the only way state changes.
//!
//! A [`Transaction`] names its caller, the ledger it targets, the sequence
//! number it expects to occupy and the [`Call`] to execute.  It is signed by
//! the caller over the SHA-256 of its canonical JSON.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::controller::{LifecyclePolicy, Registration};
use crate::error::{ChainError, Result, ResultExt as _};
use crate::identity::Identity;
use crate::product::{ProductId, Status};
use crate::roles::Capability;
use crate::signing::{self, Signer, SignerDescriptor};
use crate::util;

pub const TX_SCHEMA: &str = "pharmachain.tx.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    /// First entry of every ledger; the caller becomes the admin.
    Deploy { policy: LifecyclePolicy },
    GrantRole {
        identity: Identity,
        capability: Capability,
    },
    RevokeRole {
        identity: Identity,
        capability: Capability,
    },
    RegisterProduct(Registration),
    ScanProduct {
        product_id: ProductId,
        status: Status,
    },
    TransferOwnership {
        product_id: ProductId,
        new_owner: Identity,
    },
    VerifyProduct { product_id: ProductId },
}

impl Call {
    pub fn kind(&self) -> &'static str {
        match self {
            Call::Deploy { .. } => "deploy",
            Call::GrantRole { .. } => "grant_role",
            Call::RevokeRole { .. } => "revoke_role",
            Call::RegisterProduct(_) => "register_product",
            Call::ScanProduct { .. } => "scan_product",
            Call::TransferOwnership { .. } => "transfer_ownership",
            Call::VerifyProduct { .. } => "verify_product",
        }
    }

    /// The existing product this call targets.  Registration has no subject
    /// until it commits.
    pub fn subject(&self) -> Option<ProductId> {
        match self {
            Call::ScanProduct { product_id, .. }
            | Call::TransferOwnership { product_id, .. }
            | Call::VerifyProduct { product_id } => Some(*product_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub schema: String,
    pub ledger_id: Uuid,
    pub seq: i64,
    pub caller: Identity,
    pub timestamp: i64,
    pub call: Call,
}

impl Transaction {
    pub fn new(ledger_id: Uuid, seq: i64, caller: Identity, timestamp: i64, call: Call) -> Self {
        Self {
            schema: TX_SCHEMA.to_string(),
            ledger_id,
            seq,
            caller,
            timestamp,
            call,
        }
    }

    pub fn to_payload_json(&self) -> Result<String> {
        serde_json::to_string(self).ctx_ledger("serialize transaction")
    }

    pub fn from_payload_json(json: &str) -> Result<Self> {
        let tx: Transaction = serde_json::from_str(json).ctx_ledger("parse transaction")?;
        if tx.schema != TX_SCHEMA {
            return Err(ChainError::Ledger(format!(
                "unsupported transaction schema '{}'",
                tx.schema
            )));
        }
        Ok(tx)
    }
}

/// A transaction plus the caller's signature over its payload hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub payload_json: String,
    pub signature_der: Vec<u8>,
    pub signer: SignerDescriptor,
}

impl SignedTransaction {
    pub fn sign(tx: Transaction, signer: &dyn Signer) -> Result<Self> {
        if tx.caller != signer.identity() {
            return Err(ChainError::Signing(
                "transaction caller does not match signing key".into(),
            ));
        }
        let payload_json = tx.to_payload_json()?;
        let payload_hash = util::sha256(payload_json.as_bytes());
        let signature_der = signer.sign(&payload_hash)?;
        Ok(Self {
            tx,
            payload_json,
            signature_der,
            signer: signer.descriptor().clone(),
        })
    }

    /// Signature valid, signer key matches the signer identity, and the
    /// signer is the declared caller.
    pub fn verify(&self) -> Result<()> {
        if self.signer.identity != self.tx.caller {
            return Err(ChainError::Signing(
                "signer identity does not match transaction caller".into(),
            ));
        }
        let reparsed = Transaction::from_payload_json(&self.payload_json)?;
        if reparsed != self.tx {
            return Err(ChainError::Signing(
                "payload does not match transaction".into(),
            ));
        }
        let payload_hash = util::sha256(self.payload_json.as_bytes());
        signing::verify_signer(&self.signer, &payload_hash, &self.signature_der)
    }
}
