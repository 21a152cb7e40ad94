//! The chain: world state backed by the hash-chained ledger.
//!
//! Every state change goes through [`Chain::submit`], which checks the
//! caller's signature, applies the call to a copy of the state, appends the
//! signed transaction to the ledger and only then swaps the copy in.  Any
//! failure leaves both ledger and state untouched.  Opening an existing
//! ledger verifies the hash chain and every signature, then rebuilds state
//! by replaying the entries in order.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::controller::{LifecyclePolicy, Registration};
use crate::error::{ChainError, OptionExt as _, Result};
use crate::identity::Identity;
use crate::ledger::{self, Ledger, LedgerAppendInput, LedgerEntry, LedgerMeta};
use crate::product::{Product, ProductId, Status};
use crate::roles::{Capability, CapabilitySet};
use crate::signing::Signer;
use crate::state::{Receipt, WorldState};
use crate::tx::{Call, SignedTransaction, Transaction};
use crate::util;

/// How far a transaction timestamp may drift from the local clock at submit.
pub const MAX_CLOCK_SKEW_SECS: u64 = 300;

#[derive(Debug)]
pub struct Chain {
    ledger: Ledger,
    state: WorldState,
}

impl Chain {
    /// Create a new ledger at `db_path` deployed by `deployer`.
    pub fn create(db_path: &Path, deployer: &dyn Signer, policy: LifecyclePolicy) -> Result<Self> {
        if db_path.exists() {
            return Err(ChainError::Ledger(format!(
                "ledger {} already exists",
                db_path.display()
            )));
        }
        Self::bootstrap(Ledger::create_new(db_path)?, deployer, policy)
    }

    pub fn create_in_memory(deployer: &dyn Signer, policy: LifecyclePolicy) -> Result<Self> {
        Self::bootstrap(Ledger::in_memory()?, deployer, policy)
    }

    /// Open, verify and replay an existing ledger.
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::replay(Ledger::open_existing(db_path)?)
    }

    /// Restore a JSON backup into a new database, then verify and replay it.
    pub fn import(json_path: &Path, db_path: &Path) -> Result<Self> {
        if db_path.exists() {
            return Err(ChainError::Ledger(format!(
                "target database {} already exists",
                db_path.display()
            )));
        }
        Self::replay(ledger::import_ledger_json(json_path, db_path)?)
    }

    pub fn export(&self, out_path: &Path) -> Result<()> {
        ledger::export_ledger_json(&self.ledger, out_path)
    }

    fn bootstrap(mut ledger: Ledger, deployer: &dyn Signer, policy: LifecyclePolicy) -> Result<Self> {
        let deploy = Transaction::new(
            ledger.meta().ledger_id,
            1,
            deployer.identity(),
            util::now_unix(),
            Call::Deploy { policy },
        );
        let stx = SignedTransaction::sign(deploy, deployer)?;
        ledger.append(append_input(&stx, None))?;

        let state = WorldState::genesis(deployer.identity(), policy);
        let components = [state.controller().identity(), state.verifier().identity()];
        let mut chain = Self { ledger, state };
        for component in components {
            chain.execute(
                deployer,
                Call::GrantRole {
                    identity: component,
                    capability: Capability::Controller,
                },
            )?;
        }
        info!(
            ledger_id = %chain.meta().ledger_id,
            deployer = %deployer.identity().short(),
            "ledger deployed"
        );
        Ok(chain)
    }

    fn replay(ledger: Ledger) -> Result<Self> {
        ledger.verify_integrity(ledger::verify_caller_signature)?;
        let ledger_id = ledger.meta().ledger_id;
        let entries = ledger.iter_entries()?;

        let mut state: Option<WorldState> = None;
        for entry in &entries {
            let tx = Transaction::from_payload_json(&entry.payload_json)?;
            if tx.seq != entry.seq
                || tx.ledger_id != ledger_id
                || tx.caller != entry.signer.identity
                || tx.call.kind() != entry.kind
            {
                return Err(ChainError::Ledger(format!(
                    "entry {} does not match its transaction envelope",
                    entry.seq
                )));
            }
            match state.as_mut() {
                Some(s) => {
                    s.apply(tx.seq, tx.caller, tx.timestamp, &tx.call).map_err(|e| {
                        ChainError::Ledger(format!("replay of entry {} failed: {e}", entry.seq))
                    })?;
                }
                None => {
                    let Call::Deploy { policy } = tx.call else {
                        return Err(ChainError::Ledger("first entry is not a deploy".into()));
                    };
                    state = Some(WorldState::genesis(tx.caller, policy));
                }
            }
        }

        let state = state.required_ledger("ledger has no deploy entry")?;
        info!(
            %ledger_id,
            entries = entries.len(),
            products = state.products().product_count(),
            "ledger replayed"
        );
        Ok(Self { ledger, state })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Build an unsigned transaction for the next ledger slot.
    pub fn prepare(&self, caller: Identity, call: Call) -> Result<Transaction> {
        Ok(Transaction::new(
            self.meta().ledger_id,
            self.ledger.latest_seq()? + 1,
            caller,
            util::now_unix(),
            call,
        ))
    }

    pub fn submit(&mut self, stx: SignedTransaction) -> Result<Receipt> {
        stx.verify()?;
        let tx = &stx.tx;
        if tx.ledger_id != self.meta().ledger_id {
            return Err(ChainError::InvalidInput(format!(
                "transaction targets ledger {}, this is {}",
                tx.ledger_id,
                self.meta().ledger_id
            )));
        }
        let expected = self.ledger.latest_seq()? + 1;
        if tx.seq != expected {
            return Err(ChainError::InvalidInput(format!(
                "stale transaction: sequence {} but next is {expected}",
                tx.seq
            )));
        }
        if tx.timestamp.abs_diff(util::now_unix()) > MAX_CLOCK_SKEW_SECS {
            return Err(ChainError::InvalidInput(format!(
                "transaction timestamp {} is outside the accepted clock window",
                tx.timestamp
            )));
        }

        let mut next = self.state.clone();
        let receipt = next
            .apply(tx.seq, tx.caller, tx.timestamp, &tx.call)
            .inspect_err(|e| {
                if e.is_revert() {
                    warn!(kind = tx.call.kind(), product_id = ?tx.call.subject(), caller = %tx.caller.short(), reason = %e.reason(), "transaction reverted");
                } else {
                    error!(kind = tx.call.kind(), error = %e, "transaction failed");
                }
            })?;

        let subject = receipt.product_id.map(|id| id as i64);
        self.ledger.append(append_input(&stx, subject))?;
        self.state = next;

        info!(seq = receipt.seq, kind = receipt.kind, product_id = ?receipt.product_id, "transaction committed");
        for event in &receipt.events {
            debug!(?event, "event");
        }
        Ok(receipt)
    }

    /// Prepare, sign and submit in one step.
    pub fn execute(&mut self, signer: &dyn Signer, call: Call) -> Result<Receipt> {
        let tx = self.prepare(signer.identity(), call)?;
        self.submit(SignedTransaction::sign(tx, signer)?)
    }

    pub fn grant_role(&mut self, signer: &dyn Signer, identity: Identity, capability: Capability) -> Result<Receipt> {
        self.execute(signer, Call::GrantRole { identity, capability })
    }

    pub fn revoke_role(&mut self, signer: &dyn Signer, identity: Identity, capability: Capability) -> Result<Receipt> {
        self.execute(signer, Call::RevokeRole { identity, capability })
    }

    /// Returns the new product id.
    pub fn register_product(&mut self, signer: &dyn Signer, registration: Registration) -> Result<ProductId> {
        self.execute(signer, Call::RegisterProduct(registration))?
            .product_id
            .ok_or_else(|| ChainError::Other("registration receipt carries no product id".into()))
    }

    pub fn scan_product(&mut self, signer: &dyn Signer, product_id: ProductId, status: Status) -> Result<Receipt> {
        self.execute(signer, Call::ScanProduct { product_id, status })
    }

    pub fn transfer_ownership(&mut self, signer: &dyn Signer, product_id: ProductId, new_owner: Identity) -> Result<Receipt> {
        self.execute(signer, Call::TransferOwnership { product_id, new_owner })
    }

    pub fn verify_product(&mut self, signer: &dyn Signer, product_id: ProductId) -> Result<Receipt> {
        self.execute(signer, Call::VerifyProduct { product_id })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn meta(&self) -> &LedgerMeta {
        self.ledger.meta()
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn get_product(&self, product_id: ProductId) -> Product {
        self.state.get_product(product_id)
    }

    pub fn get_product_owner(&self, product_id: ProductId) -> Identity {
        self.state.get_product_owner(product_id)
    }

    pub fn has_role(&self, identity: &Identity, capability: Capability) -> bool {
        self.state.roles().has(identity, capability)
    }

    pub fn capabilities(&self, identity: &Identity) -> CapabilitySet {
        self.state.roles().capabilities(identity)
    }

    /// Ledger entries touching one product, oldest first.
    pub fn history(&self, product_id: ProductId) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries_for_subject(product_id as i64)
    }

    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.ledger.iter_entries()
    }

    /// Re-verify the hash chain and every signature.
    pub fn verify(&self) -> Result<()> {
        self.ledger.verify_integrity(ledger::verify_caller_signature)
    }
}

fn append_input(stx: &SignedTransaction, subject: Option<i64>) -> LedgerAppendInput {
    LedgerAppendInput {
        seq: stx.tx.seq,
        ts_utc: util::unix_to_rfc3339(stx.tx.timestamp),
        kind: stx.tx.call.kind().to_string(),
        subject,
        payload_json: stx.payload_json.clone(),
        signature_der: stx.signature_der.clone(),
        signer: stx.signer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::P256PemSigner;
    use tempfile::tempdir;

    fn aspirin() -> Registration {
        Registration {
            name: "Aspirin".into(),
            batch_number: "BATCH-001".into(),
            expiry_date: util::now_unix() + 50_000,
            certificate_ref: "QmHash".into(),
        }
    }

    #[test]
    fn genesis_wires_components() {
        let admin = P256PemSigner::random();
        let chain = Chain::create_in_memory(&admin, LifecyclePolicy::default()).unwrap();
        let controller = chain.state().controller().identity();
        let verifier = chain.state().verifier().identity();
        assert!(chain.has_role(&admin.identity(), Capability::Admin));
        assert!(chain.has_role(&controller, Capability::Controller));
        assert!(chain.has_role(&verifier, Capability::Controller));
        assert_eq!(chain.entries().unwrap().len(), 3);
    }

    #[test]
    fn rejected_call_leaves_ledger_untouched() {
        let admin = P256PemSigner::random();
        let mut chain = Chain::create_in_memory(&admin, LifecyclePolicy::default()).unwrap();
        let before = chain.entries().unwrap().len();
        let mut bad = aspirin();
        bad.expiry_date = 1;
        assert!(chain.register_product(&admin, bad).is_err());
        assert_eq!(chain.entries().unwrap().len(), before);
        assert_eq!(chain.register_product(&admin, aspirin()).unwrap(), 1);
    }

    #[test]
    fn stale_and_foreign_transactions_rejected() {
        let admin = P256PemSigner::random();
        let mut chain = Chain::create_in_memory(&admin, LifecyclePolicy::default()).unwrap();
        let tx = chain
            .prepare(admin.identity(), Call::RegisterProduct(aspirin()))
            .unwrap();
        let stx = SignedTransaction::sign(tx, &admin).unwrap();
        chain.submit(stx.clone()).unwrap();
        let err = chain.submit(stx).unwrap_err();
        assert!(err.to_string().contains("stale transaction"));

        let mut foreign = chain
            .prepare(admin.identity(), Call::RegisterProduct(aspirin()))
            .unwrap();
        foreign.ledger_id = uuid::Uuid::new_v4();
        let err = chain
            .submit(SignedTransaction::sign(foreign, &admin).unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("targets ledger"));
    }

    #[test]
    fn skewed_timestamp_rejected() {
        let admin = P256PemSigner::random();
        let mut chain = Chain::create_in_memory(&admin, LifecyclePolicy::default()).unwrap();
        let mut tx = chain
            .prepare(admin.identity(), Call::RegisterProduct(aspirin()))
            .unwrap();
        tx.timestamp -= 10 * MAX_CLOCK_SKEW_SECS as i64;
        let err = chain
            .submit(SignedTransaction::sign(tx, &admin).unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("clock window"));
    }

    #[test]
    fn reopen_replays_state_and_policy() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("chain.db");
        let admin = P256PemSigner::random();
        let maker = P256PemSigner::random();
        let policy = LifecyclePolicy {
            status_policy: crate::controller::StatusPolicy::ForwardOnly,
            require_manufacturer_role: false,
        };
        {
            let mut chain = Chain::create(&db, &admin, policy).unwrap();
            let id = chain.register_product(&maker, aspirin()).unwrap();
            chain.scan_product(&maker, id, Status::Received).unwrap();
        }

        let mut chain = Chain::open(&db).unwrap();
        let p = chain.get_product(1);
        assert!(p.is_valid);
        assert_eq!(p.status, Status::Received);
        assert_eq!(chain.state().controller().policy(), policy);
        assert!(chain.scan_product(&maker, 1, Status::Shipped).is_err());
        assert_eq!(chain.history(1).unwrap().len(), 2);
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("chain.db");
        let admin = P256PemSigner::random();
        Chain::create(&db, &admin, LifecyclePolicy::default()).unwrap();
        let err = Chain::create(&db, &admin, LifecyclePolicy::default()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
