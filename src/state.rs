//! World state: the four components wired together.

use serde::Serialize;

use crate::context::CallContext;
use crate::controller::{LifecyclePolicy, SupplyChainController};
use crate::error::{ChainError, Result};
use crate::events::ChainEvent;
use crate::identity::Identity;
use crate::product::{Product, ProductId};
use crate::registry::ProductRegistry;
use crate::roles::RoleRegistry;
use crate::tx::Call;
use crate::verification::VerificationService;

/// Outcome of a committed call.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub seq: i64,
    pub kind: &'static str,
    /// The id assigned by `register_product`, or the call's subject.
    pub product_id: Option<ProductId>,
    pub events: Vec<ChainEvent>,
}

#[derive(Debug, Clone)]
pub struct WorldState {
    roles: RoleRegistry,
    products: ProductRegistry,
    controller: SupplyChainController,
    verifier: VerificationService,
}

impl WorldState {
    /// State right after a `deploy` call by `deployer`.  The components hold
    /// no capabilities yet; the deployer grants them `Controller`.
    pub fn genesis(deployer: Identity, policy: LifecyclePolicy) -> Self {
        Self {
            roles: RoleRegistry::new(deployer),
            products: ProductRegistry::new(),
            controller: SupplyChainController::new(policy),
            verifier: VerificationService::new(),
        }
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn products(&self) -> &ProductRegistry {
        &self.products
    }

    pub fn controller(&self) -> &SupplyChainController {
        &self.controller
    }

    pub fn verifier(&self) -> &VerificationService {
        &self.verifier
    }

    pub fn get_product(&self, product_id: ProductId) -> Product {
        self.products.get(product_id)
    }

    pub fn get_product_owner(&self, product_id: ProductId) -> Identity {
        self.products.owner_of(product_id)
    }

    /// Execute one call.  On error nothing has been written, but callers
    /// that need all-or-nothing semantics across the ledger append should
    /// apply to a clone.
    pub fn apply(&mut self, seq: i64, caller: Identity, timestamp: i64, call: &Call) -> Result<Receipt> {
        let ctx = CallContext::external(caller, timestamp);
        let product_id = match call {
            Call::Deploy { .. } => {
                return Err(ChainError::InvalidInput("ledger is already deployed".into()));
            }
            Call::GrantRole { identity, capability } => {
                self.roles.grant(&ctx, *identity, *capability)?;
                None
            }
            Call::RevokeRole { identity, capability } => {
                self.roles.revoke(&ctx, *identity, *capability)?;
                None
            }
            Call::RegisterProduct(reg) => Some(self.controller.register_product(
                &self.roles,
                &mut self.products,
                &ctx,
                reg.clone(),
            )?),
            Call::ScanProduct { product_id, status } => {
                self.controller
                    .scan_product(&self.roles, &mut self.products, &ctx, *product_id, *status)?;
                Some(*product_id)
            }
            Call::TransferOwnership {
                product_id,
                new_owner,
            } => {
                self.controller.transfer_ownership(
                    &self.roles,
                    &mut self.products,
                    &ctx,
                    *product_id,
                    *new_owner,
                )?;
                Some(*product_id)
            }
            Call::VerifyProduct { product_id } => {
                self.verifier
                    .verify_product(&self.roles, &mut self.products, &ctx, *product_id)?;
                Some(*product_id)
            }
        };

        let mut events: Vec<ChainEvent> = self
            .roles
            .take_events()
            .into_iter()
            .map(ChainEvent::from)
            .collect();
        events.extend(self.products.take_events().into_iter().map(ChainEvent::from));

        Ok(Receipt {
            seq,
            kind: call.kind(),
            product_id,
            events,
        })
    }
}
