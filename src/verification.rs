//! Regulator attestation.

use tracing::{info, warn};

use crate::context::CallContext;
use crate::error::{ChainError, Result};
use crate::identity::Identity;
use crate::product::ProductId;
use crate::registry::ProductRegistry;
use crate::roles::{Capability, RoleRegistry};

pub const COMPONENT_LABEL: &str = "verification-service";

pub const NOT_A_REGULATOR: &str = "Caller is not a regulator";

/// Marks products verified on behalf of [`Capability::Regulator`] holders,
/// regardless of supply-chain stage or current owner.
#[derive(Debug, Clone)]
pub struct VerificationService {
    identity: Identity,
}

impl Default for VerificationService {
    fn default() -> Self {
        Self {
            identity: Identity::component(COMPONENT_LABEL),
        }
    }
}

impl VerificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn verify_product(
        &self,
        roles: &RoleRegistry,
        registry: &mut ProductRegistry,
        ctx: &CallContext,
        product_id: ProductId,
    ) -> Result<()> {
        if !roles.has(&ctx.sender, Capability::Regulator) {
            warn!(product_id, caller = %ctx.sender.short(), "verify rejected: not a regulator");
            return Err(ChainError::Unauthorized(NOT_A_REGULATOR.into()));
        }
        registry.set_verified(roles, &ctx.forwarded_by(self.identity), product_id)?;
        info!(product_id, regulator = %ctx.sender.short(), "product verified");
        Ok(())
    }
}
