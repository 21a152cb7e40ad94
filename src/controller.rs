//! Supply-chain controller: registration, status scans and custody transfer.
//!
//! Holds [`Capability::Controller`] on the product registry and authorizes
//! its own callers by current ownership.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::CallContext;
use crate::error::{ChainError, Result};
use crate::identity::Identity;
use crate::product::{ProductId, Status};
use crate::registry::{NewProduct, ProductRegistry};
use crate::roles::{Capability, RoleRegistry};

pub const COMPONENT_LABEL: &str = "supply-chain-controller";

pub const OWNER_ONLY_SCAN: &str = "Only the owner can scan/update status";
pub const OWNER_ONLY_TRANSFER: &str = "Only the owner can transfer ownership";

/// Ordering rule applied to `scan_product`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPolicy {
    /// Any status may follow any other.
    #[default]
    Unrestricted,
    /// A scan may not move a product back to an earlier stage.  Re-scanning
    /// the current stage is allowed.
    ForwardOnly,
}

impl std::str::FromStr for StatusPolicy {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "unrestricted" => Ok(Self::Unrestricted),
            "forward_only" => Ok(Self::ForwardOnly),
            other => Err(ChainError::Config(format!("unknown status policy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecyclePolicy {
    pub status_policy: StatusPolicy,
    /// Gate `register_product` on [`Capability::Manufacturer`].
    pub require_manufacturer_role: bool,
}

/// Caller-supplied registration fields.  The manufacturer is always the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub batch_number: String,
    pub expiry_date: i64,
    pub certificate_ref: String,
}

#[derive(Debug, Clone)]
pub struct SupplyChainController {
    identity: Identity,
    policy: LifecyclePolicy,
}

impl SupplyChainController {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self {
            identity: Identity::component(COMPONENT_LABEL),
            policy,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    pub fn register_product(
        &self,
        roles: &RoleRegistry,
        registry: &mut ProductRegistry,
        ctx: &CallContext,
        reg: Registration,
    ) -> Result<ProductId> {
        if self.policy.require_manufacturer_role && !roles.has(&ctx.sender, Capability::Manufacturer) {
            return Err(ChainError::Unauthorized(
                "Caller is not a manufacturer".into(),
            ));
        }
        let product_id = registry.create(
            roles,
            &ctx.forwarded_by(self.identity),
            NewProduct {
                name: reg.name,
                batch_number: reg.batch_number,
                expiry_date: reg.expiry_date,
                manufacturer: ctx.sender,
                certificate_ref: reg.certificate_ref,
            },
        )?;
        info!(product_id, manufacturer = %ctx.sender.short(), "product registered");
        Ok(product_id)
    }

    pub fn scan_product(
        &self,
        roles: &RoleRegistry,
        registry: &mut ProductRegistry,
        ctx: &CallContext,
        product_id: ProductId,
        status: Status,
    ) -> Result<()> {
        let product = registry
            .find(product_id)
            .ok_or(ChainError::NotFound(product_id))?;
        if product.current_owner != ctx.sender {
            warn!(product_id, caller = %ctx.sender.short(), "scan rejected: not owner");
            return Err(ChainError::Unauthorized(OWNER_ONLY_SCAN.into()));
        }
        if self.policy.status_policy == StatusPolicy::ForwardOnly && status < product.status {
            return Err(ChainError::InvalidInput(format!(
                "Status cannot move backwards from {} to {status}",
                product.status
            )));
        }
        registry.set_status(roles, &ctx.forwarded_by(self.identity), product_id, status)?;
        info!(product_id, %status, "product scanned");
        Ok(())
    }

    pub fn transfer_ownership(
        &self,
        roles: &RoleRegistry,
        registry: &mut ProductRegistry,
        ctx: &CallContext,
        product_id: ProductId,
        new_owner: Identity,
    ) -> Result<()> {
        let owner = registry
            .find(product_id)
            .map(|p| p.current_owner)
            .ok_or(ChainError::NotFound(product_id))?;
        if owner != ctx.sender {
            warn!(product_id, caller = %ctx.sender.short(), "transfer rejected: not owner");
            return Err(ChainError::Unauthorized(OWNER_ONLY_TRANSFER.into()));
        }
        registry.set_owner(roles, &ctx.forwarded_by(self.identity), product_id, new_owner)?;
        info!(product_id, from = %owner.short(), to = %new_owner.short(), "ownership transferred");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    struct World {
        roles: RoleRegistry,
        registry: ProductRegistry,
        controller: SupplyChainController,
        admin: Identity,
    }

    fn world(policy: LifecyclePolicy) -> World {
        let admin = Identity::component("admin");
        let controller = SupplyChainController::new(policy);
        let mut roles = RoleRegistry::new(admin);
        roles
            .grant(
                &CallContext::external(admin, NOW),
                controller.identity(),
                Capability::Controller,
            )
            .unwrap();
        World {
            roles,
            registry: ProductRegistry::new(),
            controller,
            admin,
        }
    }

    fn registration() -> Registration {
        Registration {
            name: "Aspirin".into(),
            batch_number: "BATCH-001".into(),
            expiry_date: NOW + 50_000,
            certificate_ref: "QmHash".into(),
        }
    }

    impl World {
        fn register(&mut self, caller: Identity) -> Result<ProductId> {
            self.controller.register_product(
                &self.roles,
                &mut self.registry,
                &CallContext::external(caller, NOW),
                registration(),
            )
        }

        fn scan(&mut self, caller: Identity, id: ProductId, status: Status) -> Result<()> {
            self.controller.scan_product(
                &self.roles,
                &mut self.registry,
                &CallContext::external(caller, NOW),
                id,
                status,
            )
        }

        fn transfer(&mut self, caller: Identity, id: ProductId, to: Identity) -> Result<()> {
            self.controller.transfer_ownership(
                &self.roles,
                &mut self.registry,
                &CallContext::external(caller, NOW),
                id,
                to,
            )
        }
    }

    #[test]
    fn any_caller_registers_by_default() {
        let mut w = world(LifecyclePolicy::default());
        let anyone = Identity::component("anyone");
        let id = w.register(anyone).unwrap();
        assert_eq!(w.registry.get(id).manufacturer, anyone);
    }

    #[test]
    fn manufacturer_gate_when_configured() {
        let mut w = world(LifecyclePolicy {
            require_manufacturer_role: true,
            ..Default::default()
        });
        let maker = Identity::component("maker");
        let err = w.register(maker).unwrap_err();
        assert_eq!(err.reason(), "Caller is not a manufacturer");

        let admin_ctx = CallContext::external(w.admin, NOW);
        w.roles.grant(&admin_ctx, maker, Capability::Manufacturer).unwrap();
        assert_eq!(w.register(maker).unwrap(), 1);
    }

    #[test]
    fn non_owner_scan_rejected_and_state_kept() {
        let mut w = world(LifecyclePolicy::default());
        let maker = Identity::component("maker");
        let hacker = Identity::component("hacker");
        let id = w.register(maker).unwrap();
        let err = w.scan(hacker, id, Status::Delivered).unwrap_err();
        assert_eq!(err.reason(), OWNER_ONLY_SCAN);
        assert_eq!(w.registry.get(id).status, Status::Originated);
    }

    #[test]
    fn scan_unknown_product_is_not_found() {
        let mut w = world(LifecyclePolicy::default());
        let err = w.scan(Identity::component("x"), 42, Status::Shipped).unwrap_err();
        assert!(matches!(err, ChainError::NotFound(42)));
    }

    #[test]
    fn unrestricted_policy_allows_regression_and_rescans_after_delivery() {
        let mut w = world(LifecyclePolicy::default());
        let maker = Identity::component("maker");
        let id = w.register(maker).unwrap();
        w.scan(maker, id, Status::Delivered).unwrap();
        w.scan(maker, id, Status::Shipped).unwrap();
        assert_eq!(w.registry.get(id).status, Status::Shipped);
    }

    #[test]
    fn forward_only_policy_rejects_regression() {
        let mut w = world(LifecyclePolicy {
            status_policy: StatusPolicy::ForwardOnly,
            ..Default::default()
        });
        let maker = Identity::component("maker");
        let id = w.register(maker).unwrap();
        w.scan(maker, id, Status::Received).unwrap();
        w.scan(maker, id, Status::Received).unwrap();
        let err = w.scan(maker, id, Status::Shipped).unwrap_err();
        assert!(matches!(err, ChainError::InvalidInput(_)));
        assert_eq!(w.registry.get(id).status, Status::Received);
    }

    #[test]
    fn transfer_moves_authority() {
        let mut w = world(LifecyclePolicy::default());
        let a = Identity::component("a");
        let b = Identity::component("b");
        let id = w.register(a).unwrap();
        w.transfer(a, id, b).unwrap();

        assert_eq!(w.scan(a, id, Status::Shipped).unwrap_err().reason(), OWNER_ONLY_SCAN);
        assert_eq!(
            w.transfer(a, id, a).unwrap_err().reason(),
            OWNER_ONLY_TRANSFER
        );
        w.scan(b, id, Status::Received).unwrap();
        w.transfer(b, id, a).unwrap();
        assert_eq!(w.registry.owner_of(id), a);
    }

    #[test]
    fn revoked_controller_capability_blocks_forwarding() {
        let mut w = world(LifecyclePolicy::default());
        let maker = Identity::component("maker");
        let id = w.register(maker).unwrap();
        let admin_ctx = CallContext::external(w.admin, NOW);
        let controller_id = w.controller.identity();
        w.roles
            .revoke(&admin_ctx, controller_id, Capability::Controller)
            .unwrap();
        let err = w.scan(maker, id, Status::Shipped).unwrap_err();
        assert_eq!(err.reason(), "Caller is not a controller");
    }

    #[test]
    fn policy_names_parse() {
        assert_eq!("forward-only".parse::<StatusPolicy>().unwrap(), StatusPolicy::ForwardOnly);
        assert!("strict".parse::<StatusPolicy>().is_err());
    }
}
