//! Product registry: the canonical product store.
//!
//! Records live in an arena indexed by `product_id - 1`, so ids are dense,
//! start at 1 and are never reused.  Every mutation requires the immediate
//! sender to hold [`Capability::Controller`], re-checked on each call.  The
//! registry enforces structural invariants only; ownership and ordering
//! policy belong to the calling component.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::CallContext;
use crate::error::{ChainError, Result};
use crate::events::{ProductEvent, ProductEventKind};
use crate::identity::Identity;
use crate::product::{Product, ProductId, Status};
use crate::roles::{Capability, RoleRegistry};
use crate::util;

/// Arguments to [`ProductRegistry::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub batch_number: String,
    pub expiry_date: i64,
    pub manufacturer: Identity,
    pub certificate_ref: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProductRegistry {
    products: Vec<Product>,
    events: Vec<ProductEvent>,
}

impl ProductRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, roles: &RoleRegistry, ctx: &CallContext, input: NewProduct) -> Result<ProductId> {
        require_controller(roles, ctx)?;

        util::validate_required(&input.name, "Product name")?;
        util::validate_required(&input.batch_number, "Batch number")?;
        if input.expiry_date <= ctx.timestamp {
            return Err(ChainError::InvalidInput(
                "Expiry date must be in the future".into(),
            ));
        }
        if input.manufacturer.is_zero() {
            return Err(ChainError::InvalidInput(
                "Manufacturer must not be the null identity".into(),
            ));
        }

        let product_id = self.products.len() as ProductId + 1;
        self.products.push(Product {
            product_id,
            name: input.name,
            batch_number: input.batch_number,
            manufacturing_date: ctx.timestamp,
            expiry_date: input.expiry_date,
            manufacturer: input.manufacturer,
            current_owner: input.manufacturer,
            status: Status::Originated,
            certificate_ref: input.certificate_ref,
            is_verified: false,
            is_valid: true,
        });
        debug!(product_id, manufacturer = %input.manufacturer.short(), "product created");
        self.record(
            ctx,
            product_id,
            ProductEventKind::Created {
                manufacturer: input.manufacturer,
            },
        );
        Ok(product_id)
    }

    pub fn set_status(&mut self, roles: &RoleRegistry, ctx: &CallContext, product_id: ProductId, status: Status) -> Result<()> {
        require_controller(roles, ctx)?;
        let product = self.find_mut(product_id)?;
        let from = product.status;
        product.status = status;
        debug!(product_id, %from, to = %status, "status written");
        self.record(ctx, product_id, ProductEventKind::StatusChanged { from, to: status });
        Ok(())
    }

    pub fn set_owner(&mut self, roles: &RoleRegistry, ctx: &CallContext, product_id: ProductId, new_owner: Identity) -> Result<()> {
        require_controller(roles, ctx)?;
        let product = self.find_mut(product_id)?;
        if new_owner.is_zero() {
            return Err(ChainError::InvalidInput(
                "New owner must not be the null identity".into(),
            ));
        }
        let from = product.current_owner;
        product.current_owner = new_owner;
        debug!(product_id, from = %from.short(), to = %new_owner.short(), "owner written");
        self.record(ctx, product_id, ProductEventKind::OwnerChanged { from, to: new_owner });
        Ok(())
    }

    /// Idempotent; an event is only emitted on the false to true flip.
    pub fn set_verified(&mut self, roles: &RoleRegistry, ctx: &CallContext, product_id: ProductId) -> Result<()> {
        require_controller(roles, ctx)?;
        let product = self.find_mut(product_id)?;
        if product.is_verified {
            return Ok(());
        }
        product.is_verified = true;
        debug!(product_id, "verified flag set");
        self.record(ctx, product_id, ProductEventKind::Verified);
        Ok(())
    }

    /// Returns `Product::default()` (with `is_valid == false`) when absent.
    pub fn get(&self, product_id: ProductId) -> Product {
        self.find(product_id).cloned().unwrap_or_default()
    }

    /// The null identity when absent.
    pub fn owner_of(&self, product_id: ProductId) -> Identity {
        self.find(product_id)
            .map(|p| p.current_owner)
            .unwrap_or(Identity::ZERO)
    }

    pub fn find(&self, product_id: ProductId) -> Option<&Product> {
        let idx = usize::try_from(product_id.checked_sub(1)?).ok()?;
        self.products.get(idx)
    }

    pub fn product_count(&self) -> u64 {
        self.products.len() as u64
    }

    pub fn take_events(&mut self) -> Vec<ProductEvent> {
        std::mem::take(&mut self.events)
    }

    fn find_mut(&mut self, product_id: ProductId) -> Result<&mut Product> {
        let idx = product_id
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .ok_or(ChainError::NotFound(product_id))?;
        self.products
            .get_mut(idx)
            .ok_or(ChainError::NotFound(product_id))
    }

    fn record(&mut self, ctx: &CallContext, product_id: ProductId, kind: ProductEventKind) {
        self.events.push(ProductEvent {
            product_id,
            kind,
            actor: ctx.origin,
            timestamp: ctx.timestamp,
        });
    }
}

fn require_controller(roles: &RoleRegistry, ctx: &CallContext) -> Result<()> {
    if roles.has(&ctx.sender, Capability::Controller) {
        Ok(())
    } else {
        Err(ChainError::Unauthorized("Caller is not a controller".into()))
    }
}
