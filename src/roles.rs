//! Role registry: capability grants per identity.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::CallContext;
use crate::error::{ChainError, Result};
use crate::events::{RoleChange, RoleEvent};
use crate::identity::Identity;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// May grant and revoke capabilities.
    Admin,
    Manufacturer,
    Distributor,
    Retailer,
    Regulator,
    /// Held by trusted components; may mutate the product registry.
    Controller,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Admin,
        Capability::Manufacturer,
        Capability::Distributor,
        Capability::Retailer,
        Capability::Regulator,
        Capability::Controller,
    ];

    const fn bit(self) -> u8 {
        match self {
            Capability::Admin => 1 << 0,
            Capability::Manufacturer => 1 << 1,
            Capability::Distributor => 1 << 2,
            Capability::Retailer => 1 << 3,
            Capability::Regulator => 1 << 4,
            Capability::Controller => 1 << 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Admin => "admin",
            Capability::Manufacturer => "manufacturer",
            Capability::Distributor => "distributor",
            Capability::Retailer => "retailer",
            Capability::Regulator => "regulator",
            Capability::Controller => "controller",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ChainError;

    /// Accepts `regulator`, `Regulator` and `REGULATOR_ROLE` alike.
    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase();
        let norm = norm.strip_suffix("_role").unwrap_or(&norm);
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == norm)
            .ok_or_else(|| ChainError::InvalidInput(format!("unknown capability '{s}'")))
    }
}

/// A finite set of capabilities, stored as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// Returns `true` if the capability was newly added.
    pub fn insert(&mut self, cap: Capability) -> bool {
        let added = !self.contains(cap);
        self.0 |= cap.bit();
        added
    }

    /// Returns `true` if the capability was present.
    pub fn remove(&mut self, cap: Capability) -> bool {
        let present = self.contains(cap);
        self.0 &= !cap.bit();
        present
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::default();
        for c in iter {
            set.insert(c);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RoleRegistry {
    grants: BTreeMap<Identity, CapabilitySet>,
    events: Vec<RoleEvent>,
}

impl RoleRegistry {
    /// New registry with `deployer` holding [`Capability::Admin`].
    pub fn new(deployer: Identity) -> Self {
        let mut grants = BTreeMap::new();
        grants.insert(deployer, CapabilitySet::from_iter([Capability::Admin]));
        Self {
            grants,
            events: Vec::new(),
        }
    }

    pub fn has(&self, identity: &Identity, cap: Capability) -> bool {
        self.grants
            .get(identity)
            .is_some_and(|set| set.contains(cap))
    }

    pub fn capabilities(&self, identity: &Identity) -> CapabilitySet {
        self.grants.get(identity).copied().unwrap_or_default()
    }

    /// Every identity holding `cap`, in identity order.
    pub fn holders(&self, cap: Capability) -> Vec<Identity> {
        self.grants
            .iter()
            .filter(|(_, set)| set.contains(cap))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Returns `true` if the grant changed anything.
    pub fn grant(&mut self, ctx: &CallContext, identity: Identity, cap: Capability) -> Result<bool> {
        self.require_admin(ctx)?;
        if identity.is_zero() {
            return Err(ChainError::InvalidInput(
                "Cannot grant a role to the null identity".into(),
            ));
        }
        let added = self.grants.entry(identity).or_default().insert(cap);
        if added {
            debug!(identity = %identity.short(), capability = %cap, "role granted");
            self.record(ctx, identity, cap, RoleChange::Granted);
        }
        Ok(added)
    }

    /// Returns `true` if the revoke changed anything.
    pub fn revoke(&mut self, ctx: &CallContext, identity: Identity, cap: Capability) -> Result<bool> {
        self.require_admin(ctx)?;
        let Some(set) = self.grants.get_mut(&identity) else {
            return Ok(false);
        };
        let removed = set.remove(cap);
        if set.is_empty() {
            self.grants.remove(&identity);
        }
        if removed {
            debug!(identity = %identity.short(), capability = %cap, "role revoked");
            self.record(ctx, identity, cap, RoleChange::Revoked);
        }
        Ok(removed)
    }

    pub fn take_events(&mut self) -> Vec<RoleEvent> {
        std::mem::take(&mut self.events)
    }

    fn require_admin(&self, ctx: &CallContext) -> Result<()> {
        if self.has(&ctx.sender, Capability::Admin) {
            Ok(())
        } else {
            Err(ChainError::Unauthorized("Caller is not an admin".into()))
        }
    }

    fn record(&mut self, ctx: &CallContext, identity: Identity, capability: Capability, change: RoleChange) {
        self.events.push(RoleEvent {
            identity,
            capability,
            change,
            actor: ctx.origin,
            timestamp: ctx.timestamp,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Identity {
        Identity::component("admin")
    }

    #[test]
    fn deployer_is_admin() {
        let roles = RoleRegistry::new(admin());
        assert!(roles.has(&admin(), Capability::Admin));
        assert!(!roles.has(&admin(), Capability::Regulator));
    }

    #[test]
    fn grant_is_idempotent() {
        let mut roles = RoleRegistry::new(admin());
        let ctx = CallContext::external(admin(), 1);
        let reg = Identity::component("reg");
        assert!(roles.grant(&ctx, reg, Capability::Regulator).unwrap());
        assert!(!roles.grant(&ctx, reg, Capability::Regulator).unwrap());
        assert!(roles.has(&reg, Capability::Regulator));
        assert_eq!(roles.take_events().len(), 1);
    }

    #[test]
    fn multiple_capabilities_per_identity() {
        let mut roles = RoleRegistry::new(admin());
        let ctx = CallContext::external(admin(), 1);
        let who = Identity::component("dist");
        roles.grant(&ctx, who, Capability::Distributor).unwrap();
        roles.grant(&ctx, who, Capability::Retailer).unwrap();
        let caps: Vec<_> = roles.capabilities(&who).iter().collect();
        assert_eq!(caps, vec![Capability::Distributor, Capability::Retailer]);
    }

    #[test]
    fn non_admin_cannot_grant() {
        let mut roles = RoleRegistry::new(admin());
        let intruder = Identity::component("intruder");
        let ctx = CallContext::external(intruder, 1);
        let err = roles
            .grant(&ctx, intruder, Capability::Regulator)
            .unwrap_err();
        assert_eq!(err.reason(), "Caller is not an admin");
        assert!(!roles.has(&intruder, Capability::Regulator));
    }

    #[test]
    fn revoke_is_idempotent_and_takes_effect() {
        let mut roles = RoleRegistry::new(admin());
        let ctx = CallContext::external(admin(), 1);
        let reg = Identity::component("reg");
        roles.grant(&ctx, reg, Capability::Regulator).unwrap();
        assert!(roles.revoke(&ctx, reg, Capability::Regulator).unwrap());
        assert!(!roles.revoke(&ctx, reg, Capability::Regulator).unwrap());
        assert!(!roles.has(&reg, Capability::Regulator));
        assert!(roles.capabilities(&reg).is_empty());
    }

    #[test]
    fn null_identity_rejected() {
        let mut roles = RoleRegistry::new(admin());
        let ctx = CallContext::external(admin(), 1);
        let err = roles
            .grant(&ctx, Identity::ZERO, Capability::Retailer)
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidInput(_)));
    }

    #[test]
    fn capability_names_parse() {
        assert_eq!("Regulator".parse::<Capability>().unwrap(), Capability::Regulator);
        assert_eq!(
            "MANUFACTURER_ROLE".parse::<Capability>().unwrap(),
            Capability::Manufacturer
        );
        assert!("janitor".parse::<Capability>().is_err());
    }
}
