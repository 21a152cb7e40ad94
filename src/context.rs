//! Per-call execution context.

use crate::identity::Identity;

/// Who is calling, on whose behalf, and at what ledger time.
///
/// `sender` is the immediate caller and is what authorization checks look
/// at.  `origin` is the external identity that signed the transaction and is
/// what audit events record.  When a component forwards a call into another
/// component, `sender` becomes the forwarding component's identity while
/// `origin` and `timestamp` stay fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub sender: Identity,
    pub origin: Identity,
    pub timestamp: i64,
}

impl CallContext {
    pub fn external(caller: Identity, timestamp: i64) -> Self {
        Self {
            sender: caller,
            origin: caller,
            timestamp,
        }
    }

    pub fn forwarded_by(&self, component: Identity) -> Self {
        Self {
            sender: component,
            ..*self
        }
    }
}
