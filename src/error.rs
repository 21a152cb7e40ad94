//! Structured error types for the PharmaChain library.
//!
//! Every public library function returns [`Result<T>`] which carries a
//! [`ChainError`].  The first three variants are the revert reasons a caller
//! sees when a transaction is rejected; the rest are infrastructure failures.
//! The FFI boundary converts these into integer status codes via
//! [`FfiErrorCode`].

use thiserror::Error;

use crate::product::ProductId;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the PharmaChain library.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Caller lacks the role or ownership the operation requires.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: product {0} does not exist")]
    NotFound(ProductId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ledger: {0}")]
    Ledger(String),

    #[error("signing: {0}")]
    Signing(String),

    #[error("config: {0}")]
    Config(String),

    #[error("validation: {0}")]
    Validation(String),

    /// Direct database errors (auto-converted via `?` in the ledger module).
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    /// Catch-all for errors that do not fit a specific domain.
    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// The human-readable revert reason, without the category prefix.
    pub fn reason(&self) -> String {
        match self {
            Self::Unauthorized(r) | Self::InvalidInput(r) => r.clone(),
            Self::NotFound(id) => format!("Product {id} does not exist"),
            other => other.to_string(),
        }
    }

    /// True for the errors that mean "the call was rejected", as opposed to
    /// an infrastructure failure.
    pub fn is_revert(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::NotFound(_) | Self::InvalidInput(_)
        )
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, ChainError>;

// ---------------------------------------------------------------------------
// FFI error codes
// ---------------------------------------------------------------------------

/// Integer status codes returned across the C-ABI boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    InvalidArgument = -1,
    LedgerError = -2,
    SigningError = -3,
    Unauthorized = -4,
    NotFound = -5,
    DatabaseError = -8,
    ConfigError = -9,
    InternalError = -99,
}

impl From<&ChainError> for FfiErrorCode {
    fn from(e: &ChainError) -> Self {
        match e {
            ChainError::Unauthorized(_) => Self::Unauthorized,
            ChainError::NotFound(_) => Self::NotFound,
            ChainError::InvalidInput(_) | ChainError::Validation(_) => Self::InvalidArgument,
            ChainError::Ledger(_) => Self::LedgerError,
            ChainError::Signing(_) => Self::SigningError,
            ChainError::Config(_) => Self::ConfigError,
            ChainError::Database(_) => Self::DatabaseError,
            ChainError::Other(_) => Self::InternalError,
        }
    }
}

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that adds subsystem context to any `Result<T, E>`.
///
/// ```ignore
/// std::fs::read(path).ctx_ledger("read ledger backup")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_ledger(self, msg: &str) -> Result<T>;
    fn ctx_signing(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
    fn ctx_input(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_ledger(self, msg: &str) -> Result<T> {
        self.map_err(|e| ChainError::Ledger(format!("{msg}: {e}")))
    }
    fn ctx_signing(self, msg: &str) -> Result<T> {
        self.map_err(|e| ChainError::Signing(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| ChainError::Config(format!("{msg}: {e}")))
    }
    fn ctx_input(self, msg: &str) -> Result<T> {
        self.map_err(|e| ChainError::InvalidInput(format!("{msg}: {e}")))
    }
}

/// Same as [`ResultExt`] but for `Option<T>` (converts `None` into an error).
pub trait OptionExt<T> {
    fn required_ledger(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required_ledger(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ChainError::Ledger(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_reason_is_verbatim() {
        let e = ChainError::Unauthorized("Only the owner can scan/update status".into());
        assert_eq!(e.reason(), "Only the owner can scan/update status");
        assert!(e.is_revert());
        assert_eq!(FfiErrorCode::from(&e), FfiErrorCode::Unauthorized);
    }

    #[test]
    fn infrastructure_errors_are_not_reverts() {
        let e = ChainError::Ledger("commit tx: disk full".into());
        assert!(!e.is_revert());
        assert_eq!(FfiErrorCode::from(&e), FfiErrorCode::LedgerError);
    }

    #[test]
    fn option_ext_maps_none() {
        let none: Option<u8> = None;
        let err = none.required_ledger("ledger has no deploy entry").unwrap_err();
        assert!(err.to_string().contains("ledger has no deploy entry"));
    }
}
