//! Hashing, encoding, time and input validation helpers.

use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{ChainError, Result};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

// ---------------------------------------------------------------------------
// Base64
// ---------------------------------------------------------------------------

pub fn b64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| ChainError::Other(format!("invalid base64: {e}")))
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current time as unix seconds.
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn unix_to_rfc3339(ts: i64) -> String {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.to_string())
}

/// Parse a timestamp given either as unix seconds or as RFC 3339.
pub fn parse_timestamp(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<i64>() {
        return Ok(secs);
    }
    OffsetDateTime::parse(s, &Rfc3339)
        .map(|t| t.unix_timestamp())
        .map_err(|e| {
            ChainError::Validation(format!(
                "timestamp '{s}' is neither unix seconds nor RFC 3339: {e}"
            ))
        })
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Required product field.  Only emptiness is rejected; the value is
/// stored verbatim, so lot codes like `LOT 2024/07` or `B#12` pass.
pub fn validate_required(value: &str, label: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ChainError::InvalidInput(format!("{label} must not be empty")));
    }
    Ok(())
}

/// Validate that a path is not empty and does not contain null bytes.
pub fn validate_path(p: &Path, label: &str) -> Result<()> {
    let s = p.to_string_lossy();
    if s.is_empty() {
        return Err(ChainError::Validation(format!("{label} path is empty")));
    }
    if s.contains('\0') {
        return Err(ChainError::Validation(format!(
            "{label} path contains null byte"
        )));
    }
    Ok(())
}

/// Canonicalize a path if it exists, otherwise return it unchanged.
pub fn canonicalize_if_exists(p: &Path, label: &str) -> Result<PathBuf> {
    validate_path(p, label)?;
    if p.exists() {
        std::fs::canonicalize(p)
            .map_err(|e| ChainError::Validation(format!("{label} path invalid: {e}")))
    } else {
        Ok(p.to_path_buf())
    }
}

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("PHARMACHAIN_GIT_HASH");
pub const BUILD_TS: &str = env!("PHARMACHAIN_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("PharmaChain v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn b64_decode_invalid() {
        assert!(b64_decode("not!!valid!!base64").is_err());
    }

    #[test]
    fn required_fields_only_reject_empty() {
        let err = validate_required("", "Batch number").unwrap_err();
        assert_eq!(err.reason(), "Batch number must not be empty");
        assert!(validate_required("LOT 2024/07", "Batch number").is_ok());
        assert!(validate_required("B#12", "Batch number").is_ok());
        assert!(validate_required("   ", "Product name").is_ok());
    }

    #[test]
    fn timestamps_parse_both_forms() {
        assert_eq!(parse_timestamp("1700000000").unwrap(), 1_700_000_000);
        assert_eq!(parse_timestamp("1970-01-01T00:01:00Z").unwrap(), 60);
        assert!(parse_timestamp("next tuesday").is_err());
        assert_eq!(unix_to_rfc3339(60), "1970-01-01T00:01:00Z");
    }

    #[test]
    fn version_string_non_empty() {
        assert!(version_string().contains("PharmaChain"));
    }
}
