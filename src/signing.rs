//! Caller signing keys and signature verification.
//!
//! Callers sign transactions with P-256 ECDSA.  A caller's [`Identity`] is
//! the SHA-256 of its uncompressed public key, so any party holding a ledger
//! entry can check both the signature and that it belongs to the claimed
//! caller.

use std::path::Path;

use p256::ecdsa::{
    signature::{Signer as _, Verifier as _},
    Signature, SigningKey, VerifyingKey,
};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey as _};
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result, ResultExt as _};
use crate::identity::Identity;
use crate::util;

pub const SIGNER_KIND: &str = "p256-ecdsa/pkcs8-pem";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerDescriptor {
    pub identity: Identity,
    /// Human-readable descriptor (e.g., "p256-ecdsa/pkcs8-pem").
    pub kind: String,
    /// Uncompressed SEC1 public key, base64.
    pub public_key_b64: String,
}

/// Trait boundary for all signer implementations.
///
/// Production callers may back this with an HSM; [`P256PemSigner`] reads a
/// local PKCS#8 PEM file.
pub trait Signer {
    fn descriptor(&self) -> &SignerDescriptor;
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>>;

    fn identity(&self) -> Identity {
        self.descriptor().identity
    }
}

// ---------------------------------------------------------------------------
// PEM-file signer
// ---------------------------------------------------------------------------

pub struct P256PemSigner {
    signing_key: SigningKey,
    descriptor: SignerDescriptor,
}

impl std::fmt::Debug for P256PemSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("P256PemSigner")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl P256PemSigner {
    pub fn from_key_pem(key_pem_path: &Path) -> Result<Self> {
        let key_pem = std::fs::read_to_string(key_pem_path)
            // Avoid including key paths in error strings.
            .map_err(|e| ChainError::Signing(format!("read key pem failed: {e}")))?;
        let signing_key =
            SigningKey::from_pkcs8_pem(&key_pem).ctx_signing("parse P-256 PKCS#8 private key")?;
        Ok(Self::from_signing_key(signing_key))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let vk = VerifyingKey::from(&signing_key);
        let descriptor = SignerDescriptor {
            identity: Identity::from_verifying_key(&vk),
            kind: SIGNER_KIND.to_string(),
            public_key_b64: util::b64_encode(vk.to_encoded_point(false).as_bytes()),
        };
        Self {
            signing_key,
            descriptor,
        }
    }

    /// Fresh random key (tests, benches, `keygen`).
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand_core::OsRng))
    }

    pub fn write_pkcs8_pem(&self, path: &Path) -> Result<()> {
        let pem = self
            .signing_key
            .to_pkcs8_pem(Default::default())
            .ctx_signing("encode pkcs8 pem")?;
        std::fs::write(path, pem.as_bytes())
            .map_err(|e| ChainError::Signing(format!("write {}: {e}", path.display())))
    }
}

impl Signer for P256PemSigner {
    fn descriptor(&self) -> &SignerDescriptor {
        &self.descriptor
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        let sig: Signature = self.signing_key.sign(msg);
        Ok(sig.to_der().as_bytes().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Standalone verification
// ---------------------------------------------------------------------------

pub fn verify_p256_ecdsa_der_sig_with_pubkey(
    pubkey_sec1: &[u8],
    msg: &[u8],
    sig_der: &[u8],
) -> Result<()> {
    let vk = VerifyingKey::from_sec1_bytes(pubkey_sec1).ctx_signing("parse sec1 pubkey")?;
    let sig = Signature::from_der(sig_der).ctx_signing("parse ECDSA DER signature")?;
    vk.verify(msg, &sig)
        .ctx_signing("ECDSA signature verification failed")?;
    Ok(())
}

/// Check that `sig_der` over `msg` was produced by the key in `signer`, and
/// that this key hashes to the claimed identity.
pub fn verify_signer(signer: &SignerDescriptor, msg: &[u8], sig_der: &[u8]) -> Result<()> {
    let pubkey = util::b64_decode(&signer.public_key_b64)?;
    let vk = VerifyingKey::from_sec1_bytes(&pubkey).ctx_signing("parse signer public key")?;
    if Identity::from_verifying_key(&vk) != signer.identity {
        return Err(ChainError::Signing(
            "signer public key does not match signer identity".into(),
        ));
    }
    verify_p256_ecdsa_der_sig_with_pubkey(&pubkey, msg, sig_der)
}

// ---------------------------------------------------------------------------
// Key generation
// ---------------------------------------------------------------------------

/// Generate a P-256 key, writing `<name>.pem` and `<name>.id` (identity hex)
/// to `out_dir`.
pub fn keygen_p256(out_dir: &Path, name: &str) -> Result<Identity> {
    std::fs::create_dir_all(out_dir)
        .map_err(|e| ChainError::Signing(format!("create {}: {e}", out_dir.display())))?;

    let signer = P256PemSigner::random();
    signer.write_pkcs8_pem(&out_dir.join(format!("{name}.pem")))?;

    let id_path = out_dir.join(format!("{name}.id"));
    std::fs::write(&id_path, signer.identity().to_hex())
        .map_err(|e| ChainError::Signing(format!("write {}: {e}", id_path.display())))?;

    Ok(signer.identity())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
