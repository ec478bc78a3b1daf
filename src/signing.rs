//! ECDSA signing over pre-computed transaction digests
//!
//! Signatures use deterministic RFC 6979 nonces, so signing needs no
//! external randomness and identical (key, digest) inputs always produce
//! the identical signature. The `s` component is normalized to its
//! lower-half representative and the recovery id is adjusted to match.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use thiserror::Error;

use crate::derivation::KeyEncoding;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Digest must be exactly 32 bytes, got {0}")]
    InvalidDigestLength(usize),

    #[error("Private key scalar out of range [1, n-1]")]
    InvalidPrivateKey,

    #[error("Malformed hex input: {0}")]
    MalformedHex(String),

    #[error("Public key recovery failed")]
    RecoveryFailed,
}

/// ECDSA signature plus the recovery identifier that allows public-key
/// recovery from (digest, signature) alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverableSignature {
    r: [u8; 32],
    s: [u8; 32],
    recovery_id: u8,
}

impl RecoverableSignature {
    #[inline]
    pub fn r(&self) -> &[u8; 32] {
        &self.r
    }

    #[inline]
    pub fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// Raw recovery id (0 or 1).
    #[inline]
    pub fn recovery_id(&self) -> u8 {
        self.recovery_id
    }

    /// Ethereum-style recovery value: 27 + recovery id.
    #[inline]
    pub fn v(&self) -> u8 {
        27 + self.recovery_id
    }
}

/// Sign a 32-byte digest with the given private key.
///
/// The digest is a caller-supplied transaction hash; no transaction
/// semantics are validated here.
pub fn sign_digest(private_key: &[u8], digest: &[u8]) -> Result<RecoverableSignature, SigningError> {
    if digest.len() != 32 {
        return Err(SigningError::InvalidDigestLength(digest.len()));
    }

    let signing_key =
        SigningKey::from_slice(private_key).map_err(|_| SigningError::InvalidPrivateKey)?;
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(digest)
        .map_err(|_| SigningError::InvalidPrivateKey)?;

    // Canonical low-S form; flipping s negates the recovery parity.
    let (signature, recovery_id) = match signature.normalize_s() {
        Some(normalized) => (
            normalized,
            RecoveryId::from_byte(recovery_id.to_byte() ^ 1).ok_or(SigningError::RecoveryFailed)?,
        ),
        None => (signature, recovery_id),
    };

    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);

    Ok(RecoverableSignature {
        r,
        s,
        recovery_id: recovery_id.to_byte(),
    })
}

/// Recover the signer's SEC1-encoded public key from a digest and its
/// recoverable signature.
pub fn recover_public_key(
    digest: &[u8],
    signature: &RecoverableSignature,
    encoding: KeyEncoding,
) -> Result<Vec<u8>, SigningError> {
    if digest.len() != 32 {
        return Err(SigningError::InvalidDigestLength(digest.len()));
    }

    let mut raw = [0u8; 64];
    raw[..32].copy_from_slice(&signature.r);
    raw[32..].copy_from_slice(&signature.s);
    let sig = Signature::from_slice(&raw).map_err(|_| SigningError::RecoveryFailed)?;
    let recovery_id =
        RecoveryId::from_byte(signature.recovery_id).ok_or(SigningError::RecoveryFailed)?;

    let verifying_key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|_| SigningError::RecoveryFailed)?;
    let compressed = encoding == KeyEncoding::Compressed;
    Ok(verifying_key.to_encoded_point(compressed).as_bytes().to_vec())
}

/// Decode a hex string, accepting an optional `0x`/`0X` prefix.
///
/// Pure format validation with no cryptographic role; odd-length or
/// non-hex input fails with `MalformedHex`.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, SigningError> {
    let stripped = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    hex::decode(stripped).map_err(|e| SigningError::MalformedHex(e.to_string()))
}

/// Lowercase hex encoding without a prefix.
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
