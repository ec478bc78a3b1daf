//! Ethereum-style address formatting for derived public keys
//!
//! Pure display helpers: uncompressed point body -> Keccak-256 -> last 20
//! bytes -> EIP-55 mixed-case checksum string. Nothing here touches secret
//! material.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("Invalid SEC1 public key encoding")]
    InvalidPublicKey,

    #[error("Invalid address format: {0}")]
    InvalidAddress(String),
}

/// Derive the 20-byte address for a SEC1-encoded public key.
///
/// Accepts compressed (33-byte) or uncompressed (65-byte) input; the hash
/// is always computed over the uncompressed 64-byte point body.
pub fn address_bytes_from_public_key(public_key: &[u8]) -> Result<[u8; 20], AddressError> {
    let key = PublicKey::from_sec1_bytes(public_key).map_err(|_| AddressError::InvalidPublicKey)?;
    let encoded = key.to_encoded_point(false);

    let mut hash = [0u8; 32];
    let mut hasher = Keccak::v256();
    hasher.update(&encoded.as_bytes()[1..]); // drop the 0x04 prefix
    hasher.finalize(&mut hash);

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Ok(address)
}

/// EIP-55 checksummed address string for a SEC1-encoded public key.
pub fn address_from_public_key(public_key: &[u8]) -> Result<String, AddressError> {
    Ok(to_checksum_string(&address_bytes_from_public_key(public_key)?))
}

/// Normalize any `0x`-prefixed 40-hex-digit address to EIP-55 form.
pub fn to_checksum(address: &str) -> Result<String, AddressError> {
    let stripped = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| AddressError::InvalidAddress("missing 0x prefix".into()))?;
    if stripped.len() != 40 {
        return Err(AddressError::InvalidAddress(format!(
            "expected 40 hex digits, got {}",
            stripped.len()
        )));
    }
    let bytes = hex::decode(stripped)
        .map_err(|e| AddressError::InvalidAddress(e.to_string()))?;
    let mut raw = [0u8; 20];
    raw.copy_from_slice(&bytes);
    Ok(to_checksum_string(&raw))
}

/// Validate an address string: `0x` prefix, 40 hex digits, and a correct
/// EIP-55 checksum when the input is mixed-case.
pub fn is_valid_address(address: &str) -> bool {
    match to_checksum(address) {
        Ok(checksummed) => {
            let lower = address.to_lowercase();
            // All-lowercase and all-uppercase inputs carry no checksum
            if address == lower || address[2..] == address[2..].to_uppercase() {
                true
            } else {
                checksummed == address
            }
        }
        Err(_) => false,
    }
}

/// EIP-55: uppercase each hex digit whose corresponding nibble in
/// Keccak-256(lowercase address) is >= 8.
fn to_checksum_string(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);

    let mut hash = [0u8; 32];
    let mut hasher = Keccak::v256();
    hasher.update(lower.as_bytes());
    hasher.finalize(&mut hash);

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
