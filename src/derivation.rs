//! BIP-32 hierarchical deterministic key derivation over secp256k1
//!
//! Seed derivation follows BIP-39 (PBKDF2-HMAC-SHA512, 2048 iterations);
//! the key tree follows BIP-32 (HMAC-SHA512 CKDpriv with hardened and
//! non-hardened children). Every derived scalar is range-checked against
//! the curve order before use.

use crate::mnemonic::WalletMnemonic;
use bip39::{Language, Mnemonic};
use hmac::{Hmac, Mac};
use k256::elliptic_curve::{sec1::ToEncodedPoint, PrimeField};
use k256::{ProjectivePoint, Scalar, SecretKey};
use sha2::Sha512;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

type HmacSha512 = Hmac<Sha512>;

pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// BIP-32 invalid-key probability is ~2^-128 per attempt; a handful of
/// fallback indices is already unreachable in practice.
const MAX_CHILD_RETRIES: u32 = 8;

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("Private key scalar out of range [1, n-1]")]
    InvalidPrivateKey,

    #[error("Child derivation failed after {0} fallback indices")]
    DerivationRetryExhausted(u32),
}

/// Public key encoding requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyEncoding {
    /// 33-byte SEC1 compressed point
    #[default]
    Compressed,
    /// 65-byte SEC1 uncompressed point
    Uncompressed,
}

/// A single path segment. The hardened bit is carried in the raw index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildNumber(u32);

impl ChildNumber {
    pub fn normal(index: u32) -> Result<Self, DerivationError> {
        if index >= HARDENED_OFFSET {
            return Err(DerivationError::InvalidPath(format!(
                "index {index} exceeds 2^31 - 1"
            )));
        }
        Ok(Self(index))
    }

    pub fn hardened(index: u32) -> Result<Self, DerivationError> {
        if index >= HARDENED_OFFSET {
            return Err(DerivationError::InvalidPath(format!(
                "index {index} exceeds 2^31 - 1"
            )));
        }
        Ok(Self(index | HARDENED_OFFSET))
    }

    #[inline]
    pub fn is_hardened(self) -> bool {
        self.0 >= HARDENED_OFFSET
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 & !HARDENED_OFFSET
    }

    /// The next sibling index, used as the BIP-32 fallback when a child
    /// scalar is invalid. Stays within the same hardened/normal class.
    fn next(self) -> Option<Self> {
        if self.is_hardened() {
            self.0.checked_add(1).map(Self)
        } else if self.0 + 1 < HARDENED_OFFSET {
            Some(Self(self.0 + 1))
        } else {
            None
        }
    }
}

impl std::fmt::Display for ChildNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_hardened() {
            write!(f, "{}'", self.index())
        } else {
            write!(f, "{}", self.index())
        }
    }
}

/// Parsed derivation path, e.g. `m/44'/60'/0'/0/0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath(Vec<ChildNumber>);

impl DerivationPath {
    pub fn parse(path: &str) -> Result<Self, DerivationError> {
        let mut segments = path.trim().split('/');
        match segments.next() {
            Some("m") | Some("M") => {}
            _ => {
                return Err(DerivationError::InvalidPath(format!(
                    "path {path:?} must start with 'm/'"
                )))
            }
        }

        let mut children = Vec::new();
        for segment in segments {
            if segment.is_empty() {
                return Err(DerivationError::InvalidPath(format!(
                    "empty segment in {path:?}"
                )));
            }
            let (digits, hardened) =
                match segment.strip_suffix('\'').or_else(|| segment.strip_suffix('h')) {
                    Some(digits) => (digits, true),
                    None => (segment, false),
                };
            let index: u32 = digits.parse().map_err(|_| {
                DerivationError::InvalidPath(format!("bad segment {segment:?} in {path:?}"))
            })?;
            children.push(if hardened {
                ChildNumber::hardened(index)?
            } else {
                ChildNumber::normal(index)?
            });
        }
        Ok(Self(children))
    }

    #[inline]
    pub fn segments(&self) -> &[ChildNumber] {
        &self.0
    }
}

impl std::fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m")?;
        for child in &self.0 {
            write!(f, "/{child}")?;
        }
        Ok(())
    }
}

/// Derive the 64-byte BIP-39 seed from a validated mnemonic.
///
/// PBKDF2-HMAC-SHA512, 2048 iterations, salt `"mnemonic" + passphrase`.
pub fn seed_from_mnemonic(mnemonic: &WalletMnemonic, passphrase: &str) -> Zeroizing<[u8; 64]> {
    let parsed = Mnemonic::parse_in(Language::English, mnemonic.phrase())
        .expect("phrase validated on construction");
    Zeroizing::new(parsed.to_seed(passphrase))
}

/// Private key plus chain code at one node of the BIP-32 tree.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ExtendedKey {
    key: [u8; 32],
    chain_code: [u8; 32],
}

impl std::fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedKey")
            .field("key", &"[REDACTED]")
            .field("chain_code", &"[REDACTED]")
            .finish()
    }
}

impl ExtendedKey {
    /// BIP-32 master key: HMAC-SHA512 keyed `"Bitcoin seed"` over the seed.
    pub fn master_from_seed(seed: &[u8]) -> Result<Self, DerivationError> {
        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed")
            .expect("HMAC accepts any key length");
        mac.update(seed);
        let digest = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        let mut chain_code = [0u8; 32];
        key.copy_from_slice(&digest[..32]);
        chain_code.copy_from_slice(&digest[32..]);

        // A master key outside [1, n-1] is unusable; there is no fallback
        // index at the root.
        if parse_scalar(&key).is_none() {
            key.zeroize();
            return Err(DerivationError::InvalidPrivateKey);
        }
        Ok(Self { key, chain_code })
    }

    /// BIP-32 CKDpriv. If the candidate scalar is zero or >= the curve
    /// order, proceeds with the next index per the standard fallback, up
    /// to `MAX_CHILD_RETRIES` attempts.
    pub fn derive_child(&self, child: ChildNumber) -> Result<Self, DerivationError> {
        let parent_scalar = parse_scalar(&self.key).ok_or(DerivationError::InvalidPrivateKey)?;

        let mut current = Some(child);
        for _ in 0..MAX_CHILD_RETRIES {
            let number = match current {
                Some(n) => n,
                None => break,
            };

            let mut mac = HmacSha512::new_from_slice(&self.chain_code)
                .expect("HMAC accepts any key length");
            if number.is_hardened() {
                mac.update(&[0x00]);
                mac.update(&self.key);
            } else {
                let point = (ProjectivePoint::GENERATOR * parent_scalar).to_affine();
                mac.update(point.to_encoded_point(true).as_bytes());
            }
            mac.update(&number.0.to_be_bytes());
            let digest = mac.finalize().into_bytes();

            let mut il = [0u8; 32];
            il.copy_from_slice(&digest[..32]);
            let tweak = parse_scalar(&il);
            il.zeroize();

            if let Some(tweak) = tweak {
                let child_scalar = tweak + parent_scalar;
                if !bool::from(child_scalar.is_zero()) {
                    let mut key = [0u8; 32];
                    key.copy_from_slice(&child_scalar.to_bytes());
                    let mut chain_code = [0u8; 32];
                    chain_code.copy_from_slice(&digest[32..]);
                    return Ok(Self { key, chain_code });
                }
            }
            current = number.next();
        }
        Err(DerivationError::DerivationRetryExhausted(MAX_CHILD_RETRIES))
    }

    /// Derive along a full path from this node.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, DerivationError> {
        let mut node = self.clone();
        for &child in path.segments() {
            node = node.derive_child(child)?;
        }
        Ok(node)
    }

    /// The 32-byte private scalar, zeroed when the wrapper drops.
    pub fn private_key(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.key)
    }

    /// SEC1-encoded public key for this node.
    pub fn public_key(&self, encoding: KeyEncoding) -> Result<Vec<u8>, DerivationError> {
        public_key_from_private(&self.key, encoding)
    }
}

/// Derive the key at `path` from a 64-byte seed.
pub fn derive_path(seed: &[u8], path: &DerivationPath) -> Result<ExtendedKey, DerivationError> {
    ExtendedKey::master_from_seed(seed)?.derive_path(path)
}

/// Scalar-multiply the generator by the private scalar and encode the
/// resulting point. Fails on a scalar outside [1, n-1].
pub fn public_key_from_private(
    key: &[u8],
    encoding: KeyEncoding,
) -> Result<Vec<u8>, DerivationError> {
    let secret = SecretKey::from_slice(key).map_err(|_| DerivationError::InvalidPrivateKey)?;
    let compressed = encoding == KeyEncoding::Compressed;
    Ok(secret
        .public_key()
        .to_encoded_point(compressed)
        .as_bytes()
        .to_vec())
}

/// Parse 32 bytes as a nonzero scalar below the curve order.
fn parse_scalar(bytes: &[u8; 32]) -> Option<Scalar> {
    let repr = k256::FieldBytes::clone_from_slice(bytes);
    let scalar: Option<Scalar> = Scalar::from_repr(repr).into();
    scalar.filter(|s| !bool::from(s.is_zero()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnemonic::{WalletMnemonic, WordCount};

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    // BIP-32 test vector 1
    const VECTOR1_SEED: &str = "000102030405060708090a0b0c0d0e0f";
    const VECTOR1_MASTER_KEY: &str =
        "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35";
    const VECTOR1_MASTER_CHAIN: &str =
        "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508";
    const VECTOR1_M0H_KEY: &str =
        "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea";

    #[test]
    fn test_path_parsing() {
        let path = DerivationPath::parse("m/44'/60'/0'/0/0").unwrap();
        assert_eq!(path.segments().len(), 5);
        assert!(path.segments()[0].is_hardened());
        assert_eq!(path.segments()[0].index(), 44);
        assert!(!path.segments()[4].is_hardened());
        assert_eq!(path.to_string(), "m/44'/60'/0'/0/0");
    }

    #[test]
    fn test_path_parsing_h_suffix() {
        let a = DerivationPath::parse("m/44h/60h/0h/0/0").unwrap();
        let b = DerivationPath::parse("m/44'/60'/0'/0/0").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_paths() {
        for bad in ["", "44'/60'", "m/44x", "m//0", "m/2147483648"] {
            assert!(
                matches!(DerivationPath::parse(bad), Err(DerivationError::InvalidPath(_))),
                "expected InvalidPath for {bad:?}"
            );
        }
    }

    #[test]
    fn test_master_key_vector1() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let master = ExtendedKey::master_from_seed(&seed).unwrap();
        assert_eq!(hex::encode(&*master.private_key()), VECTOR1_MASTER_KEY);
        assert_eq!(hex::encode(master.chain_code), VECTOR1_MASTER_CHAIN);
    }

    #[test]
    fn test_hardened_child_vector1() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let master = ExtendedKey::master_from_seed(&seed).unwrap();
        let child = master.derive_child(ChildNumber::hardened(0).unwrap()).unwrap();
        assert_eq!(hex::encode(&*child.private_key()), VECTOR1_M0H_KEY);
    }

    #[test]
    fn test_seed_from_mnemonic_deterministic() {
        let mnemonic = WalletMnemonic::from_phrase(TEST_MNEMONIC).unwrap();
        let a = seed_from_mnemonic(&mnemonic, "");
        let b = seed_from_mnemonic(&mnemonic, "");
        assert_eq!(&*a, &*b);
        assert_eq!(a.len(), 64);

        let with_pass = seed_from_mnemonic(&mnemonic, "TREZOR");
        assert_ne!(&*a, &*with_pass);
    }

    #[test]
    fn test_derived_scalar_always_in_range() {
        let mnemonic = WalletMnemonic::generate(WordCount::Twelve).unwrap();
        let seed = seed_from_mnemonic(&mnemonic, "");
        let path = DerivationPath::parse("m/44'/60'/0'/0/0").unwrap();
        let key = derive_path(&*seed, &path).unwrap();
        // from_slice rejects zero and >= n
        assert!(SecretKey::from_slice(&*key.private_key()).is_ok());
    }

    #[test]
    fn test_different_paths_different_keys() {
        let mnemonic = WalletMnemonic::from_phrase(TEST_MNEMONIC).unwrap();
        let seed = seed_from_mnemonic(&mnemonic, "");
        let a = derive_path(&*seed, &DerivationPath::parse("m/44'/60'/0'/0/0").unwrap()).unwrap();
        let b = derive_path(&*seed, &DerivationPath::parse("m/44'/60'/0'/0/1").unwrap()).unwrap();
        assert_ne!(&*a.private_key(), &*b.private_key());
    }

    #[test]
    fn test_public_key_encodings_same_point() {
        let mnemonic = WalletMnemonic::from_phrase(TEST_MNEMONIC).unwrap();
        let seed = seed_from_mnemonic(&mnemonic, "");
        let path = DerivationPath::parse("m/44'/60'/0'/0/0").unwrap();
        let key = derive_path(&*seed, &path).unwrap();

        let compressed = key.public_key(KeyEncoding::Compressed).unwrap();
        let uncompressed = key.public_key(KeyEncoding::Uncompressed).unwrap();
        assert_eq!(compressed.len(), 33);
        assert_eq!(uncompressed.len(), 65);

        let a = k256::PublicKey::from_sec1_bytes(&compressed).unwrap();
        let b = k256::PublicKey::from_sec1_bytes(&uncompressed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_public_key_rejects_out_of_range() {
        assert!(matches!(
            public_key_from_private(&[0u8; 32], KeyEncoding::Compressed),
            Err(DerivationError::InvalidPrivateKey)
        ));
        assert!(matches!(
            public_key_from_private(&[0xffu8; 32], KeyEncoding::Compressed),
            Err(DerivationError::InvalidPrivateKey)
        ));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let seed = hex::decode(VECTOR1_SEED).unwrap();
        let master = ExtendedKey::master_from_seed(&seed).unwrap();
        let output = format!("{master:?}");
        assert!(!output.contains(&VECTOR1_MASTER_KEY[..8]));
        assert!(output.contains("REDACTED"));
    }
}
