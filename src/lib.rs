//! Secure Wallet Core
//!
//! Self-custodial wallet engine built around a single encrypted slot:
//! - BIP-39 mnemonic generation from OS entropy (12 or 24 words)
//! - BIP-32 hardened/normal key derivation over secp256k1
//! - Deterministic RFC 6979 ECDSA signing with recoverable signatures
//! - EIP-55 checksummed Ethereum-style addresses
//! - AES-256-GCM mnemonic storage gated by user authentication
//! - Lifecycle controller serializing generate / check / sign / delete
//!
//! Host integrations (wrapping-key source, authentication prompt, slot
//! persistence) plug in through the traits in [`keystore`].

pub mod address;
pub mod derivation;
pub mod keystore;
pub mod mnemonic;
pub mod signing;
pub mod wallet;

pub use address::{
    address_bytes_from_public_key, address_from_public_key, is_valid_address, to_checksum,
    AddressError,
};
pub use derivation::{
    derive_path, public_key_from_private, seed_from_mnemonic, ChildNumber, DerivationError,
    DerivationPath, ExtendedKey, KeyEncoding, HARDENED_OFFSET,
};
pub use keystore::{
    AccessPolicy, AuthRequest, AuthenticationGate, BackingType, CancellationToken,
    EncryptedMnemonicBlob, FileSlotStore, GateCapability, KeyStoreError, MemorySlotStore,
    MockAuthGate, SecureKeyStore, SlotStore, SoftwareKeyProvider, StaticKeyProvider,
    WalletMetadata, WalletRecord, WrappingKeyProvider,
};
pub use mnemonic::{
    entropy_to_mnemonic, generate_entropy, is_valid_word, mnemonic_to_entropy, MnemonicError,
    WalletMnemonic, WordCount,
};
pub use signing::{
    decode_hex, encode_hex, recover_public_key, sign_digest, RecoverableSignature, SigningError,
};
pub use wallet::{
    GenerateConfig, GeneratedWallet, SecureWallet, SignatureResult, WalletError, WalletState,
    WalletStatus, DEFAULT_DERIVATION_PATH,
};
