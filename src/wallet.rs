//! Wallet lifecycle orchestration
//!
//! Two steady states: `NoWallet` (no persisted slot) and `Active` (one
//! encrypted slot). Generation, signing, deletion, and the existence
//! check all serialize through one mutex scoped to the slot, so a delete
//! can never race a sign mid-decrypt. Secret buffers (entropy, mnemonic,
//! seed, private key) live only inside a single operation and are zeroed
//! on every exit path.

use std::sync::Mutex;

use thiserror::Error;
use zeroize::Zeroizing;

use crate::address::{address_from_public_key, AddressError};
use crate::derivation::{
    derive_path, seed_from_mnemonic, DerivationError, DerivationPath, KeyEncoding,
};
use crate::keystore::{
    AuthRequest, BackingType, CancellationToken, KeyStoreError, SecureKeyStore,
};
use crate::mnemonic::{MnemonicError, WalletMnemonic, WordCount};
use crate::signing::{decode_hex, encode_hex, sign_digest, SigningError};

/// BIP-44 Ethereum account 0, external chain, index 0.
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Mnemonic(#[from] MnemonicError),

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("No wallet exists on this device")]
    NoWallet,

    #[error("A wallet already exists; delete it before generating a new one")]
    DuplicateWallet,
}

/// Lifecycle state, a pure function of slot existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletState {
    NoWallet,
    Active,
}

/// Configuration accepted by [`SecureWallet::generate`].
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub word_count: WordCount,
    pub derivation_path: String,
    pub require_biometric: bool,
    pub allow_software_fallback: bool,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            word_count: WordCount::Twelve,
            derivation_path: DEFAULT_DERIVATION_PATH.to_string(),
            require_biometric: true,
            allow_software_fallback: true,
        }
    }
}

/// Read-only answer to "is there a wallet?", safe to surface anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletStatus {
    pub exists: bool,
    pub backing: Option<BackingType>,
    pub public_key: Option<String>,
    pub address: Option<String>,
}

/// Result of a successful generation. The mnemonic is returned exactly
/// once, here; the caller is responsible for displaying it for backup.
pub struct GeneratedWallet {
    pub mnemonic: Zeroizing<String>,
    pub public_key: String,
    pub address: String,
}

impl std::fmt::Debug for GeneratedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedWallet")
            .field("mnemonic", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .field("address", &self.address)
            .finish()
    }
}

/// ECDSA signature components in the shape callers broadcast: hex `r` and
/// `s`, Ethereum-style `v = 27 + recovery_id`, and the signer's public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureResult {
    pub r: String,
    pub s: String,
    pub v: u8,
    pub public_key: String,
}

/// The wallet core: one encrypted slot, four operations.
pub struct SecureWallet {
    store: SecureKeyStore,
    // Serializes every slot-touching operation against the single slot
    op_lock: Mutex<()>,
    key_encoding: KeyEncoding,
    auth_request: AuthRequest,
}

impl SecureWallet {
    pub fn new(store: SecureKeyStore) -> Self {
        Self {
            store,
            op_lock: Mutex::new(()),
            key_encoding: KeyEncoding::Uncompressed,
            auth_request: AuthRequest::default(),
        }
    }

    /// Public-key encoding used for returned keys (default uncompressed).
    pub fn with_key_encoding(mut self, encoding: KeyEncoding) -> Self {
        self.key_encoding = encoding;
        self
    }

    /// Prompt text and timeout for the authentication gate.
    pub fn with_auth_request(mut self, request: AuthRequest) -> Self {
        self.auth_request = request;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WalletState {
        let _guard = self.op_lock.lock().expect("wallet lock poisoned");
        if self.store.exists() {
            WalletState::Active
        } else {
            WalletState::NoWallet
        }
    }

    /// Whether a hardware-isolated key facility backs this wallet.
    pub fn is_hardware_backing_available(&self) -> bool {
        self.store.is_hardware_backing_available()
    }

    /// Existence probe plus cached non-secret metadata. Never prompts,
    /// never decrypts, never changes state.
    pub fn check_existing(&self) -> Result<WalletStatus, WalletError> {
        let _guard = self.op_lock.lock().expect("wallet lock poisoned");
        match self.store.metadata()? {
            Some(metadata) => Ok(WalletStatus {
                exists: true,
                backing: Some(metadata.backing),
                public_key: Some(metadata.public_key),
                address: Some(metadata.address),
            }),
            None => Ok(WalletStatus {
                exists: false,
                backing: None,
                public_key: None,
                address: None,
            }),
        }
    }

    /// Create and persist a new wallet.
    ///
    /// Refuses to overwrite an existing slot: regeneration without an
    /// explicit `delete()` would silently destroy funds if the previous
    /// mnemonic was never backed up.
    ///
    /// All-or-nothing: a storage failure leaves no slot behind and
    /// surfaces unchanged to the caller.
    pub fn generate(&self, config: &GenerateConfig) -> Result<GeneratedWallet, WalletError> {
        let _guard = self.op_lock.lock().expect("wallet lock poisoned");

        if self.store.exists() {
            return Err(WalletError::DuplicateWallet);
        }

        let path = DerivationPath::parse(&config.derivation_path)?;
        let policy = self
            .store
            .create_access_policy(config.require_biometric, config.allow_software_fallback)?;

        let mnemonic = WalletMnemonic::generate(config.word_count)?;
        let seed = seed_from_mnemonic(&mnemonic, "");

        // Deriving here both produces the public key and proves the
        // mnemonic is derivable before anything is persisted.
        let key = derive_path(seed.as_slice(), &path)?;
        let public_key_bytes = key.public_key(self.key_encoding)?;
        let public_key = encode_hex(&public_key_bytes);
        let address = address_from_public_key(&public_key_bytes)?;

        self.store.encrypt_and_store(
            &mnemonic,
            &policy,
            public_key.clone(),
            address.clone(),
            path.to_string(),
        )?;
        log::info!("wallet generated for {address}");

        Ok(GeneratedWallet {
            mnemonic: Zeroizing::new(mnemonic.phrase().to_string()),
            public_key,
            address,
        })
    }

    /// Sign a 32-byte transaction digest supplied as hex.
    ///
    /// The digest is validated before the authentication gate runs, so a
    /// malformed request never costs the user a prompt. The decrypted
    /// mnemonic, seed, and private key are all dropped (and zeroed)
    /// before this returns, on success and on every error path.
    pub fn sign(
        &self,
        digest_hex: &str,
        cancel: &CancellationToken,
    ) -> Result<SignatureResult, WalletError> {
        let _guard = self.op_lock.lock().expect("wallet lock poisoned");

        let digest = decode_hex(digest_hex)?;
        if digest.len() != 32 {
            return Err(SigningError::InvalidDigestLength(digest.len()).into());
        }

        let metadata = self.store.metadata()?.ok_or(WalletError::NoWallet)?;
        let path = DerivationPath::parse(&metadata.derivation_path)?;

        let phrase = match self.store.authenticate_and_decrypt(&self.auth_request, cancel) {
            Ok(phrase) => phrase,
            Err(KeyStoreError::SlotEmpty) => return Err(WalletError::NoWallet),
            Err(e) => {
                log::warn!("signing aborted: {e}");
                return Err(e.into());
            }
        };

        let mnemonic = WalletMnemonic::from_phrase(&phrase)?;
        let seed = seed_from_mnemonic(&mnemonic, "");
        let key = derive_path(seed.as_slice(), &path)?;

        let signature = sign_digest(key.private_key().as_slice(), &digest)?;
        let public_key_bytes = key.public_key(self.key_encoding)?;
        log::debug!("digest signed for {}", metadata.address);

        Ok(SignatureResult {
            r: encode_hex(signature.r()),
            s: encode_hex(signature.s()),
            v: signature.v(),
            public_key: encode_hex(&public_key_bytes),
        })
    }

    /// Remove the wallet slot. Idempotent; always lands in `NoWallet`.
    pub fn delete(&self) -> Result<(), WalletError> {
        let _guard = self.op_lock.lock().expect("wallet lock poisoned");
        self.store.delete()?;
        Ok(())
    }
}
