//! Encrypted mnemonic storage behind an authentication gate
//!
//! The recovery phrase is wrapped in an AES-256-GCM envelope whose key
//! comes from an injected [`WrappingKeyProvider`] (hardware-isolated where
//! the device has one, a software keystore otherwise). The persisted slot
//! is reached through a [`SlotStore`] handle and decryption is guarded by
//! an [`AuthenticationGate`], so the whole store runs against test doubles
//! without real hardware.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::mnemonic::WalletMnemonic;

/// Persisted slot layout version. Bumped on incompatible changes.
pub const SCHEMA_VERSION: u32 = 1;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Unsupported access policy: {0}")]
    UnsupportedPolicy(String),

    #[error("Failed to write wallet slot: {0}")]
    StorageWriteFailed(String),

    #[error("Failed to read wallet slot: {0}")]
    StorageReadFailed(String),

    #[error("Authentication failed or was cancelled")]
    AuthenticationFailed,

    #[error("Authentication gate timed out")]
    TimedOut,

    #[error("Stored blob failed integrity check")]
    CorruptedBlob,

    #[error("No wallet slot exists")]
    SlotEmpty,
}

/// Where the wrapping key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackingType {
    /// Key material confined to a hardware-isolated facility
    Hardware,
    /// Platform-keystore-protected key, best effort
    Software,
}

impl std::fmt::Display for BackingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackingType::Hardware => write!(f, "hardware"),
            BackingType::Software => write!(f, "software"),
        }
    }
}

/// Access-control descriptor persisted alongside the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub require_biometric: bool,
    pub allow_software_fallback: bool,
}

/// AEAD envelope for the recovery phrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMnemonicBlob {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
    pub policy: AccessPolicy,
    pub backing: BackingType,
    pub schema_version: u32,
}

/// The single persisted wallet slot: the encrypted blob plus non-secret
/// caches used to answer existence checks without authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub blob: EncryptedMnemonicBlob,
    pub public_key: String,
    pub address: String,
    pub derivation_path: String,
}

/// Non-secret view of the stored slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletMetadata {
    pub backing: BackingType,
    pub public_key: String,
    pub address: String,
    pub derivation_path: String,
}

// ── Cancellation ─────────────────────────────────────────────────────

/// Shared flag for aborting a pending authentication prompt.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ── Authentication gate ──────────────────────────────────────────────

/// Prompt configuration for the platform authentication gate.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Title shown in the authentication prompt
    pub title: String,
    /// Reason displayed to the user
    pub reason: String,
    /// Upper bound on how long the gate may block
    pub timeout: Duration,
}

impl Default for AuthRequest {
    fn default() -> Self {
        Self {
            title: "Authenticate".to_string(),
            reason: "Unlock your wallet".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Gate capability information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateCapability {
    /// Whether a user-presence check can be performed at all
    pub available: bool,
    /// Whether a biometric credential is enrolled
    pub enrolled: bool,
}

/// Platform-mediated user-presence check guarding decryption.
///
/// Implementations block until the user responds, the request times out,
/// or the token is cancelled. They must never block indefinitely.
pub trait AuthenticationGate: Send + Sync {
    fn capability(&self) -> GateCapability;

    /// Run the gate. User decline/dismissal maps to
    /// [`KeyStoreError::AuthenticationFailed`], expiry of
    /// `request.timeout` to [`KeyStoreError::TimedOut`].
    fn authenticate(
        &self,
        request: &AuthRequest,
        cancel: &CancellationToken,
    ) -> Result<(), KeyStoreError>;
}

impl<T: AuthenticationGate + ?Sized> AuthenticationGate for Arc<T> {
    fn capability(&self) -> GateCapability {
        (**self).capability()
    }

    fn authenticate(
        &self,
        request: &AuthRequest,
        cancel: &CancellationToken,
    ) -> Result<(), KeyStoreError> {
        (**self).authenticate(request, cancel)
    }
}

/// Scriptable gate for tests and platforms without a real prompt.
pub struct MockAuthGate {
    outcome: MockAuthOutcome,
    available: bool,
    prompts: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockAuthOutcome {
    Approve,
    Deny,
    TimeOut,
}

impl MockAuthGate {
    pub fn approve() -> Self {
        Self::with_outcome(MockAuthOutcome::Approve)
    }

    pub fn deny() -> Self {
        Self::with_outcome(MockAuthOutcome::Deny)
    }

    pub fn timed_out() -> Self {
        Self::with_outcome(MockAuthOutcome::TimeOut)
    }

    /// Gate whose capability probe reports no biometric hardware.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::with_outcome(MockAuthOutcome::Deny)
        }
    }

    fn with_outcome(outcome: MockAuthOutcome) -> Self {
        Self {
            outcome,
            available: true,
            prompts: AtomicUsize::new(0),
        }
    }

    /// How many times the prompt has been shown.
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl AuthenticationGate for MockAuthGate {
    fn capability(&self) -> GateCapability {
        GateCapability {
            available: self.available,
            enrolled: self.available,
        }
    }

    fn authenticate(
        &self,
        _request: &AuthRequest,
        cancel: &CancellationToken,
    ) -> Result<(), KeyStoreError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(KeyStoreError::AuthenticationFailed);
        }
        match self.outcome {
            MockAuthOutcome::Approve => Ok(()),
            MockAuthOutcome::Deny => Err(KeyStoreError::AuthenticationFailed),
            MockAuthOutcome::TimeOut => Err(KeyStoreError::TimedOut),
        }
    }
}

// ── Wrapping key provider ────────────────────────────────────────────

/// Source of the AEAD wrapping key, injected by the host.
///
/// Hardware implementations must never expose extractable key material;
/// this trait only hands the core a usable symmetric key.
pub trait WrappingKeyProvider: Send + Sync {
    fn backing_type(&self) -> BackingType;

    /// Capability probe; pure, no mutation.
    fn is_available(&self) -> bool;

    /// Obtain the wrapping key for the given policy. Only called after
    /// the policy's authentication gate has succeeded (or for encryption
    /// at generation time).
    fn wrapping_key(&self, policy: &AccessPolicy) -> Result<Zeroizing<[u8; 32]>, KeyStoreError>;
}

impl<T: WrappingKeyProvider + ?Sized> WrappingKeyProvider for Arc<T> {
    fn backing_type(&self) -> BackingType {
        (**self).backing_type()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn wrapping_key(&self, policy: &AccessPolicy) -> Result<Zeroizing<[u8; 32]>, KeyStoreError> {
        (**self).wrapping_key(policy)
    }
}

/// Software fallback: a device key held in a platform-protected file.
///
/// Created on first use from OS randomness. Blobs wrapped by this
/// provider are marked `backing = software`.
pub struct SoftwareKeyProvider {
    key_path: PathBuf,
}

impl SoftwareKeyProvider {
    pub fn new<P: AsRef<Path>>(key_path: P) -> Self {
        Self {
            key_path: key_path.as_ref().to_path_buf(),
        }
    }

    fn load_or_create_key(&self) -> Result<Zeroizing<[u8; 32]>, KeyStoreError> {
        if self.key_path.exists() {
            let encoded = fs::read_to_string(&self.key_path)
                .map_err(|e| KeyStoreError::StorageReadFailed(e.to_string()))?;
            let bytes = hex::decode(encoded.trim())
                .map_err(|_| KeyStoreError::CorruptedBlob)?;
            if bytes.len() != 32 {
                return Err(KeyStoreError::CorruptedBlob);
            }
            let mut key = Zeroizing::new([0u8; 32]);
            key.copy_from_slice(&bytes);
            return Ok(key);
        }

        let mut key = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(key.as_mut_slice())
            .map_err(|e| KeyStoreError::StorageWriteFailed(e.to_string()))?;
        fs::write(&self.key_path, hex::encode(key.as_slice()))
            .map_err(|e| KeyStoreError::StorageWriteFailed(e.to_string()))?;
        log::info!("created software device key at {:?}", self.key_path);
        Ok(key)
    }
}

impl WrappingKeyProvider for SoftwareKeyProvider {
    fn backing_type(&self) -> BackingType {
        BackingType::Software
    }

    fn is_available(&self) -> bool {
        true
    }

    fn wrapping_key(&self, _policy: &AccessPolicy) -> Result<Zeroizing<[u8; 32]>, KeyStoreError> {
        self.load_or_create_key()
    }
}

/// In-memory provider for tests and for hosts that inject hardware-held
/// keys themselves.
pub struct StaticKeyProvider {
    backing: BackingType,
    available: bool,
    key: Zeroizing<[u8; 32]>,
}

impl StaticKeyProvider {
    pub fn hardware(key: [u8; 32]) -> Self {
        Self {
            backing: BackingType::Hardware,
            available: true,
            key: Zeroizing::new(key),
        }
    }

    pub fn software(key: [u8; 32]) -> Self {
        Self {
            backing: BackingType::Software,
            available: true,
            key: Zeroizing::new(key),
        }
    }

    /// Hardware provider whose capability probe fails, for exercising
    /// policy rejection paths.
    pub fn unavailable() -> Self {
        Self {
            backing: BackingType::Hardware,
            available: false,
            key: Zeroizing::new([0u8; 32]),
        }
    }
}

impl WrappingKeyProvider for StaticKeyProvider {
    fn backing_type(&self) -> BackingType {
        self.backing
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn wrapping_key(&self, _policy: &AccessPolicy) -> Result<Zeroizing<[u8; 32]>, KeyStoreError> {
        if !self.available {
            return Err(KeyStoreError::UnsupportedPolicy(
                "key backing unavailable".to_string(),
            ));
        }
        Ok(self.key.clone())
    }
}

// ── Slot store ───────────────────────────────────────────────────────

/// Handle to the single persisted wallet slot.
pub trait SlotStore: Send + Sync {
    /// O(1) existence probe; never authenticates or decrypts.
    fn exists(&self) -> bool;

    fn read(&self) -> Result<Option<WalletRecord>, KeyStoreError>;

    /// Atomically replace the slot. On failure the previous contents, if
    /// any, must remain intact.
    fn replace(&self, record: &WalletRecord) -> Result<(), KeyStoreError>;

    /// Remove the slot. Idempotent.
    fn delete(&self) -> Result<(), KeyStoreError>;
}

impl<T: SlotStore + ?Sized> SlotStore for Arc<T> {
    fn exists(&self) -> bool {
        (**self).exists()
    }

    fn read(&self) -> Result<Option<WalletRecord>, KeyStoreError> {
        (**self).read()
    }

    fn replace(&self, record: &WalletRecord) -> Result<(), KeyStoreError> {
        (**self).replace(record)
    }

    fn delete(&self) -> Result<(), KeyStoreError> {
        (**self).delete()
    }
}

/// File-backed slot: JSON record, replaced via temp file + rename so a
/// failed write never clobbers the existing slot.
pub struct FileSlotStore {
    path: PathBuf,
}

impl FileSlotStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SlotStore for FileSlotStore {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read(&self) -> Result<Option<WalletRecord>, KeyStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)
            .map_err(|e| KeyStoreError::StorageReadFailed(e.to_string()))?;
        let record = serde_json::from_str(&data).map_err(|_| KeyStoreError::CorruptedBlob)?;
        Ok(Some(record))
    }

    fn replace(&self, record: &WalletRecord) -> Result<(), KeyStoreError> {
        let serialized = serde_json::to_string_pretty(record)
            .map_err(|e| KeyStoreError::StorageWriteFailed(e.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serialized)
            .map_err(|e| KeyStoreError::StorageWriteFailed(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            KeyStoreError::StorageWriteFailed(e.to_string())
        })?;
        Ok(())
    }

    fn delete(&self) -> Result<(), KeyStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeyStoreError::StorageWriteFailed(e.to_string())),
        }
    }
}

/// In-memory slot with write-failure injection for atomicity tests.
#[derive(Default)]
pub struct MemorySlotStore {
    slot: Mutex<Option<WalletRecord>>,
    fail_writes: AtomicBool,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl SlotStore for MemorySlotStore {
    fn exists(&self) -> bool {
        self.slot.lock().expect("slot lock poisoned").is_some()
    }

    fn read(&self) -> Result<Option<WalletRecord>, KeyStoreError> {
        Ok(self.slot.lock().expect("slot lock poisoned").clone())
    }

    fn replace(&self, record: &WalletRecord) -> Result<(), KeyStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KeyStoreError::StorageWriteFailed(
                "injected write failure".to_string(),
            ));
        }
        *self.slot.lock().expect("slot lock poisoned") = Some(record.clone());
        Ok(())
    }

    fn delete(&self) -> Result<(), KeyStoreError> {
        *self.slot.lock().expect("slot lock poisoned") = None;
        Ok(())
    }
}

// ── Secure key store ─────────────────────────────────────────────────

/// Encrypted single-slot store for the wallet's recovery phrase.
pub struct SecureKeyStore {
    provider: Box<dyn WrappingKeyProvider>,
    gate: Box<dyn AuthenticationGate>,
    slot: Box<dyn SlotStore>,
}

impl SecureKeyStore {
    pub fn new(
        provider: Box<dyn WrappingKeyProvider>,
        gate: Box<dyn AuthenticationGate>,
        slot: Box<dyn SlotStore>,
    ) -> Self {
        Self {
            provider,
            gate,
            slot,
        }
    }

    /// Whether a hardware-isolated key facility backs this store.
    pub fn is_hardware_backing_available(&self) -> bool {
        self.provider.backing_type() == BackingType::Hardware && self.provider.is_available()
    }

    /// Build an access-control descriptor, rejecting combinations this
    /// device cannot honor. A hardware failure never silently downgrades
    /// to software backing.
    pub fn create_access_policy(
        &self,
        require_biometric: bool,
        allow_software_fallback: bool,
    ) -> Result<AccessPolicy, KeyStoreError> {
        if require_biometric && !self.gate.capability().available && !allow_software_fallback {
            return Err(KeyStoreError::UnsupportedPolicy(
                "biometric required but no authentication gate is available".to_string(),
            ));
        }
        if !self.provider.is_available() {
            return Err(KeyStoreError::UnsupportedPolicy(
                "key backing unavailable".to_string(),
            ));
        }
        if self.provider.backing_type() == BackingType::Software && !allow_software_fallback {
            return Err(KeyStoreError::UnsupportedPolicy(
                "hardware backing unavailable and software fallback disallowed".to_string(),
            ));
        }
        Ok(AccessPolicy {
            require_biometric,
            allow_software_fallback,
        })
    }

    /// Encrypt the mnemonic under a fresh nonce and atomically persist it
    /// as the wallet slot, together with its non-secret caches.
    pub fn encrypt_and_store(
        &self,
        mnemonic: &WalletMnemonic,
        policy: &AccessPolicy,
        public_key: String,
        address: String,
        derivation_path: String,
    ) -> Result<(), KeyStoreError> {
        let key = self.provider.wrapping_key(policy)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .expect("AES-256-GCM accepts 32-byte keys");

        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| KeyStoreError::StorageWriteFailed(e.to_string()))?;

        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), mnemonic.phrase().as_bytes())
            .map_err(|_| KeyStoreError::StorageWriteFailed("encryption failed".to_string()))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        let record = WalletRecord {
            blob: EncryptedMnemonicBlob {
                ciphertext: sealed,
                nonce: nonce.to_vec(),
                tag,
                policy: *policy,
                backing: self.provider.backing_type(),
                schema_version: SCHEMA_VERSION,
            },
            public_key,
            address,
            derivation_path,
        };

        self.slot.replace(&record)?;
        log::info!(
            "wallet slot stored (backing={}, biometric={})",
            record.blob.backing,
            policy.require_biometric
        );
        Ok(())
    }

    /// O(1) existence probe; never prompts or decrypts.
    pub fn exists(&self) -> bool {
        self.slot.exists()
    }

    /// Non-secret metadata of the stored slot, if any. No authentication.
    pub fn metadata(&self) -> Result<Option<WalletMetadata>, KeyStoreError> {
        Ok(self.slot.read()?.map(|record| WalletMetadata {
            backing: record.blob.backing,
            public_key: record.public_key,
            address: record.address,
            derivation_path: record.derivation_path,
        }))
    }

    /// Run the stored policy's authentication gate, then decrypt the
    /// mnemonic. A gate failure leaves the blob untouched; a tag mismatch
    /// reports `CorruptedBlob`, distinct from authentication failure.
    pub fn authenticate_and_decrypt(
        &self,
        request: &AuthRequest,
        cancel: &CancellationToken,
    ) -> Result<Zeroizing<String>, KeyStoreError> {
        let record = self.slot.read()?.ok_or(KeyStoreError::SlotEmpty)?;
        if record.blob.schema_version != SCHEMA_VERSION {
            return Err(KeyStoreError::CorruptedBlob);
        }

        if record.blob.policy.require_biometric {
            self.gate.authenticate(request, cancel)?;
        }

        let key = self.provider.wrapping_key(&record.blob.policy)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .expect("AES-256-GCM accepts 32-byte keys");

        if record.blob.nonce.len() != NONCE_LEN || record.blob.tag.len() != TAG_LEN {
            return Err(KeyStoreError::CorruptedBlob);
        }
        let mut sealed = record.blob.ciphertext.clone();
        sealed.extend_from_slice(&record.blob.tag);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&record.blob.nonce), sealed.as_slice())
            .map_err(|_| KeyStoreError::CorruptedBlob)?;
        let phrase = String::from_utf8(plaintext).map_err(|_| KeyStoreError::CorruptedBlob)?;
        Ok(Zeroizing::new(phrase))
    }

    /// Remove the persisted slot. Idempotent: succeeds silently when no
    /// slot exists.
    pub fn delete(&self) -> Result<(), KeyStoreError> {
        self.slot.delete()?;
        log::info!("wallet slot deleted");
        Ok(())
    }
}
