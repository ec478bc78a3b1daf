//! End-to-end lifecycle tests against the public API: generation,
//! existence checks, signing, deletion, and failure atomicity.

use std::sync::Arc;
use std::thread;

use secure_wallet::{
    address_from_public_key, decode_hex, derive_path, encode_hex, seed_from_mnemonic,
    CancellationToken, DerivationPath, FileSlotStore, GenerateConfig, KeyEncoding, KeyStoreError,
    MemorySlotStore, MockAuthGate, SecureKeyStore, SecureWallet, SigningError, SoftwareKeyProvider,
    StaticKeyProvider, WalletError, WalletMnemonic, WalletState,
};

const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const TEST_MNEMONIC_ADDRESS: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";

fn wallet_with(
    gate: Arc<MockAuthGate>,
    slot: Arc<MemorySlotStore>,
) -> SecureWallet {
    SecureWallet::new(SecureKeyStore::new(
        Box::new(StaticKeyProvider::hardware([7u8; 32])),
        Box::new(gate),
        Box::new(slot),
    ))
}

fn test_wallet() -> SecureWallet {
    wallet_with(Arc::new(MockAuthGate::approve()), Arc::new(MemorySlotStore::new()))
}

#[test]
fn generate_check_delete_cycle() {
    let wallet = test_wallet();
    assert!(!wallet.check_existing().unwrap().exists);

    let generated = wallet.generate(&GenerateConfig::default()).unwrap();
    let status = wallet.check_existing().unwrap();
    assert!(status.exists);
    assert_eq!(status.address.as_deref(), Some(generated.address.as_str()));
    assert_eq!(status.public_key.as_deref(), Some(generated.public_key.as_str()));

    wallet.delete().unwrap();
    let status = wallet.check_existing().unwrap();
    assert!(!status.exists);
    assert_eq!(status.address, None);
}

#[test]
fn generate_is_all_or_nothing_on_storage_failure() {
    let gate = Arc::new(MockAuthGate::approve());
    let slot = Arc::new(MemorySlotStore::new());
    let wallet = wallet_with(gate, slot.clone());

    slot.set_fail_writes(true);
    let result = wallet.generate(&GenerateConfig::default());
    assert!(matches!(
        result,
        Err(WalletError::KeyStore(KeyStoreError::StorageWriteFailed(_)))
    ));
    assert!(!wallet.check_existing().unwrap().exists);
    assert_eq!(wallet.state(), WalletState::NoWallet);

    // Recovers once storage is healthy again
    slot.set_fail_writes(false);
    wallet.generate(&GenerateConfig::default()).unwrap();
    assert_eq!(wallet.state(), WalletState::Active);
}

#[test]
fn second_generate_requires_explicit_delete() {
    let wallet = test_wallet();
    let first = wallet.generate(&GenerateConfig::default()).unwrap();

    assert!(matches!(
        wallet.generate(&GenerateConfig::default()),
        Err(WalletError::DuplicateWallet)
    ));
    // The original wallet is untouched by the refused attempt
    let status = wallet.check_existing().unwrap();
    assert_eq!(status.address.as_deref(), Some(first.address.as_str()));

    wallet.delete().unwrap();
    let second = wallet.generate(&GenerateConfig::default()).unwrap();
    assert_ne!(second.address, first.address);
}

#[test]
fn malformed_digest_fails_before_any_prompt() {
    let gate = Arc::new(MockAuthGate::approve());
    let wallet = wallet_with(gate.clone(), Arc::new(MemorySlotStore::new()));
    wallet.generate(&GenerateConfig::default()).unwrap();

    let cancel = CancellationToken::new();
    let short = encode_hex(&[0u8; 31]);
    assert!(matches!(
        wallet.sign(&short, &cancel),
        Err(WalletError::Signing(SigningError::InvalidDigestLength(31)))
    ));
    assert!(matches!(
        wallet.sign("0xnot-hex", &cancel),
        Err(WalletError::Signing(SigningError::MalformedHex(_)))
    ));
    assert_eq!(gate.prompt_count(), 0);
}

#[test]
fn signing_matches_the_stored_public_key() {
    let wallet = test_wallet();
    let generated = wallet.generate(&GenerateConfig::default()).unwrap();

    let digest = [0xabu8; 32];
    let result = wallet.sign(&encode_hex(&digest), &CancellationToken::new()).unwrap();
    assert_eq!(result.public_key, generated.public_key);

    // Signatures are deterministic per (key, digest)
    let again = wallet.sign(&encode_hex(&digest), &CancellationToken::new()).unwrap();
    assert_eq!(result, again);

    // r and s are 32-byte hex words, v is the Ethereum recovery value
    assert_eq!(decode_hex(&result.r).unwrap().len(), 32);
    assert_eq!(decode_hex(&result.s).unwrap().len(), 32);
    assert!(result.v == 27 || result.v == 28);
}

#[test]
fn sign_without_wallet_is_rejected() {
    let wallet = test_wallet();
    let digest_hex = encode_hex(&[1u8; 32]);
    assert!(matches!(
        wallet.sign(&digest_hex, &CancellationToken::new()),
        Err(WalletError::NoWallet)
    ));
}

#[test]
fn denied_authentication_leaves_wallet_intact() {
    let gate = Arc::new(MockAuthGate::deny());
    let slot = Arc::new(MemorySlotStore::new());
    let wallet = wallet_with(gate.clone(), slot);
    wallet.generate(&GenerateConfig::default()).unwrap();

    let digest_hex = encode_hex(&[2u8; 32]);
    assert!(matches!(
        wallet.sign(&digest_hex, &CancellationToken::new()),
        Err(WalletError::KeyStore(KeyStoreError::AuthenticationFailed))
    ));
    assert_eq!(gate.prompt_count(), 1);
    assert_eq!(wallet.state(), WalletState::Active);
}

#[test]
fn cancelled_signing_surfaces_as_authentication_failure() {
    let wallet = test_wallet();
    wallet.generate(&GenerateConfig::default()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let digest_hex = encode_hex(&[3u8; 32]);
    assert!(matches!(
        wallet.sign(&digest_hex, &cancel),
        Err(WalletError::KeyStore(KeyStoreError::AuthenticationFailed))
    ));
}

#[test]
fn known_mnemonic_derives_known_address() {
    let mnemonic = WalletMnemonic::from_phrase(TEST_MNEMONIC).unwrap();
    assert_eq!(mnemonic.word_count(), 12);

    let seed = seed_from_mnemonic(&mnemonic, "");
    let path = DerivationPath::parse("m/44'/60'/0'/0/0").unwrap();
    let key = derive_path(seed.as_slice(), &path).unwrap();

    let public_key = key.public_key(KeyEncoding::Uncompressed).unwrap();
    assert_eq!(address_from_public_key(&public_key).unwrap(), TEST_MNEMONIC_ADDRESS);
}

#[test]
fn concurrent_generate_and_delete_settle_cleanly() {
    let wallet = Arc::new(test_wallet());

    let mut handles = Vec::new();
    for i in 0..8 {
        let wallet = Arc::clone(&wallet);
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                if i % 2 == 0 {
                    // DuplicateWallet losses are expected under contention
                    let _ = wallet.generate(&GenerateConfig::default());
                } else {
                    wallet.delete().unwrap();
                }
                let status = wallet.check_existing().unwrap();
                // Metadata is never half-written
                assert_eq!(status.exists, status.address.is_some());
                assert_eq!(status.exists, status.public_key.is_some());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let status = wallet.check_existing().unwrap();
    assert_eq!(status.exists, status.address.is_some());
}

#[test]
fn file_backed_wallet_survives_controller_restart() {
    let dir = tempfile::tempdir().unwrap();
    let slot_path = dir.path().join("wallet.json");
    let key_path = dir.path().join("device.key");

    let build = || {
        SecureWallet::new(SecureKeyStore::new(
            Box::new(SoftwareKeyProvider::new(&key_path)),
            Box::new(MockAuthGate::approve()),
            Box::new(FileSlotStore::new(&slot_path)),
        ))
    };

    let generated = build().generate(&GenerateConfig::default()).unwrap();

    // A fresh controller over the same files sees and can use the wallet
    let reopened = build();
    let status = reopened.check_existing().unwrap();
    assert!(status.exists);
    assert_eq!(status.address.as_deref(), Some(generated.address.as_str()));

    let digest_hex = encode_hex(&[9u8; 32]);
    let signature = reopened.sign(&digest_hex, &CancellationToken::new()).unwrap();
    assert_eq!(signature.public_key, generated.public_key);
}
