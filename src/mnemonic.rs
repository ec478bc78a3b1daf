//! BIP-39 entropy and mnemonic handling
//!
//! Generates hardware randomness and encodes it as a recoverable word
//! sequence. Entropy and phrases are secret material: both are wrapped in
//! zeroizing containers and never logged.

use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

#[derive(Debug, Error)]
pub enum MnemonicError {
    #[error("Platform RNG unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Invalid entropy length: {0} bytes (must be 16 or 32)")]
    InvalidEntropyLength(usize),

    #[error("Invalid word count: {0} (must be 12 or 24)")]
    InvalidWordCount(usize),

    #[error("Word at position {0} is not in the BIP-39 wordlist")]
    UnknownWord(usize),

    #[error("Mnemonic checksum does not match")]
    InvalidChecksum,
}

/// Supported mnemonic lengths. 12 words carry 128-bit entropy, 24 words
/// carry 256-bit entropy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCount {
    Twelve = 12,
    TwentyFour = 24,
}

impl WordCount {
    /// Entropy bytes required for this word count.
    #[inline]
    pub const fn entropy_bytes(self) -> usize {
        match self {
            WordCount::Twelve => 16,
            WordCount::TwentyFour => 32,
        }
    }

    pub fn from_words(count: usize) -> Result<Self, MnemonicError> {
        match count {
            12 => Ok(WordCount::Twelve),
            24 => Ok(WordCount::TwentyFour),
            other => Err(MnemonicError::InvalidWordCount(other)),
        }
    }
}

/// Read `n_bytes` from the OS CSPRNG.
///
/// Fails with `EntropyUnavailable` if the platform RNG cannot be read.
/// There is deliberately no fallback to a weaker generator.
pub fn generate_entropy(n_bytes: usize) -> Result<Zeroizing<Vec<u8>>, MnemonicError> {
    if n_bytes != 16 && n_bytes != 32 {
        return Err(MnemonicError::InvalidEntropyLength(n_bytes));
    }

    let mut entropy = Zeroizing::new(vec![0u8; n_bytes]);
    OsRng
        .try_fill_bytes(entropy.as_mut_slice())
        .map_err(|e| MnemonicError::EntropyUnavailable(e.to_string()))?;
    Ok(entropy)
}

/// Encode entropy as a BIP-39 phrase.
///
/// The checksum is the leading `len/32` bits of SHA-256(entropy), appended
/// to the entropy bits before the 11-bit word split. Pure and deterministic.
pub fn entropy_to_mnemonic(entropy: &[u8]) -> Result<WalletMnemonic, MnemonicError> {
    if entropy.len() != 16 && entropy.len() != 32 {
        return Err(MnemonicError::InvalidEntropyLength(entropy.len()));
    }

    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(map_bip39_error)?;

    Ok(WalletMnemonic {
        phrase: mnemonic.to_string(),
        word_count: mnemonic.word_count(),
    })
}

/// Invert the word mapping and validate the embedded checksum.
pub fn mnemonic_to_entropy(phrase: &str) -> Result<Zeroizing<Vec<u8>>, MnemonicError> {
    let mnemonic = parse_phrase(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_entropy()))
}

/// Check whether a single word belongs to the BIP-39 English wordlist.
pub fn is_valid_word(word: &str) -> bool {
    Language::English.find_word(word).is_some()
}

fn parse_phrase(phrase: &str) -> Result<Mnemonic, MnemonicError> {
    let word_count = phrase.split_whitespace().count();
    WordCount::from_words(word_count)?;

    Mnemonic::parse_in(Language::English, phrase).map_err(map_bip39_error)
}

fn map_bip39_error(e: bip39::Error) -> MnemonicError {
    match e {
        bip39::Error::BadWordCount(n) => MnemonicError::InvalidWordCount(n),
        bip39::Error::UnknownWord(index) => MnemonicError::UnknownWord(index),
        bip39::Error::InvalidChecksum => MnemonicError::InvalidChecksum,
        bip39::Error::BadEntropyBitCount(bits) => {
            MnemonicError::InvalidEntropyLength(bits / 8)
        }
        other => MnemonicError::EntropyUnavailable(other.to_string()),
    }
}

/// Owned mnemonic phrase. Zeroed on drop, redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WalletMnemonic {
    phrase: String,
    #[zeroize(skip)]
    word_count: usize,
}

impl std::fmt::Debug for WalletMnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletMnemonic")
            .field("word_count", &self.word_count)
            .field("phrase", &"[REDACTED]")
            .finish()
    }
}

impl WalletMnemonic {
    /// Generate a fresh mnemonic from OS entropy.
    pub fn generate(word_count: WordCount) -> Result<Self, MnemonicError> {
        let entropy = generate_entropy(word_count.entropy_bytes())?;
        entropy_to_mnemonic(&entropy)
    }

    /// Reconstruct from an existing phrase, normalizing whitespace and
    /// validating word count, wordlist membership, and checksum.
    pub fn from_phrase(phrase: &str) -> Result<Self, MnemonicError> {
        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
        let mnemonic = parse_phrase(&normalized)?;
        Ok(Self {
            word_count: mnemonic.word_count(),
            phrase: normalized,
        })
    }

    #[inline]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    #[inline]
    pub fn word_count(&self) -> usize {
        self.word_count
    }

    /// Recover the source entropy (checksum re-validated).
    pub fn to_entropy(&self) -> Result<Zeroizing<Vec<u8>>, MnemonicError> {
        mnemonic_to_entropy(&self.phrase)
    }
}
