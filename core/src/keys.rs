//! # Key Management
//!
//! Ed25519 keypair generation and handling for Keel identities.
//!
//! Brokers, custodians, and backers are all just keypairs to this system.
//! The public half doubles as the [`Account`] identifier; the private half
//! signs attestations and (at the hosting layer) authenticates API calls.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (thanks, ed25519-dalek).
//! - We use OS-level RNG (`OsRng`) for key generation. If your OS RNG is
//!   broken, you have bigger problems than Keel.
//! - Key bytes are never logged. If you add logging to this module, you
//!   will be asked to leave.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;

use crate::account::Account;
use crate::config::SIGNATURE_LENGTH;

/// Errors that can occur during key operations.
///
/// Intentionally vague about *why* something failed; leaking details about
/// key material through error messages is a classic footgun.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or malformed encoding")]
    InvalidSecretKey,
}

/// A Keel identity keypair wrapping an Ed25519 signing key.
///
/// The signing key is the crown jewel: everything an account can do, the
/// holder of this key can do. Guard it accordingly.
///
/// ## Serialization
///
/// `KeelKeypair` intentionally does NOT implement `Serialize`/`Deserialize`.
/// Serializing private keys should be a deliberate, conscious act, not
/// something that happens because someone shoved a keypair into a JSON
/// response. Use [`seed_bytes`](Self::seed_bytes) explicitly.
pub struct KeelKeypair {
    signing_key: SigningKey,
}

impl KeelKeypair {
    /// Generates a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Constructs a keypair deterministically from a 32-byte seed.
    ///
    /// **Warning**: if you call this with a weak seed, you get a weak key.
    /// Use a proper CSPRNG or KDF to produce the seed bytes.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Reconstructs a keypair from a hex-encoded seed.
    ///
    /// Convenience for loading operator keys from key files. Please don't
    /// put raw hex keys in config files in production. But for devnet,
    /// we're not going to pretend you won't do it anyway.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(KeyError::InvalidSecretKey);
        }
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        seed.copy_from_slice(&bytes);
        Ok(Self::from_seed(&seed))
    }

    /// Returns the account identity derived from this keypair.
    ///
    /// The account is the Ed25519 public key, nothing more. Safe to share,
    /// log, tattoo on your arm, etc.
    pub fn account(&self) -> Account {
        Account::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    /// Signs a message, returning the raw 64-byte signature.
    ///
    /// Ed25519 signatures are deterministic: the same (key, message) pair
    /// always produces the same signature. No nonce management, no sleepless
    /// nights wondering if your RNG was seeded properly during signing.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verifies a raw signature against this keypair's public key.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_LENGTH]) -> bool {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        self.signing_key
            .verifying_key()
            .verify_strict(message, &sig)
            .is_ok()
    }

    /// Returns the underlying `VerifyingKey`.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Exports the raw 32-byte seed.
    ///
    /// **Handle with extreme care.** This is the only secret that stands
    /// between an attacker and full control of the associated account.
    /// Don't log it. Don't send it over the network in plaintext.
    pub fn seed_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }
}

impl Clone for KeelKeypair {
    /// Cloning a keypair is allowed but should make you uncomfortable.
    /// Every copy of a private key is another thing to protect.
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for KeelKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret key material in debug output. Not even "partially."
        write!(f, "KeelKeypair(account={})", self.account())
    }
}

impl PartialEq for KeelKeypair {
    /// Two keypairs are equal if their public halves match. Comparing secret
    /// material in a non-constant-time way is a bad habit, and for identity
    /// purposes the public key is what matters.
    fn eq(&self, other: &Self) -> bool {
        self.account() == other.account()
    }
}

impl Eq for KeelKeypair {}
