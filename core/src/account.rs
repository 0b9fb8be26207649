//! # Account Identities
//!
//! Every participant in Keel is identified by a 32-byte account id, which is
//! exactly the participant's Ed25519 public key. No derived address formats,
//! no checksummed encodings, no base58 bikeshed: the key *is* the identity.
//!
//! Accounts serialize as lowercase hex strings (64 characters). That makes
//! them legal JSON map keys, greppable in logs, and paste-able into curl
//! commands, which covers roughly everything an identifier needs to do.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::ACCOUNT_LENGTH;

/// Errors that can occur while parsing an account identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    /// The decoded byte string was not exactly 32 bytes.
    #[error("invalid account length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The required length (always 32).
        expected: usize,
        /// The length actually supplied.
        got: usize,
    },

    /// The input was not valid hexadecimal.
    #[error("invalid hex in account identifier")]
    InvalidHex,
}

/// A 32-byte account identity.
///
/// This is a plain value type: `Copy`, comparable, hashable, and orderable,
/// so it works as a key in every map and B-tree in the system. Construction
/// does not verify that the bytes are a valid Ed25519 curve point; that
/// check belongs to signature verification, where an invalid key fails
/// loudly instead of being silently unrepresentable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Account([u8; ACCOUNT_LENGTH]);

impl Account {
    /// Creates an account from raw bytes.
    pub fn from_bytes(bytes: [u8; ACCOUNT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Tries to create an account from a byte slice, validating the length.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, AccountError> {
        if slice.len() != ACCOUNT_LENGTH {
            return Err(AccountError::InvalidLength {
                expected: ACCOUNT_LENGTH,
                got: slice.len(),
            });
        }
        let mut bytes = [0u8; ACCOUNT_LENGTH];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_LENGTH] {
        &self.0
    }

    /// Hex-encoded representation. 64 characters for 32 bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex-encoded account string.
    ///
    /// Accepts upper- or lowercase hex. Rejects anything that isn't exactly
    /// 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, AccountError> {
        let bytes = hex::decode(s).map_err(|_| AccountError::InvalidHex)?;
        Self::try_from_slice(&bytes)
    }
}

impl FromStr for Account {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full hex is 64 characters of noise in debug dumps. The first 16
        // are plenty to tell two accounts apart by eye.
        write!(f, "Account({})", &self.to_hex()[..16])
    }
}

// Hex-string serde, by hand. Deriving would serialize the inner array as a
// sequence of 32 integers, which is unreadable in JSON and, worse, illegal
// as a JSON map key. The ledger keys maps by Account, so string form it is.

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Account {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Account::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
