//! # Custodian Attestations
//!
//! A Keel token only goes live once a licensed custodian signs a statement
//! that the backing asset exists, in the exact denomination the backers
//! funded. This module defines that statement's wire form and the check
//! that gates activation.
//!
//! ## Payload format
//!
//! The signed payload is `symbol_bytes || encode_supply(total_supply)`:
//! the token's ticker symbol as raw UTF-8, followed by the total supply as
//! a 32-byte big-endian integer, left-padded with zeros. The custodian
//! signs the SHA-256 digest of that payload.
//!
//! The padding width is fixed so the payload for a given symbol has a fixed
//! length, and the digest can be recomputed from the token's public metadata
//! alone. No nonces, no timestamps: the attestation is valid for exactly one
//! (symbol, supply) pair, forever.
//!
//! ## The recovery-id quirk
//!
//! Attestations arrive as an `(v, r, s)` triple rather than a flat 64-byte
//! signature. Custodian signing appliances emit a recovery id `v` offset by
//! 27, a convention their firmware inherited from older ECDSA tooling. For
//! Ed25519 the recovery bit carries no information, but we still require
//! `v` to be 27 or 28 and reject anything else, because an out-of-range `v`
//! means the appliance produced the triple with different firmware than we
//! qualified against. `r || s` is the Ed25519 signature.

use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::Account;
use crate::config::{AMOUNT_ENCODING_LEN, RECOVERY_ID_OFFSET};
use crate::hash::sha256_multi;
use crate::keys::KeelKeypair;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons an attestation can fail verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CustodyError {
    /// The recovery id was not 27 or 28.
    #[error("malformed recovery id {v}: expected 27 or 28")]
    MalformedRecoveryId {
        /// The recovery id as supplied.
        v: u8,
    },

    /// The custodian account bytes do not decode to a valid Ed25519 point.
    #[error("custodian account is not a valid Ed25519 public key")]
    InvalidCustodianKey,

    /// The signature does not verify against the custodian key and payload.
    #[error("attestation signature does not verify against the custodian key")]
    VerificationFailed,
}

// ---------------------------------------------------------------------------
// Payload encoding
// ---------------------------------------------------------------------------

/// Encodes a total supply as a 32-byte big-endian integer, left-padded
/// with zeros.
///
/// A u128 occupies the low 16 bytes; the high 16 are always zero. The width
/// is fixed at 32 so the encoding survives a future move to wider amounts
/// without changing every previously issued attestation's payload layout.
pub fn encode_supply(total_supply: u128) -> [u8; AMOUNT_ENCODING_LEN] {
    let mut buf = [0u8; AMOUNT_ENCODING_LEN];
    buf[AMOUNT_ENCODING_LEN - 16..].copy_from_slice(&total_supply.to_be_bytes());
    buf
}

/// Builds the raw attestation payload: `symbol_bytes || encode_supply(supply)`.
pub fn attestation_payload(symbol: &str, total_supply: u128) -> Vec<u8> {
    let mut payload = Vec::with_capacity(symbol.len() + AMOUNT_ENCODING_LEN);
    payload.extend_from_slice(symbol.as_bytes());
    payload.extend_from_slice(&encode_supply(total_supply));
    payload
}

/// Computes the SHA-256 digest the custodian signs.
///
/// Equivalent to `sha256(attestation_payload(..))` without the intermediate
/// allocation.
pub fn attestation_digest(symbol: &str, total_supply: u128) -> [u8; 32] {
    sha256_multi(&[symbol.as_bytes(), &encode_supply(total_supply)])
}

// ---------------------------------------------------------------------------
// Attestation
// ---------------------------------------------------------------------------

/// A custodian's signed statement that the backing asset exists.
///
/// Carried as the `(v, r, s)` triple the signing appliances emit. `r || s`
/// is the 64-byte Ed25519 signature over [`attestation_digest`]; `v` is the
/// offset recovery id (see the module docs for the archaeology).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Recovery id, offset by 27. Must be 27 or 28.
    pub v: u8,
    /// First half of the Ed25519 signature, hex-encoded on the wire.
    #[serde(with = "hex_array")]
    pub r: [u8; 32],
    /// Second half of the Ed25519 signature, hex-encoded on the wire.
    #[serde(with = "hex_array")]
    pub s: [u8; 32],
}

impl Attestation {
    /// Signs an attestation for `(symbol, total_supply)` with the given
    /// keypair.
    ///
    /// Sets `v` to 27. Real attestations come from the custodian's signing
    /// appliance; this constructor exists for devnet flows and tests, where
    /// we play custodian ourselves.
    pub fn sign(custodian: &KeelKeypair, symbol: &str, total_supply: u128) -> Self {
        let digest = attestation_digest(symbol, total_supply);
        let sig = custodian.sign(&digest);

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig[..32]);
        s.copy_from_slice(&sig[32..]);

        Self {
            v: RECOVERY_ID_OFFSET,
            r,
            s,
        }
    }

    /// Reassembles the flat 64-byte signature from `r || s`.
    pub fn signature_bytes(&self) -> [u8; 64] {
        let mut sig = [0u8; 64];
        sig[..32].copy_from_slice(&self.r);
        sig[32..].copy_from_slice(&self.s);
        sig
    }
}

/// Verifies an attestation against a named custodian account.
///
/// Checks, in order:
///
/// 1. `v` is 27 or 28 (anything else is a malformed triple),
/// 2. the custodian account decodes to a valid Ed25519 public key,
/// 3. `r || s` verifies over [`attestation_digest`]`(symbol, total_supply)`.
///
/// Verification is read-only: callers decide what a failure means for their
/// own state. Uses `verify_strict`, which additionally rejects signatures
/// involving low-order points.
///
/// # Errors
///
/// Returns [`CustodyError::MalformedRecoveryId`] for an out-of-range `v`,
/// [`CustodyError::InvalidCustodianKey`] for undecodable custodian bytes,
/// and [`CustodyError::VerificationFailed`] for a signature that does not
/// verify.
pub fn verify_activation(
    custodian: &Account,
    symbol: &str,
    total_supply: u128,
    attestation: &Attestation,
) -> Result<(), CustodyError> {
    // Strip the legacy offset. The remaining bit must be 0 or 1; for Ed25519
    // it carries no further information.
    match attestation.v.checked_sub(RECOVERY_ID_OFFSET) {
        Some(0) | Some(1) => {}
        _ => {
            return Err(CustodyError::MalformedRecoveryId { v: attestation.v });
        }
    }

    let verifying_key = VerifyingKey::from_bytes(custodian.as_bytes())
        .map_err(|_| CustodyError::InvalidCustodianKey)?;

    let digest = attestation_digest(symbol, total_supply);
    let signature = Signature::from_bytes(&attestation.signature_bytes());

    verifying_key
        .verify_strict(&digest, &signature)
        .map_err(|_| CustodyError::VerificationFailed)
}

// Hex-string serde for the fixed 32-byte halves. Deriving would serialize
// them as arrays of 32 integers, which nobody wants to read in a JSON body.
mod hex_array {
    use serde::Deserialize;

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected exactly 32 bytes"))
    }
}
