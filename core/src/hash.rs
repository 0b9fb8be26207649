//! # Hashing Utilities
//!
//! Two hash functions, two jobs, and we refuse to support more without a
//! very good reason:
//!
//! - **SHA-256**, for attestation digests. The custodian signing appliances
//!   on the other end of those attestations support SHA-256 and nothing
//!   newer, and an attestation they can't produce is worthless.
//!
//! - **BLAKE3**, for internal identifiers (token ids). Faster than SHA-256
//!   on every platform that matters, and nothing outside this codebase ever
//!   has to recompute these, so compatibility is a non-issue.

use sha2::{Digest, Sha256};

/// Computes the SHA-256 hash of the input data.
///
/// Returns a fixed 32-byte digest. Used for attestation digests, where the
/// array type propagates naturally into signing and verification.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hashes multiple byte slices together without concatenation overhead.
///
/// Instead of allocating a buffer to concatenate inputs, we feed them
/// sequentially into the hasher. Same result, less allocation. Used for
/// composite payloads like `(symbol || encoded_supply)`.
pub fn sha256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Computes the BLAKE3 hash of the input data.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Computes a domain-separated BLAKE3 hash over multiple byte slices.
///
/// Domain separation prevents collisions across protocol contexts: the same
/// input bytes hashed under different context strings can never produce the
/// same digest. This uses BLAKE3's built-in `derive_key` mode, which is the
/// proper way to do it. Don't try to prepend a tag manually; that's what
/// amateurs do.
pub fn domain_separated_multi(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256 of empty string, the canonical test vector everyone should
        // have memorized by now.
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn sha256_deterministic() {
        assert_eq!(sha256(b"keel"), sha256(b"keel"));
    }

    #[test]
    fn test_sha256_multi_matches_concat() {
        // Feeding parts via update() must equal hashing the concatenation.
        let multi = sha256_multi(&[b"hello", b" world"]);
        let single = sha256(b"hello world");
        assert_eq!(multi, single);
    }

    #[test]
    fn blake3_deterministic() {
        assert_eq!(blake3_hash(b"keel"), blake3_hash(b"keel"));
    }

    #[test]
    fn test_blake3_differs_from_sha256() {
        assert_ne!(blake3_hash(b"keel"), sha256(b"keel"));
    }

    #[test]
    fn test_domain_separation() {
        // Same data, different contexts = different hashes.
        // This is the whole point of domain separation.
        let a = domain_separated_multi("context-a", &[b"same data"]);
        let b = domain_separated_multi("context-b", &[b"same data"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_domain_separated_is_not_plain_blake3() {
        let plain = blake3_hash(b"test data");
        let separated = domain_separated_multi("keel-test", &[b"test data"]);
        assert_ne!(plain, separated);
    }
}
