// Copyright (c) 2026 Keelworks Systems. MIT License.
// See LICENSE for details.

//! # Keel Core Primitives
//!
//! The foundation of Keel: a system for crowdfunded, custodian-attested asset
//! tokens. A broker lists an asset, backers fund it, a licensed custodian
//! attests in writing that the asset actually exists, and only then does the
//! token go live. Everything else is bookkeeping, and bookkeeping is what
//! computers are for.
//!
//! Keel takes a pragmatic stance: Ed25519 for attestations (because we're not
//! barbarians), SHA-256 for attestation payloads (because the custodian banks
//! we integrate with have all heard of it), and BLAKE3 for internal
//! identifiers (because it's fast and nothing external needs to recompute
//! them).
//!
//! ## Architecture
//!
//! This crate holds the primitives everything above it is built on:
//!
//! - **account**: 32-byte account identities and their hex encoding.
//! - **config**: Protocol constants and unit conversions.
//! - **custody**: Custodian attestations (payload encoding, digests,
//!   verification).
//! - **hash**: Hash utilities. Don't roll your own.
//! - **keys**: Ed25519 keypair management. Guard the private half.
//! - **treasury**: Value accounting, who holds what and the one primitive
//!   that moves it.
//!
//! ## Design Philosophy
//!
//! 1. Correctness over performance (but we're still fast).
//! 2. Checked arithmetic everywhere value moves. Overflow is an error, not
//!    a surprise.
//! 3. Every public API is documented. Internal shame is documented too.
//! 4. If it touches money, it has tests. Plural.

pub mod account;
pub mod config;
pub mod custody;
pub mod hash;
pub mod keys;
pub mod treasury;
