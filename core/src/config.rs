//! # Protocol Configuration & Constants
//!
//! Every magic number in Keel lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! These values define the shape of every token the system will ever host.
//! Changing the unit constants after launch silently re-denominates everyone's
//! holdings, so don't.

// ---------------------------------------------------------------------------
// Network Identifiers
// ---------------------------------------------------------------------------

/// Mainnet: the real deal. Mistakes here cost real money.
pub const NETWORK_ID_MAINNET: u32 = 0x4B45454C; // "KEEL" in ASCII hex. Yes, we're that cute.

/// Testnet: where we break things on purpose and call it "testing."
pub const NETWORK_ID_TESTNET: u32 = 0x4B454C54; // "KELT"

/// Devnet: the wild west. Reset weekly, no promises, no survivors.
pub const NETWORK_ID_DEVNET: u32 = 0x4B454C44; // "KELD"

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Protocol fingerprint for service identification. Shows up in the status
/// endpoint and in handshakes with custodian back-office systems, so they
/// can tell at a glance which protocol family they are talking to.
pub const PROTOCOL_FINGERPRINT: &str = "KEEL-POA-2026";

/// Major version: bump on breaking changes to token state or attestations.
pub const PROTOCOL_VERSION_MAJOR: u16 = 0;

/// Minor version: bump on backward-compatible additions.
pub const PROTOCOL_VERSION_MINOR: u16 = 1;

/// Patch version: bump on non-semantic bug fixes.
pub const PROTOCOL_VERSION_PATCH: u16 = 0;

/// The full version string, assembled at compile time so we don't allocate
/// for something this trivial at runtime.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Token Units
// ---------------------------------------------------------------------------

/// Decimal precision of every token amount in the system. 18 decimals,
/// matching the convention of the settlement rails our brokers clear on.
/// All arithmetic happens in base units; display layers divide.
pub const TOKEN_DECIMALS: u32 = 18;

/// Number of base units in one whole token: 10^18.
/// Fits comfortably in a u128; a u64 would overflow at ~18.4 whole tokens,
/// which is why every amount in this codebase is a u128.
pub const BASE_UNITS_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519, the only sane choice for signatures in 2024+.
/// 128-bit security level, deterministic, and resistant to side-channel
/// attacks when implemented correctly (which ed25519-dalek is).
pub const SIGNING_ALGORITHM: &str = "Ed25519";

/// Signing key (seed) length in bytes. Ed25519 secret keys are 32 bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Account identifier length in bytes. An account *is* an Ed25519 public
/// key, so this matches the verifying key length.
pub const ACCOUNT_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes. If yours isn't, something
/// has gone terribly wrong.
pub const SIGNATURE_LENGTH: usize = 64;

/// The hash function for attestation digests. SHA-256, because the custodian
/// signing appliances we interoperate with support nothing newer, and an
/// attestation they can't produce is worthless.
pub const ATTESTATION_HASH_FUNCTION: &str = "SHA-256";

/// The hash function for internal identifiers (token ids). BLAKE3 is faster
/// than SHA-256 on every platform that matters, and nothing outside this
/// codebase ever has to recompute these.
pub const INTERNAL_HASH_FUNCTION: &str = "BLAKE3";

/// Hash output length in bytes. Both SHA-256 and BLAKE3 produce 32-byte digests.
pub const HASH_OUTPUT_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Attestation Encoding
// ---------------------------------------------------------------------------

/// Width of the big-endian supply encoding inside an attestation payload.
/// The supply is left-padded with zeros to exactly this many bytes, so the
/// payload for a given symbol always has a fixed length.
pub const AMOUNT_ENCODING_LEN: usize = 32;

/// Custodian signing appliances emit recovery ids offset by 27, a convention
/// inherited from older ECDSA tooling that their firmware still follows.
/// We accept `27` and `28` and nothing else.
pub const RECOVERY_ID_OFFSET: u8 = 27;

// ---------------------------------------------------------------------------
// Token Limits
// ---------------------------------------------------------------------------

/// Maximum length of a token's display name in bytes.
/// Enough for "Commerzbank Tower, Frankfurt", not enough for the prospectus.
pub const MAX_NAME_LEN: usize = 64;

/// Maximum length of a token's ticker symbol in bytes.
pub const MAX_SYMBOL_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default RPC API port. Picked because it wasn't taken.
pub const DEFAULT_RPC_PORT: u16 = 9760;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9761;

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Converts a whole-token count into base units.
///
/// Takes a `u64` on purpose: 2^64 whole tokens times 10^18 base units still
/// fits in a u128, so this can never overflow. Callers with fractional
/// amounts should work in base units directly.
pub fn to_base_units(whole_tokens: u64) -> u128 {
    whole_tokens as u128 * BASE_UNITS_PER_TOKEN
}

/// Returns a friendly name for a network ID, mainly for logging.
/// Unknown networks get a hex dump because we're helpful like that.
pub fn network_name(network_id: u32) -> String {
    match network_id {
        NETWORK_ID_MAINNET => "mainnet".to_string(),
        NETWORK_ID_TESTNET => "testnet".to_string(),
        NETWORK_ID_DEVNET => "devnet".to_string(),
        other => format!("unknown(0x{:08X})", other),
    }
}
