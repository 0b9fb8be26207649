//! # Keel Asset Tokens
//!
//! The contract layer of Keel: deterministic state machines for crowdfunded,
//! custodian-attested asset tokens. These are the financial primitives that
//! turn "a broker has an asset" into "ten thousand backers hold a claim on
//! it":
//!
//! - **Asset Token**: the full lifecycle of one token, from a capped funding
//!   round through the custodian attestation gate to active trading and
//!   proportional revenue payouts. One instance per listed asset.
//! - **Ledger**: token balances with a sequence-numbered snapshot history,
//!   so payouts can be settled against balances *as of* a past moment.
//! - **Payout**: revenue distributions and the floor-division claim
//!   arithmetic.
//! - **Broker Registry**: the owner-curated list of brokers approved to
//!   list assets.
//! - **Store**: sled-backed persistence for all of the above.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow: `checked_add` and
//!    `checked_sub` everywhere, because wrapping arithmetic and money do not
//!    mix.
//! 2. Stage transitions are explicit: enum variants, not boolean flags.
//! 3. A token's own bookkeeping commits before any value leaves it, and a
//!    failed outbound transfer unwinds the operation completely.
//! 4. Every public type is serializable (serde) for wire transport and
//!    persistent storage.

pub mod asset_token;
pub mod ledger;
pub mod payout;
pub mod registry;
pub mod store;
