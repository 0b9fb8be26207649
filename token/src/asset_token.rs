//! # Asset Token
//!
//! The full lifecycle of one crowdfunded, custodian-attested asset token:
//!
//! 1. **Funding**: backers buy tokens against a fixed supply cap, racing a
//!    funding deadline. Contributions are all-or-nothing: a buy that would
//!    overshoot the cap is rejected whole, never partially filled.
//! 2. **Pending**: the cap was reached exactly. Contributions are locked
//!    while the custodian inspects the asset.
//! 3. **Active**: a valid custodian attestation arrived. The escrowed
//!    funding is forwarded to the broker in one transfer, and the token is
//!    live: holders trade, the broker deposits revenue, holders claim their
//!    share.
//! 4. **Failed**: the deadline passed before the cap was reached. Backers
//!    reclaim their contributions; the token is a tombstone.
//!
//! There is no path out of `Active` or `Failed`, and no path into `Active`
//! except through a verified attestation.
//!
//! ## Commit discipline
//!
//! Every operation either completes fully or leaves the token exactly as it
//! found it. Operations that push value out do their own bookkeeping first,
//! call [`Treasury::send`] last, and unwind the bookkeeping if the send
//! fails. The hosting layer serializes calls per token (one writer at a
//! time), which is what makes the unwind sound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use keel_core::account::Account;
use keel_core::config::{MAX_NAME_LEN, MAX_SYMBOL_LEN};
use keel_core::custody::{verify_activation, Attestation, CustodyError};
use keel_core::hash::domain_separated_multi;
use keel_core::treasury::{Treasury, TransferError};

use crate::ledger::{Ledger, LedgerError};
use crate::payout::Payout;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during token operations.
///
/// Every rejected precondition gets its own kind, so callers (and the HTTP
/// layer above them) can tell a stage violation from a cap violation from a
/// bad attestation without string-matching.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token is not in a stage that allows this operation.
    #[error("operation not permitted in stage {current}")]
    WrongStage {
        /// The token's current stage.
        current: Stage,
    },

    /// The contribution would push the total raised past the supply cap.
    #[error("cap exceeded: attempted {attempted} but only {remaining} of the cap remains")]
    CapExceeded {
        /// Amount the contributor tried to buy.
        attempted: u128,
        /// Amount still available under the cap.
        remaining: u128,
    },

    /// Reclaim was attempted while the funding round is still open.
    #[error("funding round still open until {deadline}")]
    NotExpired {
        /// When the round closes.
        deadline: DateTime<Utc>,
    },

    /// The custodian attestation failed verification.
    #[error("attestation rejected: {0}")]
    InvalidSignature(#[from] CustodyError),

    /// No payout exists at the given index.
    #[error("no payout at index {index}")]
    UnknownPayout {
        /// The index that was requested.
        index: usize,
    },

    /// The account already claimed this payout.
    #[error("payout {index} already claimed by {account}")]
    AlreadyClaimed {
        /// The payout index.
        index: usize,
        /// The account that already claimed.
        account: Account,
    },

    /// The account's share of this payout is zero.
    #[error("account {account} has no entitlement in this payout")]
    NoEntitlement {
        /// The claiming account.
        account: Account,
    },

    /// A balance operation failed inside the ledger.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The outbound value transfer failed; the operation was unwound.
    #[error("outbound transfer failed: {0}")]
    TransferFailed(#[from] TransferError),

    /// The caller is not allowed to perform this operation.
    #[error("account {account} is not authorized for this operation")]
    Unauthorized {
        /// The rejected caller.
        account: Account,
    },

    /// The token constructor was given unusable parameters.
    #[error("invalid token parameters: {reason}")]
    InvalidParams {
        /// What exactly was wrong.
        reason: String,
    },

    /// A zero amount where a positive one is required.
    #[error("amount must be greater than zero")]
    InvalidAmount,

    /// Checked arithmetic failed. Reaching this means an internal invariant
    /// broke or the amounts are beyond anything the system supports.
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The lifecycle stage of an asset token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Collecting contributions against the supply cap.
    Funding,
    /// Cap reached; waiting for the custodian attestation.
    Pending,
    /// The funding deadline passed before the cap was reached.
    Failed,
    /// Attested and live: trading, payouts, claims.
    Active,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Funding => write!(f, "Funding"),
            Stage::Pending => write!(f, "Pending"),
            Stage::Failed => write!(f, "Failed"),
            Stage::Active => write!(f, "Active"),
        }
    }
}

/// Error parsing a token id from its hex form.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid token id: expected 64 hex characters")]
pub struct TokenIdError;

/// Content-derived identifier of a token instance.
///
/// A domain-separated hash over the full identity of the offering (name,
/// symbol, broker, custodian, cap) plus the creation timestamp, so a
/// re-listing of the same asset after a failed round gets a fresh id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId([u8; 32]);

impl TokenId {
    /// Derives the id for a token from its identity fields and creation
    /// time.
    pub fn derive(
        name: &str,
        symbol: &str,
        broker: &Account,
        custodian: &Account,
        supply_cap: u128,
        created_at: DateTime<Utc>,
    ) -> Self {
        let micros = created_at.timestamp_micros().to_be_bytes();
        Self(domain_separated_multi(
            "keel.token.id.v1",
            &[
                name.as_bytes(),
                symbol.as_bytes(),
                broker.as_bytes(),
                custodian.as_bytes(),
                &supply_cap.to_be_bytes(),
                &micros,
            ],
        ))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded representation. 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex-encoded token id.
    pub fn from_hex(s: &str) -> Result<Self, TokenIdError> {
        let bytes = hex::decode(s).map_err(|_| TokenIdError)?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| TokenIdError)?;
        Ok(Self(arr))
    }
}

impl FromStr for TokenId {
    type Err = TokenIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", &self.to_hex()[..16])
    }
}

impl Serialize for TokenId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TokenId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Observable events emitted by token operations.
///
/// Buffered inside the token and drained by the hosting layer after each
/// successful operation, which forwards them to subscribers. An operation
/// that fails leaves no events behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenEvent {
    /// The token entered a new lifecycle stage.
    StageChanged {
        stage: Stage,
        at: DateTime<Utc>,
    },
    /// Revenue was deposited as a new payout.
    PayoutDeposited {
        index: usize,
        depositor: Account,
        amount: u128,
    },
    /// A holder claimed a payout share.
    PayoutClaimed {
        index: usize,
        claimant: Account,
        amount: u128,
    },
}

/// One crowdfunded asset token.
///
/// Metadata fields are fixed at creation and never touched by operations;
/// the lifecycle state (`stage`, `raised`, `held`, ledger, payouts) only
/// changes through the operation methods, which maintain the invariants:
///
/// - `raised <= supply_cap`, with equality from `Pending` onward.
/// - `held` equals the value escrowed in the token: contributions during
///   `Funding`/`Pending`, undistributed payout remainders during `Active`.
/// - The ledger's circulating supply never exceeds `supply_cap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetToken {
    /// Content-derived unique id.
    pub id: TokenId,
    /// Human-readable asset name (e.g., "Commerzbank Tower, Frankfurt").
    pub name: String,
    /// Ticker symbol. Bound into the custodian attestation payload.
    pub symbol: String,
    /// The broker listing the asset. Receives escrow on activation, holds
    /// repurchased tokens, and is the only account allowed to liquidate.
    pub broker: Account,
    /// The custodian whose attestation gates activation.
    pub custodian: Account,
    /// End of the funding window. Buys require `now < deadline`.
    pub deadline: DateTime<Utc>,
    /// Total supply in base units. Funding must hit this exactly.
    pub supply_cap: u128,
    stage: Stage,
    raised: u128,
    held: u128,
    ledger: Ledger,
    payouts: Vec<Payout>,
    #[serde(skip)]
    events: Vec<TokenEvent>,
    /// Timestamp when the token was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent state change.
    pub updated_at: DateTime<Utc>,
}

impl AssetToken {
    /// Creates a new token in `Funding` stage.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidParams`] if the name or symbol is empty
    /// or over-long, the supply cap is zero, or the deadline is not in the
    /// future.
    pub fn new(
        name: String,
        symbol: String,
        broker: Account,
        custodian: Account,
        deadline: DateTime<Utc>,
        supply_cap: u128,
    ) -> Result<Self, TokenError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(TokenError::InvalidParams {
                reason: format!("name must be 1..={MAX_NAME_LEN} bytes"),
            });
        }
        if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
            return Err(TokenError::InvalidParams {
                reason: format!("symbol must be 1..={MAX_SYMBOL_LEN} bytes"),
            });
        }
        if supply_cap == 0 {
            return Err(TokenError::InvalidParams {
                reason: "supply cap must be greater than zero".into(),
            });
        }
        let now = Utc::now();
        if deadline <= now {
            return Err(TokenError::InvalidParams {
                reason: "funding deadline must be in the future".into(),
            });
        }

        let id = TokenId::derive(&name, &symbol, &broker, &custodian, supply_cap, now);
        info!(token = %id, %symbol, cap = supply_cap, "token created, funding open");

        Ok(Self {
            id,
            name,
            symbol,
            broker,
            custodian,
            deadline,
            supply_cap,
            stage: Stage::Funding,
            raised: 0,
            held: 0,
            ledger: Ledger::new(),
            payouts: Vec::new(),
            events: vec![TokenEvent::StageChanged {
                stage: Stage::Funding,
                at: now,
            }],
            created_at: now,
            updated_at: now,
        })
    }

    // -- Reads ----

    /// Current lifecycle stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Total contributions accepted so far, in base units.
    pub fn raised(&self) -> u128 {
        self.raised
    }

    /// Value currently escrowed inside the token. After activation this is
    /// exactly the undistributed payout remainder, including the floor-
    /// division dust that can never be claimed.
    pub fn held_value(&self) -> u128 {
        self.held
    }

    /// Cap space still available to contributions.
    pub fn remaining_cap(&self) -> u128 {
        self.supply_cap - self.raised
    }

    /// A holder's current token balance.
    pub fn balance_of(&self, account: &Account) -> u128 {
        self.ledger.balance_of(account)
    }

    /// A holder's balance as of a ledger sequence point.
    pub fn balance_at(&self, account: &Account, as_of: u64) -> u128 {
        self.ledger.balance_at(account, as_of)
    }

    /// Tokens currently in circulation.
    pub fn circulating(&self) -> u128 {
        self.ledger.circulating()
    }

    /// Number of accounts holding a nonzero balance.
    pub fn holder_count(&self) -> usize {
        self.ledger.holder_count()
    }

    /// The payout at `index`, if it exists.
    pub fn payout(&self, index: usize) -> Option<&Payout> {
        self.payouts.get(index)
    }

    /// All payouts, in deposit order. The index into this slice is the
    /// payout's public identifier.
    pub fn payouts(&self) -> &[Payout] {
        &self.payouts
    }

    /// Takes the buffered events, leaving the buffer empty.
    pub fn drain_events(&mut self) -> Vec<TokenEvent> {
        std::mem::take(&mut self.events)
    }

    // -- Funding ----

    /// Accepts a contribution of `amount` base units from `contributor`.
    ///
    /// The contribution is all-or-nothing: if it would overshoot the supply
    /// cap it is rejected whole. Filling the cap exactly transitions the
    /// token to `Pending`. Returns the contributor's new balance.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::WrongStage`] outside `Funding` or once the
    /// deadline has passed, [`TokenError::InvalidAmount`] for zero, and
    /// [`TokenError::CapExceeded`] for an overshooting amount.
    pub fn buy(&mut self, contributor: Account, amount: u128) -> Result<u128, TokenError> {
        let now = Utc::now();
        // A lapsed deadline is a stage violation: the round is over even if
        // nobody has called reclaim yet to make the Failed stage official.
        if self.stage != Stage::Funding || now >= self.deadline {
            return Err(TokenError::WrongStage {
                current: self.stage,
            });
        }
        if amount == 0 {
            return Err(TokenError::InvalidAmount);
        }

        let remaining = self
            .supply_cap
            .checked_sub(self.raised)
            .ok_or(TokenError::ArithmeticOverflow)?;
        if amount > remaining {
            return Err(TokenError::CapExceeded {
                attempted: amount,
                remaining,
            });
        }

        self.ledger.credit(contributor, amount)?;
        self.raised = self
            .raised
            .checked_add(amount)
            .ok_or(TokenError::ArithmeticOverflow)?;
        self.held = self
            .held
            .checked_add(amount)
            .ok_or(TokenError::ArithmeticOverflow)?;

        if self.raised == self.supply_cap {
            self.set_stage(Stage::Pending, now);
            info!(token = %self.id, raised = self.raised, "cap reached, awaiting attestation");
        }

        self.updated_at = now;
        Ok(self.ledger.balance_of(&contributor))
    }

    /// Refunds the caller's entire contribution after a failed round.
    ///
    /// The first reclaim after the deadline flips the token from `Funding`
    /// to `Failed`; subsequent reclaims find it already there. The caller's
    /// full balance is zeroed and refunded in one send. A caller with no
    /// balance gets `Ok(0)` and nothing moves.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::NotExpired`] while the round is still open,
    /// [`TokenError::WrongStage`] in `Pending` or `Active`, and
    /// [`TokenError::TransferFailed`] if the refund send fails, in which
    /// case the whole operation, stage flip included, is unwound.
    pub fn reclaim(&mut self, caller: Account, bank: &mut Treasury) -> Result<u128, TokenError> {
        let now = Utc::now();
        let prev_stage = self.stage;
        let events_mark = self.events.len();

        match self.stage {
            Stage::Funding => {
                if now < self.deadline {
                    return Err(TokenError::NotExpired {
                        deadline: self.deadline,
                    });
                }
                self.set_stage(Stage::Failed, now);
                info!(token = %self.id, raised = self.raised, "funding expired, token failed");
            }
            Stage::Failed => {}
            current => {
                return Err(TokenError::WrongStage { current });
            }
        }

        let refund = self.ledger.balance_of(&caller);
        if refund == 0 {
            self.updated_at = now;
            return Ok(0);
        }

        let held_before = self.held;
        let held_after = self
            .held
            .checked_sub(refund)
            .ok_or(TokenError::ArithmeticOverflow)?;

        self.ledger.zero(caller);
        self.held = held_after;

        if let Err(e) = bank.send(caller, refund) {
            // Unwind everything, the stage flip included. The next attempt
            // starts from a clean slate.
            self.ledger.rollback_last(caller, refund);
            self.held = held_before;
            self.stage = prev_stage;
            self.events.truncate(events_mark);
            return Err(TokenError::TransferFailed(e));
        }

        debug!(token = %self.id, caller = %caller, refund, "contribution reclaimed");
        self.updated_at = now;
        Ok(refund)
    }

    // -- Activation ----

    /// Activates the token against a custodian attestation.
    ///
    /// Anyone may submit the attestation; only its validity matters. On
    /// success the token enters `Active` and the entire escrowed funding is
    /// forwarded to the broker in one transfer. A failed verification leaves
    /// the token in `Pending`, so a corrected attestation can be retried.
    /// Returns the forwarded amount.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::WrongStage`] outside `Pending`,
    /// [`TokenError::InvalidSignature`] for an attestation that does not
    /// verify, and [`TokenError::TransferFailed`] if the forwarding send
    /// fails; the activation is unwound and can be retried.
    pub fn activate(
        &mut self,
        attestation: &Attestation,
        bank: &mut Treasury,
    ) -> Result<u128, TokenError> {
        let now = Utc::now();
        if self.stage != Stage::Pending {
            return Err(TokenError::WrongStage {
                current: self.stage,
            });
        }

        verify_activation(&self.custodian, &self.symbol, self.supply_cap, attestation)?;

        let forward = self.held;
        self.held = 0;
        self.set_stage(Stage::Active, now);

        if let Err(e) = bank.send(self.broker, forward) {
            self.held = forward;
            self.stage = Stage::Pending;
            self.events.pop();
            return Err(TokenError::TransferFailed(e));
        }

        info!(token = %self.id, forwarded = forward, "attestation verified, token active");
        self.updated_at = now;
        Ok(forward)
    }

    // -- Trading ----

    /// Moves tokens between two holders.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::WrongStage`] outside `Active`,
    /// [`TokenError::InvalidAmount`] for zero, and a ledger error if the
    /// sender's balance is short.
    pub fn transfer(
        &mut self,
        from: Account,
        to: Account,
        amount: u128,
    ) -> Result<(), TokenError> {
        if self.stage != Stage::Active {
            return Err(TokenError::WrongStage {
                current: self.stage,
            });
        }
        if amount == 0 {
            return Err(TokenError::InvalidAmount);
        }
        self.ledger.transfer(from, to, amount)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Sells tokens back to the broker's pool.
    ///
    /// This is the token leg only: the holder's tokens move to the broker's
    /// balance (not burned, still circulating). The money leg is the
    /// broker's obligation, settled via [`liquidate`](Self::liquidate).
    pub fn sell(&mut self, holder: Account, amount: u128) -> Result<(), TokenError> {
        if self.stage != Stage::Active {
            return Err(TokenError::WrongStage {
                current: self.stage,
            });
        }
        if amount == 0 {
            return Err(TokenError::InvalidAmount);
        }
        self.ledger.transfer(holder, self.broker, amount)?;
        debug!(token = %self.id, holder = %holder, amount, "tokens sold to broker pool");
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Broker-only push payment to an arbitrary recipient.
    ///
    /// The money leg of a buy-back (or any other obligation the broker
    /// settles through the token). The value is carried in with the call by
    /// the hosting layer and passes straight through: no ledger mutation,
    /// no change to held value.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Unauthorized`] for a non-broker caller and
    /// [`TokenError::WrongStage`] outside `Active`.
    pub fn liquidate(
        &mut self,
        caller: Account,
        recipient: Account,
        amount: u128,
        bank: &mut Treasury,
    ) -> Result<(), TokenError> {
        if self.stage != Stage::Active {
            return Err(TokenError::WrongStage {
                current: self.stage,
            });
        }
        if caller != self.broker {
            return Err(TokenError::Unauthorized { account: caller });
        }
        if amount == 0 {
            return Err(TokenError::InvalidAmount);
        }
        bank.send(recipient, amount)?;
        debug!(token = %self.id, recipient = %recipient, amount, "liquidation paid out");
        self.updated_at = Utc::now();
        Ok(())
    }

    // -- Payouts ----

    /// Records a revenue deposit as a new payout.
    ///
    /// Captures the ledger sequence and circulating supply at this instant;
    /// claims settle against that frozen snapshot. Returns the new payout's
    /// index (numbered from zero). The core imposes no caller restriction;
    /// anyone willing to donate revenue to the holders may.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::WrongStage`] outside `Active` and
    /// [`TokenError::InvalidAmount`] for zero.
    pub fn deposit_payout(
        &mut self,
        depositor: Account,
        amount: u128,
    ) -> Result<usize, TokenError> {
        if self.stage != Stage::Active {
            return Err(TokenError::WrongStage {
                current: self.stage,
            });
        }
        if amount == 0 {
            return Err(TokenError::InvalidAmount);
        }

        let held_after = self
            .held
            .checked_add(amount)
            .ok_or(TokenError::ArithmeticOverflow)?;

        let index = self.payouts.len();
        self.payouts.push(Payout::new(
            depositor,
            amount,
            self.ledger.sequence(),
            self.ledger.circulating(),
        ));
        self.held = held_after;
        self.events.push(TokenEvent::PayoutDeposited {
            index,
            depositor,
            amount,
        });

        info!(token = %self.id, index, amount, "payout deposited");
        self.updated_at = Utc::now();
        Ok(index)
    }

    /// Pays out a holder's share of the payout at `index`.
    ///
    /// The share is `floor(deposit * balance / supply)` against the payout's
    /// frozen snapshot. Marking the claim and reducing held value commit
    /// before the send; a failed send unwinds both. Returns the paid amount.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::UnknownPayout`] for a bad index,
    /// [`TokenError::AlreadyClaimed`] on a repeat claim, and
    /// [`TokenError::NoEntitlement`] when the snapshot share rounds to zero,
    /// including for accounts that acquired their tokens after the
    /// deposit.
    pub fn claim_payout(
        &mut self,
        claimant: Account,
        index: usize,
        bank: &mut Treasury,
    ) -> Result<u128, TokenError> {
        if self.stage != Stage::Active {
            return Err(TokenError::WrongStage {
                current: self.stage,
            });
        }

        let payout = self
            .payouts
            .get(index)
            .ok_or(TokenError::UnknownPayout { index })?;
        if payout.has_claimed(&claimant) {
            return Err(TokenError::AlreadyClaimed {
                index,
                account: claimant,
            });
        }

        let balance = self.ledger.balance_at(&claimant, payout.sequence_point);
        let share = payout
            .entitlement(balance)
            .ok_or(TokenError::ArithmeticOverflow)?;
        if share == 0 {
            return Err(TokenError::NoEntitlement { account: claimant });
        }

        let held_after = self
            .held
            .checked_sub(share)
            .ok_or(TokenError::ArithmeticOverflow)?;

        self.payouts[index].mark_claimed(claimant);
        self.held = held_after;

        if let Err(e) = bank.send(claimant, share) {
            self.payouts[index].unmark_claimed(&claimant);
            self.held = held_after + share;
            return Err(TokenError::TransferFailed(e));
        }

        self.events.push(TokenEvent::PayoutClaimed {
            index,
            claimant,
            amount: share,
        });
        debug!(token = %self.id, index, claimant = %claimant, share, "payout claimed");
        self.updated_at = Utc::now();
        Ok(share)
    }

    fn set_stage(&mut self, stage: Stage, at: DateTime<Utc>) {
        self.stage = stage;
        self.events.push(TokenEvent::StageChanged { stage, at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use keel_core::keys::KeelKeypair;

    fn account(byte: u8) -> Account {
        Account::from_bytes([byte; 32])
    }

    const BROKER: u8 = 0xB0;
    const CAP: u128 = 1_000;

    /// A Funding-stage token with a generous deadline. The custodian keypair
    /// is returned so tests can mint valid attestations.
    fn sample_token() -> (AssetToken, KeelKeypair) {
        let custodian = KeelKeypair::generate();
        let token = AssetToken::new(
            "Harborview Warehouse 7".into(),
            "HW7".into(),
            account(BROKER),
            custodian.account(),
            Utc::now() + Duration::days(30),
            CAP,
        )
        .unwrap();
        (token, custodian)
    }

    /// A fully funded, attested, active token with two holders.
    fn active_token() -> (AssetToken, Treasury) {
        let (mut token, custodian) = sample_token();
        let mut bank = Treasury::new();
        token.buy(account(1), 600).unwrap();
        token.buy(account(2), 400).unwrap();
        let att = Attestation::sign(&custodian, "HW7", CAP);
        token.activate(&att, &mut bank).unwrap();
        token.drain_events();
        (token, bank)
    }

    // -- Construction ----

    #[test]
    fn new_token_starts_funding() {
        let (mut token, _) = sample_token();
        assert_eq!(token.stage(), Stage::Funding);
        assert_eq!(token.raised(), 0);
        assert_eq!(token.held_value(), 0);
        assert_eq!(token.remaining_cap(), CAP);

        let events = token.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            TokenEvent::StageChanged {
                stage: Stage::Funding,
                ..
            }
        ));
    }

    #[test]
    fn test_construction_validates_params() {
        let deadline = Utc::now() + Duration::days(1);
        let mk = |name: &str, symbol: &str, deadline, cap| {
            AssetToken::new(
                name.into(),
                symbol.into(),
                account(1),
                account(2),
                deadline,
                cap,
            )
        };

        assert!(mk("", "SYM", deadline, 100).is_err());
        assert!(mk(&"x".repeat(65), "SYM", deadline, 100).is_err());
        assert!(mk("Name", "", deadline, 100).is_err());
        assert!(mk("Name", &"S".repeat(33), deadline, 100).is_err());
        assert!(mk("Name", "SYM", deadline, 0).is_err());
        assert!(mk("Name", "SYM", Utc::now() - Duration::hours(1), 100).is_err());
    }

    #[test]
    fn token_ids_differ_by_identity() {
        let at = Utc::now();
        let a = TokenId::derive("Asset", "AAA", &account(1), &account(2), 100, at);
        let b = TokenId::derive("Asset", "BBB", &account(1), &account(2), 100, at);
        let c = TokenId::derive("Asset", "AAA", &account(1), &account(2), 200, at);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn token_id_hex_roundtrip() {
        let id = TokenId::derive("Asset", "AAA", &account(1), &account(2), 100, Utc::now());
        assert_eq!(TokenId::from_hex(&id.to_hex()).unwrap(), id);
        assert!(TokenId::from_hex("zz").is_err());
    }

    // -- Funding ----

    #[test]
    fn buy_credits_contributor() {
        let (mut token, _) = sample_token();
        let balance = token.buy(account(1), 250).unwrap();
        assert_eq!(balance, 250);
        assert_eq!(token.balance_of(&account(1)), 250);
        assert_eq!(token.raised(), 250);
        assert_eq!(token.held_value(), 250);
        assert_eq!(token.remaining_cap(), 750);
        assert_eq!(token.stage(), Stage::Funding);
    }

    #[test]
    fn exact_fill_transitions_to_pending() {
        let (mut token, _) = sample_token();
        token.drain_events();
        token.buy(account(1), 600).unwrap();
        token.buy(account(2), 400).unwrap();

        assert_eq!(token.stage(), Stage::Pending);
        assert_eq!(token.raised(), CAP);
        assert_eq!(token.circulating(), CAP);

        let events = token.drain_events();
        assert!(matches!(
            events.last(),
            Some(TokenEvent::StageChanged {
                stage: Stage::Pending,
                ..
            })
        ));
    }

    #[test]
    fn test_overshooting_buy_rejected_whole() {
        let (mut token, _) = sample_token();
        token.buy(account(1), 990).unwrap();

        // 20 > the 10 remaining: no partial fill of 10, a whole rejection.
        let err = token.buy(account(2), 20).unwrap_err();
        assert!(matches!(
            err,
            TokenError::CapExceeded {
                attempted: 20,
                remaining: 10,
            }
        ));
        assert_eq!(token.raised(), 990);
        assert_eq!(token.balance_of(&account(2)), 0);
        assert_eq!(token.stage(), Stage::Funding);

        // The exact remainder still fits.
        token.buy(account(2), 10).unwrap();
        assert_eq!(token.stage(), Stage::Pending);
    }

    #[test]
    fn buy_zero_rejected() {
        let (mut token, _) = sample_token();
        assert!(matches!(
            token.buy(account(1), 0),
            Err(TokenError::InvalidAmount)
        ));
    }

    #[test]
    fn test_buy_after_deadline_is_stage_violation() {
        let (mut token, _) = sample_token();
        token.buy(account(1), 100).unwrap();
        token.deadline = Utc::now() - Duration::seconds(5);

        // The stage field still says Funding, but the round is over.
        let err = token.buy(account(2), 100).unwrap_err();
        assert!(matches!(
            err,
            TokenError::WrongStage {
                current: Stage::Funding,
            }
        ));
    }

    #[test]
    fn buy_in_pending_rejected() {
        let (mut token, _) = sample_token();
        token.buy(account(1), CAP).unwrap();
        assert!(matches!(
            token.buy(account(2), 1),
            Err(TokenError::WrongStage {
                current: Stage::Pending,
            })
        ));
    }

    // -- Reclaim ----

    #[test]
    fn reclaim_before_deadline_rejected() {
        let (mut token, _) = sample_token();
        let mut bank = Treasury::new();
        token.buy(account(1), 100).unwrap();

        let err = token.reclaim(account(1), &mut bank).unwrap_err();
        assert!(matches!(err, TokenError::NotExpired { .. }));
        assert_eq!(token.stage(), Stage::Funding);
    }

    #[test]
    fn reclaim_after_deadline_fails_token_and_refunds() {
        let (mut token, _) = sample_token();
        let mut bank = Treasury::new();
        token.buy(account(1), 300).unwrap();
        token.buy(account(2), 200).unwrap();
        token.deadline = Utc::now() - Duration::seconds(5);
        token.drain_events();

        let refund = token.reclaim(account(1), &mut bank).unwrap();
        assert_eq!(refund, 300);
        assert_eq!(token.stage(), Stage::Failed);
        assert_eq!(bank.balance_of(&account(1)), 300);
        assert_eq!(token.balance_of(&account(1)), 0);
        assert_eq!(token.held_value(), 200);
        assert_eq!(token.circulating(), 200);

        let events = token.drain_events();
        assert!(matches!(
            events[0],
            TokenEvent::StageChanged {
                stage: Stage::Failed,
                ..
            }
        ));

        // Second backer reclaims from the already-Failed token.
        let refund = token.reclaim(account(2), &mut bank).unwrap();
        assert_eq!(refund, 200);
        assert_eq!(token.held_value(), 0);
        assert_eq!(token.circulating(), 0);
        // No second stage event.
        assert!(token.drain_events().is_empty());
    }

    #[test]
    fn reclaim_with_no_balance_is_a_noop() {
        let (mut token, _) = sample_token();
        let mut bank = Treasury::new();
        token.buy(account(1), 100).unwrap();
        token.deadline = Utc::now() - Duration::seconds(5);

        assert_eq!(token.reclaim(account(9), &mut bank).unwrap(), 0);
        assert_eq!(bank.balance_of(&account(9)), 0);
        // The stage flip still happened.
        assert_eq!(token.stage(), Stage::Failed);
    }

    #[test]
    fn reclaim_in_pending_rejected() {
        let (mut token, _) = sample_token();
        let mut bank = Treasury::new();
        token.buy(account(1), CAP).unwrap();
        token.deadline = Utc::now() - Duration::seconds(5);

        // Cap was reached before the deadline passed; the money is spoken for.
        assert!(matches!(
            token.reclaim(account(1), &mut bank),
            Err(TokenError::WrongStage {
                current: Stage::Pending,
            })
        ));
    }

    #[test]
    fn test_reclaim_send_failure_unwinds_everything() {
        let (mut token, _) = sample_token();
        let mut bank = Treasury::new();
        token.buy(account(1), 100).unwrap();
        token.deadline = Utc::now() - Duration::seconds(5);
        token.drain_events();

        // Saturate the refund recipient so the send overflows.
        bank.issue(account(1), u128::MAX).unwrap();

        let err = token.reclaim(account(1), &mut bank).unwrap_err();
        assert!(matches!(err, TokenError::TransferFailed(_)));

        // Everything restored, the stage flip included.
        assert_eq!(token.stage(), Stage::Funding);
        assert_eq!(token.balance_of(&account(1)), 100);
        assert_eq!(token.held_value(), 100);
        assert_eq!(token.circulating(), 100);
        assert!(token.drain_events().is_empty());
    }

    // -- Activation ----

    #[test]
    fn activate_requires_pending() {
        let (mut token, custodian) = sample_token();
        let mut bank = Treasury::new();
        let att = Attestation::sign(&custodian, "HW7", CAP);
        assert!(matches!(
            token.activate(&att, &mut bank),
            Err(TokenError::WrongStage {
                current: Stage::Funding,
            })
        ));
    }

    #[test]
    fn activate_forwards_escrow_to_broker() {
        let (mut token, custodian) = sample_token();
        let mut bank = Treasury::new();
        token.buy(account(1), CAP).unwrap();
        token.drain_events();

        let att = Attestation::sign(&custodian, "HW7", CAP);
        let forwarded = token.activate(&att, &mut bank).unwrap();

        assert_eq!(forwarded, CAP);
        assert_eq!(token.stage(), Stage::Active);
        assert_eq!(token.held_value(), 0);
        assert_eq!(bank.balance_of(&account(BROKER)), CAP);
        // Balances are untouched by activation.
        assert_eq!(token.balance_of(&account(1)), CAP);

        let events = token.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            TokenEvent::StageChanged {
                stage: Stage::Active,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_attestation_leaves_pending_and_is_retryable() {
        let (mut token, custodian) = sample_token();
        let mut bank = Treasury::new();
        token.buy(account(1), CAP).unwrap();
        token.drain_events();

        // Wrong signer.
        let impostor = KeelKeypair::generate();
        let bad = Attestation::sign(&impostor, "HW7", CAP);
        assert!(matches!(
            token.activate(&bad, &mut bank),
            Err(TokenError::InvalidSignature(
                CustodyError::VerificationFailed
            ))
        ));
        assert_eq!(token.stage(), Stage::Pending);
        assert!(token.drain_events().is_empty());

        // Wrong supply under the right key.
        let wrong_supply = Attestation::sign(&custodian, "HW7", CAP + 1);
        assert!(token.activate(&wrong_supply, &mut bank).is_err());
        assert_eq!(token.stage(), Stage::Pending);

        // Malformed recovery id.
        let mut mangled = Attestation::sign(&custodian, "HW7", CAP);
        mangled.v = 26;
        assert!(matches!(
            token.activate(&mangled, &mut bank),
            Err(TokenError::InvalidSignature(
                CustodyError::MalformedRecoveryId { v: 26 }
            ))
        ));

        // The corrected attestation still goes through.
        let good = Attestation::sign(&custodian, "HW7", CAP);
        token.activate(&good, &mut bank).unwrap();
        assert_eq!(token.stage(), Stage::Active);
    }

    #[test]
    fn test_activation_send_failure_unwinds() {
        let (mut token, custodian) = sample_token();
        let mut bank = Treasury::new();
        token.buy(account(1), CAP).unwrap();
        token.drain_events();
        bank.issue(account(BROKER), u128::MAX).unwrap();

        let att = Attestation::sign(&custodian, "HW7", CAP);
        let err = token.activate(&att, &mut bank).unwrap_err();
        assert!(matches!(err, TokenError::TransferFailed(_)));
        assert_eq!(token.stage(), Stage::Pending);
        assert_eq!(token.held_value(), CAP);
        assert!(token.drain_events().is_empty());
    }

    // -- Trading ----

    #[test]
    fn transfer_moves_tokens_when_active() {
        let (mut token, _) = active_token();
        token.transfer(account(1), account(3), 150).unwrap();
        assert_eq!(token.balance_of(&account(1)), 450);
        assert_eq!(token.balance_of(&account(3)), 150);
        assert_eq!(token.circulating(), CAP);
    }

    #[test]
    fn transfer_rejected_outside_active() {
        let (mut token, _) = sample_token();
        token.buy(account(1), 100).unwrap();
        assert!(matches!(
            token.transfer(account(1), account(2), 50),
            Err(TokenError::WrongStage { .. })
        ));
    }

    #[test]
    fn sell_moves_tokens_to_broker_pool() {
        let (mut token, _) = active_token();
        token.sell(account(2), 400).unwrap();
        assert_eq!(token.balance_of(&account(2)), 0);
        assert_eq!(token.balance_of(&account(BROKER)), 400);
        // Sold tokens stay in circulation.
        assert_eq!(token.circulating(), CAP);
    }

    #[test]
    fn liquidate_is_broker_only() {
        let (mut token, mut bank) = active_token();
        assert!(matches!(
            token.liquidate(account(1), account(2), 100, &mut bank),
            Err(TokenError::Unauthorized { .. })
        ));
    }

    #[test]
    fn liquidate_pushes_value_through() {
        let (mut token, mut bank) = active_token();
        let held_before = token.held_value();

        token
            .liquidate(account(BROKER), account(2), 500, &mut bank)
            .unwrap();
        assert_eq!(bank.balance_of(&account(2)), 500);
        // Pass-through: the token's own escrow is untouched.
        assert_eq!(token.held_value(), held_before);
    }

    // -- Payouts ----

    #[test]
    fn deposit_payout_freezes_snapshot() {
        let (mut token, _) = active_token();
        let seq = token.ledger.sequence();

        let index = token.deposit_payout(account(BROKER), 10_000).unwrap();
        assert_eq!(index, 0);
        assert_eq!(token.held_value(), 10_000);

        let payout = token.payout(0).unwrap();
        assert_eq!(payout.sequence_point, seq);
        assert_eq!(payout.circulating_at_deposit, CAP);

        // Indices count up from zero.
        assert_eq!(token.deposit_payout(account(BROKER), 500).unwrap(), 1);
    }

    #[test]
    fn deposit_rejected_outside_active() {
        let (mut token, _) = sample_token();
        assert!(matches!(
            token.deposit_payout(account(BROKER), 100),
            Err(TokenError::WrongStage { .. })
        ));
    }

    #[test]
    fn claim_pays_proportional_share() {
        let (mut token, mut bank) = active_token();
        token.deposit_payout(account(BROKER), 10_000).unwrap();

        // Holder 1 owns 600 of 1000.
        let share = token.claim_payout(account(1), 0, &mut bank).unwrap();
        assert_eq!(share, 6_000);
        assert_eq!(bank.balance_of(&account(1)), 6_000);
        assert_eq!(token.held_value(), 4_000);
        // Claiming pays money, never tokens.
        assert_eq!(token.balance_of(&account(1)), 600);
    }

    #[test]
    fn claim_unknown_payout_rejected() {
        let (mut token, mut bank) = active_token();
        assert!(matches!(
            token.claim_payout(account(1), 7, &mut bank),
            Err(TokenError::UnknownPayout { index: 7 })
        ));
    }

    #[test]
    fn double_claim_rejected() {
        let (mut token, mut bank) = active_token();
        token.deposit_payout(account(BROKER), 1_000).unwrap();
        token.claim_payout(account(1), 0, &mut bank).unwrap();

        let err = token.claim_payout(account(1), 0, &mut bank).unwrap_err();
        assert!(matches!(err, TokenError::AlreadyClaimed { index: 0, .. }));
        // Paid exactly once.
        assert_eq!(bank.balance_of(&account(1)), 600);
    }

    #[test]
    fn test_post_deposit_buyer_has_no_entitlement() {
        let (mut token, mut bank) = active_token();
        token.deposit_payout(account(BROKER), 1_000).unwrap();

        // Account 3 acquires tokens only after the deposit snapshot.
        token.transfer(account(1), account(3), 300).unwrap();
        assert!(matches!(
            token.claim_payout(account(3), 0, &mut bank),
            Err(TokenError::NoEntitlement { .. })
        ));

        // The seller still claims against the full snapshot balance.
        assert_eq!(token.claim_payout(account(1), 0, &mut bank).unwrap(), 600);
    }

    #[test]
    fn test_claim_send_failure_unwinds() {
        let (mut token, mut bank) = active_token();
        token.deposit_payout(account(BROKER), 1_000).unwrap();
        bank.issue(account(1), u128::MAX).unwrap();

        let err = token.claim_payout(account(1), 0, &mut bank).unwrap_err();
        assert!(matches!(err, TokenError::TransferFailed(_)));
        assert!(!token.payout(0).unwrap().has_claimed(&account(1)));
        assert_eq!(token.held_value(), 1_000);

        // After the recipient can receive again, the claim goes through.
        bank.withdraw(account(1), u128::MAX).unwrap();
        assert_eq!(token.claim_payout(account(1), 0, &mut bank).unwrap(), 600);
    }

    #[test]
    fn test_dust_stays_in_held_value() {
        let (mut token, custodian) = sample_token();
        let mut bank = Treasury::new();
        // Cap split 333/333/334 so a 100-unit payout cannot divide evenly.
        token.buy(account(1), 333).unwrap();
        token.buy(account(2), 333).unwrap();
        token.buy(account(3), 334).unwrap();
        let att = Attestation::sign(&custodian, "HW7", CAP);
        token.activate(&att, &mut bank).unwrap();

        token.deposit_payout(account(BROKER), 100).unwrap();
        let a = token.claim_payout(account(1), 0, &mut bank).unwrap();
        let b = token.claim_payout(account(2), 0, &mut bank).unwrap();
        let c = token.claim_payout(account(3), 0, &mut bank).unwrap();

        // floor(100 * 333 / 1000) = 33, floor(100 * 334 / 1000) = 33.
        assert_eq!((a, b, c), (33, 33, 33));
        // The un-distributable remainder is stranded, and visible.
        assert_eq!(token.held_value(), 1);
    }

    // -- Serialization ----

    #[test]
    fn serde_roundtrip_drops_events_keeps_state() {
        let (mut token, mut bank) = active_token();
        token.deposit_payout(account(BROKER), 1_000).unwrap();
        token.claim_payout(account(1), 0, &mut bank).unwrap();

        let json = serde_json::to_string(&token).unwrap();
        let mut back: AssetToken = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, token.id);
        assert_eq!(back.stage(), Stage::Active);
        assert_eq!(back.balance_of(&account(1)), 600);
        assert_eq!(back.held_value(), 400);
        assert!(back.payout(0).unwrap().has_claimed(&account(1)));
        // Events are transient and do not survive serialization.
        assert!(back.drain_events().is_empty());
    }
}
