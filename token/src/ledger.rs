//! # Token Ledger
//!
//! Balances for one asset token, with a twist: every balance change appends
//! a sequence-numbered snapshot entry, so the ledger can answer "what did
//! this account hold as of sequence N" long after the balance has moved on.
//!
//! Payouts are why. A revenue distribution is settled against holdings *at
//! the moment of deposit*, not at claim time; otherwise you could buy
//! tokens after the deposit and claim a share of revenue you never financed.
//! The sequence counter is the ledger's own logical clock: it advances once
//! per snapshot entry and has no relationship to wall time.
//!
//! The ledger is deliberately dumb about *why* balances change. Stage rules,
//! caps, deadlines, and authorization all live in
//! [`asset_token`](crate::asset_token); this module only enforces that
//! arithmetic never lies.

use keel_core::account::Account;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during ledger operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The debited account does not hold enough tokens.
    #[error("insufficient balance: account {account} holds {available}, requested {requested}")]
    InsufficientBalance {
        /// The account being debited.
        account: Account,
        /// What the account actually holds.
        available: u128,
        /// What the caller asked for.
        requested: u128,
    },

    /// Crediting the account would overflow its u128 balance.
    #[error("balance overflow crediting account {account}")]
    BalanceOverflow {
        /// The account being credited.
        account: Account,
    },

    /// The credit would overflow the circulating supply counter.
    #[error("circulating supply overflow")]
    SupplyOverflow,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One entry in an account's balance history: the balance that held from
/// sequence `seq` until the account's next entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// The ledger sequence at which this balance took effect.
    pub seq: u64,
    /// The account's balance from that sequence onward.
    pub balance: u128,
}

/// Balances plus per-account snapshot history for one token.
///
/// Invariants maintained by every operation:
///
/// - `circulating` equals the sum of all stored balances.
/// - Per-account history is strictly increasing in `seq`.
/// - No account is stored with a zero balance (zeroed accounts are removed,
///   their history retained).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    balances: HashMap<Account, u128>,
    history: HashMap<Account, Vec<SnapshotEntry>>,
    seq: u64,
    circulating: u128,
}

impl Ledger {
    /// Creates an empty ledger at sequence zero.
    pub fn new() -> Self {
        Self::default()
    }

    // -- Reads ----

    /// Current balance of an account, zero if unknown.
    pub fn balance_of(&self, account: &Account) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Total tokens currently in circulation.
    pub fn circulating(&self) -> u128 {
        self.circulating
    }

    /// The latest assigned sequence number. Zero means no entry has ever
    /// been recorded.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Number of accounts holding a nonzero balance.
    pub fn holder_count(&self) -> usize {
        self.balances.values().filter(|b| **b > 0).count()
    }

    /// The balance an account held as of sequence `as_of`.
    ///
    /// Sequence 0 predates every entry, so `balance_at(acc, 0)` is always
    /// zero. For later sequences this returns the balance set by the last
    /// entry at or before `as_of`.
    pub fn balance_at(&self, account: &Account, as_of: u64) -> u128 {
        match self.history.get(account) {
            None => 0,
            Some(entries) => {
                // History is sorted by seq, so the answer is the entry just
                // before the partition point.
                let idx = entries.partition_point(|e| e.seq <= as_of);
                if idx == 0 {
                    0
                } else {
                    entries[idx - 1].balance
                }
            }
        }
    }

    // -- Writes ----

    /// Credits tokens to an account.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::BalanceOverflow`] or
    /// [`LedgerError::SupplyOverflow`] if either counter would overflow.
    /// Nothing is recorded on failure.
    pub fn credit(&mut self, account: Account, amount: u128) -> Result<(), LedgerError> {
        let new_balance = self
            .balance_of(&account)
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow { account })?;
        let new_circulating = self
            .circulating
            .checked_add(amount)
            .ok_or(LedgerError::SupplyOverflow)?;

        self.balances.insert(account, new_balance);
        self.circulating = new_circulating;
        self.record(account, new_balance);
        Ok(())
    }

    /// Debits tokens from an account, removing them from circulation.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientBalance`] if the account holds
    /// less than `amount`. Nothing is recorded on failure.
    pub fn debit(&mut self, account: Account, amount: u128) -> Result<(), LedgerError> {
        let balance = self.balance_of(&account);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account,
                available: balance,
                requested: amount,
            });
        }

        let new_balance = balance - amount;
        if new_balance == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, new_balance);
        }
        // amount <= balance <= circulating by the sum invariant.
        self.circulating -= amount;
        self.record(account, new_balance);
        Ok(())
    }

    /// Moves tokens between two accounts.
    ///
    /// Validates both sides before touching either, so a failed transfer
    /// leaves no trace. A successful transfer appends two snapshot entries
    /// (sender first, then recipient) with consecutive sequence numbers.
    /// Transferring to oneself is legal and nets out to no balance change.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientBalance`] if `from` holds less
    /// than `amount`, or [`LedgerError::BalanceOverflow`] if crediting `to`
    /// would overflow.
    pub fn transfer(&mut self, from: Account, to: Account, amount: u128) -> Result<(), LedgerError> {
        let from_balance = self.balance_of(&from);
        if from_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from,
                available: from_balance,
                requested: amount,
            });
        }
        if from != to {
            self.balance_of(&to)
                .checked_add(amount)
                .ok_or(LedgerError::BalanceOverflow { account: to })?;
        }

        let from_new = from_balance - amount;
        if from_new == 0 {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, from_new);
        }
        self.record(from, from_new);

        // Read again instead of reusing from_balance: for a self-transfer
        // the slot was just updated above.
        let to_new = self.balance_of(&to) + amount;
        self.balances.insert(to, to_new);
        self.record(to, to_new);

        // The transient sender-debited state between the two entries can
        // never become a payout snapshot point: deposits capture the
        // sequence only between whole operations.
        Ok(())
    }

    /// Forfeits an account's entire balance, removing it from circulation.
    ///
    /// Returns the forfeited amount. A zero-balance account forfeits
    /// nothing and records nothing; the call is a no-op, not an error.
    pub fn zero(&mut self, account: Account) -> u128 {
        let balance = self.balance_of(&account);
        if balance == 0 {
            return 0;
        }
        self.balances.remove(&account);
        // balance <= circulating by the sum invariant.
        self.circulating -= balance;
        self.record(account, 0);
        balance
    }

    /// Reverts the most recent snapshot entry for `account`, restoring
    /// `previous_balance`.
    ///
    /// Sound only when the popped entry is the latest entry in the whole
    /// ledger, which it is for the one caller: unwinding a [`zero`] whose
    /// follow-up transfer failed, under the hosting layer's single-writer
    /// discipline.
    pub(crate) fn rollback_last(&mut self, account: Account, previous_balance: u128) {
        if let Some(entries) = self.history.get_mut(&account) {
            entries.pop();
            if entries.is_empty() {
                self.history.remove(&account);
            }
        }
        self.seq -= 1;
        if previous_balance > 0 {
            self.balances.insert(account, previous_balance);
            self.circulating += previous_balance;
        }
    }

    fn record(&mut self, account: Account, balance: u128) {
        self.seq += 1;
        self.history
            .entry(account)
            .or_default()
            .push(SnapshotEntry {
                seq: self.seq,
                balance,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(byte: u8) -> Account {
        Account::from_bytes([byte; 32])
    }

    #[test]
    fn credit_updates_balance_and_circulating() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        ledger.credit(account(1), 50).unwrap();
        ledger.credit(account(2), 25).unwrap();

        assert_eq!(ledger.balance_of(&account(1)), 150);
        assert_eq!(ledger.balance_of(&account(2)), 25);
        assert_eq!(ledger.circulating(), 175);
        assert_eq!(ledger.holder_count(), 2);
    }

    #[test]
    fn sequence_advances_once_per_entry() {
        let mut ledger = Ledger::new();
        assert_eq!(ledger.sequence(), 0);

        ledger.credit(account(1), 100).unwrap();
        assert_eq!(ledger.sequence(), 1);

        // A transfer writes two entries.
        ledger.transfer(account(1), account(2), 40).unwrap();
        assert_eq!(ledger.sequence(), 3);
    }

    #[test]
    fn debit_removes_from_circulation() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        ledger.debit(account(1), 30).unwrap();

        assert_eq!(ledger.balance_of(&account(1)), 70);
        assert_eq!(ledger.circulating(), 70);
        // The debit appended its own snapshot entry.
        assert_eq!(ledger.balance_at(&account(1), 1), 100);
        assert_eq!(ledger.balance_at(&account(1), 2), 70);
    }

    #[test]
    fn test_debit_insufficient_rejected_without_mutation() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        let seq_before = ledger.sequence();

        let err = ledger.debit(account(1), 150).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: account(1),
                available: 100,
                requested: 150,
            }
        );
        assert_eq!(ledger.balance_of(&account(1)), 100);
        assert_eq!(ledger.circulating(), 100);
        assert_eq!(ledger.sequence(), seq_before);
    }

    #[test]
    fn debit_of_full_balance_removes_holder() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        ledger.debit(account(1), 100).unwrap();

        assert_eq!(ledger.holder_count(), 0);
        assert_eq!(ledger.balance_of(&account(1)), 0);
    }

    #[test]
    fn transfer_moves_balance() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        ledger.transfer(account(1), account(2), 30).unwrap();

        assert_eq!(ledger.balance_of(&account(1)), 70);
        assert_eq!(ledger.balance_of(&account(2)), 30);
        assert_eq!(ledger.circulating(), 100);
    }

    #[test]
    fn test_transfer_insufficient_rejected_without_mutation() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        let seq_before = ledger.sequence();

        let err = ledger.transfer(account(1), account(2), 101).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: account(1),
                available: 100,
                requested: 101,
            }
        );
        assert_eq!(ledger.balance_of(&account(1)), 100);
        assert_eq!(ledger.balance_of(&account(2)), 0);
        assert_eq!(ledger.sequence(), seq_before);
    }

    #[test]
    fn self_transfer_is_a_safe_noop() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        ledger.transfer(account(1), account(1), 100).unwrap();

        assert_eq!(ledger.balance_of(&account(1)), 100);
        assert_eq!(ledger.circulating(), 100);
        // Still two history entries, like any other transfer.
        assert_eq!(ledger.sequence(), 3);
    }

    #[test]
    fn transfer_of_full_balance_removes_holder() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        ledger.transfer(account(1), account(2), 100).unwrap();
        assert_eq!(ledger.holder_count(), 1);
        assert_eq!(ledger.balance_of(&account(1)), 0);
    }

    #[test]
    fn zero_forfeits_everything() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 300).unwrap();
        ledger.credit(account(2), 700).unwrap();

        let forfeited = ledger.zero(account(1));
        assert_eq!(forfeited, 300);
        assert_eq!(ledger.balance_of(&account(1)), 0);
        assert_eq!(ledger.circulating(), 700);
        assert_eq!(ledger.holder_count(), 1);
    }

    #[test]
    fn zero_on_empty_account_records_nothing() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        let seq_before = ledger.sequence();

        assert_eq!(ledger.zero(account(9)), 0);
        assert_eq!(ledger.sequence(), seq_before);
    }

    #[test]
    fn test_balance_at_sequence_zero_is_zero() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 500).unwrap();
        assert_eq!(ledger.balance_at(&account(1), 0), 0);
    }

    #[test]
    fn test_balance_at_tracks_history() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap(); // seq 1
        ledger.credit(account(2), 900).unwrap(); // seq 2
        ledger.credit(account(1), 50).unwrap(); // seq 3
        ledger.transfer(account(1), account(2), 120).unwrap(); // seq 4, 5

        assert_eq!(ledger.balance_at(&account(1), 1), 100);
        // Sequence 2 belongs to another account's entry; account 1 is
        // unchanged there.
        assert_eq!(ledger.balance_at(&account(1), 2), 100);
        assert_eq!(ledger.balance_at(&account(1), 3), 150);
        assert_eq!(ledger.balance_at(&account(1), 4), 30);
        assert_eq!(ledger.balance_at(&account(1), 5), 30);
        // Beyond the last entry, the latest balance holds.
        assert_eq!(ledger.balance_at(&account(1), 999), 30);

        assert_eq!(ledger.balance_at(&account(2), 4), 900);
        assert_eq!(ledger.balance_at(&account(2), 5), 1020);
    }

    #[test]
    fn balance_at_unknown_account_is_zero() {
        let ledger = Ledger::new();
        assert_eq!(ledger.balance_at(&account(7), 100), 0);
    }

    #[test]
    fn test_rollback_last_undoes_zero() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 400).unwrap();
        ledger.credit(account(2), 600).unwrap();
        let seq_before = ledger.sequence();

        let forfeited = ledger.zero(account(1));
        assert_eq!(forfeited, 400);

        ledger.rollback_last(account(1), forfeited);
        assert_eq!(ledger.balance_of(&account(1)), 400);
        assert_eq!(ledger.circulating(), 1_000);
        assert_eq!(ledger.sequence(), seq_before);
        // History must look like the zero never happened.
        assert_eq!(ledger.balance_at(&account(1), seq_before), 400);
    }

    #[test]
    fn credit_overflow_rejected() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), u128::MAX).unwrap();
        let err = ledger.credit(account(2), 1).unwrap_err();
        assert_eq!(err, LedgerError::SupplyOverflow);
    }

    #[test]
    fn serde_roundtrip_preserves_history() {
        let mut ledger = Ledger::new();
        ledger.credit(account(1), 100).unwrap();
        ledger.transfer(account(1), account(2), 40).unwrap();

        let json = serde_json::to_string(&ledger).unwrap();
        let back: Ledger = serde_json::from_str(&json).unwrap();

        assert_eq!(back.balance_of(&account(1)), 60);
        assert_eq!(back.balance_of(&account(2)), 40);
        assert_eq!(back.sequence(), ledger.sequence());
        assert_eq!(back.balance_at(&account(1), 1), 100);
    }
}
