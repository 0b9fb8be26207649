//! # Treasury: External Value Accounting
//!
//! Tokens are bookkeeping; at some point actual money has to move. The
//! [`Treasury`] is the boundary where that happens: a ledger of withdrawable
//! value per account, denominated in the same 18-decimal base units as
//! everything else.
//!
//! In production this sits in front of the settlement rails (custodian bank
//! accounts, payment processors). On devnet it's an in-memory book with a
//! faucet. Either way, token state machines only ever touch it through
//! [`send`](Treasury::send): value flows *out* of a token exactly once per
//! operation, as the last thing the operation does, and a failed send fails
//! loudly so the caller can unwind.
//!
//! Collecting value *in* (contributions, payout deposits) is the hosting
//! layer's job, via [`withdraw`](Treasury::withdraw) on the payer before the
//! token operation runs. The state machines never see inbound money, only
//! the amounts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::account::Account;

/// Errors that can occur while moving value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The paying account does not hold enough value.
    #[error("insufficient funds: account {account} has {available}, requested {requested}")]
    InsufficientFunds {
        /// The account being debited.
        account: Account,
        /// What the account actually holds.
        available: u128,
        /// What the caller asked for.
        requested: u128,
    },

    /// Crediting the recipient would overflow its balance.
    #[error("balance overflow crediting account {account}")]
    BalanceOverflow {
        /// The account being credited.
        account: Account,
    },
}

/// The external value book: who can withdraw how much.
///
/// Absent accounts hold zero. There is no account creation step; crediting
/// an account brings it into existence, and zeroing it is indistinguishable
/// from it never having existed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Treasury {
    balances: HashMap<Account, u128>,
}

impl Treasury {
    /// Creates an empty treasury.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the withdrawable balance of an account, zero if unknown.
    pub fn balance_of(&self, account: &Account) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Credits freshly issued value to an account.
    ///
    /// This is the faucet end: devnet funding, test setup, and (in
    /// production) the adapter's acknowledgement of an inbound wire.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::BalanceOverflow`] if the credit would
    /// overflow the account's u128 balance.
    pub fn issue(&mut self, account: Account, amount: u128) -> Result<(), TransferError> {
        let balance = self.balances.entry(account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(TransferError::BalanceOverflow { account })?;
        Ok(())
    }

    /// Debits an account, removing value from the book.
    ///
    /// The hosting layer calls this on the payer before running a token
    /// operation that carries value in. If the operation then fails, the
    /// host re-credits via [`issue`](Self::issue).
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InsufficientFunds`] if the account holds
    /// less than `amount`.
    pub fn withdraw(&mut self, account: Account, amount: u128) -> Result<(), TransferError> {
        let available = self.balance_of(&account);
        if available < amount {
            return Err(TransferError::InsufficientFunds {
                account,
                available,
                requested: amount,
            });
        }
        self.balances.insert(account, available - amount);
        Ok(())
    }

    /// Pushes value out to a recipient. The one primitive token state
    /// machines call.
    ///
    /// Token operations invoke this exactly once, after all their own
    /// bookkeeping is committed. A send that fails must fail loudly; the
    /// caller unwinds its bookkeeping in response, never the other way
    /// around.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::BalanceOverflow`] if crediting the recipient
    /// would overflow.
    pub fn send(&mut self, to: Account, amount: u128) -> Result<(), TransferError> {
        let balance = self.balances.entry(to).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(TransferError::BalanceOverflow { account: to })?;
        Ok(())
    }
}
