//! # Broker Registry
//!
//! Governance of which accounts are eligible to act as brokers. The registry
//! is owned by the platform operator; only the owner can register new
//! brokers, and the hosting layer consults the registry when a token is
//! created. The token state machines themselves never look at it; once a
//! token is constructed, it trusts the single broker account it was given.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use keel_core::account::Account;

/// Errors raised by registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The caller is not the registry owner.
    #[error("account {account} is not the registry owner")]
    Unauthorized {
        /// The rejected caller.
        account: Account,
    },

    /// The broker is already registered.
    #[error("broker {account} is already registered")]
    DuplicateBroker {
        /// The account that was submitted twice.
        account: Account,
    },
}

/// The owner-gated list of authorized broker accounts.
///
/// Brokers are kept in registration order. The owner is fixed at
/// construction; there is no ownership transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerRegistry {
    owner: Account,
    brokers: Vec<Account>,
}

impl BrokerRegistry {
    /// Creates an empty registry owned by `owner`.
    pub fn new(owner: Account) -> Self {
        Self {
            owner,
            brokers: Vec::new(),
        }
    }

    /// The account that controls this registry.
    pub fn owner(&self) -> Account {
        self.owner
    }

    /// Registers a new broker.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unauthorized`] if `caller` is not the owner
    /// and [`RegistryError::DuplicateBroker`] if the account is already
    /// registered.
    pub fn add_broker(&mut self, caller: Account, broker: Account) -> Result<(), RegistryError> {
        if caller != self.owner {
            return Err(RegistryError::Unauthorized { account: caller });
        }
        if self.brokers.contains(&broker) {
            return Err(RegistryError::DuplicateBroker { account: broker });
        }
        self.brokers.push(broker);
        info!(broker = %broker, "broker registered");
        Ok(())
    }

    /// Whether `account` is a registered broker.
    pub fn is_broker(&self, account: &Account) -> bool {
        self.brokers.contains(account)
    }

    /// All registered brokers, in registration order.
    pub fn brokers(&self) -> &[Account] {
        &self.brokers
    }

    /// Number of registered brokers.
    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }
}
