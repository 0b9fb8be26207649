//! # Revenue Payouts
//!
//! When the asset behind a token earns revenue (rent, charter fees,
//! dividends), the broker deposits it as a payout. Each payout is a frozen
//! record of one distribution: how much, deposited by whom, and (crucially)
//! the ledger sequence point and circulating supply at the instant of the
//! deposit. Entitlements settle against that frozen snapshot, so trading
//! after a deposit can never move revenue that was already earned.
//!
//! A holder's share is `floor(deposit * balance / supply)` in base units.
//! Floor division strands the sub-unit remainder of every distribution
//! inside the token permanently; with 18-decimal base units the dust per
//! payout is bounded by the holder count and is economically invisible.

use chrono::{DateTime, Utc};
use keel_core::account::Account;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One revenue distribution against a token.
///
/// The snapshot fields (`sequence_point`, `circulating_at_deposit`) are
/// captured once at deposit time and never change. The claimed set is the
/// only mutable part, and it only grows, except when a failed transfer
/// unwinds the claim that grew it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Account that deposited the revenue.
    pub depositor: Account,
    /// Total deposited amount in base units.
    pub amount: u128,
    /// Ledger sequence at the moment of deposit. Claims settle against
    /// balances as of this point.
    pub sequence_point: u64,
    /// Circulating supply at the moment of deposit. The denominator of
    /// every entitlement.
    pub circulating_at_deposit: u128,
    /// Wall-clock timestamp of the deposit, for reporting only.
    pub deposited_at: DateTime<Utc>,
    /// Accounts that have already claimed their share.
    claimed: HashSet<Account>,
}

impl Payout {
    /// Records a new distribution with the given frozen snapshot.
    pub fn new(
        depositor: Account,
        amount: u128,
        sequence_point: u64,
        circulating_at_deposit: u128,
    ) -> Self {
        Self {
            depositor,
            amount,
            sequence_point,
            circulating_at_deposit,
            deposited_at: Utc::now(),
            claimed: HashSet::new(),
        }
    }

    /// Computes the entitlement for a holder whose balance at the snapshot
    /// point was `balance_at_deposit`.
    ///
    /// Returns `floor(amount * balance / circulating)`, or `None` if the
    /// product overflows u128 even after reducing the fraction. At realistic
    /// supplies the reduction makes overflow unreachable, but the claim path
    /// surfaces `None` as an arithmetic error rather than guessing.
    pub fn entitlement(&self, balance_at_deposit: u128) -> Option<u128> {
        if self.circulating_at_deposit == 0 {
            // Deposits only happen against an active token, whose supply is
            // its (positive) cap. Kept total anyway.
            return Some(0);
        }
        mul_div_floor(self.amount, balance_at_deposit, self.circulating_at_deposit)
    }

    /// Whether the account has already claimed this payout.
    pub fn has_claimed(&self, account: &Account) -> bool {
        self.claimed.contains(account)
    }

    /// Number of accounts that have claimed so far.
    pub fn claim_count(&self) -> usize {
        self.claimed.len()
    }

    pub(crate) fn mark_claimed(&mut self, account: Account) {
        self.claimed.insert(account);
    }

    pub(crate) fn unmark_claimed(&mut self, account: &Account) {
        self.claimed.remove(account);
    }
}

/// `floor(value * numerator / denominator)` without intermediate overflow
/// where mathematically avoidable.
///
/// Cancels `gcd(value, denominator)` and then `gcd(numerator, denominator)`
/// before multiplying. The fraction's value is unchanged by the reduction,
/// so the floor is exact. `denominator` must be nonzero.
fn mul_div_floor(value: u128, numerator: u128, denominator: u128) -> Option<u128> {
    let g = gcd(value, denominator);
    let value = value / g;
    let denominator = denominator / g;

    let g = gcd(numerator, denominator);
    let numerator = numerator / g;
    let denominator = denominator / g;

    Some(value.checked_mul(numerator)? / denominator)
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::config::to_base_units;

    fn account(byte: u8) -> Account {
        Account::from_bytes([byte; 32])
    }

    #[test]
    fn entitlement_is_proportional() {
        let payout = Payout::new(account(9), 1_000, 7, 1_000);
        assert_eq!(payout.entitlement(250), Some(250));
        assert_eq!(payout.entitlement(1_000), Some(1_000));
        assert_eq!(payout.entitlement(0), Some(0));
    }

    #[test]
    fn test_entitlement_floors_dust() {
        // 100 units across 3 holders of 1 token each: 33 each, 1 stranded.
        let payout = Payout::new(account(9), 100, 1, 3);
        assert_eq!(payout.entitlement(1), Some(33));

        let distributed: u128 = 3 * 33;
        assert_eq!(payout.amount - distributed, 1);
    }

    #[test]
    fn test_entitlement_survives_18_decimal_magnitudes() {
        // 1M tokens of supply and a 500k-token holder, in base units.
        // The naive product is ~5 * 10^47, far past u128::MAX, so this
        // only passes because the fraction reduces first.
        let supply = to_base_units(1_000_000);
        let balance = to_base_units(500_000);
        let deposit = to_base_units(1_000_000);

        let payout = Payout::new(account(9), deposit, 1, supply);
        assert_eq!(payout.entitlement(balance), Some(to_base_units(500_000)));
    }

    #[test]
    fn entitlement_with_zero_supply_is_zero() {
        let payout = Payout::new(account(9), 100, 1, 0);
        assert_eq!(payout.entitlement(50), Some(0));
    }

    #[test]
    fn claims_are_tracked() {
        let mut payout = Payout::new(account(9), 100, 1, 10);
        assert!(!payout.has_claimed(&account(1)));

        payout.mark_claimed(account(1));
        assert!(payout.has_claimed(&account(1)));
        assert!(!payout.has_claimed(&account(2)));
        assert_eq!(payout.claim_count(), 1);

        payout.unmark_claimed(&account(1));
        assert!(!payout.has_claimed(&account(1)));
        assert_eq!(payout.claim_count(), 0);
    }

    #[test]
    fn test_mul_div_floor_exact_and_floored() {
        assert_eq!(mul_div_floor(10, 3, 2), Some(15));
        assert_eq!(mul_div_floor(10, 1, 3), Some(3));
        assert_eq!(mul_div_floor(0, 5, 7), Some(0));
        assert_eq!(mul_div_floor(7, 0, 3), Some(0));
    }

    #[test]
    fn test_mul_div_floor_reduces_before_multiplying() {
        // value and denominator share a huge factor; naive multiplication
        // would overflow.
        let big = u128::MAX / 2;
        assert_eq!(mul_div_floor(big, 4, big), Some(4));
        assert_eq!(mul_div_floor(big, big, big), Some(big));
    }

    #[test]
    fn mul_div_floor_overflow_returns_none() {
        // Coprime everywhere: nothing cancels, product genuinely overflows.
        let p = (1u128 << 127) - 1; // 2^127 - 1, a Mersenne prime
        assert_eq!(mul_div_floor(p, p, 3), None);
    }

    #[test]
    fn serde_roundtrip_keeps_claims() {
        let mut payout = Payout::new(account(9), 5_000, 42, 100);
        payout.mark_claimed(account(1));
        payout.mark_claimed(account(2));

        let json = serde_json::to_string(&payout).unwrap();
        let back: Payout = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payout);
        assert!(back.has_claimed(&account(1)));
        assert_eq!(back.claim_count(), 2);
    }
}
