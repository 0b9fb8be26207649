//! Interactive CLI demo of the full asset token lifecycle.
//!
//! Walks through identity creation, broker registration, a crowdfunding
//! round, custodian attestation and activation, secondary trading, and a
//! dividend payout with snapshot claims. The output uses ANSI escape codes
//! for colored, storytelling-style terminal rendering.
//!
//! Run with:
//!   cargo run --example demo --release

use std::time::Instant;

use chrono::{Duration, Utc};

use keel_core::account::Account;
use keel_core::config::{to_base_units, BASE_UNITS_PER_TOKEN};
use keel_core::custody::{verify_activation, Attestation};
use keel_core::keys::KeelKeypair;
use keel_core::treasury::Treasury;
use keel_token::asset_token::{AssetToken, Stage, TokenEvent};
use keel_token::registry::BrokerRegistry;
use keel_token::store::TokenStore;

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const MAGENTA: &str = "\x1b[35m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

const BG_BLUE: &str = "\x1b[44m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn banner() {
    println!();
    println!(
        "{BG_BLUE}{BOLD}{WHITE}                                                                    {RESET}"
    );
    println!(
        "{BG_BLUE}{BOLD}{WHITE}    KEEL  --  Asset Token Lifecycle Demo                            {RESET}"
    );
    println!(
        "{BG_BLUE}{BOLD}{WHITE}    Version 0.1.0  |  Ed25519 + SHA-256 + BLAKE3                    {RESET}"
    );
    println!(
        "{BG_BLUE}{BOLD}{WHITE}                                                                    {RESET}"
    );
    println!();
}

fn section(num: u32, title: &str) {
    println!();
    println!(
        "{BOLD}{CYAN}===[{YELLOW} Step {num} {CYAN}]=============================================================={RESET}"
    );
    println!("{BOLD}{WHITE}  {title}{RESET}");
    println!(
        "{CYAN}------------------------------------------------------------------------{RESET}"
    );
}

fn subsection(text: &str) {
    println!("{DIM}{CYAN}  >> {text}{RESET}");
}

fn success(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn info(label: &str, value: &str) {
    println!("{WHITE}  {BOLD}{label}:{RESET} {YELLOW}{value}{RESET}");
}

fn timing(label: &str, elapsed: std::time::Duration) {
    let ms = elapsed.as_secs_f64() * 1000.0;
    println!("{DIM}{MAGENTA}  [{label}: {ms:.2} ms]{RESET}");
}

fn account_display(name: &str, account: &Account, color: &str) {
    let hex = account.to_hex();
    let prefix = &hex[..6];
    let suffix = &hex[hex.len() - 6..];
    println!("  {color}{BOLD}{name}{RESET}  {DIM}{prefix}...{suffix}{RESET}");
}

fn holding_row(name: &str, balance: u128, color: &str) {
    println!(
        "  {color}{BOLD}{name:<10}{RESET}  {WHITE}{:>12}{RESET} {DIM}tokens{RESET}",
        fmt_tokens(balance)
    );
}

fn separator() {
    println!(
        "{DIM}{CYAN}  . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . {RESET}"
    );
}

/// Renders a base-unit amount as whole tokens with trailing zeros trimmed.
fn fmt_tokens(base_units: u128) -> String {
    let whole = base_units / BASE_UNITS_PER_TOKEN;
    let frac = base_units % BASE_UNITS_PER_TOKEN;
    if frac == 0 {
        format!("{whole}")
    } else {
        let frac_str = format!("{frac:018}");
        format!("{whole}.{}", frac_str.trim_end_matches('0'))
    }
}

fn describe_event(event: &TokenEvent) -> String {
    match event {
        TokenEvent::StageChanged { stage, .. } => format!("stage -> {stage}"),
        TokenEvent::PayoutDeposited { index, amount, .. } => {
            format!("payout {index} deposited ({} tokens)", fmt_tokens(*amount))
        }
        TokenEvent::PayoutClaimed { index, amount, .. } => {
            format!("payout {index} claimed ({} tokens)", fmt_tokens(*amount))
        }
    }
}

fn drain_and_print(token: &mut AssetToken) {
    for event in token.drain_events() {
        println!("  {DIM}{MAGENTA}[event] {}{RESET}", describe_event(&event));
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let demo_start = Instant::now();

    banner();

    // -----------------------------------------------------------------------
    // Step 1: Identity Creation
    // -----------------------------------------------------------------------

    section(1, "Participant Identity Generation");
    subsection("Generating Ed25519 keypairs for every participant...");

    let t = Instant::now();
    let operator_kp = KeelKeypair::generate();
    let custodian_kp = KeelKeypair::generate();
    let broker_kp = KeelKeypair::generate();
    let alice_kp = KeelKeypair::generate();
    let bob_kp = KeelKeypair::generate();
    timing("keygen x5", t.elapsed());

    let operator = operator_kp.account();
    let custodian = custodian_kp.account();
    let broker = broker_kp.account();
    let alice = alice_kp.account();
    let bob = bob_kp.account();

    println!();
    account_display("Operator ", &operator, WHITE);
    account_display("Custodian", &custodian, MAGENTA);
    account_display("Broker   ", &broker, YELLOW);
    account_display("Alice    ", &alice, BLUE);
    account_display("Bob      ", &bob, GREEN);
    println!();
    success("All accounts derived from Ed25519 verifying keys");

    // -----------------------------------------------------------------------
    // Step 2: Platform Bootstrap
    // -----------------------------------------------------------------------

    section(2, "Platform Bootstrap");
    subsection("Opening temporary store, registry, and treasury...");

    let t = Instant::now();
    let store = TokenStore::open_temporary().expect("temporary store");
    let mut registry = BrokerRegistry::new(operator);
    let mut bank = Treasury::new();
    timing("bootstrap", t.elapsed());

    registry.add_broker(operator, broker).unwrap();
    info("Registered brokers", &registry.broker_count().to_string());
    assert!(registry.add_broker(alice, bob).is_err());
    success("Registry rejects non-owner registrations");

    // Fund the backers from the devnet faucet.
    bank.issue(alice, to_base_units(50)).unwrap();
    bank.issue(bob, to_base_units(50)).unwrap();
    success("Backers funded with 50 tokens of treasury value each");

    // -----------------------------------------------------------------------
    // Step 3: Token Creation
    // -----------------------------------------------------------------------

    section(3, "Token Creation: Dockside Storage 12 (DOCK)");

    let cap = to_base_units(10);
    let mut token = AssetToken::new(
        "Dockside Storage 12".into(),
        "DOCK".into(),
        broker,
        custodian,
        Utc::now() + Duration::days(30),
        cap,
    )
    .expect("token creation");

    info("Token id", &token.id.to_hex()[..16]);
    info("Supply cap", &format!("{} tokens", fmt_tokens(cap)));
    info("Stage", &token.stage().to_string());
    drain_and_print(&mut token);
    success("Funding round open for 30 days");

    // -----------------------------------------------------------------------
    // Step 4: Crowdfunding
    // -----------------------------------------------------------------------

    section(4, "Crowdfunding: Alice 4 + Bob 6 tokens");

    subsection("Alice contributes 4 tokens...");
    bank.withdraw(alice, to_base_units(4)).unwrap();
    token.buy(alice, to_base_units(4)).unwrap();
    info("Raised", &fmt_tokens(token.raised()));

    subsection("Bob tries to overshoot with 7 tokens...");
    let err = token.buy(bob, to_base_units(7)).unwrap_err();
    println!("  {YELLOW}  rejected whole: {err}{RESET}");

    subsection("Bob contributes the exact 6-token remainder...");
    bank.withdraw(bob, to_base_units(6)).unwrap();
    token.buy(bob, to_base_units(6)).unwrap();

    drain_and_print(&mut token);
    assert_eq!(token.stage(), Stage::Pending);

    println!();
    println!("  {BOLD}{WHITE}--- Holdings at Cap ---{RESET}");
    holding_row("Alice", token.balance_of(&alice), BLUE);
    holding_row("Bob", token.balance_of(&bob), GREEN);
    println!();
    success("Cap reached exactly; escrow locked pending attestation");

    // -----------------------------------------------------------------------
    // Step 5: Custodian Attestation & Activation
    // -----------------------------------------------------------------------

    section(5, "Custodian Attestation & Activation");
    subsection("An impostor tries to attest...");

    let impostor = KeelKeypair::generate();
    let forged = Attestation::sign(&impostor, "DOCK", cap);
    let rejection = token.activate(&forged, &mut bank).unwrap_err();
    println!("  {YELLOW}  rejected: {rejection}{RESET}");
    assert_eq!(token.stage(), Stage::Pending);

    subsection("The real custodian signs the activation payload...");
    let t = Instant::now();
    let att = Attestation::sign(&custodian_kp, "DOCK", cap);
    verify_activation(&custodian, "DOCK", cap, &att).expect("self-check");
    timing("sign + verify", t.elapsed());
    info("Recovery id", &att.v.to_string());

    let forwarded = token.activate(&att, &mut bank).unwrap();
    drain_and_print(&mut token);
    info(
        "Escrow forwarded to broker",
        &format!("{} tokens of value", fmt_tokens(forwarded)),
    );
    assert_eq!(bank.balance_of(&broker), forwarded);
    success("Token is Active; broker received the full escrow in one transfer");

    // -----------------------------------------------------------------------
    // Step 6: Secondary Trading
    // -----------------------------------------------------------------------

    section(6, "Secondary Trading: Sell & Liquidate");

    subsection("Alice sells 2 tokens into the broker pool...");
    token.sell(alice, to_base_units(2)).unwrap();

    subsection("The broker settles the money leg via liquidate...");
    bank.withdraw(broker, to_base_units(2)).unwrap();
    token
        .liquidate(broker, alice, to_base_units(2), &mut bank)
        .unwrap();

    subsection("Bob tips Alice a single base unit...");
    token.transfer(bob, alice, 1).unwrap();

    separator();
    println!();
    println!("  {BOLD}{WHITE}--- Holdings After Trading ---{RESET}");
    holding_row("Alice", token.balance_of(&alice), BLUE);
    holding_row("Bob", token.balance_of(&bob), GREEN);
    holding_row("Broker", token.balance_of(&broker), YELLOW);
    println!();
    success("Tokens moved to the broker pool; nothing was burned");

    // -----------------------------------------------------------------------
    // Step 7: Dividend Payout & Claims
    // -----------------------------------------------------------------------

    section(7, "Dividend Payout & Snapshot Claims");

    subsection("Broker deposits 1 token of revenue as payout 0...");
    bank.withdraw(broker, to_base_units(1)).unwrap();
    let index = token.deposit_payout(broker, to_base_units(1)).unwrap();
    drain_and_print(&mut token);

    // Snapshot: Alice and the broker near 2 tokens each, Bob just shy of 6.
    let t = Instant::now();
    let alice_share = token.claim_payout(alice, index, &mut bank).unwrap();
    let bob_share = token.claim_payout(bob, index, &mut bank).unwrap();
    let broker_share = token.claim_payout(broker, index, &mut bank).unwrap();
    timing("3x claim", t.elapsed());
    drain_and_print(&mut token);

    info("Alice's share", &fmt_tokens(alice_share));
    info("Bob's share", &fmt_tokens(bob_share));
    info("Broker's share", &fmt_tokens(broker_share));
    info(
        "Dust stranded in held value",
        &format!("{} base units", token.held_value()),
    );

    let repeat = token.claim_payout(bob, index, &mut bank).unwrap_err();
    println!("  {YELLOW}  repeat claim rejected: {repeat}{RESET}");
    success("Shares settled against the deposit-time snapshot");

    // -----------------------------------------------------------------------
    // Step 8: Persistence
    // -----------------------------------------------------------------------

    section(8, "Persistence Roundtrip");
    subsection("Persisting token, registry, and treasury to sled...");

    let t = Instant::now();
    store.put_token(&token).unwrap();
    store.put_registry(&registry).unwrap();
    store.put_treasury(&bank).unwrap();
    timing("persist + flush", t.elapsed());

    let restored = store
        .get_token(&token.id)
        .unwrap()
        .expect("token persisted");
    assert_eq!(restored.stage(), Stage::Active);
    assert_eq!(restored.balance_of(&bob), token.balance_of(&bob));
    assert!(restored.payout(0).unwrap().has_claimed(&alice));
    success("Full aggregate (ledger history included) survived the roundtrip");

    // -----------------------------------------------------------------------
    // Final Summary
    // -----------------------------------------------------------------------

    let total_elapsed = demo_start.elapsed();

    println!();
    println!(
        "{BG_BLUE}{BOLD}{WHITE}                                                                    {RESET}"
    );
    println!(
        "{BG_BLUE}{BOLD}{WHITE}    DEMO COMPLETE -- Final Summary                                  {RESET}"
    );
    println!(
        "{BG_BLUE}{BOLD}{WHITE}                                                                    {RESET}"
    );
    println!();

    println!("  {BOLD}{WHITE}Lifecycle Statistics:{RESET}");
    println!("  {DIM}----------------------------------------------{RESET}");
    info("Identities created", "5 (+1 impostor)");
    info("Stages traversed", "Funding -> Pending -> Active");
    info("Contributions", "2 accepted, 1 rejected at the cap");
    info("Attestations", "1 forged (rejected), 1 genuine (accepted)");
    info("Payouts", "1 deposit, 3 claims, 1 repeat rejected");
    info("Signing algorithm", "Ed25519 (ed25519-dalek 2.1)");
    info("Attestation payload hash", "SHA-256");
    info("Token id derivation", "BLAKE3 (domain-separated)");
    println!();

    println!("  {BOLD}{WHITE}Final Treasury Balances:{RESET}");
    println!("  {DIM}----------------------------------------------{RESET}");
    holding_row("Alice", bank.balance_of(&alice), BLUE);
    holding_row("Bob", bank.balance_of(&bob), GREEN);
    holding_row("Broker", bank.balance_of(&broker), YELLOW);

    // Conservation: faucet issuance stays in the system, split between
    // treasury balances and the token's held dust.
    let issued = to_base_units(100);
    let in_treasury =
        bank.balance_of(&alice) + bank.balance_of(&bob) + bank.balance_of(&broker);
    println!();
    println!(
        "  {DIM}Conservation check: {} in treasury + {} held dust = {} issued{RESET}",
        fmt_tokens(in_treasury),
        token.held_value(),
        fmt_tokens(issued)
    );
    assert_eq!(in_treasury + token.held_value(), issued);

    println!();
    println!(
        "  {BOLD}{GREEN}Total demo time: {:.2}s{RESET}",
        total_elapsed.as_secs_f64()
    );
    println!();
}
