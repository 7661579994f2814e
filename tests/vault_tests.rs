// Vault share accounting against the documented numeric sequence: nav folds
// in fed upnl, mints and payouts truncate at share precision, locks gate
// every movement.

use perps_settlement::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const LOCK_MS: i64 = 3 * DAY_MS;

const A: Trader = Trader(1);
const R: Trader = Trader(2);
const R1: Trader = Trader(3);
const R2: Trader = Trader(4);

fn t(ms: i64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn setup() -> (Vault, Wallet) {
    let mut wallet = Wallet::new();
    for trader in [A, R, R1, R2] {
        wallet.mint(trader, Usdt::new(dec!(100_000)));
        wallet.approve(trader, Spender::Vault, Usdt::new(dec!(100_000)));
    }
    (Vault::new(LOCK_MS), wallet)
}

fn run_deposit(
    vault: &mut Vault,
    wallet: &mut Wallet,
    from: Trader,
    amount: Decimal,
    beneficiary: Trader,
    upnl: Decimal,
    now: Timestamp,
) -> Decimal {
    let id = vault.apply_deposit(from, Usdt::new(amount), beneficiary).unwrap();
    vault
        .run_deposit(wallet, id, Usdt::new(upnl), 0, 0, now)
        .unwrap()
        .shares_minted
}

fn run_withdraw(
    vault: &mut Vault,
    wallet: &mut Wallet,
    from: Trader,
    shares: Decimal,
    beneficiary: Trader,
    upnl: Decimal,
    now: Timestamp,
) -> Decimal {
    let id = vault
        .apply_withdraw(from, shares, beneficiary, now)
        .unwrap();
    vault
        .run_withdraw(wallet, id, Usdt::new(upnl), 0, 0, now)
        .unwrap()
        .payout
        .value()
}

// the worked sequence: deposits, upnl-shifted withdrawals, gated transfers,
// realized pnl injection, and a final full drain back to zero.
#[test]
fn nav_sequence_with_transfers_and_upnl() {
    let (mut vault, mut wallet) = setup();

    // A stakes 100 for R
    let minted = run_deposit(&mut vault, &mut wallet, A, dec!(100), R, dec!(0), t(0));
    assert_eq!(minted, dec!(100));

    // locked: R can move nothing yet
    assert!(matches!(
        vault.transfer(R, R1, dec!(79), t(LOCK_MS - 1)),
        Err(VaultError::InsufficientUnlocked { .. })
    ));

    let now = t(LOCK_MS);
    vault.transfer(R, R1, dec!(79), now).unwrap();

    // R redeems 20 while traders are up 5: 20 * (100-5)/100 = 19
    let payout = run_withdraw(&mut vault, &mut wallet, R, dec!(20), R, dec!(5), now);
    assert_eq!(payout, dec!(19));
    assert_eq!(vault.total_assets().value(), dec!(81));
    assert_eq!(vault.total_supply(), dec!(80));

    // shares shuffle around unlocked
    vault.transfer(R1, R, dec!(44), now).unwrap();
    vault.transfer(R1, R2, dec!(10), now).unwrap();
    vault.transfer(R, A, dec!(17), now).unwrap();

    // A redeems 17 while traders are down 8: 17 * (81+8)/80 = 18.9125
    let payout = run_withdraw(&mut vault, &mut wallet, A, dec!(17), A, dec!(-8), now);
    assert_eq!(payout, dec!(18.9125));
    assert_eq!(vault.total_assets().value(), dec!(62.0875));
    assert_eq!(vault.total_supply(), dec!(63));

    // R2 stakes 50 against -5 upnl: 50 * 63 / 67.0875 = 46.953605 shares
    let minted = run_deposit(&mut vault, &mut wallet, R2, dec!(50), R2, dec!(-5), now);
    assert_eq!(minted, dec!(46.953605));
    assert_eq!(vault.balance_of(R2), dec!(56.953605));
    assert_eq!(vault.total_supply(), dec!(109.953605));
    assert_eq!(vault.total_assets().value(), dec!(112.0875));

    // R redeems 28 against -3: 28 * 115.0875 / 109.953605 = 29.307361
    let payout = run_withdraw(&mut vault, &mut wallet, R, dec!(28), R, dec!(-3), now);
    assert_eq!(payout, dec!(29.307361));
    assert_eq!(vault.total_assets().value(), dec!(82.780139));
    assert_eq!(vault.total_supply(), dec!(81.953605));

    // settlement pushes 10 of realized losses into the pool
    vault.receive_assets(Usdt::new(dec!(10)));
    assert_eq!(vault.total_assets().value(), dec!(92.780139));

    // R1 redeems 25 against -3: 25 * 95.780139 / 81.953605 = 29.217793
    let payout = run_withdraw(&mut vault, &mut wallet, R1, dec!(25), R1, dec!(-3), now);
    assert_eq!(payout, dec!(29.217793));
    assert_eq!(vault.total_supply(), dec!(56.953605));

    // R2's deposit lock expires, the pool drains exactly to zero
    let end = t(LOCK_MS * 2 + 1);
    let payout = run_withdraw(&mut vault, &mut wallet, R2, dec!(56.953605), A, dec!(0), end);
    assert_eq!(payout, dec!(63.562346));
    assert_eq!(vault.total_assets().value(), dec!(0));
    assert_eq!(vault.total_supply(), dec!(0));
}

#[test]
fn deposit_round_trip_at_unit_nav() {
    let (mut vault, mut wallet) = setup();

    run_deposit(&mut vault, &mut wallet, A, dec!(5000), A, dec!(0), t(0));
    let payout = run_withdraw(&mut vault, &mut wallet, A, dec!(5000), A, dec!(0), t(LOCK_MS));
    assert_eq!(payout, dec!(5000));
    assert_eq!(wallet.balance(A).value(), dec!(100_000));
}

#[test]
fn partial_unlock_blocks_the_remainder() {
    let (mut vault, mut wallet) = setup();

    run_deposit(&mut vault, &mut wallet, A, dec!(100), R, dec!(0), t(0));
    run_deposit(&mut vault, &mut wallet, A, dec!(100), R, dec!(0), t(LOCK_MS / 2));

    // half way: only the first tranche is free
    let now = t(LOCK_MS);
    assert_eq!(vault.unlocked_balance(R, now), dec!(100));
    assert!(matches!(
        vault.apply_withdraw(R, dec!(200), R, now),
        Err(VaultError::InsufficientUnlocked { .. })
    ));

    let payout = run_withdraw(&mut vault, &mut wallet, R, dec!(100), R, dec!(0), now);
    assert_eq!(payout, dec!(100));

    // after the second duration everything is free
    let later = t(LOCK_MS + LOCK_MS / 2);
    assert_eq!(vault.unlocked_balance(R, later), dec!(100));
}

#[test]
fn apply_queue_allows_one_per_direction() {
    let (mut vault, mut wallet) = setup();

    vault.apply_deposit(A, Usdt::new(dec!(100)), A).unwrap();
    assert!(matches!(
        vault.apply_deposit(A, Usdt::new(dec!(50)), A),
        Err(VaultError::OutstandingApply)
    ));

    // a deposit apply does not block a withdraw apply
    run_deposit(&mut vault, &mut wallet, R, dec!(100), A, dec!(0), t(0));
    let id = vault.outstanding_deposit(A).unwrap();
    vault
        .apply_withdraw(A, dec!(50), A, t(LOCK_MS))
        .unwrap();
    vault.cancel_apply(A, id).unwrap();
    assert_eq!(vault.outstanding_deposit(A), None);
}

#[test]
fn cancelled_request_cannot_run() {
    let (mut vault, mut wallet) = setup();

    let id = vault.apply_deposit(A, Usdt::new(dec!(100)), A).unwrap();
    vault.cancel_apply(A, id).unwrap();

    let result = vault.run_deposit(&mut wallet, id, Usdt::zero(), 0, 0, t(0));
    assert_eq!(result.unwrap_err(), VaultError::RequestIdNotFound);
}

#[test]
fn upnl_proof_checked_against_settlement_sequence() {
    let (mut vault, mut wallet) = setup();
    let id = vault.apply_deposit(A, Usdt::new(dec!(100)), A).unwrap();

    // the ledger has advanced to 3; stale and future proofs both fail
    assert_eq!(
        vault
            .run_deposit(&mut wallet, id, Usdt::zero(), 2, 3, t(0))
            .unwrap_err(),
        VaultError::UpnlVerifyFailed
    );
    assert_eq!(
        vault
            .run_deposit(&mut wallet, id, Usdt::zero(), 4, 3, t(0))
            .unwrap_err(),
        VaultError::UpnlVerifyFailed
    );
    vault
        .run_deposit(&mut wallet, id, Usdt::zero(), 3, 3, t(0))
        .unwrap();
}

#[test]
fn failed_pull_leaves_the_request_pending() {
    let mut vault = Vault::new(LOCK_MS);
    let mut wallet = Wallet::new();
    wallet.mint(A, Usdt::new(dec!(100)));
    // no approval yet

    let id = vault.apply_deposit(A, Usdt::new(dec!(100)), A).unwrap();
    let result = vault.run_deposit(&mut wallet, id, Usdt::zero(), 0, 0, t(0));
    assert!(matches!(result, Err(VaultError::Custody(_))));

    // approve and retry the same request id
    wallet.approve(A, Spender::Vault, Usdt::new(dec!(100)));
    vault.run_deposit(&mut wallet, id, Usdt::zero(), 0, 0, t(0)).unwrap();
}
