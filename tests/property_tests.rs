// Property tests over the money math: fee determinism, the profit clamp,
// cash conservation through settlement, and vault round trips.

use perps_settlement::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const GOV: Trader = Trader(100);
const MANAGER: Trader = Trader(101);
const PNL_FEED: Trader = Trader(102);
const BOT: Trader = Trader(103);
const LP: Trader = Trader(200);

const ETH: PairIndex = PairIndex(1);

const OPEN_FEE_P: Pct = Pct::new(800_000_000);
const MAX_GAIN: Pct = Pct::new(900 * 10_000_000_000);
const LIQ_THRESHOLD: Pct = Pct::new(10 * 10_000_000_000);

fn usdt(cents: i64) -> Usdt {
    Usdt::new(Decimal::new(cents, 2))
}

fn price(cents: i64) -> Price {
    Price::new_unchecked(Decimal::new(cents, 2))
}

fn engine_for_cycle() -> Engine {
    let mut policy = Policy::new(GOV, MANAGER, PNL_FEED);
    policy.add_bot(BOT);
    let mut engine = Engine::new(
        EngineConfig::default(),
        pairs::default_listing(),
        policy,
        vec![NodeId(0)],
    );
    engine.set_time(Timestamp::from_millis(1_000));

    engine.mint(LP, Usdt::new(dec!(10_000_000)));
    engine.approve(LP, Spender::Vault, Usdt::new(dec!(10_000_000)));
    let id = engine.apply_deposit(LP, Usdt::new(dec!(10_000_000)), LP).unwrap();
    engine.run_deposit(PNL_FEED, id, Usdt::zero(), 0).unwrap();
    engine
}

proptest! {
    // stored collateral after the open fee is exactly C - C*L*F
    #[test]
    fn open_fee_is_deterministic(
        collateral_cents in 10_000i64..100_000_000,
        leverage in 2i64..=100,
    ) {
        let c = usdt(collateral_cents);
        let lev = Leverage::new(Decimal::from(leverage)).unwrap();

        let fee = pnl::leveraged_fee(c, lev, OPEN_FEE_P);
        prop_assert_eq!(
            fee.value(),
            c.value() * Decimal::from(leverage) * dec!(0.0008)
        );
    }

    // percent profit never exceeds the clamp, on either side
    #[test]
    fn profit_clamp_holds(
        open_cents in 1_000i64..10_000_000,
        close_cents in 1_000i64..100_000_000,
        leverage in 2i64..=100,
    ) {
        let lev = Leverage::new(Decimal::from(leverage)).unwrap();

        for side in [Side::Long, Side::Short] {
            let p = pnl::percent_profit(price(open_cents), price(close_cents), side, lev, MAX_GAIN);
            prop_assert!(p <= dec!(900));
        }
    }

    // a close never pays more than the clamp allows and never goes negative
    #[test]
    fn close_payout_bounded(
        collateral_cents in 10_000i64..10_000_000,
        open_cents in 10_000i64..1_000_000,
        close_cents in 10_000i64..10_000_000,
        leverage in 2i64..=100,
    ) {
        let c = usdt(collateral_cents);
        let lev = Leverage::new(Decimal::from(leverage)).unwrap();

        let b = pnl::close_breakdown(
            c, lev, price(open_cents), price(close_cents), Side::Long,
            Usdt::zero(), Usdt::zero(), OPEN_FEE_P, MAX_GAIN, LIQ_THRESHOLD,
        );

        prop_assert!(b.usdt_sent_to_trader.value() >= Decimal::ZERO);
        prop_assert!(b.usdt_sent_to_trader.value() <= c.value() * dec!(10));
    }

    // payout + vault flow + retained fees always reassemble the collateral
    #[test]
    fn close_flows_conserve_collateral(
        collateral_cents in 10_000i64..10_000_000,
        open_cents in 10_000i64..1_000_000,
        close_cents in 10_000i64..10_000_000,
        leverage in 2i64..=100,
    ) {
        let c = usdt(collateral_cents);
        let lev = Leverage::new(Decimal::from(leverage)).unwrap();

        let b = pnl::close_breakdown(
            c, lev, price(open_cents), price(close_cents), Side::Long,
            Usdt::zero(), Usdt::zero(), OPEN_FEE_P, MAX_GAIN, LIQ_THRESHOLD,
        );

        let reassembled = b.usdt_sent_to_trader
            .add(b.net_vault_flow(c))
            .add(b.closing_fee)
            .add(b.rollover_fee);
        prop_assert_eq!(reassembled.value(), c.value());
    }

    // no cash appears or vanishes across a full open-close cycle
    #[test]
    fn settlement_cycle_conserves_cash(close_cents in 150_000i64..260_000) {
        let mut engine = engine_for_cycle();

        let trader = Trader(1);
        engine.mint(trader, Usdt::new(dec!(1000)));
        engine.approve(trader, Spender::Ledger, Usdt::new(dec!(1000)));

        let total_before = engine.balance(trader)
            .add(engine.ledger_cash())
            .add(engine.vault().total_assets());

        let open_price = Price::new_unchecked(dec!(2000));
        let placement = engine.open_trade(
            trader,
            OpenOrder {
                trader,
                pair_index: ETH,
                collateral: Usdt::new(dec!(1000)),
                wanted_price: open_price,
                side: Side::Long,
                leverage: Leverage::new(dec!(10)).unwrap(),
                tp: None,
                sl: None,
                referral_code: 0,
            },
            OrderType::Market,
            Pct::percent(1),
        ).unwrap();

        let open_id = placement.request_id().unwrap();
        engine.drain_node_requests();
        engine.submit_price_answer(NodeId(0), open_id, vec![open_price]).unwrap();

        let close_id = engine.close_trade_market(trader, ETH, TradeIndex(0)).unwrap();
        engine.drain_node_requests();
        engine.submit_price_answer(NodeId(0), close_id, vec![price(close_cents)]).unwrap();

        let total_after = engine.balance(trader)
            .add(engine.ledger_cash())
            .add(engine.vault().total_assets());

        prop_assert_eq!(total_after.value(), total_before.value());
        prop_assert_eq!(engine.open_trades_count(trader, ETH), 0);
    }

    // depositing then withdrawing everything at unchanged upnl returns the
    // deposit exactly
    #[test]
    fn vault_round_trip_is_exact(amount_cents in 100i64..1_000_000_000) {
        let mut vault = Vault::new(0);
        let mut wallet = Wallet::new();

        let amount = usdt(amount_cents);
        wallet.mint(Trader(1), amount);
        wallet.approve(Trader(1), Spender::Vault, amount);

        let now = Timestamp::from_millis(0);
        let id = vault.apply_deposit(Trader(1), amount, Trader(1)).unwrap();
        let minted = vault.run_deposit(&mut wallet, id, Usdt::zero(), 0, 0, now).unwrap().shares_minted;

        let id = vault.apply_withdraw(Trader(1), minted, Trader(1), now).unwrap();
        let payout = vault.run_withdraw(&mut wallet, id, Usdt::zero(), 0, 0, now).unwrap().payout;

        prop_assert_eq!(payout.value(), amount.value());
        prop_assert_eq!(wallet.balance(Trader(1)).value(), amount.value());
        prop_assert_eq!(vault.total_supply(), Decimal::ZERO);
    }
}

// one adl batch: the aggregate vault flow equals the per-position sum and
// total cash is conserved
#[test]
fn adl_batch_conserves_flows() {
    let mut engine = engine_for_cycle();

    let open_price = Price::new_unchecked(dec!(50_000));
    let setups = [
        (Trader(11), Side::Long, dec!(500), dec!(53)),
        (Trader(12), Side::Short, dec!(2500), dec!(7)),
        (Trader(13), Side::Short, dec!(1500), dec!(7)),
    ];

    for (trader, side, collateral, leverage) in setups {
        engine.mint(trader, Usdt::new(collateral));
        engine.approve(trader, Spender::Ledger, Usdt::new(collateral));
        let placement = engine
            .open_trade(
                trader,
                OpenOrder {
                    trader,
                    pair_index: PairIndex(0),
                    collateral: Usdt::new(collateral),
                    wanted_price: open_price,
                    side,
                    leverage: Leverage::new(leverage).unwrap(),
                    tp: None,
                    sl: None,
                    referral_code: 0,
                },
                OrderType::Market,
                Pct::percent(5),
            )
            .unwrap();
        let id = placement.request_id().unwrap();
        engine.drain_node_requests();
        engine.submit_price_answer(NodeId(0), id, vec![open_price]).unwrap();
    }

    let total_before: Usdt = [Trader(11), Trader(12), Trader(13)]
        .iter()
        .map(|t| engine.balance(*t))
        .sum::<Usdt>()
        .add(engine.ledger_cash())
        .add(engine.vault().total_assets());

    let request_id = engine
        .execute_adl_order(
            BOT,
            vec![AdlType::ProfitClose, AdlType::LossClose, AdlType::LossClose],
            vec![Trader(11), Trader(12), Trader(13)],
            vec![PairIndex(0), PairIndex(0), PairIndex(0)],
            vec![TradeIndex(0), TradeIndex(0), TradeIndex(0)],
            vec![PairIndex(0)],
        )
        .unwrap();
    engine.drain_node_requests();
    engine
        .submit_price_answer(NodeId(0), request_id, vec![Price::new_unchecked(dec!(55_000))])
        .unwrap();

    // aggregate equals the per-position sum
    let mut per_position = Usdt::zero();
    let mut aggregate = None;
    for event in engine.events() {
        match &event.payload {
            EventPayload::AdlExecuted(e) if e.request_id == request_id => {
                per_position = per_position.add(e.vault_flow);
            }
            EventPayload::AdlFlowSettled(e) if e.request_id == request_id => {
                aggregate = Some(e.net_vault_flow);
            }
            _ => {}
        }
    }
    let aggregate = aggregate.expect("batch settled");
    assert_eq!(aggregate, per_position);

    let total_after: Usdt = [Trader(11), Trader(12), Trader(13)]
        .iter()
        .map(|t| engine.balance(*t))
        .sum::<Usdt>()
        .add(engine.ledger_cash())
        .add(engine.vault().total_assets());
    assert_eq!(total_after.value(), total_before.value());

    for trader in [Trader(11), Trader(12), Trader(13)] {
        assert_eq!(engine.open_trades_count(trader, PairIndex(0)), 0);
    }
}
