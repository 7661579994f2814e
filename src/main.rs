//! Settlement engine simulation.
//!
//! Drives the full two-phase order lifecycle against an in-process node set:
//! market and limit opens, oracle settlement, tp/sl maintenance, vault
//! deposits and withdrawals, and an auto-deleverage batch.

use perps_settlement::*;
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

const GOV: Trader = Trader(100);
const MANAGER: Trader = Trader(101);
const PNL_FEED: Trader = Trader(102);
const BOT: Trader = Trader(103);
const LP: Trader = Trader(200);

const ETH: PairIndex = PairIndex(1);
const BTC: PairIndex = PairIndex(0);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Perpetual Settlement Engine Simulation");
    println!("Two-Phase Oracle Execution, Pooled Vault, Full Lifecycle\n");

    scenario_1_market_round_trip();
    scenario_2_limit_order_trigger();
    scenario_3_admission_and_timeout();
    scenario_4_vault_lifecycle();
    scenario_5_adl_batch();

    println!("\nAll simulations completed successfully.");
}

fn new_engine() -> Engine {
    let mut policy = Policy::new(GOV, MANAGER, PNL_FEED);
    policy.add_bot(BOT);

    let mut engine = Engine::new(
        EngineConfig::fast(),
        pairs::default_listing(),
        policy,
        vec![NodeId(0), NodeId(1)],
    );
    engine.set_time(Timestamp::from_millis(1_000));
    engine
}

// seeds the vault so positions have backing capital
fn seed_vault(engine: &mut Engine, amount: Usdt) {
    engine.mint(LP, amount);
    engine.approve(LP, Spender::Vault, amount);
    let id = engine.apply_deposit(LP, amount, LP).unwrap();
    engine.run_deposit(PNL_FEED, id, Usdt::zero(), engine.upnl_last_id()).unwrap();
}

fn fund_trader(engine: &mut Engine, trader: Trader, amount: Usdt) {
    engine.mint(trader, amount);
    engine.approve(trader, Spender::Ledger, amount);
}

// one node answers; min_answers is 1 in the default config
fn deliver(engine: &mut Engine, request_id: RequestId, price: Price) {
    engine.drain_node_requests();
    engine
        .submit_price_answer(NodeId(0), request_id, vec![price])
        .expect("settlement");
}

fn open_order(trader: Trader, pair: PairIndex, collateral: Usdt, price: Price, side: Side) -> OpenOrder {
    OpenOrder {
        trader,
        pair_index: pair,
        collateral,
        wanted_price: price,
        side,
        leverage: Leverage::new(dec!(10)).unwrap(),
        tp: None,
        sl: None,
        referral_code: 0,
    }
}

/// Market open, flat close: only the two fees move.
fn scenario_1_market_round_trip() {
    println!("Scenario 1: Market Round Trip\n");

    let mut engine = new_engine();
    seed_vault(&mut engine, Usdt::new(dec!(1_000_000)));

    let alice = Trader(1);
    fund_trader(&mut engine, alice, Usdt::new(dec!(1000)));

    let price = Price::new_unchecked(dec!(2000));
    let placement = engine
        .open_trade(
            alice,
            open_order(alice, ETH, Usdt::new(dec!(1000)), price, Side::Long),
            OrderType::Market,
            Pct::percent(1),
        )
        .unwrap();
    let request_id = placement.request_id().unwrap();
    println!("  Alice opens 1000 USDT at 10x, request {:?}", request_id);

    deliver(&mut engine, request_id, price);
    let trade = engine.trades_of(alice)[0];
    let index = trade.index;
    println!("  Executed: stored collateral {} (8 USDT open fee)", trade.position_size);
    println!("  Open interest: {} long", engine.open_interest(ETH).long);

    let close_id = engine.close_trade_market(alice, ETH, index).unwrap();
    deliver(&mut engine, close_id, price);

    println!("  Closed flat: balance {}", engine.balance(alice));
    println!("  Platform fees accrued: {}\n", engine.platform_fee());
}

/// A parked limit order picked up by the executor bot.
fn scenario_2_limit_order_trigger() {
    println!("Scenario 2: Limit Order Trigger\n");

    let mut engine = new_engine();
    seed_vault(&mut engine, Usdt::new(dec!(1_000_000)));

    let bob = Trader(2);
    fund_trader(&mut engine, bob, Usdt::new(dec!(2000)));

    let wanted = Price::new_unchecked(dec!(1995));
    let placement = engine
        .open_trade(
            bob,
            open_order(bob, ETH, Usdt::new(dec!(2000)), wanted, Side::Long),
            OrderType::Limit,
            Pct::percent(1),
        )
        .unwrap();
    println!("  Bob parks a limit buy at {}, placement {:?}", wanted, placement);
    println!("  Open limit orders: {}", engine.open_limit_orders_count(bob, ETH));

    let index = match placement {
        OrderPlacement::LimitPlaced(index) => index,
        OrderPlacement::Requested(_) => unreachable!(),
    };

    let request_id = engine
        .execute_bot_order(BOT, BotOrderKind::LimitOpen, bob, ETH, index)
        .unwrap();
    deliver(&mut engine, request_id, Price::new_unchecked(dec!(1994)));

    let trade = engine.trades_of(bob)[0];
    println!("  Triggered at 1994: position {} USDT at {}x\n", trade.position_size, trade.leverage);
}

/// Exposure limits reject synchronously; unanswered rounds refund on sweep.
fn scenario_3_admission_and_timeout() {
    println!("Scenario 3: Admission Control and Timeout\n");

    let mut engine = new_engine();
    // thin vault: 1000 USDT backs at most 10000 notional
    seed_vault(&mut engine, Usdt::new(dec!(1000)));

    let carol = Trader(3);
    fund_trader(&mut engine, carol, Usdt::new(dec!(5000)));

    let price = Price::new_unchecked(dec!(2000));
    let result = engine.open_trade(
        carol,
        open_order(carol, ETH, Usdt::new(dec!(2000)), price, Side::Long),
        OrderType::Market,
        Pct::percent(1),
    );
    println!("  20000 notional vs 1000 TVL: {:?}", result.err().map(|e| e.to_string()));
    println!("  Carol's balance is untouched: {}", engine.balance(carol));

    let placement = engine
        .open_trade(
            carol,
            open_order(carol, ETH, Usdt::new(dec!(1000)), price, Side::Long),
            OrderType::Market,
            Pct::percent(1),
        )
        .unwrap();
    println!("  10000 notional admitted, escrow moved: balance {}", engine.balance(carol));

    // no node answers in time
    engine.advance_time(2_000);
    let expired = engine.sweep_timeouts();
    println!("  Swept {} expired round(s); escrow refunded: balance {}\n",
        expired.len(), engine.balance(carol));
    let _ = placement;
}

/// Vault deposits, locks, upnl-adjusted withdrawal.
fn scenario_4_vault_lifecycle() {
    println!("Scenario 4: Vault Lifecycle\n");

    let mut engine = new_engine();
    let lp = Trader(4);
    engine.mint(lp, Usdt::new(dec!(10_000)));
    engine.approve(lp, Spender::Vault, Usdt::new(dec!(10_000)));

    let id = engine.apply_deposit(lp, Usdt::new(dec!(10_000)), lp).unwrap();
    engine.run_deposit(PNL_FEED, id, Usdt::zero(), 0).unwrap();
    println!("  Deposited 10000, shares: {}", engine.vault().balance_of(lp));

    let early = engine.apply_withdraw(lp, dec!(10_000), lp);
    println!("  Withdraw before unlock: {:?}", early.err().map(|e| e.to_string()));

    engine.advance_time(2_000); // past the fast-config lock
    let id = engine.apply_withdraw(lp, dec!(4_000), lp).unwrap();
    // traders are up 500 overall: nav marks the vault down
    engine.run_withdraw(PNL_FEED, id, Usdt::new(dec!(500)), 0).unwrap();
    println!("  Withdrew 4000 shares against +500 trader upnl: balance {}", engine.balance(lp));
    println!("  Vault assets now {}\n", engine.vault().total_assets());
}

/// One batch round closes a profitable long and two offsetting shorts.
fn scenario_5_adl_batch() {
    println!("Scenario 5: Auto-Deleverage Batch\n");

    let mut engine = new_engine();
    seed_vault(&mut engine, Usdt::new(dec!(100_000)));

    let price = Price::new_unchecked(dec!(50_000));
    let winners_and_losers = [
        (Trader(11), Side::Long, dec!(500), dec!(53)),
        (Trader(12), Side::Short, dec!(2500), dec!(7)),
        (Trader(13), Side::Short, dec!(1500), dec!(7)),
    ];

    for (trader, side, collateral, leverage) in winners_and_losers {
        fund_trader(&mut engine, trader, Usdt::new(collateral));
        let mut order = open_order(trader, BTC, Usdt::new(collateral), price, side);
        order.leverage = Leverage::new(leverage).unwrap();
        let placement = engine
            .open_trade(trader, order, OrderType::Market, Pct::percent(5))
            .unwrap();
        deliver(&mut engine, placement.request_id().unwrap(), price);
    }
    println!("  Three positions open on BTC");

    // price rips 10%: the 53x long is deep in profit
    let request_id = engine
        .execute_adl_order(
            BOT,
            vec![AdlType::ProfitClose, AdlType::LossClose, AdlType::LossClose],
            vec![Trader(11), Trader(12), Trader(13)],
            vec![BTC, BTC, BTC],
            vec![TradeIndex(0), TradeIndex(0), TradeIndex(0)],
            vec![BTC],
        )
        .unwrap();
    deliver(&mut engine, request_id, Price::new_unchecked(dec!(55_000)));

    for event in engine.recent_events(8) {
        if let EventPayload::AdlFlowSettled(e) = &event.payload {
            println!("  Batch settled: {} positions, net vault flow {}", e.positions_closed, e.net_vault_flow);
        }
    }
    println!("  Open interest after batch: {:?}\n", engine.open_interest(BTC));
}
