// perps-settlement: oracle-settled perpetual futures engine.
// two-phase execution: every price-dependent order escrows first, requests a
// price round, and settles exactly once when enough nodes answer. a pooled
// share-token vault underwrites trader pnl. all computation is deterministic
// with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: PairIndex, Trader, Side, Price, Usdt, Pct
//   2.x  pairs.rs: instrument catalog: feeds, fee schedules, leverage groups
//   3.x  pnl.rs: percent-profit, close breakdown, vault flow
//   4.x  trade.rs: positions, order intents, tp/sl distance validation
//   5.x  ledger.rs: open trades, OI counters, pending orders, admission
//   6.x  oracle.rs: price rounds: request fan-out, median, timeout cancel
//   7.x  custody.rs: settlement-asset balances (mocked)
//   8.x  engine/: orchestration: intake, settlement callbacks, adl batches
//   9.x  adl.rs: deleverage candidate scoring (caller-side helper)
//   10.x policy.rs: capability checks at operation boundaries
//   11.x events.rs: state transition events for bots and indexers
//   12.x config.rs: engine params, tp/sl bounds, presets

// core settlement modules
pub mod engine;
pub mod ledger;
pub mod oracle;
pub mod pairs;
pub mod pnl;
pub mod trade;
pub mod types;

// capital and custody modules
pub mod custody;
pub mod vault;

// risk and safety modules
pub mod adl;
pub mod policy;

// integration modules
pub mod config;
pub mod events;

// re exports for convenience
pub use adl::{AdlCandidate, AdlExecution, AdlType};
pub use config::{EngineConfig, TradingParams};
pub use custody::{CustodyError, Spender, Wallet};
pub use engine::{Engine, EngineError, OrderPlacement};
pub use events::{Event, EventCollector, EventId, EventPayload};
pub use ledger::{Ledger, LedgerError, OpenInterest};
pub use oracle::{NodeRequest, OracleConfig, OracleError, OracleGateway, SettledPrices};
pub use pairs::{
    FeeSchedule, FeedCalculation, Pair, PairFeed, PairGroup, PairParams, PairsError, PairsStore,
};
pub use pnl::CloseBreakdown;
pub use policy::{Action, AuthError, Policy};
pub use trade::{BotOrderKind, OpenLimitOrder, OpenOrder, OrderType, Trade, TradeError};
pub use types::{
    Leverage, LockId, NodeId, PairIndex, Pct, Price, RequestId, Side, Timestamp, TradeIndex,
    Trader, Usdt, PCT_SCALE,
};
pub use vault::{Vault, VaultError};
