// 8.0 engine/: the orchestrator. owns the pair catalog, ledger, oracle
// gateway, vault, custody wallet and policy, and routes every operation
// through them as one indivisible state transition. the only asynchrony is
// the oracle round-trip; everything else settles in the calling transition.

mod adl;
mod orders;
mod results;
mod settle;

pub use results::{EngineError, OrderPlacement};

use tracing::debug;

use crate::config::EngineConfig;
use crate::custody::{Spender, Wallet};
use crate::events::{Event, EventCollector, EventPayload};
use crate::ledger::{Ledger, OpenInterest};
use crate::oracle::{NodeRequest, OracleGateway};
use crate::pairs::PairsStore;
use crate::policy::{Action, Policy};
use crate::trade::Trade;
use crate::types::{NodeId, PairIndex, Timestamp, Trader, Usdt};
use crate::vault::Vault;

/** 8.1: main engine struct. all state lives here, injected part by part. */
#[derive(Debug)]
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) pairs: PairsStore,
    pub(crate) ledger: Ledger,
    pub(crate) oracle: OracleGateway,
    pub(crate) vault: Vault,
    pub(crate) wallet: Wallet,
    pub(crate) policy: Policy,
    pub(crate) events: EventCollector,
    pub(crate) current_time: Timestamp,
    pub(crate) paused: bool,
}

impl Engine {
    pub fn new(config: EngineConfig, pairs: PairsStore, policy: Policy, nodes: Vec<NodeId>) -> Self {
        let oracle = OracleGateway::new(config.oracle.clone(), nodes);
        let vault = Vault::new(config.lock_duration_ms);
        let events = EventCollector::new(config.max_events);

        Self {
            config,
            pairs,
            ledger: Ledger::new(),
            oracle,
            vault,
            wallet: Wallet::new(),
            policy,
            events,
            current_time: Timestamp::from_millis(0),
            paused: false,
        }
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    // 8.2: governed switches.
    pub fn pause(&mut self, caller: Trader) -> Result<(), EngineError> {
        self.policy.authorize(caller, Action::Govern)?;
        self.paused = true;
        Ok(())
    }

    pub fn resume(&mut self, caller: Trader) -> Result<(), EngineError> {
        self.policy.authorize(caller, Action::Govern)?;
        self.paused = false;
        Ok(())
    }

    pub fn set_max_open_interest(
        &mut self,
        caller: Trader,
        pair: PairIndex,
        cap: Usdt,
    ) -> Result<(), EngineError> {
        self.policy.authorize(caller, Action::Govern)?;
        self.ledger.set_max_open_interest(pair, cap);
        Ok(())
    }

    pub fn update_pair(
        &mut self,
        caller: Trader,
        index: PairIndex,
        pair: crate::pairs::Pair,
    ) -> Result<(), EngineError> {
        self.policy.authorize(caller, Action::Govern)?;
        self.pairs.update_pair(index, pair)?;
        Ok(())
    }

    pub fn set_pair_params(
        &mut self,
        caller: Trader,
        index: PairIndex,
        params: crate::pairs::PairParams,
    ) -> Result<(), EngineError> {
        self.policy.authorize(caller, Action::ManageRisk)?;
        self.pairs.set_pair_params(index, params)?;
        Ok(())
    }

    pub fn set_max_negative_pnl_on_open(
        &mut self,
        caller: Trader,
        p: crate::types::Pct,
    ) -> Result<(), EngineError> {
        self.policy.authorize(caller, Action::ManageRisk)?;
        self.pairs.set_max_negative_pnl_on_open_p(p);
        Ok(())
    }

    pub fn add_bot(&mut self, caller: Trader, bot: Trader) -> Result<(), EngineError> {
        self.policy.authorize(caller, Action::Govern)?;
        self.policy.add_bot(bot);
        Ok(())
    }

    // 8.3: custody passthroughs. real deployments replace these with the token.
    pub fn mint(&mut self, owner: Trader, amount: Usdt) {
        self.wallet.mint(owner, amount);
    }

    pub fn approve(&mut self, owner: Trader, spender: Spender, amount: Usdt) {
        self.wallet.approve(owner, spender, amount);
    }

    pub fn balance(&self, owner: Trader) -> Usdt {
        self.wallet.balance(owner)
    }

    // 8.4: read paths.
    pub fn trades_of(&self, trader: Trader) -> Vec<&Trade> {
        self.ledger.trades_of(trader)
    }

    pub fn open_trades_count(&self, trader: Trader, pair: PairIndex) -> u8 {
        self.ledger.open_trades_count(trader, pair)
    }

    pub fn open_limit_orders_count(&self, trader: Trader, pair: PairIndex) -> u8 {
        self.ledger.open_limit_orders_count(trader, pair)
    }

    pub fn open_interest(&self, pair: PairIndex) -> OpenInterest {
        self.ledger.open_interest(pair)
    }

    pub fn platform_fee(&self) -> Usdt {
        self.ledger.platform_fee()
    }

    // escrow, retained margin and accrued fees currently held by the ledger
    pub fn ledger_cash(&self) -> Usdt {
        self.ledger.cash()
    }

    pub fn upnl_last_id(&self) -> u64 {
        self.ledger.upnl_last_id()
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn pairs(&self) -> &PairsStore {
        &self.pairs
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        self.events.recent(count)
    }

    // outbound oracle traffic; the host transport drains and delivers it
    pub fn drain_node_requests(&mut self) -> Vec<NodeRequest> {
        self.oracle.drain_outbox()
    }

    pub(crate) fn emit_event(&mut self, payload: EventPayload) {
        debug!(?payload, "event");
        self.events.record(self.current_time, payload);
    }
}
