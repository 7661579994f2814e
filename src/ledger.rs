// 5.0 ledger.rs: authoritative position store. open trades, parked limit
// orders, pending oracle-correlated orders, open-interest counters, escrowed
// cash and the platform fee pot. admission control lives here because the
// counters it checks live here.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::trade::{OpenLimitOrder, PendingAction, Trade};
use crate::types::{PairIndex, RequestId, Side, TradeIndex, Trader, Usdt};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OpenInterest {
    pub long: Usdt,
    pub short: Usdt,
}

impl OpenInterest {
    pub fn side(&self, side: Side) -> Usdt {
        match side {
            Side::Long => self.long,
            Side::Short => self.short,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Usdt {
        match side {
            Side::Long => &mut self.long,
            Side::Short => &mut self.short,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("exposure limits exceeded on pair {0:?}")]
    OutOfExposureLimits(PairIndex),

    #[error("position collateral {collateral} above the per-position cap {cap}")]
    PositionTooLarge { collateral: Usdt, cap: Usdt },

    #[error("trader already holds the maximum of {0} trades on this pair")]
    MaxTradesPerPair(u8),

    #[error("trade not found")]
    TradeNotFound,

    #[error("limit order not found")]
    LimitOrderNotFound,

    #[error("trade slot occupied")]
    SlotOccupied,

    #[error("an order is already pending for this trade")]
    OrderAlreadyPending,

    #[error("request id {0:?} already registered")]
    DuplicateRequest(RequestId),

    #[error("request id {0:?} has no pending order")]
    RequestNotFound(RequestId),
}

/// Central trade and order store. one instance per engine.
#[derive(Debug, Default)]
pub struct Ledger {
    trades: HashMap<(Trader, PairIndex, TradeIndex), Trade>,
    trade_counts: HashMap<(Trader, PairIndex), u8>,
    limit_orders: HashMap<(Trader, PairIndex, TradeIndex), OpenLimitOrder>,
    limit_counts: HashMap<(Trader, PairIndex), u8>,
    pending: HashMap<RequestId, PendingAction>,
    // trades with an in-flight close/trigger round; one at a time each
    busy: HashSet<(Trader, PairIndex, TradeIndex)>,
    oi: HashMap<PairIndex, OpenInterest>,
    max_oi: HashMap<PairIndex, Usdt>,
    // cash held by the ledger: escrow, retained margin, accrued fees
    cash: Usdt,
    platform_fee: Usdt,
    // settlement sequence; doubles as the upnl attestation the vault verifies
    upnl_last_id: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // 5.1: admission. checked at intake and re-checked at settlement, because
    // the counters move between the two.
    pub fn check_admission(
        &self,
        pair: PairIndex,
        side: Side,
        collateral: Usdt,
        notional: Usdt,
        max_pos: Usdt,
        vault_tvl: Usdt,
        vault_exposure_mult: rust_decimal::Decimal,
    ) -> Result<(), LedgerError> {
        if collateral > max_pos {
            return Err(LedgerError::PositionTooLarge {
                collateral,
                cap: max_pos,
            });
        }

        let side_oi = self.open_interest(pair).side(side);
        let after = side_oi.add(notional);

        if let Some(cap) = self.max_oi.get(&pair) {
            if after > *cap {
                return Err(LedgerError::OutOfExposureLimits(pair));
            }
        }

        if after > vault_tvl.mul(vault_exposure_mult) {
            return Err(LedgerError::OutOfExposureLimits(pair));
        }

        Ok(())
    }

    pub fn set_max_open_interest(&mut self, pair: PairIndex, cap: Usdt) {
        self.max_oi.insert(pair, cap);
    }

    pub fn open_interest(&self, pair: PairIndex) -> OpenInterest {
        self.oi.get(&pair).copied().unwrap_or_default()
    }

    // 5.2: trade slots. indexes fill lowest-first, bounded per pair.
    pub fn first_empty_trade_index(
        &self,
        trader: Trader,
        pair: PairIndex,
        max_trades: u8,
    ) -> Result<TradeIndex, LedgerError> {
        for i in 0..max_trades {
            let index = TradeIndex(i);
            if !self.trades.contains_key(&(trader, pair, index))
                && !self.limit_orders.contains_key(&(trader, pair, index))
            {
                return Ok(index);
            }
        }
        Err(LedgerError::MaxTradesPerPair(max_trades))
    }

    pub fn store_trade(&mut self, trade: Trade) -> Result<(), LedgerError> {
        let key = (trade.trader, trade.pair_index, trade.index);
        if self.trades.contains_key(&key) {
            return Err(LedgerError::SlotOccupied);
        }

        let notional = trade.notional();
        let oi = self.oi.entry(trade.pair_index).or_default();
        let side_oi = oi.side_mut(trade.side);
        *side_oi = side_oi.add(notional);

        *self.trade_counts.entry((trade.trader, trade.pair_index)).or_insert(0) += 1;
        self.trades.insert(key, trade);
        Ok(())
    }

    pub fn remove_trade(
        &mut self,
        trader: Trader,
        pair: PairIndex,
        index: TradeIndex,
    ) -> Result<Trade, LedgerError> {
        let trade = self
            .trades
            .remove(&(trader, pair, index))
            .ok_or(LedgerError::TradeNotFound)?;

        let notional = trade.notional();
        let oi = self.oi.entry(pair).or_default();
        let side_oi = oi.side_mut(trade.side);
        *side_oi = side_oi.sub(notional);

        let count = self.trade_counts.entry((trader, pair)).or_insert(1);
        *count = count.saturating_sub(1);

        self.busy.remove(&(trader, pair, index));
        Ok(trade)
    }

    pub fn trade(&self, trader: Trader, pair: PairIndex, index: TradeIndex) -> Option<&Trade> {
        self.trades.get(&(trader, pair, index))
    }

    pub fn trade_mut(
        &mut self,
        trader: Trader,
        pair: PairIndex,
        index: TradeIndex,
    ) -> Option<&mut Trade> {
        self.trades.get_mut(&(trader, pair, index))
    }

    pub fn trades_of(&self, trader: Trader) -> Vec<&Trade> {
        let mut trades: Vec<&Trade> = self
            .trades
            .iter()
            .filter(|((t, _, _), _)| *t == trader)
            .map(|(_, trade)| trade)
            .collect();
        trades.sort_by_key(|t| (t.pair_index, t.index));
        trades
    }

    pub fn open_trades_count(&self, trader: Trader, pair: PairIndex) -> u8 {
        self.trade_counts.get(&(trader, pair)).copied().unwrap_or(0)
    }

    // 5.3: parked limit orders share the slot space with trades.
    pub fn store_limit_order(&mut self, order: OpenLimitOrder) -> Result<(), LedgerError> {
        let key = (order.order.trader, order.order.pair_index, order.index);
        if self.limit_orders.contains_key(&key) || self.trades.contains_key(&key) {
            return Err(LedgerError::SlotOccupied);
        }
        *self
            .limit_counts
            .entry((order.order.trader, order.order.pair_index))
            .or_insert(0) += 1;
        self.limit_orders.insert(key, order);
        Ok(())
    }

    pub fn limit_order(
        &self,
        trader: Trader,
        pair: PairIndex,
        index: TradeIndex,
    ) -> Option<&OpenLimitOrder> {
        self.limit_orders.get(&(trader, pair, index))
    }

    pub fn limit_order_mut(
        &mut self,
        trader: Trader,
        pair: PairIndex,
        index: TradeIndex,
    ) -> Option<&mut OpenLimitOrder> {
        self.limit_orders.get_mut(&(trader, pair, index))
    }

    pub fn remove_limit_order(
        &mut self,
        trader: Trader,
        pair: PairIndex,
        index: TradeIndex,
    ) -> Result<OpenLimitOrder, LedgerError> {
        let order = self
            .limit_orders
            .remove(&(trader, pair, index))
            .ok_or(LedgerError::LimitOrderNotFound)?;
        let count = self.limit_counts.entry((trader, pair)).or_insert(1);
        *count = count.saturating_sub(1);
        self.busy.remove(&(trader, pair, index));
        Ok(order)
    }

    pub fn open_limit_orders_count(&self, trader: Trader, pair: PairIndex) -> u8 {
        self.limit_counts.get(&(trader, pair)).copied().unwrap_or(0)
    }

    // 5.4: pending oracle-correlated orders. request id is a unique key; a
    // settled request takes its action out, so replays find nothing.
    pub fn register_pending(
        &mut self,
        request_id: RequestId,
        action: PendingAction,
    ) -> Result<(), LedgerError> {
        if self.pending.contains_key(&request_id) {
            return Err(LedgerError::DuplicateRequest(request_id));
        }

        if let Some(key) = busy_key(&action) {
            if !self.busy.insert(key) {
                return Err(LedgerError::OrderAlreadyPending);
            }
        }

        self.pending.insert(request_id, action);
        Ok(())
    }

    pub fn take_pending(&mut self, request_id: RequestId) -> Result<PendingAction, LedgerError> {
        let action = self
            .pending
            .remove(&request_id)
            .ok_or(LedgerError::RequestNotFound(request_id))?;
        if let Some(key) = busy_key(&action) {
            self.busy.remove(&key);
        }
        Ok(action)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_busy(&self, trader: Trader, pair: PairIndex, index: TradeIndex) -> bool {
        self.busy.contains(&(trader, pair, index))
    }

    // 5.5: cash and fee accounting.
    pub fn credit_cash(&mut self, amount: Usdt) {
        self.cash = self.cash.add(amount);
    }

    pub fn debit_cash(&mut self, amount: Usdt) {
        debug_assert!(self.cash >= amount, "ledger cash underflow");
        self.cash = self.cash.sub(amount);
    }

    pub fn cash(&self) -> Usdt {
        self.cash
    }

    pub fn add_platform_fee(&mut self, amount: Usdt) {
        self.platform_fee = self.platform_fee.add(amount);
    }

    pub fn platform_fee(&self) -> Usdt {
        self.platform_fee
    }

    pub fn advance_upnl_id(&mut self) -> u64 {
        self.upnl_last_id += 1;
        self.upnl_last_id
    }

    pub fn upnl_last_id(&self) -> u64 {
        self.upnl_last_id
    }

    // invariant check used by tests: counters equal the sum over open trades
    pub fn recompute_open_interest(&self, pair: PairIndex) -> OpenInterest {
        let mut oi = OpenInterest::default();
        for trade in self.trades.values().filter(|t| t.pair_index == pair) {
            let side_oi = oi.side_mut(trade.side);
            *side_oi = side_oi.add(trade.notional());
        }
        oi
    }
}

fn busy_key(action: &PendingAction) -> Option<(Trader, PairIndex, TradeIndex)> {
    match action {
        PendingAction::MarketClose {
            trader,
            pair_index,
            index,
        } => Some((*trader, *pair_index, *index)),
        PendingAction::BotTrigger {
            trader,
            pair_index,
            index,
            ..
        } => Some((*trader, *pair_index, *index)),
        PendingAction::SlUpdate {
            trader,
            pair_index,
            index,
            ..
        } => Some((*trader, *pair_index, *index)),
        PendingAction::MarketOpen { .. } | PendingAction::AdlBatch { .. } => None,
    }
}
