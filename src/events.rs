// 11.0: every state change produces an event. external bots and indexers run
// off this stream; tests use it to pin completion semantics. the EventPayload
// enum lists all event types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::adl::AdlType;
use crate::trade::BotOrderKind;
use crate::types::{
    LockId, PairIndex, Price, RequestId, Side, Timestamp, TradeIndex, Trader, Usdt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // order lifecycle
    MarketOrderInitiated(MarketOrderInitiatedEvent),
    MarketExecuted(MarketExecutedEvent),
    MarketOpenCanceled(MarketOpenCanceledEvent),

    // limit orders
    OpenLimitPlaced(OpenLimitPlacedEvent),
    OpenLimitUpdated(OpenLimitUpdatedEvent),
    OpenLimitCanceled(OpenLimitCanceledEvent),
    LimitExecuted(LimitExecutedEvent),

    // tp/sl maintenance
    TpUpdated(TpUpdatedEvent),
    SlUpdated(SlUpdatedEvent),
    SlUpdateInitiated(SlUpdateInitiatedEvent),
    SlCanceled(SlCanceledEvent),

    // bot triggers
    BotOrderInitiated(BotOrderInitiatedEvent),
    BotOrderCanceled(BotOrderCanceledEvent),

    // auto-deleverage
    AdlExecuted(AdlExecutedEvent),
    AdlFlowSettled(AdlFlowSettledEvent),

    // vault
    VaultDepositApplied(VaultApplyEvent),
    VaultDepositRun(VaultDepositRunEvent),
    VaultWithdrawApplied(VaultApplyEvent),
    VaultWithdrawRun(VaultWithdrawRunEvent),
    VaultApplyCanceled(VaultApplyCanceledEvent),

    // oracle protocol
    PriceRequested(PriceRequestedEvent),
    RequestTimedOut(RequestTimedOutEvent),

    // settlement sequence
    UpnlIdAdvanced(UpnlIdAdvancedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOrderInitiatedEvent {
    pub request_id: RequestId,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub open: bool,
    pub referral_code: u32,
}

// full breakdown of an executed market order, open or close
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketExecutedEvent {
    pub request_id: RequestId,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub open: bool,
    pub price: Price,
    pub position_size: Usdt,
    pub percent_profit: Decimal,
    pub usdt_sent_to_trader: Usdt,
    pub rollover_fee: Usdt,
    pub funding_fee: Usdt,
    pub closing_fee: Usdt,
    pub liquidated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOpenCanceledEvent {
    pub request_id: RequestId,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub refund: Usdt,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    PriceDeviation,
    ExposureLimits,
    Timeout,
    AnswersDiverged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLimitPlacedEvent {
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub wanted_price: Price,
    pub side: Side,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLimitUpdatedEvent {
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub wanted_price: Price,
    pub tp: Option<Price>,
    pub sl: Option<Price>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLimitCanceledEvent {
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub refund: Usdt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitExecutedEvent {
    pub request_id: RequestId,
    pub kind: BotOrderKind,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub price: Price,
    pub position_size: Usdt,
    pub usdt_sent_to_trader: Usdt,
    pub liquidated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpUpdatedEvent {
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub tp: Option<Price>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlUpdatedEvent {
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub sl: Option<Price>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlUpdateInitiatedEvent {
    pub request_id: RequestId,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub new_sl: Price,
}

// the stop would already be crossed by the live price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlCanceledEvent {
    pub request_id: RequestId,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub rejected_sl: Price,
    pub delivered_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotOrderInitiatedEvent {
    pub request_id: RequestId,
    pub kind: BotOrderKind,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotOrderCanceledEvent {
    pub request_id: RequestId,
    pub kind: BotOrderKind,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub reason: BotCancelReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotCancelReason {
    TriggerNotReached,
    ExposureLimits,
    NotLiquidatable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdlExecutedEvent {
    pub request_id: RequestId,
    pub kind: AdlType,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub price: Price,
    pub percent_profit: Decimal,
    pub usdt_sent_to_trader: Usdt,
    pub vault_flow: Usdt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdlFlowSettledEvent {
    pub request_id: RequestId,
    pub positions_closed: usize,
    // net vault flow over the batch; positive = inflow
    pub net_vault_flow: Usdt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultApplyEvent {
    pub request_id: RequestId,
    pub from: Trader,
    pub beneficiary: Trader,
    // deposits: asset amount. withdraws: share amount.
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultDepositRunEvent {
    pub request_id: RequestId,
    pub beneficiary: Trader,
    pub amount: Usdt,
    pub shares_minted: Decimal,
    pub lock_id: LockId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultWithdrawRunEvent {
    pub request_id: RequestId,
    pub beneficiary: Trader,
    pub shares_burned: Decimal,
    pub payout: Usdt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultApplyCanceledEvent {
    pub request_id: RequestId,
    pub from: Trader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRequestedEvent {
    pub request_id: RequestId,
    pub pairs: Vec<PairIndex>,
    pub nodes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTimedOutEvent {
    pub request_id: RequestId,
    pub refund: Usdt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpnlIdAdvancedEvent {
    pub id: u64,
}

// 11.1: bounded audit log. the engine records one entry per state
// transition; past the cap the oldest entries drop first, so the log is a
// window, not an unbounded history.
#[derive(Debug)]
pub struct EventCollector {
    events: Vec<Event>,
    next_id: u64,
    cap: usize,
}

impl EventCollector {
    pub fn new(cap: usize) -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
            cap,
        }
    }

    pub fn record(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push(Event::new(id, timestamp, payload));

        if self.events.len() > self.cap {
            let excess = self.events.len() - self.cap;
            self.events.drain(0..excess);
        }
        id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }
}
