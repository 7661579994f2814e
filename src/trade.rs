// 4.0 trade.rs: open positions and the order intents that create and destroy
// them. tp/sl triggers are plain prices validated against leverage-scaled
// distance bounds at intake, never trusted later.

use serde::{Deserialize, Serialize};

use crate::config::TradingParams;
use crate::types::{Leverage, PairIndex, Pct, Price, Side, Timestamp, TradeIndex, Trader, Usdt};

/// An open position. `position_size` is collateral after the open fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
    pub position_size: Usdt,
    pub open_price: Price,
    pub side: Side,
    pub leverage: Leverage,
    pub tp: Option<Price>,
    pub sl: Option<Price>,
    pub opened_at: Timestamp,
}

impl Trade {
    pub fn notional(&self) -> Usdt {
        self.position_size.mul(self.leverage.value())
    }
}

// what a trader submits to open a position. collateral is escrowed at
// intake, before the price is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub collateral: Usdt,
    pub wanted_price: Price,
    pub side: Side,
    pub leverage: Leverage,
    pub tp: Option<Price>,
    pub sl: Option<Price>,
    // recorded on the initiated event; fee sharing is settled elsewhere
    pub referral_code: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

// trigger kinds an authorized bot may fire on someone else's position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotOrderKind {
    TakeProfit,
    StopLoss,
    Liquidation,
    LimitOpen,
}

// a parked limit order. escrow is already held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLimitOrder {
    pub order: OpenOrder,
    pub index: TradeIndex,
    pub slippage_p: Pct,
    pub escrow: Usdt,
    pub placed_at: Timestamp,
}

// 4.1: what a pending oracle round resolves into. exactly one of these per
// request id; the registry enforces the unique-key rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PendingAction {
    MarketOpen {
        order: OpenOrder,
        slippage_p: Pct,
        escrow: Usdt,
    },
    MarketClose {
        trader: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
    },
    // a bot fired tp/sl/liquidation or a parked limit order
    BotTrigger {
        kind: BotOrderKind,
        trader: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
    },
    SlUpdate {
        trader: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
        new_sl: Price,
    },
    AdlBatch {
        entries: Vec<AdlEntry>,
    },
}

// one position in an adl batch. kind is informational for the audit trail;
// every entry settles through the same close formula.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdlEntry {
    pub kind: crate::adl::AdlType,
    pub trader: Trader,
    pub pair_index: PairIndex,
    pub index: TradeIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TradeError {
    #[error("take profit beyond max gain distance")]
    TpTooBig,

    #[error("take profit inside min gain distance")]
    TpTooSmall,

    #[error("take profit on the wrong side of the open price")]
    WrongTp,

    #[error("stop loss beyond max loss distance")]
    SlTooBig,

    #[error("stop loss inside min loss distance")]
    SlTooSmall,

    #[error("stop loss on the wrong side of the open price")]
    WrongSl,
}

// 4.2: tp distance bounds scale inversely with leverage: a 10x position's
// 900% max gain sits 90% of price away.
pub fn validate_tp(
    open_price: Price,
    side: Side,
    tp: Price,
    leverage: Leverage,
    params: &TradingParams,
) -> Result<(), TradeError> {
    let dist = match side {
        Side::Long => tp.value() - open_price.value(),
        Side::Short => open_price.value() - tp.value(),
    };

    if dist <= rust_decimal::Decimal::ZERO {
        return Err(TradeError::WrongTp);
    }

    let max_dist = open_price.value() * params.max_gain_p.as_fraction() / leverage.value();
    if dist > max_dist {
        return Err(TradeError::TpTooBig);
    }

    let min_dist = open_price.value() * params.min_gain_p.as_fraction() / leverage.value();
    if dist < min_dist {
        return Err(TradeError::TpTooSmall);
    }

    Ok(())
}

pub fn validate_sl(
    open_price: Price,
    side: Side,
    sl: Price,
    leverage: Leverage,
    params: &TradingParams,
) -> Result<(), TradeError> {
    let dist = match side {
        Side::Long => open_price.value() - sl.value(),
        Side::Short => sl.value() - open_price.value(),
    };

    if dist <= rust_decimal::Decimal::ZERO {
        return Err(TradeError::WrongSl);
    }

    let max_dist = open_price.value() * params.max_sl_p.as_fraction() / leverage.value();
    if dist > max_dist {
        return Err(TradeError::SlTooBig);
    }

    let min_dist = open_price.value() * params.min_sl_p.as_fraction() / leverage.value();
    if dist < min_dist {
        return Err(TradeError::SlTooSmall);
    }

    Ok(())
}

pub fn validate_tp_sl(
    open_price: Price,
    side: Side,
    tp: Option<Price>,
    sl: Option<Price>,
    leverage: Leverage,
    params: &TradingParams,
) -> Result<(), TradeError> {
    if let Some(tp) = tp {
        validate_tp(open_price, side, tp, leverage, params)?;
    }
    if let Some(sl) = sl {
        validate_sl(open_price, side, sl, leverage, params)?;
    }
    Ok(())
}

// whether the delivered price has reached a trigger
pub fn tp_hit(side: Side, tp: Price, delivered: Price) -> bool {
    match side {
        Side::Long => delivered >= tp,
        Side::Short => delivered <= tp,
    }
}

pub fn sl_hit(side: Side, sl: Price, delivered: Price) -> bool {
    match side {
        Side::Long => delivered <= sl,
        Side::Short => delivered >= sl,
    }
}

// limit opens fill when the delivered price is at least as good as the
// wanted price, slippage tolerance included
pub fn limit_fillable(side: Side, wanted: Price, slippage_p: Pct, delivered: Price) -> bool {
    let tolerance = wanted.value() * slippage_p.as_fraction();
    match side {
        Side::Long => delivered.value() <= wanted.value() + tolerance,
        Side::Short => delivered.value() >= wanted.value() - tolerance,
    }
}

// market opens cancel when the delivered price strays beyond slippage of the
// wanted price, in the direction that hurts the trader
pub fn within_slippage(side: Side, wanted: Price, slippage_p: Pct, delivered: Price) -> bool {
    limit_fillable(side, wanted, slippage_p, delivered)
}
