// 3.0 pnl.rs: the fee and pnl formulas. pure functions, no state.
// percent-profit is leverage-scaled and clamped at the configured max gain;
// a close whose net value drops under the liquidation threshold zeroes the
// position with no further fee.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{Leverage, Pct, Price, Side, Usdt};

// 3.1: leverage-scaled percent profit, in percent units (50 = 50%).
// clamped at max_gain_p on the upside; losses are left unclamped, the
// close threshold floors them.
pub fn percent_profit(
    open_price: Price,
    current_price: Price,
    side: Side,
    leverage: Leverage,
    max_gain_p: Pct,
) -> Decimal {
    let dist = match side {
        Side::Long => current_price.value() - open_price.value(),
        Side::Short => open_price.value() - current_price.value(),
    };

    let p = dist * dec!(100) * leverage.value() / open_price.value();
    p.min(max_gain_p.as_percent())
}

// fee on open and close both apply to collateral * leverage
pub fn leveraged_fee(collateral: Usdt, leverage: Leverage, fee_p: Pct) -> Usdt {
    collateral.mul(leverage.value()).mul(fee_p.as_fraction())
}

// 3.2: rollover accrues on collateral, funding on notional, both per hour open.
pub fn accrued_rollover(collateral: Usdt, hours_open: Decimal, rate_per_hour_p: Pct) -> Usdt {
    collateral.mul(rate_per_hour_p.as_fraction() * hours_open)
}

pub fn accrued_funding(
    collateral: Usdt,
    leverage: Leverage,
    hours_open: Decimal,
    rate_per_hour_p: Pct,
) -> Usdt {
    collateral
        .mul(leverage.value())
        .mul(rate_per_hour_p.as_fraction() * hours_open)
}

// entry price worsened by the configured spread
pub fn apply_spread(price: Price, side: Side, spread_p: Pct) -> Price {
    let adjusted = price.value() * (Decimal::ONE + side.sign() * spread_p.as_fraction());
    Price::new_unchecked(adjusted)
}

/// Full breakdown of closing one position at a delivered price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseBreakdown {
    pub percent_profit: Decimal,
    pub rollover_fee: Usdt,
    pub funding_fee: Usdt,
    pub closing_fee: Usdt,
    pub usdt_sent_to_trader: Usdt,
    pub liquidated: bool,
}

impl CloseBreakdown {
    // cash the vault gains (positive) or funds (negative) from this close.
    // what the trader doesn't take of the retained margin flows in; payouts
    // above it flow out.
    pub fn net_vault_flow(&self, collateral: Usdt) -> Usdt {
        let left_in_ledger = collateral.sub(self.closing_fee).sub(self.rollover_fee);
        left_in_ledger.sub(self.usdt_sent_to_trader)
    }
}

// 3.3: the close formula.
//   value = collateral * (1 + p/100) - rollover - funding
//   value < collateral * liq_threshold  -> zeroed, no close fee
//   otherwise close fee comes off and the rest is paid out (floored at 0)
#[allow(clippy::too_many_arguments)]
pub fn close_breakdown(
    collateral: Usdt,
    leverage: Leverage,
    open_price: Price,
    close_price: Price,
    side: Side,
    rollover_fee: Usdt,
    funding_fee: Usdt,
    close_fee_p: Pct,
    max_gain_p: Pct,
    liq_threshold_p: Pct,
) -> CloseBreakdown {
    let p = percent_profit(open_price, close_price, side, leverage, max_gain_p);

    let value = collateral
        .add(collateral.mul(p / dec!(100)))
        .sub(rollover_fee)
        .sub(funding_fee);

    let threshold = collateral.mul(liq_threshold_p.as_fraction());

    if value < threshold {
        return CloseBreakdown {
            percent_profit: p,
            rollover_fee,
            funding_fee,
            closing_fee: Usdt::zero(),
            usdt_sent_to_trader: Usdt::zero(),
            liquidated: true,
        };
    }

    let closing_fee = leveraged_fee(collateral, leverage, close_fee_p);
    let after_fee = value.sub(closing_fee);
    let sent = if after_fee.is_negative() {
        Usdt::zero()
    } else {
        after_fee
    };

    CloseBreakdown {
        percent_profit: p,
        rollover_fee,
        funding_fee,
        closing_fee,
        usdt_sent_to_trader: sent,
        liquidated: false,
    }
}
