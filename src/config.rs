// 12.0 config.rs: all settings in one place. position caps, timeouts, tp/sl
// distance bounds, vault lock duration, oracle round settings.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::oracle::OracleConfig;
use crate::types::{Pct, Usdt};

/** 12.1: tp/sl distance bounds and the close liquidation threshold.
percent values are leverage-scaled at the check site. */
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradingParams {
    // widest allowed take-profit: 900% gain at the position's leverage
    pub max_gain_p: Pct,
    pub min_gain_p: Pct,
    // widest allowed stop-loss: 75% loss at the position's leverage
    pub max_sl_p: Pct,
    pub min_sl_p: Pct,
    // close value under this share of collateral zeroes the position
    pub liq_threshold_p: Pct,
}

impl Default for TradingParams {
    fn default() -> Self {
        Self {
            max_gain_p: Pct::percent(900),
            min_gain_p: Pct::percent(1),
            max_sl_p: Pct::percent(75),
            min_sl_p: Pct::percent(1),
            liq_threshold_p: Pct::percent(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // hard cap on collateral for a single position
    pub max_pos_usdt: Usdt,
    // placed limit orders cannot be triggered before this age
    pub limit_order_timelock_ms: i64,
    // per-side open interest may not exceed vault tvl times this
    pub vault_exposure_mult: Decimal,
    pub max_trades_per_pair: u8,
    // share lock duration for vault deposits
    pub lock_duration_ms: i64,
    pub trading: TradingParams,
    pub oracle: OracleConfig,
    // audit log cap; oldest events drop first
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pos_usdt: Usdt::new(dec!(100_000)),
            limit_order_timelock_ms: 6_000,
            vault_exposure_mult: dec!(10),
            max_trades_per_pair: 3,
            lock_duration_ms: 3 * 24 * 60 * 60 * 1000,
            trading: TradingParams::default(),
            oracle: OracleConfig::default(),
            max_events: 10_000,
        }
    }
}

impl EngineConfig {
    // short windows and no locks, for scenario runs and tests
    pub fn fast() -> Self {
        let mut config = Self {
            limit_order_timelock_ms: 0,
            lock_duration_ms: 1_000,
            ..Default::default()
        };
        config.oracle.request_timeout_ms = 1_000;
        config
    }
}
