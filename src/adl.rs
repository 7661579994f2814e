// 9.0 adl.rs: auto-deleverage support. the engine is a mechanical executor of
// a caller-supplied position list; the ranking helper here is for the off-chain
// risk process that builds that list, the engine never consults it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::pnl;
use crate::trade::Trade;
use crate::types::{Pct, Price, Trader, Usdt};

// side of the book a batch entry is closed from. profit closes restore vault
// solvency; loss closes realize the offsetting losers in the same round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdlType {
    ProfitClose,
    LossClose,
}

/// A position scored for deleveraging priority. higher score closes first.
#[derive(Debug, Clone)]
pub struct AdlCandidate {
    pub trader: Trader,
    pub trade: Trade,
    pub score: Decimal,
    pub estimated_pnl: Usdt,
}

impl AdlCandidate {
    pub fn new(trade: Trade, mark_price: Price, max_gain_p: Pct) -> Self {
        let p = pnl::percent_profit(
            trade.open_price,
            mark_price,
            trade.side,
            trade.leverage,
            max_gain_p,
        );
        let estimated_pnl = trade.position_size.mul(p / Decimal::from(100));
        let score = adl_score(&trade, estimated_pnl);

        Self {
            trader: trade.trader,
            trade,
            score,
            estimated_pnl,
        }
    }
}

impl PartialEq for AdlCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.trader == other.trader
    }
}

impl Eq for AdlCandidate {}

impl PartialOrd for AdlCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AdlCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // descending by score, trader id breaks ties for stable output
        other
            .score
            .cmp(&self.score)
            .then(self.trader.0.cmp(&other.trader.0))
    }
}

// score = pnl ratio * leverage. profitable high-leverage positions rank first.
fn adl_score(trade: &Trade, estimated_pnl: Usdt) -> Decimal {
    let pnl_ratio = if trade.position_size.is_zero() {
        Decimal::ZERO
    } else {
        estimated_pnl.value() / trade.position_size.value()
    };

    pnl_ratio * trade.leverage.value()
}

// builds the ranked candidate list for one pair side. only positions in
// profit are eligible; callers slice off as many as the shortfall needs.
pub fn rank_candidates(
    trades: Vec<Trade>,
    mark_price: Price,
    max_gain_p: Pct,
) -> Vec<AdlCandidate> {
    let mut candidates: Vec<AdlCandidate> = trades
        .into_iter()
        .map(|t| AdlCandidate::new(t, mark_price, max_gain_p))
        .filter(|c| c.estimated_pnl.value() > Decimal::ZERO)
        .collect();

    candidates.sort();
    candidates
}

/// Outcome of one position inside a settled adl batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdlExecution {
    pub kind: AdlType,
    pub trader: Trader,
    pub close_price: Price,
    pub usdt_sent_to_trader: Usdt,
    // positive = cash into the vault, negative = vault funded the payout
    pub vault_flow: Usdt,
}

// net vault flow over a settled batch. equals the per-position sum by
// construction; tests pin the conservation property.
pub fn aggregate_flow(executions: &[AdlExecution]) -> Usdt {
    executions.iter().map(|e| e.vault_flow).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Leverage, PairIndex, Side, Timestamp, TradeIndex};
    use rust_decimal_macros::dec;

    fn trade(trader: u64, side: Side, collateral: Decimal, leverage: Decimal) -> Trade {
        Trade {
            trader: Trader(trader),
            pair_index: PairIndex(0),
            index: TradeIndex(0),
            position_size: Usdt::new(collateral),
            open_price: Price::new_unchecked(dec!(50000)),
            side,
            leverage: Leverage::new(leverage).unwrap(),
            tp: None,
            sl: None,
            opened_at: Timestamp::from_millis(0),
        }
    }

    const MAX_GAIN: Pct = Pct::new(900 * 10_000_000_000);

    #[test]
    fn high_leverage_profit_ranks_first() {
        let mark = Price::new_unchecked(dec!(55000)); // +10%

        let ranked = rank_candidates(
            vec![
                trade(1, Side::Long, dec!(25000), dec!(2)),
                trade(2, Side::Long, dec!(5000), dec!(10)),
            ],
            mark,
            MAX_GAIN,
        );

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].trader, Trader(2));
    }

    #[test]
    fn losing_positions_excluded() {
        let mark = Price::new_unchecked(dec!(45000));
        let ranked = rank_candidates(vec![trade(1, Side::Long, dec!(5000), dec!(10))], mark, MAX_GAIN);
        assert!(ranked.is_empty());
    }

    #[test]
    fn equal_scores_break_by_trader_id() {
        let mark = Price::new_unchecked(dec!(55000));
        let ranked = rank_candidates(
            vec![
                trade(7, Side::Long, dec!(5000), dec!(10)),
                trade(3, Side::Long, dec!(5000), dec!(10)),
            ],
            mark,
            MAX_GAIN,
        );

        assert_eq!(ranked[0].trader, Trader(3));
        assert_eq!(ranked[1].trader, Trader(7));
    }

    #[test]
    fn score_scales_with_leverage_and_profit() {
        let mark = Price::new_unchecked(dec!(55000)); // +10% move
        let c = AdlCandidate::new(trade(1, Side::Long, dec!(1000), dec!(10)), mark, MAX_GAIN);
        // +100% pnl ratio at 10x
        assert_eq!(c.score, dec!(10));
        assert_eq!(c.estimated_pnl.value(), dec!(1000));
    }

    #[test]
    fn aggregate_matches_sum() {
        let execs = vec![
            AdlExecution {
                kind: AdlType::ProfitClose,
                trader: Trader(1),
                close_price: Price::new_unchecked(dec!(55000)),
                usdt_sent_to_trader: Usdt::new(dec!(1500)),
                vault_flow: Usdt::new(dec!(-500)),
            },
            AdlExecution {
                kind: AdlType::LossClose,
                trader: Trader(2),
                close_price: Price::new_unchecked(dec!(55000)),
                usdt_sent_to_trader: Usdt::new(dec!(200)),
                vault_flow: Usdt::new(dec!(800)),
            },
        ];

        assert_eq!(aggregate_flow(&execs).value(), dec!(300));
    }
}
