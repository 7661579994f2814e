// 2.0 pairs.rs: per-instrument risk parameters. feeds, fee schedules, leverage
// groups, accrual rates. governed updates happen at the engine boundary; the
// store itself only validates shape.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Leverage, Pct, PairIndex, Usdt};

/// Identifier of a price source a node can serve (primary or secondary feed).
pub type FeedId = u32;

// how the delivered answer is derived from the pair's feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedCalculation {
    // price of feed 1 used as is
    Singular,
    // 1 / feed 1 (quote-inverted listings)
    Invert,
    // feed 1 / feed 2 (cross pairs priced through a common quote)
    Combine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairFeed {
    pub primary: FeedId,
    pub secondary: Option<FeedId>,
    pub calculation: FeedCalculation,
    // answers in one round further apart than this settle as failed
    pub max_deviation_p: Pct,
}

// fee schedule shared by all pairs in a fee group.
// percentages apply to collateral * leverage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub name: String,
    pub open_fee_p: Pct,
    pub close_fee_p: Pct,
    // cut of the open fee routed to price nodes
    pub oracle_fee_p: Pct,
    // minimum collateral * leverage for any position on these pairs
    pub min_lev_pos: Usdt,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            name: "crypto".to_string(),
            open_fee_p: Pct::new(800_000_000),  // 0.08%
            close_fee_p: Pct::new(800_000_000), // 0.08%
            oracle_fee_p: Pct::new(40_000_000), // 0.004%
            min_lev_pos: Usdt::new(Decimal::from(500)),
        }
    }
}

// leverage group: pairs in the same group share leverage bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairGroup {
    pub name: String,
    pub min_leverage: Leverage,
    pub max_leverage: Leverage,
    // ceiling on one pair's share of pooled collateral
    pub max_collateral_p: Pct,
}

impl Default for PairGroup {
    fn default() -> Self {
        Self {
            name: "crypto".to_string(),
            min_leverage: Leverage::new(Decimal::from(2)).unwrap(),
            max_leverage: Leverage::new(Decimal::from(100)).unwrap(),
            max_collateral_p: Pct::percent(100),
        }
    }
}

// per-pair accrual rates, charged at close over the position's open time.
// rollover applies to collateral, funding to notional.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PairParams {
    pub rollover_fee_per_hour_p: Pct,
    pub funding_fee_per_hour_p: Pct,
}

impl Default for PairParams {
    fn default() -> Self {
        Self {
            rollover_fee_per_hour_p: Pct::ZERO,
            funding_fee_per_hour_p: Pct::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub base: String,
    pub quote: String,
    pub feed: PairFeed,
    pub spread_p: Pct,
    pub group_index: u32,
    pub fee_index: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PairsError {
    #[error("pair {0:?} not listed")]
    PairNotListed(PairIndex),

    #[error("unknown group index {0}")]
    GroupNotFound(u32),

    #[error("unknown fee index {0}")]
    FeeNotFound(u32),

    #[error("leverage {leverage} outside group bounds [{min}, {max}]")]
    LeverageOutOfBounds {
        leverage: Leverage,
        min: Leverage,
        max: Leverage,
    },

    #[error("position below minimum: {notional} < {minimum}")]
    BelowMinPosition { notional: Usdt, minimum: Usdt },
}

/// Catalog of listed pairs and their risk parameters.
#[derive(Debug, Clone)]
pub struct PairsStore {
    pairs: Vec<Pair>,
    groups: Vec<PairGroup>,
    fees: Vec<FeeSchedule>,
    params: Vec<PairParams>,
    // cap on negative open pnl from spread at intake, store-wide
    max_negative_pnl_on_open_p: Pct,
}

impl PairsStore {
    pub fn new() -> Self {
        Self {
            pairs: Vec::new(),
            groups: Vec::new(),
            fees: Vec::new(),
            params: Vec::new(),
            max_negative_pnl_on_open_p: Pct::percent(40),
        }
    }

    pub fn add_group(&mut self, group: PairGroup) -> u32 {
        self.groups.push(group);
        (self.groups.len() - 1) as u32
    }

    pub fn add_fee(&mut self, fee: FeeSchedule) -> u32 {
        self.fees.push(fee);
        (self.fees.len() - 1) as u32
    }

    pub fn add_pair(&mut self, pair: Pair) -> Result<PairIndex, PairsError> {
        if pair.group_index as usize >= self.groups.len() {
            return Err(PairsError::GroupNotFound(pair.group_index));
        }
        if pair.fee_index as usize >= self.fees.len() {
            return Err(PairsError::FeeNotFound(pair.fee_index));
        }
        self.pairs.push(pair);
        self.params.push(PairParams::default());
        Ok(PairIndex((self.pairs.len() - 1) as u32))
    }

    // governed replacement of a listed pair's parameters
    pub fn update_pair(&mut self, index: PairIndex, pair: Pair) -> Result<(), PairsError> {
        if pair.group_index as usize >= self.groups.len() {
            return Err(PairsError::GroupNotFound(pair.group_index));
        }
        if pair.fee_index as usize >= self.fees.len() {
            return Err(PairsError::FeeNotFound(pair.fee_index));
        }
        let slot = self
            .pairs
            .get_mut(index.0 as usize)
            .ok_or(PairsError::PairNotListed(index))?;
        *slot = pair;
        Ok(())
    }

    pub fn set_pair_params(&mut self, index: PairIndex, params: PairParams) -> Result<(), PairsError> {
        let slot = self
            .params
            .get_mut(index.0 as usize)
            .ok_or(PairsError::PairNotListed(index))?;
        *slot = params;
        Ok(())
    }

    pub fn set_max_negative_pnl_on_open_p(&mut self, p: Pct) {
        self.max_negative_pnl_on_open_p = p;
    }

    pub fn max_negative_pnl_on_open_p(&self) -> Pct {
        self.max_negative_pnl_on_open_p
    }

    pub fn pair(&self, index: PairIndex) -> Result<&Pair, PairsError> {
        self.pairs
            .get(index.0 as usize)
            .ok_or(PairsError::PairNotListed(index))
    }

    pub fn group(&self, index: PairIndex) -> Result<&PairGroup, PairsError> {
        let pair = self.pair(index)?;
        self.groups
            .get(pair.group_index as usize)
            .ok_or(PairsError::GroupNotFound(pair.group_index))
    }

    pub fn fee(&self, index: PairIndex) -> Result<&FeeSchedule, PairsError> {
        let pair = self.pair(index)?;
        self.fees
            .get(pair.fee_index as usize)
            .ok_or(PairsError::FeeNotFound(pair.fee_index))
    }

    pub fn params(&self, index: PairIndex) -> Result<&PairParams, PairsError> {
        self.params
            .get(index.0 as usize)
            .ok_or(PairsError::PairNotListed(index))
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    // leverage within group bounds and position above the fee schedule minimum
    pub fn check_position_shape(
        &self,
        index: PairIndex,
        collateral: Usdt,
        leverage: Leverage,
    ) -> Result<(), PairsError> {
        let group = self.group(index)?;
        if leverage.value() < group.min_leverage.value()
            || leverage.value() > group.max_leverage.value()
        {
            return Err(PairsError::LeverageOutOfBounds {
                leverage,
                min: group.min_leverage,
                max: group.max_leverage,
            });
        }

        let fee = self.fee(index)?;
        let notional = collateral.mul(leverage.value());
        if notional < fee.min_lev_pos {
            return Err(PairsError::BelowMinPosition {
                notional,
                minimum: fee.min_lev_pos,
            });
        }

        Ok(())
    }
}

// default two-pair listing used by the sim and tests
pub fn default_listing() -> PairsStore {
    let mut store = PairsStore::new();
    let group = store.add_group(PairGroup::default());
    let fee = store.add_fee(FeeSchedule::default());

    store
        .add_pair(Pair {
            base: "BTC".to_string(),
            quote: "USDT".to_string(),
            feed: PairFeed {
                primary: 0,
                secondary: None,
                calculation: FeedCalculation::Singular,
                max_deviation_p: Pct::new(15_000_000_000), // 1.5%
            },
            spread_p: Pct::ZERO,
            group_index: group,
            fee_index: fee,
        })
        .expect("listing btc");

    store
        .add_pair(Pair {
            base: "ETH".to_string(),
            quote: "USDT".to_string(),
            feed: PairFeed {
                primary: 1,
                secondary: None,
                calculation: FeedCalculation::Singular,
                max_deviation_p: Pct::new(15_000_000_000),
            },
            spread_p: Pct::ZERO,
            group_index: group,
            fee_index: fee,
        })
        .expect("listing eth");

    store
}
