// 1.0: all the primitives live here. nothing in the engine works without these types.
// IDs, prices, amounts, leverage, scaled percentages, timestamps. each is a newtype
// so the compiler catches type mixups.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairIndex(pub u32);

// on-chain this would be an address. a plain integer keeps the engine deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Trader(pub u64);

// correlation key for one oracle round. monotonically increasing, settles exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

// per-trader per-pair position slot. bounded by max_trades_per_pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeIndex(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockId(pub u64);

// Long = profit when price goes up. Short = profit when price goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => dec!(1),
            Side::Short => dec!(-1),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

// 1.1: price in quote currency per unit of base. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: settlement-asset amount. collateral, fees, pnl, vault assets all use this.
// can go negative (pnl deltas, fed upnl).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usdt(Decimal);

impl Usdt {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn add(&self, other: Usdt) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: Usdt) -> Self {
        Self(self.0 - other.0)
    }

    pub fn mul(&self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }

    pub fn min(&self, other: Usdt) -> Self {
        Self(self.0.min(other.0))
    }
}

impl fmt::Display for Usdt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Usdt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Usdt {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Sum for Usdt {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(q))
    }
}

impl<'a> Sum<&'a Usdt> for Usdt {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(*q))
    }
}

// 1.3: leverage multiplier. must be >= 1x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leverage(Decimal);

impl Leverage {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ONE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// 1.4: scaled percentage. stored as percent * 1e10, so 1% = 1e10 and
// 8e8 = 0.08%. fee schedules, slippage tolerances and deviation bounds
// all use this fixed scale; conversion to a Decimal fraction happens in
// one place so the arithmetic stays exactly reproducible.
pub const PCT_SCALE: i64 = 10_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pct(i64);

impl Pct {
    pub const ZERO: Pct = Pct(0);

    pub const fn new(scaled: i64) -> Self {
        Self(scaled)
    }

    // whole percent, e.g. Pct::percent(75) = 75%
    pub const fn percent(p: i64) -> Self {
        Self(p * PCT_SCALE)
    }

    pub fn scaled(&self) -> i64 {
        self.0
    }

    // percent as a plain number: Pct::percent(75).as_percent() == 75
    pub fn as_percent(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(PCT_SCALE)
    }

    // fraction usable as a multiplier: 0.08% -> 0.0008
    pub fn as_fraction(&self) -> Decimal {
        Decimal::from(self.0) / (Decimal::from(PCT_SCALE) * dec!(100))
    }
}

impl fmt::Display for Pct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percent())
    }
}

// 1.5: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn elapsed_hours(&self, other: &Timestamp) -> Decimal {
        let diff_ms = (other.0 - self.0).abs();
        Decimal::new(diff_ms, 0) / dec!(3_600_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pct_scale_conversion() {
        // 0.08% open fee as deployed: 8e8 scaled
        let open_fee = Pct::new(800_000_000);
        assert_eq!(open_fee.as_percent(), dec!(0.08));
        assert_eq!(open_fee.as_fraction(), dec!(0.0008));

        let max_gain = Pct::percent(900);
        assert_eq!(max_gain.as_percent(), dec!(900));
        assert_eq!(max_gain.as_fraction(), dec!(9));
    }

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), dec!(1));
        assert_eq!(Side::Short.sign(), dec!(-1));
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn usdt_arithmetic() {
        let a = Usdt::new(dec!(1000));
        let b = Usdt::new(dec!(8));
        assert_eq!(a.sub(b).value(), dec!(992));
        assert_eq!(a.mul(dec!(10)).value(), dec!(10000));
        assert!(Usdt::new(dec!(-1)).is_negative());
    }

    #[test]
    fn leverage_bounds() {
        assert!(Leverage::new(dec!(0.5)).is_none());
        assert_eq!(Leverage::new(dec!(10)).unwrap().value(), dec!(10));
    }

    #[test]
    fn timestamp_elapsed_hours() {
        let t0 = Timestamp::from_millis(0);
        let t1 = Timestamp::from_millis(3_600_000);
        assert_eq!(t0.elapsed_hours(&t1), dec!(1));
    }

    #[test]
    fn now_captures_the_wall_clock() {
        let before = chrono::Utc::now().timestamp_millis();
        let captured = Timestamp::now();
        let after = chrono::Utc::now().timestamp_millis();

        assert!(before <= captured.as_millis());
        assert!(captured.as_millis() <= after);
    }
}
