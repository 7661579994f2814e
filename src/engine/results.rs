// 8.0.2: result types and errors for engine operations.

use crate::custody::CustodyError;
use crate::ledger::LedgerError;
use crate::oracle::OracleError;
use crate::pairs::PairsError;
use crate::policy::AuthError;
use crate::trade::TradeError;
use crate::types::{PairIndex, RequestId, TradeIndex, Trader};
use crate::vault::VaultError;

/// How an open intent left the intake path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPlacement {
    // a price round is in flight; completion arrives as an event
    Requested(RequestId),
    // limit order parked, waiting for a bot trigger
    LimitPlaced(TradeIndex),
}

impl OrderPlacement {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            OrderPlacement::Requested(id) => Some(*id),
            OrderPlacement::LimitPlaced(_) => None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("trading is paused")]
    Paused,

    #[error("trade not found: trader {trader:?} pair {pair:?} index {index:?}")]
    TradeNotFound {
        trader: Trader,
        pair: PairIndex,
        index: TradeIndex,
    },

    #[error("limit order not found: trader {trader:?} pair {pair:?} index {index:?}")]
    LimitOrderNotFound {
        trader: Trader,
        pair: PairIndex,
        index: TradeIndex,
    },

    #[error("no take profit set on this trade")]
    NoTpSet,

    #[error("no stop loss set on this trade")]
    NoSlSet,

    #[error("limit order is inside its trigger timelock")]
    TimelockActive,

    #[error("batch arrays must share one non-zero length")]
    ArrayLengthMismatch,

    #[error("pair {0:?} is not covered by the batch price round")]
    PairNotInRound(PairIndex),

    #[error(transparent)]
    Pairs(#[from] PairsError),

    #[error(transparent)]
    Trade(#[from] TradeError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Custody(#[from] CustodyError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}
