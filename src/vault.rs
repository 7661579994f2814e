// 8.0 vault.rs: pooled trader-facing capital as a share token. deposits and
// withdrawals settle in two steps: an apply records intent, a run executes it
// against a nav that folds in the externally fed unrealized pnl. shares
// minted by a deposit stay locked for the configured duration; locked shares
// cannot move, not even by plain transfer.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::custody::{CustodyError, Spender, Wallet};
use crate::types::{LockId, RequestId, Timestamp, Trader, Usdt};

// share and asset amounts settle at 6 decimal places, truncated like the
// underlying token's integer math
const SHARE_DP: u32 = 6;

fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SHARE_DP, RoundingStrategy::ToZero)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockEntry {
    pub id: LockId,
    pub shares: Decimal,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum PendingApply {
    Deposit {
        from: Trader,
        amount: Usdt,
        beneficiary: Trader,
    },
    Withdraw {
        from: Trader,
        shares: Decimal,
        beneficiary: Trader,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct ApplyState {
    deposit: Option<RequestId>,
    withdraw: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("request id not found")]
    RequestIdNotFound,

    #[error("uPnl verify failed")]
    UpnlVerifyFailed,

    #[error("insufficient unlocked: unlocked {unlocked}, need {need}")]
    InsufficientUnlocked { unlocked: Decimal, need: Decimal },

    #[error("an apply is already outstanding for this address")]
    OutstandingApply,

    #[error("share balance below the applied amount")]
    InsufficientShares,

    #[error("vault assets cannot cover {need}")]
    InsufficientAssets { need: Usdt },

    #[error("net asset value is not positive")]
    InvalidNav,

    #[error(transparent)]
    Custody(#[from] CustodyError),
}

#[derive(Debug, Clone)]
pub struct DepositReceipt {
    pub request_id: RequestId,
    pub from: Trader,
    pub beneficiary: Trader,
    pub amount: Usdt,
    pub shares_minted: Decimal,
    pub lock_id: LockId,
}

#[derive(Debug, Clone)]
pub struct WithdrawReceipt {
    pub request_id: RequestId,
    pub from: Trader,
    pub beneficiary: Trader,
    pub shares_burned: Decimal,
    pub payout: Usdt,
}

/// The share-token liquidity pool.
#[derive(Debug)]
pub struct Vault {
    balances: HashMap<Trader, Decimal>,
    total_supply: Decimal,
    // principal assets; fed upnl is layered on top at valuation time
    assets: Usdt,
    lock_duration_ms: i64,
    locks: HashMap<Trader, VecDeque<LockEntry>>,
    applies: HashMap<Trader, ApplyState>,
    requests: HashMap<RequestId, PendingApply>,
    next_request_id: u64,
    next_lock_id: u64,
}

impl Vault {
    pub fn new(lock_duration_ms: i64) -> Self {
        Self {
            balances: HashMap::new(),
            total_supply: Decimal::ZERO,
            assets: Usdt::zero(),
            lock_duration_ms,
            locks: HashMap::new(),
            applies: HashMap::new(),
            requests: HashMap::new(),
            next_request_id: 1,
            next_lock_id: 1,
        }
    }

    // 8.1: valuation. fed upnl is the trader-side aggregate, so positive
    // upnl is a liability and lowers nav.
    fn nav_assets(&self, upnl: Usdt) -> Usdt {
        self.assets.sub(upnl)
    }

    pub fn total_supply(&self) -> Decimal {
        self.total_supply
    }

    pub fn total_assets(&self) -> Usdt {
        self.assets
    }

    pub fn balance_of(&self, owner: Trader) -> Decimal {
        self.balances.get(&owner).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn locked_balance(&self, owner: Trader, now: Timestamp) -> Decimal {
        self.locks
            .get(&owner)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| now.as_millis() < e.created_at.as_millis() + self.lock_duration_ms)
                    .map(|e| e.shares)
                    .sum()
            })
            .unwrap_or(Decimal::ZERO)
    }

    pub fn unlocked_balance(&self, owner: Trader, now: Timestamp) -> Decimal {
        let unlocked = self.balance_of(owner) - self.locked_balance(owner, now);
        unlocked.max(Decimal::ZERO)
    }

    pub fn lock_info(&self, id: LockId) -> Option<LockEntry> {
        self.locks
            .values()
            .flat_map(|entries| entries.iter())
            .find(|e| e.id == id)
            .copied()
    }

    pub fn outstanding_deposit(&self, owner: Trader) -> Option<RequestId> {
        self.applies.get(&owner).and_then(|a| a.deposit)
    }

    pub fn outstanding_withdraw(&self, owner: Trader) -> Option<RequestId> {
        self.applies.get(&owner).and_then(|a| a.withdraw)
    }

    // 8.2: deposit intent. nothing moves yet.
    pub fn apply_deposit(
        &mut self,
        caller: Trader,
        amount: Usdt,
        beneficiary: Trader,
    ) -> Result<RequestId, VaultError> {
        let state = self.applies.entry(caller).or_default();
        if state.deposit.is_some() {
            return Err(VaultError::OutstandingApply);
        }

        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;

        state.deposit = Some(id);
        self.requests.insert(
            id,
            PendingApply::Deposit {
                from: caller,
                amount,
                beneficiary,
            },
        );
        Ok(id)
    }

    // 8.3: deposit settlement, pnl-feed gated at the engine boundary.
    // proof is the upnl sequence snapshot the fed figure was computed at.
    pub fn run_deposit(
        &mut self,
        wallet: &mut Wallet,
        request_id: RequestId,
        upnl: Usdt,
        proof: u64,
        upnl_last_id: u64,
        now: Timestamp,
    ) -> Result<DepositReceipt, VaultError> {
        let (from, amount, beneficiary) = match self.requests.get(&request_id) {
            Some(PendingApply::Deposit {
                from,
                amount,
                beneficiary,
            }) => (*from, *amount, *beneficiary),
            _ => return Err(VaultError::RequestIdNotFound),
        };

        if proof != upnl_last_id {
            return Err(VaultError::UpnlVerifyFailed);
        }

        let shares = if self.total_supply.is_zero() {
            amount.value()
        } else {
            let nav = self.nav_assets(upnl);
            if nav.value() <= Decimal::ZERO {
                return Err(VaultError::InvalidNav);
            }
            quantize(amount.value() * self.total_supply / nav.value())
        };

        // the failed pull leaves the request pending for a retry
        wallet.pull(from, Spender::Vault, amount)?;

        self.assets = self.assets.add(amount);
        self.total_supply += shares;
        *self.balances.entry(beneficiary).or_insert(Decimal::ZERO) += shares;

        let lock_id = LockId(self.next_lock_id);
        self.next_lock_id += 1;
        self.locks.entry(beneficiary).or_default().push_back(LockEntry {
            id: lock_id,
            shares,
            created_at: now,
        });

        self.clear_request(request_id);

        Ok(DepositReceipt {
            request_id,
            from,
            beneficiary,
            amount,
            shares_minted: shares,
            lock_id,
        })
    }

    // 8.4: withdraw intent. only unlocked shares may be queued.
    pub fn apply_withdraw(
        &mut self,
        caller: Trader,
        shares: Decimal,
        beneficiary: Trader,
        now: Timestamp,
    ) -> Result<RequestId, VaultError> {
        let unlocked = self.unlocked_balance(caller, now);
        if shares > unlocked {
            return Err(VaultError::InsufficientUnlocked {
                unlocked,
                need: shares,
            });
        }

        let state = self.applies.entry(caller).or_default();
        if state.withdraw.is_some() {
            return Err(VaultError::OutstandingApply);
        }

        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;

        state.withdraw = Some(id);
        self.requests.insert(
            id,
            PendingApply::Withdraw {
                from: caller,
                shares,
                beneficiary,
            },
        );
        Ok(id)
    }

    pub fn run_withdraw(
        &mut self,
        wallet: &mut Wallet,
        request_id: RequestId,
        upnl: Usdt,
        proof: u64,
        upnl_last_id: u64,
        _now: Timestamp,
    ) -> Result<WithdrawReceipt, VaultError> {
        let (from, shares, beneficiary) = match self.requests.get(&request_id) {
            Some(PendingApply::Withdraw {
                from,
                shares,
                beneficiary,
            }) => (*from, *shares, *beneficiary),
            _ => return Err(VaultError::RequestIdNotFound),
        };

        if proof != upnl_last_id {
            return Err(VaultError::UpnlVerifyFailed);
        }

        if self.balance_of(from) < shares {
            return Err(VaultError::InsufficientShares);
        }

        let nav = self.nav_assets(upnl);
        if nav.value() <= Decimal::ZERO || self.total_supply.is_zero() {
            return Err(VaultError::InvalidNav);
        }

        let payout = Usdt::new(quantize(shares * nav.value() / self.total_supply));
        if payout > self.assets {
            return Err(VaultError::InsufficientAssets { need: payout });
        }

        self.total_supply -= shares;
        *self.balances.entry(from).or_insert(Decimal::ZERO) -= shares;
        self.consume_locks(from, shares);
        self.assets = self.assets.sub(payout);
        wallet.push(beneficiary, payout);

        self.clear_request(request_id);

        Ok(WithdrawReceipt {
            request_id,
            from,
            beneficiary,
            shares_burned: shares,
            payout,
        })
    }

    // clears a not-yet-settled apply, restoring pre-apply state
    pub fn cancel_apply(&mut self, caller: Trader, request_id: RequestId) -> Result<(), VaultError> {
        let state = self.applies.get(&caller).copied().unwrap_or_default();

        if state.deposit == Some(request_id) || state.withdraw == Some(request_id) {
            self.clear_request(request_id);
            Ok(())
        } else {
            Err(VaultError::RequestIdNotFound)
        }
    }

    // 8.5: share transfers obey the lock. every balance reduction drains the
    // holder's lock entries oldest-first; received shares arrive unlocked.
    pub fn transfer(
        &mut self,
        from: Trader,
        to: Trader,
        shares: Decimal,
        now: Timestamp,
    ) -> Result<(), VaultError> {
        let unlocked = self.unlocked_balance(from, now);
        if shares > unlocked {
            return Err(VaultError::InsufficientUnlocked {
                unlocked,
                need: shares,
            });
        }

        *self.balances.entry(from).or_insert(Decimal::ZERO) -= shares;
        *self.balances.entry(to).or_insert(Decimal::ZERO) += shares;
        self.consume_locks(from, shares);
        Ok(())
    }

    // 8.6: settlement cash flows, engine gated. retained margin flows in,
    // payout shortfalls flow out.
    pub fn receive_assets(&mut self, amount: Usdt) {
        self.assets = self.assets.add(amount);
    }

    pub fn send_assets(&mut self, amount: Usdt) -> Result<(), VaultError> {
        if amount > self.assets {
            return Err(VaultError::InsufficientAssets { need: amount });
        }
        self.assets = self.assets.sub(amount);
        Ok(())
    }

    fn consume_locks(&mut self, owner: Trader, mut shares: Decimal) {
        if let Some(entries) = self.locks.get_mut(&owner) {
            while shares > Decimal::ZERO {
                let Some(front) = entries.front_mut() else {
                    break;
                };
                if front.shares > shares {
                    front.shares -= shares;
                    break;
                }
                shares -= front.shares;
                entries.pop_front();
            }
        }
    }

    fn clear_request(&mut self, request_id: RequestId) {
        if let Some(pending) = self.requests.remove(&request_id) {
            let owner = match pending {
                PendingApply::Deposit { from, .. } => from,
                PendingApply::Withdraw { from, .. } => from,
            };
            if let Some(state) = self.applies.get_mut(&owner) {
                if state.deposit == Some(request_id) {
                    state.deposit = None;
                }
                if state.withdraw == Some(request_id) {
                    state.withdraw = None;
                }
            }
        }
    }
}
