// 7.0 custody.rs: MOCKED. the settlement asset as balance changes only, no
// real token transfers. escrow pulls and vault pulls both check balance and
// spender approval the way the external token would.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Trader, Usdt};

// internal accounts that may pull from a trader's wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spender {
    Ledger,
    Vault,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    #[error("usdt amount not enough: holding {holding}, need {need}")]
    InsufficientBalance { holding: Usdt, need: Usdt },

    #[error("spender not approved: approved {approved}, need {need}")]
    NotApproved { approved: Usdt, need: Usdt },
}

/// Balances of the settlement asset per address, plus spender approvals.
#[derive(Debug, Clone, Default)]
pub struct Wallet {
    balances: HashMap<Trader, Usdt>,
    approvals: HashMap<(Trader, Spender), Usdt>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self, owner: Trader, amount: Usdt) {
        let balance = self.balances.entry(owner).or_insert_with(Usdt::zero);
        *balance = balance.add(amount);
    }

    pub fn balance(&self, owner: Trader) -> Usdt {
        self.balances.get(&owner).copied().unwrap_or_else(Usdt::zero)
    }

    pub fn approve(&mut self, owner: Trader, spender: Spender, amount: Usdt) {
        self.approvals.insert((owner, spender), amount);
    }

    pub fn allowance(&self, owner: Trader, spender: Spender) -> Usdt {
        self.approvals
            .get(&(owner, spender))
            .copied()
            .unwrap_or_else(Usdt::zero)
    }

    // the pulled amount leaves the owner's wallet and decrements the approval.
    // callers credit their own internal pool.
    pub fn pull(&mut self, owner: Trader, spender: Spender, amount: Usdt) -> Result<(), CustodyError> {
        let holding = self.balance(owner);
        if holding < amount {
            return Err(CustodyError::InsufficientBalance {
                holding,
                need: amount,
            });
        }

        let approved = self.allowance(owner, spender);
        if approved < amount {
            return Err(CustodyError::NotApproved {
                approved,
                need: amount,
            });
        }

        self.balances.insert(owner, holding.sub(amount));
        self.approvals
            .insert((owner, spender), approved.sub(amount));
        Ok(())
    }

    // payouts and refunds land straight in the wallet
    pub fn push(&mut self, owner: Trader, amount: Usdt) {
        self.mint(owner, amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pull_moves_balance_and_allowance() {
        let mut wallet = Wallet::new();
        wallet.mint(Trader(1), Usdt::new(dec!(1000)));
        wallet.approve(Trader(1), Spender::Ledger, Usdt::new(dec!(600)));

        wallet.pull(Trader(1), Spender::Ledger, Usdt::new(dec!(400))).unwrap();
        assert_eq!(wallet.balance(Trader(1)).value(), dec!(600));
        assert_eq!(wallet.allowance(Trader(1), Spender::Ledger).value(), dec!(200));
    }

    #[test]
    fn pull_without_balance_fails() {
        let mut wallet = Wallet::new();
        wallet.mint(Trader(1), Usdt::new(dec!(100)));
        wallet.approve(Trader(1), Spender::Vault, Usdt::new(dec!(1000)));

        let result = wallet.pull(Trader(1), Spender::Vault, Usdt::new(dec!(500)));
        assert!(matches!(result, Err(CustodyError::InsufficientBalance { .. })));
        // nothing moved
        assert_eq!(wallet.balance(Trader(1)).value(), dec!(100));
    }

    #[test]
    fn pull_without_approval_fails() {
        let mut wallet = Wallet::new();
        wallet.mint(Trader(1), Usdt::new(dec!(1000)));

        let result = wallet.pull(Trader(1), Spender::Vault, Usdt::new(dec!(500)));
        assert!(matches!(result, Err(CustodyError::NotApproved { .. })));
    }

    #[test]
    fn approvals_are_per_spender() {
        let mut wallet = Wallet::new();
        wallet.mint(Trader(1), Usdt::new(dec!(1000)));
        wallet.approve(Trader(1), Spender::Ledger, Usdt::new(dec!(1000)));

        assert!(wallet.pull(Trader(1), Spender::Vault, Usdt::new(dec!(1))).is_err());
        assert!(wallet.pull(Trader(1), Spender::Ledger, Usdt::new(dec!(1))).is_ok());
    }
}
