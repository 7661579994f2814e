// 10.0 policy.rs: capability checks. every privileged operation names the
// action it needs and the policy answers at the boundary, so role logic never
// leaks into settlement code.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::Trader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    // listing updates, caps, pause/resume
    Govern,
    // pair risk parameter tuning
    ManageRisk,
    // vault settlement with a upnl figure
    FeedPnl,
    // tp/sl/liquidation/limit triggers and adl batches
    TriggerBot,
    // acting on a specific trader's own positions
    Trade(Trader),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("caller is not gov")]
    NotGov,

    #[error("caller is not the risk manager")]
    NotManager,

    #[error("not feed address")]
    NotPnlFeed,

    #[error("caller is not a whitelisted bot")]
    NotBot,

    #[error("caller is not the position owner")]
    NotOwner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub gov: Trader,
    pub manager: Trader,
    pub pnl_feed: Trader,
    bots: HashSet<Trader>,
}

impl Policy {
    pub fn new(gov: Trader, manager: Trader, pnl_feed: Trader) -> Self {
        Self {
            gov,
            manager,
            pnl_feed,
            bots: HashSet::new(),
        }
    }

    pub fn add_bot(&mut self, bot: Trader) {
        self.bots.insert(bot);
    }

    pub fn remove_bot(&mut self, bot: Trader) {
        self.bots.remove(&bot);
    }

    pub fn authorize(&self, caller: Trader, action: Action) -> Result<(), AuthError> {
        match action {
            Action::Govern => {
                if caller == self.gov {
                    Ok(())
                } else {
                    Err(AuthError::NotGov)
                }
            }
            Action::ManageRisk => {
                if caller == self.manager || caller == self.gov {
                    Ok(())
                } else {
                    Err(AuthError::NotManager)
                }
            }
            Action::FeedPnl => {
                if caller == self.pnl_feed {
                    Ok(())
                } else {
                    Err(AuthError::NotPnlFeed)
                }
            }
            Action::TriggerBot => {
                if self.bots.contains(&caller) {
                    Ok(())
                } else {
                    Err(AuthError::NotBot)
                }
            }
            Action::Trade(owner) => {
                if caller == owner {
                    Ok(())
                } else {
                    Err(AuthError::NotOwner)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Policy {
        let mut p = Policy::new(Trader(100), Trader(101), Trader(102));
        p.add_bot(Trader(103));
        p
    }

    #[test]
    fn roles_are_disjoint() {
        let p = policy();

        p.authorize(Trader(100), Action::Govern).unwrap();
        assert_eq!(p.authorize(Trader(101), Action::Govern), Err(AuthError::NotGov));

        p.authorize(Trader(102), Action::FeedPnl).unwrap();
        assert_eq!(p.authorize(Trader(100), Action::FeedPnl), Err(AuthError::NotPnlFeed));

        p.authorize(Trader(103), Action::TriggerBot).unwrap();
        assert_eq!(p.authorize(Trader(100), Action::TriggerBot), Err(AuthError::NotBot));
    }

    #[test]
    fn gov_can_manage_risk() {
        let p = policy();
        p.authorize(Trader(101), Action::ManageRisk).unwrap();
        p.authorize(Trader(100), Action::ManageRisk).unwrap();
        assert_eq!(
            p.authorize(Trader(103), Action::ManageRisk),
            Err(AuthError::NotManager)
        );
    }

    #[test]
    fn only_the_owner_trades_their_positions() {
        let p = policy();
        p.authorize(Trader(7), Action::Trade(Trader(7))).unwrap();
        assert_eq!(
            p.authorize(Trader(8), Action::Trade(Trader(7))),
            Err(AuthError::NotOwner)
        );
    }

    #[test]
    fn bot_whitelist_is_mutable() {
        let mut p = policy();
        p.remove_bot(Trader(103));
        assert_eq!(p.authorize(Trader(103), Action::TriggerBot), Err(AuthError::NotBot));
    }
}
