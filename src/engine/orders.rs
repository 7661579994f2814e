// 8.5 engine/orders.rs: intake. everything here validates synchronously,
// escrows collateral where the operation needs it, and either finishes on the
// spot or leaves exactly one pending order correlated to one oracle round.

use tracing::{info, warn};

use super::results::{EngineError, OrderPlacement};
use super::Engine;
use crate::custody::Spender;
use crate::events::{
    BotOrderInitiatedEvent, EventPayload, MarketOpenCanceledEvent, MarketOrderInitiatedEvent,
    OpenLimitCanceledEvent, OpenLimitPlacedEvent, OpenLimitUpdatedEvent, PriceRequestedEvent,
    RequestTimedOutEvent, SlUpdateInitiatedEvent, SlUpdatedEvent, TpUpdatedEvent,
    VaultApplyCanceledEvent, VaultApplyEvent, VaultDepositRunEvent, VaultWithdrawRunEvent,
};
use crate::events::CancelReason;
use crate::oracle::RoundPair;
use crate::policy::Action;
use crate::trade::{self, BotOrderKind, OpenLimitOrder, OpenOrder, OrderType, PendingAction};
use crate::types::{PairIndex, Pct, Price, RequestId, TradeIndex, Trader, Usdt};
use rust_decimal::Decimal;

impl Engine {
    // 8.5.1: open intent, market or limit. admission is checked before any
    // price request; a rejected intent moves no money.
    pub fn open_trade(
        &mut self,
        caller: Trader,
        order: OpenOrder,
        order_type: OrderType,
        slippage_p: Pct,
    ) -> Result<OrderPlacement, EngineError> {
        if self.paused {
            return Err(EngineError::Paused);
        }
        self.policy.authorize(caller, Action::Trade(order.trader))?;

        let pair_index = order.pair_index;
        self.pairs
            .check_position_shape(pair_index, order.collateral, order.leverage)?;
        trade::validate_tp_sl(
            order.wanted_price,
            order.side,
            order.tp,
            order.sl,
            order.leverage,
            &self.config.trading,
        )?;

        let index = self.ledger.first_empty_trade_index(
            order.trader,
            pair_index,
            self.config.max_trades_per_pair,
        )?;

        let notional = order.collateral.mul(order.leverage.value());
        self.ledger.check_admission(
            pair_index,
            order.side,
            order.collateral,
            notional,
            self.config.max_pos_usdt,
            self.vault.total_assets(),
            self.config.vault_exposure_mult,
        )?;

        if self.oracle.node_count() == 0 {
            return Err(EngineError::Oracle(crate::oracle::OracleError::NoNodes));
        }

        // collateral escrows at intake, before the price is known
        self.wallet
            .pull(order.trader, Spender::Ledger, order.collateral)?;
        self.ledger.credit_cash(order.collateral);

        match order_type {
            OrderType::Market => {
                let request_id = self.request_round(vec![pair_index])?;
                let trader = order.trader;
                let escrow = order.collateral;
                let referral_code = order.referral_code;

                self.ledger.register_pending(
                    request_id,
                    PendingAction::MarketOpen {
                        order,
                        slippage_p,
                        escrow,
                    },
                )?;

                info!(?request_id, ?trader, ?pair_index, "market open initiated");
                self.emit_event(EventPayload::MarketOrderInitiated(MarketOrderInitiatedEvent {
                    request_id,
                    trader,
                    pair_index,
                    open: true,
                    referral_code,
                }));

                Ok(OrderPlacement::Requested(request_id))
            }
            OrderType::Limit => {
                let placed = OpenLimitOrder {
                    index,
                    slippage_p,
                    escrow: order.collateral,
                    placed_at: self.current_time,
                    order,
                };
                let trader = placed.order.trader;
                let wanted_price = placed.order.wanted_price;
                let side = placed.order.side;

                self.ledger.store_limit_order(placed)?;

                info!(?trader, ?pair_index, ?index, "limit order placed");
                self.emit_event(EventPayload::OpenLimitPlaced(OpenLimitPlacedEvent {
                    trader,
                    pair_index,
                    index,
                    wanted_price,
                    side,
                }));

                Ok(OrderPlacement::LimitPlaced(index))
            }
        }
    }

    // 8.5.2: market close. price-dependent, so it only parks a pending order.
    pub fn close_trade_market(
        &mut self,
        caller: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
    ) -> Result<RequestId, EngineError> {
        let trade = self
            .ledger
            .trade(caller, pair_index, index)
            .ok_or(EngineError::TradeNotFound {
                trader: caller,
                pair: pair_index,
                index,
            })?;
        let trader = trade.trader;

        if self.ledger.is_busy(trader, pair_index, index) {
            return Err(EngineError::Ledger(
                crate::ledger::LedgerError::OrderAlreadyPending,
            ));
        }

        let request_id = self.request_round(vec![pair_index])?;
        self.ledger.register_pending(
            request_id,
            PendingAction::MarketClose {
                trader,
                pair_index,
                index,
            },
        )?;

        info!(?request_id, ?trader, ?pair_index, ?index, "market close initiated");
        self.emit_event(EventPayload::MarketOrderInitiated(MarketOrderInitiatedEvent {
            request_id,
            trader,
            pair_index,
            open: false,
            referral_code: 0,
        }));

        Ok(request_id)
    }

    // 8.5.3: tp updates settle synchronously; no price dependency.
    pub fn update_tp(
        &mut self,
        caller: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
        new_tp: Option<Price>,
    ) -> Result<(), EngineError> {
        let params = self.config.trading;
        let trade = self
            .ledger
            .trade_mut(caller, pair_index, index)
            .ok_or(EngineError::TradeNotFound {
                trader: caller,
                pair: pair_index,
                index,
            })?;

        if let Some(tp) = new_tp {
            trade::validate_tp(trade.open_price, trade.side, tp, trade.leverage, &params)?;
        }
        trade.tp = new_tp;

        self.emit_event(EventPayload::TpUpdated(TpUpdatedEvent {
            trader: caller,
            pair_index,
            index,
            tp: new_tp,
        }));
        Ok(())
    }

    // 8.5.4: disabling a stop is synchronous. setting one needs a price round
    // so a stop the live price already crossed settles as canceled instead of
    // arming a guaranteed-loss trigger.
    pub fn update_sl(
        &mut self,
        caller: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
        new_sl: Option<Price>,
    ) -> Result<Option<RequestId>, EngineError> {
        let params = self.config.trading;
        let (open_price, side, leverage) = {
            let trade = self
                .ledger
                .trade(caller, pair_index, index)
                .ok_or(EngineError::TradeNotFound {
                    trader: caller,
                    pair: pair_index,
                    index,
                })?;
            (trade.open_price, trade.side, trade.leverage)
        };

        let Some(new_sl) = new_sl else {
            let trade = self
                .ledger
                .trade_mut(caller, pair_index, index)
                .expect("trade checked above");
            trade.sl = None;

            self.emit_event(EventPayload::SlUpdated(SlUpdatedEvent {
                trader: caller,
                pair_index,
                index,
                sl: None,
            }));
            return Ok(None);
        };

        trade::validate_sl(open_price, side, new_sl, leverage, &params)?;

        if self.ledger.is_busy(caller, pair_index, index) {
            return Err(EngineError::Ledger(
                crate::ledger::LedgerError::OrderAlreadyPending,
            ));
        }

        let request_id = self.request_round(vec![pair_index])?;
        self.ledger.register_pending(
            request_id,
            PendingAction::SlUpdate {
                trader: caller,
                pair_index,
                index,
                new_sl,
            },
        )?;

        self.emit_event(EventPayload::SlUpdateInitiated(SlUpdateInitiatedEvent {
            request_id,
            trader: caller,
            pair_index,
            index,
            new_sl,
        }));
        Ok(Some(request_id))
    }

    // 8.5.5: reprice a parked limit order. escrow stays put.
    pub fn update_open_limit_order(
        &mut self,
        caller: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
        new_price: Price,
        tp: Option<Price>,
        sl: Option<Price>,
    ) -> Result<(), EngineError> {
        let params = self.config.trading;
        let order = self
            .ledger
            .limit_order_mut(caller, pair_index, index)
            .ok_or(EngineError::LimitOrderNotFound {
                trader: caller,
                pair: pair_index,
                index,
            })?;

        trade::validate_tp_sl(new_price, order.order.side, tp, sl, order.order.leverage, &params)?;

        order.order.wanted_price = new_price;
        order.order.tp = tp;
        order.order.sl = sl;
        order.placed_at = self.current_time;

        self.emit_event(EventPayload::OpenLimitUpdated(OpenLimitUpdatedEvent {
            trader: caller,
            pair_index,
            index,
            wanted_price: new_price,
            tp,
            sl,
        }));
        Ok(())
    }

    pub fn cancel_open_limit_order(
        &mut self,
        caller: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
    ) -> Result<(), EngineError> {
        if self.ledger.is_busy(caller, pair_index, index) {
            return Err(EngineError::Ledger(
                crate::ledger::LedgerError::OrderAlreadyPending,
            ));
        }

        let order = self
            .ledger
            .remove_limit_order(caller, pair_index, index)
            .map_err(|_| EngineError::LimitOrderNotFound {
                trader: caller,
                pair: pair_index,
                index,
            })?;

        self.ledger.debit_cash(order.escrow);
        self.wallet.push(caller, order.escrow);

        self.emit_event(EventPayload::OpenLimitCanceled(OpenLimitCanceledEvent {
            trader: caller,
            pair_index,
            index,
            refund: order.escrow,
        }));
        Ok(())
    }

    // 8.5.6: bot triggers. tp, sl, liquidation and parked limit orders all
    // run the same two-phase path as trader-initiated orders; exposure
    // failures reject here, synchronously, before any round is issued.
    pub fn execute_bot_order(
        &mut self,
        caller: Trader,
        kind: BotOrderKind,
        trader: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
    ) -> Result<RequestId, EngineError> {
        self.policy.authorize(caller, Action::TriggerBot)?;

        match kind {
            BotOrderKind::LimitOpen => {
                if self.paused {
                    return Err(EngineError::Paused);
                }
                let order = self
                    .ledger
                    .limit_order(trader, pair_index, index)
                    .ok_or(EngineError::LimitOrderNotFound {
                        trader,
                        pair: pair_index,
                        index,
                    })?;

                let age = self.current_time.as_millis() - order.placed_at.as_millis();
                if age < self.config.limit_order_timelock_ms {
                    return Err(EngineError::TimelockActive);
                }

                // exposure can have moved since placement
                let notional = order.escrow.mul(order.order.leverage.value());
                self.ledger.check_admission(
                    pair_index,
                    order.order.side,
                    order.escrow,
                    notional,
                    self.config.max_pos_usdt,
                    self.vault.total_assets(),
                    self.config.vault_exposure_mult,
                )?;
            }
            BotOrderKind::TakeProfit | BotOrderKind::StopLoss | BotOrderKind::Liquidation => {
                let trade = self
                    .ledger
                    .trade(trader, pair_index, index)
                    .ok_or(EngineError::TradeNotFound {
                        trader,
                        pair: pair_index,
                        index,
                    })?;

                if kind == BotOrderKind::TakeProfit && trade.tp.is_none() {
                    return Err(EngineError::NoTpSet);
                }
                if kind == BotOrderKind::StopLoss && trade.sl.is_none() {
                    return Err(EngineError::NoSlSet);
                }
            }
        }

        if self.ledger.is_busy(trader, pair_index, index) {
            return Err(EngineError::Ledger(
                crate::ledger::LedgerError::OrderAlreadyPending,
            ));
        }

        let request_id = self.request_round(vec![pair_index])?;
        self.ledger.register_pending(
            request_id,
            PendingAction::BotTrigger {
                kind,
                trader,
                pair_index,
                index,
            },
        )?;

        info!(?request_id, ?kind, ?trader, ?pair_index, ?index, "bot order initiated");
        self.emit_event(EventPayload::BotOrderInitiated(BotOrderInitiatedEvent {
            request_id,
            kind,
            trader,
            pair_index,
            index,
        }));

        Ok(request_id)
    }

    // 8.5.7: timeout sweep. expired rounds cancel their orders and refund any
    // escrow; nothing settles after this for those ids.
    pub fn sweep_timeouts(&mut self) -> Vec<RequestId> {
        let now = self.current_time;
        let expired = self.oracle.expire(now);

        for request_id in &expired {
            let refund = match self.ledger.take_pending(*request_id) {
                Ok(PendingAction::MarketOpen { order, escrow, .. }) => {
                    self.ledger.debit_cash(escrow);
                    self.wallet.push(order.trader, escrow);

                    warn!(?request_id, trader = ?order.trader, "market open timed out, refunding");
                    self.emit_event(EventPayload::MarketOpenCanceled(MarketOpenCanceledEvent {
                        request_id: *request_id,
                        trader: order.trader,
                        pair_index: order.pair_index,
                        refund: escrow,
                        reason: CancelReason::Timeout,
                    }));
                    escrow
                }
                Ok(_) => Usdt::zero(),
                Err(_) => Usdt::zero(),
            };

            self.emit_event(EventPayload::RequestTimedOut(RequestTimedOutEvent {
                request_id: *request_id,
                refund,
            }));
        }

        expired
    }

    // 8.5.8: vault operations. applies are trader-facing; runs are gated on
    // the pnl feed and verified against the settlement sequence.
    pub fn apply_deposit(
        &mut self,
        caller: Trader,
        amount: Usdt,
        beneficiary: Trader,
    ) -> Result<RequestId, EngineError> {
        let request_id = self.vault.apply_deposit(caller, amount, beneficiary)?;

        self.emit_event(EventPayload::VaultDepositApplied(VaultApplyEvent {
            request_id,
            from: caller,
            beneficiary,
            amount: amount.value(),
        }));
        Ok(request_id)
    }

    pub fn run_deposit(
        &mut self,
        caller: Trader,
        request_id: RequestId,
        upnl: Usdt,
        proof: u64,
    ) -> Result<(), EngineError> {
        self.policy.authorize(caller, Action::FeedPnl)?;

        let receipt = self.vault.run_deposit(
            &mut self.wallet,
            request_id,
            upnl,
            proof,
            self.ledger.upnl_last_id(),
            self.current_time,
        )?;

        info!(?request_id, shares = %receipt.shares_minted, "deposit settled");
        self.emit_event(EventPayload::VaultDepositRun(VaultDepositRunEvent {
            request_id,
            beneficiary: receipt.beneficiary,
            amount: receipt.amount,
            shares_minted: receipt.shares_minted,
            lock_id: receipt.lock_id,
        }));
        Ok(())
    }

    pub fn apply_withdraw(
        &mut self,
        caller: Trader,
        shares: Decimal,
        beneficiary: Trader,
    ) -> Result<RequestId, EngineError> {
        let request_id = self
            .vault
            .apply_withdraw(caller, shares, beneficiary, self.current_time)?;

        self.emit_event(EventPayload::VaultWithdrawApplied(VaultApplyEvent {
            request_id,
            from: caller,
            beneficiary,
            amount: shares,
        }));
        Ok(request_id)
    }

    pub fn run_withdraw(
        &mut self,
        caller: Trader,
        request_id: RequestId,
        upnl: Usdt,
        proof: u64,
    ) -> Result<(), EngineError> {
        self.policy.authorize(caller, Action::FeedPnl)?;

        let receipt = self.vault.run_withdraw(
            &mut self.wallet,
            request_id,
            upnl,
            proof,
            self.ledger.upnl_last_id(),
            self.current_time,
        )?;

        info!(?request_id, payout = %receipt.payout, "withdraw settled");
        self.emit_event(EventPayload::VaultWithdrawRun(VaultWithdrawRunEvent {
            request_id,
            beneficiary: receipt.beneficiary,
            shares_burned: receipt.shares_burned,
            payout: receipt.payout,
        }));
        Ok(())
    }

    pub fn cancel_apply(&mut self, caller: Trader, request_id: RequestId) -> Result<(), EngineError> {
        self.vault.cancel_apply(caller, request_id)?;

        self.emit_event(EventPayload::VaultApplyCanceled(VaultApplyCanceledEvent {
            request_id,
            from: caller,
        }));
        Ok(())
    }

    // one price round over the given pairs, with their deviation bounds
    pub(crate) fn request_round(&mut self, pairs: Vec<PairIndex>) -> Result<RequestId, EngineError> {
        let mut round_pairs = Vec::with_capacity(pairs.len());
        for pair_index in &pairs {
            let pair = self.pairs.pair(*pair_index)?;
            round_pairs.push(RoundPair {
                pair_index: *pair_index,
                max_deviation_p: pair.feed.max_deviation_p,
            });
        }

        let request_id = self.oracle.request(round_pairs, self.current_time)?;

        self.emit_event(EventPayload::PriceRequested(PriceRequestedEvent {
            request_id,
            pairs,
            nodes: self.oracle.node_count(),
        }));
        Ok(request_id)
    }
}
