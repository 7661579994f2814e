// 8.6 engine/settle.rs: price delivery. answers flow in through the gateway;
// the single settled round per request id is routed to the pending order it
// correlates with. every handler is a full state transition: fees, pnl,
// ledger, vault and events move together or not at all.

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::results::EngineError;
use super::Engine;
use crate::events::{
    BotCancelReason, BotOrderCanceledEvent, CancelReason, EventPayload, LimitExecutedEvent,
    MarketExecutedEvent, MarketOpenCanceledEvent, SlCanceledEvent, SlUpdatedEvent,
    UpnlIdAdvancedEvent,
};
use crate::oracle::{OracleError, SettledPrices};
use crate::pnl::{self, CloseBreakdown};
use crate::trade::{self, BotOrderKind, OpenOrder, PendingAction, Trade};
use crate::types::{NodeId, PairIndex, Pct, Price, RequestId, TradeIndex, Trader, Usdt};

impl Engine {
    // 8.6.1: answer ingestion. returns whether the round settled on this
    // answer. replays and late answers surface as errors without touching
    // state; a round whose answers disagree settles as a cancellation.
    pub fn submit_price_answer(
        &mut self,
        node: NodeId,
        request_id: RequestId,
        prices: Vec<Price>,
    ) -> Result<bool, EngineError> {
        match self.oracle.submit_answer(node, request_id, prices) {
            Ok(None) => Ok(false),
            Ok(Some(settled)) => {
                self.oracle.drop_round(request_id);
                self.route_settlement(settled)?;
                Ok(true)
            }
            Err(OracleError::AnswersDiverged(pair)) => {
                warn!(?request_id, ?pair, "round answers diverged, canceling order");
                self.oracle.drop_round(request_id);
                self.cancel_on_failed_round(request_id, CancelReason::AnswersDiverged)?;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn route_settlement(&mut self, settled: SettledPrices) -> Result<(), EngineError> {
        let request_id = settled.request_id;
        let action = self.ledger.take_pending(request_id)?;

        match action {
            PendingAction::MarketOpen {
                order,
                slippage_p,
                escrow,
            } => self.settle_market_open(request_id, order, slippage_p, escrow, &settled),
            PendingAction::MarketClose {
                trader,
                pair_index,
                index,
            } => self.settle_market_close(request_id, trader, pair_index, index, &settled),
            PendingAction::BotTrigger {
                kind,
                trader,
                pair_index,
                index,
            } => self.settle_bot_trigger(request_id, kind, trader, pair_index, index, &settled),
            PendingAction::SlUpdate {
                trader,
                pair_index,
                index,
                new_sl,
            } => self.settle_sl_update(request_id, trader, pair_index, index, new_sl, &settled),
            PendingAction::AdlBatch { entries } => {
                self.settle_adl_batch(request_id, entries, &settled)
            }
        }
    }

    // a round that failed (divergence) cancels whatever order it carried
    fn cancel_on_failed_round(
        &mut self,
        request_id: RequestId,
        reason: CancelReason,
    ) -> Result<(), EngineError> {
        let action = self.ledger.take_pending(request_id)?;

        if let PendingAction::MarketOpen { order, escrow, .. } = action {
            self.refund_open(request_id, &order, escrow, reason);
        }
        Ok(())
    }

    fn refund_open(
        &mut self,
        request_id: RequestId,
        order: &OpenOrder,
        escrow: Usdt,
        reason: CancelReason,
    ) {
        self.ledger.debit_cash(escrow);
        self.wallet.push(order.trader, escrow);

        warn!(?request_id, trader = ?order.trader, ?reason, "open canceled, escrow refunded");
        self.emit_event(EventPayload::MarketOpenCanceled(MarketOpenCanceledEvent {
            request_id,
            trader: order.trader,
            pair_index: order.pair_index,
            refund: escrow,
            reason,
        }));
    }

    // 8.6.2: market open settlement. slippage and exposure re-checked against
    // the delivered price; failure refunds rather than executes.
    fn settle_market_open(
        &mut self,
        request_id: RequestId,
        order: OpenOrder,
        slippage_p: Pct,
        escrow: Usdt,
        settled: &SettledPrices,
    ) -> Result<(), EngineError> {
        let delivered = settled
            .price_for(order.pair_index)
            .ok_or(EngineError::PairNotInRound(order.pair_index))?;

        let spread_p = self.pairs.pair(order.pair_index)?.spread_p;
        let entry_price = pnl::apply_spread(delivered, order.side, spread_p);

        if !trade::within_slippage(order.side, order.wanted_price, slippage_p, entry_price) {
            self.refund_open(request_id, &order, escrow, CancelReason::PriceDeviation);
            return Ok(());
        }

        // entry worse than wanted opens with instant negative pnl; bounded
        let instant_p = pnl::percent_profit(
            entry_price,
            order.wanted_price,
            order.side,
            order.leverage,
            self.config.trading.max_gain_p,
        );
        if instant_p < -self.pairs.max_negative_pnl_on_open_p().as_percent() {
            self.refund_open(request_id, &order, escrow, CancelReason::PriceDeviation);
            return Ok(());
        }

        let notional = escrow.mul(order.leverage.value());
        if self
            .ledger
            .check_admission(
                order.pair_index,
                order.side,
                escrow,
                notional,
                self.config.max_pos_usdt,
                self.vault.total_assets(),
                self.config.vault_exposure_mult,
            )
            .is_err()
        {
            self.refund_open(request_id, &order, escrow, CancelReason::ExposureLimits);
            return Ok(());
        }

        let index = match self.ledger.first_empty_trade_index(
            order.trader,
            order.pair_index,
            self.config.max_trades_per_pair,
        ) {
            Ok(index) => index,
            Err(_) => {
                self.refund_open(request_id, &order, escrow, CancelReason::ExposureLimits);
                return Ok(());
            }
        };

        let open_fee_p = self.pairs.fee(order.pair_index)?.open_fee_p;
        let open_fee = pnl::leveraged_fee(escrow, order.leverage, open_fee_p);
        let position_size = escrow.sub(open_fee);
        self.ledger.add_platform_fee(open_fee);

        let trade = Trade {
            trader: order.trader,
            pair_index: order.pair_index,
            index,
            position_size,
            open_price: entry_price,
            side: order.side,
            leverage: order.leverage,
            tp: order.tp,
            sl: order.sl,
            opened_at: self.current_time,
        };
        self.ledger.store_trade(trade)?;

        let upnl_id = self.ledger.advance_upnl_id();
        info!(?request_id, trader = ?order.trader, %position_size, "market open executed");

        self.emit_event(EventPayload::MarketExecuted(MarketExecutedEvent {
            request_id,
            trader: order.trader,
            pair_index: order.pair_index,
            index,
            open: true,
            price: entry_price,
            position_size,
            percent_profit: Decimal::ZERO,
            usdt_sent_to_trader: Usdt::zero(),
            rollover_fee: Usdt::zero(),
            funding_fee: Usdt::zero(),
            closing_fee: Usdt::zero(),
            liquidated: false,
        }));
        self.emit_event(EventPayload::UpnlIdAdvanced(UpnlIdAdvancedEvent { id: upnl_id }));

        Ok(())
    }

    // 8.6.3: market close settlement.
    fn settle_market_close(
        &mut self,
        request_id: RequestId,
        trader: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
        settled: &SettledPrices,
    ) -> Result<(), EngineError> {
        let delivered = settled
            .price_for(pair_index)
            .ok_or(EngineError::PairNotInRound(pair_index))?;

        let trade = self
            .ledger
            .trade(trader, pair_index, index)
            .cloned()
            .ok_or(EngineError::TradeNotFound {
                trader,
                pair: pair_index,
                index,
            })?;

        let breakdown = self.compute_close(&trade, delivered)?;
        self.apply_close_flows(&trade, &breakdown)?;
        self.ledger.remove_trade(trader, pair_index, index)?;

        let upnl_id = self.ledger.advance_upnl_id();
        info!(
            ?request_id,
            ?trader,
            sent = %breakdown.usdt_sent_to_trader,
            liquidated = breakdown.liquidated,
            "market close executed"
        );

        self.emit_event(EventPayload::MarketExecuted(MarketExecutedEvent {
            request_id,
            trader,
            pair_index,
            index,
            open: false,
            price: delivered,
            position_size: trade.position_size,
            percent_profit: breakdown.percent_profit,
            usdt_sent_to_trader: breakdown.usdt_sent_to_trader,
            rollover_fee: breakdown.rollover_fee,
            funding_fee: breakdown.funding_fee,
            closing_fee: breakdown.closing_fee,
            liquidated: breakdown.liquidated,
        }));
        self.emit_event(EventPayload::UpnlIdAdvanced(UpnlIdAdvancedEvent { id: upnl_id }));

        Ok(())
    }

    // 8.6.4: bot trigger settlement. trigger conditions are judged against
    // the delivered price; a miss cancels the trigger and leaves the
    // position (or parked order) untouched.
    fn settle_bot_trigger(
        &mut self,
        request_id: RequestId,
        kind: BotOrderKind,
        trader: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
        settled: &SettledPrices,
    ) -> Result<(), EngineError> {
        let delivered = settled
            .price_for(pair_index)
            .ok_or(EngineError::PairNotInRound(pair_index))?;

        let cancel = |engine: &mut Engine, reason: BotCancelReason| {
            engine.emit_event(EventPayload::BotOrderCanceled(BotOrderCanceledEvent {
                request_id,
                kind,
                trader,
                pair_index,
                index,
                reason,
            }));
        };

        match kind {
            BotOrderKind::LimitOpen => {
                let Some(order) = self.ledger.limit_order(trader, pair_index, index).cloned()
                else {
                    cancel(self, BotCancelReason::TriggerNotReached);
                    return Ok(());
                };

                if !trade::limit_fillable(
                    order.order.side,
                    order.order.wanted_price,
                    order.slippage_p,
                    delivered,
                ) {
                    cancel(self, BotCancelReason::TriggerNotReached);
                    return Ok(());
                }

                let notional = order.escrow.mul(order.order.leverage.value());
                if self
                    .ledger
                    .check_admission(
                        pair_index,
                        order.order.side,
                        order.escrow,
                        notional,
                        self.config.max_pos_usdt,
                        self.vault.total_assets(),
                        self.config.vault_exposure_mult,
                    )
                    .is_err()
                {
                    cancel(self, BotCancelReason::ExposureLimits);
                    return Ok(());
                }

                let spread_p = self.pairs.pair(pair_index)?.spread_p;
                let entry_price = pnl::apply_spread(delivered, order.order.side, spread_p);

                let instant_p = pnl::percent_profit(
                    entry_price,
                    order.order.wanted_price,
                    order.order.side,
                    order.order.leverage,
                    self.config.trading.max_gain_p,
                );
                if instant_p < -self.pairs.max_negative_pnl_on_open_p().as_percent() {
                    cancel(self, BotCancelReason::TriggerNotReached);
                    return Ok(());
                }

                self.ledger.remove_limit_order(trader, pair_index, index)?;

                let open_fee_p = self.pairs.fee(pair_index)?.open_fee_p;
                let open_fee = pnl::leveraged_fee(order.escrow, order.order.leverage, open_fee_p);
                let position_size = order.escrow.sub(open_fee);
                self.ledger.add_platform_fee(open_fee);

                self.ledger.store_trade(Trade {
                    trader,
                    pair_index,
                    index,
                    position_size,
                    open_price: entry_price,
                    side: order.order.side,
                    leverage: order.order.leverage,
                    tp: order.order.tp,
                    sl: order.order.sl,
                    opened_at: self.current_time,
                })?;

                let upnl_id = self.ledger.advance_upnl_id();
                info!(?request_id, ?trader, %position_size, "limit open executed");

                self.emit_event(EventPayload::LimitExecuted(LimitExecutedEvent {
                    request_id,
                    kind,
                    trader,
                    pair_index,
                    index,
                    price: entry_price,
                    position_size,
                    usdt_sent_to_trader: Usdt::zero(),
                    liquidated: false,
                }));
                self.emit_event(EventPayload::UpnlIdAdvanced(UpnlIdAdvancedEvent {
                    id: upnl_id,
                }));
                Ok(())
            }
            BotOrderKind::TakeProfit | BotOrderKind::StopLoss | BotOrderKind::Liquidation => {
                let Some(trade) = self.ledger.trade(trader, pair_index, index).cloned() else {
                    cancel(self, BotCancelReason::TriggerNotReached);
                    return Ok(());
                };

                let triggered = match kind {
                    BotOrderKind::TakeProfit => trade
                        .tp
                        .map(|tp| trade::tp_hit(trade.side, tp, delivered))
                        .unwrap_or(false),
                    BotOrderKind::StopLoss => trade
                        .sl
                        .map(|sl| trade::sl_hit(trade.side, sl, delivered))
                        .unwrap_or(false),
                    BotOrderKind::Liquidation => true,
                    BotOrderKind::LimitOpen => unreachable!(),
                };

                if !triggered {
                    cancel(self, BotCancelReason::TriggerNotReached);
                    return Ok(());
                }

                let breakdown = self.compute_close(&trade, delivered)?;

                if kind == BotOrderKind::Liquidation && !breakdown.liquidated {
                    cancel(self, BotCancelReason::NotLiquidatable);
                    return Ok(());
                }

                self.apply_close_flows(&trade, &breakdown)?;
                self.ledger.remove_trade(trader, pair_index, index)?;

                let upnl_id = self.ledger.advance_upnl_id();
                info!(?request_id, ?kind, ?trader, "bot close executed");

                self.emit_event(EventPayload::LimitExecuted(LimitExecutedEvent {
                    request_id,
                    kind,
                    trader,
                    pair_index,
                    index,
                    price: delivered,
                    position_size: trade.position_size,
                    usdt_sent_to_trader: breakdown.usdt_sent_to_trader,
                    liquidated: breakdown.liquidated,
                }));
                self.emit_event(EventPayload::UpnlIdAdvanced(UpnlIdAdvancedEvent {
                    id: upnl_id,
                }));
                Ok(())
            }
        }
    }

    // 8.6.5: sl update settlement. a stop the delivered price has already
    // crossed settles as canceled, never applied.
    fn settle_sl_update(
        &mut self,
        request_id: RequestId,
        trader: Trader,
        pair_index: PairIndex,
        index: TradeIndex,
        new_sl: Price,
        settled: &SettledPrices,
    ) -> Result<(), EngineError> {
        let delivered = settled
            .price_for(pair_index)
            .ok_or(EngineError::PairNotInRound(pair_index))?;

        let side = self.ledger.trade(trader, pair_index, index).map(|t| t.side);

        // a vanished trade or an already-crossed stop both settle as canceled
        let crossed = match side {
            None => true,
            Some(side) => trade::sl_hit(side, new_sl, delivered),
        };

        if crossed {
            self.emit_event(EventPayload::SlCanceled(SlCanceledEvent {
                request_id,
                trader,
                pair_index,
                index,
                rejected_sl: new_sl,
                delivered_price: delivered,
            }));
            return Ok(());
        }

        let trade = self
            .ledger
            .trade_mut(trader, pair_index, index)
            .expect("trade present above");
        trade.sl = Some(new_sl);

        self.emit_event(EventPayload::SlUpdated(SlUpdatedEvent {
            trader,
            pair_index,
            index,
            sl: Some(new_sl),
        }));
        Ok(())
    }

    // close breakdown for one trade at a delivered price, accruals included
    pub(crate) fn compute_close(
        &self,
        trade: &Trade,
        delivered: Price,
    ) -> Result<CloseBreakdown, EngineError> {
        let close_fee_p = self.pairs.fee(trade.pair_index)?.close_fee_p;
        let accrual = self.pairs.params(trade.pair_index)?;

        let hours = trade.opened_at.elapsed_hours(&self.current_time);
        let rollover_fee =
            pnl::accrued_rollover(trade.position_size, hours, accrual.rollover_fee_per_hour_p);
        let funding_fee = pnl::accrued_funding(
            trade.position_size,
            trade.leverage,
            hours,
            accrual.funding_fee_per_hour_p,
        );

        Ok(pnl::close_breakdown(
            trade.position_size,
            trade.leverage,
            trade.open_price,
            delivered,
            trade.side,
            rollover_fee,
            funding_fee,
            close_fee_p,
            self.config.trading.max_gain_p,
            self.config.trading.liq_threshold_p,
        ))
    }

    // moves the cash of one close: closing fee and rollover stay with the
    // platform, the payout goes to the trader, and the vault absorbs or
    // funds the rest. the fallible vault draw runs before any mutation.
    pub(crate) fn apply_close_flows(
        &mut self,
        trade: &Trade,
        breakdown: &CloseBreakdown,
    ) -> Result<(), EngineError> {
        let flow = breakdown.net_vault_flow(trade.position_size);

        if flow.is_negative() {
            let draw = flow.abs();
            self.vault.send_assets(draw)?;
            self.ledger.credit_cash(draw);
        } else {
            self.ledger.debit_cash(flow);
            self.vault.receive_assets(flow);
        }

        self.ledger
            .add_platform_fee(breakdown.closing_fee.add(breakdown.rollover_fee));

        self.ledger.debit_cash(breakdown.usdt_sent_to_trader);
        self.wallet.push(trade.trader, breakdown.usdt_sent_to_trader);
        Ok(())
    }
}
