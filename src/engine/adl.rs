// 8.7 engine/adl.rs: auto-deleverage execution. the caller supplies the
// positions (ranked off-chain); the engine batch-requests one price round
// covering their pairs and closes every listed position against that single
// round, so no adversary gets price leverage between sequential closes.

use tracing::{info, warn};

use super::results::EngineError;
use super::Engine;
use crate::adl::{self, AdlExecution, AdlType};
use crate::events::{AdlExecutedEvent, AdlFlowSettledEvent, EventPayload, UpnlIdAdvancedEvent};
use crate::oracle::SettledPrices;
use crate::policy::Action;
use crate::trade::{AdlEntry, PendingAction};
use crate::types::{PairIndex, RequestId, TradeIndex, Trader, Usdt};

impl Engine {
    // 8.7.1: batch intake. parallel arrays, one entry per position; admission
    // is deliberately bypassed, deleveraging is involuntary.
    pub fn execute_adl_order(
        &mut self,
        caller: Trader,
        kinds: Vec<AdlType>,
        traders: Vec<Trader>,
        pair_indices: Vec<PairIndex>,
        indices: Vec<TradeIndex>,
        price_feed_pairs: Vec<PairIndex>,
    ) -> Result<RequestId, EngineError> {
        self.policy.authorize(caller, Action::TriggerBot)?;

        let len = kinds.len();
        if len == 0
            || traders.len() != len
            || pair_indices.len() != len
            || indices.len() != len
            || price_feed_pairs.is_empty()
        {
            return Err(EngineError::ArrayLengthMismatch);
        }

        let mut entries = Vec::with_capacity(len);
        for i in 0..len {
            let pair = pair_indices[i];
            if self.ledger.trade(traders[i], pair, indices[i]).is_none() {
                return Err(EngineError::TradeNotFound {
                    trader: traders[i],
                    pair,
                    index: indices[i],
                });
            }
            if !price_feed_pairs.contains(&pair) {
                return Err(EngineError::PairNotInRound(pair));
            }
            entries.push(AdlEntry {
                kind: kinds[i],
                trader: traders[i],
                pair_index: pair,
                index: indices[i],
            });
        }

        let request_id = self.request_round(price_feed_pairs)?;
        self.ledger
            .register_pending(request_id, PendingAction::AdlBatch { entries })?;

        info!(?request_id, positions = len, "adl batch initiated");
        Ok(request_id)
    }

    // 8.7.2: batch settlement. one delivered round, applied uniformly. the
    // vault draw for the whole batch is validated up front so the batch
    // settles atomically or not at all.
    pub(super) fn settle_adl_batch(
        &mut self,
        request_id: RequestId,
        entries: Vec<AdlEntry>,
        settled: &SettledPrices,
    ) -> Result<(), EngineError> {
        // first pass: compute every breakdown without mutating anything
        let mut planned = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Some(trade) = self
                .ledger
                .trade(entry.trader, entry.pair_index, entry.index)
                .cloned()
            else {
                // closed between intake and settlement; skip involuntarily
                warn!(?request_id, trader = ?entry.trader, "adl entry vanished, skipping");
                continue;
            };

            let delivered = settled
                .price_for(entry.pair_index)
                .ok_or(EngineError::PairNotInRound(entry.pair_index))?;

            let breakdown = self.compute_close(&trade, delivered)?;
            planned.push((*entry, trade, delivered, breakdown));
        }

        // the vault must cover the batch's worst running draw before any
        // position is touched
        let mut running = self.vault.total_assets();
        for (_, trade, _, breakdown) in &planned {
            running = running.add(breakdown.net_vault_flow(trade.position_size));
            if running.is_negative() {
                return Err(EngineError::Vault(
                    crate::vault::VaultError::InsufficientAssets {
                        need: running.abs(),
                    },
                ));
            }
        }

        // second pass: apply
        let mut executions = Vec::with_capacity(planned.len());
        for (entry, trade, delivered, breakdown) in planned {
            self.apply_close_flows(&trade, &breakdown)?;
            self.ledger
                .remove_trade(entry.trader, entry.pair_index, entry.index)?;
            let upnl_id = self.ledger.advance_upnl_id();

            let vault_flow = breakdown.net_vault_flow(trade.position_size);
            executions.push(AdlExecution {
                kind: entry.kind,
                trader: entry.trader,
                close_price: delivered,
                usdt_sent_to_trader: breakdown.usdt_sent_to_trader,
                vault_flow,
            });

            self.emit_event(EventPayload::AdlExecuted(AdlExecutedEvent {
                request_id,
                kind: entry.kind,
                trader: entry.trader,
                pair_index: entry.pair_index,
                index: entry.index,
                price: delivered,
                percent_profit: breakdown.percent_profit,
                usdt_sent_to_trader: breakdown.usdt_sent_to_trader,
                vault_flow,
            }));
            self.emit_event(EventPayload::UpnlIdAdvanced(UpnlIdAdvancedEvent { id: upnl_id }));
        }

        let net: Usdt = adl::aggregate_flow(&executions);
        info!(?request_id, closed = executions.len(), net_flow = %net, "adl batch settled");

        self.emit_event(EventPayload::AdlFlowSettled(AdlFlowSettledEvent {
            request_id,
            positions_closed: executions.len(),
            net_vault_flow: net,
        }));
        Ok(())
    }
}
