// 6.0 oracle.rs: two-phase price resolution. a request fans out to every
// configured node through the outbox; answers come back one call at a time
// and the round settles exactly once when enough distinct nodes agree.
// nothing in here blocks: callers correlate on the request id.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{NodeId, PairIndex, Pct, Price, RequestId, Timestamp};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    // answers required before a round settles
    pub min_answers: usize,
    // rounds older than this are expired and their orders canceled
    pub request_timeout_ms: i64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            min_answers: 1,
            request_timeout_ms: 30_000,
        }
    }
}

// one pair covered by a round, with the divergence bound its answers must hold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundPair {
    pub pair_index: PairIndex,
    pub max_deviation_p: Pct,
}

// outbound message to a single node. the host transport drains these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRequest {
    pub request_id: RequestId,
    pub node_id: NodeId,
    pub pairs: Vec<PairIndex>,
}

/// Prices a settled round delivered, one per covered pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledPrices {
    pub request_id: RequestId,
    prices: HashMap<PairIndex, Price>,
}

impl SettledPrices {
    pub fn price_for(&self, pair: PairIndex) -> Option<Price> {
        self.prices.get(&pair).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("request {0:?} not found")]
    UnknownRequest(RequestId),

    #[error("request {0:?} already settled")]
    AlreadySettled(RequestId),

    #[error("node {0:?} is not authorized")]
    NodeNotAuthorized(NodeId),

    #[error("node {node:?} already answered request {request:?}")]
    AlreadyAnswered { node: NodeId, request: RequestId },

    #[error("answer covers {got} pairs, round covers {expected}")]
    AnswerShapeMismatch { got: usize, expected: usize },

    #[error("answers for pair {0:?} diverge beyond the deviation bound")]
    AnswersDiverged(PairIndex),

    #[error("no nodes configured")]
    NoNodes,
}

#[derive(Debug, Clone)]
struct PendingRound {
    pairs: Vec<RoundPair>,
    // node -> ordered answers, one price per covered pair
    answers: HashMap<NodeId, Vec<Price>>,
    created_at: Timestamp,
    settled: bool,
}

/// Dispatches price rounds to the node set and aggregates their answers.
#[derive(Debug)]
pub struct OracleGateway {
    config: OracleConfig,
    nodes: Vec<NodeId>,
    rounds: HashMap<RequestId, PendingRound>,
    outbox: Vec<NodeRequest>,
    next_request_id: u64,
}

impl OracleGateway {
    pub fn new(config: OracleConfig, nodes: Vec<NodeId>) -> Self {
        Self {
            config,
            nodes,
            rounds: HashMap::new(),
            outbox: Vec::new(),
            next_request_id: 1,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_node(&mut self, node: NodeId) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    // 6.1: start a round. one request message per node lands in the outbox.
    pub fn request(
        &mut self,
        pairs: Vec<RoundPair>,
        now: Timestamp,
    ) -> Result<RequestId, OracleError> {
        if self.nodes.is_empty() {
            return Err(OracleError::NoNodes);
        }

        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;

        let covered: Vec<PairIndex> = pairs.iter().map(|p| p.pair_index).collect();
        for node in &self.nodes {
            self.outbox.push(NodeRequest {
                request_id: id,
                node_id: *node,
                pairs: covered.clone(),
            });
        }

        self.rounds.insert(
            id,
            PendingRound {
                pairs,
                answers: HashMap::new(),
                created_at: now,
                settled: false,
            },
        );

        Ok(id)
    }

    // 6.2: one node's answer. returns the settled prices exactly once, on the
    // answer that reaches min_answers. later answers are rejected, not re-applied.
    pub fn submit_answer(
        &mut self,
        node: NodeId,
        request_id: RequestId,
        prices: Vec<Price>,
    ) -> Result<Option<SettledPrices>, OracleError> {
        if !self.nodes.contains(&node) {
            return Err(OracleError::NodeNotAuthorized(node));
        }

        let round = self
            .rounds
            .get_mut(&request_id)
            .ok_or(OracleError::UnknownRequest(request_id))?;

        if round.settled {
            return Err(OracleError::AlreadySettled(request_id));
        }

        if prices.len() != round.pairs.len() {
            return Err(OracleError::AnswerShapeMismatch {
                got: prices.len(),
                expected: round.pairs.len(),
            });
        }

        if round.answers.contains_key(&node) {
            return Err(OracleError::AlreadyAnswered {
                node,
                request: request_id,
            });
        }

        round.answers.insert(node, prices);

        if round.answers.len() < self.config.min_answers {
            return Ok(None);
        }

        // enough answers: aggregate and settle, single fire
        round.settled = true;

        let mut settled = HashMap::new();
        for (i, round_pair) in round.pairs.iter().enumerate() {
            let answers: Vec<Decimal> = round
                .answers
                .values()
                .map(|prices| prices[i].value())
                .collect();

            check_deviation(&answers, round_pair.max_deviation_p)
                .map_err(|_| OracleError::AnswersDiverged(round_pair.pair_index))?;

            settled.insert(round_pair.pair_index, Price::new_unchecked(median(&answers)));
        }

        Ok(Some(SettledPrices {
            request_id,
            prices: settled,
        }))
    }

    // rounds past the timeout get cancelled; the engine refunds their orders.
    // settled rounds are swept out without being reported.
    pub fn expire(&mut self, now: Timestamp) -> Vec<RequestId> {
        let timeout = self.config.request_timeout_ms;
        let expired: Vec<RequestId> = self
            .rounds
            .iter()
            .filter(|(_, round)| now.as_millis() - round.created_at.as_millis() > timeout)
            .map(|(id, _)| *id)
            .collect();

        let mut cancelled = Vec::new();
        for id in expired {
            let round = self.rounds.remove(&id).expect("round exists");
            if !round.settled {
                cancelled.push(id);
            }
        }
        cancelled
    }

    // settled rounds stay until drop_round so replays can be told apart from
    // unknown ids; the engine drops them once the correlated order is done.
    pub fn drop_round(&mut self, request_id: RequestId) {
        self.rounds.remove(&request_id);
    }

    pub fn is_pending(&self, request_id: RequestId) -> bool {
        self.rounds
            .get(&request_id)
            .map(|r| !r.settled)
            .unwrap_or(false)
    }

    pub fn drain_outbox(&mut self) -> Vec<NodeRequest> {
        std::mem::take(&mut self.outbox)
    }

    pub fn pending_count(&self) -> usize {
        self.rounds.values().filter(|r| !r.settled).count()
    }
}

fn median(values: &[Decimal]) -> Decimal {
    let mut sorted = values.to_vec();
    sorted.sort();

    let len = sorted.len();
    debug_assert!(len > 0);

    if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / Decimal::from(2)
    } else {
        sorted[len / 2]
    }
}

fn check_deviation(values: &[Decimal], max_deviation_p: Pct) -> Result<(), ()> {
    if values.len() < 2 {
        return Ok(());
    }

    let min = values.iter().min().copied().unwrap_or_default();
    let max = values.iter().max().copied().unwrap_or_default();
    if min <= Decimal::ZERO {
        return Err(());
    }

    let deviation = (max - min) / min;
    if deviation > max_deviation_p.as_fraction() {
        return Err(());
    }
    Ok(())
}
