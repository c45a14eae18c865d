//! In-memory ledger for tests.
//!
//! [`ScriptedChain`] implements both [`EventSource`] and
//! [`TransactionGateway`]. Tests move the head, add events, rewrite history
//! with [`reorg_from`](ScriptedChain::reorg_from) and script how broadcasts
//! and receipts behave.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::event::{ChainEvent, EventPayload};
use crate::domain::id::{BlockHash, ChainId, MarketId, TxHash};
use crate::domain::job::{ContractCall, FeeParams};
use crate::error::{ChainError, Error, Result, TransactionError};
use crate::port::outbound::ledger::{
    CallData, EventSource, ReceiptStatus, StreamHealth, TransactionGateway, TxReceipt,
};

/// Contract address reported by [`ScriptedChain::encode_call`].
pub const CONTRACT: &str = "0x00000000000000000000000000000000000000aa";

/// Hash the scripted gateway assigns to a raw transaction.
pub fn tx_hash_for(raw: &str) -> TxHash {
    TxHash::new(format!("0xtx{}", raw.trim_start_matches("0x")))
}

/// What the next broadcast does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accept,
    Connectivity,
    Underpriced,
    AlreadyKnown,
    Revert(String),
}

/// What receipt lookups report for accepted broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Success,
    Revert(String),
    /// Never mined.
    Missing,
}

#[derive(Debug)]
struct ChainState {
    head: u64,
    /// Bumped per reorg so rewritten blocks get new hashes.
    forks: BTreeMap<u64, u32>,
    events: Vec<ChainEvent>,
    next_tx: u64,
    fetches: Vec<(u64, u64)>,
    head_requests: u32,
    source_failures: VecDeque<Error>,
    hash_failures: HashMap<u64, Error>,
    stream_health: Option<StreamHealth>,

    nonce: u64,
    nonce_requests: u32,
    fees: FeeParams,
    sends: VecDeque<SendOutcome>,
    default_send: SendOutcome,
    receipt: ReceiptOutcome,
    broadcasts: Vec<String>,
    receipts: HashMap<TxHash, TxReceipt>,
}

/// Scripted ledger shared between the indexer and the queue under test.
#[derive(Clone)]
pub struct ScriptedChain {
    chain_id: ChainId,
    name: &'static str,
    state: Arc<Mutex<ChainState>>,
}

impl ScriptedChain {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            name: "scripted",
            state: Arc::new(Mutex::new(ChainState {
                head: 0,
                forks: BTreeMap::new(),
                events: Vec::new(),
                next_tx: 0,
                fetches: Vec::new(),
                head_requests: 0,
                source_failures: VecDeque::new(),
                hash_failures: HashMap::new(),
                stream_health: None,
                nonce: 0,
                nonce_requests: 0,
                fees: FeeParams {
                    max_fee_per_gas: 100,
                    max_priority_fee_per_gas: 2,
                },
                sends: VecDeque::new(),
                default_send: SendOutcome::Accept,
                receipt: ReceiptOutcome::Success,
                broadcasts: Vec::new(),
                receipts: HashMap::new(),
            })),
        }
    }

    /// A second handle on the same ledger that reports itself as a stream
    /// with `health`.
    pub fn as_stream(&self, health: StreamHealth) -> Self {
        self.state.lock().stream_health = Some(health);
        Self {
            chain_id: self.chain_id,
            name: "scripted-stream",
            state: Arc::clone(&self.state),
        }
    }

    pub fn set_stream_health(&self, health: Option<StreamHealth>) {
        self.state.lock().stream_health = health;
    }

    pub fn head(&self) -> u64 {
        self.state.lock().head
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    /// Canonical hash of block `number` on the current fork.
    pub fn hash_of(&self, number: u64) -> BlockHash {
        let state = self.state.lock();
        Self::hash_in(&state, number)
    }

    fn hash_in(state: &ChainState, number: u64) -> BlockHash {
        let fork = state
            .forks
            .range(..=number)
            .next_back()
            .map_or(0, |(_, fork)| *fork);
        BlockHash::new(format!("0x{number:x}f{fork}"))
    }

    /// Append an event at `block` and return it.
    pub fn add_event(&self, block: u64, market: &str, payload: EventPayload) -> ChainEvent {
        let mut state = self.state.lock();
        let log_index = state
            .events
            .iter()
            .filter(|e| e.block_number == block)
            .count() as u64;
        state.next_tx += 1;
        let event = ChainEvent {
            chain_id: self.chain_id,
            block_number: block,
            block_hash: Self::hash_in(&state, block),
            log_index,
            tx_hash: TxHash::new(format!("0x{:x}{:04x}", block, state.next_tx)),
            market_id: MarketId::new(market),
            payload,
        };
        state.events.push(event.clone());
        event
    }

    /// Deliver `event` once more, as a source repeating a log would.
    pub fn redeliver(&self, event: &ChainEvent) {
        self.state.lock().events.push(event.clone());
    }

    /// Replace every block from `block` upward with a new fork. Events in
    /// those blocks are dropped; returns how many.
    pub fn reorg_from(&self, block: u64) -> usize {
        let mut state = self.state.lock();
        let fork = state.forks.values().copied().max().unwrap_or(0) + 1;
        let keep: Vec<(u64, u32)> = state.forks.range(..block).map(|(n, f)| (*n, *f)).collect();
        state.forks = keep.into_iter().collect();
        state.forks.insert(block, fork);
        let before = state.events.len();
        state.events.retain(|e| e.block_number < block);
        before - state.events.len()
    }

    /// Windows passed to `fetch_events`, in call order.
    pub fn fetches(&self) -> Vec<(u64, u64)> {
        self.state.lock().fetches.clone()
    }

    /// `head` calls answered so far, failed ones included.
    pub fn head_requests(&self) -> u32 {
        self.state.lock().head_requests
    }

    /// Fail the next source call (`head`, `fetch_events` or `block_hash`).
    pub fn fail_next(&self, error: Error) {
        self.state.lock().source_failures.push_back(error);
    }

    /// Fail the next `block_hash` lookup of block `number`.
    pub fn fail_block_hash(&self, number: u64, error: Error) {
        self.state.lock().hash_failures.insert(number, error);
    }

    pub fn script_sends(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.state.lock().sends.extend(outcomes);
    }

    /// Outcome of every broadcast once the script is used up.
    pub fn set_default_send(&self, outcome: SendOutcome) {
        self.state.lock().default_send = outcome;
    }

    pub fn set_receipts(&self, outcome: ReceiptOutcome) {
        self.state.lock().receipt = outcome;
    }

    pub fn set_next_nonce(&self, nonce: u64) {
        self.state.lock().nonce = nonce;
    }

    pub fn set_fees(&self, fees: FeeParams) {
        self.state.lock().fees = fees;
    }

    /// Raw transactions handed to `send_raw_transaction`, accepted or not.
    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().broadcasts.clone()
    }

    pub fn nonce_requests(&self) -> u32 {
        self.state.lock().nonce_requests
    }

    fn take_failure(&self) -> Result<()> {
        match self.state.lock().source_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EventSource for ScriptedChain {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn head(&self) -> Result<u64> {
        self.state.lock().head_requests += 1;
        self.take_failure()?;
        Ok(self.state.lock().head)
    }

    async fn fetch_events(&self, from: u64, to: u64) -> Result<Vec<ChainEvent>> {
        self.take_failure()?;
        let mut state = self.state.lock();
        state.fetches.push((from, to));
        let head = state.head;
        Ok(state
            .events
            .iter()
            .filter(|e| e.block_number >= from && e.block_number <= to && e.block_number <= head)
            .cloned()
            .collect())
    }

    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>> {
        self.take_failure()?;
        let mut state = self.state.lock();
        if let Some(error) = state.hash_failures.remove(&number) {
            return Err(error);
        }
        Ok((number <= state.head).then(|| Self::hash_in(&state, number)))
    }

    fn stream_health(&self) -> Option<StreamHealth> {
        self.state.lock().stream_health.clone()
    }
}

#[async_trait]
impl TransactionGateway for ScriptedChain {
    fn encode_call(&self, market_id: &MarketId, call: &ContractCall) -> Result<CallData> {
        let data = serde_json::to_string(call)?;
        Ok(CallData {
            to: CONTRACT.to_string(),
            data: format!("{market_id}:{data}"),
            gas_limit: 100_000,
        })
    }

    async fn pending_nonce(&self, _address: &str) -> Result<u64> {
        let mut state = self.state.lock();
        state.nonce_requests += 1;
        Ok(state.nonce)
    }

    async fn suggest_fees(&self) -> Result<FeeParams> {
        Ok(self.state.lock().fees)
    }

    async fn send_raw_transaction(&self, raw: &str) -> Result<TxHash> {
        let mut state = self.state.lock();
        state.broadcasts.push(raw.to_string());
        let outcome = state
            .sends
            .pop_front()
            .unwrap_or_else(|| state.default_send.clone());
        let hash = tx_hash_for(raw);
        match outcome {
            SendOutcome::Accept => {}
            SendOutcome::Connectivity => {
                return Err(ChainError::Connectivity("connection reset".to_string()).into())
            }
            SendOutcome::Underpriced => {
                return Err(TransactionError::Underpriced("replacement transaction underpriced".to_string()).into())
            }
            SendOutcome::AlreadyKnown => {
                return Err(TransactionError::AlreadyKnown("already known".to_string()).into())
            }
            SendOutcome::Revert(reason) => return Err(TransactionError::Reverted { reason }.into()),
        }
        let status = match &state.receipt {
            ReceiptOutcome::Success => Some(ReceiptStatus::Success),
            ReceiptOutcome::Revert(reason) => Some(ReceiptStatus::Reverted {
                reason: reason.clone(),
            }),
            ReceiptOutcome::Missing => None,
        };
        if let Some(status) = status {
            let block_number = state.head;
            state.receipts.insert(
                hash.clone(),
                TxReceipt {
                    tx_hash: hash.clone(),
                    block_number,
                    status,
                },
            );
        }
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>> {
        Ok(self.state.lock().receipts.get(hash).cloned())
    }
}
