//! Builders for domain primitives used across tests.

use crate::domain::event::{ChainEvent, EventPayload};
use crate::domain::id::{BlockHash, ChainId, IdempotencyKey, MarketId, TxHash};
use crate::domain::job::ContractCall;
use crate::domain::market::Market;

pub const CHAIN: ChainId = ChainId::new(31337);

pub fn market_id(id: &str) -> MarketId {
    MarketId::new(id)
}

pub fn key(key: &str) -> IdempotencyKey {
    IdempotencyKey::new(key)
}

/// Open market created at block 1.
pub fn open_market(id: &str, outcomes: usize, liquidity: f64) -> Market {
    Market::create(market_id(id), outcomes, liquidity, 1).expect("valid market parameters")
}

/// Event with a hash derived from its block and a tx hash from its position.
pub fn event(block: u64, log_index: u64, market: &str, payload: EventPayload) -> ChainEvent {
    ChainEvent {
        chain_id: CHAIN,
        block_number: block,
        block_hash: BlockHash::new(format!("0x{block:x}")),
        log_index,
        tx_hash: TxHash::new(format!("0x{block:x}{log_index:04x}")),
        market_id: market_id(market),
        payload,
    }
}

pub fn created(block: u64, market: &str, outcomes: usize, liquidity: f64) -> ChainEvent {
    event(block, 0, market, EventPayload::MarketCreated { outcomes, liquidity })
}

pub fn trade(block: u64, log_index: u64, market: &str, outcome: usize, shares: f64) -> ChainEvent {
    event(block, log_index, market, EventPayload::TradeExecuted { outcome, shares })
}

pub fn buy(outcome: usize, shares: f64) -> ContractCall {
    ContractCall::Trade {
        outcome,
        shares,
        max_cost: None,
    }
}
