//! Ledger events observed by the indexer.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::id::{BlockHash, ChainId, MarketId, TxHash};

/// Identity of a ledger event: applying the same identity twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub chain_id: ChainId,
    pub tx_hash: TxHash,
    pub log_index: u64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.chain_id, self.tx_hash, self.log_index)
    }
}

/// Kind of ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MarketCreated,
    TradeExecuted,
    MarketSettled,
    MarketCancelled,
}

impl EventKind {
    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketCreated => "market_created",
            Self::TradeExecuted => "trade_executed",
            Self::MarketSettled => "market_settled",
            Self::MarketCancelled => "market_cancelled",
        }
    }
}

/// Decoded event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A market was opened with `outcomes` outcomes and liquidity `b`.
    MarketCreated { outcomes: usize, liquidity: f64 },
    /// `shares` of `outcome` were bought (positive) or sold (negative).
    TradeExecuted { outcome: usize, shares: f64 },
    /// The market resolved to `outcome`.
    MarketSettled { outcome: usize },
    /// The market was voided.
    MarketCancelled,
}

impl EventPayload {
    /// Kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::MarketCreated { .. } => EventKind::MarketCreated,
            Self::TradeExecuted { .. } => EventKind::TradeExecuted,
            Self::MarketSettled { .. } => EventKind::MarketSettled,
            Self::MarketCancelled => EventKind::MarketCancelled,
        }
    }
}

/// An event emitted by the market contract, as seen at a specific block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub chain_id: ChainId,
    pub block_number: u64,
    pub block_hash: BlockHash,
    pub log_index: u64,
    pub tx_hash: TxHash,
    pub market_id: MarketId,
    pub payload: EventPayload,
}

impl ChainEvent {
    /// Identity used for deduplication.
    #[must_use]
    pub fn id(&self) -> EventId {
        EventId {
            chain_id: self.chain_id,
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
        }
    }

    /// Kind of the payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Ledger ordering key: block first, then position within the block.
    #[must_use]
    pub const fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}
