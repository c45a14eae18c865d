//! Ledger ports: reading events and submitting transactions.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::event::ChainEvent;
use crate::domain::id::{BlockHash, MarketId, TxHash};
use crate::domain::job::{ContractCall, FeeParams};
use crate::error::Result;

/// Liveness of a push-based source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHealth {
    /// Subscription is currently established.
    pub connected: bool,
    /// Latest block announced by the stream.
    pub head: Option<u64>,
    /// Oldest block the stream has complete logs for. Blocks before it must
    /// come from request/response polling.
    pub earliest_block: Option<u64>,
    /// Time since the stream last delivered a block.
    pub last_block_age: Option<Duration>,
}

impl StreamHealth {
    /// Whether the stream is connected and delivered a block within `max_age`.
    #[must_use]
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.connected && self.last_block_age.is_some_and(|age| age <= max_age)
    }

    /// Whether the stream holds every block from `block` onwards.
    #[must_use]
    pub fn covers(&self, block: u64) -> bool {
        self.earliest_block.is_some_and(|earliest| earliest <= block)
    }
}

/// A source of confirmed-or-not ledger events.
///
/// The push stream and the request/response poller both implement this; the
/// indexer picks one per tick based on its mode.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Current chain head.
    async fn head(&self) -> Result<u64>;

    /// Decoded contract events in `[from, to]`, in ledger order.
    async fn fetch_events(&self, from: u64, to: u64) -> Result<Vec<ChainEvent>>;

    /// Canonical hash of block `number`, `None` if the block does not exist.
    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>>;

    /// Liveness of a push-based source; `None` for polling sources.
    fn stream_health(&self) -> Option<StreamHealth> {
        None
    }
}

/// Outcome recorded in a transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: String },
}

/// A mined transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub status: ReceiptStatus,
}

/// Encoded contract call, ready to be wrapped in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallData {
    /// Contract address.
    pub to: String,
    /// `0x`-prefixed calldata.
    pub data: String,
    pub gas_limit: u64,
}

/// Request/response access for outbound transactions.
///
/// Send failures are classified by the implementation:
/// [`TransactionError::Underpriced`](crate::error::TransactionError::Underpriced)
/// and `AlreadyKnown` for fee or mempool races, `Reverted` and `InvalidInput`
/// for permanent rejections, and `ChainError` for connectivity.
#[async_trait]
pub trait TransactionGateway: Send + Sync {
    /// Encode a market contract call.
    fn encode_call(&self, market_id: &MarketId, call: &ContractCall) -> Result<CallData>;

    /// Next nonce for `address`, counting pending transactions.
    async fn pending_nonce(&self, address: &str) -> Result<u64>;

    /// Current fee suggestion.
    async fn suggest_fees(&self) -> Result<FeeParams>;

    /// Broadcast a signed transaction.
    async fn send_raw_transaction(&self, raw: &str) -> Result<TxHash>;

    /// Receipt for `hash`, `None` while unmined.
    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_health_freshness() {
        let health = StreamHealth {
            connected: true,
            head: Some(10),
            earliest_block: Some(5),
            last_block_age: Some(Duration::from_secs(2)),
        };
        assert!(health.is_fresh(Duration::from_secs(5)));
        assert!(!health.is_fresh(Duration::from_secs(1)));
        assert!(health.covers(5));
        assert!(!health.covers(4));
        assert!(!StreamHealth::default().is_fresh(Duration::from_secs(60)));
    }
}
