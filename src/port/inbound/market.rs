//! Market operations exposed to the surrounding service.
//!
//! HTTP controllers, bots and the CLI drive the system through
//! [`MarketService`]; none of them touch the queue or the state store
//! directly.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::id::{ChainId, IdempotencyKey, JobId, MarketId, TxHash};
use crate::domain::job::ContractCallJob;
use crate::domain::market::Market;
use crate::domain::pricing::BookLevel;
use crate::error::Result;

/// Trade parameters supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeRequest {
    pub outcome: usize,
    /// Positive to buy, negative to sell.
    pub shares: f64,
    /// Maximum acceptable cost, forwarded to the contract.
    pub max_cost: Option<f64>,
}

/// How far a job has been observed back through the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The job has not broadcast anything yet.
    NotBroadcast,
    /// A broadcast transaction was applied to the market.
    Observed { tx_hash: TxHash },
    /// Broadcast, but no applied event carries any of the job's hashes yet.
    Unobserved { broadcasts: Vec<TxHash> },
}

/// Indexer state machine mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexerMode {
    Backfilling,
    Live,
    Degraded,
}

impl IndexerMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backfilling => "BACKFILLING",
            Self::Live => "LIVE",
            Self::Degraded => "DEGRADED",
        }
    }
}

/// Snapshot of one chain's indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexerStatus {
    pub chain_id: ChainId,
    pub mode: IndexerMode,
    pub last_confirmed_block: Option<u64>,
    pub head: Option<u64>,
    pub pending_blocks: usize,
    pub applied_events: u64,
    pub duplicate_events: u64,
    pub rejected_events: u64,
    pub discarded_blocks: u64,
    pub consecutive_failures: u32,
    /// Set once a reorg deeper than the confirmation depth was seen.
    pub compromised: bool,
}

impl IndexerStatus {
    #[must_use]
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            mode: IndexerMode::Backfilling,
            last_confirmed_block: None,
            head: None,
            pending_blocks: 0,
            applied_events: 0,
            duplicate_events: 0,
            rejected_events: 0,
            discarded_blocks: 0,
            consecutive_failures: 0,
            compromised: false,
        }
    }

    /// Consumers should treat market data as current.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.mode == IndexerMode::Live && !self.compromised
    }
}

/// Inbound market operations.
#[async_trait]
pub trait MarketService: Send + Sync {
    /// Marginal price of `outcome`.
    async fn quote(&self, market_id: &MarketId, outcome: usize) -> Result<f64>;

    /// Prices of every outcome.
    async fn quote_all(&self, market_id: &MarketId) -> Result<Vec<f64>>;

    /// Cost of adding `shares` of `outcome` at the current state.
    async fn quote_trade_cost(&self, market_id: &MarketId, outcome: usize, shares: f64)
        -> Result<f64>;

    /// Synthetic order book for `outcome` over ascending `ticks`.
    async fn order_book(
        &self,
        market_id: &MarketId,
        outcome: usize,
        ticks: &[f64],
    ) -> Result<Vec<BookLevel>>;

    /// Queue a trade. Re-submitting the same key returns the original job.
    async fn submit_trade(
        &self,
        market_id: &MarketId,
        trade: TradeRequest,
        idempotency_key: IdempotencyKey,
    ) -> Result<JobId>;

    /// Queue a settlement. Without a key every call creates a new job.
    async fn settle(
        &self,
        market_id: &MarketId,
        outcome: usize,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<JobId>;

    /// Confirmed state of a market.
    async fn get_market_state(&self, market_id: &MarketId) -> Result<Market>;

    /// Current state of a job.
    async fn job_status(&self, job_id: &JobId) -> Result<ContractCallJob>;

    /// Cancel a job that has not broadcast yet.
    async fn cancel_job(&self, job_id: &JobId) -> Result<ContractCallJob>;

    /// Resolve once the job is terminal.
    async fn wait_for_job(&self, job_id: &JobId) -> Result<ContractCallJob>;

    /// Match a job's broadcasts against events applied to its market.
    async fn reconcile(&self, job_id: &JobId) -> Result<Reconciliation>;

    /// Indexer status of every chain.
    fn chain_health(&self) -> Vec<IndexerStatus>;
}
