//! Inbound facade over the state store, pricing and the call queue.
//!
//! The orchestrator owns no state of its own. Quotes read confirmed market
//! state and price it; trades and settlements are validated against that
//! state and handed to the queue.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::application::indexer::StatusHandle;
use crate::application::queue::ContractCallQueue;
use crate::application::state::MarketStateStore;
use crate::domain::error::DomainError;
use crate::domain::id::{IdempotencyKey, JobId, MarketId};
use crate::domain::job::{ContractCall, ContractCallJob};
use crate::domain::market::Market;
use crate::domain::pricing::{BookLevel, LmsrMarketMaker};
use crate::error::Result;
use crate::port::inbound::market::{IndexerStatus, MarketService, Reconciliation, TradeRequest};

/// Wires [`MarketService`] to the application services.
pub struct MarketOrchestrator {
    state: Arc<MarketStateStore>,
    queue: ContractCallQueue,
    chains: Vec<StatusHandle>,
}

impl MarketOrchestrator {
    #[must_use]
    pub fn new(state: Arc<MarketStateStore>, queue: ContractCallQueue, chains: Vec<StatusHandle>) -> Self {
        Self { state, queue, chains }
    }

    /// Market plus its pricing engine, with `outcome` checked when given.
    async fn priced(&self, market_id: &MarketId, outcome: Option<usize>) -> Result<(Market, LmsrMarketMaker)> {
        let market = self.state.get(market_id).await?;
        if let Some(outcome) = outcome {
            market.check_outcome(outcome)?;
        }
        let engine = market.pricing()?;
        Ok((market, engine))
    }

    async fn open_market(&self, market_id: &MarketId, outcome: usize) -> Result<Market> {
        let market = self.state.get(market_id).await?;
        market.check_open()?;
        market.check_outcome(outcome)?;
        Ok(market)
    }
}

#[async_trait]
impl MarketService for MarketOrchestrator {
    async fn quote(&self, market_id: &MarketId, outcome: usize) -> Result<f64> {
        let (market, engine) = self.priced(market_id, Some(outcome)).await?;
        Ok(engine.price(market.shares(), outcome))
    }

    async fn quote_all(&self, market_id: &MarketId) -> Result<Vec<f64>> {
        let (market, engine) = self.priced(market_id, None).await?;
        Ok(engine.prices(market.shares()))
    }

    async fn quote_trade_cost(&self, market_id: &MarketId, outcome: usize, shares: f64) -> Result<f64> {
        if !shares.is_finite() {
            return Err(DomainError::InvalidShares { shares }.into());
        }
        let (market, engine) = self.priced(market_id, Some(outcome)).await?;
        Ok(engine.cost_to_buy(market.shares(), outcome, shares))
    }

    async fn order_book(&self, market_id: &MarketId, outcome: usize, ticks: &[f64]) -> Result<Vec<BookLevel>> {
        let (market, engine) = self.priced(market_id, Some(outcome)).await?;
        Ok(engine.synthetic_order_book(market.shares(), outcome, ticks))
    }

    async fn submit_trade(
        &self,
        market_id: &MarketId,
        trade: TradeRequest,
        idempotency_key: IdempotencyKey,
    ) -> Result<JobId> {
        if !trade.shares.is_finite() || trade.shares == 0.0 {
            return Err(DomainError::InvalidShares { shares: trade.shares }.into());
        }
        if let Some(max_cost) = trade.max_cost {
            if !max_cost.is_finite() {
                return Err(DomainError::MalformedPayload(format!("max cost must be finite, got {max_cost}")).into());
            }
        }
        self.open_market(market_id, trade.outcome).await?;

        let call = ContractCall::Trade {
            outcome: trade.outcome,
            shares: trade.shares,
            max_cost: trade.max_cost,
        };
        let job_id = self.queue.enqueue(market_id.clone(), call, idempotency_key).await?;
        info!(%market_id, %job_id, outcome = trade.outcome, shares = trade.shares, "Trade submitted");
        Ok(job_id)
    }

    async fn settle(
        &self,
        market_id: &MarketId,
        outcome: usize,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<JobId> {
        self.open_market(market_id, outcome).await?;
        let key = idempotency_key.unwrap_or_else(IdempotencyKey::generate);
        let job_id = self
            .queue
            .enqueue(market_id.clone(), ContractCall::Settle { outcome }, key)
            .await?;
        info!(%market_id, %job_id, outcome, "Settlement submitted");
        Ok(job_id)
    }

    async fn get_market_state(&self, market_id: &MarketId) -> Result<Market> {
        self.state.get(market_id).await
    }

    async fn job_status(&self, job_id: &JobId) -> Result<ContractCallJob> {
        self.queue.job(job_id)
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<ContractCallJob> {
        self.queue.cancel(job_id).await
    }

    async fn wait_for_job(&self, job_id: &JobId) -> Result<ContractCallJob> {
        self.queue.wait(job_id).await
    }

    async fn reconcile(&self, job_id: &JobId) -> Result<Reconciliation> {
        let job = self.queue.job(job_id)?;
        if job.broadcasts().is_empty() {
            return Ok(Reconciliation::NotBroadcast);
        }
        let Some(market) = self.state.find(job.market_id()).await? else {
            return Ok(Reconciliation::Unobserved {
                broadcasts: job.broadcasts().to_vec(),
            });
        };
        Ok(job
            .broadcasts()
            .iter()
            .find(|hash| market.has_applied_tx(hash))
            .map_or_else(
                || Reconciliation::Unobserved {
                    broadcasts: job.broadcasts().to_vec(),
                },
                |hash| Reconciliation::Observed { tx_hash: hash.clone() },
            ))
    }

    fn chain_health(&self) -> Vec<IndexerStatus> {
        self.chains.iter().map(StatusHandle::snapshot).collect()
    }
}
