//! Market projection types.
//!
//! - [`Market`] - Off-chain view of one market contract
//! - [`MarketStatus`] - Lifecycle of a market
//! - [`derive_transition`] - How a confirmed [`ChainEvent`] changes a market

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::event::{ChainEvent, EventId, EventPayload};
use super::id::{MarketId, TxHash};
use super::pricing::LmsrMarketMaker;

/// Lifecycle status of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Open,
    Settled,
    Cancelled,
}

impl MarketStatus {
    /// Stable label used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Settled => "SETTLED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// An applied event identity remembered by the market row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AppliedEvent {
    id: EventId,
    block_number: u64,
}

/// Off-chain projection of a single market.
///
/// The share vector only changes through confirmed ledger events. The market
/// also remembers the identities of recently applied events so that replaying
/// a chunk after a crash leaves it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    id: MarketId,
    liquidity: f64,
    shares: Vec<f64>,
    status: MarketStatus,
    settled_outcome: Option<usize>,
    last_confirmed_block: u64,
    #[serde(default)]
    applied: Vec<AppliedEvent>,
    #[serde(skip)]
    version: Option<u64>,
}

impl Market {
    /// Open a new market with all outcome shares at zero.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the liquidity or outcome count is invalid.
    pub fn create(
        id: MarketId,
        outcomes: usize,
        liquidity: f64,
        block: u64,
    ) -> Result<Self, DomainError> {
        LmsrMarketMaker::new(liquidity, outcomes)?;
        Ok(Self {
            id,
            liquidity,
            shares: vec![0.0; outcomes],
            status: MarketStatus::Open,
            settled_outcome: None,
            last_confirmed_block: block,
            applied: Vec::new(),
            version: None,
        })
    }

    #[must_use]
    pub const fn id(&self) -> &MarketId {
        &self.id
    }

    #[must_use]
    pub fn outcomes(&self) -> usize {
        self.shares.len()
    }

    #[must_use]
    pub const fn liquidity(&self) -> f64 {
        self.liquidity
    }

    /// Outcome share vector `q`.
    #[must_use]
    pub fn shares(&self) -> &[f64] {
        &self.shares
    }

    #[must_use]
    pub const fn status(&self) -> MarketStatus {
        self.status
    }

    #[must_use]
    pub const fn settled_outcome(&self) -> Option<usize> {
        self.settled_outcome
    }

    #[must_use]
    pub const fn last_confirmed_block(&self) -> u64 {
        self.last_confirmed_block
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.status, MarketStatus::Open)
    }

    /// Optimistic-concurrency stamp of the stored row, if loaded from storage.
    #[must_use]
    pub const fn version(&self) -> Option<u64> {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = Some(version);
    }

    /// Pricing parameters for this market.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if a stored row carries invalid parameters.
    pub fn pricing(&self) -> Result<LmsrMarketMaker, DomainError> {
        LmsrMarketMaker::new(self.liquidity, self.shares.len())
    }

    /// Whether the event identity was already applied to this market.
    #[must_use]
    pub fn has_applied(&self, id: &EventId) -> bool {
        self.applied.iter().any(|applied| &applied.id == id)
    }

    /// Whether any remembered event of this market came from `tx_hash`.
    #[must_use]
    pub fn has_applied_tx(&self, tx_hash: &TxHash) -> bool {
        self.applied.iter().any(|applied| &applied.id.tx_hash == tx_hash)
    }

    /// Ensure `outcome` is a valid index.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::OutcomeOutOfRange`] otherwise.
    pub fn check_outcome(&self, outcome: usize) -> Result<(), DomainError> {
        if outcome >= self.shares.len() {
            return Err(DomainError::OutcomeOutOfRange {
                outcome,
                outcomes: self.shares.len(),
            });
        }
        Ok(())
    }

    /// Ensure the market accepts trades and settlement.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::MarketNotOpen`] otherwise.
    pub fn check_open(&self) -> Result<(), DomainError> {
        if !self.is_open() {
            return Err(DomainError::MarketNotOpen {
                market_id: self.id.clone(),
                status: self.status.as_str(),
            });
        }
        Ok(())
    }

    fn apply_trade(&mut self, outcome: usize, shares: f64) -> Result<(), DomainError> {
        self.check_open()?;
        self.check_outcome(outcome)?;
        if !shares.is_finite() {
            return Err(DomainError::InvalidShares { shares });
        }
        self.shares[outcome] += shares;
        Ok(())
    }

    fn settle(&mut self, outcome: usize) -> Result<(), DomainError> {
        self.check_open()?;
        self.check_outcome(outcome)?;
        self.status = MarketStatus::Settled;
        self.settled_outcome = Some(outcome);
        Ok(())
    }

    fn cancel(&mut self) -> Result<(), DomainError> {
        self.check_open()?;
        self.status = MarketStatus::Cancelled;
        Ok(())
    }

    /// Remember an applied identity, forgetting ones older than `retention_blocks`.
    pub(crate) fn record_applied(&mut self, id: EventId, block_number: u64, retention_blocks: u64) {
        self.last_confirmed_block = self.last_confirmed_block.max(block_number);
        self.applied.push(AppliedEvent { id, block_number });
        let horizon = self.last_confirmed_block.saturating_sub(retention_blocks);
        self.applied.retain(|applied| applied.block_number >= horizon);
    }
}

/// Compute the market state that results from applying `event` to `current`.
///
/// The returned market does not yet record the event identity; the state store
/// does that as part of the same write.
///
/// # Errors
///
/// Returns `DomainError` when the event does not fit the current state, for
/// example a trade on a market that was never created.
pub fn derive_transition(current: Option<&Market>, event: &ChainEvent) -> Result<Market, DomainError> {
    match (&event.payload, current) {
        (EventPayload::MarketCreated { outcomes, liquidity }, None) => Market::create(
            event.market_id.clone(),
            *outcomes,
            *liquidity,
            event.block_number,
        ),
        (EventPayload::MarketCreated { .. }, Some(_)) => Err(DomainError::MarketAlreadyExists {
            market_id: event.market_id.clone(),
        }),
        (_, None) => Err(DomainError::UnknownMarket {
            market_id: event.market_id.clone(),
        }),
        (EventPayload::TradeExecuted { outcome, shares }, Some(market)) => {
            let mut next = market.clone();
            next.apply_trade(*outcome, *shares)?;
            Ok(next)
        }
        (EventPayload::MarketSettled { outcome }, Some(market)) => {
            let mut next = market.clone();
            next.settle(*outcome)?;
            Ok(next)
        }
        (EventPayload::MarketCancelled, Some(market)) => {
            let mut next = market.clone();
            next.cancel()?;
            Ok(next)
        }
    }
}
