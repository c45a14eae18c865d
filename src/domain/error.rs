//! Domain validation errors for core domain types.
//!
//! These errors are returned synchronously when a market, event or job would
//! violate a domain invariant. They are never retried.
//!
//! # Examples
//!
//! ```
//! use marketsync::domain::error::DomainError;
//! use marketsync::domain::pricing::LmsrMarketMaker;
//!
//! let result = LmsrMarketMaker::new(0.0, 2);
//! assert!(matches!(result, Err(DomainError::InvalidLiquidity { .. })));
//! ```

use thiserror::Error;

use super::id::{JobId, MarketId};

/// Errors that occur when domain invariants are violated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// The LMSR liquidity parameter must be positive and finite.
    #[error("liquidity parameter must be positive and finite, got {liquidity}")]
    InvalidLiquidity {
        /// The rejected value.
        liquidity: f64,
    },

    /// A market needs at least two outcomes.
    #[error("market needs at least 2 outcomes, got {count}")]
    TooFewOutcomes {
        /// The rejected outcome count.
        count: usize,
    },

    /// Outcome index is outside the market's outcome range.
    #[error("outcome {outcome} out of range for market with {outcomes} outcomes")]
    OutcomeOutOfRange {
        /// The requested outcome.
        outcome: usize,
        /// Number of outcomes in the market.
        outcomes: usize,
    },

    /// Trade size must be finite and non-zero.
    #[error("share amount must be finite and non-zero, got {shares}")]
    InvalidShares {
        /// The rejected share amount.
        shares: f64,
    },

    /// Market is not accepting the requested operation.
    #[error("market {market_id} is {status}, expected OPEN")]
    MarketNotOpen {
        /// The market.
        market_id: MarketId,
        /// Its current status label.
        status: &'static str,
    },

    /// A creation event arrived for a market that already exists.
    #[error("market {market_id} already exists")]
    MarketAlreadyExists {
        /// The market.
        market_id: MarketId,
    },

    /// An event referenced a market that was never created.
    #[error("market {market_id} does not exist")]
    UnknownMarket {
        /// The market.
        market_id: MarketId,
    },

    /// Jobs never leave a terminal state.
    #[error("job {job_id} is already {state}")]
    JobTerminal {
        /// The job.
        job_id: JobId,
        /// Its terminal state label.
        state: &'static str,
    },

    /// A cursor commit would move the confirmed block backwards.
    #[error("cursor for chain {chain_id} is at block {stored}, refusing to commit {proposed:?}")]
    CursorRegression {
        /// The chain.
        chain_id: u64,
        /// Block already committed.
        stored: u64,
        /// Block the writer tried to commit.
        proposed: Option<u64>,
    },

    /// Input could not be interpreted.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}
