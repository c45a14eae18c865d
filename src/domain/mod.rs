//! Ledger-agnostic domain logic.
//!
//! Nothing in here performs I/O or holds shared state.

pub mod backoff;
pub mod cursor;
pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod market;
pub mod pricing;

pub use backoff::{Backoff, RetryDecision, RetryPolicy};
pub use cursor::Cursor;
pub use error::DomainError;
pub use event::{ChainEvent, EventId, EventKind, EventPayload};
pub use id::{BlockHash, ChainId, IdempotencyKey, JobId, MarketId, TxHash};
pub use job::{AttemptRecord, ContractCall, ContractCallJob, FeeParams, JobKind, JobState};
pub use market::{derive_transition, Market, MarketStatus};
pub use pricing::{BookLevel, LmsrMarketMaker};
