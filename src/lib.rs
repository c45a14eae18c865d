//! Marketsync - off-chain state, pricing and transaction submission for
//! on-chain LMSR prediction markets.
//!
//! # Architecture
//!
//! The crate follows a hexagonal layout:
//!
//! - **`domain`** - Pure types and logic: the LMSR pricing engine, markets,
//!   chain events, cursors, contract-call jobs and backoff state machines
//! - **`port`** - Traits at the seams: row store, event sources, transaction
//!   gateway, signer, notifiers and the inbound [`port::MarketService`]
//! - **`application`** - The chain indexer, the market state store, the
//!   contract-call queue and the orchestrator facade
//! - **`adapter`** - In-memory and SQLite stores, EVM JSON-RPC and websocket
//!   sources, remote signer, channel notifiers and the CLI
//! - **`infrastructure`** - Configuration, wiring and process lifetime
//!
//! # Data flow
//!
//! ```text
//!  ledger ──▶ ChainIndexer ──▶ MarketStateStore ──▶ LmsrMarketMaker
//!    ▲                                                    │
//!    └── ContractCallQueue ◀── MarketOrchestrator ◀───────┘
//! ```
//!
//! # Features
//!
//! - `evm` (default) - EVM ledger adapters and the runnable service
//! - `testkit` - Scripted chains, recording notifiers and builders for tests

pub mod adapter;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::{Error, Result};
