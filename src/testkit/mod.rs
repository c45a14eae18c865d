//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`chain`] - `ScriptedChain`, an in-memory ledger implementing
//!   `EventSource` and `TransactionGateway`
//! - [`signer`] - `StaticSigner`, a deterministic `TransactionSigner`
//! - [`store`] - `FlakyRowStore`, a memory store with scripted write failures
//! - [`notifier`] - `RecordingNotifier`
//! - [`domain`] - Builders for markets, events and calls
//! - [`fixture`] - Wired state store, indexer and queue
//! - [`config`] - Canonical test configurations

pub mod chain;
pub mod config;
pub mod domain;
pub mod fixture;
pub mod notifier;
pub mod signer;
pub mod store;
