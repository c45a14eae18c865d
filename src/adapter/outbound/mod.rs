//! Outbound adapters (driven side).

pub mod custody;
#[cfg(feature = "evm")]
pub mod evm;
pub mod memory;
pub mod notifier;
pub mod sqlite;
