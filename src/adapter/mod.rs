//! Adapters connecting ports to the outside world.
//!
//! - [`inbound`] - Drives the application (CLI)
//! - [`outbound`] - Implements outbound ports (stores, ledger, signer, notifiers)

pub mod inbound;
pub mod outbound;
