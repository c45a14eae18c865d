//! Outbound ports (driven side): interfaces implemented by outbound adapters.
//!
//! These contracts describe infrastructure dependencies: the row store, the
//! ledger, key custody and notifications.

pub mod ledger;
pub mod notifier;
pub mod signer;
pub mod store;
