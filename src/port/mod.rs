//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! # Architecture
//!
//! ```text
//!                    ┌─────────────────────────┐
//!   MarketService ──▶│       Application       │
//!                    │  indexer, queue, state  │
//!                    └─────────────────────────┘
//!          │               │               │              │
//!          ▼               ▼               ▼              ▼
//!    ┌──────────┐   ┌─────────────┐  ┌──────────┐   ┌──────────┐
//!    │ RowStore │   │ EventSource │  │  Signer  │   │ Notifier │
//!    │          │   │ Gateway     │  │          │   │          │
//!    └──────────┘   └─────────────┘  └──────────┘   └──────────┘
//! ```

pub mod inbound;
pub mod outbound;

pub use inbound::market::{
    IndexerMode, IndexerStatus, MarketService, Reconciliation, TradeRequest,
};
pub use outbound::ledger::{
    CallData, EventSource, ReceiptStatus, StreamHealth, TransactionGateway, TxReceipt,
};
pub use outbound::notifier::{
    AlertKind, ChainAlert, Event, JobEvent, LogNotifier, MarketUpdate, Notifier, NotifierRegistry,
    Topic,
};
pub use outbound::signer::{SignedTransaction, TransactionSigner, UnsignedTransaction};
pub use outbound::store::{CasOutcome, RowKey, RowKind, RowStore, VersionedRow};
