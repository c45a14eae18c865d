//! Notifier port for state-change announcements.
//!
//! Events are grouped into topics. Within a topic, every notifier sees events
//! in the order they were published; there is no ordering across topics.

use std::fmt;

use tracing::{error, info, warn};

use crate::domain::event::EventId;
use crate::domain::id::{ChainId, JobId, MarketId, TxHash};
use crate::domain::job::{JobKind, JobState};
use crate::domain::market::Market;

/// Delivery topic of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Market,
    Chain,
    Job,
}

impl Topic {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Chain => "chain",
            Self::Job => "job",
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone)]
pub enum Event {
    /// A confirmed ledger event changed a market.
    MarketStateChanged(MarketUpdate),
    /// Indexer health changed.
    ChainAlert(ChainAlert),
    /// A contract-call job reached a terminal state.
    JobFinished(JobEvent),
}

impl Event {
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::MarketStateChanged(_) => Topic::Market,
            Self::ChainAlert(_) => Topic::Chain,
            Self::JobFinished(_) => Topic::Job,
        }
    }
}

/// New state of a market after one confirmed event.
#[derive(Debug, Clone)]
pub struct MarketUpdate {
    pub market_id: MarketId,
    pub market: Market,
    pub event_id: EventId,
    pub block_number: u64,
}

/// Kind of indexer alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// The chain fell back to polling or keeps failing.
    Degraded,
    /// The chain is live again.
    Recovered,
    /// Applied state may be wrong; ingestion stopped.
    ReorgBeyondConfirmations,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Degraded => "degraded",
            Self::Recovered => "recovered",
            Self::ReorgBeyondConfirmations => "reorg_beyond_confirmations",
        };
        write!(f, "{label}")
    }
}

/// Indexer health alert.
#[derive(Debug, Clone)]
pub struct ChainAlert {
    pub chain_id: ChainId,
    pub kind: AlertKind,
    pub message: String,
}

impl ChainAlert {
    /// Fatal alerts mean state may be compromised.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, AlertKind::ReorgBeyondConfirmations)
    }
}

/// Terminal job outcome.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: JobId,
    pub market_id: MarketId,
    pub kind: JobKind,
    pub state: JobState,
    pub attempts: u32,
    pub broadcasts: Vec<TxHash>,
    pub last_error: Option<String>,
}

/// Trait for notification handlers.
///
/// Implementations must be thread-safe and must return quickly; slow work
/// belongs on a spawned task fed by a channel.
pub trait Notifier: Send + Sync {
    /// Handle an event.
    fn notify(&self, event: Event);
}

/// Registry of notifiers (composite pattern).
///
/// Broadcasts events to all registered notifiers.
pub struct NotifierRegistry {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { notifiers: vec![] }
    }

    /// Register a notifier.
    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    /// Notify all registered notifiers.
    pub fn notify_all(&self, event: Event) {
        for notifier in &self.notifiers {
            notifier.notify(event.clone());
        }
    }

    /// Number of registered notifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Check if registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A logging notifier that logs events via tracing.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Event) {
        match event {
            Event::MarketStateChanged(update) => {
                info!(
                    market_id = %update.market_id,
                    block = update.block_number,
                    event = %update.event_id,
                    status = update.market.status().as_str(),
                    "Market state changed"
                );
            }
            Event::ChainAlert(alert) if alert.is_fatal() => {
                error!(chain_id = %alert.chain_id, kind = %alert.kind, message = %alert.message, "Chain alert");
            }
            Event::ChainAlert(alert) => {
                warn!(chain_id = %alert.chain_id, kind = %alert.kind, message = %alert.message, "Chain alert");
            }
            Event::JobFinished(job) => {
                info!(
                    job_id = %job.job_id,
                    market_id = %job.market_id,
                    kind = job.kind.as_str(),
                    state = job.state.as_str(),
                    attempts = job.attempts,
                    error = job.last_error.as_deref().unwrap_or(""),
                    "Job finished"
                );
            }
        }
    }
}
