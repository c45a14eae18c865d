//! Transactional access to markets and cursors.
//!
//! Every write is a compare-and-swap against the version that was read.
//! Conflicting writers re-read and retry a bounded number of times.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::cursor::Cursor;
use crate::domain::error::DomainError;
use crate::domain::event::ChainEvent;
use crate::domain::id::{ChainId, MarketId};
use crate::domain::market::Market;
use crate::error::{Error, Result};
use crate::port::outbound::notifier::{Event, MarketUpdate, NotifierRegistry};
use crate::port::outbound::store::{CasOutcome, RowKey, RowKind, RowStore, VersionedRow};

/// Tuning for [`MarketStateStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSettings {
    /// Attempts per write before giving up with `StateConflict`.
    pub max_cas_retries: u32,
    /// How long applied identities are remembered, in blocks.
    pub retention_blocks: u64,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            max_cas_retries: 5,
            retention_blocks: 1_012,
        }
    }
}

/// Result of applying one confirmed event.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The market moved to this state.
    Applied(Market),
    /// The market had already recorded this event.
    Duplicate,
    /// The event does not fit the market; nothing was written.
    Rejected(DomainError),
}

/// Owner of market and cursor rows.
pub struct MarketStateStore {
    store: Arc<dyn RowStore>,
    notifiers: Arc<NotifierRegistry>,
    settings: StateSettings,
}

fn decode<T: DeserializeOwned>(key: &RowKey, row: &VersionedRow) -> Result<T> {
    serde_json::from_str(&row.body)
        .map_err(|e| Error::Database(format!("corrupt row {key} at version {}: {e}", row.version)))
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

impl MarketStateStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn RowStore>,
        notifiers: Arc<NotifierRegistry>,
        settings: StateSettings,
    ) -> Self {
        Self {
            store,
            notifiers,
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> StateSettings {
        self.settings
    }

    fn attempts(&self) -> u32 {
        self.settings.max_cas_retries.max(1)
    }

    /// Market by id, or `None` if it was never created.
    pub async fn find(&self, id: &MarketId) -> Result<Option<Market>> {
        let key = RowKey::market(id);
        let Some(row) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let mut market: Market = decode(&key, &row)?;
        market.set_version(row.version);
        Ok(Some(market))
    }

    /// Market by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the market does not exist.
    pub async fn get(&self, id: &MarketId) -> Result<Market> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("market {id}")))
    }

    /// Every stored market, ordered by id.
    pub async fn list(&self) -> Result<Vec<Market>> {
        let rows = self.store.list(RowKind::Market).await?;
        rows.into_iter()
            .map(|(id, row)| {
                let key = RowKey::market(&MarketId::new(id));
                let mut market: Market = decode(&key, &row)?;
                market.set_version(row.version);
                Ok(market)
            })
            .collect()
    }

    /// Write `market` if nobody changed it since it was read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateConflict`] when the stored version differs from
    /// `market.version()`.
    pub async fn cas_update(&self, market: &Market) -> Result<Market> {
        let key = RowKey::market(market.id());
        match self
            .store
            .compare_and_swap(&key, market.version(), encode(market)?)
            .await?
        {
            CasOutcome::Swapped { version } => {
                let mut written = market.clone();
                written.set_version(version);
                Ok(written)
            }
            CasOutcome::Conflict { current } => {
                debug!(%key, expected = ?market.version(), ?current, "Market write conflict");
                Err(Error::StateConflict {
                    key: key.to_string(),
                    attempts: 1,
                })
            }
        }
    }

    /// Read-modify-write with retries. `f` receives the freshest state on
    /// every attempt and may run more than once.
    pub async fn update_with<F>(&self, id: &MarketId, mut f: F) -> Result<Market>
    where
        F: FnMut(&Market) -> Result<Market>,
    {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            let current = self.get(id).await?;
            let mut next = f(&current)?;
            if let Some(version) = current.version() {
                next.set_version(version);
            }
            match self.cas_update(&next).await {
                Ok(written) => return Ok(written),
                Err(Error::StateConflict { .. }) if attempt < attempts => {
                    tokio::task::yield_now().await;
                }
                Err(Error::StateConflict { key, .. }) => {
                    return Err(Error::StateConflict { key, attempts });
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::StateConflict {
            key: RowKey::market(id).to_string(),
            attempts,
        })
    }

    /// Apply one confirmed event atomically.
    ///
    /// `derive` computes the next state; it is re-run against fresh state
    /// after a conflicting write. Events the market already recorded are
    /// skipped without calling `derive`.
    pub async fn apply_confirmed_event<F>(&self, event: &ChainEvent, derive: F) -> Result<ApplyOutcome>
    where
        F: Fn(Option<&Market>, &ChainEvent) -> std::result::Result<Market, DomainError>,
    {
        let id = event.id();
        let key = RowKey::market(&event.market_id);
        let attempts = self.attempts();

        for attempt in 1..=attempts {
            let current = self.find(&event.market_id).await?;
            if current.as_ref().is_some_and(|m| m.has_applied(&id)) {
                debug!(event = %id, market_id = %event.market_id, "Event already applied to market");
                return Ok(ApplyOutcome::Duplicate);
            }

            let mut next = match derive(current.as_ref(), event) {
                Ok(next) => next,
                Err(e) => return Ok(ApplyOutcome::Rejected(e)),
            };
            next.record_applied(id.clone(), event.block_number, self.settings.retention_blocks);

            let expected = current.as_ref().and_then(Market::version);
            match self
                .store
                .compare_and_swap(&key, expected, encode(&next)?)
                .await?
            {
                CasOutcome::Swapped { version } => {
                    next.set_version(version);
                    debug!(
                        market_id = %event.market_id,
                        event = %id,
                        kind = event.kind().as_str(),
                        block = event.block_number,
                        version,
                        "Applied event"
                    );
                    self.notifiers
                        .notify_all(Event::MarketStateChanged(MarketUpdate {
                            market_id: event.market_id.clone(),
                            market: next.clone(),
                            event_id: id,
                            block_number: event.block_number,
                        }));
                    return Ok(ApplyOutcome::Applied(next));
                }
                CasOutcome::Conflict { current } => {
                    debug!(%key, attempt, ?current, "Conflict applying event, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(%key, attempts, event = %id, "Giving up applying event after repeated conflicts");
        Err(Error::StateConflict {
            key: key.to_string(),
            attempts,
        })
    }

    /// Stored cursor for `chain_id`, or a fresh one.
    ///
    /// The retention horizon always follows the current settings.
    pub async fn load_cursor(&self, chain_id: ChainId) -> Result<Cursor> {
        let key = RowKey::cursor(chain_id);
        let mut cursor = match self.store.get(&key).await? {
            Some(row) => {
                let mut cursor: Cursor = decode(&key, &row)?;
                cursor.set_version(row.version);
                cursor
            }
            None => Cursor::new(chain_id, self.settings.retention_blocks),
        };
        cursor.set_retention_blocks(self.settings.retention_blocks);
        Ok(cursor)
    }

    /// Persist `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::CursorRegression`] if the stored cursor is
    /// further ahead, and [`Error::StateConflict`] if another writer keeps
    /// winning.
    pub async fn commit_cursor(&self, cursor: &Cursor) -> Result<Cursor> {
        let key = RowKey::cursor(cursor.chain_id());
        let body = encode(cursor)?;
        let mut expected = cursor.version();
        let attempts = self.attempts();

        for attempt in 1..=attempts {
            match self
                .store
                .compare_and_swap(&key, expected, body.clone())
                .await?
            {
                CasOutcome::Swapped { version } => {
                    let mut written = cursor.clone();
                    written.set_version(version);
                    return Ok(written);
                }
                CasOutcome::Conflict { current } => {
                    let stored = self.load_cursor(cursor.chain_id()).await?;
                    if let Some(stored_block) = stored.last_confirmed_block() {
                        if cursor
                            .last_confirmed_block()
                            .map_or(true, |proposed| proposed < stored_block)
                        {
                            return Err(DomainError::CursorRegression {
                                chain_id: cursor.chain_id().value(),
                                stored: stored_block,
                                proposed: cursor.last_confirmed_block(),
                            }
                            .into());
                        }
                    }
                    debug!(%key, attempt, ?current, "Cursor write conflict, retrying");
                    expected = stored.version();
                    tokio::task::yield_now().await;
                }
            }
        }

        Err(Error::StateConflict {
            key: key.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::adapter::outbound::memory::MemoryRowStore;
    use crate::domain::event::EventPayload;
    use crate::domain::id::{BlockHash, TxHash};
    use crate::domain::market::derive_transition;
    use crate::port::outbound::notifier::Notifier;

    struct Counter(Arc<AtomicUsize>);

    impl Notifier for Counter {
        fn notify(&self, event: Event) {
            if matches!(event, Event::MarketStateChanged(_)) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn event(block: u64, index: u64, payload: EventPayload) -> ChainEvent {
        ChainEvent {
            chain_id: ChainId::new(1),
            block_number: block,
            block_hash: BlockHash::new(format!("0xb{block}")),
            log_index: index,
            tx_hash: TxHash::new(format!("0xt{block}")),
            market_id: MarketId::new("m1"),
            payload,
        }
    }

    fn created() -> ChainEvent {
        event(
            1,
            0,
            EventPayload::MarketCreated {
                outcomes: 2,
                liquidity: 50.0,
            },
        )
    }

    fn state() -> (MarketStateStore, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = NotifierRegistry::new();
        registry.register(Box::new(Counter(Arc::clone(&count))));
        let store = MarketStateStore::new(
            Arc::new(MemoryRowStore::new()),
            Arc::new(registry),
            StateSettings::default(),
        );
        (store, count)
    }

    #[tokio::test]
    async fn applies_once_and_notifies_once() {
        let (state, notified) = state();
        let outcome = state
            .apply_confirmed_event(&created(), derive_transition)
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied(ref m) if m.version() == Some(1)));

        let again = state
            .apply_confirmed_event(&created(), derive_transition)
            .await
            .unwrap();
        assert_eq!(again, ApplyOutcome::Duplicate);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_events_write_nothing() {
        let (state, notified) = state();
        let trade = event(2, 0, EventPayload::TradeExecuted { outcome: 0, shares: 1.0 });
        let outcome = state
            .apply_confirmed_event(&trade, derive_transition)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ApplyOutcome::Rejected(DomainError::UnknownMarket { .. })
        ));
        assert!(state.find(&MarketId::new("m1")).await.unwrap().is_none());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn get_missing_market_is_not_found() {
        let (state, _) = state();
        let err = state.get(&MarketId::new("nope")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn stale_cas_update_conflicts() {
        let (state, _) = state();
        state
            .apply_confirmed_event(&created(), derive_transition)
            .await
            .unwrap();
        let stale = state.get(&MarketId::new("m1")).await.unwrap();
        let fresh = state.cas_update(&stale).await.unwrap();
        assert_eq!(fresh.version(), Some(2));

        let err = state.cas_update(&stale).await.unwrap_err();
        assert!(matches!(err, Error::StateConflict { .. }));
    }

    #[tokio::test]
    async fn update_with_sees_latest_state() {
        let (state, _) = state();
        state
            .apply_confirmed_event(&created(), derive_transition)
            .await
            .unwrap();
        let trade = event(2, 0, EventPayload::TradeExecuted { outcome: 1, shares: 3.0 });
        let updated = state
            .update_with(&MarketId::new("m1"), |market| {
                Ok(derive_transition(Some(market), &trade)?)
            })
            .await
            .unwrap();
        assert_eq!(updated.shares(), &[0.0, 3.0]);
        assert_eq!(updated.version(), Some(2));
    }

    #[tokio::test]
    async fn cursor_commits_are_monotonic() {
        let (state, _) = state();
        let mut cursor = state.load_cursor(ChainId::new(1)).await.unwrap();
        assert_eq!(cursor.last_confirmed_block(), None);
        cursor.advance_to(10);
        let committed = state.commit_cursor(&cursor).await.unwrap();
        assert_eq!(committed.version(), Some(1));

        let mut ahead = committed.clone();
        ahead.advance_to(20);
        state.commit_cursor(&ahead).await.unwrap();

        // `committed` is now stale and behind the stored block.
        let err = state.commit_cursor(&committed).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(DomainError::CursorRegression { stored: 20, .. })
        ));
        let stored = state.load_cursor(ChainId::new(1)).await.unwrap();
        assert_eq!(stored.last_confirmed_block(), Some(20));
    }
}
