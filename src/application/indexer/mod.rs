//! Chain event indexer.
//!
//! One [`ChainIndexer`] per chain runs as a single sequential task. Each
//! tick it:
//!
//! 1. reads the head and re-checks the hash of the last committed block,
//! 2. picks a mode (Backfilling, Live or Degraded) and with it a source,
//! 3. fetches the window `[next, min(next + chunk - 1, head)]` into the
//!    pending buffer, replacing whatever was buffered for that range,
//! 4. reads the hash of the last block at least `confirmations` deep, checks
//!    every buffered block up to it against the canonical chain and applies
//!    their events,
//! 5. commits the cursor, with that hash, to the end of the applied range.
//!
//! Polling ticks are spaced by the fallback poll interval; ticks reading a
//! live stream by the shorter tick interval.
//!
//! Errors abort the tick before the cursor is committed, so a failed tick is
//! replayed in full. Replays are harmless: the dedupe window and the markets'
//! own identity records turn already-applied events into no-ops.

mod mode;
mod pending;
mod status;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use self::mode::{initial_mode, next_mode, ModeInputs};
use self::pending::PendingBuffer;
pub use self::status::StatusHandle;
use crate::application::state::{ApplyOutcome, MarketStateStore};
use crate::domain::backoff::Backoff;
use crate::domain::cursor::Cursor;
use crate::domain::event::ChainEvent;
use crate::domain::id::{BlockHash, ChainId};
use crate::domain::market::derive_transition;
use crate::error::{ChainError, Error, Result};
use crate::port::inbound::market::{IndexerMode, IndexerStatus};
use crate::port::outbound::ledger::EventSource;
use crate::port::outbound::notifier::{AlertKind, ChainAlert, Event, NotifierRegistry};

/// Per-chain indexer tuning.
#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub chain_id: ChainId,
    /// First block to index when no cursor exists.
    pub start_block: u64,
    pub confirmations: u64,
    pub chunk_size: u64,
    /// A stream silent for longer than this is considered stale; also the
    /// pause between polling ticks.
    pub fallback_poll_interval: Duration,
    /// Timeout for every source call.
    pub rpc_timeout: Duration,
    pub max_consecutive_failures: u32,
    /// Pause between ticks once caught up on a live stream.
    pub tick_interval: Duration,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

impl IndexerSettings {
    /// Settings with the documented defaults for `chain_id`.
    #[must_use]
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            start_block: 0,
            confirmations: 12,
            chunk_size: 1_000,
            fallback_poll_interval: Duration::from_millis(15_000),
            rpc_timeout: Duration::from_millis(10_000),
            max_consecutive_failures: 5,
            tick_interval: Duration::from_millis(1_000),
            retry_initial_delay: Duration::from_millis(1_000),
            retry_max_delay: Duration::from_millis(60_000),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub mode: IndexerMode,
    pub head: u64,
    /// Window fetched this tick.
    pub window: Option<(u64, u64)>,
    /// Block the cursor was committed to, if it moved.
    pub committed: Option<u64>,
    /// Nothing confirmed is left to process.
    pub caught_up: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct ApplyCounts {
    applied: u64,
    duplicates: u64,
    rejected: u64,
}

/// Sequential indexer for one chain.
pub struct ChainIndexer {
    settings: IndexerSettings,
    state: Arc<MarketStateStore>,
    poll: Arc<dyn EventSource>,
    stream: Option<Arc<dyn EventSource>>,
    notifiers: Arc<NotifierRegistry>,
    cursor: Option<Cursor>,
    mode: Option<IndexerMode>,
    pending: PendingBuffer,
    status: StatusHandle,
}

impl ChainIndexer {
    #[must_use]
    pub fn new(
        settings: IndexerSettings,
        state: Arc<MarketStateStore>,
        poll: Arc<dyn EventSource>,
        stream: Option<Arc<dyn EventSource>>,
        notifiers: Arc<NotifierRegistry>,
    ) -> Self {
        let status = StatusHandle::new(settings.chain_id);
        Self {
            settings,
            state,
            poll,
            stream,
            notifiers,
            cursor: None,
            mode: None,
            pending: PendingBuffer::default(),
            status,
        }
    }

    /// Handle for health reporting; stays valid after the indexer is moved
    /// into its task.
    #[must_use]
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    #[must_use]
    pub fn status(&self) -> IndexerStatus {
        self.status.snapshot()
    }

    /// Tick until `shutdown` is set or the chain is found compromised.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::ReorgBeyondConfirmations`] when ingestion halts.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let chain_id = self.settings.chain_id;
        let mut backoff = Backoff::new(
            self.settings.retry_initial_delay,
            self.settings.retry_max_delay,
            2.0,
            0,
            Duration::ZERO,
        );
        info!(%chain_id, "Indexer started");

        loop {
            let delay = match self.tick().await {
                Ok(report) => {
                    backoff.reset();
                    self.idle_delay(&report)
                }
                Err(e) if self.status.snapshot().compromised => {
                    error!(%chain_id, error = %e, "Indexer halted");
                    return Err(e);
                }
                Err(e) => {
                    self.record_failure(&e);
                    backoff.record_failure();
                    backoff.next_delay()
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(%chain_id, "Indexer stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run one ingestion step.
    ///
    /// # Errors
    ///
    /// Source and store failures are returned without advancing the cursor.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let chain_id = self.settings.chain_id;
        if let Some(block) = self.compromised_block() {
            return Err(ChainError::ReorgBeyondConfirmations {
                block,
                confirmations: self.settings.confirmations,
            }
            .into());
        }

        if self.cursor.is_none() {
            self.cursor = Some(self.state.load_cursor(chain_id).await?);
        }
        let next = self.next_block();

        let head = self.read_head(next).await?;
        self.check_committed_hash().await?;

        let inputs = self.mode_inputs(next, head);
        let mode = match self.mode {
            None => {
                let mode = initial_mode(&inputs);
                info!(%chain_id, mode = mode.as_str(), head, next, "Indexer mode selected");
                mode
            }
            Some(current) => next_mode(current, &inputs),
        };
        self.enter(mode, &inputs);

        let discarded_above_head = self.pending.discard_from(head.saturating_add(1));
        if next > head {
            self.publish_status(head, discarded_above_head, ApplyCounts::default());
            return Ok(TickReport {
                mode,
                head,
                window: None,
                committed: None,
                caught_up: true,
            });
        }

        let to = next
            .saturating_add(self.settings.chunk_size.max(1) - 1)
            .min(head);
        let events = self.fetch(mode, next, to).await?;
        let mut discarded = discarded_above_head + self.pending.replace_range(next, to, events);

        // `None` while the chain is shorter than the confirmation depth.
        let safe_head = head.checked_sub(self.settings.confirmations);
        let mut commit = None;
        let mut committed = None;
        let mut counts = ApplyCounts::default();

        if let Some(end) = safe_head.filter(|safe| *safe >= next).map(|safe| to.min(safe)) {
            let (verified, dropped) = self.verify_pending(next, end).await?;
            discarded += dropped;
            commit = verified;
        }

        if let Some((commit_to, end_hash)) = commit {
            let mut working = self
                .cursor
                .clone()
                .unwrap_or_else(|| Cursor::new(chain_id, self.state.settings().retention_blocks));
            counts = self.apply_range(&mut working, next, commit_to).await?;

            working.record_block(commit_to, end_hash);
            working.advance_to(commit_to);
            let stored = self.state.commit_cursor(&working).await?;
            self.cursor = Some(stored);
            self.pending.release_through(commit_to);
            committed = Some(commit_to);

            debug!(
                %chain_id,
                from = next,
                to = commit_to,
                applied = counts.applied,
                duplicates = counts.duplicates,
                rejected = counts.rejected,
                "Committed window"
            );
        }

        let next_after = self.next_block();
        let caught_up = safe_head.map_or(true, |safe| next_after > safe);
        if mode == IndexerMode::Backfilling && caught_up {
            let inputs = self.mode_inputs(next_after, head);
            let mode = next_mode(mode, &inputs);
            self.enter(mode, &inputs);
        }
        self.publish_status(head, discarded, counts);

        Ok(TickReport {
            mode: self.mode.unwrap_or(mode),
            head,
            window: Some((next, to)),
            committed,
            caught_up,
        })
    }

    /// Pause before the next tick. Polling ticks wait the fallback interval;
    /// a live stream is read on the short tick interval; a backfill that is
    /// behind does not wait.
    fn idle_delay(&self, report: &TickReport) -> Duration {
        if report.mode == IndexerMode::Degraded {
            self.settings.fallback_poll_interval
        } else if !report.caught_up {
            Duration::ZERO
        } else if self.stream.is_none() {
            self.settings.fallback_poll_interval
        } else {
            self.settings.tick_interval
        }
    }

    fn next_block(&self) -> u64 {
        let start = self.settings.start_block;
        self.cursor.as_ref().map_or(start, |c| c.next_block(start))
    }

    fn compromised_block(&self) -> Option<u64> {
        if !self.status.snapshot().compromised {
            return None;
        }
        Some(
            self.cursor
                .as_ref()
                .and_then(|c| c.latest_block_hash().map(|(n, _)| n))
                .unwrap_or_default(),
        )
    }

    async fn timed<T>(&self, operation: &'static str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.settings.rpc_timeout;
        tokio::time::timeout(timeout, call).await.map_err(|_| {
            Error::timeout(operation, u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
        })?
    }

    fn stream_for(&self, mode: IndexerMode) -> Option<&Arc<dyn EventSource>> {
        match mode {
            IndexerMode::Live => self.stream.as_ref(),
            IndexerMode::Backfilling | IndexerMode::Degraded => None,
        }
    }

    fn mode_inputs(&self, next_block: u64, head: u64) -> ModeInputs {
        ModeInputs {
            next_block,
            head,
            confirmations: self.settings.confirmations,
            stream: self.stream.as_ref().map(|s| s.stream_health().unwrap_or_default()),
            stream_max_age: self.settings.fallback_poll_interval,
            consecutive_failures: self.status.snapshot().consecutive_failures,
            max_consecutive_failures: self.settings.max_consecutive_failures.max(1),
        }
    }

    async fn read_head(&self, next: u64) -> Result<u64> {
        let current = self.mode.unwrap_or(IndexerMode::Backfilling);
        if let Some(stream) = self.stream_for(current) {
            let inputs = self.mode_inputs(next, 0);
            if inputs.stream_usable() {
                match self.timed("head", stream.head()).await {
                    Ok(head) => return Ok(head),
                    Err(e) => debug!(error = %e, "Stream head unavailable, polling"),
                }
            }
        }
        self.timed("head", self.poll.head()).await
    }

    /// Compare the last committed block's hash with the canonical chain.
    async fn check_committed_hash(&mut self) -> Result<()> {
        let Some((block, recorded)) = self
            .cursor
            .as_ref()
            .and_then(|c| c.latest_block_hash().map(|(n, h)| (n, h.clone())))
        else {
            return Ok(());
        };
        let Some(canonical) = self.timed("block_hash", self.poll.block_hash(block)).await? else {
            return Err(ChainError::Connectivity(format!("block {block} not available")).into());
        };
        if canonical == recorded {
            return Ok(());
        }

        let chain_id = self.settings.chain_id;
        let confirmations = self.settings.confirmations;
        error!(
            %chain_id,
            block,
            recorded = %recorded,
            canonical = %canonical,
            "Committed block was reorganized, state may be wrong"
        );
        self.status.update(|s| s.compromised = true);
        self.notifiers.notify_all(Event::ChainAlert(ChainAlert {
            chain_id,
            kind: AlertKind::ReorgBeyondConfirmations,
            message: format!(
                "block {block} changed after {confirmations} confirmations; ingestion halted"
            ),
        }));
        Err(ChainError::ReorgBeyondConfirmations {
            block,
            confirmations,
        }
        .into())
    }

    fn enter(&mut self, mode: IndexerMode, inputs: &ModeInputs) {
        let previous = self.mode.replace(mode);
        self.status.update(|s| s.mode = mode);
        let Some(previous) = previous else {
            return;
        };
        if previous == mode {
            return;
        }

        let chain_id = self.settings.chain_id;
        info!(
            %chain_id,
            from = previous.as_str(),
            to = mode.as_str(),
            next = inputs.next_block,
            head = inputs.head,
            "Indexer mode changed"
        );
        let alert = match (previous, mode) {
            (_, IndexerMode::Degraded) => Some((
                AlertKind::Degraded,
                if inputs.consecutive_failures >= inputs.max_consecutive_failures {
                    format!("{} consecutive failures", inputs.consecutive_failures)
                } else {
                    "event stream stale or incomplete, polling".to_string()
                },
            )),
            (IndexerMode::Degraded, IndexerMode::Live) => {
                Some((AlertKind::Recovered, "event stream healthy again".to_string()))
            }
            _ => None,
        };
        if let Some((kind, message)) = alert {
            self.notifiers.notify_all(Event::ChainAlert(ChainAlert {
                chain_id,
                kind,
                message,
            }));
        }
    }

    async fn fetch(&mut self, mode: IndexerMode, from: u64, to: u64) -> Result<Vec<ChainEvent>> {
        if let Some(stream) = self.stream_for(mode).cloned() {
            match self.timed("fetch_events", stream.fetch_events(from, to)).await {
                Ok(events) => return Ok(events),
                Err(e) => {
                    warn!(chain_id = %self.settings.chain_id, error = %e, "Stream fetch failed, falling back to polling");
                    let inputs = self.mode_inputs(from, to);
                    self.enter(IndexerMode::Degraded, &inputs);
                }
            }
        }
        self.timed("fetch_events", self.poll.fetch_events(from, to)).await
    }

    /// Check buffered blocks in `[from, to]` against canonical hashes.
    ///
    /// The hash of the block the cursor will be committed to is read before
    /// the buffered blocks are checked, so the recorded hash is the one the
    /// applied events were verified against. Returns that block with its hash,
    /// if anything may be committed, and the number of blocks discarded.
    async fn verify_pending(&mut self, from: u64, to: u64) -> Result<(Option<(u64, BlockHash)>, u64)> {
        let mut end = to;
        let mut dropped = 0;
        loop {
            let end_hash = self
                .timed("block_hash", self.poll.block_hash(end))
                .await?
                .ok_or_else(|| ChainError::Connectivity(format!("block {end} not found")))?;

            let buffered: Vec<(u64, BlockHash)> = self
                .pending
                .range(from, end)
                .map(|(n, block)| (*n, block.hash.clone()))
                .collect();

            let mut reorged = None;
            for (number, hash) in buffered {
                let canonical = if number == end {
                    Some(end_hash.clone())
                } else {
                    self.timed("block_hash", self.poll.block_hash(number)).await?
                };
                if canonical.as_ref() != Some(&hash) {
                    reorged = Some((number, hash, canonical));
                    break;
                }
            }

            let Some((number, hash, canonical)) = reorged else {
                return Ok((Some((end, end_hash)), dropped));
            };
            let discarded = self.pending.discard_from(number);
            dropped += discarded;
            warn!(
                chain_id = %self.settings.chain_id,
                block = number,
                buffered = %hash,
                canonical = ?canonical,
                dropped = discarded,
                "Buffered block reorganized, discarding"
            );
            match number.checked_sub(1).filter(|block| *block >= from) {
                Some(last) => end = last,
                None => return Ok((None, dropped)),
            }
        }
    }

    async fn apply_range(&self, cursor: &mut Cursor, from: u64, to: u64) -> Result<ApplyCounts> {
        let chain_id = self.settings.chain_id;
        let mut counts = ApplyCounts::default();
        let events: Vec<_> = self
            .pending
            .range(from, to)
            .flat_map(|(_, block)| block.events.iter().cloned())
            .collect();

        for event in events {
            let id = event.id();
            if cursor.contains(&id) {
                debug!(%chain_id, event = %id, "Duplicate event in dedupe window");
                counts.duplicates += 1;
                continue;
            }
            match self.state.apply_confirmed_event(&event, derive_transition).await? {
                ApplyOutcome::Applied(_) => counts.applied += 1,
                ApplyOutcome::Duplicate => counts.duplicates += 1,
                ApplyOutcome::Rejected(reason) => {
                    warn!(
                        %chain_id,
                        market_id = %event.market_id,
                        event = %id,
                        kind = event.kind().as_str(),
                        error = %reason,
                        "Rejected event"
                    );
                    counts.rejected += 1;
                }
            }
            cursor.record_applied(id, event.block_number);
        }
        Ok(counts)
    }

    fn record_failure(&mut self, error: &Error) {
        let chain_id = self.settings.chain_id;
        let max = self.settings.max_consecutive_failures.max(1);
        let mut failures = 0;
        self.status.update(|s| {
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            failures = s.consecutive_failures;
        });
        warn!(%chain_id, failures, error = %error, "Indexer tick failed");

        if failures >= max && self.mode != Some(IndexerMode::Degraded) {
            let head = self.status.snapshot().head.unwrap_or_default();
            let inputs = self.mode_inputs(self.next_block(), head);
            self.enter(IndexerMode::Degraded, &inputs);
        }
    }

    fn publish_status(&self, head: u64, discarded: u64, counts: ApplyCounts) {
        let last_confirmed_block = self.cursor.as_ref().and_then(Cursor::last_confirmed_block);
        let pending_blocks = self.pending.len();
        self.status.update(|s| {
            s.head = Some(head);
            s.last_confirmed_block = last_confirmed_block;
            s.pending_blocks = pending_blocks;
            s.applied_events += counts.applied;
            s.duplicate_events += counts.duplicates;
            s.rejected_events += counts.rejected;
            s.discarded_blocks += discarded;
            s.consecutive_failures = 0;
        });
    }
}
