//! Indexer mode transitions.

use std::time::Duration;

use crate::port::inbound::market::IndexerMode;
use crate::port::outbound::ledger::StreamHealth;

/// What the mode decision looks at.
#[derive(Debug, Clone)]
pub(crate) struct ModeInputs {
    /// First block not yet committed.
    pub next_block: u64,
    pub head: u64,
    pub confirmations: u64,
    /// `None` when no stream source is configured.
    pub stream: Option<StreamHealth>,
    pub stream_max_age: Duration,
    pub consecutive_failures: u32,
    pub max_consecutive_failures: u32,
}

impl ModeInputs {
    /// Every confirmed block has been processed. Trivially true while the
    /// chain is shorter than the confirmation depth.
    pub fn caught_up(&self) -> bool {
        self.head
            .checked_sub(self.confirmations)
            .map_or(true, |safe_head| self.next_block > safe_head)
    }

    /// No stream configured, or the stream is fresh and covers `next_block`.
    pub fn stream_usable(&self) -> bool {
        self.stream.as_ref().map_or(true, |health| {
            health.is_fresh(self.stream_max_age) && health.covers(self.next_block)
        })
    }

    fn failing(&self) -> bool {
        self.consecutive_failures >= self.max_consecutive_failures
    }
}

/// Mode on first contact with the chain.
pub(crate) fn initial_mode(inputs: &ModeInputs) -> IndexerMode {
    if inputs.caught_up() {
        IndexerMode::Live
    } else {
        IndexerMode::Backfilling
    }
}

/// Mode for the coming tick.
pub(crate) fn next_mode(current: IndexerMode, inputs: &ModeInputs) -> IndexerMode {
    if inputs.failing() {
        return IndexerMode::Degraded;
    }
    match current {
        IndexerMode::Backfilling if !inputs.caught_up() => IndexerMode::Backfilling,
        IndexerMode::Backfilling | IndexerMode::Live => {
            if inputs.stream_usable() {
                IndexerMode::Live
            } else {
                IndexerMode::Degraded
            }
        }
        IndexerMode::Degraded => {
            if inputs.caught_up() && inputs.stream_usable() {
                IndexerMode::Live
            } else {
                IndexerMode::Degraded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(next_block: u64, head: u64) -> ModeInputs {
        ModeInputs {
            next_block,
            head,
            confirmations: 2,
            stream: None,
            stream_max_age: Duration::from_secs(15),
            consecutive_failures: 0,
            max_consecutive_failures: 3,
        }
    }

    fn healthy(earliest: u64) -> StreamHealth {
        StreamHealth {
            connected: true,
            head: Some(100),
            earliest_block: Some(earliest),
            last_block_age: Some(Duration::from_secs(1)),
        }
    }

    #[test]
    fn initial_mode_depends_on_lag() {
        assert_eq!(initial_mode(&inputs(0, 100)), IndexerMode::Backfilling);
        assert_eq!(initial_mode(&inputs(99, 100)), IndexerMode::Live);
    }

    #[test]
    fn short_chain_has_nothing_confirmed() {
        let mut young = inputs(0, 1);
        young.confirmations = 12;
        assert!(young.caught_up());
        assert_eq!(initial_mode(&young), IndexerMode::Live);

        young.head = 12;
        assert!(!young.caught_up());
    }

    #[test]
    fn backfill_finishes_into_live() {
        assert_eq!(
            next_mode(IndexerMode::Backfilling, &inputs(50, 100)),
            IndexerMode::Backfilling
        );
        let mut caught_up = inputs(99, 100);
        caught_up.stream = Some(healthy(90));
        assert_eq!(next_mode(IndexerMode::Backfilling, &caught_up), IndexerMode::Live);
    }

    #[test]
    fn stale_or_gapped_stream_degrades() {
        let mut stale = inputs(99, 100);
        let mut health = healthy(90);
        health.last_block_age = Some(Duration::from_secs(60));
        stale.stream = Some(health);
        assert_eq!(next_mode(IndexerMode::Live, &stale), IndexerMode::Degraded);

        let mut gapped = inputs(99, 100);
        gapped.stream = Some(healthy(100));
        assert_eq!(next_mode(IndexerMode::Live, &gapped), IndexerMode::Degraded);
    }

    #[test]
    fn degraded_recovers_once_caught_up_and_stream_healthy() {
        let mut lagging = inputs(50, 100);
        lagging.stream = Some(healthy(40));
        assert_eq!(next_mode(IndexerMode::Degraded, &lagging), IndexerMode::Degraded);

        let mut ready = inputs(99, 100);
        ready.stream = Some(healthy(90));
        assert_eq!(next_mode(IndexerMode::Degraded, &ready), IndexerMode::Live);
    }

    #[test]
    fn repeated_failures_degrade_any_mode() {
        let mut failing = inputs(99, 100);
        failing.consecutive_failures = 3;
        assert_eq!(next_mode(IndexerMode::Live, &failing), IndexerMode::Degraded);
        assert_eq!(next_mode(IndexerMode::Backfilling, &failing), IndexerMode::Degraded);
    }
}
