//! Per-chain ingestion cursor.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::event::EventId;
use super::id::{BlockHash, ChainId};

/// Progress of the indexer on one chain.
///
/// `last_confirmed_block` never decreases. The cursor also keeps a rolling
/// window of applied event identities and the hashes of the blocks it has
/// committed, both retained for `retention_blocks` below the newest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    chain_id: ChainId,
    last_confirmed_block: Option<u64>,
    retention_blocks: u64,
    #[serde(default)]
    recent: VecDeque<(EventId, u64)>,
    #[serde(default)]
    block_hashes: BTreeMap<u64, BlockHash>,
    #[serde(skip)]
    version: Option<u64>,
}

impl Cursor {
    /// A cursor that has not committed anything yet.
    #[must_use]
    pub fn new(chain_id: ChainId, retention_blocks: u64) -> Self {
        Self {
            chain_id,
            last_confirmed_block: None,
            retention_blocks,
            recent: VecDeque::new(),
            block_hashes: BTreeMap::new(),
            version: None,
        }
    }

    #[must_use]
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    #[must_use]
    pub const fn last_confirmed_block(&self) -> Option<u64> {
        self.last_confirmed_block
    }

    #[must_use]
    pub const fn retention_blocks(&self) -> u64 {
        self.retention_blocks
    }

    #[must_use]
    pub const fn version(&self) -> Option<u64> {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = Some(version);
    }

    /// Change the retention horizon, e.g. after a configuration change.
    pub fn set_retention_blocks(&mut self, retention_blocks: u64) {
        self.retention_blocks = retention_blocks;
    }

    /// First block that still needs to be processed.
    #[must_use]
    pub fn next_block(&self, start_block: u64) -> u64 {
        self.last_confirmed_block
            .map_or(start_block, |block| block.saturating_add(1).max(start_block))
    }

    /// Whether the identity is inside the dedupe window.
    #[must_use]
    pub fn contains(&self, id: &EventId) -> bool {
        self.recent.iter().any(|(seen, _)| seen == id)
    }

    /// Number of identities in the dedupe window.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.recent.len()
    }

    /// Remember an applied identity.
    pub fn record_applied(&mut self, id: EventId, block_number: u64) {
        if !self.contains(&id) {
            self.recent.push_back((id, block_number));
        }
    }

    /// Remember the canonical hash of a committed block.
    pub fn record_block(&mut self, block_number: u64, hash: BlockHash) {
        self.block_hashes.insert(block_number, hash);
    }

    /// Latest committed block with a recorded hash.
    #[must_use]
    pub fn latest_block_hash(&self) -> Option<(u64, &BlockHash)> {
        self.block_hashes.iter().next_back().map(|(n, h)| (*n, h))
    }

    /// Move `last_confirmed_block` forward. Returns `false` and leaves the
    /// cursor untouched when `block` is not ahead of the current position.
    pub fn advance_to(&mut self, block: u64) -> bool {
        match self.last_confirmed_block {
            Some(current) if block <= current => false,
            _ => {
                self.last_confirmed_block = Some(block);
                self.prune();
                true
            }
        }
    }

    /// Drop dedupe entries and block hashes older than the retention horizon.
    pub fn prune(&mut self) {
        let Some(newest) = self.last_confirmed_block else {
            return;
        };
        let horizon = newest.saturating_sub(self.retention_blocks);
        while self
            .recent
            .front()
            .is_some_and(|(_, block)| *block < horizon)
        {
            self.recent.pop_front();
        }
        self.block_hashes = self.block_hashes.split_off(&horizon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::id::TxHash;

    fn id(tx: &str, log_index: u64) -> EventId {
        EventId {
            chain_id: ChainId::new(1),
            tx_hash: TxHash::new(tx),
            log_index,
        }
    }

    #[test]
    fn next_block_starts_at_start_block() {
        let cursor = Cursor::new(ChainId::new(1), 100);
        assert_eq!(cursor.next_block(100), 100);
    }

    #[test]
    fn next_block_follows_committed_block() {
        let mut cursor = Cursor::new(ChainId::new(1), 100);
        cursor.advance_to(109);
        assert_eq!(cursor.next_block(100), 110);
        assert_eq!(cursor.next_block(500), 500);
    }

    #[test]
    fn advance_is_monotonic() {
        let mut cursor = Cursor::new(ChainId::new(1), 100);
        assert!(cursor.advance_to(10));
        assert!(!cursor.advance_to(5));
        assert!(!cursor.advance_to(10));
        assert!(!cursor.advance_to(0));
        assert_eq!(cursor.last_confirmed_block(), Some(10));
    }

    #[test]
    fn dedupe_window_prunes_by_block() {
        let mut cursor = Cursor::new(ChainId::new(1), 10);
        cursor.record_applied(id("0xa", 0), 5);
        cursor.record_applied(id("0xb", 0), 20);
        cursor.advance_to(20);
        assert!(!cursor.contains(&id("0xa", 0)));
        assert!(cursor.contains(&id("0xb", 0)));
        assert_eq!(cursor.window_len(), 1);
    }

    #[test]
    fn recording_same_identity_twice_keeps_one_entry() {
        let mut cursor = Cursor::new(ChainId::new(1), 10);
        cursor.record_applied(id("0xa", 0), 5);
        cursor.record_applied(id("0xa", 0), 5);
        assert_eq!(cursor.window_len(), 1);
    }

    #[test]
    fn block_hashes_are_pruned_with_window() {
        let mut cursor = Cursor::new(ChainId::new(1), 10);
        cursor.record_block(3, BlockHash::new("0x03"));
        cursor.record_block(30, BlockHash::new("0x30"));
        cursor.advance_to(30);
        assert_eq!(cursor.latest_block_hash(), Some((30, &BlockHash::new("0x30"))));
        assert_eq!(cursor.block_hashes.len(), 1);
    }
}
