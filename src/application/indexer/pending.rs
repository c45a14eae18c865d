//! Events seen but not yet confirmed, grouped by block.

use std::collections::BTreeMap;

use crate::domain::event::ChainEvent;
use crate::domain::id::BlockHash;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingBlock {
    pub hash: BlockHash,
    pub events: Vec<ChainEvent>,
}

/// Unconfirmed blocks keyed by number.
#[derive(Debug, Default)]
pub(crate) struct PendingBuffer {
    blocks: BTreeMap<u64, PendingBlock>,
}

impl PendingBuffer {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Replace everything buffered in `[from, to]` with a fresh fetch.
    ///
    /// Returns how many previously buffered blocks changed hash or vanished.
    pub fn replace_range(&mut self, from: u64, to: u64, events: Vec<ChainEvent>) -> u64 {
        let mut fresh: BTreeMap<u64, PendingBlock> = BTreeMap::new();
        for event in events {
            if event.block_number < from || event.block_number > to {
                continue;
            }
            fresh
                .entry(event.block_number)
                .or_insert_with(|| PendingBlock {
                    hash: event.block_hash.clone(),
                    events: Vec::new(),
                })
                .events
                .push(event);
        }
        for block in fresh.values_mut() {
            block.events.sort_by_key(|event| event.log_index);
        }

        let stale: Vec<u64> = self.blocks.range(from..=to).map(|(n, _)| *n).collect();
        let mut discarded = 0;
        for number in stale {
            if let Some(old) = self.blocks.remove(&number) {
                if fresh.get(&number).map_or(true, |new| new.hash != old.hash) {
                    discarded += 1;
                }
            }
        }
        self.blocks.extend(fresh);
        discarded
    }

    /// Drop `block` and everything above it. Returns the number dropped.
    pub fn discard_from(&mut self, block: u64) -> u64 {
        let dropped = self.blocks.split_off(&block);
        dropped.len() as u64
    }

    /// Buffered blocks in `[from, to]`, ascending.
    pub fn range(&self, from: u64, to: u64) -> impl Iterator<Item = (&u64, &PendingBlock)> {
        self.blocks.range(from..=to)
    }

    /// Forget blocks up to and including `block` once committed.
    pub fn release_through(&mut self, block: u64) {
        self.blocks = self.blocks.split_off(&block.saturating_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventPayload;
    use crate::domain::id::{ChainId, MarketId, TxHash};

    fn event(block: u64, hash: &str, index: u64) -> ChainEvent {
        ChainEvent {
            chain_id: ChainId::new(1),
            block_number: block,
            block_hash: BlockHash::new(hash),
            log_index: index,
            tx_hash: TxHash::new(format!("0x{block}{index}")),
            market_id: MarketId::new("m"),
            payload: EventPayload::MarketCancelled,
        }
    }

    #[test]
    fn refetch_discards_changed_and_missing_blocks() {
        let mut buffer = PendingBuffer::default();
        let first = vec![event(5, "0xa", 1), event(5, "0xa", 0), event(6, "0xb", 0), event(7, "0xc", 0)];
        assert_eq!(buffer.replace_range(5, 7, first), 0);
        assert_eq!(buffer.len(), 3);
        let (_, block5) = buffer.range(5, 5).next().unwrap();
        assert_eq!(block5.events[0].log_index, 0);

        // 5 unchanged, 6 re-mined with another hash, 7 gone.
        let second = vec![event(5, "0xa", 0), event(6, "0xbb", 0)];
        assert_eq!(buffer.replace_range(5, 7, second), 2);
        assert_eq!(buffer.len(), 2);
        let (_, block6) = buffer.range(6, 6).next().unwrap();
        assert_eq!(block6.hash, BlockHash::new("0xbb"));
    }

    #[test]
    fn events_outside_the_range_are_ignored() {
        let mut buffer = PendingBuffer::default();
        buffer.replace_range(5, 6, vec![event(4, "0x", 0), event(7, "0x", 0)]);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn discard_and_release() {
        let mut buffer = PendingBuffer::default();
        buffer.replace_range(1, 9, (1..=9).map(|n| event(n, "0x", 0)).collect());
        assert_eq!(buffer.discard_from(8), 2);
        buffer.release_through(3);
        assert_eq!(buffer.range(0, 100).map(|(n, _)| *n).collect::<Vec<_>>(), vec![4, 5, 6, 7]);
    }
}
