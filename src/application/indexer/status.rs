//! Shared, read-mostly view of an indexer.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::id::ChainId;
use crate::port::inbound::market::IndexerStatus;

/// Cloneable handle to one indexer's status.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<RwLock<IndexerStatus>>,
}

impl StatusHandle {
    #[must_use]
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            inner: Arc::new(RwLock::new(IndexerStatus::new(chain_id))),
        }
    }

    /// Copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> IndexerStatus {
        self.inner.read().clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut IndexerStatus)) {
        f(&mut self.inner.write());
    }
}
