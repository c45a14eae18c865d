//! Row store with scripted write failures.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapter::outbound::memory::MemoryRowStore;
use crate::error::{Error, Result};
use crate::port::outbound::store::{CasOutcome, RowKey, RowKind, RowStore, VersionedRow};

/// [`MemoryRowStore`] that fails chosen compare-and-swap writes.
#[derive(Debug, Default)]
pub struct FlakyRowStore {
    rows: MemoryRowStore,
    failures: Mutex<VecDeque<RowKind>>,
}

impl FlakyRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next write to a row of `kind`.
    pub fn fail_next_write(&self, kind: RowKind) {
        self.failures.lock().push_back(kind);
    }
}

#[async_trait]
impl RowStore for FlakyRowStore {
    async fn get(&self, key: &RowKey) -> Result<Option<VersionedRow>> {
        self.rows.get(key).await
    }

    async fn compare_and_swap(&self, key: &RowKey, expected: Option<u64>, body: String) -> Result<CasOutcome> {
        {
            let mut failures = self.failures.lock();
            if let Some(pos) = failures.iter().position(|kind| *kind == key.kind) {
                failures.remove(pos);
                return Err(Error::Database(format!("write to {key} failed")));
            }
        }
        self.rows.compare_and_swap(key, expected, body).await
    }

    async fn list(&self, kind: RowKind) -> Result<Vec<(String, VersionedRow)>> {
        self.rows.list(kind).await
    }
}
