//! In-memory row store.
//!
//! Used for `:memory:` deployments and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::port::outbound::store::{CasOutcome, RowKey, RowKind, RowStore, VersionedRow};

/// Versioned rows kept in a single lock.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    rows: RwLock<BTreeMap<(&'static str, String), VersionedRow>>,
}

impl MemoryRowStore {
    /// Create a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows of `kind`.
    #[must_use]
    pub fn count(&self, kind: RowKind) -> usize {
        self.rows
            .read()
            .keys()
            .filter(|(k, _)| *k == kind.as_str())
            .count()
    }
}

fn slot(key: &RowKey) -> (&'static str, String) {
    (key.kind.as_str(), key.id.clone())
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn get(&self, key: &RowKey) -> Result<Option<VersionedRow>> {
        Ok(self.rows.read().get(&slot(key)).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &RowKey,
        expected: Option<u64>,
        body: String,
    ) -> Result<CasOutcome> {
        let mut rows = self.rows.write();
        let slot = slot(key);
        let current = rows.get(&slot).map(|row| row.version);
        if current != expected {
            return Ok(CasOutcome::Conflict { current });
        }
        let version = current.map_or(1, |v| v + 1);
        rows.insert(slot, VersionedRow { version, body });
        Ok(CasOutcome::Swapped { version })
    }

    async fn list(&self, kind: RowKind) -> Result<Vec<(String, VersionedRow)>> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|((k, _), _)| *k == kind.as_str())
            .map(|((_, id), row)| (id.clone(), row.clone()))
            .collect())
    }
}
