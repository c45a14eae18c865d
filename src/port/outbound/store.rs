//! Persistence port: a versioned row store.
//!
//! Rows are opaque JSON bodies addressed by `(kind, id)`. Every row carries a
//! monotonically increasing version; writers state the version they read and
//! the store refuses the write if another writer got there first.

use std::fmt;

use async_trait::async_trait;

use crate::domain::id::{ChainId, JobId, MarketId};
use crate::error::Result;

/// Entity family a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    Market,
    Cursor,
    Job,
}

impl RowKind {
    /// Stable identifier used as the storage discriminator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Cursor => "cursor",
            Self::Job => "job",
        }
    }
}

/// Address of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub kind: RowKind,
    pub id: String,
}

impl RowKey {
    #[must_use]
    pub fn market(id: &MarketId) -> Self {
        Self {
            kind: RowKind::Market,
            id: id.as_str().to_string(),
        }
    }

    #[must_use]
    pub fn cursor(chain_id: ChainId) -> Self {
        Self {
            kind: RowKind::Cursor,
            id: chain_id.to_string(),
        }
    }

    #[must_use]
    pub fn job(id: &JobId) -> Self {
        Self {
            kind: RowKind::Job,
            id: id.as_str().to_string(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

/// A stored row and its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRow {
    pub version: u64,
    pub body: String,
}

/// Result of a compare-and-swap write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed; the row now has `version`.
    Swapped { version: u64 },
    /// Another writer changed the row; `current` is its version (`None` if absent).
    Conflict { current: Option<u64> },
}

/// Row-level persistence collaborator.
///
/// `expected = None` means "create only if absent". A successful write to an
/// existing row bumps its version by one; a created row starts at version 1.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Read a row.
    async fn get(&self, key: &RowKey) -> Result<Option<VersionedRow>>;

    /// Write `body` if the row is still at `expected`.
    async fn compare_and_swap(
        &self,
        key: &RowKey,
        expected: Option<u64>,
        body: String,
    ) -> Result<CasOutcome>;

    /// All rows of one kind, as `(id, row)` pairs ordered by id.
    async fn list(&self, kind: RowKind) -> Result<Vec<(String, VersionedRow)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_key_display() {
        assert_eq!(RowKey::market(&MarketId::new("m1")).to_string(), "market/m1");
        assert_eq!(RowKey::cursor(ChainId::new(137)).to_string(), "cursor/137");
        assert_eq!(RowKey::job(&JobId::from("j")).to_string(), "job/j");
    }
}
