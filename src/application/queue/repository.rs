//! Job persistence over the row store.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::domain::id::JobId;
use crate::domain::job::ContractCallJob;
use crate::error::{Error, Result};
use crate::port::outbound::store::{CasOutcome, RowKey, RowKind, RowStore};

/// Writes job rows. In-memory job state is authoritative; on a conflicting
/// write the latest snapshot is written again on top of the stored version.
pub(crate) struct JobRepository {
    store: Arc<dyn RowStore>,
    versions: DashMap<JobId, u64>,
    max_retries: u32,
}

impl JobRepository {
    pub fn new(store: Arc<dyn RowStore>, max_retries: u32) -> Self {
        Self {
            store,
            versions: DashMap::new(),
            max_retries: max_retries.max(1),
        }
    }

    /// Persist whatever `snapshot` returns at the time of each write attempt.
    pub async fn save_latest<F>(&self, id: &JobId, snapshot: F) -> Result<()>
    where
        F: Fn() -> Option<ContractCallJob>,
    {
        let key = RowKey::job(id);
        for _ in 0..self.max_retries {
            let Some(job) = snapshot() else {
                return Ok(());
            };
            let expected = self.versions.get(id).map(|v| *v);
            let body = serde_json::to_string(&job)?;
            match self.store.compare_and_swap(&key, expected, body).await? {
                CasOutcome::Swapped { version } => {
                    self.versions.insert(id.clone(), version);
                    return Ok(());
                }
                CasOutcome::Conflict { current } => {
                    debug!(%key, ?expected, ?current, "Job row moved, rewriting latest state");
                    match current {
                        Some(version) => self.versions.insert(id.clone(), version),
                        None => self.versions.remove(id).map(|(_, v)| v),
                    };
                }
            }
        }
        Err(Error::StateConflict {
            key: key.to_string(),
            attempts: self.max_retries,
        })
    }

    /// Every stored job, oldest first.
    pub async fn load_all(&self) -> Result<Vec<ContractCallJob>> {
        let mut jobs = Vec::new();
        for (id, row) in self.store.list(RowKind::Job).await? {
            let mut job: ContractCallJob = serde_json::from_str(&row.body)
                .map_err(|e| Error::Database(format!("corrupt job row {id}: {e}")))?;
            job.set_version(row.version);
            self.versions.insert(job.id().clone(), row.version);
            jobs.push(job);
        }
        jobs.sort_by_key(ContractCallJob::created_at);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::outbound::memory::MemoryRowStore;
    use crate::domain::id::{IdempotencyKey, MarketId};
    use crate::domain::job::ContractCall;

    fn job() -> ContractCallJob {
        ContractCallJob::new(
            MarketId::new("m1"),
            ContractCall::Settle { outcome: 0 },
            IdempotencyKey::new("k"),
        )
    }

    #[tokio::test]
    async fn saves_and_reloads() {
        let store = Arc::new(MemoryRowStore::new());
        let repo = JobRepository::new(store.clone(), 3);
        let mut job = job();
        repo.save_latest(job.id(), || Some(job.clone())).await.unwrap();
        job.begin_attempt().unwrap();
        repo.save_latest(job.id(), || Some(job.clone())).await.unwrap();

        let fresh = JobRepository::new(store, 3);
        let loaded = fresh.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].attempts(), 1);
        assert_eq!(loaded[0].version(), Some(2));
    }

    #[tokio::test]
    async fn conflicting_writer_is_overwritten_with_latest() {
        let store = Arc::new(MemoryRowStore::new());
        let job = job();
        let first = JobRepository::new(store.clone(), 3);
        let second = JobRepository::new(store.clone(), 3);
        first.save_latest(job.id(), || Some(job.clone())).await.unwrap();

        // `second` has never seen the row and expects it absent.
        second.save_latest(job.id(), || Some(job.clone())).await.unwrap();
        let row = store.get(&RowKey::job(job.id())).await.unwrap().unwrap();
        assert_eq!(row.version, 2);
    }
}
