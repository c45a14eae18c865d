//! SQLite row store implementation.
//!
//! One `rows` table keyed by `(kind, id)`. Compare-and-swap is a conditional
//! insert for new rows and a version-filtered update for existing ones; zero
//! affected rows means another writer won.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;

use crate::adapter::outbound::sqlite::database::connection::DbPool;
use crate::adapter::outbound::sqlite::database::model::RowRecord;
use crate::adapter::outbound::sqlite::database::schema::rows;
use crate::error::{Error, Result};
use crate::port::outbound::store::{CasOutcome, RowKey, RowKind, RowStore, VersionedRow};

/// SQLite-backed implementation of [`RowStore`].
pub struct SqliteRowStore {
    /// Database connection pool.
    pool: DbPool,
}

impl SqliteRowStore {
    /// Create a new SQLite row store with the given connection pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn connection(
        &self,
    ) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<SqliteConnection>>>
    {
        self.pool.get().map_err(|e| Error::Connection(e.to_string()))
    }

    fn current_version(conn: &mut SqliteConnection, key: &RowKey) -> Result<Option<u64>> {
        let version: Option<i64> = rows::table
            .find((key.kind.as_str(), key.id.as_str()))
            .select(rows::version)
            .first(conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        version.map(from_db_version).transpose()
    }
}

fn to_db_version(version: u64) -> Result<i64> {
    i64::try_from(version).map_err(|_| Error::Database(format!("version {version} overflows")))
}

fn from_db_version(version: i64) -> Result<u64> {
    u64::try_from(version).map_err(|_| Error::Database(format!("negative version {version}")))
}

#[async_trait]
impl RowStore for SqliteRowStore {
    async fn get(&self, key: &RowKey) -> Result<Option<VersionedRow>> {
        let mut conn = self.connection()?;
        let record: Option<RowRecord> = rows::table
            .find((key.kind.as_str(), key.id.as_str()))
            .select(RowRecord::as_select())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;

        record
            .map(|r| {
                Ok(VersionedRow {
                    version: from_db_version(r.version)?,
                    body: r.body,
                })
            })
            .transpose()
    }

    async fn compare_and_swap(
        &self,
        key: &RowKey,
        expected: Option<u64>,
        body: String,
    ) -> Result<CasOutcome> {
        let mut conn = self.connection()?;
        let now = Utc::now().to_rfc3339();

        let (affected, version) = match expected {
            None => {
                let record = RowRecord {
                    kind: key.kind.as_str().to_string(),
                    id: key.id.clone(),
                    version: 1,
                    body,
                    updated_at: now,
                };
                let affected = diesel::insert_into(rows::table)
                    .values(&record)
                    .on_conflict_do_nothing()
                    .execute(&mut conn)
                    .map_err(|e| Error::Database(e.to_string()))?;
                (affected, 1)
            }
            Some(expected) => {
                let next = expected + 1;
                let affected = diesel::update(
                    rows::table
                        .filter(rows::kind.eq(key.kind.as_str()))
                        .filter(rows::id.eq(key.id.as_str()))
                        .filter(rows::version.eq(to_db_version(expected)?)),
                )
                .set((
                    rows::version.eq(to_db_version(next)?),
                    rows::body.eq(body),
                    rows::updated_at.eq(now),
                ))
                .execute(&mut conn)
                .map_err(|e| Error::Database(e.to_string()))?;
                (affected, next)
            }
        };

        if affected == 0 {
            let current = Self::current_version(&mut conn, key)?;
            return Ok(CasOutcome::Conflict { current });
        }
        Ok(CasOutcome::Swapped { version })
    }

    async fn list(&self, kind: RowKind) -> Result<Vec<(String, VersionedRow)>> {
        let mut conn = self.connection()?;
        let records: Vec<RowRecord> = rows::table
            .filter(rows::kind.eq(kind.as_str()))
            .order(rows::id.asc())
            .select(RowRecord::as_select())
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;

        records
            .into_iter()
            .map(|r| {
                Ok((
                    r.id,
                    VersionedRow {
                        version: from_db_version(r.version)?,
                        body: r.body,
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::outbound::sqlite::database::connection::{create_pool, run_migrations};
    use crate::domain::id::{ChainId, MarketId};

    fn store() -> SqliteRowStore {
        let pool = create_pool(":memory:").unwrap();
        run_migrations(&pool).unwrap();
        SqliteRowStore::new(pool)
    }

    #[tokio::test]
    async fn insert_and_update_follow_versions() {
        let store = store();
        let key = RowKey::market(&MarketId::new("m1"));

        assert_eq!(
            store.compare_and_swap(&key, None, "{}".into()).await.unwrap(),
            CasOutcome::Swapped { version: 1 }
        );
        assert_eq!(
            store.compare_and_swap(&key, None, "{}".into()).await.unwrap(),
            CasOutcome::Conflict { current: Some(1) }
        );
        assert_eq!(
            store.compare_and_swap(&key, Some(1), "{\"a\":1}".into()).await.unwrap(),
            CasOutcome::Swapped { version: 2 }
        );
        assert_eq!(
            store.compare_and_swap(&key, Some(1), "{}".into()).await.unwrap(),
            CasOutcome::Conflict { current: Some(2) }
        );

        let row = store.get(&key).await.unwrap().unwrap();
        assert_eq!(row.version, 2);
        assert_eq!(row.body, "{\"a\":1}");
    }

    #[tokio::test]
    async fn update_of_missing_row_conflicts() {
        let store = store();
        let key = RowKey::cursor(ChainId::new(1));
        assert_eq!(
            store.compare_and_swap(&key, Some(3), "{}".into()).await.unwrap(),
            CasOutcome::Conflict { current: None }
        );
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_scoped_and_ordered() {
        let store = store();
        for id in ["b", "a"] {
            store
                .compare_and_swap(&RowKey::market(&MarketId::new(id)), None, id.into())
                .await
                .unwrap();
        }
        store
            .compare_and_swap(&RowKey::cursor(ChainId::new(1)), None, "c".into())
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list(RowKind::Market)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
