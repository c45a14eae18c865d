//! Persistence tests against a file-backed SQLite database.

mod support;

use std::sync::Arc;

use marketsync::adapter::outbound::sqlite::database::connection::{create_pool, run_migrations};
use marketsync::adapter::outbound::sqlite::SqliteRowStore;
use marketsync::application::queue::ContractCallQueue;
use marketsync::application::state::{MarketStateStore, StateSettings};
use marketsync::domain::market::derive_transition;
use marketsync::domain::{Cursor, DomainError, JobState, MarketId};
use marketsync::error::Error;
use marketsync::port::outbound::store::{CasOutcome, RowKey, RowKind, RowStore};
use marketsync::testkit::chain::ScriptedChain;
use marketsync::testkit::domain::{buy, created, key, market_id, trade, CHAIN};
use marketsync::testkit::fixture::{queue_settings, registry};
use marketsync::testkit::notifier::RecordingNotifier;
use marketsync::testkit::signer::StaticSigner;
use tempfile::TempDir;

use support::RunningQueue;

fn open(dir: &TempDir) -> Arc<SqliteRowStore> {
    let path = dir.path().join("marketsync.db");
    let pool = create_pool(path.to_str().unwrap()).unwrap();
    run_migrations(&pool).unwrap();
    Arc::new(SqliteRowStore::new(pool))
}

fn state_over(rows: Arc<SqliteRowStore>) -> MarketStateStore {
    MarketStateStore::new(rows, registry(&RecordingNotifier::new()), StateSettings::default())
}

fn queue_over(rows: Arc<SqliteRowStore>, chain: &ScriptedChain) -> ContractCallQueue {
    ContractCallQueue::new(
        queue_settings(),
        Arc::new(chain.clone()),
        Arc::new(StaticSigner::default()),
        rows,
        registry(&RecordingNotifier::new()),
    )
}

#[tokio::test]
async fn compare_and_swap_follows_versions() {
    let dir = TempDir::new().unwrap();
    let rows = open(&dir);
    let key = RowKey::market(&MarketId::new("m1"));

    assert_eq!(
        rows.compare_and_swap(&key, None, "a".into()).await.unwrap(),
        CasOutcome::Swapped { version: 1 }
    );
    assert_eq!(
        rows.compare_and_swap(&key, None, "b".into()).await.unwrap(),
        CasOutcome::Conflict { current: Some(1) }
    );
    assert_eq!(
        rows.compare_and_swap(&key, Some(1), "b".into()).await.unwrap(),
        CasOutcome::Swapped { version: 2 }
    );
    assert_eq!(
        rows.compare_and_swap(&key, Some(1), "c".into()).await.unwrap(),
        CasOutcome::Conflict { current: Some(2) }
    );

    let row = rows.get(&key).await.unwrap().unwrap();
    assert_eq!((row.version, row.body.as_str()), (2, "b"));

    let missing = RowKey::market(&MarketId::new("absent"));
    assert_eq!(
        rows.compare_and_swap(&missing, Some(3), "x".into()).await.unwrap(),
        CasOutcome::Conflict { current: None }
    );
    assert!(rows.get(&missing).await.unwrap().is_none());
}

#[tokio::test]
async fn list_is_scoped_by_kind_and_ordered() {
    let dir = TempDir::new().unwrap();
    let rows = open(&dir);
    for id in ["b", "a", "c"] {
        rows.compare_and_swap(&RowKey::market(&MarketId::new(id)), None, id.into())
            .await
            .unwrap();
    }
    rows.compare_and_swap(&RowKey::cursor(CHAIN), None, "{}".into())
        .await
        .unwrap();

    let ids: Vec<String> = rows
        .list(RowKind::Market)
        .await
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(rows.list(RowKind::Cursor).await.unwrap().len(), 1);
    assert!(rows.list(RowKind::Job).await.unwrap().is_empty());
}

#[tokio::test]
async fn market_state_survives_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    {
        let state = state_over(open(&dir));
        state
            .apply_confirmed_event(&created(1, "M1", 2, 10.0), derive_transition)
            .await
            .unwrap();
        state
            .apply_confirmed_event(&trade(2, 0, "M1", 1, 4.0), derive_transition)
            .await
            .unwrap();
    }

    let state = state_over(open(&dir));
    let market = state.get(&market_id("M1")).await.unwrap();
    assert_eq!(market.shares(), &[0.0, 4.0]);
    assert_eq!(market.version(), Some(2));

    // The applied identity is persisted with the market.
    let replay = state
        .apply_confirmed_event(&trade(2, 0, "M1", 1, 4.0), derive_transition)
        .await
        .unwrap();
    assert_eq!(replay, marketsync::application::state::ApplyOutcome::Duplicate);
}

#[tokio::test]
async fn cursor_never_moves_backwards() {
    let dir = TempDir::new().unwrap();
    let state = state_over(open(&dir));

    let mut ahead = state.load_cursor(CHAIN).await.unwrap();
    ahead.advance_to(50);
    state.commit_cursor(&ahead).await.unwrap();

    let mut behind = Cursor::new(CHAIN, 100);
    behind.advance_to(20);
    let err = state.commit_cursor(&behind).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(DomainError::CursorRegression { stored: 50, .. })
    ));
    assert_eq!(
        state.load_cursor(CHAIN).await.unwrap().last_confirmed_block(),
        Some(50)
    );
}

#[tokio::test]
async fn queued_jobs_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(1);

    let id = {
        let queue = queue_over(open(&dir), &chain);
        queue
            .enqueue(market_id("M1"), buy(0, 1.0), key("persisted"))
            .await
            .unwrap()
    };

    let queue = queue_over(open(&dir), &chain);
    assert_eq!(queue.recover().await.unwrap(), 1);
    assert_eq!(queue.job(&id).unwrap().state(), JobState::Pending);

    let running = RunningQueue::start(queue);
    let job = running.wait(&id).await;
    assert_eq!(job.state(), JobState::Succeeded);
    running.drain().await;
    running.stop().await;

    // Terminal jobs are loaded but not requeued.
    let queue = queue_over(open(&dir), &chain);
    assert_eq!(queue.recover().await.unwrap(), 0);
    assert_eq!(queue.job(&id).unwrap().state(), JobState::Succeeded);
}
