//! Integration tests for the chain indexer against a scripted ledger.

mod support;

use std::time::Duration;

use marketsync::domain::{EventPayload, MarketId};
use marketsync::error::{ChainError, Error};
use marketsync::port::inbound::market::IndexerMode;
use marketsync::port::outbound::ledger::StreamHealth;
use marketsync::port::outbound::notifier::AlertKind;
use marketsync::testkit::chain::ScriptedChain;
use marketsync::testkit::domain::CHAIN;
use marketsync::testkit::fixture::{indexer, indexer_settings, state_store};
use marketsync::testkit::notifier::RecordingNotifier;
use tokio::sync::watch;

use support::TEST_TIMEOUT;

fn created() -> EventPayload {
    EventPayload::MarketCreated {
        outcomes: 2,
        liquidity: 100.0,
    }
}

fn trade(outcome: usize, shares: f64) -> EventPayload {
    EventPayload::TradeExecuted { outcome, shares }
}

fn healthy_stream(earliest: u64, age: Duration) -> StreamHealth {
    StreamHealth {
        connected: true,
        head: None,
        earliest_block: Some(earliest),
        last_block_age: Some(age),
    }
}

/// Poll `f` until it holds or the test timeout passes.
async fn eventually(mut f: impl FnMut() -> bool) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn backfill_walks_the_chain_in_chunks() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(125);
    chain.add_event(105, "M1", created());
    chain.add_event(112, "M1", trade(0, 4.0));
    chain.add_event(124, "M1", trade(1, 1.5));

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(100, 10, 0), &state, &chain, None, &recorder);

    let first = indexer.tick().await.unwrap();
    assert_eq!(first.mode, IndexerMode::Backfilling);
    assert_eq!(first.committed, Some(109));
    assert!(!first.caught_up);
    assert_eq!(indexer.status().last_confirmed_block, Some(109));

    let second = indexer.tick().await.unwrap();
    assert_eq!(second.committed, Some(119));

    let third = indexer.tick().await.unwrap();
    assert_eq!(third.window, Some((120, 125)));
    assert_eq!(third.committed, Some(125));
    assert!(third.caught_up);
    assert_eq!(third.mode, IndexerMode::Live);

    assert_eq!(chain.fetches(), vec![(100, 109), (110, 119), (120, 125)]);

    let market = state.get(&MarketId::new("M1")).await.unwrap();
    assert_eq!(market.shares(), &[4.0, 1.5]);
    assert_eq!(indexer.status().applied_events, 3);
    assert_eq!(recorder.market_updates().len(), 3);

    // Nothing new: no fetch, no commit.
    let idle = indexer.tick().await.unwrap();
    assert_eq!(idle.window, None);
    assert_eq!(idle.committed, None);
    assert_eq!(chain.fetches().len(), 3);
}

#[tokio::test]
async fn events_wait_for_confirmations() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(5);
    chain.add_event(2, "M1", created());
    chain.add_event(5, "M1", trade(0, 2.0));

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(1, 100, 2), &state, &chain, None, &recorder);

    let report = indexer.tick().await.unwrap();
    assert_eq!(report.committed, Some(3));
    assert_eq!(indexer.status().pending_blocks, 1);
    let market = state.get(&MarketId::new("M1")).await.unwrap();
    assert_eq!(market.shares(), &[0.0, 0.0]);

    chain.set_head(7);
    let report = indexer.tick().await.unwrap();
    assert_eq!(report.committed, Some(5));
    let market = state.get(&MarketId::new("M1")).await.unwrap();
    assert_eq!(market.shares(), &[2.0, 0.0]);
}

#[tokio::test]
async fn shallow_reorg_discards_unconfirmed_blocks() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(5);
    chain.add_event(2, "M1", created());
    chain.add_event(4, "M1", trade(0, 10.0));
    chain.add_event(5, "M1", trade(0, 10.0));

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(1, 100, 2), &state, &chain, None, &recorder);

    assert_eq!(indexer.tick().await.unwrap().committed, Some(3));
    assert_eq!(indexer.status().pending_blocks, 2);

    // Blocks 4 and 5 are replaced by a fork that trades the other outcome.
    assert_eq!(chain.reorg_from(4), 2);
    chain.add_event(4, "M1", trade(1, 3.0));
    chain.set_head(6);

    let report = indexer.tick().await.unwrap();
    assert_eq!(report.committed, Some(4));
    let status = indexer.status();
    assert!(status.discarded_blocks >= 1);
    assert!(!status.compromised);

    let market = state.get(&MarketId::new("M1")).await.unwrap();
    assert_eq!(market.shares(), &[0.0, 3.0]);
    assert!(recorder.alerts().is_empty());
}

#[tokio::test]
async fn reorg_below_committed_block_halts_ingestion() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(5);
    chain.add_event(2, "M1", created());

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(1, 100, 0), &state, &chain, None, &recorder);
    assert_eq!(indexer.tick().await.unwrap().committed, Some(5));

    chain.reorg_from(3);
    chain.set_head(8);

    let err = indexer.tick().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Chain(ChainError::ReorgBeyondConfirmations { block: 5, .. })
    ));
    assert!(indexer.status().compromised);
    assert!(!indexer.status().is_healthy());

    let alerts = recorder.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::ReorgBeyondConfirmations);

    // Halted for good: further ticks fail without touching the source.
    let fetches = chain.fetches().len();
    assert!(indexer.tick().await.is_err());
    assert_eq!(chain.fetches().len(), fetches);

    let (_tx, rx) = watch::channel(false);
    let result = tokio::time::timeout(TEST_TIMEOUT, indexer.run(rx)).await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn failed_tick_leaves_the_cursor_and_is_retried() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(4);
    chain.add_event(2, "M1", created());
    chain.add_event(3, "M1", trade(1, 2.0));

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(1, 100, 0), &state, &chain, None, &recorder);

    chain.fail_next(ChainError::Connectivity("connection reset".to_string()).into());
    assert!(indexer.tick().await.is_err());
    assert_eq!(indexer.status().last_confirmed_block, None);

    assert_eq!(indexer.tick().await.unwrap().committed, Some(4));
    let market = state.get(&MarketId::new("M1")).await.unwrap();
    assert_eq!(market.shares(), &[0.0, 2.0]);

    // A second indexer over the same store resumes after the cursor.
    let mut resumed = indexer_for_same_store(&state, &chain, &recorder);
    let report = resumed.tick().await.unwrap();
    assert_eq!(report.window, None);
    assert_eq!(resumed.status().applied_events, 0);
    let market = state.get(&MarketId::new("M1")).await.unwrap();
    assert_eq!(market.shares(), &[0.0, 2.0]);
    assert_eq!(recorder.market_updates().len(), 2);
}

fn indexer_for_same_store(
    state: &std::sync::Arc<marketsync::application::state::MarketStateStore>,
    chain: &ScriptedChain,
    recorder: &RecordingNotifier,
) -> marketsync::application::indexer::ChainIndexer {
    indexer(indexer_settings(1, 100, 0), state, chain, None, recorder)
}

#[tokio::test]
async fn rejected_events_are_counted_and_skipped() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(3);
    chain.add_event(1, "M1", trade(0, 1.0));
    chain.add_event(2, "M2", created());
    chain.add_event(3, "M2", trade(5, 1.0));

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(1, 100, 0), &state, &chain, None, &recorder);

    assert_eq!(indexer.tick().await.unwrap().committed, Some(3));
    let status = indexer.status();
    assert_eq!(status.applied_events, 1);
    assert_eq!(status.rejected_events, 2);
    assert!(state.find(&MarketId::new("M1")).await.unwrap().is_none());
}

#[tokio::test]
async fn stale_stream_degrades_and_fresh_stream_recovers() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(5);
    chain.add_event(2, "M1", created());
    let stream = chain.as_stream(healthy_stream(1, Duration::from_secs(1)));

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(1, 100, 0), &state, &chain, Some(&stream), &recorder);

    let report = indexer.tick().await.unwrap();
    assert_eq!(report.mode, IndexerMode::Live);
    assert!(indexer.status().is_healthy());

    chain.set_stream_health(Some(healthy_stream(1, Duration::from_secs(60))));
    let report = indexer.tick().await.unwrap();
    assert_eq!(report.mode, IndexerMode::Degraded);

    // Degraded still makes progress by polling.
    chain.add_event(6, "M1", trade(0, 1.0));
    chain.set_head(6);
    assert_eq!(indexer.tick().await.unwrap().committed, Some(6));

    chain.set_stream_health(Some(healthy_stream(1, Duration::from_secs(1))));
    let report = indexer.tick().await.unwrap();
    assert_eq!(report.mode, IndexerMode::Live);

    let kinds: Vec<AlertKind> = recorder.alerts().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![AlertKind::Degraded, AlertKind::Recovered]);
    let market = state.get(&MarketId::new("M1")).await.unwrap();
    assert_eq!(market.shares(), &[1.0, 0.0]);
}

#[tokio::test]
async fn repeated_failures_degrade_until_the_source_recovers() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(3);
    chain.add_event(2, "M1", created());

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(1, 100, 0), &state, &chain, None, &recorder);
    let status = indexer.status_handle();
    assert_eq!(indexer.tick().await.unwrap().mode, IndexerMode::Live);

    for _ in 0..3 {
        chain.fail_next(ChainError::Connectivity("refused".to_string()).into());
    }

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(indexer.run(rx));

    eventually(|| recorder.alerts().iter().any(|a| a.kind == AlertKind::Recovered)).await;
    let kinds: Vec<AlertKind> = recorder.alerts().iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![AlertKind::Degraded, AlertKind::Recovered]);
    assert_eq!(status.snapshot().last_confirmed_block, Some(3));
    assert_eq!(status.snapshot().consecutive_failures, 0);

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn nothing_is_confirmed_while_the_chain_is_shorter_than_the_depth() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(5);
    chain.add_event(0, "M1", created());

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(0, 100, 12), &state, &chain, None, &recorder);

    let report = indexer.tick().await.unwrap();
    assert_eq!(report.committed, None);
    assert!(report.caught_up);
    assert!(state.find(&MarketId::new("M1")).await.unwrap().is_none());
    assert_eq!(indexer.status().last_confirmed_block, None);

    // Twelve blocks on top of block 0.
    chain.set_head(12);
    assert_eq!(indexer.tick().await.unwrap().committed, Some(0));
    assert!(state.find(&MarketId::new("M1")).await.unwrap().is_some());
}

#[tokio::test]
async fn end_block_hash_is_read_before_events_are_applied() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(4);
    chain.add_event(2, "M1", created());
    chain.add_event(3, "M1", trade(0, 1.0));

    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut indexer = indexer(indexer_settings(1, 100, 0), &state, &chain, None, &recorder);

    chain.fail_block_hash(4, ChainError::Connectivity("header unavailable".to_string()).into());
    assert!(indexer.tick().await.is_err());
    assert!(state.find(&MarketId::new("M1")).await.unwrap().is_none());
    assert!(recorder.market_updates().is_empty());

    assert_eq!(indexer.tick().await.unwrap().committed, Some(4));
    let cursor = state.load_cursor(CHAIN).await.unwrap();
    let (block, hash) = cursor.latest_block_hash().unwrap();
    assert_eq!(block, 4);
    assert_eq!(*hash, chain.hash_of(4));
}

#[tokio::test]
async fn replayed_chunk_after_a_lost_cursor_write_changes_nothing() {
    use std::sync::Arc;

    use marketsync::application::state::{MarketStateStore, StateSettings};
    use marketsync::port::outbound::store::RowKind;
    use marketsync::testkit::fixture::registry;
    use marketsync::testkit::store::FlakyRowStore;

    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(4);
    chain.add_event(2, "M1", created());
    let trade_event = chain.add_event(3, "M1", trade(1, 2.0));
    // The source repeats the trade log within the same window.
    chain.redeliver(&trade_event);

    let rows = Arc::new(FlakyRowStore::new());
    let recorder = RecordingNotifier::new();
    let state = Arc::new(MarketStateStore::new(
        rows.clone(),
        registry(&recorder),
        StateSettings {
            max_cas_retries: 5,
            retention_blocks: 100,
        },
    ));
    let mut indexer = indexer(indexer_settings(1, 100, 0), &state, &chain, None, &recorder);

    // Events land, then the cursor write is lost.
    rows.fail_next_write(RowKind::Cursor);
    assert!(indexer.tick().await.is_err());
    assert_eq!(
        state.get(&MarketId::new("M1")).await.unwrap().shares(),
        &[0.0, 2.0]
    );
    assert_eq!(state.load_cursor(CHAIN).await.unwrap().last_confirmed_block(), None);

    let report = indexer.tick().await.unwrap();
    assert_eq!(report.committed, Some(4));

    let status = indexer.status();
    assert_eq!(status.applied_events, 0);
    assert_eq!(status.duplicate_events, 3);
    assert_eq!(
        state.get(&MarketId::new("M1")).await.unwrap().shares(),
        &[0.0, 2.0]
    );
    assert_eq!(recorder.market_updates().len(), 2);
}

async fn head_polls_during(
    chain: &ScriptedChain,
    stream: Option<&ScriptedChain>,
    fallback: Duration,
    window: Duration,
) -> (u32, Vec<AlertKind>) {
    let (state, _rows, _) = state_store(100);
    let recorder = RecordingNotifier::new();
    let mut settings = indexer_settings(1, 100, 0);
    settings.fallback_poll_interval = fallback;
    settings.tick_interval = Duration::from_millis(1);
    let indexer = indexer(settings, &state, chain, stream, &recorder);

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(indexer.run(rx));
    tokio::time::sleep(window).await;
    let polls = chain.head_requests();
    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let kinds = recorder.alerts().iter().map(|a| a.kind).collect();
    (polls, kinds)
}

#[tokio::test]
async fn polling_without_a_stream_waits_the_fallback_interval() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(3);
    chain.add_event(2, "M1", created());

    let (polls, _) = head_polls_during(
        &chain,
        None,
        Duration::from_millis(150),
        Duration::from_millis(400),
    )
    .await;

    // Ticks at roughly 0, 150 and 300 ms; a 1 ms cadence would poll hundreds of times.
    assert!((2..=4).contains(&polls), "{polls} head polls");
}

#[tokio::test]
async fn degraded_polling_waits_the_fallback_interval() {
    let chain = ScriptedChain::new(CHAIN);
    chain.set_head(3);
    chain.add_event(2, "M1", created());
    let stream = chain.as_stream(healthy_stream(1, Duration::from_secs(600)));

    let (polls, alerts) = head_polls_during(
        &chain,
        Some(&stream),
        Duration::from_millis(150),
        Duration::from_millis(400),
    )
    .await;

    assert_eq!(alerts, vec![AlertKind::Degraded]);
    assert!((2..=5).contains(&polls), "{polls} head polls");
}
