//! Wired application services over in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use super::chain::ScriptedChain;
use super::domain::CHAIN;
use super::notifier::RecordingNotifier;
use super::signer::StaticSigner;
use crate::adapter::outbound::memory::MemoryRowStore;
use crate::application::indexer::{ChainIndexer, IndexerSettings};
use crate::application::queue::{ContractCallQueue, QueueSettings};
use crate::application::state::{MarketStateStore, StateSettings};
use crate::port::outbound::ledger::EventSource;
use crate::port::outbound::notifier::NotifierRegistry;

pub fn registry(recorder: &RecordingNotifier) -> Arc<NotifierRegistry> {
    let mut registry = NotifierRegistry::new();
    registry.register(Box::new(recorder.clone()));
    Arc::new(registry)
}

/// State store over a fresh in-memory row store.
pub fn state_store(retention_blocks: u64) -> (Arc<MarketStateStore>, Arc<MemoryRowStore>, RecordingNotifier) {
    let rows = Arc::new(MemoryRowStore::new());
    let recorder = RecordingNotifier::new();
    let state = Arc::new(MarketStateStore::new(
        rows.clone(),
        registry(&recorder),
        StateSettings {
            max_cas_retries: 5,
            retention_blocks,
        },
    ));
    (state, rows, recorder)
}

/// Indexer settings with short timers.
pub fn indexer_settings(start_block: u64, chunk_size: u64, confirmations: u64) -> IndexerSettings {
    IndexerSettings {
        start_block,
        chunk_size,
        confirmations,
        fallback_poll_interval: Duration::from_secs(15),
        rpc_timeout: Duration::from_secs(1),
        max_consecutive_failures: 3,
        tick_interval: Duration::from_millis(5),
        retry_initial_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        ..IndexerSettings::new(CHAIN)
    }
}

pub fn indexer(
    settings: IndexerSettings,
    state: &Arc<MarketStateStore>,
    chain: &ScriptedChain,
    stream: Option<&ScriptedChain>,
    recorder: &RecordingNotifier,
) -> ChainIndexer {
    ChainIndexer::new(
        settings,
        Arc::clone(state),
        Arc::new(chain.clone()),
        stream.map(|s| Arc::new(s.clone()) as Arc<dyn EventSource>),
        registry(recorder),
    )
}

/// Queue settings with millisecond delays.
pub fn queue_settings() -> QueueSettings {
    QueueSettings {
        base_delay: Duration::from_millis(5),
        workers: 4,
        receipt_timeout: Duration::from_millis(50),
        receipt_poll_interval: Duration::from_millis(5),
        rpc_timeout: Duration::from_secs(1),
        ..QueueSettings::new(CHAIN)
    }
}

/// Queue over `chain` with a static signer and an in-memory job store.
pub fn queue(
    settings: QueueSettings,
    chain: &ScriptedChain,
    rows: Arc<MemoryRowStore>,
) -> (ContractCallQueue, Arc<StaticSigner>, RecordingNotifier) {
    let signer = Arc::new(StaticSigner::default());
    let recorder = RecordingNotifier::new();
    let queue = ContractCallQueue::new(
        settings,
        Arc::new(chain.clone()),
        signer.clone(),
        rows,
        registry(&recorder),
    );
    (queue, signer, recorder)
}
