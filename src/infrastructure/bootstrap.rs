//! Infrastructure bootstrap helpers for runtime wiring.
//!
//! Everything here turns [`Config`] into constructed services. Nothing is
//! spawned; see [`runtime`](super::runtime) for that.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::adapter::outbound::memory::MemoryRowStore;
use crate::adapter::outbound::notifier::ChannelNotifier;
use crate::adapter::outbound::sqlite::database::connection::{create_pool, run_migrations};
use crate::adapter::outbound::sqlite::SqliteRowStore;
use crate::application::indexer::IndexerSettings;
use crate::application::queue::QueueSettings;
use crate::application::state::StateSettings;
use crate::error::Result;
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::notifier::{LogNotifier, NotifierRegistry};
use crate::port::outbound::store::RowStore;

/// Row store selected by `store.database`.
///
/// # Errors
///
/// Returns an error if the SQLite pool cannot be opened or migrated.
pub fn build_store(config: &Config) -> Result<Arc<dyn RowStore>> {
    if config.store.is_memory() {
        info!("Using in-memory row store");
        return Ok(Arc::new(MemoryRowStore::new()));
    }
    let pool = create_pool(&config.store.database)?;
    run_migrations(&pool)?;
    info!(database = %config.store.database, "Using SQLite row store");
    Ok(Arc::new(SqliteRowStore::new(pool)))
}

/// Log notifier plus the in-process channels in `events`.
pub fn build_notifier_registry(events: &ChannelNotifier) -> NotifierRegistry {
    let mut registry = NotifierRegistry::new();
    registry.register(Box::new(LogNotifier));
    registry.register(Box::new(events.clone()));
    registry
}

#[must_use]
pub fn state_settings(config: &Config) -> StateSettings {
    StateSettings {
        max_cas_retries: config.store.max_cas_retries,
        retention_blocks: config.chain.retention_blocks(),
    }
}

#[must_use]
pub fn indexer_settings(config: &Config) -> IndexerSettings {
    let chain = &config.chain;
    IndexerSettings {
        chain_id: chain.chain_id(),
        start_block: chain.start_block,
        confirmations: chain.confirmations,
        chunk_size: chain.chunk_size,
        fallback_poll_interval: Duration::from_millis(chain.fallback_poll_interval_ms),
        rpc_timeout: Duration::from_millis(chain.rpc_timeout_ms),
        max_consecutive_failures: chain.max_consecutive_failures,
        tick_interval: Duration::from_millis(chain.tick_interval_ms),
        retry_initial_delay: Duration::from_millis(config.reconnection.initial_delay_ms),
        retry_max_delay: Duration::from_millis(config.reconnection.max_delay_ms),
    }
}

#[must_use]
pub fn queue_settings(config: &Config) -> QueueSettings {
    let queue = &config.queue;
    QueueSettings {
        chain_id: config.chain.chain_id(),
        max_attempts: queue.max_attempts,
        base_delay: Duration::from_millis(queue.base_delay_ms),
        max_depth: queue.max_depth,
        workers: queue.workers(),
        receipt_timeout: Duration::from_millis(queue.receipt_timeout_ms),
        receipt_poll_interval: Duration::from_millis(queue.receipt_poll_interval_ms),
        fee_bump_percent: queue.fee_bump_percent,
        rpc_timeout: Duration::from_millis(config.chain.rpc_timeout_ms),
        max_cas_retries: config.store.max_cas_retries,
    }
}
