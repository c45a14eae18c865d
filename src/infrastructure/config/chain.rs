//! Ledger connection and indexing configuration.

use serde::Deserialize;

use crate::domain::id::ChainId;

/// Smallest accepted fallback polling interval.
pub const MIN_FALLBACK_POLL_INTERVAL_MS: u64 = 5_000;
/// Accepted range for `chunk_size`.
pub const CHUNK_SIZE_RANGE: std::ops::RangeInclusive<u64> = 100..=10_000;

/// One chain to index and submit to.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint (request/response).
    #[serde(default)]
    pub rpc_url: String,

    /// Websocket endpoint for `eth_subscribe`. Without it the indexer polls.
    #[serde(default)]
    pub stream_url: Option<String>,

    /// Bearer token sent to both endpoints.
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Market contract address.
    #[serde(default)]
    pub contract_address: String,

    /// Polling interval while degraded; also the stream staleness limit.
    #[serde(default = "default_fallback_poll_interval_ms")]
    pub fallback_poll_interval_ms: u64,

    /// First block to index when no cursor exists.
    #[serde(default)]
    pub start_block: u64,

    /// Blocks on top of an event before it is applied.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// Maximum blocks per fetch window.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Retention of the dedupe window and block hashes, in blocks.
    /// Defaults to `confirmations + chunk_size`.
    #[serde(default)]
    pub dedupe_window_blocks: Option<u64>,

    /// Timeout applied to every ledger call.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Consecutive failed ticks before the chain is marked degraded.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Pause between ticks once caught up.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Gas limit used for contract calls.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn default_chain_id() -> u64 {
    137
}

fn default_fallback_poll_interval_ms() -> u64 {
    15_000
}

fn default_confirmations() -> u64 {
    12
}

fn default_chunk_size() -> u64 {
    1_000
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_gas_limit() -> u64 {
    300_000
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            stream_url: None,
            api_token: None,
            chain_id: default_chain_id(),
            contract_address: String::new(),
            fallback_poll_interval_ms: default_fallback_poll_interval_ms(),
            start_block: 0,
            confirmations: default_confirmations(),
            chunk_size: default_chunk_size(),
            dedupe_window_blocks: None,
            rpc_timeout_ms: default_rpc_timeout_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            tick_interval_ms: default_tick_interval_ms(),
            gas_limit: default_gas_limit(),
        }
    }
}

impl ChainConfig {
    #[must_use]
    pub const fn chain_id(&self) -> ChainId {
        ChainId::new(self.chain_id)
    }

    /// Smallest retention that still covers every unconfirmed block of a window.
    #[must_use]
    pub const fn min_retention_blocks(&self) -> u64 {
        self.confirmations.saturating_add(self.chunk_size)
    }

    /// Effective dedupe-window retention.
    #[must_use]
    pub fn retention_blocks(&self) -> u64 {
        self.dedupe_window_blocks
            .unwrap_or_else(|| self.min_retention_blocks())
    }
}
