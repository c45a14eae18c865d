//! Contract-call queue configuration.

use serde::Deserialize;

/// Retry policy and capacity of the contract-call queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Attempts per job, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on every further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Pending plus inflight jobs above which new jobs are rejected.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Markets executed concurrently. Defaults to the CPU count.
    #[serde(default)]
    pub workers: Option<usize>,

    /// How long to wait for a receipt before treating the attempt as timed out.
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,

    /// Interval between receipt polls.
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    /// Fee increase applied after an underpriced rejection.
    #[serde(default = "default_fee_bump_percent")]
    pub fee_bump_percent: u32,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_depth() -> usize {
    1_000
}

fn default_receipt_timeout_ms() -> u64 {
    120_000
}

fn default_receipt_poll_interval_ms() -> u64 {
    2_000
}

fn default_fee_bump_percent() -> u32 {
    12
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_depth: default_max_depth(),
            workers: None,
            receipt_timeout_ms: default_receipt_timeout_ms(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            fee_bump_percent: default_fee_bump_percent(),
        }
    }
}

impl QueueConfig {
    /// Effective worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}
