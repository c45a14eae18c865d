//! Persistence and key-custody configuration.

use serde::Deserialize;

/// Row store backend and conflict handling.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite file path, or `:memory:` for the in-process store.
    #[serde(default = "default_database")]
    pub database: String,

    /// Attempts for a conflicting compare-and-swap before giving up.
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,
}

fn default_database() -> String {
    "marketsync.db".to_string()
}

fn default_max_cas_retries() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            max_cas_retries: default_max_cas_retries(),
        }
    }
}

impl StoreConfig {
    /// Whether rows live only in process memory.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.database == ":memory:"
    }
}

/// Remote key-custody service.
#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    /// Base URL of the signing service. Without it transactions cannot be sent.
    #[serde(default)]
    pub url: Option<String>,

    /// Sender address managed by the service.
    #[serde(default)]
    pub address: Option<String>,

    /// Request timeout.
    #[serde(default = "default_signer_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_signer_timeout_ms() -> u64 {
    5_000
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            url: None,
            address: None,
            timeout_ms: default_signer_timeout_ms(),
        }
    }
}
