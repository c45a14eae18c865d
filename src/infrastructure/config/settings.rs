//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all application settings.
//! Configuration is loaded from an optional TOML file; environment variables
//! (including a `.env` file loaded by the binary) override file values.
//!
//! # Example
//!
//! ```no_run
//! use marketsync::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use super::chain::{ChainConfig, CHUNK_SIZE_RANGE, MIN_FALLBACK_POLL_INTERVAL_MS};
use super::logging::LoggingConfig;
use super::queue::QueueConfig;
use super::reconnection::ReconnectionConfig;
use super::store::{SignerConfig, StoreConfig};
use crate::error::{ConfigError, Result};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Ledger endpoints and indexing parameters.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Contract-call queue policy.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Row store backend.
    #[serde(default)]
    pub store: StoreConfig,

    /// Key-custody service.
    #[serde(default)]
    pub signer: SignerConfig,

    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry backoff for ledger connections.
    #[serde(default)]
    pub reconnection: ReconnectionConfig,
}

fn parse_env<T>(field: &'static str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        ConfigError::InvalidValue {
            field,
            reason: e.to_string(),
        }
        .into()
    })
}

impl Config {
    /// Parse configuration from TOML content, apply process environment
    /// overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed, an environment variable
    /// does not parse, or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn parse_toml(content: &str) -> Result<Self> {
        Self::parse_with_env(content, |name| std::env::var(name).ok())
    }

    /// Like [`parse_toml`](Self::parse_toml) with an explicit variable lookup.
    ///
    /// # Errors
    ///
    /// See [`parse_toml`](Self::parse_toml).
    #[allow(clippy::result_large_err)]
    pub fn parse_with_env<F>(content: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or
    /// [`parse_toml`](Self::parse_toml) fails.
    #[allow(clippy::result_large_err)]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Load from `path` when it exists, otherwise from the environment alone.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    #[allow(clippy::result_large_err)]
    pub fn load_or_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Self::parse_toml("")
        }
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self) {
        self.logging.init();
    }

    #[allow(clippy::result_large_err)]
    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let chain = &mut self.chain;
        if let Some(v) = lookup("MARKETSYNC_RPC_URL") {
            chain.rpc_url = v;
        }
        if let Some(v) = lookup("MARKETSYNC_STREAM_URL") {
            chain.stream_url = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("MARKETSYNC_API_TOKEN") {
            chain.api_token = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("MARKETSYNC_CHAIN_ID") {
            chain.chain_id = parse_env("MARKETSYNC_CHAIN_ID", &v)?;
        }
        if let Some(v) = lookup("MARKETSYNC_CONTRACT_ADDRESS") {
            chain.contract_address = v;
        }
        if let Some(v) = lookup("FALLBACK_POLL_INTERVAL_MS") {
            chain.fallback_poll_interval_ms = parse_env("FALLBACK_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("START_BLOCK") {
            chain.start_block = parse_env("START_BLOCK", &v)?;
        }
        if let Some(v) = lookup("CONFIRMATIONS") {
            chain.confirmations = parse_env("CONFIRMATIONS", &v)?;
        }
        if let Some(v) = lookup("CHUNK_SIZE") {
            chain.chunk_size = parse_env("CHUNK_SIZE", &v)?;
        }

        let queue = &mut self.queue;
        if let Some(v) = lookup("QUEUE_MAX_ATTEMPTS") {
            queue.max_attempts = parse_env("QUEUE_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("QUEUE_BASE_DELAY_MS") {
            queue.base_delay_ms = parse_env("QUEUE_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("QUEUE_MAX_DEPTH") {
            queue.max_depth = parse_env("QUEUE_MAX_DEPTH", &v)?;
        }
        if let Some(v) = lookup("QUEUE_WORKERS") {
            queue.workers = Some(parse_env("QUEUE_WORKERS", &v)?);
        }

        if let Some(v) = lookup("SIGNER_URL") {
            self.signer.url = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.store.database = v;
        }
        Ok(())
    }

    /// Validate configuration values.
    ///
    /// Checks that all required fields are present and values are within
    /// acceptable ranges.
    #[allow(clippy::result_large_err)]
    fn validate(&self) -> Result<()> {
        let chain = &self.chain;
        if chain.rpc_url.is_empty() {
            return Err(ConfigError::MissingField { field: "rpc_url" }.into());
        }
        url::Url::parse(&chain.rpc_url).map_err(|e| ConfigError::InvalidValue {
            field: "rpc_url",
            reason: e.to_string(),
        })?;
        if let Some(stream_url) = &chain.stream_url {
            url::Url::parse(stream_url).map_err(|e| ConfigError::InvalidValue {
                field: "stream_url",
                reason: e.to_string(),
            })?;
        }
        if chain.contract_address.is_empty() {
            return Err(ConfigError::MissingField {
                field: "contract_address",
            }
            .into());
        }
        if chain.fallback_poll_interval_ms < MIN_FALLBACK_POLL_INTERVAL_MS {
            return Err(ConfigError::InvalidValue {
                field: "fallback_poll_interval_ms",
                reason: format!("must be at least {MIN_FALLBACK_POLL_INTERVAL_MS}"),
            }
            .into());
        }
        if !CHUNK_SIZE_RANGE.contains(&chain.chunk_size) {
            return Err(ConfigError::InvalidValue {
                field: "chunk_size",
                reason: format!(
                    "must be between {} and {}",
                    CHUNK_SIZE_RANGE.start(),
                    CHUNK_SIZE_RANGE.end()
                ),
            }
            .into());
        }
        if chain.retention_blocks() < chain.min_retention_blocks() {
            return Err(ConfigError::InvalidValue {
                field: "dedupe_window_blocks",
                reason: format!(
                    "must be at least confirmations + chunk_size ({})",
                    chain.min_retention_blocks()
                ),
            }
            .into());
        }
        if chain.rpc_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rpc_timeout_ms",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if chain.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_consecutive_failures",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        let queue = &self.queue;
        if queue.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if queue.max_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_depth",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if queue.workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "workers",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if !(10..=100).contains(&queue.fee_bump_percent) {
            return Err(ConfigError::InvalidValue {
                field: "fee_bump_percent",
                reason: "must be between 10 and 100".to_string(),
            }
            .into());
        }
        if queue.receipt_poll_interval_ms == 0 || queue.receipt_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "receipt_timeout_ms",
                reason: "receipt timeout and poll interval must be greater than 0".to_string(),
            }
            .into());
        }

        if self.store.max_cas_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_cas_retries",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if let Some(signer_url) = &self.signer.url {
            url::Url::parse(signer_url).map_err(|e| ConfigError::InvalidValue {
                field: "signer.url",
                reason: e.to_string(),
            })?;
            if self.signer.address.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingField {
                    field: "signer.address",
                }
                .into());
            }
        }

        let reconnection = &self.reconnection;
        if reconnection.initial_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "initial_delay_ms",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if reconnection.max_delay_ms < reconnection.initial_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "max_delay_ms",
                reason: "must be >= initial_delay_ms".to_string(),
            }
            .into());
        }
        if reconnection.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "backoff_multiplier",
                reason: "must be >= 1.0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
        [chain]
        rpc_url = "https://rpc.example.org"
        contract_address = "0x00000000000000000000000000000000000000aa"
    "#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse_with_env(MINIMAL, no_env).unwrap();
        assert_eq!(config.chain.confirmations, 12);
        assert_eq!(config.chain.chunk_size, 1000);
        assert_eq!(config.chain.retention_blocks(), 1012);
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.queue.base_delay_ms, 5000);
        assert!(config.queue.workers() >= 1);
        assert_eq!(config.store.max_cas_retries, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn missing_rpc_url_is_rejected() {
        let err = Config::parse_with_env("", no_env).unwrap_err();
        assert!(err.to_string().contains("rpc_url"));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("MARKETSYNC_RPC_URL", "https://other.example.org"),
            ("CHUNK_SIZE", "250"),
            ("CONFIRMATIONS", "3"),
            ("QUEUE_WORKERS", "2"),
            ("DATABASE_URL", ":memory:"),
        ]
        .into_iter()
        .collect();
        let config =
            Config::parse_with_env(MINIMAL, |k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.chain.rpc_url, "https://other.example.org");
        assert_eq!(config.chain.chunk_size, 250);
        assert_eq!(config.chain.confirmations, 3);
        assert_eq!(config.queue.workers(), 2);
        assert!(config.store.is_memory());
    }

    #[test]
    fn unparsable_env_value_names_the_variable() {
        let err = Config::parse_with_env(MINIMAL, |k| {
            (k == "START_BLOCK").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("START_BLOCK"));
    }

    #[test]
    fn poll_interval_below_minimum_is_rejected() {
        let err = Config::parse_with_env(MINIMAL, |k| {
            (k == "FALLBACK_POLL_INTERVAL_MS").then(|| "4999".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("fallback_poll_interval_ms"));
    }

    #[test]
    fn chunk_size_bounds_are_enforced() {
        for bad in ["99", "10001"] {
            let err = Config::parse_with_env(MINIMAL, |k| {
                (k == "CHUNK_SIZE").then(|| bad.to_string())
            })
            .unwrap_err();
            assert!(err.to_string().contains("chunk_size"));
        }
    }

    #[test]
    fn dedupe_window_must_cover_confirmations_and_chunk() {
        let content = format!("{MINIMAL}\ndedupe_window_blocks = 50\n");
        let err = Config::parse_with_env(&content, no_env).unwrap_err();
        assert!(err.to_string().contains("dedupe_window_blocks"));
    }

    #[test]
    fn signer_url_requires_address() {
        let content = format!("{MINIMAL}\n[signer]\nurl = \"http://localhost:9000\"\n");
        let err = Config::parse_with_env(&content, no_env).unwrap_err();
        assert!(err.to_string().contains("signer.address"));
    }
}
