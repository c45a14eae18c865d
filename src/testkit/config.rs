//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests.

use crate::infrastructure::config::reconnection::ReconnectionConfig;
use crate::infrastructure::config::settings::Config;

pub const TOML: &str = r#"
[chain]
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337
contract_address = "0x00000000000000000000000000000000000000aa"

[store]
database = ":memory:"

[signer]
url = "http://127.0.0.1:9000"
address = "0x00000000000000000000000000000000000000bb"
"#;

/// Valid configuration with an in-memory store and local endpoints.
pub fn minimal_config() -> Config {
    let mut config = Config::default();
    config.chain.rpc_url = "http://127.0.0.1:8545".to_string();
    config.chain.chain_id = 31337;
    config.chain.contract_address = "0x00000000000000000000000000000000000000aa".to_string();
    config.store.database = ":memory:".to_string();
    config.signer.url = Some("http://127.0.0.1:9000".to_string());
    config.signer.address = Some("0x00000000000000000000000000000000000000bb".to_string());
    config
}

/// Fast reconnection config with zero delays.
pub fn reconnection() -> ReconnectionConfig {
    ReconnectionConfig {
        initial_delay_ms: 1,
        max_delay_ms: 1,
        backoff_multiplier: 1.0,
        max_consecutive_failures: 3,
        circuit_breaker_cooldown_ms: 0,
    }
}
