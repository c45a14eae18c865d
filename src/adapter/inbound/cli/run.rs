//! Handler for the `run` command.

use std::path::Path;

use tracing::info;

use crate::adapter::inbound::cli::command::RunArgs;
use crate::error::Result;
use crate::infrastructure::config::settings::Config;

/// Load configuration, apply command-line overrides and run until Ctrl+C.
///
/// # Errors
///
/// Returns configuration errors, wiring errors, or the fatal error that
/// stopped the indexer.
pub async fn execute(config_path: &Path, args: &RunArgs) -> Result<()> {
    let mut config = Config::load_or_env(config_path)?;
    apply_overrides(&mut config, args);
    config.init_logging();

    info!(
        chain_id = config.chain.chain_id,
        database = %config.store.database,
        "marketsync starting"
    );
    start(&config).await?;
    info!("marketsync stopped");
    Ok(())
}

#[cfg(feature = "evm")]
async fn start(config: &Config) -> Result<()> {
    crate::infrastructure::runtime::run_until_ctrl_c(config).await
}

#[cfg(not(feature = "evm"))]
async fn start(_config: &Config) -> Result<()> {
    Err(crate::error::ConfigError::InvalidValue {
        field: "features",
        reason: "built without the `evm` feature, no ledger adapter available".to_string(),
    }
    .into())
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.format = "json".to_string();
    }
    if let Some(database) = &args.database {
        config.store.database = database.to_string_lossy().to_string();
    }
    if let Some(start_block) = args.start_block {
        config.chain.start_block = start_block;
    }
}
