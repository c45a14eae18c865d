//! Handler for the `check` command.

use std::path::Path;

use serde_json::json;

use crate::adapter::inbound::cli::command::CheckArgs;
use crate::error::Result;
use crate::infrastructure::config::settings::Config;
use crate::infrastructure::health::{health_check, HealthReport, HealthStatus};

/// Validate configuration and print a health report. Returns whether every
/// critical check passed.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or validated.
pub async fn execute(config_path: &Path, args: &CheckArgs, json_output: bool) -> Result<bool> {
    let config = Config::load_or_env(config_path)?;
    let report = health_check(&config);
    let head = if args.live { Some(probe(&config).await) } else { None };

    if json_output {
        println!("{}", render_json(&report, head.as_ref()));
    } else {
        println!("Health Check");
        for check in report.checks() {
            let suffix = if check.critical() { " (critical)" } else { "" };
            let status = match check.status() {
                HealthStatus::Healthy => "healthy".to_string(),
                HealthStatus::Unhealthy(reason) => format!("unhealthy: {reason}"),
            };
            println!("  {}{suffix}: {status}", check.name());
        }
        match &head {
            Some(Ok(block)) => println!("  rpc head: {block}"),
            Some(Err(e)) => println!("  rpc head: unreachable: {e}"),
            None => {}
        }
    }

    let live_ok = head.as_ref().map_or(true, std::result::Result::is_ok);
    Ok(report.is_healthy() && live_ok)
}

#[cfg(feature = "evm")]
async fn probe(config: &Config) -> std::result::Result<u64, String> {
    crate::infrastructure::health::probe_rpc(config)
        .await
        .map_err(|e| e.to_string())
}

#[cfg(not(feature = "evm"))]
async fn probe(_config: &Config) -> std::result::Result<u64, String> {
    Err("built without the `evm` feature".to_string())
}

fn render_json(report: &HealthReport, head: Option<&std::result::Result<u64, String>>) -> serde_json::Value {
    let checks: Vec<_> = report
        .checks()
        .iter()
        .map(|check| {
            let (status, details) = match check.status() {
                HealthStatus::Healthy => ("healthy", None),
                HealthStatus::Unhealthy(reason) => ("unhealthy", Some(reason.as_str())),
            };
            json!({
                "name": check.name(),
                "critical": check.critical(),
                "status": status,
                "details": details,
            })
        })
        .collect();

    json!({
        "command": "check",
        "status": if report.is_healthy() { "healthy" } else { "unhealthy" },
        "checks": checks,
        "rpc_head": head.and_then(|h| h.as_ref().ok()),
        "rpc_error": head.and_then(|h| h.as_ref().err()),
    })
}
