//! Start-up health reporting.

use std::time::Duration;

use crate::infrastructure::config::settings::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    name: &'static str,
    critical: bool,
    status: HealthStatus,
}

impl HealthCheck {
    fn new(name: &'static str, critical: bool, problem: Option<String>) -> Self {
        Self {
            name,
            critical,
            status: problem.map_or(HealthStatus::Healthy, HealthStatus::Unhealthy),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn critical(&self) -> bool {
        self.critical
    }

    pub fn status(&self) -> &HealthStatus {
        &self.status
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn checks(&self) -> &[HealthCheck] {
        &self.checks
    }

    pub fn push(&mut self, check: HealthCheck) {
        self.checks.push(check);
    }

    pub fn is_healthy(&self) -> bool {
        self.checks
            .iter()
            .filter(|check| check.critical())
            .all(HealthCheck::is_healthy)
    }
}

/// Checks that need nothing but the configuration.
pub fn health_check(config: &Config) -> HealthReport {
    let mut report = HealthReport::default();

    report.push(HealthCheck::new(
        "database",
        true,
        config
            .store
            .database
            .trim()
            .is_empty()
            .then(|| "database path is empty".to_string()),
    ));
    report.push(HealthCheck::new(
        "rpc",
        true,
        config
            .chain
            .rpc_url
            .trim()
            .is_empty()
            .then(|| "rpc_url is empty".to_string()),
    ));
    report.push(HealthCheck::new(
        "stream",
        false,
        config
            .chain
            .stream_url
            .is_none()
            .then(|| "stream_url not set, polling only".to_string()),
    ));
    report.push(HealthCheck::new(
        "contract",
        true,
        config
            .chain
            .contract_address
            .trim()
            .is_empty()
            .then(|| "contract_address is empty".to_string()),
    ));
    report.push(HealthCheck::new(
        "signer",
        true,
        config
            .signer
            .url
            .is_none()
            .then(|| "signer.url not set, contract calls cannot be signed".to_string()),
    ));

    report
}

/// Ask the RPC endpoint for its head block.
///
/// # Errors
///
/// Returns the RPC error when the endpoint is unreachable.
#[cfg(feature = "evm")]
pub async fn probe_rpc(config: &Config) -> crate::error::Result<u64> {
    use crate::adapter::outbound::evm::rpc::parse_quantity;
    use crate::adapter::outbound::evm::JsonRpcClient;

    let client = JsonRpcClient::new(
        config.chain.rpc_url.clone(),
        config.chain.api_token.clone(),
        Duration::from_millis(config.chain.rpc_timeout_ms),
    )?;
    let head: String = client.call("eth_blockNumber", serde_json::json!([])).await?;
    parse_quantity(&head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::config::minimal_config;

    #[test]
    fn critical_failures_make_the_report_unhealthy() {
        let report = HealthReport {
            checks: vec![
                HealthCheck::new("ok", true, None),
                HealthCheck::new("warn", false, Some("warning".to_string())),
            ],
        };
        assert!(report.is_healthy());

        let report = HealthReport {
            checks: vec![HealthCheck::new("broken", true, Some("error".to_string()))],
        };
        assert!(!report.is_healthy());
        assert!(matches!(report.checks()[0].status(), HealthStatus::Unhealthy(_)));
    }

    #[test]
    fn missing_stream_is_not_critical() {
        let mut config = minimal_config();
        config.chain.stream_url = None;
        config.signer.url = Some("http://signer.local".to_string());
        let report = health_check(&config);

        let stream = report.checks().iter().find(|c| c.name() == "stream").unwrap();
        assert!(!stream.is_healthy());
        assert!(report.is_healthy());
    }

    #[test]
    fn default_config_is_unhealthy() {
        let report = health_check(&Config::default());
        let names: Vec<_> = report.checks().iter().map(HealthCheck::name).collect();
        assert!(names.contains(&"rpc"));
        assert!(!report.is_healthy());
    }
}
