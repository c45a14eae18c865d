//! Logging configuration and subscriber setup.

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration.
///
/// `format` is `pretty` (default), `compact` or `json`. Unknown values fall
/// back to `pretty`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_format")]
    pub format: String,
    /// Include the emitting module in every line.
    #[serde(default = "default_targets")]
    pub targets: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_format() -> String {
    "pretty".into()
}

fn default_targets() -> bool {
    true
}

impl LoggingConfig {
    /// Filter directives: `RUST_LOG` when set, else `level`. Noisy transport
    /// crates are held at `warn` unless the level names them.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let mut directives = self.level.clone();
            for noisy in ["hyper", "reqwest", "tungstenite", "rustls"] {
                if !directives.contains(noisy) {
                    directives.push_str(&format!(",{noisy}=warn"));
                }
            }
            EnvFilter::new(directives)
        })
    }

    /// Install the global tracing subscriber. A second call keeps the first
    /// subscriber.
    pub fn init(&self) {
        let filter = self.filter();
        let builder = fmt().with_env_filter(filter).with_target(self.targets);

        let _ = match self.format.as_str() {
            "json" => builder.json().try_init(),
            "compact" => builder.compact().try_init(),
            _ => builder.try_init(),
        };
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            targets: default_targets(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: LoggingConfig = toml::from_str("").unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
        assert!(config.targets);
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = LoggingConfig {
            format: "compact".into(),
            ..LoggingConfig::default()
        };
        config.init();
        config.init();
    }
}
