//! `tracing` subscriber setup and the spans the executor runs under.

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{Result, StreamflowError};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Include the event target.
    #[serde(default)]
    pub with_target: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            with_target: false,
        }
    }
}

impl TracingConfig {
    /// Sets the default level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets the format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let level: LevelFilter = self
            .level
            .parse()
            .map_err(|e| StreamflowError::Config(format!("invalid log level '{}': {e}", self.level)))?;
        Ok(EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy())
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` directives override `config.level`.
///
/// # Errors
///
/// Fails on an unknown level or if a global subscriber is already set.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(config.with_target))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(config.with_target))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(config.with_target))
            .try_init(),
    };
    result.map_err(|e| StreamflowError::Config(format!("failed to install subscriber: {e}")))?;

    tracing::debug!(level = %config.level, format = ?config.format, "Tracing initialized");
    Ok(())
}

/// Span covering one item's walk through a pipeline.
#[must_use]
pub fn item_span(pipeline_id: &str, item_id: &str, retry_count: u32) -> tracing::Span {
    tracing::debug_span!("item", pipeline_id = %pipeline_id, item_id = %item_id, retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json() {
        let config: TracingConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = TracingConfig::default().with_level("loud");
        assert!(matches!(
            init_tracing(&config),
            Err(StreamflowError::Config(msg)) if msg.contains("loud")
        ));
    }

    #[test]
    fn test_second_install_fails() {
        let config = TracingConfig::default().with_level("warn");
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
