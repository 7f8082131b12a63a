//! swkit configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

use crate::logging::{LogConfig, LogFormat};
use crate::{Result, SwKitError};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwKitConfig {
    /// Lifecycle observer settings
    pub observer: ObserverConfig,

    /// Diagnostic logging settings
    pub logging: LoggingSettings,
}

/// Lifecycle observer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// How long to wait after `installed` before deciding between
    /// "activated" and "waiting", in milliseconds
    pub grace_period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level name: trace, debug, info, warn or error
    pub level: String,

    /// Output format
    pub format: LogFormat,

    /// Optional `EnvFilter` directive, overrides `level`
    pub filter: Option<String>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
        }
    }
}

impl ObserverConfig {
    /// Config with an explicit grace period.
    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            grace_period_ms: u64::try_from(grace_period.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            filter: None,
        }
    }
}

impl LoggingSettings {
    /// Resolve into a [`LogConfig`] for [`crate::init_logging`].
    pub fn to_log_config(&self) -> Result<LogConfig> {
        let level = Level::from_str(&self.level).map_err(|e| {
            SwKitError::config_with_source(format!("invalid log level '{}'", self.level), e)
        })?;

        let base = match self.format {
            LogFormat::Json => LogConfig::production(),
            _ if level == Level::DEBUG || level == Level::TRACE => LogConfig::debug(),
            _ => LogConfig::default(),
        };

        Ok(LogConfig {
            level,
            format: self.format,
            filter: self.filter.clone(),
            ..base
        })
    }
}

impl SwKitConfig {
    /// Parse configuration from JSON text. Missing fields use defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: SwKitConfig = serde_json::from_str(text)
            .map_err(|e| SwKitError::config_with_source("malformed configuration", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SwKitError::config_with_source(format!("cannot read {}", path.display()), e)
        })?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<()> {
        self.logging.to_log_config().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SwKitConfig::default();
        assert_eq!(config.observer.grace_period(), Duration::from_secs(1));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SwKitConfig::from_json(r#"{ "observer": { "grace_period_ms": 250 } }"#)
            .unwrap();
        assert_eq!(config.observer.grace_period(), Duration::from_millis(250));
        assert_eq!(config.logging, LoggingSettings::default());

        let empty = SwKitConfig::from_json("{}").unwrap();
        assert_eq!(empty.observer, ObserverConfig::default());
    }

    #[test]
    fn test_zero_grace_period_allowed() {
        let config = SwKitConfig::from_json(r#"{ "observer": { "grace_period_ms": 0 } }"#)
            .unwrap();
        assert_eq!(config.observer.grace_period(), Duration::ZERO);
    }

    #[test]
    fn test_invalid_level_rejected() {
        let err = SwKitConfig::from_json(r#"{ "logging": { "level": "loud" } }"#).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = SwKitConfig::from_json("{ observer: ").unwrap_err();
        assert!(matches!(err, SwKitError::Config { .. }));
    }

    #[test]
    fn test_logging_settings_to_log_config() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            format: LogFormat::Json,
            filter: Some("swkit_reset=trace".to_string()),
        };
        let log = settings.to_log_config().unwrap();
        assert_eq!(log.level, Level::DEBUG);
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.filter.as_deref(), Some("swkit_reset=trace"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "observer": {{ "grace_period_ms": 1500 }}, "logging": {{ "format": "compact" }} }}"#
        )
        .unwrap();

        let config = SwKitConfig::load(file.path()).unwrap();
        assert_eq!(config.observer.grace_period_ms, 1500);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SwKitConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_with_grace_period() {
        let config = ObserverConfig::with_grace_period(Duration::from_millis(30));
        assert_eq!(config.grace_period_ms, 30);
    }

    #[test]
    fn test_with_huge_grace_period_saturates() {
        let config = ObserverConfig::with_grace_period(Duration::MAX);
        assert_eq!(config.grace_period_ms, u64::MAX);
    }

    #[test]
    fn test_log_presets_follow_settings() {
        let verbose = LoggingSettings {
            level: "trace".to_string(),
            ..Default::default()
        };
        let log = verbose.to_log_config().unwrap();
        assert_eq!(log.level, Level::TRACE);
        assert!(log.include_location);
        assert!(log.include_span_events);

        let quiet = LoggingSettings::default().to_log_config().unwrap();
        assert!(!quiet.include_location);

        let json = LoggingSettings {
            level: "debug".to_string(),
            format: LogFormat::Json,
            filter: None,
        };
        let log = json.to_log_config().unwrap();
        assert_eq!(log.level, Level::DEBUG);
        assert_eq!(log.format, LogFormat::Json);
        assert!(!log.include_location);
    }
}
