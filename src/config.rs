//! Launcher configuration file
//!
//! Optional JSON file passed with `--config`. Everything in it has a
//! default, so a partial file is fine and a missing or broken one only
//! produces a warning.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::overrides::OverrideRule;

/// Complete launcher configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// `tracing` filter directive used when neither `VECU_LOG` nor
    /// `--log-filter` is given
    pub log_filter: Option<String>,
    pub transport: TransportConfig,
    /// Attribute name to override expression; applied before command-line
    /// overrides, so the command line wins
    pub overrides: BTreeMap<String, String>,
}

/// Transport tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Longest accepted request line (hex digits) on line-framed transports
    pub max_line_length: usize,
    /// Receive buffer for one ISO-TP datagram
    pub isotp_buffer_size: usize,
    /// Pause after a failed accept or receive, in milliseconds
    pub error_backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_line_length: 8192,
            isotp_buffer_size: 4095,
            error_backoff_ms: 100,
        }
    }
}

impl TransportConfig {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Why a configuration file could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl LauncherConfig {
    /// Read and parse a configuration file.
    ///
    /// # Errors
    /// `ConfigError::Read` or `ConfigError::Parse`
    pub fn try_load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Overrides from the file as rules ordered by attribute name.
    pub fn override_rules(&self) -> Vec<OverrideRule> {
        self.overrides
            .iter()
            .enumerate()
            .map(|(position, (attribute, expression))| {
                OverrideRule::new(attribute.as_str(), expression.as_str(), position)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LauncherConfig::default();
        assert_eq!(config.log_filter, None);
        assert_eq!(config.transport.max_line_length, 8192);
        assert_eq!(config.transport.isotp_buffer_size, 4095);
        assert_eq!(config.transport.error_backoff(), Duration::from_millis(100));
        assert!(config.overrides.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "log_filter": "vecu=debug", "overrides": {{ "p_service": "0.5" }} }}"#
        )
        .unwrap();

        let config = LauncherConfig::try_load(file.path()).unwrap();
        assert_eq!(config.log_filter.as_deref(), Some("vecu=debug"));
        assert_eq!(config.transport, TransportConfig::default());
        assert_eq!(
            config.override_rules(),
            vec![OverrideRule::new("p_service", "0.5", 0)]
        );
    }

    #[test]
    fn test_missing_or_broken_file_is_reported() {
        let missing = std::env::temp_dir().join("vecu-config-does-not-exist.json");
        assert!(matches!(
            LauncherConfig::try_load(&missing),
            Err(ConfigError::Read { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            LauncherConfig::try_load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
