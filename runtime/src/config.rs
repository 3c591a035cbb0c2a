//! Engine configuration.
//!
//! Every setting has a default and can be overridden with a `ROLLCALL_*`
//! environment variable:
//!
//! | Variable | Default |
//! |---|---|
//! | `ROLLCALL_DATA_DIR` | `./data` |
//! | `ROLLCALL_PERSIST_ALERT_THRESHOLD` | `3` |
//! | `ROLLCALL_MEMBERSHIP_CONCURRENCY` | `4` |
//! | `ROLLCALL_GUILD_CONCURRENCY` | `4` |
//! | `ROLLCALL_IGNORED_USERS` | empty (comma separated) |
//! | `ROLLCALL_RECOVERY_HISTORY_LIMIT` | `50` |
//! | `ROLLCALL_RECOVERY_TIMEOUT_SECS` | `120` |
//! | `ROLLCALL_LOG` | `info` |
//! | `ROLLCALL_METRICS_ADDR` | unset (no exporter) |

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Record store settings
    pub store: StoreConfig,
    /// Reconciliation settings
    pub reconcile: ReconcileConfig,
    /// Last-resort recovery settings
    pub recovery: RecoveryConfig,
    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory for the JSON file backend
    pub data_dir: PathBuf,
    /// Consecutive persistence failures before durability is reported degraded
    pub persistence_alert_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            persistence_alert_threshold: 3,
        }
    }
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Membership fetches in flight per record
    pub membership_concurrency: usize,
    /// Guilds reconciled in parallel
    pub guild_concurrency: usize,
    /// Users whose reactions are ignored (the bot's own account)
    pub ignored_users: Vec<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            membership_concurrency: 4,
            guild_concurrency: 4,
            ignored_users: Vec::new(),
        }
    }
}

/// Channel-history recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Posts read per channel
    pub history_limit: usize,
    /// Wall-clock budget for the whole scan, in seconds
    pub timeout_secs: u64,
}

impl RecoveryConfig {
    /// The scan budget as a [`Duration`]
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            timeout_secs: 120,
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_level: String,
    /// Prometheus exporter address; `None` disables it
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to something
    /// that does not parse or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from a `.env` file, falling back to the process
    /// environment for anything the file does not set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvFile`] if the file cannot be read or parsed,
    /// and [`ConfigError::Invalid`] as for [`EngineConfig::from_env`].
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut vars = HashMap::new();
        for entry in dotenvy::from_path_iter(path.as_ref())? {
            let (name, value) = entry?;
            vars.insert(name, value);
        }
        Self::from_lookup(|name| vars.get(name).cloned().or_else(|| env::var(name).ok()))
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparsable or out-of-range values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            store: StoreConfig {
                data_dir: lookup("ROLLCALL_DATA_DIR")
                    .map_or(defaults.store.data_dir, PathBuf::from),
                persistence_alert_threshold: parse_or(
                    &lookup,
                    "ROLLCALL_PERSIST_ALERT_THRESHOLD",
                    defaults.store.persistence_alert_threshold,
                )?,
            },
            reconcile: ReconcileConfig {
                membership_concurrency: parse_or(
                    &lookup,
                    "ROLLCALL_MEMBERSHIP_CONCURRENCY",
                    defaults.reconcile.membership_concurrency,
                )?,
                guild_concurrency: parse_or(
                    &lookup,
                    "ROLLCALL_GUILD_CONCURRENCY",
                    defaults.reconcile.guild_concurrency,
                )?,
                ignored_users: lookup("ROLLCALL_IGNORED_USERS")
                    .map(|raw| {
                        raw.split(',')
                            .map(str::trim)
                            .filter(|id| !id.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            recovery: RecoveryConfig {
                history_limit: parse_or(
                    &lookup,
                    "ROLLCALL_RECOVERY_HISTORY_LIMIT",
                    defaults.recovery.history_limit,
                )?,
                timeout_secs: parse_or(
                    &lookup,
                    "ROLLCALL_RECOVERY_TIMEOUT_SECS",
                    defaults.recovery.timeout_secs,
                )?,
            },
            observability: ObservabilityConfig {
                log_level: lookup("ROLLCALL_LOG").unwrap_or(defaults.observability.log_level),
                metrics_addr: match lookup("ROLLCALL_METRICS_ADDR") {
                    Some(raw) => Some(parse_value("ROLLCALL_METRICS_ADDR", &raw)?),
                    None => None,
                },
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero concurrency bound or alert
    /// threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            (
                "ROLLCALL_PERSIST_ALERT_THRESHOLD",
                self.store.persistence_alert_threshold,
            ),
            (
                "ROLLCALL_MEMBERSHIP_CONCURRENCY",
                self.reconcile.membership_concurrency,
            ),
            ("ROLLCALL_GUILD_CONCURRENCY", self.reconcile.guild_concurrency),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map_or(Ok(default), |raw| parse_value(name, &raw))
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name: name.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.recovery.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn variables_override_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ROLLCALL_DATA_DIR", "/var/lib/rollcall"),
            ("ROLLCALL_MEMBERSHIP_CONCURRENCY", "2"),
            ("ROLLCALL_IGNORED_USERS", "bot, ,other"),
            ("ROLLCALL_METRICS_ADDR", "127.0.0.1:9100"),
        ]))
        .unwrap();
        assert_eq!(config.store.data_dir, PathBuf::from("/var/lib/rollcall"));
        assert_eq!(config.reconcile.membership_concurrency, 2);
        assert_eq!(config.reconcile.ignored_users, vec!["bot", "other"]);
        assert_eq!(
            config.observability.metrics_addr,
            Some("127.0.0.1:9100".parse().unwrap())
        );
    }

    #[test]
    fn unparsable_value_is_an_error() {
        let err = EngineConfig::from_lookup(lookup_from(&[("ROLLCALL_GUILD_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "ROLLCALL_GUILD_CONCURRENCY"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err =
            EngineConfig::from_lookup(lookup_from(&[("ROLLCALL_MEMBERSHIP_CONCURRENCY", "0")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn env_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ROLLCALL_RECOVERY_HISTORY_LIMIT=10").unwrap();
        writeln!(file, "ROLLCALL_PERSIST_ALERT_THRESHOLD=7").unwrap();
        let config = EngineConfig::from_env_file(file.path()).unwrap();
        assert_eq!(config.recovery.history_limit, 10);
        assert_eq!(config.store.persistence_alert_threshold, 7);
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let err = EngineConfig::from_env_file("/nonexistent/rollcall.env").unwrap_err();
        assert!(matches!(err, ConfigError::EnvFile(_)));
    }
}
