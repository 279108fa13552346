//! Configuration management for the registration service.
//!
//! Loads configuration from environment variables (optionally seeded from a
//! `.env` file) with sensible defaults. Unparseable values fall back to the
//! default and are logged.

use crate::coordinator::{CoordinatorConfig, UnregisterPolicy};
use crate::retry::RetryPolicy;
use crate::saga::CompensationPolicy;
use clubhouse_core::projection::ProjectionPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator deadline, retries and unregister policy
    pub coordinator: CoordinatorConfig,
    /// Saga compensation retries
    pub compensation: CompensationPolicy,
    /// Roster placeholders
    pub projection: ProjectionPolicy,
    /// `PostgreSQL` connection settings
    pub database: DatabaseConfig,
    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; `None` selects the in-memory stores
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Logging and metrics configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error or a full `EnvFilter`)
    pub log_level: String,
    /// Address for Prometheus scraping; metrics stay disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    /// Load `.env` (if present) and then the process environment.
    #[must_use]
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let retry_defaults = RetryPolicy::default();
        let compensation_defaults = CompensationPolicy::default();
        let placeholders = ProjectionPolicy::default();

        Self {
            coordinator: CoordinatorConfig {
                deadline: Duration::from_millis(parsed(&lookup, "CLUBHOUSE_DEADLINE_MS", 5_000)),
                retry: RetryPolicy {
                    max_retries: parsed(&lookup, "CLUBHOUSE_RETRY_MAX", retry_defaults.max_retries),
                    initial_delay: millis(
                        &lookup,
                        "CLUBHOUSE_RETRY_INITIAL_MS",
                        retry_defaults.initial_delay,
                    ),
                    max_delay: millis(&lookup, "CLUBHOUSE_RETRY_MAX_DELAY_MS", retry_defaults.max_delay),
                    multiplier: parsed(&lookup, "CLUBHOUSE_RETRY_MULTIPLIER", retry_defaults.multiplier),
                    jitter: parsed(&lookup, "CLUBHOUSE_RETRY_JITTER", retry_defaults.jitter),
                },
                unregister_policy: parsed(
                    &lookup,
                    "CLUBHOUSE_UNREGISTER_POLICY",
                    UnregisterPolicy::default(),
                ),
            },
            compensation: CompensationPolicy {
                retry: RetryPolicy {
                    max_retries: parsed(
                        &lookup,
                        "CLUBHOUSE_COMPENSATION_RETRY_MAX",
                        compensation_defaults.retry.max_retries,
                    ),
                    ..compensation_defaults.retry
                },
                budget: millis(
                    &lookup,
                    "CLUBHOUSE_COMPENSATION_BUDGET_MS",
                    compensation_defaults.budget,
                ),
            },
            projection: ProjectionPolicy {
                placeholder_name: text(&lookup, "CLUBHOUSE_PLACEHOLDER_NAME", placeholders.placeholder_name),
                placeholder_email: text(&lookup, "CLUBHOUSE_PLACEHOLDER_EMAIL", placeholders.placeholder_email),
                placeholder_image: text(&lookup, "CLUBHOUSE_PLACEHOLDER_IMAGE", placeholders.placeholder_image),
                placeholder_team_name: text(
                    &lookup,
                    "CLUBHOUSE_PLACEHOLDER_TEAM_NAME",
                    placeholders.placeholder_team_name,
                ),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
                max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS", 10),
                connect_timeout: parsed(&lookup, "DATABASE_CONNECT_TIMEOUT", 30),
            },
            observability: ObservabilityConfig {
                log_level: text(&lookup, "LOG_LEVEL", "info".to_string()),
                metrics_addr: lookup("METRICS_ADDR").and_then(|raw| match raw.parse() {
                    Ok(addr) => Some(addr),
                    Err(e) => {
                        tracing::warn!(value = %raw, error = %e, "Ignoring invalid METRICS_ADDR");
                        None
                    }
                }),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
            default
        }),
        None => default,
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(parsed(lookup, key, default_ms))
}

fn text(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: String) -> String {
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::default();
        assert_eq!(config.coordinator.deadline, Duration::from_secs(5));
        assert_eq!(config.coordinator.unregister_policy, UnregisterPolicy::Permissive);
        assert_eq!(config.projection, ProjectionPolicy::default());
        assert_eq!(config.database.url, None);
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.observability.metrics_addr, None);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("CLUBHOUSE_DEADLINE_MS", "250"),
            ("CLUBHOUSE_RETRY_MAX", "7"),
            ("CLUBHOUSE_UNREGISTER_POLICY", "strict"),
            ("CLUBHOUSE_PLACEHOLDER_NAME", "Guest"),
            ("DATABASE_URL", "postgres://localhost/clubhouse"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
        ]);
        assert_eq!(config.coordinator.deadline, Duration::from_millis(250));
        assert_eq!(config.coordinator.retry.max_retries, 7);
        assert_eq!(config.coordinator.unregister_policy, UnregisterPolicy::Strict);
        assert_eq!(config.projection.placeholder_name, "Guest");
        assert_eq!(config.projection.placeholder_email, "N/A");
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/clubhouse")
        );
        assert_eq!(
            config.observability.metrics_addr,
            Some("127.0.0.1:9100".parse().unwrap())
        );
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("CLUBHOUSE_DEADLINE_MS", "soon"),
            ("CLUBHOUSE_UNREGISTER_POLICY", "lenient"),
            ("METRICS_ADDR", "not-an-addr"),
        ]);
        assert_eq!(config.coordinator.deadline, Duration::from_secs(5));
        assert_eq!(config.coordinator.unregister_policy, UnregisterPolicy::Permissive);
        assert_eq!(config.observability.metrics_addr, None);
    }
}
