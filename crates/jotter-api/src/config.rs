use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use jotter_core::config::{EngineConfig, RateLimitPolicy, RateLimits};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub remote_url: String,
    pub probe_url: String,
    pub transport_timeout: Duration,
    pub engine: EngineConfig,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("remote_url", &self.remote_url)
            .field("probe_url", &self.probe_url)
            .field("transport_timeout", &self.transport_timeout)
            .field("engine", &self.engine)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "JOTTER_API_BIND_ADDR", "127.0.0.1:8080");
        let db_path = value_or_default(&lookup, "JOTTER_DB_PATH", "jotter.db");

        let remote_url = required_trimmed(&lookup, "JOTTER_REMOTE_URL")?;
        if !is_http_url(&remote_url) {
            return Err(ConfigError::Invalid(
                "JOTTER_REMOTE_URL must start with http:// or https://".to_string(),
            ));
        }

        let default_probe = format!("{}/healthz", trim_trailing(&remote_url));
        let probe_url = value_or_default(&lookup, "JOTTER_PROBE_URL", &default_probe);
        if !is_http_url(&probe_url) {
            return Err(ConfigError::Invalid(
                "JOTTER_PROBE_URL must start with http:// or https://".to_string(),
            ));
        }

        let transport_timeout_secs = ranged_u64(
            &lookup,
            "JOTTER_TRANSPORT_TIMEOUT_SECS",
            10,
            1..=120,
        )?;
        let attempt_ceiling = ranged_u64(&lookup, "JOTTER_SYNC_ATTEMPT_CEILING", 5, 1..=20)?;
        let session_deadline_secs =
            ranged_u64(&lookup, "JOTTER_SESSION_DEADLINE_SECS", 30, 5..=300)?;
        let network_refresh_secs = ranged_u64(&lookup, "JOTTER_NETWORK_REFRESH_SECS", 5, 1..=60)?;
        let retention_days = ranged_u64(&lookup, "JOTTER_RETENTION_DAYS", 7, 1..=90)?;

        let sync_limit = ranged_u64(&lookup, "JOTTER_SYNC_RATE_LIMIT", 30, 1..=1_000)?;
        let sync_window_secs = ranged_u64(&lookup, "JOTTER_SYNC_RATE_WINDOW_SECS", 60, 10..=3_600)?;
        let export_limit = ranged_u64(&lookup, "JOTTER_EXPORT_RATE_LIMIT", 5, 1..=100)?;
        let export_window_secs =
            ranged_u64(&lookup, "JOTTER_EXPORT_RATE_WINDOW_SECS", 3_600, 60..=86_400)?;
        let bulk_limit = ranged_u64(&lookup, "JOTTER_BULK_RATE_LIMIT", 10, 1..=100)?;
        let bulk_window_secs =
            ranged_u64(&lookup, "JOTTER_BULK_RATE_WINDOW_SECS", 600, 60..=86_400)?;

        let tick_secs = optional_trimmed(&lookup, "JOTTER_SYNC_TICK_SECS")
            .map(|value| {
                value.parse::<u64>().map_err(|_| {
                    ConfigError::Invalid("JOTTER_SYNC_TICK_SECS must be an integer".to_string())
                })
            })
            .transpose()?;

        let limits = RateLimits {
            sync: RateLimitPolicy::new(sync_limit as u32, Duration::from_secs(sync_window_secs)),
            export: RateLimitPolicy::new(
                export_limit as u32,
                Duration::from_secs(export_window_secs),
            ),
            bulk: RateLimitPolicy::new(bulk_limit as u32, Duration::from_secs(bulk_window_secs)),
        };

        let mut engine = EngineConfig::default()
            .with_attempt_ceiling(attempt_ceiling as i64)
            .with_session_deadline(Duration::from_secs(session_deadline_secs))
            .with_limits(limits);
        engine.network_refresh = Duration::from_secs(network_refresh_secs);
        engine.retention = Duration::from_secs(retention_days * 24 * 3_600);
        if let Some(tick) = tick_secs {
            engine = engine.with_tick_interval(Duration::from_secs(tick));
        }

        Ok(Self {
            bind_addr,
            db_path,
            remote_url,
            probe_url,
            transport_timeout: Duration::from_secs(transport_timeout_secs),
            engine,
        })
    }
}

fn ranged_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = value_or_default(&lookup, name, &default.to_string())
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be an integer in [{}, {}]",
                range.start(),
                range.end()
            ))
        })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn trim_trailing(value: &str) -> &str {
    value.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        |key| map.get(key).map(|value| (*value).to_string())
    }

    #[test]
    fn config_requires_remote_url() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = AppConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(err.to_string().contains("JOTTER_REMOTE_URL"));
    }

    #[test]
    fn config_defaults_probe_to_remote_health() {
        let mut map = HashMap::new();
        map.insert("JOTTER_REMOTE_URL", "https://sync.example.com/");

        let config = AppConfig::from_lookup(lookup_from(&map)).unwrap();
        assert_eq!(config.probe_url, "https://sync.example.com/healthz");
        assert_eq!(config.engine.attempt_ceiling, 5);
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let mut map = HashMap::new();
        map.insert("JOTTER_REMOTE_URL", "https://sync.example.com");
        map.insert("JOTTER_SYNC_ATTEMPT_CEILING", "0");

        let err = AppConfig::from_lookup(lookup_from(&map)).unwrap_err();
        assert!(err.to_string().contains("JOTTER_SYNC_ATTEMPT_CEILING"));
    }

    #[test]
    fn config_wires_per_class_rate_limits() {
        let mut map = HashMap::new();
        map.insert("JOTTER_REMOTE_URL", "https://sync.example.com");
        map.insert("JOTTER_EXPORT_RATE_LIMIT", "2");
        map.insert("JOTTER_BULK_RATE_WINDOW_SECS", "120");

        let config = AppConfig::from_lookup(lookup_from(&map)).unwrap();
        assert_eq!(config.engine.limits.export.max_requests, 2);
        assert_eq!(
            config.engine.limits.bulk.window,
            Duration::from_secs(120)
        );
    }
}
