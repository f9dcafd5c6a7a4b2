//! Service configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::ParticipantSettings;
use transport::RetryPolicy;

use crate::role::Role;

/// Service configuration with per-role defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: 3001 order, 3002 payment, 3003 shipping)
/// - `BROKER_URL`: pub/sub broker base URL (default: `"http://localhost:8466"`)
/// - `PUBLISH_MAX_ATTEMPTS`: publish attempt ceiling (default: 5)
/// - `PUBLISH_BASE_DELAY_MS` / `PUBLISH_MAX_DELAY_MS`: backoff bounds (default: 100 / 2000)
/// - `PUBLISH_TIMEOUT_MS`: per-request broker timeout (default: 5000)
/// - `STEP_MAX_ATTEMPTS`: local attempts of a retryable business failure (default: 3)
/// - `STEP_TIMEOUT_SECS`: how long a step may stay unresolved (default: 300)
/// - `SWEEP_INTERVAL_SECS`: timeout sweeper period (default: 30)
/// - `FAILURE_RATE`: injected business failure probability (default: 0.5 shipping, 0 otherwise)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` for JSON lines, anything else for text (default: text)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub role: Role,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub broker_url: String,
    pub publish_max_attempts: usize,
    pub publish_base_delay_ms: u64,
    pub publish_max_delay_ms: u64,
    pub publish_timeout_ms: u64,
    pub step_max_attempts: usize,
    pub step_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub failure_rate: f64,
}

impl Config {
    /// Defaults for `role`.
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            host: "0.0.0.0".to_string(),
            port: role.default_port(),
            log_level: "info".to_string(),
            log_json: false,
            broker_url: "http://localhost:8466".to_string(),
            publish_max_attempts: 5,
            publish_base_delay_ms: 100,
            publish_max_delay_ms: 2_000,
            publish_timeout_ms: 5_000,
            step_max_attempts: 3,
            step_timeout_secs: 300,
            sweep_interval_secs: 30,
            failure_rate: role.default_failure_rate(),
        }
    }

    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env(role: Role) -> Self {
        Self::from_lookup(role, |key| std::env::var(key).ok())
    }

    /// Like [`Config::from_env`], reading values through `lookup`.
    /// Unparseable values fall back to the default.
    pub fn from_lookup(role: Role, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::for_role(role);
        Self {
            role,
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            broker_url: lookup("BROKER_URL").unwrap_or(defaults.broker_url),
            publish_max_attempts: parsed(&lookup, "PUBLISH_MAX_ATTEMPTS").unwrap_or(defaults.publish_max_attempts),
            publish_base_delay_ms: parsed(&lookup, "PUBLISH_BASE_DELAY_MS").unwrap_or(defaults.publish_base_delay_ms),
            publish_max_delay_ms: parsed(&lookup, "PUBLISH_MAX_DELAY_MS").unwrap_or(defaults.publish_max_delay_ms),
            publish_timeout_ms: parsed(&lookup, "PUBLISH_TIMEOUT_MS").unwrap_or(defaults.publish_timeout_ms),
            step_max_attempts: parsed(&lookup, "STEP_MAX_ATTEMPTS").unwrap_or(defaults.step_max_attempts),
            step_timeout_secs: parsed(&lookup, "STEP_TIMEOUT_SECS").unwrap_or(defaults.step_timeout_secs),
            sweep_interval_secs: parsed(&lookup, "SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep_interval_secs),
            failure_rate: parsed(&lookup, "FAILURE_RATE").unwrap_or(defaults.failure_rate),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn publish_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.publish_max_attempts,
            self.publish_base_delay_ms,
            self.publish_max_delay_ms,
            0.2,
        )
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn participant_settings(&self) -> ParticipantSettings {
        ParticipantSettings {
            step_retry: RetryPolicy::new(self.step_max_attempts, 50, 1_000, 0.2),
            step_timeout: Duration::from_secs(self.step_timeout_secs),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}
