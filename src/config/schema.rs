//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.
//! Durations are plain integers in milliseconds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::ClientOptions;

/// Root configuration for a client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeouts of one exchange.
    pub client: TimeoutConfig,

    /// Connection pool settings.
    pub pool: PoolConfig,

    /// DNS cache settings.
    pub dns: DnsConfig,

    /// Values merged into every request.
    pub defaults: DefaultsConfig,

    /// Log output of the command line front end.
    pub logging: LoggingConfig,
}

/// Exchange timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Inactivity timeout while sending or receiving. 0 disables it.
    pub timeout_ms: u64,

    /// Overall deadline of an exchange. 0 means none.
    pub request_timeout_ms: u64,

    /// TCP connect limit. 0 derives it from the deadline.
    pub dial_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            request_timeout_ms: 0,
            dial_timeout_ms: 0,
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Close connections after each exchange.
    pub disable_keep_alives: bool,

    /// Idle connections kept per host.
    pub max_idle_per_host: usize,

    /// How long an idle connection stays pooled.
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            disable_keep_alives: false,
            max_idle_per_host: 100,
            idle_timeout_ms: 5_000,
        }
    }
}

/// DNS cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DnsConfig {
    /// Cache lookups for this long. 0 disables the cache.
    pub cache_expire_ms: u64,
}

/// Request defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Replaces the built-in user agent.
    pub user_agent: Option<String>,

    pub headers: BTreeMap<String, String>,

    pub cookies: BTreeMap<String, String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Print the event target with every line.
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            show_target: false,
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        let mut options = ClientOptions::default();
        options.user_agent = config.defaults.user_agent.clone();
        options.headers = config
            .defaults
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        options.cookies = config
            .defaults
            .cookies
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        options.timeout = Duration::from_millis(config.client.timeout_ms);
        options.request_timeout = millis(config.client.request_timeout_ms);
        options.dial_timeout = millis(config.client.dial_timeout_ms);
        options.disable_keep_alives = config.pool.disable_keep_alives;
        options.max_idle_per_host = config.pool.max_idle_per_host;
        options.idle_timeout = Duration::from_millis(config.pool.idle_timeout_ms);
        options.dns_cache_expire = millis(config.dns.cache_expire_ms);
        options
    }
}

impl From<ClientConfig> for ClientOptions {
    fn from(config: ClientConfig) -> Self {
        ClientOptions::from(&config)
    }
}
