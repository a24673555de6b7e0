//! Gateway configuration.

use std::time::Duration;

/// Fewest messages a request may carry: the system prompt plus the newest
/// user turn.
pub const MIN_MESSAGES: usize = 2;

/// Retry behavior for the upstream policy loop.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Fixed wait between rate-limit retries; an upstream `Retry-After`
    /// longer than this wins.
    pub rate_limit_interval: Duration,
    /// Rate-limit retries allowed before the failure turns terminal.
    pub max_rate_limit_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            rate_limit_interval: Duration::from_secs(1),
            max_rate_limit_retries: 5,
        }
    }
}

/// Top-level gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Floor for history trimming, both proactive and reactive.
    pub min_messages: usize,
    pub retry: RetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_messages: MIN_MESSAGES,
            retry: RetryConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Defaults with `TOKENGATE_*` environment overrides applied.
    ///
    /// Unset or unparseable variables keep their defaults; `min_messages`
    /// never drops below the system-plus-one floor.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_parse::<u64>("TOKENGATE_RATE_LIMIT_INTERVAL_MS") {
            config.retry.rate_limit_interval = Duration::from_millis(value);
        }
        if let Some(value) = env_parse::<u32>("TOKENGATE_MAX_RATE_LIMIT_RETRIES") {
            config.retry.max_rate_limit_retries = value;
        }
        if let Some(value) = env_parse::<usize>("TOKENGATE_MIN_MESSAGES") {
            config.min_messages = value.max(MIN_MESSAGES);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}
