//! Coordinator configuration loaded from environment variables.

use std::time::Duration;

/// Which timeout budget a unit of work runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Interactive work, short timeout.
    Sync,
    /// Background work, long timeout.
    Async,
}

/// Transaction coordinator configuration.
///
/// Reads from environment variables:
/// - `TXN_SYNC_TIMEOUT_SECS` — interactive unit-of-work budget (default: `60`)
/// - `TXN_ASYNC_TIMEOUT_SECS` — background unit-of-work budget (default: `600`)
/// - `TXN_MAX_SYNC_ROWS` — row ceiling for synchronous indexing (default: `1000`)
#[derive(Debug, Clone)]
pub struct TxnConfig {
    pub sync_timeout: Duration,
    pub async_timeout: Duration,
    pub max_sync_rows: i64,
}

impl TxnConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sync_timeout: Duration::from_secs(env_parse(
                "TXN_SYNC_TIMEOUT_SECS",
                defaults.sync_timeout.as_secs(),
            )),
            async_timeout: Duration::from_secs(env_parse(
                "TXN_ASYNC_TIMEOUT_SECS",
                defaults.async_timeout.as_secs(),
            )),
            max_sync_rows: env_parse("TXN_MAX_SYNC_ROWS", defaults.max_sync_rows),
        }
    }

    /// Timeout budget for an execution context.
    pub fn timeout_for(&self, context: ExecutionContext) -> Duration {
        match context {
            ExecutionContext::Sync => self.sync_timeout,
            ExecutionContext::Async => self.async_timeout,
        }
    }
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(60),
            async_timeout: Duration::from_secs(600),
            max_sync_rows: 1000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TxnConfig::default();
        assert_eq!(config.timeout_for(ExecutionContext::Sync), Duration::from_secs(60));
        assert_eq!(config.timeout_for(ExecutionContext::Async), Duration::from_secs(600));
        assert_eq!(config.max_sync_rows, 1000);
    }
}
