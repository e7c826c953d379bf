//! API server configuration loaded from environment variables.

use std::time::Duration;

/// Server configuration.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `0.0.0.0`)
/// - `PORT` — bind port (default: `3000`)
/// - `HEALTH_BROADCAST_WAIT_MS` — default reply-collection window for
///   cluster health broadcasts (default: `1000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub broadcast_wait: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            broadcast_wait: Duration::from_millis(
                std::env::var("HEALTH_BROADCAST_WAIT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.broadcast_wait.as_millis() as u64),
            ),
        }
    }

    /// Returns the socket address to bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            broadcast_wait: Duration::from_millis(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_addr() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.broadcast_wait, Duration::from_millis(1000));
    }
}
