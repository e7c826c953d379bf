//! Messaging configuration loaded from environment variables.

use std::time::Duration;

/// Producer pool configuration.
///
/// Reads from environment variables:
/// - `PRODUCER_WORKERS` — connection/worker count (default: `2`)
/// - `PRODUCER_QUEUE_CAPACITY` — bounded hand-off queue size (default: `256`)
/// - `PRODUCER_BACKOFF_MS` — reconnect backoff (default: `1000`)
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub reconnect_backoff: Duration,
}

impl ProducerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: env_parse("PRODUCER_WORKERS", defaults.workers),
            queue_capacity: env_parse("PRODUCER_QUEUE_CAPACITY", defaults.queue_capacity),
            reconnect_backoff: Duration::from_millis(env_parse(
                "PRODUCER_BACKOFF_MS",
                defaults.reconnect_backoff.as_millis() as u64,
            )),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
            reconnect_backoff: Duration::from_millis(1000),
        }
    }
}

/// One consumer channel: a destination plus its worker sizing.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Destination name (`topic:` prefix selects fan-out).
    pub destination: String,
    /// Broker consumer-priority hint for this channel's workers.
    pub consumer_priority: i32,
    /// Number of workers, each with its own connection.
    pub concurrency: usize,
    /// Minimum task priority routed to this channel by the submitter.
    pub priority_threshold: u8,
}

impl ChannelConfig {
    /// Creates a channel config.
    pub fn new(destination: impl Into<String>, consumer_priority: i32, concurrency: usize) -> Self {
        Self {
            destination: destination.into(),
            consumer_priority,
            concurrency,
            priority_threshold: 0,
        }
    }

    /// Sets the submit-routing threshold.
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.priority_threshold = threshold;
        self
    }
}

/// Consumer pool configuration.
///
/// Reads from environment variables:
/// - `CONSUMER_RETRY_MS` — reconnect interval after connection loss
///   (default: `5000`)
///
/// The default channel table carries a normal-priority and a high-priority
/// reindex queue; deployments override it in code.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub channels: Vec<ChannelConfig>,
    pub retry_interval: Duration,
}

impl ConsumerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            channels: defaults.channels,
            retry_interval: Duration::from_millis(env_parse(
                "CONSUMER_RETRY_MS",
                defaults.retry_interval.as_millis() as u64,
            )),
        }
    }

    /// Total worker count across all channels.
    pub fn total_concurrency(&self) -> usize {
        self.channels.iter().map(|c| c.concurrency).sum()
    }

    /// The channel whose threshold is the highest one at or below the given
    /// priority; falls back to the lowest-threshold channel.
    pub fn channel_for_priority(&self, priority: u8) -> Option<&ChannelConfig> {
        self.channels
            .iter()
            .filter(|c| c.priority_threshold <= priority)
            .max_by_key(|c| c.priority_threshold)
            .or_else(|| self.channels.iter().min_by_key(|c| c.priority_threshold))
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelConfig::new("index.default", 0, 2),
                ChannelConfig::new("index.high", 4, 2).with_threshold(5),
            ],
            retry_interval: Duration::from_millis(5000),
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
    fn default_channel_table_sums_concurrency() {
        let config = ConsumerConfig::default();
        assert_eq!(config.total_concurrency(), 4);
    }

    #[test]
    fn priority_routing_picks_highest_threshold_at_or_below() {
        let config = ConsumerConfig::default();
        assert_eq!(
            config.channel_for_priority(0).unwrap().destination,
            "index.default"
        );
        assert_eq!(
            config.channel_for_priority(4).unwrap().destination,
            "index.default"
        );
        assert_eq!(
            config.channel_for_priority(7).unwrap().destination,
            "index.high"
        );
    }

    #[test]
    fn priority_routing_falls_back_to_lowest_threshold() {
        let config = ConsumerConfig {
            channels: vec![ChannelConfig::new("index.high", 4, 1).with_threshold(5)],
            retry_interval: Duration::from_millis(100),
        };
        assert_eq!(
            config.channel_for_priority(0).unwrap().destination,
            "index.high"
        );
    }
}
