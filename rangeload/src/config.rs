//! Configuration for downloaders and the HTTP transport.

use std::time::Duration;

/// Smallest chunk the partitioner will hand to a single fetcher (4 MiB).
pub const MIN_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default copy buffer size (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Progress reporting interval used when the total size is unknown (1 MiB).
pub const UNKNOWN_TOTAL_REPORT_INTERVAL: u64 = 1024 * 1024;

/// Default connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle-read timeout in seconds.
const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;

/// Default user agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("rangeload/", env!("CARGO_PKG_VERSION"));

/// Configuration for the shared HTTP transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,

    /// Maximum time between two reads of a response body.
    pub read_timeout: Duration,

    /// Optional limit on a whole request, body included.
    ///
    /// Unset by default: large transfers legitimately run for a long time.
    pub request_timeout: Option<Duration>,

    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,

    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout: Duration,

    /// User agent header value.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            request_timeout: None,
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl TransportConfig {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle-read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Limit the total duration of every request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the per-host idle connection limit.
    pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Configuration for a [`Downloader`](crate::Downloader).
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Concurrency budget used by the partitioner.
    ///
    /// `None` uses the machine's available parallelism.
    pub parallelism: Option<usize>,

    /// Maximum number of idle copy buffers kept for reuse.
    pub max_pooled_buffers: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            parallelism: None,
            max_pooled_buffers: 64,
        }
    }
}

impl DownloadConfig {
    /// Override the concurrency budget (minimum 1).
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism.max(1));
        self
    }

    /// Set how many idle copy buffers are retained.
    pub fn with_max_pooled_buffers(mut self, max: usize) -> Self {
        self.max_pooled_buffers = max;
        self
    }

    /// Resolve the concurrency budget for this machine.
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transport_config() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.request_timeout.is_none());
        assert!(config.user_agent.starts_with("rangeload/"));
    }

    #[test]
    fn test_transport_builder_pattern() {
        let config = TransportConfig::default()
            .with_connect_timeout(Duration::from_secs(5))
            .with_read_timeout(Duration::from_secs(10))
            .with_request_timeout(Duration::from_secs(600))
            .with_pool_max_idle_per_host(4)
            .with_user_agent("test-agent");

        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.pool_max_idle_per_host, 4);
        assert_eq!(config.user_agent, "test-agent");
    }

    #[test]
    fn test_parallelism_override() {
        let config = DownloadConfig::default().with_parallelism(3);
        assert_eq!(config.effective_parallelism(), 3);

        let config = DownloadConfig::default().with_parallelism(0);
        assert_eq!(config.effective_parallelism(), 1);
    }

    #[test]
    fn test_default_parallelism_is_positive() {
        assert!(DownloadConfig::default().effective_parallelism() >= 1);
    }
}
