//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync coordinators.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// How long an echo suppression entry stays valid.
    pub suppression_ttl: Duration,
    /// Watch mode settings.
    pub watch: WatchConfig,
    /// Timeout for establishing a connection to a remote peer.
    pub connect_timeout: Duration,
    /// Read/write timeout on a remote connection.
    pub io_timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        let poll_interval = Duration::from_secs(2);
        Self {
            poll_interval,
            suppression_ttl: poll_interval * 2,
            watch: WatchConfig::default(),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the poll interval.
    ///
    /// The suppression TTL follows at twice the interval unless it is set
    /// explicitly afterwards.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.suppression_ttl = interval * 2;
        self
    }

    /// Sets the echo suppression TTL.
    pub fn with_suppression_ttl(mut self, ttl: Duration) -> Self {
        self.suppression_ttl = ttl;
        self
    }

    /// Sets the watch mode configuration.
    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    /// Sets the remote connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the remote read/write timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for watch mode detection.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Interval a file size must stay unchanged before it is reported.
    pub debounce: Duration,
    /// Maximum number of size polls before giving up on a file.
    pub stabilize_attempts: u32,
    /// How long to block on the notification channel before checking for shutdown.
    pub event_timeout: Duration,
}

impl WatchConfig {
    /// Creates a watch configuration with default values.
    pub fn new() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            stabilize_attempts: 50,
            event_timeout: Duration::from_millis(250),
        }
    }

    /// Sets the debounce interval.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the maximum number of stabilize attempts.
    pub fn with_stabilize_attempts(mut self, attempts: u32) -> Self {
        self.stabilize_attempts = attempts;
        self
    }

    /// Sets the notification wait timeout.
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new()
    }
}
