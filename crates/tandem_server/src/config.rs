//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the receiver.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Threads handling connections.
    pub worker_threads: usize,
    /// Accepted connections allowed to wait for a worker.
    pub max_pending_connections: usize,
    /// Read/write timeout applied to every accepted socket.
    pub request_timeout: Duration,
    /// Pause between accept attempts when no connection is waiting.
    pub accept_backoff: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            worker_threads: 4,
            max_pending_connections: 64,
            request_timeout: Duration::from_secs(30),
            accept_backoff: Duration::from_millis(50),
        }
    }

    /// Sets the number of worker threads (at least one).
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers.max(1);
        self
    }

    /// Sets the bound on queued connections.
    pub fn with_max_pending_connections(mut self, max: usize) -> Self {
        self.max_pending_connections = max;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the accept backoff.
    pub fn with_accept_backoff(mut self, backoff: Duration) -> Self {
        self.accept_backoff = backoff;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 5000)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.max_pending_connections, 64);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_worker_threads(0)
            .with_max_pending_connections(8)
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.max_pending_connections, 8);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
