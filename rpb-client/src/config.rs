//! # Client Configuration
//!
//! Purpose: Collect the endpoint, pool size and socket timeouts in one
//! plain value that can be built once and cloned into every pool.

use std::time::Duration;

/// Default protocol-buffers endpoint of a local store node.
pub const DEFAULT_ADDR: &str = "127.0.0.1:8087";

/// Configuration for the client and its pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:8087".
    pub addr: String,
    /// Number of connections the pool opens. Must be at least one.
    pub pool_size: usize,
    /// Optional bound on how long `acquire` waits for a free connection.
    pub acquire_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: DEFAULT_ADDR.to_string(),
            pool_size: 1,
            acquire_timeout: None,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the given endpoint with default settings.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }
}
