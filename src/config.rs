//! Configuration for the zlimdb client
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use crate::protocol::MAX_MESSAGE_SIZE;

/// Port the store listens on when an address omits one
pub const DEFAULT_PORT: u16 = 13211;

/// Address used by the command-line runner when none is given
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:13211";

/// Main configuration for a client instance
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // I/O Thread Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on a single selector wait.
    /// Disconnect requests are noticed within roughly this interval.
    pub poll_interval: Duration,

    /// Name given to the background I/O thread
    pub thread_name: String,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Bound on establishing the TCP connection (None = wait indefinitely)
    pub connect_timeout: Option<Duration>,

    /// Bound on waiting for each response page (None = wait indefinitely)
    pub request_timeout: Option<Duration>,

    /// Disable Nagle's algorithm on the connection
    pub nodelay: bool,

    // -------------------------------------------------------------------------
    // Protocol Configuration
    // -------------------------------------------------------------------------
    /// Largest single message accepted or sent (in bytes, header included)
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            thread_name: "zlimdb-io".to_string(),
            connect_timeout: Some(Duration::from_secs(5)),
            request_timeout: None,
            nodelay: true,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the selector wait granularity
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the I/O thread name
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-page response timeout
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    /// Set the maximum message size (in bytes)
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
