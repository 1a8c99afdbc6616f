//! Server configuration
//!
//! Listen address and per-connection limits.

use std::time::Duration;

use crate::registry::MAX_CLIENTS;

/// Maximum accepted line length in bytes
pub const BUFFER_SIZE: usize = 2048;

/// Server configuration structure
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Registry capacity
    pub max_clients: usize,
    /// Longest line a client may send
    pub max_line_length: usize,
    /// Lines buffered per client before broadcasts to it are dropped
    pub outbound_queue: usize,
    /// Upper bound on a single socket write
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_clients: MAX_CLIENTS,
            max_line_length: BUFFER_SIZE,
            outbound_queue: 64,
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Default configuration listening on `port`
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// `host:port` string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
