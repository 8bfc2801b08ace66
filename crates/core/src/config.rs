//! Client configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::{DEFAULT_DAEMON_HOST, DEFAULT_DAEMON_PORT};

/// Settings shared by every request made through [`crate::DeviceServices`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon socket address
    pub daemon_addr: SocketAddr,

    /// Time allowed to open a channel and get the service accepted
    pub connect_timeout: Duration,

    /// Read/write chunk size for shell commands
    pub buffer_size: usize,

    /// Chunk size for sync transfers (capped at [`crate::sync::SYNC_DATA_MAX`])
    pub sync_buffer_size: usize,

    /// `TERM` passed to shell_v2 commands
    pub term: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            daemon_addr: SocketAddr::from((DEFAULT_DAEMON_HOST, DEFAULT_DAEMON_PORT)),
            connect_timeout: Duration::from_secs(10),
            buffer_size: 8 * 1024,           // 8KB
            sync_buffer_size: 64 * 1024,     // 64KB
            term: None,
        }
    }
}

impl ClientConfig {
    pub fn with_daemon_addr(mut self, addr: SocketAddr) -> Self {
        self.daemon_addr = addr;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Zero is bumped to one byte
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn with_sync_buffer_size(mut self, size: usize) -> Self {
        self.sync_buffer_size = size.max(1);
        self
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }
}
