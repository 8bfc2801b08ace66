//! adbwire Core - Device shell and sync services over the adb daemon
//!
//! This crate provides:
//! - Daemon service requests and device transport selection
//! - shell_v2 framing, legacy shell/exec and abb command execution
//! - Protocol negotiation from device capabilities
//! - The sync sub-protocol (push, pull, stat, list)
//! - Error types

use std::net::Ipv4Addr;

/// Default daemon host
pub const DEFAULT_DAEMON_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Default daemon port
pub const DEFAULT_DAEMON_PORT: u16 = 5037;

pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod services;
pub mod shell;
pub mod sync;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types
pub use config::ClientConfig;
pub use device::{CapabilitySource, DeviceCapabilities};
pub use error::{CoreError, Result};
pub use services::DeviceServices;
pub use shell::{ShellCollector, ShellCommand, ShellOutput, ShellProtocol};
pub use sync::{NoProgress, SyncProgress, SyncSession};
pub use types::{
    DeviceSelector, DirEntry, FileStat, FileStatV2, RemoteFileMode, ShellCommandOutput,
    ShellCommandOutputElement,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_daemon_address() {
        let config = ClientConfig::default();
        assert_eq!(config.daemon_addr.port(), DEFAULT_DAEMON_PORT);
        assert!(config.daemon_addr.ip().is_loopback());
    }
}
