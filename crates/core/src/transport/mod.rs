//! Channels to the daemon
//!
//! This module provides:
//! - The channel abstraction and a TCP implementation
//! - Daemon handshakes (transport switch, service request)
//! - Stdin sources
//! - Inactivity monitoring

pub mod activity;
pub mod channel;
pub mod input;
pub mod runner;

pub use activity::ActivityMonitor;
pub use channel::{BoxedChannel, ChannelProvider, DeviceChannel, TcpChannelProvider};
pub use input::{bytes_input, InputChannel, ReaderInput};
pub use runner::ServiceRunner;
