//! Shell and abb command execution
//!
//! This module provides:
//! - Protocol negotiation (shell_v2, legacy exec/shell, abb)
//! - The [`ShellCommand`] builder and its lazy [`ShellOutput`] stream
//! - Collectors turning command output into values

pub mod collector;
pub mod command;
pub(crate) mod demux;
pub(crate) mod first_cause;
pub mod negotiate;
pub mod pipe;
pub(crate) mod stdin;

pub use collector::{
    BytesCollector, CollectorEvent, Emitter, ExitCodeReceiver, FnCollector, LineBatchesCollector,
    LinesCollector, NoCollector, RawChannelsCollector, RawShellOutput, ShellCollector,
    TextCollector, WriterCollector,
};
pub use command::{ShellCommand, ShellOutput};
pub use negotiate::{ForcedProtocol, ProtocolFamily, ProtocolOverrides, ShellProtocol};
pub use pipe::ShellPipe;
