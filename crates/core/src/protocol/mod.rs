//! Wire formats spoken to the daemon and the device

pub mod crlf;
pub mod service;
pub mod shell_v2;
pub mod sync;

pub use crlf::StripCrLf;
pub use shell_v2::{PacketKind, PacketReader, PacketWriter};
pub use sync::{SyncHeader, SyncId};
