//! File transfer over the sync sub-protocol

pub mod progress;
pub mod session;

pub use crate::protocol::sync::SYNC_DATA_MAX;
pub use progress::{NoProgress, SyncProgress};
pub use session::SyncSession;
