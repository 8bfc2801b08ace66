//! Transfer progress callbacks

use async_trait::async_trait;

use crate::error::Result;

/// Observer of one file transfer
///
/// An error returned from any callback aborts the transfer and becomes its
/// result, whatever the daemon answered.
#[async_trait]
pub trait SyncProgress: Send {
    /// Before the first `DATA` frame
    async fn transfer_started(&mut self, _remote_path: &str) -> Result<()> {
        Ok(())
    }

    /// After each `DATA` frame, with the cumulative byte count
    async fn transfer_progress(&mut self, _remote_path: &str, _total_bytes: u64) -> Result<()> {
        Ok(())
    }

    /// Once the transfer ended, successfully or not
    async fn transfer_done(&mut self, _remote_path: &str, _total_bytes: u64) -> Result<()> {
        Ok(())
    }
}

/// Ignores progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl SyncProgress for NoProgress {}
