//! Raw terminal mode for `shell -t`
//!
//! The remote pty does line editing and echo, so the local terminal must pass
//! keystrokes through untouched. The guard restores normal mode on drop, even
//! on panic.

use anyhow::{Context, Result};
use crossterm::terminal;
use std::io::IsTerminal;

pub struct RawModeGuard;

impl RawModeGuard {
    /// Enable raw mode if stdin is a terminal
    pub fn enable_if_tty() -> Result<Option<Self>> {
        if !std::io::stdin().is_terminal() {
            tracing::debug!("stdin is not a terminal, keeping cooked mode");
            return Ok(None);
        }
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        Ok(Some(Self))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// `TERM` to request for the remote pty
pub fn local_term() -> Option<String> {
    std::env::var("TERM").ok().filter(|term| !term.is_empty())
}
