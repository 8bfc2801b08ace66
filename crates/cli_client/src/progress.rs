//! Transfer progress on stderr
//!
//! Redraws a single status line per transfer: bytes so far and the average
//! rate. Silent when stderr is not a terminal or `--json` output is requested.

use adbwire_core::{Result, SyncProgress};
use async_trait::async_trait;
use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};

/// Minimum delay between two redraws
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

pub struct TransferProgress {
    enabled: bool,
    started: Instant,
    last_redraw: Option<Instant>,
}

impl TransferProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            enabled: !quiet && std::io::stderr().is_terminal(),
            started: Instant::now(),
            last_redraw: None,
        }
    }

    fn draw(&mut self, remote_path: &str, total_bytes: u64, force: bool) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        if !force && self.last_redraw.is_some_and(|at| now - at < REDRAW_INTERVAL) {
            return;
        }
        self.last_redraw = Some(now);

        let elapsed = self.started.elapsed().as_secs_f64().max(0.001);
        let rate = total_bytes as f64 / elapsed;
        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "\r\x1b[2K{}: {} ({}/s)",
            remote_path,
            human_bytes(total_bytes as f64),
            human_bytes(rate)
        );
        let _ = stderr.flush();
    }
}

#[async_trait]
impl SyncProgress for TransferProgress {
    async fn transfer_started(&mut self, remote_path: &str) -> Result<()> {
        self.started = Instant::now();
        self.last_redraw = None;
        tracing::debug!("Transfer of {} started", remote_path);
        Ok(())
    }

    async fn transfer_progress(&mut self, remote_path: &str, total_bytes: u64) -> Result<()> {
        self.draw(remote_path, total_bytes, false);
        Ok(())
    }

    async fn transfer_done(&mut self, remote_path: &str, total_bytes: u64) -> Result<()> {
        self.draw(remote_path, total_bytes, true);
        if self.enabled {
            let _ = writeln!(std::io::stderr());
        }
        tracing::debug!(
            "Transfer of {} ended after {} bytes in {:?}",
            remote_path,
            total_bytes,
            self.started.elapsed()
        );
        Ok(())
    }
}

fn human_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
