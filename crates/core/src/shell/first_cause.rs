//! Single-assignment error cell
//!
//! When a command is torn down, the stdin task and the output reader may
//! both fail: one with the original cause, the other with a consequence
//! such as "channel closed". Only the first recorded error is reported.

use std::sync::Mutex;

use crate::error::CoreError;

#[derive(Debug, Default)]
pub(crate) struct FirstCause {
    cell: Mutex<Option<CoreError>>,
}

impl FirstCause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless a cause is already set; returns whether it was kept
    pub fn record(&self, err: CoreError) -> bool {
        match self.cell.lock() {
            Ok(mut cell) if cell.is_none() => {
                tracing::debug!("First failure cause: {}", err);
                *cell = Some(err);
                true
            }
            Ok(_) => {
                tracing::debug!("Ignoring secondary failure: {}", err);
                false
            }
            Err(_) => false,
        }
    }

    pub fn take(&self) -> Option<CoreError> {
        self.cell.lock().ok().and_then(|mut cell| cell.take())
    }
}
