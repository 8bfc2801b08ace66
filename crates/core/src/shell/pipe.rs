//! Bounded byte pipes exposing command output as `AsyncRead`
//!
//! The writing side lives in a collector, the reading side is handed to the
//! caller. Channel capacity creates backpressure towards the output reader
//! when the caller drains slowly.

use bytes::Bytes;
use std::io;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

/// Readable end of a pipe
pub type ShellPipe = StreamReader<ReceiverStream<io::Result<Bytes>>, Bytes>;

/// Writable end of a pipe
///
/// Uses `Bytes` instead of `Vec<u8>` for zero-copy cloning.
pub struct OutputPipe {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl OutputPipe {
    /// Create new pipe holding at most `capacity` chunks
    pub fn new(capacity: usize) -> (Self, ShellPipe) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, StreamReader::new(ReceiverStream::new(rx)))
    }

    /// Send a chunk, waiting while the pipe is full
    ///
    /// Returns `false` once the reader was dropped; the chunk is discarded.
    pub async fn send(&self, data: Bytes) -> bool {
        if data.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(Ok(data)).await.is_ok()
    }

    /// End the pipe with `err` instead of a clean EOF, without waiting
    ///
    /// When the pipe is full the error is queued from a background task, so
    /// the reader still gets every chunk before it. Outside a runtime a full
    /// pipe ends with a clean EOF.
    pub fn abort(self, err: io::Error) {
        match self.tx.try_send(Err(err)) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(err)) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = self.tx.send(err).await;
                    });
                }
                Err(_) => tracing::debug!("No runtime to deliver pipe error, closing cleanly"),
            },
        }
    }
}
