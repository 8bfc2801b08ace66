//! Stdin forwarding
//!
//! Runs as its own task next to the output reader so a command echoing its
//! input (`cat`) streams instead of deadlocking on buffered stdin.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::{PacketKind, PacketWriter};
use crate::transport::{ActivityMonitor, InputChannel};

/// Forwards an [`InputChannel`] to a command
pub(crate) struct StdinForwarder<W> {
    pub input: Box<dyn InputChannel>,
    pub writer: W,
    pub framed: bool,
    /// Legacy protocols only: half-close the channel at end of input
    pub shutdown_output: bool,
    pub buffer_size: usize,
    pub activity: Option<ActivityMonitor>,
}

impl<W> StdinForwarder<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Forward until end of input or cancellation
    ///
    /// Cancellation is a quiet exit; errors of the input or the channel are
    /// returned as-is.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::trace!("Stdin forwarding cancelled");
                Ok(())
            }
            result = self.forward() => result,
        }
    }

    async fn forward(self) -> Result<()> {
        if self.framed {
            self.forward_framed().await
        } else {
            self.forward_raw().await
        }
    }

    async fn forward_framed(mut self) -> Result<()> {
        let mut packets = PacketWriter::new(self.writer);
        loop {
            let buf = packets.prepare(self.buffer_size.max(1));
            let n = self.input.read(buf).await?;
            if n == 0 {
                tracing::debug!("Stdin EOF, sending CLOSE_STDIN");
                packets.write_prepared(PacketKind::CloseStdin, 0).await?;
                return Ok(());
            }
            packets.write_prepared(PacketKind::Stdin, n).await?;
            if let Some(activity) = &self.activity {
                activity.record_activity();
            }
            tracing::trace!("Forwarded {} stdin bytes", n);
        }
    }

    async fn forward_raw(mut self) -> Result<()> {
        let mut buf = vec![0u8; self.buffer_size.max(1)];
        loop {
            let n = self.input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.writer.write_all(&buf[..n]).await?;
            self.writer.flush().await?;
            if let Some(activity) = &self.activity {
                activity.record_activity();
            }
            tracing::trace!("Forwarded {} stdin bytes", n);
        }

        if self.shutdown_output {
            tracing::debug!("Stdin EOF, shutting down channel output");
            self.writer.shutdown().await?;
        }
        Ok(())
    }
}
