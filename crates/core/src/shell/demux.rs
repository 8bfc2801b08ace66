//! Command output readers
//!
//! Framed protocols (shell_v2, abb) carry typed packets; every packet is
//! read into the reader's reusable payload buffer and dispatched to the
//! collector until the `EXIT` packet ends the session. Legacy protocols
//! carry raw stdout until EOF.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CoreError, Result};
use crate::protocol::{PacketKind, PacketReader, StripCrLf};
use crate::shell::collector::{CollectorEvent, Emitter, ShellCollector};
use crate::transport::ActivityMonitor;

/// Read shell_v2 packets until `EXIT`
///
/// Payloads larger than `chunk_size` are handed to the collector in slices.
/// Data after the `EXIT` packet is never read.
pub(crate) async fn demux_framed<R, C>(
    reader: R,
    collector: &mut C,
    emitter: &Emitter<C::Output>,
    activity: Option<&ActivityMonitor>,
    chunk_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    C: ShellCollector,
{
    let chunk_size = chunk_size.max(1);
    let mut packets = PacketReader::with_capacity(reader, chunk_size);
    collector.handle(CollectorEvent::Start, emitter).await?;

    loop {
        let packet = packets.read_packet().await?;
        if let Some(activity) = activity {
            activity.record_activity();
        }

        match packet.kind() {
            Some(PacketKind::Stdout) => {
                for chunk in packet.payload.chunks(chunk_size) {
                    collector.handle(CollectorEvent::Stdout(chunk), emitter).await?;
                }
            }
            Some(PacketKind::Stderr) => {
                for chunk in packet.payload.chunks(chunk_size) {
                    collector.handle(CollectorEvent::Stderr(chunk), emitter).await?;
                }
            }
            Some(PacketKind::Exit) => {
                let exit_code = match packet.payload {
                    [code] => i32::from(*code),
                    other => {
                        return Err(CoreError::Protocol(format!(
                            "exit packet carries {} bytes instead of 1",
                            other.len()
                        )))
                    }
                };
                tracing::debug!("Received exit code {}", exit_code);
                collector
                    .handle(CollectorEvent::End { exit_code }, emitter)
                    .await?;
                return Ok(());
            }
            Some(kind @ (PacketKind::Stdin | PacketKind::CloseStdin | PacketKind::WindowSizeChange)) => {
                tracing::warn!("Skipping {:?} packet sent by the device", kind);
            }
            Some(PacketKind::Invalid) | None => {
                tracing::warn!("Invalid shell packet kind {}", packet.kind);
                return Err(CoreError::Protocol(format!(
                    "invalid shell packet kind {}",
                    packet.kind
                )));
            }
        }
    }
}

/// Read raw stdout until EOF, optionally rewriting `\r\n` to `\n`
///
/// Legacy protocols report exit code `0`.
pub(crate) async fn demux_raw<R, C>(
    mut reader: R,
    collector: &mut C,
    emitter: &Emitter<C::Output>,
    activity: Option<&ActivityMonitor>,
    strip_crlf: bool,
    buffer_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    C: ShellCollector,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut stripper = strip_crlf.then(StripCrLf::new);
    let mut stripped = Vec::new();

    collector.handle(CollectorEvent::Start, emitter).await?;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            tracing::debug!("Shell output EOF");
            break;
        }
        if let Some(activity) = activity {
            activity.record_activity();
        }

        match stripper.as_mut() {
            Some(stripper) => {
                stripped.clear();
                stripper.process(&buf[..n], &mut stripped);
                if !stripped.is_empty() {
                    collector.handle(CollectorEvent::Stdout(&stripped), emitter).await?;
                }
            }
            None => {
                collector.handle(CollectorEvent::Stdout(&buf[..n]), emitter).await?;
            }
        }
        tracing::trace!("Read {} bytes of raw shell output", n);
    }

    if let Some(stripper) = stripper.as_mut() {
        stripped.clear();
        stripper.finish(&mut stripped);
        if !stripped.is_empty() {
            collector.handle(CollectorEvent::Stdout(&stripped), emitter).await?;
        }
    }

    collector
        .handle(CollectorEvent::End { exit_code: 0 }, emitter)
        .await
}
