//! shell_v2 packet framing
//!
//! Every packet is `[1 byte kind][4 bytes length (little endian)][payload]`.
//! The same framing is used by the `abb` service.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CoreError, Result};

/// Size of the packet header
pub const HEADER_LEN: usize = 5;

/// Maximum accepted payload size (16MB)
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Packet kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    Exit = 3,
    CloseStdin = 4,
    WindowSizeChange = 5,
    Invalid = 255,
}

impl PacketKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            3 => Some(Self::Exit),
            4 => Some(Self::CloseStdin),
            5 => Some(Self::WindowSizeChange),
            255 => Some(Self::Invalid),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Encode one packet into a standalone buffer
pub fn encode_packet(kind: PacketKind, payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_PACKET_SIZE {
        return Err(CoreError::MessageTooLarge {
            size: payload.len(),
            max: MAX_PACKET_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(kind.as_u8());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Packet borrowed from the reader's payload buffer
#[derive(Debug)]
pub struct Packet<'a> {
    /// Raw kind byte, see [`Packet::kind`]
    pub kind: u8,
    pub payload: &'a [u8],
}

impl Packet<'_> {
    /// `None` for kinds this client does not know
    pub fn kind(&self) -> Option<PacketKind> {
        PacketKind::from_u8(self.kind)
    }
}

/// Reads packets off a byte stream
///
/// Payloads land in one buffer owned by the reader. The buffer only grows,
/// so a session reading many small packets allocates once.
pub struct PacketReader<R> {
    reader: R,
    payload: Vec<u8>,
}

impl<R> PacketReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, 0)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            payload: Vec::with_capacity(capacity),
        }
    }

    /// Read the next packet
    ///
    /// A short read at any point surfaces as [`CoreError::Io`].
    pub async fn read_packet(&mut self) -> Result<Packet<'_>> {
        let mut header = [0u8; HEADER_LEN];
        self.reader.read_exact(&mut header).await?;

        let kind = header[0];
        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > MAX_PACKET_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: len,
                max: MAX_PACKET_SIZE,
            });
        }

        self.payload.clear();
        self.payload.resize(len, 0);
        self.reader.read_exact(&mut self.payload).await?;

        tracing::trace!("Read shell packet kind={} len={}", kind, len);
        Ok(Packet {
            kind,
            payload: &self.payload,
        })
    }

    /// Current capacity of the payload buffer
    pub fn capacity(&self) -> usize {
        self.payload.capacity()
    }
}

/// Writes packets to a byte stream
pub struct PacketWriter<W> {
    writer: W,
    buf: Vec<u8>,
}

impl<W> PacketWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: Vec::new(),
        }
    }

    /// Payload area of the next packet, with header space reserved in front
    ///
    /// Fill it, then call [`PacketWriter::write_prepared`] with the number of
    /// bytes written. Avoids copying stdin chunks into a second buffer.
    pub fn prepare(&mut self, capacity: usize) -> &mut [u8] {
        let capacity = capacity.min(MAX_PACKET_SIZE);
        self.buf.resize(HEADER_LEN + capacity, 0);
        &mut self.buf[HEADER_LEN..]
    }

    pub async fn write_prepared(&mut self, kind: PacketKind, len: usize) -> Result<()> {
        let available = self.buf.len().saturating_sub(HEADER_LEN);
        if len > available {
            return Err(CoreError::InvalidState(format!(
                "prepared {} bytes but {} were reserved",
                len, available
            )));
        }

        self.buf[0] = kind.as_u8();
        self.buf[1..HEADER_LEN].copy_from_slice(&(len as u32).to_le_bytes());
        self.writer.write_all(&self.buf[..HEADER_LEN + len]).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
