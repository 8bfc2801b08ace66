//! Daemon service requests
//!
//! Request: `<4 hex digits length><service>`.
//! Response: `OKAY`, or `FAIL<4 hex digits length><message>`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CoreError, Result};

/// Largest service string expressible with a 4 hex digit prefix
pub const MAX_SERVICE_LENGTH: usize = 0xFFFF;

const OKAY: &[u8; 4] = b"OKAY";
const FAIL: &[u8; 4] = b"FAIL";

/// Encode a service request with its hex length prefix
pub fn encode_request(service: &str) -> Result<Vec<u8>> {
    if service.len() > MAX_SERVICE_LENGTH {
        return Err(CoreError::MessageTooLarge {
            size: service.len(),
            max: MAX_SERVICE_LENGTH,
        });
    }

    let mut buf = Vec::with_capacity(4 + service.len());
    buf.extend_from_slice(format!("{:04x}", service.len()).as_bytes());
    buf.extend_from_slice(service.as_bytes());
    Ok(buf)
}

/// Parse a 4 hex digit length prefix
pub fn parse_hex_length(prefix: &[u8; 4]) -> Result<usize> {
    std::str::from_utf8(prefix)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| {
            CoreError::Protocol(format!(
                "invalid length prefix {:?}",
                String::from_utf8_lossy(prefix)
            ))
        })
}

pub async fn write_request<W>(writer: &mut W, service: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let request = encode_request(service)?;
    writer.write_all(&request).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the `OKAY`/`FAIL` status of the last request
///
/// `FAIL` becomes [`CoreError::DaemonFail`] carrying the daemon message.
pub async fn read_status<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut status = [0u8; 4];
    reader.read_exact(&mut status).await?;

    match &status {
        OKAY => Ok(()),
        FAIL => {
            let message = read_length_prefixed(reader).await?;
            Err(CoreError::DaemonFail(message))
        }
        other => Err(CoreError::Protocol(format!(
            "unexpected daemon status {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Read a hex length prefixed string
pub async fn read_length_prefixed<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let len = parse_hex_length(&prefix)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(String::from_utf8_lossy(&payload).into_owned())
}
