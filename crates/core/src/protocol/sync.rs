//! Sync sub-protocol frames
//!
//! Every frame starts with a 4 byte ASCII id followed by a little endian
//! u32 that is either a payload length or a value (e.g. the mtime of `DONE`).

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CoreError, Result};
use crate::types::{DirEntry, FileStat, FileStatV2, RemoteFileMode};

/// Maximum payload of a `DATA` frame
pub const SYNC_DATA_MAX: usize = 64 * 1024;

/// Maximum remote path length accepted by the daemon
pub const SYNC_PATH_MAX: usize = 1024;

pub const HEADER_LEN: usize = 8;

/// `STAT` answer body after the id
pub const STAT_V1_LEN: usize = 12;

/// `LST2`/`STA2` answer body after the id
pub const STAT_V2_LEN: usize = 68;

/// `DENT` record body after the id (name follows)
pub const DENT_LEN: usize = 16;

/// Frame ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncId {
    Send,
    Recv,
    Stat,
    Lst2,
    Sta2,
    List,
    Data,
    Done,
    Okay,
    Fail,
    Dent,
    Quit,
}

impl SyncId {
    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Self::Send => b"SEND",
            Self::Recv => b"RECV",
            Self::Stat => b"STAT",
            Self::Lst2 => b"LST2",
            Self::Sta2 => b"STA2",
            Self::List => b"LIST",
            Self::Data => b"DATA",
            Self::Done => b"DONE",
            Self::Okay => b"OKAY",
            Self::Fail => b"FAIL",
            Self::Dent => b"DENT",
            Self::Quit => b"QUIT",
        }
    }

    pub fn from_bytes(id: &[u8; 4]) -> Option<Self> {
        Some(match id {
            b"SEND" => Self::Send,
            b"RECV" => Self::Recv,
            b"STAT" => Self::Stat,
            b"LST2" => Self::Lst2,
            b"STA2" => Self::Sta2,
            b"LIST" => Self::List,
            b"DATA" => Self::Data,
            b"DONE" => Self::Done,
            b"OKAY" => Self::Okay,
            b"FAIL" => Self::Fail,
            b"DENT" => Self::Dent,
            b"QUIT" => Self::Quit,
            _ => return None,
        })
    }
}

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHeader {
    pub id: SyncId,
    pub value: u32,
}

/// Append a request frame carrying `payload` (usually a path)
pub fn put_request(buf: &mut BytesMut, id: SyncId, payload: &[u8]) {
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_slice(id.as_bytes());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
}

/// Append a header-only frame with a value
pub fn put_header(buf: &mut BytesMut, id: SyncId, value: u32) {
    buf.reserve(HEADER_LEN);
    buf.put_slice(id.as_bytes());
    buf.put_u32_le(value);
}

/// Path request, rejecting paths the daemon would refuse
pub fn put_path_request(buf: &mut BytesMut, id: SyncId, path: &str) -> Result<()> {
    if path.len() > SYNC_PATH_MAX {
        return Err(CoreError::InvalidArgument(format!(
            "remote path is {} bytes (max: {})",
            path.len(),
            SYNC_PATH_MAX
        )));
    }
    put_request(buf, id, path.as_bytes());
    Ok(())
}

pub async fn read_id<R>(reader: &mut R) -> Result<SyncId>
where
    R: AsyncRead + Unpin,
{
    let mut id = [0u8; 4];
    reader.read_exact(&mut id).await?;
    SyncId::from_bytes(&id).ok_or_else(|| {
        CoreError::Protocol(format!(
            "unknown sync frame id {:?}",
            String::from_utf8_lossy(&id)
        ))
    })
}

pub async fn read_header<R>(reader: &mut R) -> Result<SyncHeader>
where
    R: AsyncRead + Unpin,
{
    let id = read_id(reader).await?;
    let value = reader.read_u32_le().await?;
    Ok(SyncHeader { id, value })
}

/// Read the message of a `FAIL` frame whose header was already consumed
pub async fn read_fail_message<R>(reader: &mut R, len: u32) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = len as usize;
    if len > SYNC_DATA_MAX {
        return Err(CoreError::MessageTooLarge {
            size: len,
            max: SYNC_DATA_MAX,
        });
    }
    let mut message = vec![0u8; len];
    reader.read_exact(&mut message).await?;
    Ok(String::from_utf8_lossy(&message).into_owned())
}

/// Turn an unexpected header into an error, reading the message of a `FAIL`
pub async fn unexpected<R>(reader: &mut R, header: SyncHeader, expected: &str) -> CoreError
where
    R: AsyncRead + Unpin,
{
    match header.id {
        SyncId::Fail => match read_fail_message(reader, header.value).await {
            Ok(message) => CoreError::SyncFail(message),
            Err(e) => e,
        },
        other => CoreError::Protocol(format!(
            "expected {} but got {:?}",
            expected,
            String::from_utf8_lossy(other.as_bytes())
        )),
    }
}

/// Decode the body of a `STAT` answer
pub fn decode_stat_v1(mut body: &[u8]) -> Result<FileStat> {
    if body.len() < STAT_V1_LEN {
        return Err(CoreError::Protocol("truncated STAT answer".into()));
    }
    Ok(FileStat {
        mode: RemoteFileMode::from_bits(body.get_u32_le()),
        size: body.get_u32_le(),
        mtime: body.get_u32_le(),
    })
}

/// Decode the body of a `LST2`/`STA2` answer
///
/// A non-zero error field becomes [`CoreError::SyncFail`].
pub fn decode_stat_v2(mut body: &[u8], path: &str) -> Result<FileStatV2> {
    if body.len() < STAT_V2_LEN {
        return Err(CoreError::Protocol("truncated STA2/LST2 answer".into()));
    }
    let error = body.get_u32_le();
    if error != 0 {
        return Err(CoreError::SyncFail(format!(
            "stat '{}' failed: {}",
            path,
            errno_message(error)
        )));
    }
    Ok(FileStatV2 {
        dev: body.get_u64_le(),
        ino: body.get_u64_le(),
        mode: RemoteFileMode::from_bits(body.get_u32_le()),
        nlink: body.get_u32_le(),
        uid: body.get_u32_le(),
        gid: body.get_u32_le(),
        size: body.get_u64_le(),
        atime: body.get_i64_le(),
        mtime: body.get_i64_le(),
        ctime: body.get_i64_le(),
    })
}

/// Decode a `DENT` body (without the name) into (mode, size, mtime, name length)
pub fn decode_dent(mut body: &[u8]) -> Result<(RemoteFileMode, u32, u32, usize)> {
    if body.len() < DENT_LEN {
        return Err(CoreError::Protocol("truncated DENT record".into()));
    }
    let mode = RemoteFileMode::from_bits(body.get_u32_le());
    let size = body.get_u32_le();
    let mtime = body.get_u32_le();
    let name_len = body.get_u32_le() as usize;
    Ok((mode, size, mtime, name_len))
}

pub fn dir_entry(name: Vec<u8>, mode: RemoteFileMode, size: u32, mtime: u32) -> DirEntry {
    DirEntry {
        name: String::from_utf8_lossy(&name).into_owned(),
        mode,
        size,
        mtime,
    }
}

fn errno_message(errno: u32) -> String {
    match errno {
        1 => "Operation not permitted".to_string(),
        2 => "No such file or directory".to_string(),
        13 => "Permission denied".to_string(),
        20 => "Not a directory".to_string(),
        other => format!("errno {}", other),
    }
}
