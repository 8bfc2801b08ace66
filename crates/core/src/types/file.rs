//! Remote file metadata returned by the sync service

use serde::{Deserialize, Serialize};

use super::RemoteFileMode;

/// `STAT` answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub mode: RemoteFileMode,
    pub size: u32,
    /// Seconds since the Unix epoch
    pub mtime: u32,
}

/// `LST2`/`STA2` answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatV2 {
    pub dev: u64,
    pub ino: u64,
    pub mode: RemoteFileMode,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// One `DENT` record of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub mode: RemoteFileMode,
    pub size: u32,
    pub mtime: u32,
}
