//! Remote file mode bits

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// POSIX permission flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        const SET_UID = 0o4000;
        const SET_GID = 0o2000;
        const STICKY = 0o1000;
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXECUTE = 0o100;
        const GROUP_READ = 0o040;
        const GROUP_WRITE = 0o020;
        const GROUP_EXECUTE = 0o010;
        const OTHERS_READ = 0o004;
        const OTHERS_WRITE = 0o002;
        const OTHERS_EXECUTE = 0o001;
    }
}

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// File type encoded in the upper mode bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

/// Mode of a remote file: permission bits plus file-type bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteFileMode(u32);

impl RemoteFileMode {
    /// `rw-r--r--`
    pub const DEFAULT: RemoteFileMode = RemoteFileMode(0o644);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Mode with only permission bits set, as sent with `SEND`
    pub fn from_permissions(permissions: Permissions) -> Self {
        Self(permissions.bits())
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn permissions(self) -> Permissions {
        Permissions::from_bits_truncate(self.0)
    }

    pub fn file_type(self) -> FileType {
        match self.0 & S_IFMT {
            S_IFREG => FileType::Regular,
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            S_IFCHR => FileType::CharDevice,
            S_IFBLK => FileType::BlockDevice,
            S_IFIFO => FileType::Fifo,
            S_IFSOCK => FileType::Socket,
            _ => FileType::Unknown,
        }
    }

    pub fn is_directory(self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn is_regular_file(self) -> bool {
        self.file_type() == FileType::Regular
    }

    pub fn is_symlink(self) -> bool {
        self.file_type() == FileType::Symlink
    }
}

impl Default for RemoteFileMode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<Permissions> for RemoteFileMode {
    fn from(permissions: Permissions) -> Self {
        Self::from_permissions(permissions)
    }
}

/// `ls -l` style rendering, e.g. `-rw-r--r--`
impl fmt::Display for RemoteFileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.file_type() {
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            FileType::CharDevice => 'c',
            FileType::BlockDevice => 'b',
            FileType::Fifo => 'p',
            FileType::Socket => 's',
            FileType::Regular | FileType::Unknown => '-',
        };
        let p = self.permissions();
        let flag = |set: Permissions, c: char| if p.contains(set) { c } else { '-' };
        write!(
            f,
            "{}{}{}{}{}{}{}{}{}{}",
            kind,
            flag(Permissions::OWNER_READ, 'r'),
            flag(Permissions::OWNER_WRITE, 'w'),
            flag(Permissions::OWNER_EXECUTE, 'x'),
            flag(Permissions::GROUP_READ, 'r'),
            flag(Permissions::GROUP_WRITE, 'w'),
            flag(Permissions::GROUP_EXECUTE, 'x'),
            flag(Permissions::OTHERS_READ, 'r'),
            flag(Permissions::OTHERS_WRITE, 'w'),
            flag(Permissions::OTHERS_EXECUTE, 'x'),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_permissions() {
        let mode = RemoteFileMode::from_permissions(Permissions::OWNER_READ | Permissions::OWNER_WRITE);
        assert_eq!(mode.bits(), 0o600);
        assert_eq!(mode.file_type(), FileType::Unknown);
    }

    #[test]
    fn test_file_type_bits() {
        assert!(RemoteFileMode::from_bits(0o100644).is_regular_file());
        assert!(RemoteFileMode::from_bits(0o040755).is_directory());
        assert!(RemoteFileMode::from_bits(0o120777).is_symlink());
        assert_eq!(
            RemoteFileMode::from_bits(0o100644).permissions(),
            Permissions::OWNER_READ | Permissions::OWNER_WRITE | Permissions::GROUP_READ | Permissions::OTHERS_READ
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(RemoteFileMode::from_bits(0o040755).to_string(), "drwxr-xr-x");
        assert_eq!(RemoteFileMode::from_bits(0o100600).to_string(), "-rw-------");
    }
}
