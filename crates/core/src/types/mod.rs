//! Domain types shared by the shell and sync services

mod device;
mod file;
mod mode;
mod output;

pub use device::DeviceSelector;
pub use file::{DirEntry, FileStat, FileStatV2};
pub use mode::{FileType, Permissions, RemoteFileMode};
pub use output::{
    BatchShellCommandOutputElement, ShellBytesOutput, ShellCommandOutput,
    ShellCommandOutputElement,
};
