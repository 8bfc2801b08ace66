//! Values produced by the built-in shell collectors

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate text output of a shell command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Aggregate binary output of a shell command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellBytesOutput {
    pub stdout: Bytes,
    pub stderr: Bytes,
    pub exit_code: i32,
}

/// One element of a line-oriented shell output stream
///
/// `ExitCode` is always the last element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ShellCommandOutputElement {
    StdoutLine(String),
    StderrLine(String),
    ExitCode(i32),
}

/// Prints the line contents, or the exit code
impl fmt::Display for ShellCommandOutputElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StdoutLine(line) | Self::StderrLine(line) => f.write_str(line),
            Self::ExitCode(code) => write!(f, "{}", code),
        }
    }
}

/// One element of a line-batch shell output stream: all complete lines of one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BatchShellCommandOutputElement {
    StdoutLines(Vec<String>),
    StderrLines(Vec<String>),
    ExitCode(i32),
}
