//! Shell protocol negotiation
//!
//! Picks the wire protocol of a command from what the device supports and
//! what the caller allows or forces. Pure functions: capabilities are looked
//! up by the caller, nothing here performs I/O.

use std::fmt;

use crate::device::DeviceCapabilities;
use crate::error::{CoreError, Result};

/// Wire protocol of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellProtocol {
    /// `shell:` - raw stdout, no exit code
    Shell,
    /// `exec:` - raw stdout, no pty, no exit code
    Exec,
    /// `shell,v2,...:` - framed stdout/stderr/exit
    ShellV2,
    /// `abb:` - framed, like shell_v2
    Abb,
    /// `abb_exec:` - raw stdout
    AbbExec,
}

impl ShellProtocol {
    /// Whether the stream carries shell_v2 packets
    pub fn is_framed(self) -> bool {
        matches!(self, Self::ShellV2 | Self::Abb)
    }
}

impl fmt::Display for ShellProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shell => "shell",
            Self::Exec => "exec",
            Self::ShellV2 => "shell_v2",
            Self::Abb => "abb",
            Self::AbbExec => "abb_exec",
        })
    }
}

/// Logical command family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    Shell,
    Abb,
}

/// Protocol requested explicitly by the caller
///
/// For the abb family `ShellV2` means `abb` and `LegacyExec` means `abb_exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedProtocol {
    ShellV2,
    LegacyExec,
    LegacyShell,
}

/// Caller preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolOverrides {
    pub forced: Option<ForcedProtocol>,
    pub allow_shell_v2: bool,
    /// `exec` buffers differently than `shell`, so it is opt-in
    pub allow_legacy_exec: bool,
    pub allow_legacy_shell: bool,
}

impl Default for ProtocolOverrides {
    fn default() -> Self {
        Self {
            forced: None,
            allow_shell_v2: true,
            allow_legacy_exec: false,
            allow_legacy_shell: true,
        }
    }
}

/// Pick the protocol for a command
///
/// Fails with [`CoreError::InvalidArgument`] when the forced protocol is not
/// supported by the device, or when every allowed protocol is unsupported.
pub fn negotiate(
    family: ProtocolFamily,
    capabilities: &DeviceCapabilities,
    overrides: &ProtocolOverrides,
) -> Result<ShellProtocol> {
    if let Some(forced) = overrides.forced {
        let protocol = forced_protocol(family, forced)?;
        if !capabilities.supports(protocol) {
            return Err(CoreError::InvalidArgument(format!(
                "{} is not supported by the device (API level {})",
                protocol, capabilities.api_level
            )));
        }
        return Ok(protocol);
    }

    let candidates = match family {
        ProtocolFamily::Shell => vec![
            (ShellProtocol::ShellV2, overrides.allow_shell_v2),
            (ShellProtocol::Exec, overrides.allow_legacy_exec),
            (ShellProtocol::Shell, overrides.allow_legacy_shell),
        ],
        ProtocolFamily::Abb => vec![
            (ShellProtocol::Abb, overrides.allow_shell_v2),
            (ShellProtocol::AbbExec, overrides.allow_legacy_exec),
        ],
    };

    candidates
        .into_iter()
        .find(|&(protocol, allowed)| allowed && capabilities.supports(protocol))
        .map(|(protocol, _)| protocol)
        .ok_or_else(|| {
            CoreError::InvalidArgument(format!(
                "no allowed {} protocol is supported by the device (API level {})",
                match family {
                    ProtocolFamily::Shell => "shell",
                    ProtocolFamily::Abb => "abb",
                },
                capabilities.api_level
            ))
        })
}

fn forced_protocol(family: ProtocolFamily, forced: ForcedProtocol) -> Result<ShellProtocol> {
    match (family, forced) {
        (ProtocolFamily::Shell, ForcedProtocol::ShellV2) => Ok(ShellProtocol::ShellV2),
        (ProtocolFamily::Shell, ForcedProtocol::LegacyExec) => Ok(ShellProtocol::Exec),
        (ProtocolFamily::Shell, ForcedProtocol::LegacyShell) => Ok(ShellProtocol::Shell),
        (ProtocolFamily::Abb, ForcedProtocol::ShellV2) => Ok(ShellProtocol::Abb),
        (ProtocolFamily::Abb, ForcedProtocol::LegacyExec) => Ok(ShellProtocol::AbbExec),
        (ProtocolFamily::Abb, ForcedProtocol::LegacyShell) => Err(CoreError::InvalidArgument(
            "abb commands cannot run over the legacy shell protocol".into(),
        )),
    }
}

/// Service string starting `command` with `protocol`
pub fn wire_command(protocol: ShellProtocol, command: &str, term: Option<&str>) -> String {
    match protocol {
        ShellProtocol::Shell => format!("shell:{}", command),
        ShellProtocol::Exec => format!("exec:{}", command),
        ShellProtocol::ShellV2 => match term {
            Some(term) => format!("shell,v2,TERM={},raw:{}", term, command),
            None => format!("shell,v2,raw:{}", command),
        },
        ShellProtocol::Abb => format!("abb:{}", command),
        ShellProtocol::AbbExec => format!("abb_exec:{}", command),
    }
}

/// Join abb arguments with NUL separators
pub fn join_abb_args<S: AsRef<str>>(args: &[S]) -> Result<String> {
    if args.is_empty() {
        return Err(CoreError::InvalidArgument("abb command needs at least one argument".into()));
    }
    if let Some(arg) = args.iter().find(|a| a.as_ref().contains('\0')) {
        return Err(CoreError::InvalidArgument(format!(
            "abb argument {:?} contains a NUL character",
            arg.as_ref()
        )));
    }
    Ok(args.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\0"))
}
