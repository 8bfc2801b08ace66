//! adbwire command-line client
//! Features: shell_v2 shell with raw mode, push/pull with progress, stat, ls

mod progress;
mod raw_mode;

use adbwire_core::shell::WriterCollector;
use adbwire_core::{
    ClientConfig, DeviceSelector, DeviceServices, DirEntry, RemoteFileMode, DEFAULT_DAEMON_PORT,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use progress::TransferProgress;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// adbwire - shell and file transfer through the adb daemon
#[derive(Parser, Debug)]
#[command(name = "adbwire")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shell and file transfer through the adb daemon", long_about = None)]
struct Args {
    /// Daemon host
    #[arg(short = 'H', long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    host: IpAddr,

    /// Daemon port
    #[arg(short = 'P', long, default_value_t = DEFAULT_DAEMON_PORT)]
    port: u16,

    /// Device serial (default: the only connected device)
    #[arg(short, long)]
    serial: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Print results as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command, or an interactive shell without one
    Shell {
        /// Allocate a pty and switch the local terminal to raw mode
        #[arg(short = 't', long)]
        tty: bool,

        /// Forward local stdin to the command
        #[arg(long)]
        stdin: bool,

        /// Use the legacy shell protocol
        #[arg(long)]
        legacy: bool,

        /// Abort after this many milliseconds without output
        #[arg(long)]
        idle_timeout_ms: Option<u64>,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Copy a local file to the device
    Push {
        local: PathBuf,
        remote: String,
        /// Octal permission bits (default: those of the local file)
        #[arg(long)]
        mode: Option<String>,
    },
    /// Copy a device file to the local machine
    Pull { remote: String, local: PathBuf },
    /// Show mode, size and mtime of a device file
    Stat {
        remote: String,
        /// Use STA2 (64-bit sizes, timestamps of all kinds)
        #[arg(long)]
        v2: bool,
    },
    /// List a device directory
    Ls { remote: String },
    /// Show API level and daemon features of the device
    Features,
}

#[derive(Serialize)]
struct FeaturesReport<'a> {
    device: String,
    api_level: u32,
    features: Vec<&'a str>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let config = ClientConfig::default()
        .with_daemon_addr(SocketAddr::new(args.host, args.port));
    let services = DeviceServices::connect(config);
    let device = match &args.serial {
        Some(serial) => DeviceSelector::serial(serial.clone()),
        None => DeviceSelector::Any,
    };
    tracing::debug!("Using device {} through {}", device, services.config().daemon_addr);

    match args.command {
        Command::Shell {
            tty,
            stdin,
            legacy,
            idle_timeout_ms,
            command,
        } => {
            let timeout = idle_timeout_ms.map(Duration::from_millis);
            let exit_code = if args.json {
                shell_json(&services, &device, command.join(" "), legacy, timeout).await?
            } else {
                shell(&services, &device, command.join(" "), tty, stdin, legacy, timeout).await?
            };
            std::process::exit(exit_code);
        }
        Command::Push {
            local,
            remote,
            mode,
        } => push(&services, &device, local, &remote, mode.as_deref(), args.json).await,
        Command::Pull { remote, local } => {
            pull(&services, &device, &remote, local, args.json).await
        }
        Command::Stat { remote, v2 } => stat(&services, &device, &remote, v2, args.json).await,
        Command::Ls { remote } => ls(&services, &device, &remote, args.json).await,
        Command::Features => features(&services, &device, args.json).await,
    }
}

async fn shell(
    services: &DeviceServices,
    device: &DeviceSelector,
    command: String,
    tty: bool,
    forward_stdin: bool,
    legacy: bool,
    idle_timeout: Option<Duration>,
) -> Result<i32> {
    let mut builder = services.shell_command(device, command);
    if legacy {
        builder = builder.force_legacy_shell();
    }
    if let Some(timeout) = idle_timeout {
        builder = builder.with_command_output_timeout(timeout);
    }
    if tty {
        if let Some(term) = raw_mode::local_term() {
            builder = builder.with_term(term);
        }
    }
    if tty || forward_stdin {
        builder = builder.with_stdin_reader(tokio::io::stdin());
    }

    // Raw mode only while the command runs
    let _guard = if tty {
        raw_mode::RawModeGuard::enable_if_tty()?
    } else {
        None
    };

    let mut output = builder
        .with_collector(WriterCollector::new(tokio::io::stdout(), tokio::io::stderr()))
        .execute()?;

    let mut exit_code = 0;
    while let Some(item) = output.next().await {
        exit_code = item.context("Shell command failed")?;
    }
    Ok(exit_code)
}

async fn shell_json(
    services: &DeviceServices,
    device: &DeviceSelector,
    command: String,
    legacy: bool,
    idle_timeout: Option<Duration>,
) -> Result<i32> {
    let mut builder = services.shell_command(device, command);
    if legacy {
        builder = builder.force_legacy_shell();
    }
    if let Some(timeout) = idle_timeout {
        builder = builder.with_command_output_timeout(timeout);
    }
    let mut output = builder.with_text_collector().execute()?;

    let result = output
        .next()
        .await
        .context("Shell command produced no output")?
        .context("Shell command failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.exit_code)
}

async fn push(
    services: &DeviceServices,
    device: &DeviceSelector,
    local: PathBuf,
    remote: &str,
    mode: Option<&str>,
    quiet: bool,
) -> Result<()> {
    let mut file = tokio::fs::File::open(&local)
        .await
        .with_context(|| format!("Failed to open {}", local.display()))?;
    let metadata = file.metadata().await?;

    let mode = match mode {
        Some(octal) => RemoteFileMode::from_bits(
            u32::from_str_radix(octal, 8).with_context(|| format!("Invalid mode '{}'", octal))?,
        ),
        None => local_mode(&metadata),
    };
    let mtime = metadata.modified().ok();

    let mut progress = TransferProgress::new(quiet);
    services
        .sync_send(device, &mut file, remote, mode, mtime, &mut progress)
        .await
        .with_context(|| format!("Failed to push {} to {}", local.display(), remote))?;
    tracing::info!("Pushed {} bytes to {}", metadata.len(), remote);
    Ok(())
}

async fn pull(
    services: &DeviceServices,
    device: &DeviceSelector,
    remote: &str,
    local: PathBuf,
    quiet: bool,
) -> Result<()> {
    let mut file = tokio::fs::File::create(&local)
        .await
        .with_context(|| format!("Failed to create {}", local.display()))?;

    let mut progress = TransferProgress::new(quiet);
    services
        .sync_recv(device, remote, &mut file, &mut progress)
        .await
        .with_context(|| format!("Failed to pull {}", remote))?;
    Ok(())
}

async fn stat(
    services: &DeviceServices,
    device: &DeviceSelector,
    remote: &str,
    v2: bool,
    json: bool,
) -> Result<()> {
    if v2 {
        let mut session = services.sync(device).await?;
        let stat = session.stat_v2(remote).await?;
        session.close().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&stat)?);
        } else {
            println!(
                "{} {:>10} {} {}",
                stat.mode,
                stat.size,
                format_time(stat.mtime),
                remote
            );
        }
        return Ok(());
    }

    let stat = services.sync_stat(device, remote).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stat)?);
    } else {
        println!(
            "{} {:>10} {} {}",
            stat.mode,
            stat.size,
            format_time(i64::from(stat.mtime)),
            remote
        );
    }
    Ok(())
}

async fn ls(
    services: &DeviceServices,
    device: &DeviceSelector,
    remote: &str,
    json: bool,
) -> Result<()> {
    let mut session = services.sync(device).await?;
    let mut entries = session
        .list(remote)
        .await
        .with_context(|| format!("Failed to list {}", remote))?;
    session.close().await?;

    entries.retain(|entry| entry.name != "." && entry.name != "..");
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!("{}", format_entry(entry));
        }
    }
    Ok(())
}

async fn features(services: &DeviceServices, device: &DeviceSelector, json: bool) -> Result<()> {
    let capabilities = services.capabilities(device).await?;
    let mut features: Vec<&str> = capabilities.features.iter().map(String::as_str).collect();
    features.sort_unstable();

    if json {
        let report = FeaturesReport {
            device: device.to_string(),
            api_level: capabilities.api_level,
            features,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("api level: {}", capabilities.api_level);
        println!("features: {}", features.join(","));
    }
    Ok(())
}

fn format_entry(entry: &DirEntry) -> String {
    format!(
        "{} {:>10} {} {}",
        entry.mode,
        entry.size,
        format_time(i64::from(entry.mtime)),
        entry.name
    )
}

fn format_time(seconds: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(seconds, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

#[cfg(unix)]
fn local_mode(metadata: &std::fs::Metadata) -> RemoteFileMode {
    use std::os::unix::fs::PermissionsExt;
    RemoteFileMode::from_bits(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn local_mode(_metadata: &std::fs::Metadata) -> RemoteFileMode {
    RemoteFileMode::DEFAULT
}

/// Setup logging with tracing-subscriber, on stderr so stdout stays clean
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::WARN);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
