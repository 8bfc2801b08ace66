//! In-memory daemon for tests
//!
//! Speaks the host, shell (v2 and legacy), abb and sync protocols over
//! `tokio::io::duplex` channels, against a set of fake devices with their
//! own file trees.
//!
//! Shell commands understood by every device:
//! - `echo <text>`, `cat`, `getprop ro.build.version.sdk`
//! - `script:<step>;<step>...` with steps `out=<text>`, `err=<text>`,
//!   `sleep=<ms>`, `trickle=<interval ms>/<total ms>` (one `.` per interval),
//!   `exit=<code>` and `invalid` (a packet of kind 255)

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::config::ClientConfig;
use crate::device::{feature, CapabilitySource};
use crate::error::{CoreError, Result};
use crate::protocol::service::parse_hex_length;
use crate::protocol::shell_v2::encode_packet;
use crate::protocol::PacketKind;
use crate::services::DeviceServices;
use crate::transport::{BoxedChannel, ChannelProvider};
use crate::types::DeviceSelector;

const S_IFREG: u32 = 0o100000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FakeFile {
    pub data: Vec<u8>,
    pub mode: u32,
    pub mtime: u32,
}

struct FakeDevice {
    api_level: u32,
    files: BTreeMap<String, FakeFile>,
}

#[derive(Default)]
struct State {
    devices: Mutex<BTreeMap<String, FakeDevice>>,
    services: Mutex<Vec<String>>,
    channels_opened: AtomicUsize,
    capability_queries: AtomicUsize,
    max_data_frame: AtomicUsize,
    stall: AtomicBool,
}

/// Device target named by a host request
enum Target {
    Serial(String),
    TransportId(u64),
    Any,
}

impl From<&DeviceSelector> for Target {
    fn from(device: &DeviceSelector) -> Self {
        match device {
            DeviceSelector::Serial(serial) => Target::Serial(serial.clone()),
            DeviceSelector::TransportId(id) => Target::TransportId(*id),
            DeviceSelector::Any | DeviceSelector::Usb | DeviceSelector::Local => Target::Any,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeDaemon {
    state: Arc<State>,
}

impl FakeDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, serial: &str, api_level: u32) {
        self.state.devices.lock().unwrap().insert(
            serial.to_string(),
            FakeDevice {
                api_level,
                files: BTreeMap::new(),
            },
        );
    }

    /// Accept channels but never answer on them
    pub fn stall_handshakes(&self, stall: bool) {
        self.state.stall.store(stall, Ordering::SeqCst);
    }

    pub fn channels_opened(&self) -> usize {
        self.state.channels_opened.load(Ordering::SeqCst)
    }

    /// Feature queries answered through [`CapabilitySource`]
    pub fn capability_queries(&self) -> usize {
        self.state.capability_queries.load(Ordering::SeqCst)
    }

    /// Last service requested on a device
    pub fn last_service(&self) -> Option<String> {
        self.state.services.lock().unwrap().last().cloned()
    }

    /// Largest `DATA` payload received by `SEND`
    pub fn max_sync_data_frame(&self) -> usize {
        self.state.max_data_frame.load(Ordering::SeqCst)
    }

    pub fn put_file(&self, serial: &str, path: &str, data: Vec<u8>, mode: u32, mtime: u32) {
        let mut devices = self.state.devices.lock().unwrap();
        let device = devices.get_mut(serial).unwrap();
        device
            .files
            .insert(path.to_string(), FakeFile { data, mode, mtime });
    }

    pub fn file(&self, serial: &str, path: &str) -> Option<FakeFile> {
        let devices = self.state.devices.lock().unwrap();
        devices.get(serial)?.files.get(path).cloned()
    }

    /// Services using this daemon both for channels and capabilities
    pub fn services(&self) -> DeviceServices {
        self.services_with(ClientConfig::default())
    }

    pub fn services_with(&self, config: ClientConfig) -> DeviceServices {
        DeviceServices::new(Arc::new(self.clone()), Arc::new(self.clone()), config)
    }

    fn resolve(&self, target: &Target) -> std::result::Result<(String, u32), String> {
        let devices = self.state.devices.lock().unwrap();
        match target {
            Target::Serial(serial) => devices
                .get(serial)
                .map(|d| (serial.clone(), d.api_level))
                .ok_or_else(|| format!("device '{}' not found", serial)),
            Target::TransportId(id) => devices
                .iter()
                .nth((*id as usize).wrapping_sub(1))
                .map(|(serial, d)| (serial.clone(), d.api_level))
                .ok_or_else(|| format!("no device with transport id '{}'", id)),
            Target::Any => match devices.len() {
                0 => Err("no devices/emulators found".to_string()),
                1 => devices
                    .iter()
                    .next()
                    .map(|(serial, d)| (serial.clone(), d.api_level))
                    .ok_or_else(|| "no devices/emulators found".to_string()),
                _ => Err("more than one device/emulator".to_string()),
            },
        }
    }

    async fn serve(self, mut stream: DuplexStream) -> io::Result<()> {
        if self.state.stall.load(Ordering::SeqCst) {
            // Keep the channel open without ever answering
            std::future::pending::<()>().await;
        }

        let request = read_request(&mut stream).await?;
        if let Some(target) = parse_features(&request) {
            return match self.resolve(&target) {
                Ok((_, api_level)) => {
                    okay(&mut stream).await?;
                    let list = features_for(api_level).join(",");
                    let mut answer = format!("{:04x}", list.len()).into_bytes();
                    answer.extend_from_slice(list.as_bytes());
                    stream.write_all(&answer).await
                }
                Err(message) => fail(&mut stream, &message).await,
            };
        }
        let Some(target) = parse_transport(&request) else {
            return fail(&mut stream, &format!("unknown host service '{}'", request)).await;
        };
        let (serial, api_level) = match self.resolve(&target) {
            Ok(device) => device,
            Err(message) => return fail(&mut stream, &message).await,
        };
        okay(&mut stream).await?;

        let service = read_request(&mut stream).await?;
        self.state.services.lock().unwrap().push(service.clone());
        let supports_v2 = api_level >= 24;
        let supports_abb = api_level >= 30;

        if service == "sync:" {
            okay(&mut stream).await?;
            return self.serve_sync(stream, &serial).await;
        }
        if let Some(rest) = service.strip_prefix("shell,v2,") {
            if !supports_v2 {
                return fail(&mut stream, "unknown service").await;
            }
            let command = rest.split_once(':').map(|(_, cmd)| cmd).unwrap_or("");
            okay(&mut stream).await?;
            return FakeShell::framed(stream, api_level).run(command).await;
        }
        if let Some(command) = service.strip_prefix("shell:") {
            okay(&mut stream).await?;
            return FakeShell::raw(stream, api_level, api_level <= 23).run(command).await;
        }
        if let Some(command) = service.strip_prefix("exec:") {
            if api_level < 21 {
                return fail(&mut stream, "unknown service").await;
            }
            okay(&mut stream).await?;
            return FakeShell::raw(stream, api_level, false).run(command).await;
        }
        if let Some(args) = service.strip_prefix("abb:") {
            if !supports_abb {
                return fail(&mut stream, "unknown service").await;
            }
            okay(&mut stream).await?;
            return FakeShell::framed(stream, api_level).run_abb(args).await;
        }
        if let Some(args) = service.strip_prefix("abb_exec:") {
            if !supports_abb {
                return fail(&mut stream, "unknown service").await;
            }
            okay(&mut stream).await?;
            return FakeShell::raw(stream, api_level, false).run_abb(args).await;
        }
        fail(&mut stream, &format!("unknown service '{}'", service)).await
    }

    async fn serve_sync(self, mut stream: DuplexStream, serial: &str) -> io::Result<()> {
        loop {
            let mut id = [0u8; 4];
            match stream.read_exact(&mut id).await {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            }
            let len = stream.read_u32_le().await? as usize;

            match &id {
                b"QUIT" => return Ok(()),
                b"SEND" => {
                    let target = read_string(&mut stream, len).await?;
                    let (path, mode) = target.rsplit_once(',').unwrap_or((target.as_str(), "0"));
                    let mode: u32 = mode.parse().unwrap_or(0);
                    let mut data = Vec::new();
                    let mtime = loop {
                        let mut id = [0u8; 4];
                        stream.read_exact(&mut id).await?;
                        let value = stream.read_u32_le().await?;
                        match &id {
                            b"DATA" => {
                                let len = value as usize;
                                self.state.max_data_frame.fetch_max(len, Ordering::SeqCst);
                                let start = data.len();
                                data.resize(start + len, 0);
                                stream.read_exact(&mut data[start..]).await?;
                            }
                            b"DONE" => break value,
                            _ => return sync_fail(&mut stream, "expected DATA or DONE").await,
                        }
                    };
                    if path.starts_with("/readonly/") {
                        sync_fail(&mut stream, "couldn't create file: Read-only file system")
                            .await?;
                        continue;
                    }
                    self.with_files(serial, |files| {
                        files.insert(
                            path.to_string(),
                            FakeFile {
                                data,
                                mode: S_IFREG | (mode & 0o7777),
                                mtime,
                            },
                        );
                    });
                    stream.write_all(b"OKAY\0\0\0\0").await?;
                }
                b"RECV" => {
                    let path = read_string(&mut stream, len).await?;
                    let Some(file) = self.file(serial, &path) else {
                        sync_fail(&mut stream, "open failed: No such file or directory").await?;
                        continue;
                    };
                    for chunk in file.data.chunks(64 * 1024) {
                        stream.write_all(b"DATA").await?;
                        stream.write_all(&(chunk.len() as u32).to_le_bytes()).await?;
                        stream.write_all(chunk).await?;
                    }
                    stream.write_all(b"DONE\0\0\0\0").await?;
                }
                b"STAT" => {
                    let path = read_string(&mut stream, len).await?;
                    let (mode, size, mtime) = match self.file(serial, &path) {
                        Some(file) => (file.mode, file.data.len() as u32, file.mtime),
                        None => (0, 0, 0),
                    };
                    let mut answer = b"STAT".to_vec();
                    for value in [mode, size, mtime] {
                        answer.extend_from_slice(&value.to_le_bytes());
                    }
                    stream.write_all(&answer).await?;
                }
                b"STA2" | b"LST2" => {
                    let path = read_string(&mut stream, len).await?;
                    let mut answer = id.to_vec();
                    match self.file(serial, &path) {
                        Some(file) => {
                            answer.extend_from_slice(&0u32.to_le_bytes()); // error
                            answer.extend_from_slice(&1u64.to_le_bytes()); // dev
                            answer.extend_from_slice(&42u64.to_le_bytes()); // ino
                            answer.extend_from_slice(&file.mode.to_le_bytes());
                            answer.extend_from_slice(&1u32.to_le_bytes()); // nlink
                            answer.extend_from_slice(&2000u32.to_le_bytes()); // uid
                            answer.extend_from_slice(&2000u32.to_le_bytes()); // gid
                            answer.extend_from_slice(&(file.data.len() as u64).to_le_bytes());
                            for time in [file.mtime, file.mtime, file.mtime] {
                                answer.extend_from_slice(&i64::from(time).to_le_bytes());
                            }
                        }
                        None => {
                            answer.extend_from_slice(&2u32.to_le_bytes());
                            answer.resize(4 + 68, 0);
                        }
                    }
                    stream.write_all(&answer).await?;
                }
                b"LIST" => {
                    let dir = read_string(&mut stream, len).await?;
                    let prefix = format!("{}/", dir.trim_end_matches('/'));
                    let entries: Vec<(String, FakeFile)> = self.with_files(serial, |files| {
                        files
                            .iter()
                            .filter_map(|(path, file)| {
                                let name = path.strip_prefix(&prefix)?;
                                (!name.contains('/')).then(|| (name.to_string(), file.clone()))
                            })
                            .collect()
                    });
                    let mut answer = Vec::new();
                    for (name, file) in entries {
                        answer.extend_from_slice(b"DENT");
                        for value in [file.mode, file.data.len() as u32, file.mtime, name.len() as u32] {
                            answer.extend_from_slice(&value.to_le_bytes());
                        }
                        answer.extend_from_slice(name.as_bytes());
                    }
                    answer.extend_from_slice(b"DONE");
                    answer.extend_from_slice(&[0u8; 16]);
                    stream.write_all(&answer).await?;
                }
                _ => return sync_fail(&mut stream, "unknown sync request").await,
            }
        }
    }

    fn with_files<T>(&self, serial: &str, f: impl FnOnce(&mut BTreeMap<String, FakeFile>) -> T) -> T {
        let mut devices = self.state.devices.lock().unwrap();
        let device = devices.get_mut(serial).unwrap();
        f(&mut device.files)
    }
}

#[async_trait]
impl ChannelProvider for FakeDaemon {
    async fn open(&self) -> Result<BoxedChannel> {
        self.state.channels_opened.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let daemon = self.clone();
        tokio::spawn(async move {
            if let Err(e) = daemon.serve(server).await {
                tracing::debug!("Fake daemon channel ended: {}", e);
            }
        });
        Ok(Box::new(client))
    }
}

#[async_trait]
impl CapabilitySource for FakeDaemon {
    async fn api_level(&self, device: &DeviceSelector) -> Result<u32> {
        self.resolve(&Target::from(device))
            .map(|(_, api_level)| api_level)
            .map_err(CoreError::DaemonFail)
    }

    async fn features(&self, device: &DeviceSelector) -> Result<Vec<String>> {
        self.state.capability_queries.fetch_add(1, Ordering::SeqCst);
        self.resolve(&Target::from(device))
            .map(|(_, api_level)| features_for(api_level))
            .map_err(CoreError::DaemonFail)
    }
}

/// Shell side of one command channel
struct FakeShell {
    stream: DuplexStream,
    api_level: u32,
    framed: bool,
    crlf: bool,
}

impl FakeShell {
    fn framed(stream: DuplexStream, api_level: u32) -> Self {
        Self {
            stream,
            api_level,
            framed: true,
            crlf: false,
        }
    }

    fn raw(stream: DuplexStream, api_level: u32, crlf: bool) -> Self {
        Self {
            stream,
            api_level,
            framed: false,
            crlf,
        }
    }

    async fn run(mut self, command: &str) -> io::Result<()> {
        if let Some(text) = command.strip_prefix("echo ") {
            self.out(format!("{}\n", text).as_bytes()).await?;
            return self.exit(0).await;
        }
        if command == "getprop ro.build.version.sdk" {
            self.out(format!("{}\n", self.api_level).as_bytes()).await?;
            return self.exit(0).await;
        }
        if command == "cat" {
            return self.cat().await;
        }
        if let Some(script) = command.strip_prefix("script:") {
            return self.script(script).await;
        }
        self.err(format!("{}: not found\n", command).as_bytes()).await?;
        self.exit(127).await
    }

    async fn run_abb(mut self, args: &str) -> io::Result<()> {
        let line = args.split('\0').collect::<Vec<_>>().join(" ");
        self.out(format!("{}\n", line).as_bytes()).await?;
        self.exit(0).await
    }

    async fn cat(mut self) -> io::Result<()> {
        if self.framed {
            loop {
                let mut header = [0u8; 5];
                match self.stream.read_exact(&mut header).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => return Err(e),
                }
                let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
                let mut payload = vec![0u8; len];
                self.stream.read_exact(&mut payload).await?;
                match PacketKind::from_u8(header[0]) {
                    Some(PacketKind::Stdin) => self.out(&payload).await?,
                    Some(PacketKind::CloseStdin) => break,
                    _ => {}
                }
            }
        } else {
            let mut buf = vec![0u8; 1024];
            loop {
                let n = self.stream.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                let chunk = buf[..n].to_vec();
                self.out(&chunk).await?;
            }
        }
        self.exit(0).await
    }

    async fn script(mut self, script: &str) -> io::Result<()> {
        for step in script.split(';') {
            let (name, value) = step.split_once('=').unwrap_or((step, ""));
            match name {
                "out" => self.out(value.as_bytes()).await?,
                "err" => self.err(value.as_bytes()).await?,
                "sleep" => {
                    let ms = value.parse().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                "trickle" => {
                    let (interval, total) = value.split_once('/').unwrap_or((value, value));
                    let interval: u64 = interval.parse().unwrap_or(1).max(1);
                    let total: u64 = total.parse().unwrap_or(0);
                    for _ in 0..total / interval {
                        tokio::time::sleep(Duration::from_millis(interval)).await;
                        self.out(b".").await?;
                    }
                }
                "invalid" => {
                    let packet = encode_packet(PacketKind::Invalid, b"")
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                    self.stream.write_all(&packet).await?;
                }
                "exit" => return self.exit(value.parse().unwrap_or(0)).await,
                _ => {}
            }
        }
        self.exit(0).await
    }

    async fn out(&mut self, data: &[u8]) -> io::Result<()> {
        self.write(PacketKind::Stdout, data).await
    }

    /// Legacy protocols have no stderr; it is merged into stdout
    async fn err(&mut self, data: &[u8]) -> io::Result<()> {
        self.write(PacketKind::Stderr, data).await
    }

    async fn write(&mut self, kind: PacketKind, data: &[u8]) -> io::Result<()> {
        if self.framed {
            let packet = encode_packet(kind, data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            self.stream.write_all(&packet).await
        } else if self.crlf {
            let mut converted = Vec::with_capacity(data.len());
            for &byte in data {
                if byte == b'\n' {
                    converted.push(b'\r');
                }
                converted.push(byte);
            }
            self.stream.write_all(&converted).await
        } else {
            self.stream.write_all(data).await
        }
    }

    async fn exit(mut self, code: u8) -> io::Result<()> {
        if self.framed {
            self.write(PacketKind::Exit, &[code]).await?;
        }
        self.stream.shutdown().await
    }
}

fn features_for(api_level: u32) -> Vec<String> {
    let mut features = Vec::new();
    if api_level >= 24 {
        features.extend([feature::SHELL_V2, feature::CMD, feature::STAT_V2, feature::LS_V2]);
    }
    if api_level >= 30 {
        features.extend([feature::ABB, feature::ABB_EXEC]);
    }
    features.into_iter().map(String::from).collect()
}

fn parse_transport(request: &str) -> Option<Target> {
    if let Some(serial) = request.strip_prefix("host:transport:") {
        return Some(Target::Serial(serial.to_string()));
    }
    if let Some(id) = request.strip_prefix("host:transport-id:") {
        return id.parse().ok().map(Target::TransportId);
    }
    match request {
        "host:transport-any" | "host:transport-usb" | "host:transport-local" => Some(Target::Any),
        _ => None,
    }
}

fn parse_features(request: &str) -> Option<Target> {
    match request {
        "host:features" | "host-usb:features" | "host-local:features" => return Some(Target::Any),
        _ => {}
    }
    let target = request.strip_suffix(":features")?;
    if let Some(serial) = target.strip_prefix("host-serial:") {
        return Some(Target::Serial(serial.to_string()));
    }
    target
        .strip_prefix("host-transport-id:")
        .and_then(|id| id.parse().ok())
        .map(Target::TransportId)
}

async fn read_request(stream: &mut DuplexStream) -> io::Result<String> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await?;
    let len = parse_hex_length(&prefix)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    read_string(stream, len).await
}

async fn read_string(stream: &mut DuplexStream, len: usize) -> io::Result<String> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn okay(stream: &mut DuplexStream) -> io::Result<()> {
    stream.write_all(b"OKAY").await
}

async fn fail(stream: &mut DuplexStream, message: &str) -> io::Result<()> {
    let mut answer = format!("FAIL{:04x}", message.len()).into_bytes();
    answer.extend_from_slice(message.as_bytes());
    stream.write_all(&answer).await
}

async fn sync_fail(stream: &mut DuplexStream, message: &str) -> io::Result<()> {
    let mut answer = b"FAIL".to_vec();
    answer.extend_from_slice(&(message.len() as u32).to_le_bytes());
    answer.extend_from_slice(message.as_bytes());
    stream.write_all(&answer).await
}
