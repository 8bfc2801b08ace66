//! Sync session
//!
//! One `sync:` channel used for any number of sequential file operations.
//! Operations take `&mut self`, so two transfers can never interleave on the
//! same channel; parallel transfers need separate sessions.

use bytes::BytesMut;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CoreError, Result};
use crate::protocol::sync::{
    decode_dent, decode_stat_v1, decode_stat_v2, dir_entry, put_header, put_path_request,
    read_header, read_id, unexpected, SyncHeader, SyncId, DENT_LEN, HEADER_LEN, STAT_V1_LEN,
    STAT_V2_LEN, SYNC_DATA_MAX,
};
use crate::sync::progress::SyncProgress;
use crate::transport::{BoxedChannel, ServiceRunner};
use crate::types::{DeviceSelector, DirEntry, FileStat, FileStatV2, RemoteFileMode};

/// Open sync channel to one device
pub struct SyncSession {
    channel: BoxedChannel,
    device: DeviceSelector,
    chunk_size: usize,
    /// Request scratch
    request: BytesMut,
    /// `DATA` frame scratch (header + payload), reused by every transfer
    data: Vec<u8>,
    /// Set while a request is in flight; stays set if it failed midway.
    /// A fully read `FAIL` answer clears it again.
    broken: bool,
}

impl SyncSession {
    /// Start the `sync:` service on `device`
    ///
    /// `buffer_size` is the `DATA` payload size, capped at [`SYNC_DATA_MAX`].
    pub async fn open(
        runner: &ServiceRunner,
        device: &DeviceSelector,
        buffer_size: usize,
    ) -> Result<Self> {
        let channel = runner.open_device_service(device, "sync:").await?;
        Ok(Self::new(channel, device.clone(), buffer_size))
    }

    pub(crate) fn new(channel: BoxedChannel, device: DeviceSelector, buffer_size: usize) -> Self {
        let chunk_size = buffer_size.clamp(1, SYNC_DATA_MAX);
        Self {
            channel,
            device,
            chunk_size,
            request: BytesMut::with_capacity(256),
            data: Vec::new(),
            broken: false,
        }
    }

    pub fn device(&self) -> &DeviceSelector {
        &self.device
    }

    /// `DATA` payload size of the following transfers, capped at [`SYNC_DATA_MAX`]
    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        self.chunk_size = buffer_size.clamp(1, SYNC_DATA_MAX);
    }

    /// Whether a failed operation left the channel in an unknown state
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Upload `source` to `remote_path`
    ///
    /// `mtime` defaults to now. Only the permission bits of `mode` are sent.
    pub async fn send<R>(
        &mut self,
        source: &mut R,
        remote_path: &str,
        mode: RemoteFileMode,
        mtime: Option<SystemTime>,
        progress: &mut dyn SyncProgress,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.ensure_usable()?;
        let mtime = unix_seconds(mtime.unwrap_or_else(SystemTime::now));
        let mode = RemoteFileMode::from_permissions(mode.permissions());

        self.request.clear();
        put_path_request(
            &mut self.request,
            SyncId::Send,
            &format!("{},{}", remote_path, mode.bits()),
        )?;

        tracing::debug!(
            "Device {} - sending {} (mode {:o}, mtime {})",
            self.device,
            remote_path,
            mode.bits(),
            mtime
        );
        self.broken = true;
        progress.transfer_started(remote_path).await?;
        self.channel.write_all(&self.request).await?;

        let chunk_size = self.chunk_size;
        self.data.resize(HEADER_LEN + chunk_size, 0);
        self.data[..4].copy_from_slice(SyncId::Data.as_bytes());
        let mut total = 0u64;
        loop {
            let n = source.read(&mut self.data[HEADER_LEN..]).await?;
            if n == 0 {
                break;
            }
            self.data[4..HEADER_LEN].copy_from_slice(&(n as u32).to_le_bytes());
            self.channel.write_all(&self.data[..HEADER_LEN + n]).await?;
            total += n as u64;
            tracing::trace!("Sent DATA frame of {} bytes", n);
            progress.transfer_progress(remote_path, total).await?;
        }

        self.request.clear();
        put_header(&mut self.request, SyncId::Done, mtime);
        self.channel.write_all(&self.request).await?;
        self.channel.flush().await?;

        let header = read_header(&mut self.channel).await?;
        let outcome = match header.id {
            SyncId::Okay => Ok(()),
            _ => Err(self.answer_error(header, "OKAY").await),
        };
        progress.transfer_done(remote_path, total).await?;
        outcome?;

        self.broken = false;
        tracing::debug!("Device {} - sent {} bytes to {}", self.device, total, remote_path);
        Ok(())
    }

    /// Download `remote_path` into `sink`
    pub async fn recv<W>(
        &mut self,
        remote_path: &str,
        sink: &mut W,
        progress: &mut dyn SyncProgress,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        self.ensure_usable()?;
        self.request.clear();
        put_path_request(&mut self.request, SyncId::Recv, remote_path)?;

        tracing::debug!("Device {} - receiving {}", self.device, remote_path);
        self.broken = true;
        progress.transfer_started(remote_path).await?;
        self.channel.write_all(&self.request).await?;
        self.channel.flush().await?;

        let mut total = 0u64;
        loop {
            let header = read_header(&mut self.channel).await?;
            match header.id {
                SyncId::Data => {
                    let len = header.value as usize;
                    if len > SYNC_DATA_MAX {
                        return Err(CoreError::MessageTooLarge {
                            size: len,
                            max: SYNC_DATA_MAX,
                        });
                    }
                    self.data.resize(len, 0);
                    self.channel.read_exact(&mut self.data[..len]).await?;
                    sink.write_all(&self.data[..len]).await?;
                    total += len as u64;
                    tracing::trace!("Received DATA frame of {} bytes", len);
                    progress.transfer_progress(remote_path, total).await?;
                }
                SyncId::Done => break,
                _ => {
                    let err = self.answer_error(header, "DATA or DONE").await;
                    progress.transfer_done(remote_path, total).await?;
                    return Err(err);
                }
            }
        }
        sink.flush().await?;
        progress.transfer_done(remote_path, total).await?;

        self.broken = false;
        tracing::debug!(
            "Device {} - received {} bytes from {}",
            self.device,
            total,
            remote_path
        );
        Ok(())
    }

    /// `STAT` of `remote_path`
    ///
    /// The daemon answers all zeros for a missing file; that is reported as
    /// [`CoreError::SyncFail`] and leaves the session usable.
    pub async fn stat(&mut self, remote_path: &str) -> Result<FileStat> {
        let mut body = [0u8; STAT_V1_LEN];
        self.request_record(SyncId::Stat, remote_path, &mut body).await?;

        let stat = decode_stat_v1(&body)?;
        if stat.mode.bits() == 0 && stat.size == 0 && stat.mtime == 0 {
            return Err(CoreError::SyncFail(format!(
                "remote object '{}' does not exist",
                remote_path
            )));
        }
        Ok(stat)
    }

    /// `STA2` of `remote_path` (follows symlinks)
    pub async fn stat_v2(&mut self, remote_path: &str) -> Result<FileStatV2> {
        let mut body = [0u8; STAT_V2_LEN];
        self.request_record(SyncId::Sta2, remote_path, &mut body).await?;
        decode_stat_v2(&body, remote_path)
    }

    /// `LST2` of `remote_path` (does not follow symlinks)
    pub async fn lstat_v2(&mut self, remote_path: &str) -> Result<FileStatV2> {
        let mut body = [0u8; STAT_V2_LEN];
        self.request_record(SyncId::Lst2, remote_path, &mut body).await?;
        decode_stat_v2(&body, remote_path)
    }

    /// Entries of the directory `remote_path`, in daemon order
    pub async fn list(&mut self, remote_path: &str) -> Result<Vec<DirEntry>> {
        self.ensure_usable()?;
        self.request.clear();
        put_path_request(&mut self.request, SyncId::List, remote_path)?;

        self.broken = true;
        self.channel.write_all(&self.request).await?;
        self.channel.flush().await?;

        let mut entries = Vec::new();
        let mut body = [0u8; DENT_LEN];
        loop {
            let id = read_id(&mut self.channel).await?;
            match id {
                SyncId::Dent => {
                    self.channel.read_exact(&mut body).await?;
                    let (mode, size, mtime, name_len) = decode_dent(&body)?;
                    if name_len > SYNC_DATA_MAX {
                        return Err(CoreError::MessageTooLarge {
                            size: name_len,
                            max: SYNC_DATA_MAX,
                        });
                    }
                    let mut name = vec![0u8; name_len];
                    self.channel.read_exact(&mut name).await?;
                    entries.push(dir_entry(name, mode, size, mtime));
                }
                SyncId::Done => {
                    // DONE of a listing carries an empty DENT body
                    self.channel.read_exact(&mut body).await?;
                    break;
                }
                other => {
                    let value = self.channel.read_u32_le().await?;
                    let header = SyncHeader { id: other, value };
                    return Err(self.answer_error(header, "DENT or DONE").await);
                }
            }
        }

        self.broken = false;
        tracing::debug!(
            "Device {} - listed {} entries in {}",
            self.device,
            entries.len(),
            remote_path
        );
        Ok(entries)
    }

    /// End the session with `QUIT`
    pub async fn close(mut self) -> Result<()> {
        if self.broken {
            tracing::debug!("Device {} - dropping broken sync session", self.device);
            return Ok(());
        }
        self.request.clear();
        put_header(&mut self.request, SyncId::Quit, 0);
        self.channel.write_all(&self.request).await?;
        self.channel.shutdown().await?;
        tracing::debug!("Device {} - sync session closed", self.device);
        Ok(())
    }

    /// Send a path request and read the fixed-size record answering it
    async fn request_record(&mut self, id: SyncId, remote_path: &str, body: &mut [u8]) -> Result<()> {
        self.ensure_usable()?;
        self.request.clear();
        put_path_request(&mut self.request, id, remote_path)?;

        self.broken = true;
        self.channel.write_all(&self.request).await?;
        self.channel.flush().await?;

        let answer = read_id(&mut self.channel).await?;
        if answer != id {
            let value = self.channel.read_u32_le().await?;
            let header = SyncHeader { id: answer, value };
            let expected = String::from_utf8_lossy(id.as_bytes()).into_owned();
            return Err(self.answer_error(header, &expected).await);
        }
        self.channel.read_exact(body).await?;
        self.broken = false;
        Ok(())
    }

    /// Error for an answer other than `expected`
    ///
    /// A `FAIL` read to its end leaves the channel in step with the daemon,
    /// so only the current operation fails.
    async fn answer_error(&mut self, header: SyncHeader, expected: &str) -> CoreError {
        let err = unexpected(&mut self.channel, header, expected).await;
        if matches!(err, CoreError::SyncFail(_)) {
            self.broken = false;
        }
        err
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            return Err(CoreError::InvalidState(
                "sync session was broken by a failed operation".into(),
            ));
        }
        Ok(())
    }
}

fn unix_seconds(time: SystemTime) -> u32 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}
