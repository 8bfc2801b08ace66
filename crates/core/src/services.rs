//! Entry point to the services of connected devices

use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ClientConfig;
use crate::device::{CapabilityCache, CapabilitySource, DaemonCapabilitySource, DeviceCapabilities};
use crate::error::Result;
use crate::shell::command::{ShellCommand, ShellContext};
use crate::sync::{SyncProgress, SyncSession};
use crate::transport::{ChannelProvider, ServiceRunner, TcpChannelProvider};
use crate::types::{DeviceSelector, FileStat, RemoteFileMode};

/// Shell, abb and sync services of the devices behind one daemon
///
/// Cheap to clone; clones share the capability cache.
#[derive(Clone)]
pub struct DeviceServices {
    context: ShellContext,
}

impl DeviceServices {
    pub fn new(
        provider: Arc<dyn ChannelProvider>,
        capabilities: Arc<dyn CapabilitySource>,
        config: ClientConfig,
    ) -> Self {
        let runner = ServiceRunner::new(provider, config.connect_timeout);
        Self {
            context: ShellContext {
                runner,
                capabilities: Arc::new(CapabilityCache::new(capabilities)),
                config,
            },
        }
    }

    /// Services of the daemon at `config.daemon_addr`, with capabilities
    /// queried from that daemon
    pub fn connect(config: ClientConfig) -> Self {
        let provider: Arc<dyn ChannelProvider> = Arc::new(TcpChannelProvider::new(
            config.daemon_addr,
            config.connect_timeout,
        ));
        let runner = ServiceRunner::new(provider.clone(), config.connect_timeout);
        let source = Arc::new(DaemonCapabilitySource::new(runner));
        Self::new(provider, source, config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.context.config
    }

    pub fn runner(&self) -> &ServiceRunner {
        &self.context.runner
    }

    pub async fn capabilities(&self, device: &DeviceSelector) -> Result<Arc<DeviceCapabilities>> {
        self.context.capabilities.get(device).await
    }

    /// Drop cached capabilities of `device`
    pub fn invalidate_capabilities(&self, device: &DeviceSelector) {
        self.context.capabilities.invalidate(device);
    }

    /// Shell command builder; set a collector before executing
    pub fn shell_command(&self, device: &DeviceSelector, command: impl Into<String>) -> ShellCommand {
        ShellCommand::shell(self.context.clone(), device.clone(), command.into())
    }

    /// `abb`/`abb_exec` command builder
    pub fn abb_command<I, S>(&self, device: &DeviceSelector, args: I) -> ShellCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = args.into_iter().map(Into::into).collect();
        ShellCommand::abb(self.context.clone(), device.clone(), args)
    }

    /// Open a sync session for several file operations
    pub async fn sync(&self, device: &DeviceSelector) -> Result<SyncSession> {
        SyncSession::open(
            &self.context.runner,
            device,
            self.context.config.sync_buffer_size,
        )
        .await
    }

    /// Upload one file in its own session
    pub async fn sync_send<R>(
        &self,
        device: &DeviceSelector,
        source: &mut R,
        remote_path: &str,
        mode: RemoteFileMode,
        mtime: Option<SystemTime>,
        progress: &mut dyn SyncProgress,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut session = self.sync(device).await?;
        session
            .send(source, remote_path, mode, mtime, progress)
            .await?;
        session.close().await
    }

    /// Download one file in its own session
    pub async fn sync_recv<W>(
        &self,
        device: &DeviceSelector,
        remote_path: &str,
        sink: &mut W,
        progress: &mut dyn SyncProgress,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut session = self.sync(device).await?;
        session.recv(remote_path, sink, progress).await?;
        session.close().await
    }

    pub async fn sync_stat(&self, device: &DeviceSelector, remote_path: &str) -> Result<FileStat> {
        let mut session = self.sync(device).await?;
        let stat = session.stat(remote_path).await?;
        session.close().await?;
        Ok(stat)
    }
}
