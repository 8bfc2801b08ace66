//! Running daemon services

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::error::{CoreError, Result};
use crate::protocol::service::{read_length_prefixed, read_status, write_request};
use crate::transport::{BoxedChannel, ChannelProvider};
use crate::types::DeviceSelector;

/// Opens channels and gets services accepted by the daemon
///
/// Only connection setup is bounded by `connect_timeout`; what happens on the
/// returned channel afterwards is up to the caller.
#[derive(Clone)]
pub struct ServiceRunner {
    provider: Arc<dyn ChannelProvider>,
    connect_timeout: Duration,
}

impl ServiceRunner {
    pub fn new(provider: Arc<dyn ChannelProvider>, connect_timeout: Duration) -> Self {
        Self {
            provider,
            connect_timeout,
        }
    }

    /// Switch a new channel to `device` and start `service` on it
    pub async fn open_device_service(
        &self,
        device: &DeviceSelector,
        service: &str,
    ) -> Result<BoxedChannel> {
        tracing::debug!("Device {} - starting service {:?}", device, service);
        self.with_connect_timeout(async {
            let mut channel = self.provider.open().await?;
            write_request(&mut channel, &device.transport_request()).await?;
            read_status(&mut channel).await?;
            write_request(&mut channel, service).await?;
            read_status(&mut channel).await?;
            Ok(channel)
        })
        .await
    }

    /// Host request answered with a hex length prefixed payload
    pub async fn host_query(&self, request: &str) -> Result<String> {
        tracing::debug!("Host query {:?}", request);
        self.with_connect_timeout(async {
            let mut channel = self.provider.open().await?;
            write_request(&mut channel, request).await?;
            read_status(&mut channel).await?;
            read_length_prefixed(&mut channel).await
        })
        .await
    }

    /// Run `service` on `device` and return everything it prints
    pub async fn device_query(&self, device: &DeviceSelector, service: &str) -> Result<Vec<u8>> {
        let mut channel = self.open_device_service(device, service).await?;
        let mut output = Vec::new();
        channel.read_to_end(&mut output).await?;
        Ok(output)
    }

    async fn with_connect_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.connect_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::timeout(self.connect_timeout)),
        }
    }
}
