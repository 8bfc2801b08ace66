//! Device capabilities and their cache

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use crate::error::{CoreError, Result};
use crate::shell::ShellProtocol;
use crate::transport::ServiceRunner;
use crate::types::DeviceSelector;

/// Daemon feature names
pub mod feature {
    pub const SHELL_V2: &str = "shell_v2";
    pub const CMD: &str = "cmd";
    pub const STAT_V2: &str = "stat_v2";
    pub const LS_V2: &str = "ls_v2";
    pub const ABB: &str = "abb";
    pub const ABB_EXEC: &str = "abb_exec";
}

/// First API level with the `exec:` service
pub const EXEC_MIN_API_LEVEL: u32 = 21;

/// Last API level whose legacy shell turns `\n` into `\r\n`
pub const CRLF_MAX_API_LEVEL: u32 = 23;

/// What a device supports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub api_level: u32,
    pub features: HashSet<String>,
}

impl DeviceCapabilities {
    pub fn new<I, S>(api_level: u32, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            api_level,
            features: features.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.features.contains(name)
    }

    pub fn supports(&self, protocol: ShellProtocol) -> bool {
        match protocol {
            ShellProtocol::Shell => true,
            ShellProtocol::Exec => self.api_level >= EXEC_MIN_API_LEVEL,
            ShellProtocol::ShellV2 => self.has_feature(feature::SHELL_V2),
            ShellProtocol::Abb => self.has_feature(feature::ABB),
            ShellProtocol::AbbExec => self.has_feature(feature::ABB_EXEC),
        }
    }

    /// Whether legacy shell output needs `\r\n` stripping
    pub fn emits_crlf(&self) -> bool {
        self.api_level <= CRLF_MAX_API_LEVEL
    }
}

/// Where capabilities come from
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    async fn api_level(&self, device: &DeviceSelector) -> Result<u32>;

    async fn features(&self, device: &DeviceSelector) -> Result<Vec<String>>;
}

/// Capabilities queried from the daemon
///
/// Features come from `<host prefix>:features`, the API level from
/// `getprop ro.build.version.sdk`.
pub struct DaemonCapabilitySource {
    runner: ServiceRunner,
}

impl DaemonCapabilitySource {
    pub fn new(runner: ServiceRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl CapabilitySource for DaemonCapabilitySource {
    async fn api_level(&self, device: &DeviceSelector) -> Result<u32> {
        let output = self
            .runner
            .device_query(device, "shell:getprop ro.build.version.sdk")
            .await?;
        let text = String::from_utf8_lossy(&output);
        text.trim()
            .parse()
            .map_err(|_| CoreError::Protocol(format!("invalid API level {:?}", text.trim())))
    }

    async fn features(&self, device: &DeviceSelector) -> Result<Vec<String>> {
        let list = self.runner.host_query(&device.features_request()).await?;
        Ok(list
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect())
    }
}

type CacheSlot = Arc<OnceCell<Arc<DeviceCapabilities>>>;

/// Per-device capability cache
///
/// Each device entry is written once, by whichever caller first needs it;
/// concurrent callers wait for that query instead of issuing their own.
/// Later reads never touch the source. A failed query leaves the entry
/// empty so the next caller retries.
pub struct CapabilityCache {
    source: Arc<dyn CapabilitySource>,
    entries: Mutex<HashMap<DeviceSelector, CacheSlot>>,
}

impl CapabilityCache {
    pub fn new(source: Arc<dyn CapabilitySource>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, device: &DeviceSelector) -> Result<Arc<DeviceCapabilities>> {
        let slot = self.slot(device)?;
        let capabilities = slot
            .get_or_try_init(|| async {
                let features = self.source.features(device).await?;
                let api_level = self.source.api_level(device).await?;
                tracing::debug!(
                    "Device {} - api level {}, features {:?}",
                    device,
                    api_level,
                    features
                );
                Ok::<_, CoreError>(Arc::new(DeviceCapabilities::new(api_level, features)))
            })
            .await?;
        Ok(capabilities.clone())
    }

    /// Forget a device, e.g. after it was reconnected with another build
    pub fn invalidate(&self, device: &DeviceSelector) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(device);
        }
    }

    fn slot(&self, device: &DeviceSelector) -> Result<CacheSlot> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::InvalidState("capability cache lock poisoned".into()))?;
        Ok(entries.entry(device.clone()).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDaemon;
    use std::time::Duration;

    #[test]
    fn test_supports() {
        let old = DeviceCapabilities::new(19, Vec::<String>::new());
        assert!(old.supports(ShellProtocol::Shell));
        assert!(!old.supports(ShellProtocol::Exec));
        assert!(old.emits_crlf());

        let lollipop = DeviceCapabilities::new(21, Vec::<String>::new());
        assert!(lollipop.supports(ShellProtocol::Exec));
        assert!(!lollipop.supports(ShellProtocol::ShellV2));

        let modern = DeviceCapabilities::new(30, ["shell_v2", "abb", "abb_exec"]);
        assert!(modern.supports(ShellProtocol::ShellV2));
        assert!(modern.supports(ShellProtocol::Abb));
        assert!(!modern.emits_crlf());
    }

    #[tokio::test]
    async fn test_cache_queries_once_per_device() {
        let fake = FakeDaemon::new();
        fake.add_device("a", 24);
        fake.add_device("b", 19);
        let cache = CapabilityCache::new(Arc::new(fake.clone()));

        let a = DeviceSelector::serial("a");
        let first = cache.get(&a).await.unwrap();
        let second = cache.get(&a).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.api_level, 24);

        let b = cache.get(&DeviceSelector::serial("b")).await.unwrap();
        assert_eq!(b.api_level, 19);
        assert_eq!(fake.capability_queries(), 2);
    }

    #[tokio::test]
    async fn test_failed_query_is_retried() {
        let fake = FakeDaemon::new();
        let cache = CapabilityCache::new(Arc::new(fake.clone()));
        let device = DeviceSelector::serial("late");

        assert!(cache.get(&device).await.is_err());
        fake.add_device("late", 28);
        assert_eq!(cache.get(&device).await.unwrap().api_level, 28);
    }

    #[tokio::test]
    async fn test_daemon_source_reads_features_and_api_level() {
        let fake = FakeDaemon::new();
        fake.add_device("emulator-5554", 30);
        let runner = ServiceRunner::new(Arc::new(fake.clone()), Duration::from_secs(5));
        let source = DaemonCapabilitySource::new(runner);
        let device = DeviceSelector::serial("emulator-5554");

        assert_eq!(source.api_level(&device).await.unwrap(), 30);
        let features = source.features(&device).await.unwrap();
        assert!(features.contains(&"abb_exec".to_string()));
    }

    #[tokio::test]
    async fn test_daemon_source_strips_crlf_of_old_devices() {
        let fake = FakeDaemon::new();
        fake.add_device("old", 19);
        let runner = ServiceRunner::new(Arc::new(fake.clone()), Duration::from_secs(5));
        let source = DaemonCapabilitySource::new(runner);

        assert_eq!(source.api_level(&DeviceSelector::serial("old")).await.unwrap(), 19);
    }
}
