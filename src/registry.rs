//! Explicit device registry: device id to handler, with explicit attach and
//! detach entry points. Each handler owns its clip source and the background
//! tasks that keep it fresh (session refresh or directory scanning); both
//! are interval-driven, single-flight by construction, and cancelled on
//! detach.

use crate::config::{DeviceConfig, SourceKind};
use crate::error::Result;
use crate::remote::RemoteSearchSource;
use crate::scanner::FilesystemScanSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a device's clips are sourced. Mutually exclusive per device.
pub enum ClipSource {
    Remote(Arc<RemoteSearchSource>),
    Filesystem(Arc<FilesystemScanSource>),
}

/// One attached device: configuration, clip source, and the cancellation
/// token that stops its background tasks.
pub struct DeviceHandler {
    config: DeviceConfig,
    source: ClipSource,
    cancel: CancellationToken,
}

impl DeviceHandler {
    fn create(config: DeviceConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let cancel = CancellationToken::new();

        let source = match config.kind {
            SourceKind::Remote => {
                // validate() guarantees these are present
                let host = config.host.clone().unwrap_or_default();
                let username = config.username.clone().unwrap_or_default();
                let password = config.password.clone().unwrap_or_default();
                let remote = Arc::new(RemoteSearchSource::new(
                    &host,
                    &username,
                    &password,
                    config.channel,
                )?);
                spawn_session_refresh(
                    config.id.clone(),
                    remote.clone(),
                    Duration::from_secs(config.session_refresh_seconds),
                    cancel.child_token(),
                );
                ClipSource::Remote(remote)
            }
            SourceKind::Filesystem => {
                let root = config.root.clone().unwrap_or_default();
                let scanner = Arc::new(FilesystemScanSource::new(
                    root,
                    config.file_prefix.clone(),
                ));
                spawn_directory_scan(
                    config.id.clone(),
                    scanner.clone(),
                    Duration::from_secs(config.scan_interval_seconds),
                    cancel.child_token(),
                );
                ClipSource::Filesystem(scanner)
            }
        };

        Ok(Arc::new(Self {
            config,
            source,
            cancel,
        }))
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn source(&self) -> &ClipSource {
        &self.source
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn destroy(&self) {
        self.cancel.cancel();
    }
}

/// Forced logout+relogin on a timer, independent of organic lease expiry.
/// The first tick is skipped: login happens lazily on first use.
fn spawn_session_refresh(
    device_id: String,
    remote: Arc<RemoteSearchSource>,
    period: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Session refresh task for '{}' stopped", device_id);
                    break;
                }
                _ = ticker.tick() => {
                    debug!("Forcing session refresh for '{}'", device_id);
                    remote.force_relogin().await;
                }
            }
        }
    });
}

/// Directory scan on a timer; the immediate first tick seeds the snapshot
/// at attach time. Runs never overlap because each pass completes inside
/// its own loop iteration.
fn spawn_directory_scan(
    device_id: String,
    scanner: Arc<FilesystemScanSource>,
    period: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Scan task for '{}' stopped", device_id);
                    break;
                }
                _ = ticker.tick() => {
                    match scanner.scan_once().await {
                        Ok(count) => debug!("Device '{}' scan indexed {} entries", device_id, count),
                        Err(e) => warn!("Device '{}' scan pass failed: {}", device_id, e),
                    }
                }
            }
        }
    });
}

/// Device id to handler map with explicit creation and teardown; passed by
/// reference into the delivery layer.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Arc<DeviceHandler>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler for the device and registers it. Replacing an
    /// already-attached id tears the old handler down first.
    pub async fn attach(&self, config: DeviceConfig) -> Result<Arc<DeviceHandler>> {
        let handler = DeviceHandler::create(config)?;
        let mut devices = self.devices.write().await;
        if let Some(previous) = devices.insert(handler.id().to_string(), handler.clone()) {
            previous.destroy();
            info!("Replaced device '{}'", handler.id());
        } else {
            info!("Attached device '{}'", handler.id());
        }
        Ok(handler)
    }

    /// Tears down and removes a device. Returns false for unknown ids.
    pub async fn detach(&self, id: &str) -> bool {
        let removed = self.devices.write().await.remove(id);
        match removed {
            Some(handler) => {
                handler.destroy();
                info!("Detached device '{}'", id);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<DeviceHandler>> {
        self.devices.read().await.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    /// Tears down every attached device.
    pub async fn shutdown(&self) {
        let mut devices = self.devices.write().await;
        for (id, handler) in devices.drain() {
            handler.destroy();
            debug!("Stopped device '{}'", id);
        }
        info!("Device registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, SourceKind};
    use tempfile::TempDir;

    fn filesystem_config(id: &str, root: &str) -> DeviceConfig {
        DeviceConfig {
            id: id.to_string(),
            name: String::new(),
            kind: SourceKind::Filesystem,
            host: None,
            username: None,
            password: None,
            channel: 0,
            redirect_playback: false,
            session_refresh_seconds: 1800,
            root: Some(root.to_string()),
            file_prefix: None,
            scan_interval_seconds: 300,
        }
    }

    #[tokio::test]
    async fn attach_get_detach_lifecycle() {
        let dir = TempDir::new().unwrap();
        let registry = DeviceRegistry::new();

        let handler = registry
            .attach(filesystem_config("garage", &dir.path().to_string_lossy()))
            .await
            .unwrap();
        assert!(!handler.is_stopped());
        assert!(registry.get("garage").await.is_some());
        assert!(registry.get("missing").await.is_none());

        assert!(registry.detach("garage").await);
        assert!(handler.is_stopped());
        assert!(registry.get("garage").await.is_none());
        assert!(!registry.detach("garage").await);
    }

    #[tokio::test]
    async fn attach_rejects_invalid_device() {
        let registry = DeviceRegistry::new();
        let mut config = filesystem_config("broken", "");
        config.root = None;
        assert!(registry.attach(config).await.is_err());
        assert!(registry.ids().await.is_empty());
    }

    #[tokio::test]
    async fn remote_device_without_credentials_is_rejected() {
        let registry = DeviceRegistry::new();
        let config = DeviceConfig {
            id: "front".to_string(),
            name: String::new(),
            kind: SourceKind::Remote,
            host: Some("http://192.168.1.10".to_string()),
            username: None,
            password: None,
            channel: 0,
            redirect_playback: false,
            session_refresh_seconds: 1800,
            root: None,
            file_prefix: None,
            scan_interval_seconds: 300,
        };
        assert!(registry.attach(config).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_stops_all_handlers() {
        let dir = TempDir::new().unwrap();
        let registry = DeviceRegistry::new();
        let a = registry
            .attach(filesystem_config("a", &dir.path().to_string_lossy()))
            .await
            .unwrap();
        let b = registry
            .attach(filesystem_config("b", &dir.path().to_string_lossy()))
            .await
            .unwrap();

        registry.shutdown().await;
        assert!(a.is_stopped());
        assert!(b.is_stopped());
        assert!(registry.ids().await.is_empty());
    }

    #[tokio::test]
    async fn replacing_a_device_destroys_the_old_handler() {
        let dir = TempDir::new().unwrap();
        let registry = DeviceRegistry::new();
        let root = dir.path().to_string_lossy().to_string();
        let first = registry
            .attach(filesystem_config("garage", &root))
            .await
            .unwrap();
        let second = registry
            .attach(filesystem_config("garage", &root))
            .await
            .unwrap();
        assert!(first.is_stopped());
        assert!(!second.is_stopped());
    }
}
