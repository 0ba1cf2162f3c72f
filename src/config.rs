use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ClipserveConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Devices served by this instance.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Base URL clients should use to reach this server. Defaults to the
    /// bind address, which is only right on a single-host setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Directory holding one thumbnail subdirectory per device
    #[serde(default = "default_thumbnail_dir")]
    pub thumbnail_dir: String,

    /// ffmpeg executable used for frame extraction
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Upper bound on one frame-extraction run, in seconds
    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_seconds: u64,
}

/// Where a device's clips come from. The two variants are mutually
/// exclusive per device.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Remote,
    Filesystem,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    /// Stable identifier used in webhook paths and the thumbnail cache
    pub id: String,

    /// Human-readable label
    #[serde(default)]
    pub name: String,

    pub kind: SourceKind,

    /// Device base URL, e.g. "http://192.168.1.10" (remote only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Channel queried on the device (remote only)
    #[serde(default)]
    pub channel: u32,

    /// Redirect videoclip requests to the device's playback URL instead of
    /// proxying the bytes (remote only)
    #[serde(default)]
    pub redirect_playback: bool,

    /// Period of the forced logout+relogin cycle, in seconds (remote only)
    #[serde(default = "default_session_refresh")]
    pub session_refresh_seconds: u64,

    /// Directory holding exported recordings (filesystem only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Optional filename prefix in front of the embedded timestamp
    /// (filesystem only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_prefix: Option<String>,

    /// Period between directory scans, in seconds (filesystem only)
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,
}

impl ClipserveConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("clipserve.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables with CLIPSERVE_ prefix
            .add_source(Environment::with_prefix("CLIPSERVE").separator("_"))
            .build()?;

        let config: ClipserveConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if self.cache.thumbnail_dir.is_empty() {
            return Err(ConfigError::Message(
                "Thumbnail cache directory must not be empty".to_string(),
            ));
        }

        if self.cache.extraction_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Extraction timeout must be greater than 0".to_string(),
            ));
        }

        for device in &self.devices {
            device.validate()?;
        }

        let mut ids: Vec<&str> = self.devices.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.devices.len() {
            return Err(ConfigError::Message(
                "Device ids must be unique".to_string(),
            ));
        }

        Ok(())
    }
}

impl DeviceConfig {
    /// Checks the fields required by the device's source kind. A device
    /// failing validation is reported unavailable; it never takes the
    /// process down.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::Message(
                "Device id must not be empty".to_string(),
            ));
        }

        match self.kind {
            SourceKind::Remote => {
                if self.host.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::Message(format!(
                        "Device '{}' is remote but has no host",
                        self.id
                    )));
                }
                if self.username.as_deref().unwrap_or("").is_empty()
                    || self.password.is_none()
                {
                    return Err(ConfigError::Message(format!(
                        "Device '{}' is remote but has no credentials",
                        self.id
                    )));
                }
                if self.session_refresh_seconds == 0 {
                    return Err(ConfigError::Message(format!(
                        "Device '{}' session refresh period must be greater than 0",
                        self.id
                    )));
                }
            }
            SourceKind::Filesystem => {
                if self.root.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::Message(format!(
                        "Device '{}' is filesystem-backed but has no root",
                        self.id
                    )));
                }
                if self.scan_interval_seconds == 0 {
                    return Err(ConfigError::Message(format!(
                        "Device '{}' scan interval must be greater than 0",
                        self.id
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: default_server_ip(),
            port: default_server_port(),
            public_base_url: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            thumbnail_dir: default_thumbnail_dir(),
            ffmpeg_path: default_ffmpeg_path(),
            extraction_timeout_seconds: default_extraction_timeout(),
        }
    }
}

// Default value functions
fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8554
}

fn default_thumbnail_dir() -> String {
    "./thumbnails".to_string()
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_extraction_timeout() -> u64 {
    30
}

fn default_session_refresh() -> u64 {
    1800
}
fn default_scan_interval() -> u64 {
    300
}
