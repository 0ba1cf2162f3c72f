//! On-disk jpeg thumbnail cache, one directory per device, keyed by the
//! clip's filename stem. Frame extraction is delegated to an external
//! collaborator; the default shells out to ffmpeg.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

/// Where the bytes of a clip actually live.
#[derive(Debug, Clone)]
pub enum MediaSource {
    LocalFile(PathBuf),
    RemoteUrl(String),
}

impl MediaSource {
    fn as_input_arg(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().into_owned(),
            MediaSource::RemoteUrl(url) => url.clone(),
        }
    }
}

/// Pulls one still frame out of a clip. The media-conversion collaborator
/// behind thumbnail generation.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract_jpeg(
        &self,
        source: &MediaSource,
        offset: Duration,
        dest: &Path,
    ) -> std::io::Result<()>;
}

/// Default extractor: ffmpeg subprocess under a timeout.
pub struct FfmpegExtractor {
    pub ffmpeg_path: String,
    pub timeout: Duration,
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract_jpeg(
        &self,
        source: &MediaSource,
        offset: Duration,
        dest: &Path,
    ) -> std::io::Result<()> {
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-ss")
            .arg(offset.as_secs().to_string())
            .arg("-i")
            .arg(source.as_input_arg())
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("3")
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "ffmpeg timed out",
                ))
            }
        };
        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Seek offset into the clip for the thumbnail frame. Clips shorter than
/// this yield no frame and therefore no thumbnail.
const THUMBNAIL_OFFSET: Duration = Duration::from_secs(5);

pub struct ThumbnailCache {
    cache_root: PathBuf,
    extractor: Arc<dyn FrameExtractor>,
}

impl ThumbnailCache {
    pub fn new<P: Into<PathBuf>>(cache_root: P, extractor: Arc<dyn FrameExtractor>) -> Self {
        Self {
            cache_root: cache_root.into(),
            extractor,
        }
    }

    fn cache_path(&self, device_id: &str, locator: &str) -> PathBuf {
        self.cache_root
            .join(device_id)
            .join(format!("{}.jpg", clip_stem(locator)))
    }

    /// Cached thumbnail path, if present and non-empty. A zero-byte entry
    /// is a corrupt leftover: it is removed and reported absent.
    pub async fn cached(&self, device_id: &str, locator: &str) -> Option<PathBuf> {
        let path = self.cache_path(device_id, locator);
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.len() > 0 => Some(path),
            Ok(_) => {
                warn!("Removing corrupt zero-byte thumbnail {}", path.display());
                let _ = fs::remove_file(&path).await;
                None
            }
            Err(_) => None,
        }
    }

    /// Returns the cached thumbnail, generating it from `source` on a miss.
    /// Failed or empty generations leave no artifact behind and report
    /// absent; errors never propagate past this boundary. Concurrent
    /// generations for one key are last-writer-wins.
    pub async fn get_or_generate(
        &self,
        device_id: &str,
        locator: &str,
        source: &MediaSource,
    ) -> Option<PathBuf> {
        if let Some(path) = self.cached(device_id, locator).await {
            return Some(path);
        }

        let path = self.cache_path(device_id, locator);
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                warn!("Cannot create thumbnail directory {}: {}", parent.display(), e);
                return None;
            }
        }

        match self
            .extractor
            .extract_jpeg(source, THUMBNAIL_OFFSET, &path)
            .await
        {
            Ok(()) => match fs::metadata(&path).await {
                Ok(metadata) if metadata.len() > 0 => {
                    debug!("Cached thumbnail {}", path.display());
                    Some(path)
                }
                _ => {
                    let _ = fs::remove_file(&path).await;
                    warn!("Thumbnail generation produced no data for '{}'", locator);
                    None
                }
            },
            Err(e) => {
                let _ = fs::remove_file(&path).await;
                warn!("Thumbnail generation failed for '{}': {}", locator, e);
                None
            }
        }
    }
}

/// Filename stem of a clip locator, tolerant of either separator style.
fn clip_stem(locator: &str) -> String {
    let normalized = locator.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or(&normalized);
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    if stem.is_empty() {
        "clip".to_string()
    } else {
        stem.to_string()
    }
}
