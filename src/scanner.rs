//! Periodic filesystem clip source. A background task walks the export
//! directory on a fixed interval and publishes an immutable snapshot;
//! listing is a pure filter over the latest published snapshot.

use crate::error::SourceError;
use crate::windows::SearchWindow;
use chrono::{Local, NaiveDate, TimeZone};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Digits of the embedded recording timestamp: YYYYMMDDHHMMSS.
const TIMESTAMP_DIGITS: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image,
}

/// One indexed recording file.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub timestamp_ms: i64,
    pub kind: MediaKind,
    pub size_bytes: u64,
}

/// Immutable result of one completed scan pass. Readers always observe a
/// whole snapshot, never a partially built one.
#[derive(Debug, Default)]
pub struct ScanSnapshot {
    pub entries: Vec<ScanEntry>,
    pub completed_at: Option<SystemTime>,
}

pub struct FilesystemScanSource {
    root: PathBuf,
    file_prefix: Option<String>,
    snapshot: RwLock<Arc<ScanSnapshot>>,
}

impl FilesystemScanSource {
    pub fn new<P: Into<PathBuf>>(root: P, file_prefix: Option<String>) -> Self {
        Self {
            root: root.into(),
            file_prefix,
            snapshot: RwLock::new(Arc::new(ScanSnapshot::default())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Latest published snapshot.
    pub async fn snapshot(&self) -> Arc<ScanSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Video entries of the latest snapshot whose timestamp falls inside
    /// the window.
    pub async fn list(&self, window: &SearchWindow) -> Vec<ScanEntry> {
        self.snapshot()
            .await
            .entries
            .iter()
            .filter(|e| e.kind == MediaKind::Video && window.contains(e.timestamp_ms))
            .cloned()
            .collect()
    }

    /// True when `path` resolves inside the recording root. Used by the
    /// delivery layer to refuse locators that point elsewhere.
    pub async fn contains_path(&self, path: &Path) -> bool {
        let root = match fs::canonicalize(&self.root).await {
            Ok(root) => root,
            Err(_) => return false,
        };
        match fs::canonicalize(path).await {
            Ok(resolved) => resolved.starts_with(&root),
            Err(_) => false,
        }
    }

    /// Walks the root once and atomically replaces the published snapshot.
    /// Individual unreadable directories or unparseable filenames are
    /// skipped; only an unreadable root fails the pass (keeping the
    /// previous snapshot in place).
    pub async fn scan_once(&self) -> Result<usize, SourceError> {
        if let Err(source) = fs::read_dir(&self.root).await {
            return Err(SourceError::Scan {
                path: self.root.clone(),
                source,
            });
        }

        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            loop {
                let entry = match reader.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Directory {} truncated: {}", dir.display(), e);
                        break;
                    }
                };
                let path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!("Skipping {}: {}", path.display(), e);
                        continue;
                    }
                };
                if metadata.is_dir() {
                    pending.push(path);
                } else if let Some(entry) = self.index_file(&path, metadata.len()) {
                    entries.push(entry);
                }
            }
        }

        entries.sort_by_key(|e| e.timestamp_ms);
        let count = entries.len();
        let snapshot = Arc::new(ScanSnapshot {
            entries,
            completed_at: Some(SystemTime::now()),
        });
        *self.snapshot.write().await = snapshot;
        debug!(
            "Scan of {} published {} entries",
            self.root.display(),
            count
        );
        Ok(count)
    }

    /// Classifies one file and recovers its timestamp from the filename.
    /// Returns `None` for non-media files, files missing the configured
    /// prefix, and filenames with no parsable timestamp (logged).
    fn index_file(&self, path: &Path, size_bytes: u64) -> Option<ScanEntry> {
        let kind = classify(path)?;
        let stem = path.file_stem()?.to_str()?;
        let stem = match &self.file_prefix {
            Some(prefix) => stem.strip_prefix(prefix.as_str())?,
            None => stem,
        };
        match parse_digit_timestamp(stem) {
            Some(timestamp_ms) => Some(ScanEntry {
                path: path.to_path_buf(),
                timestamp_ms,
                kind,
                size_bytes,
            }),
            None => {
                warn!(
                    "Skipping {}: no parsable recording timestamp",
                    path.display()
                );
                None
            }
        }
    }
}

fn classify(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else {
        None
    }
}

/// Finds the first run of at least 14 consecutive digits in the stem and
/// reads it as local-time YYYYMMDDHHMMSS groups.
fn parse_digit_timestamp(stem: &str) -> Option<i64> {
    let bytes = stem.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start >= TIMESTAMP_DIGITS {
                return digits_to_epoch_ms(&stem[start..start + TIMESTAMP_DIGITS]);
            }
        } else {
            i += 1;
        }
    }
    None
}

fn digits_to_epoch_ms(digits: &str) -> Option<i64> {
    let year = digits[0..4].parse().ok()?;
    let mon = digits[4..6].parse().ok()?;
    let day = digits[6..8].parse().ok()?;
    let hour = digits[8..10].parse().ok()?;
    let min = digits[10..12].parse().ok()?;
    let sec = digits[12..14].parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, mon, day)?.and_hms_opt(hour, min, sec)?;
    Some(
        Local
            .from_local_datetime(&naive)
            .earliest()?
            .timestamp_millis(),
    )
}
