//! Normalizes raw hits from either clip source into [`VideoClip`] listings.

use crate::decoder::decode_filename;
use crate::registry::{ClipSource, DeviceHandler};
use crate::remote::protocol::SearchHit;
use crate::scanner::ScanEntry;
use crate::windows::{split_into_days, SearchWindow};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// The single event classification currently emitted.
pub const MOTION_EVENT: &str = "motion";

/// A normalized recording clip. Built per listing call, immutable once
/// constructed, owned by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct VideoClip {
    /// Opaque source locator, unique within a device.
    pub id: String,
    #[serde(rename = "startTime")]
    pub start_time_ms: i64,
    /// Present for remote-sourced clips; unknown for filesystem exports.
    #[serde(rename = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(rename = "detectionClasses")]
    pub detection_classes: Vec<String>,
    pub event: String,
    pub resources: ClipResources,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipResources {
    #[serde(rename = "videoUrl")]
    pub video_url: String,
    #[serde(rename = "thumbnailUrl")]
    pub thumbnail_url: String,
}

/// Builds the resource URLs attached to listed clips. Kept behind a trait
/// so the webhook layout stays an integration detail of the host.
pub trait ClipUrlBuilder: Send + Sync {
    fn video_url(&self, device_id: &str, locator: &str) -> String;
    fn thumbnail_url(&self, device_id: &str, locator: &str) -> String;
}

const QUERY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?');

/// Default builder targeting this server's own webhook endpoints.
pub struct EndpointUrls {
    base: String,
}

impl EndpointUrls {
    pub fn new<S: Into<String>>(base: S) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn webhook(&self, device_id: &str, webhook: &str, locator: &str) -> String {
        format!(
            "{}/endpoint/{}/{}?path={}",
            self.base,
            device_id,
            webhook,
            utf8_percent_encode(locator, QUERY_ENCODE_SET)
        )
    }
}

impl ClipUrlBuilder for EndpointUrls {
    fn video_url(&self, device_id: &str, locator: &str) -> String {
        self.webhook(device_id, "videoclip", locator)
    }

    fn thumbnail_url(&self, device_id: &str, locator: &str) -> String {
        self.webhook(device_id, "thumbnail", locator)
    }
}

/// Merges day-window splitting, the device's clip source, and filename
/// metadata decoding into normalized clip listings.
pub struct ClipCatalog {
    urls: Arc<dyn ClipUrlBuilder>,
}

impl ClipCatalog {
    pub fn new(urls: Arc<dyn ClipUrlBuilder>) -> Self {
        Self { urls }
    }

    /// Lists the device's clips overlapping `[start_ms, end_ms]`, ordered as
    /// the source returns them. Per-hit decoration failures are logged and
    /// never abort the batch.
    pub async fn list_clips(
        &self,
        handler: &DeviceHandler,
        start_ms: i64,
        end_ms: i64,
    ) -> Vec<VideoClip> {
        match handler.source() {
            ClipSource::Remote(remote) => {
                let windows = split_into_days(start_ms, end_ms);
                let hits = remote.list(&windows).await;
                hits.into_iter()
                    .filter_map(|hit| self.normalize_remote(handler.id(), hit))
                    .collect()
            }
            ClipSource::Filesystem(scanner) => {
                // the snapshot filter is already a pure predicate, so the
                // day windows collapse to the outer range
                let outer = SearchWindow {
                    start_ms,
                    end_ms: end_ms.max(start_ms),
                };
                scanner
                    .list(&outer)
                    .await
                    .into_iter()
                    .map(|entry| self.normalize_scan(handler.id(), entry))
                    .collect()
            }
        }
    }

    fn normalize_remote(&self, device_id: &str, hit: SearchHit) -> Option<VideoClip> {
        let start_time_ms = match hit.start_time.to_epoch_ms() {
            Some(start) => start,
            None => {
                warn!("Skipping hit '{}': unrepresentable start time", hit.name);
                return None;
            }
        };
        let duration_ms = hit
            .end_time
            .to_epoch_ms()
            .map(|end| (end - start_time_ms).max(0));
        let detection_classes = match decode_filename(&hit.name) {
            Ok(decoded) => decoded.detection_classes,
            Err(e) => {
                debug!("No metadata enrichment for '{}': {}", hit.name, e);
                Vec::new()
            }
        };
        Some(VideoClip {
            resources: self.resources(device_id, &hit.name),
            id: hit.name,
            start_time_ms,
            duration_ms,
            detection_classes,
            event: MOTION_EVENT.to_string(),
        })
    }

    fn normalize_scan(&self, device_id: &str, entry: ScanEntry) -> VideoClip {
        // exported filenames carry no flag word, so the classification
        // stays the bare event label
        let locator = entry.path.to_string_lossy().into_owned();
        VideoClip {
            resources: self.resources(device_id, &locator),
            id: locator,
            start_time_ms: entry.timestamp_ms,
            duration_ms: None,
            detection_classes: vec![MOTION_EVENT.to_string()],
            event: MOTION_EVENT.to_string(),
        }
    }

    fn resources(&self, device_id: &str, locator: &str) -> ClipResources {
        ClipResources {
            video_url: self.urls.video_url(device_id, locator),
            thumbnail_url: self.urls.thumbnail_url(device_id, locator),
        }
    }
}
