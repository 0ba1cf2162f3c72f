use super::server::DeliveryServerBuilder;
use crate::catalog::{ClipCatalog, EndpointUrls, MOTION_EVENT};
use crate::config::{DeviceConfig, ServerConfig, SourceKind};
use crate::registry::{ClipSource, DeviceRegistry};
use crate::thumbnails::{FrameExtractor, MediaSource, ThumbnailCache};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Local, TimeZone};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const CLIP_NAME: &str = "Cam_20230615143000.mp4";
const CLIP_SIZE: usize = 1000;

struct GoodExtractor;

#[async_trait]
impl FrameExtractor for GoodExtractor {
    async fn extract_jpeg(
        &self,
        _source: &MediaSource,
        _offset: Duration,
        dest: &Path,
    ) -> std::io::Result<()> {
        tokio::fs::write(dest, b"\xFF\xD8thumb\xFF\xD9").await
    }
}

struct BrokenExtractor;

#[async_trait]
impl FrameExtractor for BrokenExtractor {
    async fn extract_jpeg(
        &self,
        _source: &MediaSource,
        _offset: Duration,
        _dest: &Path,
    ) -> std::io::Result<()> {
        Err(std::io::Error::other("no frames"))
    }
}

struct Harness {
    router: Router,
    registry: Arc<DeviceRegistry>,
    _media: TempDir,
    _cache: TempDir,
}

fn clip_bytes() -> Vec<u8> {
    (0..CLIP_SIZE).map(|i| (i % 251) as u8).collect()
}

async fn harness_with(extractor: Arc<dyn FrameExtractor>) -> Harness {
    let media = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    std::fs::write(media.path().join(CLIP_NAME), clip_bytes()).unwrap();

    let registry = Arc::new(DeviceRegistry::new());
    let handler = registry
        .attach(DeviceConfig {
            id: "garage".to_string(),
            name: String::new(),
            kind: SourceKind::Filesystem,
            host: None,
            username: None,
            password: None,
            channel: 0,
            redirect_playback: false,
            session_refresh_seconds: 1800,
            root: Some(media.path().to_string_lossy().to_string()),
            file_prefix: Some("Cam_".to_string()),
            scan_interval_seconds: 300,
        })
        .await
        .unwrap();
    // don't race the attach-time scan
    if let ClipSource::Filesystem(scanner) = handler.source() {
        scanner.scan_once().await.unwrap();
    }

    let server = DeliveryServerBuilder::new()
        .config(ServerConfig::default())
        .registry(registry.clone())
        .catalog(Arc::new(ClipCatalog::new(Arc::new(EndpointUrls::new(
            "http://127.0.0.1:8554",
        )))))
        .thumbnails(Arc::new(ThumbnailCache::new(cache.path(), extractor)))
        .build()
        .unwrap();

    Harness {
        router: server.router(),
        registry,
        _media: media,
        _cache: cache,
    }
}

async fn harness() -> Harness {
    harness_with(Arc::new(GoodExtractor)).await
}

async fn send(router: &Router, uri: &str, range: Option<&str>) -> axum::response::Response {
    let mut request = Request::builder().uri(uri);
    if let Some(range) = range {
        request = request.header(header::RANGE, range);
    }
    router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn header_str<'a>(response: &'a axum::response::Response, name: header::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[tokio::test]
async fn full_download_returns_every_byte() {
    let h = harness().await;
    let uri = format!("/endpoint/garage/videoclip?path={}", CLIP_NAME);
    let response = send(&h.router, &uri, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "video/mp4");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), clip_bytes().as_slice());

    h.registry.shutdown().await;
}

#[tokio::test]
async fn bounded_range_yields_partial_content() {
    let h = harness().await;
    let uri = format!("/endpoint/garage/videoclip?path={}", CLIP_NAME);
    let response = send(&h.router, &uri, Some("bytes=100-199")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        "bytes 100-199/1000"
    );
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "100");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), &clip_bytes()[100..200]);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn open_ended_range_runs_to_the_last_byte() {
    let h = harness().await;
    let uri = format!("/endpoint/garage/videoclip?path={}", CLIP_NAME);
    let response = send(&h.router, &uri, Some("bytes=900-")).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(&response, header::CONTENT_RANGE),
        "bytes 900-999/1000"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), &clip_bytes()[900..]);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn range_past_the_end_is_416() {
    let h = harness().await;
    let uri = format!("/endpoint/garage/videoclip?path={}", CLIP_NAME);
    let response = send(&h.router, &uri, Some("bytes=5000-")).await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes */1000");

    h.registry.shutdown().await;
}

#[tokio::test]
async fn unknown_webhook_is_404() {
    let h = harness().await;
    let response = send(&h.router, "/endpoint/garage/livestream", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    h.registry.shutdown().await;
}

#[tokio::test]
async fn unknown_device_is_400() {
    let h = harness().await;
    let response = send(&h.router, "/endpoint/attic/clips", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    h.registry.shutdown().await;
}

#[tokio::test]
async fn missing_path_parameter_is_500() {
    let h = harness().await;
    let response = send(&h.router, "/endpoint/garage/videoclip", None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    h.registry.shutdown().await;
}

#[tokio::test]
async fn path_outside_the_scan_root_is_rejected() {
    let h = harness().await;
    let response = send(
        &h.router,
        "/endpoint/garage/videoclip?path=/etc/hostname",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    h.registry.shutdown().await;
}

#[tokio::test]
async fn clips_listing_returns_normalized_json() {
    let h = harness().await;
    let start = Local
        .with_ymd_and_hms(2023, 6, 15, 0, 0, 0)
        .unwrap()
        .timestamp_millis();
    let end = Local
        .with_ymd_and_hms(2023, 6, 16, 0, 0, 0)
        .unwrap()
        .timestamp_millis();
    let uri = format!("/endpoint/garage/clips?startTime={}&endTime={}", start, end);
    let response = send(&h.router, &uri, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let listed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let clips = listed.as_array().unwrap();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0]["event"], MOTION_EVENT);
    assert!(clips[0]["resources"]["videoUrl"]
        .as_str()
        .unwrap()
        .contains("/endpoint/garage/videoclip?path="));
    assert!(clips[0]["startTime"].is_i64());
    assert!(clips[0].get("duration").is_none());

    h.registry.shutdown().await;
}

#[tokio::test]
async fn clips_with_malformed_bounds_is_500() {
    let h = harness().await;
    let response = send(
        &h.router,
        "/endpoint/garage/clips?startTime=abc&endTime=0",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    h.registry.shutdown().await;
}

#[tokio::test]
async fn clips_requires_both_bounds() {
    let h = harness().await;

    // a boundless listing against a remote device would mean one search
    // command per elapsed calendar day, so the envelope is rejected
    let response = send(&h.router, "/endpoint/garage/clips", None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = send(&h.router, "/endpoint/garage/clips?startTime=0", None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("endTime"));

    h.registry.shutdown().await;
}

#[tokio::test]
async fn thumbnail_is_served_as_jpeg() {
    let h = harness().await;
    let uri = format!("/endpoint/garage/thumbnail?path={}", CLIP_NAME);
    let response = send(&h.router, &uri, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "image/jpeg");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), b"\xFF\xD8thumb\xFF\xD9");

    h.registry.shutdown().await;
}

#[tokio::test]
async fn failed_thumbnail_generation_is_400() {
    let h = harness_with(Arc::new(BrokenExtractor)).await;
    let uri = format!("/endpoint/garage/thumbnail?path={}", CLIP_NAME);
    let response = send(&h.router, &uri, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    h.registry.shutdown().await;
}

async fn login_ok() -> Json<serde_json::Value> {
    Json(serde_json::json!([{
        "cmd": "Login",
        "code": 0,
        "value": {"Token": {"name": "tokX", "leaseTime": 3600}}
    }]))
}

async fn serve_camera(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Fake camera: POST answers every command as a successful login, GET
/// (the download path) answers with a fixed status and body.
async fn spawn_fake_camera(download_status: StatusCode, body: &'static str) -> String {
    let app = Router::new().route(
        "/cgi-bin/api.cgi",
        post(login_ok).get(move || async move { (download_status, body) }),
    );
    serve_camera(app).await
}

/// Fake camera whose download path reports which inbound headers reached
/// it.
async fn spawn_header_aware_camera() -> String {
    let app = Router::new().route(
        "/cgi-bin/api.cgi",
        post(login_ok).get(|request_headers: axum::http::HeaderMap| async move {
            if request_headers.contains_key(header::CONNECTION) {
                return (StatusCode::OK, "hop-by-hop leaked");
            }
            if request_headers.contains_key(header::IF_RANGE) {
                (StatusCode::OK, "forwarded")
            } else {
                (StatusCode::OK, "dropped")
            }
        }),
    );
    serve_camera(app).await
}

async fn remote_harness(host: &str, redirect: bool) -> Harness {
    let media = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let registry = Arc::new(DeviceRegistry::new());
    registry
        .attach(DeviceConfig {
            id: "front".to_string(),
            name: String::new(),
            kind: SourceKind::Remote,
            host: Some(host.to_string()),
            username: Some("admin".to_string()),
            password: Some("pw".to_string()),
            channel: 0,
            redirect_playback: redirect,
            session_refresh_seconds: 1800,
            root: None,
            file_prefix: None,
            scan_interval_seconds: 300,
        })
        .await
        .unwrap();

    let server = DeliveryServerBuilder::new()
        .config(ServerConfig::default())
        .registry(registry.clone())
        .catalog(Arc::new(ClipCatalog::new(Arc::new(EndpointUrls::new(
            "http://127.0.0.1:8554",
        )))))
        .thumbnails(Arc::new(ThumbnailCache::new(
            cache.path(),
            Arc::new(GoodExtractor),
        )))
        .build()
        .unwrap();

    Harness {
        router: server.router(),
        registry,
        _media: media,
        _cache: cache,
    }
}

#[tokio::test]
async fn redirecting_device_answers_302_with_playback_url() {
    let host = spawn_fake_camera(StatusCode::OK, "").await;
    let h = remote_harness(&host, true).await;

    let response = send(
        &h.router,
        "/endpoint/front/videoclip?path=/Mp4Record/clip.mp4",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = header_str(&response, header::LOCATION).to_string();
    assert!(location.contains("cmd=Playback"));
    assert!(location.contains("source=Mp4Record/clip.mp4"));
    assert!(location.contains("token=tokX"));

    h.registry.shutdown().await;
}

#[tokio::test]
async fn upstream_failure_maps_to_400_diagnostic() {
    let host = spawn_fake_camera(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
    let h = remote_harness(&host, false).await;

    let response = send(
        &h.router,
        "/endpoint/front/videoclip?path=Mp4Record/clip.mp4",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("500"));

    h.registry.shutdown().await;
}

#[tokio::test]
async fn proxy_forwards_inbound_headers_minus_hop_by_hop() {
    let host = spawn_header_aware_camera().await;
    let h = remote_harness(&host, false).await;

    let request = Request::builder()
        .uri("/endpoint/front/videoclip?path=Mp4Record/clip.mp4")
        .header(header::IF_RANGE, "\"an-etag\"")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), b"forwarded");

    h.registry.shutdown().await;
}

#[tokio::test]
async fn proxy_relays_upstream_bytes() {
    let host = spawn_fake_camera(StatusCode::OK, "clip-bytes").await;
    let h = remote_harness(&host, false).await;

    let response = send(
        &h.router,
        "/endpoint/front/videoclip?path=Mp4Record/clip.mp4",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), b"clip-bytes");

    h.registry.shutdown().await;
}

#[tokio::test]
async fn health_reports_attached_devices() {
    let h = harness().await;
    let response = send(&h.router, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["devices"][0], "garage");
    h.registry.shutdown().await;
}
