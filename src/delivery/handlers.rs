use crate::config::DeviceConfig;
use crate::error::DeliveryError;
use crate::registry::{ClipSource, DeviceHandler};
use crate::remote::RemoteSearchSource;
use crate::scanner::FilesystemScanSource;
use crate::thumbnails::MediaSource;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::range::parse_range;
use super::server::ServerState;

/// Single entry point for the per-device webhooks. The webhook segment
/// selects the operation; everything it needs rides in query parameters.
pub async fn webhook_handler(
    State(state): State<ServerState>,
    Path((device_id, webhook)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    debug!("Webhook '{}' for device '{}'", webhook, device_id);

    // the webhook name is checked first: a bad path is 404 even when the
    // device is also unknown
    if !matches!(webhook.as_str(), "videoclip" | "thumbnail" | "clips") {
        return diagnostic(
            StatusCode::NOT_FOUND,
            format!("unknown webhook '{}'", webhook),
        );
    }

    let handler = match state.registry.get(&device_id).await {
        Some(handler) => handler,
        None => {
            let e = DeliveryError::UnknownDevice { device_id };
            return diagnostic(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    match webhook.as_str() {
        "videoclip" => videoclip(&state, &handler, &params, &headers).await,
        "thumbnail" => thumbnail(&state, &handler, &params).await,
        "clips" => clips(&state, &handler, &params).await,
        _ => unreachable!(),
    }
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let devices = state.registry.ids().await;

    let health_info = serde_json::json!({
        "status": "healthy",
        "device_count": devices.len(),
        "devices": devices,
    });

    (StatusCode::OK, axum::Json(health_info))
}

/// Streams the clip's bytes, honoring a single `Range` header. Local files
/// are read directly; remote clips are proxied (or redirected) through the
/// device's token-bearing download URL.
async fn videoclip(
    state: &ServerState,
    handler: &Arc<DeviceHandler>,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Response {
    let locator = match params.get("path") {
        Some(locator) => locator,
        None => {
            return diagnostic(
                StatusCode::INTERNAL_SERVER_ERROR,
                "missing 'path' parameter".to_string(),
            )
        }
    };

    match handler.source() {
        ClipSource::Filesystem(scanner) => serve_local_file(scanner, locator, headers).await,
        ClipSource::Remote(remote) => {
            serve_remote_clip(state, handler.config(), remote, locator, headers).await
        }
    }
}

async fn serve_local_file(
    scanner: &Arc<FilesystemScanSource>,
    locator: &str,
    headers: &HeaderMap,
) -> Response {
    let requested = PathBuf::from(locator);
    let path = if requested.is_absolute() {
        requested
    } else {
        scanner.root().join(requested)
    };
    // only files under the scan root are servable
    if !scanner.contains_path(&path).await {
        return diagnostic(
            StatusCode::BAD_REQUEST,
            format!("'{}' is not a known recording", locator),
        );
    }

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            return diagnostic(
                StatusCode::BAD_REQUEST,
                format!("cannot open '{}': {}", locator, e),
            )
        }
    };
    let size = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            return diagnostic(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("cannot stat '{}': {}", locator, e),
            )
        }
    };

    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let range = match parse_range(range_header, size) {
        Ok(range) => range,
        Err(e) => {
            info!("Unsatisfiable range for '{}': {}", locator, e);
            return built(
                Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", size))
                    .body(Body::empty()),
            );
        }
    };

    let content_type = content_type_for(locator);
    match range {
        Some(range) => {
            if let Err(e) = file.seek(SeekFrom::Start(range.start)).await {
                return diagnostic(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("seek failed in '{}': {}", locator, e),
                );
            }
            let stream = ReaderStream::new(file.take(range.len()));
            built(
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONTENT_LENGTH, range.len())
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", range.start, range.end, size),
                    )
                    .body(Body::from_stream(stream)),
            )
        }
        None => built(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CONTENT_LENGTH, size)
                .body(Body::from_stream(ReaderStream::new(file))),
        ),
    }
}

async fn serve_remote_clip(
    state: &ServerState,
    config: &DeviceConfig,
    remote: &Arc<RemoteSearchSource>,
    locator: &str,
    headers: &HeaderMap,
) -> Response {
    let locators = match remote.playback_locators(locator).await {
        Ok(locators) => locators,
        Err(e) => {
            return diagnostic(
                StatusCode::BAD_REQUEST,
                format!("device session unavailable: {}", e),
            )
        }
    };

    if config.redirect_playback {
        debug!("Redirecting '{}' to device playback", locator);
        return built(
            Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, locators.playback_url)
                .body(Body::empty()),
        );
    }

    // relay the inbound headers (range included) minus hop-by-hop ones
    let mut request = state.http.get(&locators.download_url);
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            request = request.header(name, value);
        }
    }
    let upstream = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            return diagnostic(
                StatusCode::BAD_REQUEST,
                format!("upstream request failed: {}", e),
            )
        }
    };

    let status = upstream.status();
    if !(status.is_success() || status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE) {
        let e = DeliveryError::UpstreamStatus {
            status: status.as_u16(),
        };
        warn!("Proxying '{}' failed: {}", locator, e);
        return diagnostic(StatusCode::BAD_REQUEST, e.to_string());
    }

    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            builder = builder.header(name, value);
        }
    }

    // a failure mid-stream can only end the body early, the status line is
    // already on the wire
    let locator = locator.to_string();
    let stream = async_stream::stream! {
        let mut chunks = upstream.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => yield Ok::<_, axum::Error>(bytes),
                Err(e) => {
                    warn!("Upstream stream for '{}' broke: {}", locator, e);
                    break;
                }
            }
        }
    };
    built(builder.body(Body::from_stream(stream)))
}

/// Returns the cached thumbnail, generating it on demand. A clip that
/// yields no frame answers 400 rather than a broken image.
async fn thumbnail(
    state: &ServerState,
    handler: &Arc<DeviceHandler>,
    params: &HashMap<String, String>,
) -> Response {
    let locator = match params.get("path") {
        Some(locator) => locator,
        None => {
            return diagnostic(
                StatusCode::INTERNAL_SERVER_ERROR,
                "missing 'path' parameter".to_string(),
            )
        }
    };

    let source = match handler.source() {
        ClipSource::Filesystem(scanner) => {
            let requested = PathBuf::from(locator);
            let path = if requested.is_absolute() {
                requested
            } else {
                scanner.root().join(requested)
            };
            if !scanner.contains_path(&path).await {
                return diagnostic(
                    StatusCode::BAD_REQUEST,
                    format!("'{}' is not a known recording", locator),
                );
            }
            MediaSource::LocalFile(path)
        }
        ClipSource::Remote(remote) => match remote.playback_locators(locator).await {
            Ok(locators) => MediaSource::RemoteUrl(locators.download_url),
            Err(e) => {
                return diagnostic(
                    StatusCode::BAD_REQUEST,
                    format!("device session unavailable: {}", e),
                )
            }
        },
    };

    let cached = state
        .thumbnails
        .get_or_generate(handler.id(), locator, &source)
        .await;
    let path = match cached {
        Some(path) => path,
        None => {
            return diagnostic(
                StatusCode::BAD_REQUEST,
                format!("no thumbnail available for '{}'", locator),
            )
        }
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => built(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "image/jpeg")
                .header(header::CONTENT_LENGTH, bytes.len())
                .body(Body::from(bytes)),
        ),
        Err(e) => diagnostic(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("cached thumbnail unreadable: {}", e),
        ),
    }
}

/// Lists the device's clips in `[startTime, endTime]` as JSON. Both
/// bounds are required epoch-millisecond parameters: an open interval
/// against a remote device would fan out into one search per elapsed
/// calendar day.
async fn clips(
    state: &ServerState,
    handler: &Arc<DeviceHandler>,
    params: &HashMap<String, String>,
) -> Response {
    let start_ms = match bound_param(params, "startTime") {
        Ok(start) => start,
        Err(response) => return response,
    };
    let end_ms = match bound_param(params, "endTime") {
        Ok(end) => end,
        Err(response) => return response,
    };

    let clips = state.catalog.list_clips(handler, start_ms, end_ms).await;
    info!(
        "Listed {} clips for '{}' in {}..{}",
        clips.len(),
        handler.id(),
        start_ms,
        end_ms
    );
    axum::Json(clips).into_response()
}

fn bound_param(params: &HashMap<String, String>, name: &str) -> Result<i64, Response> {
    match params.get(name) {
        Some(raw) => raw.parse::<i64>().map_err(|_| {
            diagnostic(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("malformed {} '{}'", name, raw),
            )
        }),
        None => Err(diagnostic(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("missing '{}' parameter", name),
        )),
    }
}

fn content_type_for(locator: &str) -> &'static str {
    let lower = locator.to_ascii_lowercase();
    match lower.rsplit('.').next() {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

/// Plain-text diagnostic body so failures are debuggable from the client.
fn diagnostic(status: StatusCode, message: String) -> Response {
    debug!("Answering {}: {}", status, message);
    (status, message).into_response()
}

fn built(result: Result<Response<Body>, axum::http::Error>) -> Response {
    match result {
        Ok(response) => response.into_response(),
        Err(e) => {
            warn!("Failed to assemble response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
