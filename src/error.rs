use crate::decoder::DeviceFamily;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClipserveError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filename decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl ClipserveError {
    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Malformed or unrecognized recording filename. Non-fatal: callers skip
/// metadata enrichment for the affected clip and keep the clip itself.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unexpected field count {count} in '{filename}'")]
    FieldCount { filename: String, count: usize },

    #[error("segment '{segment}' of '{filename}' is not hex")]
    NonHex { filename: String, segment: String },

    #[error("first field of '{filename}' is too short to carry a version")]
    MissingVersion { filename: String },

    #[error("no flag table for {family} version {version}")]
    UnknownVersion { family: DeviceFamily, version: u8 },
}

/// Failure to establish or keep an authenticated device session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("login rejected: {detail}")]
    LoginRejected { detail: String },

    #[error("login response carried no token")]
    MissingToken,

    #[error("session transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A clip source failed to produce results. The affected window or scan
/// pass yields nothing; the overall listing continues.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("device returned code {code} for {cmd}: {detail}")]
    Protocol {
        cmd: String,
        code: i64,
        detail: String,
    },

    #[error("malformed device response for {cmd}: {detail}")]
    MalformedResponse { cmd: String, detail: String },

    #[error("window {start_ms}..{end_ms} is not representable as device time fields")]
    UnrepresentableWindow { start_ms: i64, end_ms: i64 },

    #[error("scan failed under {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("source transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Clip bytes could not be delivered to the HTTP client.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("unknown device '{device_id}'")]
    UnknownDevice { device_id: String },

    #[error("range '{range}' not satisfiable against {size} bytes")]
    RangeUnsatisfiable { range: String, size: u64 },

    #[error("upstream returned status {status}")]
    UpstreamStatus { status: u16 },

    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("stream could not start: {detail}")]
    StreamStart { detail: String },
}

pub type Result<T> = std::result::Result<T, ClipserveError>;
