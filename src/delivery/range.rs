//! Byte-range header parsing for clip delivery.

use crate::error::DeliveryError;

/// An inclusive byte range already validated against a resource size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero for a validated range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses a `Range` header against a resource of `size` bytes.
///
/// `Ok(None)` means "serve the whole resource": no header, a header this
/// server does not speak (multipart or non-byte units), or a syntactically
/// broken one. Only a well-formed range that lies past the end of the
/// resource is an error, which callers answer with 416.
pub fn parse_range(header: Option<&str>, size: u64) -> Result<Option<ByteRange>, DeliveryError> {
    let header = match header {
        Some(header) => header.trim(),
        None => return Ok(None),
    };
    let span = match header.strip_prefix("bytes=") {
        Some(span) => span.trim(),
        None => return Ok(None),
    };
    // multipart ranges are not supported; fall back to the full resource
    if span.contains(',') {
        return Ok(None);
    }
    let (start, end) = match span.split_once('-') {
        Some(parts) => parts,
        None => return Ok(None),
    };

    let unsatisfiable = || DeliveryError::RangeUnsatisfiable {
        range: header.to_string(),
        size,
    };

    let start: u64 = match start.trim().parse() {
        Ok(start) => start,
        Err(_) => return Ok(None),
    };
    if start >= size {
        return Err(unsatisfiable());
    }

    let end = match end.trim() {
        // open-ended: "bytes=100-"
        "" => size - 1,
        end => match end.parse::<u64>() {
            // an end past the resource is clamped, per RFC 9110
            Ok(end) => end.min(size - 1),
            Err(_) => return Ok(None),
        },
    };
    if end < start {
        return Err(unsatisfiable());
    }

    Ok(Some(ByteRange { start, end }))
}
