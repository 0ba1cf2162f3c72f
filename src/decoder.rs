//! Recovers recording attributes (size, detected-event classes) from the
//! bit-packed metadata a device embeds in recording filenames.
//!
//! A filename stem is underscore-separated; the field count selects the
//! device family (6 fields = single-channel camera, 9 fields = multi-channel
//! recorder) and the first field carries a two-hex-digit firmware version.
//! One field is a packed hex flag word. The packing is unusual: the whole
//! word is bit-reversed, named sub-ranges are addressed within the reversed
//! bit string, and each extracted sub-range is bit-reversed a second time to
//! recover its natural value. Both reversals are reproduced literally here.

use crate::error::DecodeError;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// Standalone camera: 6-field filenames.
    SingleChannel,
    /// Multi-channel recorder: 9-field filenames.
    MultiChannel,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::SingleChannel => write!(f, "single-channel"),
            DeviceFamily::MultiChannel => write!(f, "multi-channel"),
        }
    }
}

/// One named bit field within the packed flag word, addressed inside the
/// bit-reversed word.
#[derive(Debug, Clone, Copy)]
pub struct FlagField {
    pub name: &'static str,
    pub offset: u32,
    pub width: u32,
}

const fn field(name: &'static str, offset: u32, width: u32) -> FlagField {
    FlagField {
        name,
        offset,
        width,
    }
}

// The tables are literal per (family, version). Single-channel v1 appends
// one field to v0, while v2 moved ai_other ahead of encoder_type and added
// a trailing field; offsets are not a superset across versions, so no table
// is derived from another.

const SINGLE_CHANNEL_V0: &[FlagField] = &[
    field("resolution_index", 0, 7),
    field("tv_system", 7, 1),
    field("framerate", 8, 7),
    field("audio_index", 15, 2),
    field("ai_pd", 17, 1),
    field("ai_fd", 18, 1),
    field("ai_vd", 19, 1),
    field("ai_ad", 20, 1),
    field("encoder_type", 21, 1),
    field("is_schedule_record", 22, 1),
    field("is_motion_record", 23, 1),
    field("is_rf_record", 24, 1),
    field("is_doorbell_record", 25, 1),
];

const SINGLE_CHANNEL_V1: &[FlagField] = &[
    field("resolution_index", 0, 7),
    field("tv_system", 7, 1),
    field("framerate", 8, 7),
    field("audio_index", 15, 2),
    field("ai_pd", 17, 1),
    field("ai_fd", 18, 1),
    field("ai_vd", 19, 1),
    field("ai_ad", 20, 1),
    field("encoder_type", 21, 1),
    field("is_schedule_record", 22, 1),
    field("is_motion_record", 23, 1),
    field("is_rf_record", 24, 1),
    field("is_doorbell_record", 25, 1),
    field("ai_other", 26, 1),
];

const SINGLE_CHANNEL_V2: &[FlagField] = &[
    field("resolution_index", 0, 7),
    field("tv_system", 7, 1),
    field("framerate", 8, 7),
    field("audio_index", 15, 2),
    field("ai_pd", 17, 1),
    field("ai_fd", 18, 1),
    field("ai_vd", 19, 1),
    field("ai_ad", 20, 1),
    field("ai_other", 21, 1),
    field("encoder_type", 22, 1),
    field("is_schedule_record", 23, 1),
    field("is_motion_record", 24, 1),
    field("is_rf_record", 25, 1),
    field("is_doorbell_record", 26, 1),
    field("is_package_record", 27, 1),
];

/// Multi-channel recorders kept one layout across every observed version.
const MULTI_CHANNEL: &[FlagField] = &[
    field("resolution_index", 0, 7),
    field("tv_system", 7, 1),
    field("framerate", 8, 7),
    field("audio_index", 15, 2),
    field("ai_pd", 17, 1),
    field("ai_fd", 18, 1),
    field("ai_vd", 19, 1),
    field("ai_ad", 20, 1),
    field("encoder_type", 21, 1),
    field("is_schedule_record", 22, 1),
    field("is_motion_record", 23, 1),
    field("is_rf_record", 24, 1),
    field("is_doorbell_record", 25, 1),
    field("is_ai_other_record", 26, 1),
    field("picture_layout_index", 27, 3),
    field("package_subtype", 30, 2),
];

pub fn flag_table(family: DeviceFamily, version: u8) -> Option<&'static [FlagField]> {
    match (family, version) {
        (DeviceFamily::SingleChannel, 0) => Some(SINGLE_CHANNEL_V0),
        (DeviceFamily::SingleChannel, 1) => Some(SINGLE_CHANNEL_V1),
        (DeviceFamily::SingleChannel, 2) => Some(SINGLE_CHANNEL_V2),
        (DeviceFamily::SingleChannel, _) => None,
        (DeviceFamily::MultiChannel, _) => Some(MULTI_CHANNEL),
    }
}

/// Reverses the low `width` bits of `value`.
pub fn reverse_bits(value: u64, width: u32) -> u64 {
    let mut out = 0u64;
    for i in 0..width {
        if value >> i & 1 == 1 {
            out |= 1 << (width - 1 - i);
        }
    }
    out
}

/// Attributes recovered from one recording filename.
#[derive(Debug, Clone)]
pub struct DecodedRecording {
    pub family: DeviceFamily,
    pub version: u8,
    pub size_bytes: u64,
    /// Flag name to decoded integer value, scoped to `(family, version)`.
    pub flags: HashMap<&'static str, u64>,
    pub detection_classes: Vec<String>,
}

const SINGLE_CHANNEL_FIELDS: usize = 6;
const MULTI_CHANNEL_FIELDS: usize = 9;
/// Byte range of the two version hex digits within the first field.
const VERSION_OFFSET: std::ops::Range<usize> = 4..6;

/// Decodes the packed metadata of a recording filename. The path and
/// extension are ignored; only the stem's underscore fields matter.
pub fn decode_filename(filename: &str) -> Result<DecodedRecording, DecodeError> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = name.split_once('.').map(|(s, _)| s).unwrap_or(name);
    let fields: Vec<&str> = stem.split('_').collect();

    let family = match fields.len() {
        SINGLE_CHANNEL_FIELDS => DeviceFamily::SingleChannel,
        MULTI_CHANNEL_FIELDS => DeviceFamily::MultiChannel,
        count => {
            return Err(DecodeError::FieldCount {
                filename: filename.to_string(),
                count,
            })
        }
    };

    let version_digits = fields[0]
        .get(VERSION_OFFSET)
        .ok_or_else(|| DecodeError::MissingVersion {
            filename: filename.to_string(),
        })?;
    let version = parse_hex(filename, version_digits)? as u8;

    let table = flag_table(family, version).ok_or(DecodeError::UnknownVersion {
        family,
        version,
    })?;

    let (flags_hex, size_hex) = match family {
        DeviceFamily::SingleChannel => (fields[4], fields[5]),
        DeviceFamily::MultiChannel => (fields[6], fields[7]),
    };

    let word = parse_hex(filename, flags_hex)?;
    let size_bytes = parse_hex(filename, size_hex)?;
    let flags = decode_flags(word, flags_hex.len() as u32 * 4, table);
    let detection_classes = detection_classes(family, &flags);

    Ok(DecodedRecording {
        family,
        version,
        size_bytes,
        flags,
        detection_classes,
    })
}

fn parse_hex(filename: &str, segment: &str) -> Result<u64, DecodeError> {
    if segment.is_empty() || segment.len() > 16 {
        return Err(DecodeError::NonHex {
            filename: filename.to_string(),
            segment: segment.to_string(),
        });
    }
    u64::from_str_radix(segment, 16).map_err(|_| DecodeError::NonHex {
        filename: filename.to_string(),
        segment: segment.to_string(),
    })
}

/// Applies the double-reversal rule: reverse the whole word across
/// `bit_width` bits, read each field's sub-range from the reversed bit
/// string (offset 0 = most significant end), then reverse the sub-range
/// again to get its value. Fields that fall outside the word are skipped.
pub fn decode_flags(
    word: u64,
    bit_width: u32,
    table: &'static [FlagField],
) -> HashMap<&'static str, u64> {
    let reversed = reverse_bits(word, bit_width);
    let mut flags = HashMap::with_capacity(table.len());
    for f in table {
        if f.offset + f.width > bit_width {
            continue;
        }
        let shift = bit_width - f.offset - f.width;
        let raw = (reversed >> shift) & ((1u64 << f.width) - 1);
        flags.insert(f.name, reverse_bits(raw, f.width));
    }
    flags
}

fn detection_classes(family: DeviceFamily, flags: &HashMap<&'static str, u64>) -> Vec<String> {
    let on = |name: &str| flags.get(name).copied().unwrap_or(0) == 1;
    let mut classes = Vec::new();
    if on("ai_pd") {
        classes.push("person".to_string());
    }
    if on("ai_vd") {
        classes.push("vehicle".to_string());
    }
    if on("ai_fd") {
        classes.push("face".to_string());
    }
    if on("ai_ad") {
        classes.push("animal".to_string());
    }
    let other_ai = match family {
        DeviceFamily::SingleChannel => on("ai_other"),
        DeviceFamily::MultiChannel => on("is_ai_other_record"),
    };
    if on("is_motion_record") || other_ai {
        classes.push("motion".to_string());
    }
    classes
}
