//! # dtbpatch
//!
//! A Rust library for locating and patching Flattened Device Tree (FDT)
//! blobs embedded inside firmware or disk images, without a decompile /
//! recompile round trip.
//!
//! The pipeline:
//!
//! - **Scan**: search an arbitrary byte buffer for the FDT magic and keep
//!   every hit whose header is structurally plausible
//! - **Select**: dedup by content digest, filter by strings-block content
//!   and `/model`, prefer the blob whose target node still needs the patch
//! - **Patch**: overwrite one existing string property in place, never
//!   resizing the structure block; shrinkage is zero-padded
//!
//! ## Example
//!
//! ```no_run
//! use dtbpatch::patch::patch_property;
//! use dtbpatch::scan::{locate_blobs, select_candidate, SelectOptions, DEFAULT_MAX_BLOB_SIZE};
//!
//! # fn main() -> dtbpatch::Result<()> {
//! let mut image = std::fs::read("sdcard.img")?;
//! let node = "/soc/mmc@50450000";
//!
//! let candidates = locate_blobs(&image, node, DEFAULT_MAX_BLOB_SIZE);
//! let selection = select_candidate(&image, candidates, &SelectOptions::default())?;
//! let chosen = selection.chosen().clone();
//!
//! let blob = &mut image[chosen.offset..chosen.offset + chosen.total_size()];
//! let outcome = patch_property(blob, node, "status", "okay")?;
//! println!("status: {} -> {}", outcome.old_value, outcome.new_value);
//! # Ok(())
//! # }
//! ```

pub mod dump;
pub mod fdt;
pub mod patch;
pub mod scan;

#[cfg(test)]
pub(crate) mod testutil;

use std::io;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DtbPatchError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("buffer too small ({size} bytes, need at least {min})")]
    TooSmall { size: usize, min: usize },

    #[error("bad FDT magic")]
    InvalidMagic,

    #[error("{what} (0x{value:x}) exceeds container bound (0x{limit:x})")]
    OutOfBounds {
        what: &'static str,
        value: usize,
        limit: usize,
    },

    #[error("no DTB candidate survived filtering")]
    NoCandidate,

    #[error("property '{name}' not found at {path}")]
    PropertyNotFound { path: String, name: String },

    #[error("replacement value needs {need} bytes but the allocation is {have}")]
    ValueTooLarge { need: usize, have: usize },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DtbPatchError>;

// ---------------------------------------------------------------------------
// Byte helpers
// ---------------------------------------------------------------------------

/// Read a big-endian u32 from a byte slice at the given offset.
pub fn get_u32(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes(data[off..off + 4].try_into().unwrap())
}

/// Round up to the next multiple of 4.
pub const fn align4(x: usize) -> usize {
    (x + 3) & !3
}

// ---------------------------------------------------------------------------
// Display decoding
// ---------------------------------------------------------------------------

/// Decode an FDT text property for display.
///
/// An empty value decodes to `""`; otherwise the NUL-separated segments are
/// joined with commas (the FDT string-list convention, as used by
/// `compatible`). Decoding never fails; these are diagnostic strings, so
/// non-UTF-8 bytes are substituted rather than rejected.
pub fn decode_string_list(value: &[u8]) -> String {
    value
        .split(|&b| b == 0)
        .filter(|seg| !seg.is_empty())
        .map(|seg| String::from_utf8_lossy(seg).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Render a digest as a lowercase hex string for reporting.
pub fn hex_str(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Render an arbitrary property value for inspection output.
///
/// Values that look like NUL-terminated printable text decode as a string
/// list; anything else (cells, binary data, empty values) renders as hex.
pub fn render_property_value(value: &[u8]) -> String {
    let is_text = value.last() == Some(&0)
        && value[..value.len() - 1]
            .iter()
            .all(|&b| b == 0 || (0x20..0x7f).contains(&b));
    if is_text {
        decode_string_list(value)
    } else {
        hex_str(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align4_rounds_up() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(9), 12);
    }

    #[test]
    fn get_u32_big_endian() {
        let buf = [0xd0, 0x0d, 0xfe, 0xed, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(get_u32(&buf, 0), 0xd00dfeed);
        assert_eq!(get_u32(&buf, 4), 0x100);
    }

    #[test]
    fn decode_empty_value() {
        assert_eq!(decode_string_list(b""), "");
    }

    #[test]
    fn decode_single_string() {
        assert_eq!(decode_string_list(b"disabled\0"), "disabled");
    }

    #[test]
    fn decode_string_list_joins_with_commas() {
        assert_eq!(
            decode_string_list(b"vendor,board\0generic,soc\0"),
            "vendor,board,generic,soc"
        );
    }

    #[test]
    fn decode_is_permissive_about_non_utf8() {
        let decoded = decode_string_list(&[0x6f, 0x6b, 0xff, 0x00]);
        assert!(decoded.starts_with("ok"));
    }

    #[test]
    fn hex_str_formats_lowercase() {
        assert_eq!(hex_str(&[0x00, 0xab, 0x10]), "00ab10");
    }

    #[test]
    fn render_text_property_as_string_list() {
        assert_eq!(render_property_value(b"okay\0"), "okay");
        assert_eq!(render_property_value(b"vendor,a\0vendor,b\0"), "vendor,a,vendor,b");
    }

    #[test]
    fn render_binary_property_as_hex() {
        assert_eq!(render_property_value(&[0, 0, 0, 1]), "00000001");
        assert_eq!(render_property_value(b""), "");
    }
}
