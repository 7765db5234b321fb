//! In-place property patching.
//!
//! This is the only mutation path in the crate. The structure block is never
//! resized: a replacement value must fit the property's original allocation,
//! and every precondition is checked before the first byte is written, so a
//! failed patch leaves the blob byte-for-byte untouched.

use crate::fdt::{find_property, FdtHeader};
use crate::{decode_string_list, DtbPatchError, Result};

/// Report of a successful in-place patch.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// Absolute offset of the patched value within the blob.
    pub value_offset: usize,
    /// Allocated length of the value in bytes.
    pub value_len: usize,
    /// Decoded value before the patch.
    pub old_value: String,
    /// Decoded value after the patch.
    pub new_value: String,
}

/// Validate every precondition of [`patch_property`] without writing: the
/// header must parse and fit the slice, `new_value` must be ASCII, the
/// property must exist, and the encoded value must fit its allocation.
///
/// Returns the value's absolute offset and allocated length. A successful
/// check means the same arguments will patch; dry runs use this to surface
/// the exact error a real run would hit.
pub fn check_patch(blob: &[u8], path: &str, name: &str, new_value: &str) -> Result<(usize, usize)> {
    let header = FdtHeader::parse(blob)?;
    header.validate_bounds(blob.len())?;

    if !new_value.is_ascii() {
        return Err(DtbPatchError::Other(format!(
            "replacement value is not ASCII: {new_value:?}"
        )));
    }

    let (value_offset, value_len) =
        find_property(blob, &header, path, name).ok_or_else(|| DtbPatchError::PropertyNotFound {
            path: path.to_string(),
            name: name.to_string(),
        })?;

    // Encoded form is the ASCII bytes plus one trailing NUL.
    let need = new_value.len() + 1;
    if need > value_len {
        return Err(DtbPatchError::ValueTooLarge {
            need,
            have: value_len,
        });
    }

    Ok((value_offset, value_len))
}

/// Overwrite the value of `(path, name)` inside `blob` with `new_value`
/// encoded as ASCII plus one trailing NUL, zero-filling the rest of the
/// original allocation.
///
/// `blob` must start at the blob's first byte; it may be a mutable window
/// into a larger mapped image. The header is re-validated against the slice
/// length, so writes can never land outside the blob's declared bounds.
pub fn patch_property(
    blob: &mut [u8],
    path: &str,
    name: &str,
    new_value: &str,
) -> Result<PatchOutcome> {
    let (value_offset, value_len) = check_patch(blob, path, name, new_value)?;

    let mut encoded = new_value.as_bytes().to_vec();
    encoded.push(0);

    let old_value = decode_string_list(&blob[value_offset..value_offset + value_len]);
    blob[value_offset..value_offset + encoded.len()].copy_from_slice(&encoded);
    blob[value_offset + encoded.len()..value_offset + value_len].fill(0);

    Ok(PatchOutcome {
        value_offset,
        value_len,
        old_value,
        new_value: decode_string_list(&blob[value_offset..value_offset + value_len]),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
