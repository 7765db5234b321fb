//! FDT (Flattened Device Tree) binary format: header, token walk, property
//! lookup.
//!
//! Everything here is read-only analysis on raw blob bytes. All multi-byte
//! fields are big-endian and decoded explicitly from byte offsets; nothing is
//! pointer-cast. The token walk is deliberately tolerant: malformed or
//! trailing data ends the walk early and the records accumulated so far are
//! kept, because a partial read of a mostly-good blob is still useful during
//! scanning. Callers that need strict validity (the patcher) check their own
//! preconditions up front.

use std::collections::HashMap;

use crate::{align4, get_u32, DtbPatchError, Result};

// ---------------------------------------------------------------------------
// FDT constants
// ---------------------------------------------------------------------------

pub const FDT_MAGIC: u32 = 0xd00dfeed;
pub const FDT_BEGIN_NODE: u32 = 0x00000001;
pub const FDT_END_NODE: u32 = 0x00000002;
pub const FDT_PROP: u32 = 0x00000003;
pub const FDT_NOP: u32 = 0x00000004;
pub const FDT_END: u32 = 0x00000009;

// Header field offsets
pub const HDR_MAGIC: usize = 0;
pub const HDR_TOTALSIZE: usize = 4;
pub const HDR_OFF_DT_STRUCT: usize = 8;
pub const HDR_OFF_DT_STRINGS: usize = 12;
pub const HDR_SIZE_DT_STRINGS: usize = 32;
pub const HDR_SIZE_DT_STRUCT: usize = 36;
pub const HDR_SIZE: usize = 40;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// The five size/offset fields of the fixed 40-byte FDT header.
///
/// Offsets are absolute within the blob, sizes in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdtHeader {
    pub total_size: usize,
    pub struct_offset: usize,
    pub strings_offset: usize,
    pub strings_size: usize,
    pub struct_size: usize,
}

impl FdtHeader {
    /// Parse the header at the start of `data`.
    ///
    /// Fails with `TooSmall` if fewer than 40 bytes are available and with
    /// `InvalidMagic` on a magic mismatch. Does not check the declared
    /// offsets/sizes; that is [`FdtHeader::validate_bounds`], which the
    /// locator applies to untrusted regions.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HDR_SIZE {
            return Err(DtbPatchError::TooSmall {
                size: data.len(),
                min: HDR_SIZE,
            });
        }
        if get_u32(data, HDR_MAGIC) != FDT_MAGIC {
            return Err(DtbPatchError::InvalidMagic);
        }
        Ok(Self {
            total_size: get_u32(data, HDR_TOTALSIZE) as usize,
            struct_offset: get_u32(data, HDR_OFF_DT_STRUCT) as usize,
            strings_offset: get_u32(data, HDR_OFF_DT_STRINGS) as usize,
            strings_size: get_u32(data, HDR_SIZE_DT_STRINGS) as usize,
            struct_size: get_u32(data, HDR_SIZE_DT_STRUCT) as usize,
        })
    }

    /// Validate the declared layout against a containing buffer of
    /// `container_len` bytes measured from the blob's start offset.
    ///
    /// Checks: total_size fits the container, both block offsets lie strictly
    /// inside `[0, total_size)`, and both sub-regions stay within total_size.
    pub fn validate_bounds(&self, container_len: usize) -> Result<()> {
        if self.total_size > container_len {
            return Err(DtbPatchError::OutOfBounds {
                what: "totalsize",
                value: self.total_size,
                limit: container_len,
            });
        }
        if self.struct_offset >= self.total_size {
            return Err(DtbPatchError::OutOfBounds {
                what: "struct offset",
                value: self.struct_offset,
                limit: self.total_size,
            });
        }
        if self.strings_offset >= self.total_size {
            return Err(DtbPatchError::OutOfBounds {
                what: "strings offset",
                value: self.strings_offset,
                limit: self.total_size,
            });
        }
        if self.struct_offset + self.struct_size > self.total_size {
            return Err(DtbPatchError::OutOfBounds {
                what: "struct block end",
                value: self.struct_offset + self.struct_size,
                limit: self.total_size,
            });
        }
        if self.strings_offset + self.strings_size > self.total_size {
            return Err(DtbPatchError::OutOfBounds {
                what: "strings block end",
                value: self.strings_offset + self.strings_size,
                limit: self.total_size,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Strings block
// ---------------------------------------------------------------------------

/// Resolve a NUL-terminated name from the strings block.
///
/// An out-of-range offset, or one with no terminating NUL before the block
/// ends, yields `""` rather than an error.
pub fn resolve_string(strings_block: &[u8], offset: usize) -> &str {
    let Some(rest) = strings_block.get(offset..) else {
        return "";
    };
    match rest.iter().position(|&b| b == 0) {
        Some(end) => std::str::from_utf8(&rest[..end]).unwrap_or(""),
        None => "",
    }
}

// ---------------------------------------------------------------------------
// Token walk
// ---------------------------------------------------------------------------

/// One property visited by the token walk.
#[derive(Debug, Clone)]
pub struct PropertyRecord {
    /// Node path from the root, `/`-joined; the root itself is `"/"`.
    pub path: String,
    /// Property name resolved via the strings block.
    pub name: String,
    /// Raw value bytes.
    pub value: Vec<u8>,
    /// Absolute offset of the value within the blob.
    pub value_offset: usize,
    /// Allocated length of the value in bytes. Together with `value_offset`
    /// this is the unit of in-place mutation.
    pub value_len: usize,
}

/// Walk the structure block left to right, calling `visit` for every
/// property as `(path, name, value, value_offset, value_len)`. Returning
/// `false` from `visit` stops the walk early.
///
/// The walk keeps an explicit, function-local path stack so it can be
/// replayed any number of times as independent pure calls. Stray END_NODE
/// tokens pop an empty stack as a no-op; an unterminated node name, a
/// truncated property, or an unrecognized token ends the walk without
/// reporting an error.
pub fn walk_properties<F>(blob: &[u8], hdr: &FdtHeader, mut visit: F)
where
    F: FnMut(&str, &str, &[u8], usize, usize) -> bool,
{
    let Some(struct_block) = blob.get(hdr.struct_offset..hdr.struct_offset + hdr.struct_size)
    else {
        return;
    };
    let strings_block = blob
        .get(hdr.strings_offset..hdr.strings_offset + hdr.strings_size)
        .unwrap_or(&[]);

    let mut stack: Vec<String> = Vec::new();
    let mut path = String::from("/");
    let mut off = 0usize;

    while off + 4 <= struct_block.len() {
        let token = get_u32(struct_block, off);
        off += 4;

        match token {
            FDT_BEGIN_NODE => {
                let Some(name_len) = struct_block[off..].iter().position(|&b| b == 0) else {
                    return;
                };
                let name =
                    String::from_utf8_lossy(&struct_block[off..off + name_len]).into_owned();
                off = align4(off + name_len + 1);
                stack.push(name);
                path = join_path(&stack);
            }
            FDT_END_NODE => {
                stack.pop();
                path = join_path(&stack);
            }
            FDT_PROP => {
                if off + 8 > struct_block.len() {
                    return;
                }
                let len = get_u32(struct_block, off) as usize;
                let nameoff = get_u32(struct_block, off + 4) as usize;
                off += 8;
                if len > struct_block.len() - off {
                    return;
                }
                let name = resolve_string(strings_block, nameoff);
                let value = &struct_block[off..off + len];
                let keep_going = visit(&path, name, value, hdr.struct_offset + off, len);
                off = align4(off + len);
                if !keep_going {
                    return;
                }
            }
            FDT_NOP => {}
            // FDT_END, or trailing garbage: end of useful data either way.
            _ => return,
        }
    }
}

fn join_path(stack: &[String]) -> String {
    let mut path = String::from("/");
    for name in stack.iter().filter(|n| !n.is_empty()) {
        if path.len() > 1 {
            path.push('/');
        }
        path.push_str(name);
    }
    path
}

/// Full walk collecting every property record in document order.
pub fn collect_properties(blob: &[u8], hdr: &FdtHeader) -> Vec<PropertyRecord> {
    let mut records = Vec::new();
    walk_properties(blob, hdr, |path, name, value, value_offset, value_len| {
        records.push(PropertyRecord {
            path: path.to_string(),
            name: name.to_string(),
            value: value.to_vec(),
            value_offset,
            value_len,
        });
        true
    });
    records
}

/// Early-exit walk locating one `(path, name)` property. Returns the
/// absolute offset and allocated length of its value bytes.
pub fn find_property(
    blob: &[u8],
    hdr: &FdtHeader,
    path: &str,
    name: &str,
) -> Option<(usize, usize)> {
    let mut found = None;
    walk_properties(blob, hdr, |p, n, _value, value_offset, value_len| {
        if p == path && n == name {
            found = Some((value_offset, value_len));
            return false;
        }
        true
    });
    found
}

// ---------------------------------------------------------------------------
// Property index
// ---------------------------------------------------------------------------

/// Point-query view over one blob's properties: path -> name -> value.
///
/// Built in a single pass; if a `(path, name)` pair occurs more than once
/// (repeated sibling node names), the last occurrence in document order wins.
#[derive(Debug, Default)]
pub struct PropertyIndex {
    map: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl PropertyIndex {
    pub fn build(blob: &[u8], hdr: &FdtHeader) -> Self {
        let mut map: HashMap<String, HashMap<String, Vec<u8>>> = HashMap::new();
        walk_properties(blob, hdr, |path, name, value, _off, _len| {
            map.entry(path.to_string())
                .or_default()
                .insert(name.to_string(), value.to_vec());
            true
        });
        Self { map }
    }

    pub fn get(&self, path: &str, name: &str) -> Option<&[u8]> {
        self.map.get(path)?.get(name).map(Vec::as_slice)
    }

    /// Fetch a property decoded for display; `None` when absent.
    pub fn get_str(&self, path: &str, name: &str) -> Option<String> {
        self.get(path, name).map(crate::decode_string_list)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
