//! Locating candidate DTBs inside a host buffer and picking one to patch.
//!
//! The locator is pure magic-search plus structural validation; it never
//! dedups, so a false-positive magic hit inside a genuine blob's payload can
//! yield overlapping candidates. Dedup and all policy live in the selector.

use std::collections::HashSet;

use memchr::memmem;
use sha2::{Digest, Sha256};

use crate::fdt::{FdtHeader, PropertyIndex, FDT_MAGIC, HDR_SIZE};
use crate::{DtbPatchError, Result};

/// Upper bound on a plausible blob. Guards against runaway totalsize values
/// at false-positive magic hits.
pub const DEFAULT_MAX_BLOB_SIZE: usize = 4 * 1024 * 1024;

/// One validated blob-shaped region found by the scan.
///
/// Candidates are immutable snapshots of scan-time state; the selector never
/// mutates them.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Absolute offset of the blob within the host buffer.
    pub offset: usize,
    pub header: FdtHeader,
    /// sha256 of the blob bytes, used for dedup and operator reporting.
    pub digest: [u8; 32],
    /// Decoded `/model`, or `""` when absent.
    pub model: String,
    /// Decoded `status` of the target node; `None` when the property is
    /// absent from this blob.
    pub status: Option<String>,
}

impl Candidate {
    pub fn total_size(&self) -> usize {
        self.header.total_size
    }

    /// The blob's bytes within its host buffer.
    pub fn bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.offset..self.offset + self.header.total_size]
    }
}

/// Scan `buf` for every occurrence of the FDT magic and keep the hits that
/// survive structural validation, in scan order.
///
/// Per hit: at least a header's worth of bytes must remain, the header must
/// parse, totalsize must be non-zero, at most `max_blob_size` and within the
/// remaining buffer, and both sub-regions must stay inside totalsize.
/// `node_path` names the node whose `status` is captured as candidate
/// metadata alongside `/model`.
pub fn locate_blobs(buf: &[u8], node_path: &str, max_blob_size: usize) -> Vec<Candidate> {
    let magic = FDT_MAGIC.to_be_bytes();
    let mut candidates = Vec::new();

    for hit in memmem::find_iter(buf, &magic) {
        if hit + HDR_SIZE > buf.len() {
            continue;
        }
        let Ok(header) = FdtHeader::parse(&buf[hit..]) else {
            continue;
        };
        if header.total_size == 0 || header.total_size > max_blob_size {
            continue;
        }
        if header.validate_bounds(buf.len() - hit).is_err() {
            continue;
        }

        let blob = &buf[hit..hit + header.total_size];
        let index = PropertyIndex::build(blob, &header);
        candidates.push(Candidate {
            offset: hit,
            header,
            digest: Sha256::digest(blob).into(),
            model: index.get_str("/", "model").unwrap_or_default(),
            status: index.get_str(node_path, "status"),
        });
    }

    candidates
}

/// Selection policy inputs.
#[derive(Debug, Clone)]
pub struct SelectOptions {
    /// Case-insensitive substrings matched against the blob's strings block;
    /// any match keeps the candidate. An empty list accepts everything.
    pub string_filters: Vec<String>,
    /// Case-sensitive substring that must occur in the decoded `/model`.
    pub model_match: Option<String>,
    /// The value the patch will write. A candidate already at this value
    /// (or missing the property) is not "actionable".
    pub desired_status: String,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            string_filters: Vec::new(),
            model_match: None,
            desired_status: "okay".to_string(),
        }
    }
}

/// Outcome of candidate selection: the survivors after dedup and filtering,
/// plus the index of the chosen one. The non-chosen survivors are kept for
/// operator visibility but never acted on.
#[derive(Debug)]
pub struct Selection {
    pub survivors: Vec<Candidate>,
    pub chosen_index: usize,
}

impl Selection {
    pub fn chosen(&self) -> &Candidate {
        &self.survivors[self.chosen_index]
    }

    /// Survivors other than the chosen one, in scan order.
    pub fn others(&self) -> impl Iterator<Item = &Candidate> {
        self.survivors
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.chosen_index)
            .map(|(_, c)| c)
    }
}

/// Apply the selection policy:
///
/// 1. discard duplicate blobs sharing a content digest, keeping the first,
/// 2. discard candidates whose strings block matches none of the filters,
/// 3. discard candidates whose `/model` lacks the model substring,
/// 4. prefer a candidate whose target `status` exists and is not already the
///    desired value; otherwise fall back to the first survivor.
///
/// Fails with `NoCandidate` when nothing survives.
pub fn select_candidate(
    buf: &[u8],
    candidates: Vec<Candidate>,
    opts: &SelectOptions,
) -> Result<Selection> {
    let mut seen: HashSet<[u8; 32]> = HashSet::new();
    let mut survivors = Vec::new();

    for cand in candidates {
        if !seen.insert(cand.digest) {
            continue;
        }
        if !strings_block_matches(buf, &cand, &opts.string_filters) {
            continue;
        }
        if let Some(model) = &opts.model_match {
            if !cand.model.contains(model.as_str()) {
                continue;
            }
        }
        survivors.push(cand);
    }

    if survivors.is_empty() {
        return Err(DtbPatchError::NoCandidate);
    }

    let chosen_index = survivors
        .iter()
        .position(|c| is_actionable(c, &opts.desired_status))
        .unwrap_or(0);

    Ok(Selection {
        survivors,
        chosen_index,
    })
}

fn is_actionable(cand: &Candidate, desired: &str) -> bool {
    match cand.status.as_deref() {
        Some(status) => !status.is_empty() && status != desired,
        None => false,
    }
}

fn strings_block_matches(buf: &[u8], cand: &Candidate, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let start = cand.offset + cand.header.strings_offset;
    let block = &buf[start..start + cand.header.strings_size];
    let lower: Vec<u8> = block.iter().map(|b| b.to_ascii_lowercase()).collect();
    filters
        .iter()
        .any(|f| memmem::find(&lower, f.to_ascii_lowercase().as_bytes()).is_some())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
