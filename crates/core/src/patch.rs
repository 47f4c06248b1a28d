//! Binary delta encoding for partial updates.
//!
//! Instead of re-uploading a whole file, a client may transmit a patch that
//! the server applies against the previously stored blob. The algorithm name
//! travels in the registration query string; `bxdiff` is the format the
//! reference server applies, the other names are recognized members of the
//! open set that this implementation does not reconstruct.
//!
//! `bxdiff` stream layout: a 4-byte magic (`BXD1`) followed by operations.
//! `0x00 <offset:u32le> <len:u32le>` copies `len` bytes from `offset` in the
//! base blob; `0x01 <len:u32le> <data…>` inserts `len` literal bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic header identifying a bxdiff patch stream.
const MAGIC: &[u8; 4] = b"BXD1";

/// Copy operation tag.
const OP_COPY: u8 = 0x00;
/// Insert operation tag.
const OP_INSERT: u8 = 0x01;

/// Minimum shared prefix/suffix length worth encoding as a copy.
const MIN_COPY: usize = 8;

/// Known binary-diff algorithm names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchAlgorithm {
    /// The byte-window copy/insert format defined in this module.
    Bxdiff,
    /// Suffix-tree delta format (recognized, not reconstructed here).
    Xdelta,
    /// VCDIFF-family format (recognized, not reconstructed here).
    Vcdiff,
}

impl PatchAlgorithm {
    /// Parse an algorithm name from the registration query string.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bxdiff" => Some(Self::Bxdiff),
            "xdelta" => Some(Self::Xdelta),
            "vcdiff" => Some(Self::Vcdiff),
            _ => None,
        }
    }

    /// The wire name of this algorithm.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bxdiff => "bxdiff",
            Self::Xdelta => "xdelta",
            Self::Vcdiff => "vcdiff",
        }
    }
}

impl std::fmt::Display for PatchAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures while applying a patch stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The stream does not start with the bxdiff magic.
    #[error("unrecognized patch header")]
    BadMagic,

    /// The stream ended inside an operation.
    #[error("truncated patch stream")]
    Truncated,

    /// A copy operation reads past the end of the base blob.
    #[error("copy range {offset}+{len} out of bounds for base of {base_len} bytes")]
    CopyOutOfRange {
        /// Copy source offset.
        offset: u64,
        /// Copy length.
        len: u64,
        /// Length of the base blob.
        base_len: u64,
    },

    /// The named algorithm cannot be applied by this implementation.
    #[error("unsupported patch algorithm: {0}")]
    Unsupported(String),
}

/// Encode a bxdiff patch transforming `base` into `target`.
///
/// The encoder is deliberately simple: it emits copies for the longest
/// shared prefix and suffix and a literal insert for the middle. Degenerate
/// inputs fall back to a pure literal stream, which is always valid.
#[must_use]
pub fn encode_patch(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAGIC.len() + 16 + target.len() / 2);
    out.extend_from_slice(MAGIC);

    let prefix = common_prefix(base, target);
    // The suffix must not overlap the prefix on either side.
    let suffix = common_suffix(&base[prefix..], &target[prefix..]);

    if prefix >= MIN_COPY {
        push_copy(&mut out, 0, prefix);
    } else if prefix > 0 {
        push_insert(&mut out, &target[..prefix]);
    }

    let middle = &target[prefix..target.len() - suffix];
    if !middle.is_empty() {
        push_insert(&mut out, middle);
    }

    if suffix >= MIN_COPY {
        push_copy(&mut out, base.len() - suffix, suffix);
    } else if suffix > 0 {
        push_insert(&mut out, &target[target.len() - suffix..]);
    }

    out
}

/// Apply a bxdiff patch against `base`, reconstructing the target bytes.
///
/// # Errors
///
/// Returns a [`PatchError`] for malformed streams. The caller is expected to
/// re-hash the result and refuse to commit on digest mismatch; a corrupt but
/// well-formed patch is not detectable here.
pub fn apply_patch(base: &[u8], patch: &[u8]) -> Result<Vec<u8>, PatchError> {
    let Some(rest) = patch.strip_prefix(MAGIC.as_slice()) else {
        return Err(PatchError::BadMagic);
    };

    let mut out = Vec::new();
    let mut cursor = rest;
    while let Some((&op, tail)) = cursor.split_first() {
        match op {
            OP_COPY => {
                let (offset, tail) = read_u32(tail)?;
                let (len, tail) = read_u32(tail)?;
                let start = offset as usize;
                let end = start
                    .checked_add(len as usize)
                    .ok_or(PatchError::Truncated)?;
                if end > base.len() {
                    return Err(PatchError::CopyOutOfRange {
                        offset: u64::from(offset),
                        len: u64::from(len),
                        base_len: base.len() as u64,
                    });
                }
                out.extend_from_slice(&base[start..end]);
                cursor = tail;
            }
            OP_INSERT => {
                let (len, tail) = read_u32(tail)?;
                let len = len as usize;
                if tail.len() < len {
                    return Err(PatchError::Truncated);
                }
                out.extend_from_slice(&tail[..len]);
                cursor = &tail[len..];
            }
            _ => return Err(PatchError::Truncated),
        }
    }

    Ok(out)
}

fn read_u32(data: &[u8]) -> Result<(u32, &[u8]), PatchError> {
    if data.len() < 4 {
        return Err(PatchError::Truncated);
    }
    let (head, tail) = data.split_at(4);
    Ok((
        u32::from_le_bytes(head.try_into().expect("split_at yields 4 bytes")),
        tail,
    ))
}

fn push_copy(out: &mut Vec<u8>, offset: usize, len: usize) {
    out.push(OP_COPY);
    out.extend_from_slice(&u32::try_from(offset).unwrap_or(u32::MAX).to_le_bytes());
    out.extend_from_slice(&u32::try_from(len).unwrap_or(u32::MAX).to_le_bytes());
}

fn push_insert(out: &mut Vec<u8>, data: &[u8]) {
    out.push(OP_INSERT);
    out.extend_from_slice(&u32::try_from(data.len()).unwrap_or(u32::MAX).to_le_bytes());
    out.extend_from_slice(data);
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}
