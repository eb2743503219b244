//! Streaming anchor matcher: a rolling 2-bit window over chromosome bytes.
//!
//! The matcher consumes raw sequence bytes (headers are stripped upstream by
//! the tiler), echoes every consumed base lowercased into a passthrough
//! buffer, and emits a [`TagHit`] whenever the window key is present in the
//! tag set. Hit positions index into the passthrough buffer, so newlines and
//! carriage returns are neither echoed nor counted.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::tagset::{encode_base, TagId, TagSet};

/// One anchor occurrence: the tag, the offset of its first base, and its
/// length (always k).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHit {
    /// Id of the matched tag.
    pub tag: TagId,
    /// Offset of the window's first base in the echoed sequence.
    pub pos: usize,
    /// Window length, always the tag set's k.
    pub len: usize,
}

/// Rolling-window matcher over one chromosome's bytes.
///
/// Tags are non-overlapping by construction: a hit zeroes the window, so the
/// next hit can begin no earlier than k bases later.
#[derive(Debug)]
pub struct TagMatcher {
    tagset: Arc<TagSet>,
    mask: u64,
    key: u64,
    valid: usize,
    consumed: usize,
    hits: Vec<TagHit>,
}

impl TagMatcher {
    /// Create a matcher over `tagset`.
    pub fn new(tagset: Arc<TagSet>) -> Self {
        let bits = 2 * tagset.k() as u32;
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        Self {
            tagset,
            mask,
            key: 0,
            valid: 0,
            consumed: 0,
            hits: Vec::new(),
        }
    }

    /// Feed a chunk of sequence bytes, echoing consumed bases into `sink`.
    ///
    /// Newlines and carriage returns are skipped. A `>` or space is a fatal
    /// format error here: FASTA headers must not reach the matcher. Any
    /// other non-ACGT byte (commonly `N`) resets the window and is echoed
    /// lowercased like every consumed base.
    pub fn feed(&mut self, chunk: &[u8], sink: &mut Vec<u8>) -> Result<()> {
        let k = self.tagset.k();
        for &byte in chunk {
            match byte {
                b'\n' | b'\r' => continue,
                b'>' | b' ' => {
                    return Err(Error::Format(format!(
                        "unexpected {:?} in sequence data at offset {}",
                        byte as char, self.consumed
                    )));
                }
                _ => {}
            }
            let base = byte.to_ascii_lowercase();
            match encode_base(base) {
                Some(code) => {
                    self.key = ((self.key << 2) | code) & self.mask;
                    self.valid += 1;
                    if self.valid >= k {
                        if let Some(tag) = self.tagset.lookup(self.key) {
                            self.hits.push(TagHit {
                                tag,
                                pos: self.consumed + 1 - k,
                                len: k,
                            });
                            self.key = 0;
                            self.valid = 0;
                        }
                    }
                }
                None => {
                    self.key = 0;
                    self.valid = 0;
                }
            }
            sink.push(base);
            self.consumed += 1;
        }
        Ok(())
    }

    /// Number of bases consumed (and echoed) so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Hits emitted so far.
    pub fn hits(&self) -> &[TagHit] {
        &self.hits
    }

    /// Consume the matcher, returning all emitted hits.
    pub fn finish(self) -> Vec<TagHit> {
        self.hits
    }
}
