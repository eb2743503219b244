//! Ordered anchor tag sets and their 2-bit-key lookup index.
//!
//! A tag set is fixed at library genesis: an ordered list of equal-length
//! DNA strings whose position in the list is the tag id. The first k bases
//! of every tag, packed two bits per base, must be unique; the packed value
//! doubles as the key the streaming matcher looks up on every window.

use std::collections::HashMap;
use std::io::BufRead;

use crate::error::{Error, Result};

/// Position of a tag within the tag set.
pub type TagId = u32;

/// Largest supported tag length: 2k bits must fit in a `u64` key.
pub const MAX_TAG_LEN: usize = 32;

/// Encode one base as its 2-bit code (A→00, C→01, G→10, T→11).
///
/// Returns `None` for any byte outside the eight ACGT/acgt letters.
pub fn encode_base(base: u8) -> Option<u64> {
    match base {
        b'A' | b'a' => Some(0b00),
        b'C' | b'c' => Some(0b01),
        b'G' | b'g' => Some(0b10),
        b'T' | b't' => Some(0b11),
        _ => None,
    }
}

/// Immutable ordered set of anchor tags with a packed-key lookup table.
#[derive(Debug, Clone)]
pub struct TagSet {
    tags: Vec<Vec<u8>>,
    k: usize,
    index: HashMap<u64, TagId>,
}

impl TagSet {
    /// Build a tag set from raw tag strings.
    ///
    /// All tags must have the same length (at most [`MAX_TAG_LEN`]) and
    /// consist of ACGT bytes only; tags are stored lowercased. Two tags
    /// packing to the same 2k-bit key fail with [`Error::DuplicateTag`].
    pub fn new(tags: Vec<Vec<u8>>) -> Result<Self> {
        if tags.is_empty() {
            return Err(Error::Format("tag set is empty".into()));
        }
        let k = tags[0].len();
        if k == 0 || k > MAX_TAG_LEN {
            return Err(Error::Format(format!(
                "unsupported tag length {k} (must be 1..={MAX_TAG_LEN})"
            )));
        }

        let mut lowered = Vec::with_capacity(tags.len());
        let mut index = HashMap::with_capacity(tags.len());
        for (id, tag) in tags.into_iter().enumerate() {
            if tag.len() != k {
                return Err(Error::Format(format!(
                    "tag {id} has length {}, expected {k}",
                    tag.len()
                )));
            }
            let tag = tag.to_ascii_lowercase();
            let key = pack_key(&tag).ok_or_else(|| {
                Error::Format(format!(
                    "tag {id} contains a non-ACGT byte: {:?}",
                    String::from_utf8_lossy(&tag)
                ))
            })?;
            if let Some(&first) = index.get(&key) {
                return Err(Error::DuplicateTag {
                    first,
                    second: id as TagId,
                    bits: 2 * k as u32,
                });
            }
            index.insert(key, id as TagId);
            lowered.push(tag);
        }

        Ok(Self {
            tags: lowered,
            k,
            index,
        })
    }

    /// Parse a tag set from FASTA-style text: `>` lines are ignored and
    /// every remaining non-empty line is one whitespace-free tag token.
    pub fn from_fasta<R: BufRead>(reader: R) -> Result<Self> {
        let mut tags = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let token = line.trim();
            if token.is_empty() || token.starts_with('>') {
                continue;
            }
            if token.split_whitespace().count() != 1 {
                return Err(Error::Format(format!(
                    "tag line contains whitespace: {token:?}"
                )));
            }
            tags.push(token.as_bytes().to_vec());
        }
        Self::new(tags)
    }

    /// Tag length k shared by every tag in the set.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` when the set holds no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tag bytes (lowercased) for `id`, if present.
    pub fn tag(&self, id: TagId) -> Option<&[u8]> {
        self.tags.get(id as usize).map(Vec::as_slice)
    }

    /// Look up the tag id for a packed 2k-bit window key.
    pub fn lookup(&self, key: u64) -> Option<TagId> {
        self.index.get(&key).copied()
    }

    /// The raw lowercased tags in id order.
    pub fn tags(&self) -> &[Vec<u8>] {
        &self.tags
    }

    /// Check that another serialized tag list is byte-identical to this set.
    pub fn verify_same(&self, other: &[Vec<u8>]) -> Result<()> {
        if other.len() != self.tags.len() {
            return Err(Error::TagsetMismatch(format!(
                "{} tags vs {} tags",
                self.tags.len(),
                other.len()
            )));
        }
        for (id, (mine, theirs)) in self.tags.iter().zip(other.iter()).enumerate() {
            if !mine.eq_ignore_ascii_case(theirs) {
                return Err(Error::TagsetMismatch(format!("tag {id} differs")));
            }
        }
        Ok(())
    }
}

/// Pack the first (and only) k bases of a tag into its 2k-bit key.
fn pack_key(tag: &[u8]) -> Option<u64> {
    let mut key = 0u64;
    for &base in tag {
        key = (key << 2) | encode_base(base)?;
    }
    Some(key)
}
