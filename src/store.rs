//! Digest-keyed tile store: canonicalizes `(tag, sequence)` pairs into
//! stable small variant ids.
//!
//! The store is the one shared mutable structure of the engine. Each tag id
//! owns a mutex-guarded list of 256-bit BLAKE2b digests; a variant's id is
//! its 1-based position in that list, and id 0 is reserved for the no-call
//! placeholder. Readers hold a tag's lock only long enough to scan the list
//! and optionally append.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tagset::{TagId, TagSet};

type Blake2b256 = Blake2b<U32>;

/// Per-tag variant identifier; 0 means "no variant / no-call placeholder".
pub type VariantId = u16;

/// 256-bit BLAKE2b digest of a tile's lowercased sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileDigest([u8; 32]);

impl TileDigest {
    /// Digest of `sequence`, lowercasing first when any byte is uppercase.
    pub fn of(sequence: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        if sequence.iter().any(|b| b.is_ascii_uppercase()) {
            hasher.update(sequence.to_ascii_lowercase());
        } else {
            hasher.update(sequence);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for TileDigest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Placeholder digest marking an unassigned variant slot in a sparsely
/// registered tag (never produced by BLAKE2b over any input).
const HOLE: TileDigest = TileDigest([0u8; 32]);

/// One canonical tile variant as stored and serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileVariant {
    /// Anchoring tag id.
    pub tag: TagId,
    /// 1-based variant id within the tag.
    pub variant: VariantId,
    /// Digest of the lowercased sequence.
    pub digest: TileDigest,
    /// Sequence bytes; may be empty when the import dropped no-call bytes.
    pub sequence: Vec<u8>,
}

/// Reference to a stored tile variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRef {
    /// Tag id.
    pub tag: TagId,
    /// Variant id under that tag.
    pub variant: VariantId,
}

/// Consumer of freshly inserted tile variants (typically the library
/// encoder). Publication happens outside the per-tag lock, after the digest
/// and sequence have been committed.
pub trait VariantSink: Send + Sync {
    /// Receive one newly inserted tile variant.
    fn publish(&self, variant: &TileVariant) -> Result<()>;
}

#[derive(Debug, Default)]
struct TagEntry {
    digests: Vec<TileDigest>,
    sequences: Vec<Option<Arc<[u8]>>>,
}

impl TagEntry {
    fn find(&self, digest: &TileDigest) -> Option<usize> {
        self.digests.iter().position(|d| d == digest)
    }
}

/// Concurrent append-only tile store keyed by tag id.
pub struct TileStore {
    tagset: Arc<TagSet>,
    entries: Vec<Mutex<TagEntry>>,
    drop_no_calls: bool,
    retain_sequences: bool,
    sink: Option<Arc<dyn VariantSink>>,
    variant_count: AtomicU64,
    sequence_bytes: AtomicU64,
}

impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore")
            .field("tags", &self.entries.len())
            .field("variants", &self.total_variants())
            .field("drop_no_calls", &self.drop_no_calls)
            .field("retain_sequences", &self.retain_sequences)
            .finish()
    }
}

impl TileStore {
    /// Create an empty store over `tagset`. Sequences are retained by
    /// default; imports that stream variants to an encoder usually disable
    /// retention to bound memory.
    pub fn new(tagset: Arc<TagSet>) -> Self {
        let entries = (0..tagset.len()).map(|_| Mutex::default()).collect();
        Self {
            tagset,
            entries,
            drop_no_calls: false,
            retain_sequences: true,
            sink: None,
            variant_count: AtomicU64::new(0),
            sequence_bytes: AtomicU64::new(0),
        }
    }

    /// Represent tiles containing non-ACGT bytes as variant 0 instead of
    /// inserting them.
    pub fn with_drop_no_calls(mut self, drop: bool) -> Self {
        self.drop_no_calls = drop;
        self
    }

    /// Keep (or drop) sequence bytes in memory after insertion.
    pub fn with_retain_sequences(mut self, retain: bool) -> Self {
        self.retain_sequences = retain;
        self
    }

    /// Attach a sink that receives every newly inserted variant.
    pub fn with_sink(mut self, sink: Arc<dyn VariantSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The tag set this store is built over.
    pub fn tagset(&self) -> &Arc<TagSet> {
        &self.tagset
    }

    /// Whether no-call tiles are dropped to variant 0.
    pub fn drops_no_calls(&self) -> bool {
        self.drop_no_calls
    }

    /// Canonicalize `(tag, sequence)` into a variant id, inserting on first
    /// sight.
    ///
    /// In drop-no-calls mode a sequence containing any byte outside
    /// {a,c,g,t} returns 0 without touching the store.
    pub fn get_or_insert(&self, tag: TagId, sequence: &[u8]) -> Result<VariantId> {
        if self.drop_no_calls && sequence.iter().any(|&b| !is_base(b)) {
            return Ok(0);
        }
        let digest = TileDigest::of(sequence);
        self.get_or_insert_digest(tag, digest, Some(sequence))
    }

    /// Digest-keyed sibling of [`Self::get_or_insert`], used when the digest
    /// is already known (merging libraries). `sequence` may be absent for
    /// variants whose bytes were dropped on import.
    pub fn get_or_insert_digest(
        &self,
        tag: TagId,
        digest: TileDigest,
        sequence: Option<&[u8]>,
    ) -> Result<VariantId> {
        let entry = self
            .entries
            .get(tag as usize)
            .ok_or_else(|| Error::Format(format!("tag {tag} outside tag set")))?;

        let (variant, inserted) = {
            let mut entry = entry.lock().expect("tag entry lock poisoned");
            if let Some(at) = entry.find(&digest) {
                if self.retain_sequences && entry.sequences[at].is_none() {
                    if let Some(seq) = sequence {
                        entry.sequences[at] = Some(Arc::from(seq));
                        self.sequence_bytes
                            .fetch_add(seq.len() as u64, Ordering::Relaxed);
                    }
                }
                ((at + 1) as VariantId, false)
            } else {
                let id = entry.digests.len() + 1;
                if id > VariantId::MAX as usize {
                    return Err(Error::Format(format!(
                        "tag {tag} exceeded {} variants",
                        VariantId::MAX
                    )));
                }
                entry.digests.push(digest);
                let kept: Option<Arc<[u8]>> = if self.retain_sequences {
                    sequence.map(Arc::from)
                } else {
                    None
                };
                if let Some(seq) = &kept {
                    self.sequence_bytes
                        .fetch_add(seq.len() as u64, Ordering::Relaxed);
                }
                entry.sequences.push(kept);
                (id as VariantId, true)
            }
        };

        if inserted {
            self.variant_count.fetch_add(1, Ordering::Relaxed);
            if let Some(sink) = &self.sink {
                sink.publish(&TileVariant {
                    tag,
                    variant,
                    digest,
                    sequence: sequence.map(<[u8]>::to_vec).unwrap_or_default(),
                })?;
            }
        }
        Ok(variant)
    }

    /// Register a variant at an explicit id, as read from a library stream.
    ///
    /// Grows the tag's list as needed; re-registering the same `(tag,
    /// variant)` with a different digest is a format error (the stream is
    /// corrupt or mixes id spaces that were never merge-renumbered).
    pub fn register(
        &self,
        tag: TagId,
        variant: VariantId,
        digest: TileDigest,
        sequence: Option<&[u8]>,
    ) -> Result<()> {
        if variant == 0 {
            return Err(Error::Format("cannot register variant id 0".into()));
        }
        let entry = self
            .entries
            .get(tag as usize)
            .ok_or_else(|| Error::Format(format!("tag {tag} outside tag set")))?;
        let at = variant as usize - 1;

        let mut entry = entry.lock().expect("tag entry lock poisoned");
        if entry.digests.len() <= at {
            entry.digests.resize(at + 1, HOLE);
            entry.sequences.resize(at + 1, None);
        }
        if entry.digests[at] != HOLE && entry.digests[at] != digest {
            return Err(Error::Format(format!(
                "conflicting digests for tag {tag} variant {variant}"
            )));
        }
        if entry.digests[at] == HOLE {
            entry.digests[at] = digest;
            self.variant_count.fetch_add(1, Ordering::Relaxed);
        }
        if self.retain_sequences && entry.sequences[at].is_none() {
            if let Some(seq) = sequence {
                entry.sequences[at] = Some(Arc::from(seq));
                self.sequence_bytes
                    .fetch_add(seq.len() as u64, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Sequence bytes for a stored variant, if they were retained.
    pub fn sequence(&self, tag: TagId, variant: VariantId) -> Option<Arc<[u8]>> {
        if variant == 0 {
            return None;
        }
        let entry = self.entries.get(tag as usize)?;
        let entry = entry.lock().expect("tag entry lock poisoned");
        entry.sequences.get(variant as usize - 1)?.clone()
    }

    /// Digest for a stored variant, if assigned.
    pub fn digest(&self, tag: TagId, variant: VariantId) -> Option<TileDigest> {
        if variant == 0 {
            return None;
        }
        let entry = self.entries.get(tag as usize)?;
        let entry = entry.lock().expect("tag entry lock poisoned");
        let digest = *entry.digests.get(variant as usize - 1)?;
        (digest != HOLE).then_some(digest)
    }

    /// Number of variant ids assigned under `tag` (including sparse holes
    /// from explicit registration).
    pub fn variant_span(&self, tag: TagId) -> usize {
        self.entries
            .get(tag as usize)
            .map(|e| e.lock().expect("tag entry lock poisoned").digests.len())
            .unwrap_or(0)
    }

    /// All variants stored under `tag`, in id order, skipping holes.
    pub fn variants(&self, tag: TagId) -> Vec<TileVariant> {
        let Some(entry) = self.entries.get(tag as usize) else {
            return Vec::new();
        };
        let entry = entry.lock().expect("tag entry lock poisoned");
        entry
            .digests
            .iter()
            .enumerate()
            .filter(|(_, d)| **d != HOLE)
            .map(|(at, d)| TileVariant {
                tag,
                variant: (at + 1) as VariantId,
                digest: *d,
                sequence: entry.sequences[at]
                    .as_deref()
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Total variants inserted across all tags.
    pub fn total_variants(&self) -> u64 {
        self.variant_count.load(Ordering::Relaxed)
    }

    /// Total retained sequence bytes.
    pub fn total_sequence_bytes(&self) -> u64 {
        self.sequence_bytes.load(Ordering::Relaxed)
    }

    /// Drop every tag from `max_tag` upward, keeping the tag set intact.
    pub fn truncate(&mut self, max_tag: usize) {
        if max_tag >= self.entries.len() {
            return;
        }
        for entry in self.entries.drain(max_tag..) {
            let entry = entry.into_inner().expect("tag entry lock poisoned");
            let dropped = entry.digests.iter().filter(|d| **d != HOLE).count() as u64;
            self.variant_count.fetch_sub(dropped, Ordering::Relaxed);
            let bytes: u64 = entry
                .sequences
                .iter()
                .flatten()
                .map(|s| s.len() as u64)
                .sum();
            self.sequence_bytes.fetch_sub(bytes, Ordering::Relaxed);
        }
    }

    /// Number of tag slots currently held (tracks [`Self::truncate`]).
    pub fn tag_span(&self) -> usize {
        self.entries.len()
    }
}

/// True for the bases a called tile may contain.
fn is_base(byte: u8) -> bool {
    matches!(byte, b'a' | b'c' | b'g' | b't' | b'A' | b'C' | b'G' | b'T')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TileStore {
        let tagset = TagSet::new(vec![b"acgtac".to_vec(), b"gtacgt".to_vec()]).unwrap();
        TileStore::new(Arc::new(tagset))
    }

    #[test]
    fn insert_assigns_sequential_ids() {
        let store = store();
        assert_eq!(store.get_or_insert(0, b"acgtacgggg").unwrap(), 1);
        assert_eq!(store.get_or_insert(0, b"acgtaccccc").unwrap(), 2);
        assert_eq!(store.get_or_insert(1, b"gtacgtaaaa").unwrap(), 1);
        assert_eq!(store.total_variants(), 3);
    }

    #[test]
    fn same_sequence_returns_same_id() {
        let store = store();
        let a = store.get_or_insert(0, b"acgtacgggg").unwrap();
        let b = store.get_or_insert(0, b"acgtacgggg").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.total_variants(), 1);
    }

    #[test]
    fn digests_are_case_insensitive() {
        let store = store();
        let a = store.get_or_insert(0, b"acgtacgggg").unwrap();
        let b = store.get_or_insert(0, b"ACGTACGGGG").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn no_call_sequences_return_zero_when_dropped() {
        let store = store().with_drop_no_calls(true);
        assert_eq!(store.get_or_insert(0, b"acgtacnnnn").unwrap(), 0);
        assert_eq!(store.total_variants(), 0);
    }

    #[test]
    fn no_call_sequences_are_kept_by_default() {
        let store = store();
        assert_eq!(store.get_or_insert(0, b"acgtacnnnn").unwrap(), 1);
    }

    #[test]
    fn sequences_are_retained_and_readable() {
        let store = store();
        store.get_or_insert(0, b"acgtacgggg").unwrap();
        assert_eq!(&*store.sequence(0, 1).unwrap(), b"acgtacgggg");
        assert!(store.sequence(0, 2).is_none());
        assert!(store.sequence(0, 0).is_none());
    }

    #[test]
    fn register_preserves_explicit_ids() {
        let store = store();
        let digest = TileDigest::of(b"acgtacgggg");
        store.register(0, 5, digest, Some(b"acgtacgggg")).unwrap();
        assert_eq!(store.digest(0, 5), Some(digest));
        assert_eq!(store.variant_span(0), 5);
        // A later content insert of the same bytes resolves to the same id.
        assert_eq!(store.get_or_insert(0, b"acgtacgggg").unwrap(), 5);
    }

    #[test]
    fn register_conflict_is_a_format_error() {
        let store = store();
        store
            .register(0, 1, TileDigest::of(b"aaaa"), None)
            .unwrap();
        let err = store
            .register(0, 1, TileDigest::of(b"cccc"), None)
            .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn sink_sees_only_new_variants() {
        #[derive(Default)]
        struct Capture(Mutex<Vec<TileRef>>);
        impl VariantSink for Capture {
            fn publish(&self, tv: &TileVariant) -> Result<()> {
                self.0
                    .lock()
                    .unwrap()
                    .push(TileRef { tag: tv.tag, variant: tv.variant });
                Ok(())
            }
        }

        let capture = Arc::new(Capture::default());
        let tagset = TagSet::new(vec![b"acgtac".to_vec()]).unwrap();
        let store = TileStore::new(Arc::new(tagset)).with_sink(capture.clone());
        store.get_or_insert(0, b"acgtacgggg").unwrap();
        store.get_or_insert(0, b"acgtacgggg").unwrap();
        store.get_or_insert(0, b"acgtaccccc").unwrap();
        assert_eq!(
            *capture.0.lock().unwrap(),
            vec![TileRef { tag: 0, variant: 1 }, TileRef { tag: 0, variant: 2 }]
        );
    }

    #[test]
    fn truncate_drops_high_tags() {
        let mut s = store();
        s.get_or_insert(0, b"acgtacgggg").unwrap();
        s.get_or_insert(1, b"gtacgtaaaa").unwrap();
        s.truncate(1);
        assert_eq!(s.tag_span(), 1);
        assert_eq!(s.total_variants(), 1);
        assert!(s.sequence(1, 1).is_none());
    }
}
