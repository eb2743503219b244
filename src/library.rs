//! Loaded tile libraries: an in-memory aggregate of tag set, tile store,
//! compact genomes, and reference sequences.
//!
//! Two loading modes are provided. [`Library::load`] decodes everything in
//! one pass and retains all tile sequences. [`Library::load_for_export`]
//! runs two passes over a re-readable stream: the first collects genomes,
//! reference paths, and the set of `(tag, variant)` pairs an export will
//! touch; the second decodes only those tile variants, bounding memory on
//! large libraries.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::codec::{decode_records, open_library, CompactGenome, CompactSequence, Record};
use crate::error::{Error, Result};
use crate::store::{TileRef, TileStore};
use crate::tagset::TagSet;

/// An in-memory tile library.
#[derive(Debug)]
pub struct Library {
    /// The tag set all records share.
    pub tagset: Arc<TagSet>,
    /// Tile variants keyed by `(tag, variant)`.
    pub store: TileStore,
    /// Sample genomes in decode order.
    pub genomes: Vec<CompactGenome>,
    /// Named references in decode order.
    pub references: Vec<CompactSequence>,
}

/// Counts summarizing a loaded library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryStats {
    /// Tags in the tag set.
    pub tags: usize,
    /// Tile variants held by the store.
    pub variants: u64,
    /// Retained tile sequence bytes.
    pub sequence_bytes: u64,
    /// Compact genomes.
    pub genomes: usize,
    /// Reference sequences.
    pub references: usize,
}

/// Accumulates records from one or more decode passes.
struct Loader {
    tagset: Option<Arc<TagSet>>,
    genomes: Vec<CompactGenome>,
    references: Vec<CompactSequence>,
}

impl Loader {
    fn new() -> Self {
        Self {
            tagset: None,
            genomes: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Install or verify a tag set record. Concatenated streams repeat the
    /// record; any disagreement is fatal.
    fn observe_tagset(&mut self, tags: Vec<Vec<u8>>) -> Result<()> {
        match &self.tagset {
            Some(existing) => existing.verify_same(&tags),
            None => {
                self.tagset = Some(Arc::new(TagSet::new(tags)?));
                Ok(())
            }
        }
    }

    fn require_tagset(&self) -> Result<Arc<TagSet>> {
        self.tagset
            .clone()
            .ok_or_else(|| Error::Format("library stream carries no tag set".into()))
    }
}

impl Library {
    /// Load a library file in one pass, retaining every tile sequence.
    pub fn load(path: &Path) -> Result<Self> {
        let mut loader = Loader::new();
        let mut variants = Vec::new();

        decode_records(open_library(path)?, |record| {
            match record {
                Record::TagSet(tags) => loader.observe_tagset(tags)?,
                Record::TileVariants(batch) => variants.extend(batch),
                Record::CompactGenomes(batch) => loader.genomes.extend(batch),
                Record::CompactSequences(batch) => loader.references.extend(batch),
            }
            Ok(())
        })?;

        let tagset = loader.require_tagset()?;
        let store = TileStore::new(tagset.clone());
        for tv in &variants {
            let sequence = (!tv.sequence.is_empty()).then_some(tv.sequence.as_slice());
            store.register(tv.tag, tv.variant, tv.digest, sequence)?;
        }

        let library = Self {
            tagset,
            store,
            genomes: loader.genomes,
            references: loader.references,
        };
        library.log_stats(path);
        Ok(library)
    }

    /// Load a library for export in two passes (low-memory mode).
    ///
    /// Only tile variants referenced by a reference path or by a non-zero
    /// genome slot are decoded into memory. A needed variant with no
    /// `TileVariants` record at all is fatal; a record whose bytes were
    /// dropped on import loads with its digest only.
    pub fn load_for_export(path: &Path) -> Result<Self> {
        // Pass 1: structure only.
        let mut loader = Loader::new();
        decode_records(open_library(path)?, |record| {
            match record {
                Record::TagSet(tags) => loader.observe_tagset(tags)?,
                Record::TileVariants(_) => {}
                Record::CompactGenomes(batch) => loader.genomes.extend(batch),
                Record::CompactSequences(batch) => loader.references.extend(batch),
            }
            Ok(())
        })?;
        let tagset = loader.require_tagset()?;

        let mut needed: HashSet<TileRef> = HashSet::new();
        for reference in &loader.references {
            for path in reference.chromosomes.values() {
                needed.extend(path.iter().copied());
            }
        }
        for genome in &loader.genomes {
            let start = genome.start_tag();
            for (i, &variant) in genome.variants.iter().enumerate() {
                if variant != 0 {
                    needed.insert(TileRef {
                        tag: start + (i / 2) as u32,
                        variant,
                    });
                }
            }
        }

        // Pass 2: re-read from the start, keeping only needed tiles.
        let store = TileStore::new(tagset.clone());
        decode_records(open_library(path)?, |record| {
            if let Record::TileVariants(batch) = record {
                for tv in batch {
                    let key = TileRef {
                        tag: tv.tag,
                        variant: tv.variant,
                    };
                    if needed.contains(&key) {
                        let sequence =
                            (!tv.sequence.is_empty()).then_some(tv.sequence.as_slice());
                        store.register(tv.tag, tv.variant, tv.digest, sequence)?;
                    }
                }
            }
            Ok(())
        })?;

        for tile in &needed {
            if store.digest(tile.tag, tile.variant).is_none() {
                return Err(Error::MissingTile {
                    tag: tile.tag,
                    variant: tile.variant,
                });
            }
        }

        let library = Self {
            tagset,
            store,
            genomes: loader.genomes,
            references: loader.references,
        };
        library.log_stats(path);
        Ok(library)
    }

    /// Reference sequence by name, or the only one when `name` is `None`.
    pub fn reference(&self, name: Option<&str>) -> Result<&CompactSequence> {
        match name {
            Some(name) => self
                .references
                .iter()
                .find(|r| r.name == name)
                .ok_or_else(|| Error::Usage(format!("no reference named {name:?}"))),
            None => match self.references.as_slice() {
                [only] => Ok(only),
                [] => Err(Error::Usage("library holds no reference sequence".into())),
                many => Err(Error::Usage(format!(
                    "library holds {} references, name one",
                    many.len()
                ))),
            },
        }
    }

    /// Summary counts.
    pub fn stats(&self) -> LibraryStats {
        LibraryStats {
            tags: self.tagset.len(),
            variants: self.store.total_variants(),
            sequence_bytes: self.store.total_sequence_bytes(),
            genomes: self.genomes.len(),
            references: self.references.len(),
        }
    }

    fn log_stats(&self, path: &Path) {
        let stats = self.stats();
        info!(
            path = %path.display(),
            tags = stats.tags,
            variants = stats.variants,
            sequence_bytes = stats.sequence_bytes,
            genomes = stats.genomes,
            references = stats.references,
            "loaded library"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoder;
    use crate::store::{TileDigest, TileVariant};
    use std::collections::BTreeMap;
    use std::io::Write;

    fn write_library(dir: &tempfile::TempDir, name: &str, records: &[Record]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let encoder = Encoder::new(std::fs::File::create(&path).unwrap());
        for record in records {
            encoder.write(record).unwrap();
        }
        encoder.into_inner().unwrap().flush().unwrap();
        path
    }

    fn sample_library() -> Vec<Record> {
        let tile = |tag, variant, seq: &[u8]| TileVariant {
            tag,
            variant,
            digest: TileDigest::of(seq),
            sequence: seq.to_vec(),
        };
        vec![
            Record::TagSet(vec![b"acgtac".to_vec(), b"gtacgt".to_vec()]),
            Record::TileVariants(vec![
                tile(0, 1, b"acgtaccccgtacgt"),
                tile(1, 1, b"gtacgtaaaa"),
                tile(1, 2, b"gtacgtcaaa"),
            ]),
            Record::CompactGenomes(vec![CompactGenome {
                name: "s1".into(),
                variants: vec![1, 1, 1, 2],
                tag_range: None,
            }]),
            Record::CompactSequences(vec![CompactSequence {
                name: "ref".into(),
                chromosomes: BTreeMap::from([(
                    "chr1".to_string(),
                    vec![
                        TileRef { tag: 0, variant: 1 },
                        TileRef { tag: 1, variant: 1 },
                    ],
                )]),
            }]),
        ]
    }

    #[test]
    fn full_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_library(&dir, "lib.tlib", &sample_library());
        let library = Library::load(&path).unwrap();

        assert_eq!(library.stats().tags, 2);
        assert_eq!(library.stats().variants, 3);
        assert_eq!(library.genomes.len(), 1);
        assert_eq!(&*library.store.sequence(1, 2).unwrap(), b"gtacgtcaaa");
    }

    #[test]
    fn export_load_keeps_only_needed_tiles() {
        let mut records = sample_library();
        // An orphan variant nothing references.
        if let Record::TileVariants(batch) = &mut records[1] {
            batch.push(TileVariant {
                tag: 0,
                variant: 7,
                digest: TileDigest::of(b"acgtacttttttt"),
                sequence: b"acgtacttttttt".to_vec(),
            });
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_library(&dir, "lib.tlib", &records);
        let library = Library::load_for_export(&path).unwrap();

        assert!(library.store.sequence(0, 1).is_some());
        assert!(library.store.sequence(1, 2).is_some());
        assert!(library.store.sequence(0, 7).is_none());
    }

    #[test]
    fn export_load_fails_on_missing_needed_tile() {
        let mut records = sample_library();
        if let Record::TileVariants(batch) = &mut records[1] {
            batch.retain(|tv| !(tv.tag == 1 && tv.variant == 2));
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_library(&dir, "lib.tlib", &records);

        let err = Library::load_for_export(&path).unwrap_err();
        assert!(matches!(err, Error::MissingTile { tag: 1, variant: 2 }));
    }

    #[test]
    fn conflicting_tagsets_fail() {
        let mut records = sample_library();
        records.push(Record::TagSet(vec![b"tttttt".to_vec(), b"gtacgt".to_vec()]));
        let dir = tempfile::tempdir().unwrap();
        let path = write_library(&dir, "lib.tlib", &records);

        assert!(matches!(
            Library::load(&path),
            Err(Error::TagsetMismatch(_))
        ));
    }

    #[test]
    fn repeated_identical_tagset_is_accepted() {
        let mut records = sample_library();
        records.push(records[0].clone());
        let dir = tempfile::tempdir().unwrap();
        let path = write_library(&dir, "lib.tlib", &records);
        assert!(Library::load(&path).is_ok());
    }
}
