//! Merging libraries with disjoint variant-id spaces, and slicing a
//! library by tag range.
//!
//! Two independently imported libraries may assign different ids to the
//! same tile, so comparing them requires renumbering through a merged
//! store. Merge decodes each input in order, maps every source variant id
//! to the id the merged store assigns, and rewrites genome arrays and
//! reference tile paths through that map. Slice repartitions a set of
//! loaded libraries into shards of consecutive tags, namespacing variant
//! ids so a later merge stays unambiguous.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::codec::{decode_records, open_library, Encoder, Record};
use crate::error::{Error, Result};
use crate::library::Library;
use crate::store::{TileRef, TileStore, VariantId};
use crate::tagset::{TagId, TagSet};

/// Merge `inputs` into one library written through `encoder`.
///
/// Inputs are decoded in order; each is read twice so tile variants are
/// registered before the genomes that reference them, whatever the record
/// order inside the file. All inputs must carry byte-identical tag sets.
pub fn merge_libraries<W: Write + Send + 'static>(
    inputs: &[PathBuf],
    encoder: Arc<Encoder<W>>,
) -> Result<()> {
    if inputs.is_empty() {
        return Err(Error::Usage("nothing to merge".into()));
    }

    let mut merged: Option<Arc<TileStore>> = None;

    for path in inputs {
        // Pass 1: tag set and tile variants; build the source → merged map.
        let mut map: Vec<Vec<VariantId>> = Vec::new();
        decode_records(open_library(path)?, |record| {
            match record {
                Record::TagSet(tags) => match &merged {
                    Some(store) => store.tagset().verify_same(&tags)?,
                    None => {
                        let tagset = Arc::new(TagSet::new(tags)?);
                        encoder.write(&Record::TagSet(
                            tagset.tags().to_vec(),
                        ))?;
                        let store = TileStore::new(tagset)
                            .with_retain_sequences(false)
                            .with_sink(encoder.clone());
                        merged = Some(Arc::new(store));
                    }
                },
                Record::TileVariants(batch) => {
                    let store = merged
                        .as_ref()
                        .ok_or_else(|| Error::Format("tile variants before tag set".into()))?;
                    if map.is_empty() {
                        map = vec![Vec::new(); store.tagset().len()];
                    }
                    for tv in batch {
                        let sequence =
                            (!tv.sequence.is_empty()).then_some(tv.sequence.as_slice());
                        let dst = store.get_or_insert_digest(tv.tag, tv.digest, sequence)?;
                        let slots = map.get_mut(tv.tag as usize).ok_or_else(|| {
                            Error::Format(format!("tag {} outside tag set", tv.tag))
                        })?;
                        let at = tv.variant as usize - 1;
                        if slots.len() <= at {
                            slots.resize(at + 1, 0);
                        }
                        slots[at] = dst;
                    }
                }
                Record::CompactGenomes(_) | Record::CompactSequences(_) => {}
            }
            Ok(())
        })?;

        let store = merged
            .as_ref()
            .ok_or_else(|| Error::Format("library stream carries no tag set".into()))?
            .clone();

        // Pass 2: rewrite genomes and reference paths through the map.
        decode_records(open_library(path)?, |record| {
            match record {
                Record::TagSet(_) | Record::TileVariants(_) => {}
                Record::CompactGenomes(mut batch) => {
                    for genome in &mut batch {
                        let start = genome.start_tag();
                        for (i, slot) in genome.variants.iter_mut().enumerate() {
                            if *slot == 0 {
                                continue;
                            }
                            let tag = start + (i / 2) as TagId;
                            *slot = lookup(&map, tag, *slot)?;
                        }
                    }
                    encoder.write(&Record::CompactGenomes(batch))?;
                }
                Record::CompactSequences(mut batch) => {
                    for reference in &mut batch {
                        for path in reference.chromosomes.values_mut() {
                            for tile in path.iter_mut() {
                                tile.variant = lookup(&map, tile.tag, tile.variant)?;
                            }
                        }
                    }
                    encoder.write(&Record::CompactSequences(batch))?;
                }
            }
            Ok(())
        })?;

        info!(
            input = %path.display(),
            merged_variants = store.total_variants(),
            "merged library"
        );
    }
    Ok(())
}

/// Resolve a source variant id through a per-input map. Id 0 passes
/// through: no-call slots stay no-calls.
fn lookup(map: &[Vec<VariantId>], tag: TagId, variant: VariantId) -> Result<VariantId> {
    if variant == 0 {
        return Ok(0);
    }
    map.get(tag as usize)
        .and_then(|slots| slots.get(variant as usize - 1).copied())
        .filter(|&dst| dst != 0)
        .ok_or(Error::MissingTile { tag, variant })
}

/// Slice `libraries` into shards of `tags_per_file` consecutive tags each.
///
/// `make_output` is called once per shard index to open its writer. Every
/// shard carries the full tag set. Tile variants are written into the shard
/// their tag falls in; reference sequences go to shard 0 exclusively.
/// Genome records carry the shard's `(start, end)` tag range. With more
/// than one source library, variant ids are namespaced
/// `dst = src · n_libraries + library_index` so a later merge remains
/// unambiguous.
pub fn slice_libraries<W: Write, F>(
    libraries: &[Library],
    tags_per_file: usize,
    mut make_output: F,
) -> Result<()>
where
    F: FnMut(usize) -> Result<W>,
{
    if libraries.is_empty() {
        return Err(Error::Usage("nothing to slice".into()));
    }
    if tags_per_file == 0 {
        return Err(Error::Usage("tags_per_file must be positive".into()));
    }
    let tagset = &libraries[0].tagset;
    for other in &libraries[1..] {
        tagset.verify_same(other.tagset.tags())?;
    }
    let n_tags = tagset.len();
    let n_libs = libraries.len();
    let shards = n_tags.div_ceil(tags_per_file);

    for shard in 0..shards {
        let start = shard * tags_per_file;
        let end = ((shard + 1) * tags_per_file).min(n_tags);
        let encoder = Encoder::new(make_output(shard)?);
        encoder.write(&Record::TagSet(tagset.tags().to_vec()))?;

        for (lib_index, library) in libraries.iter().enumerate() {
            for tag in start..end {
                let mut batch = library.store.variants(tag as TagId);
                if batch.is_empty() {
                    continue;
                }
                for tv in &mut batch {
                    tv.variant = namespace(tv.variant, n_libs, lib_index)?;
                }
                encoder.write(&Record::TileVariants(batch))?;
            }

            let genomes: Vec<_> = library
                .genomes
                .iter()
                .map(|genome| {
                    let mut variants = Vec::with_capacity(2 * (end - start));
                    for tag in start..end {
                        for phase in 0..2 {
                            let v = genome.variant(tag as TagId, phase);
                            variants.push(namespace(v, n_libs, lib_index)?);
                        }
                    }
                    Ok(crate::codec::CompactGenome {
                        name: genome.name.clone(),
                        variants,
                        tag_range: Some((start as TagId, end as TagId)),
                    })
                })
                .collect::<Result<_>>()?;
            if !genomes.is_empty() {
                encoder.write(&Record::CompactGenomes(genomes))?;
            }

            if shard == 0 && !library.references.is_empty() {
                let references: Vec<_> = library
                    .references
                    .iter()
                    .map(|reference| {
                        let mut reference = reference.clone();
                        for path in reference.chromosomes.values_mut() {
                            for tile in path.iter_mut() {
                                tile.variant = namespace(tile.variant, n_libs, lib_index)?;
                            }
                        }
                        Ok(reference)
                    })
                    .collect::<Result<_>>()?;
                encoder.write(&Record::CompactSequences(references))?;
            }
        }
        encoder.into_inner()?;
        info!(shard, start, end, "wrote slice");
    }
    Ok(())
}

/// Namespace a variant id across `n_libs` source libraries. Id 0 stays 0.
fn namespace(variant: VariantId, n_libs: usize, lib_index: usize) -> Result<VariantId> {
    if variant == 0 || n_libs == 1 {
        return Ok(variant);
    }
    let dst = variant as u64 * n_libs as u64 + lib_index as u64;
    VariantId::try_from(dst)
        .map_err(|_| Error::Format(format!("variant id {dst} overflows after namespacing")))
}

/// Reference to a namespaced tile, exposed for downstream de-namespacing.
pub fn namespaced_source(tile: TileRef, n_libs: usize) -> (usize, TileRef) {
    if n_libs <= 1 {
        return (0, tile);
    }
    let lib_index = (tile.variant as usize) % n_libs;
    (
        lib_index,
        TileRef {
            tag: tile.tag,
            variant: (tile.variant as usize / n_libs) as VariantId,
        },
    )
}
