//! Reference-path walk producing per-position variant slot arrays.
//!
//! For each chromosome the emitter walks the reference tile path, diffs
//! every sample tile that differs from the reference tile, and flushes
//! accumulated variants in ascending chromosome-offset order. Each flushed
//! position carries exactly `2 · n_genomes` slots in fixed
//! `(genome, phase)` order; the zero slot value means "matches reference"
//! and an alternate of `-` means "no call of indeterminate length".

use std::collections::BTreeMap;
use std::time::Duration;

use crate::codec::CompactGenome;
use crate::error::{Error, Result};
use crate::export::diff::{hgvs_diff, DiffVariant};
use crate::library::Library;
use crate::store::{TileRef, TileStore};

/// Export options.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Skip sample tiles longer than this, and stop reference extension at
    /// it (inclusive cap, fail-close).
    pub max_tile_size: usize,
    /// Pad insertions and deletions with the preceding base (VCF dialect).
    pub pad_left: bool,
    /// Wall-clock budget per tile diff; exhaustion degrades the edit
    /// script, it does not fail.
    pub diff_budget: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_tile_size: 50_000,
            pad_left: false,
            diff_budget: Duration::from_secs(1),
        }
    }
}

/// Consumer of flushed per-position slot arrays.
pub trait VariantWriter {
    /// Called once per chromosome before its first site.
    fn begin_chromosome(&mut self, chrom: &str) -> Result<()> {
        let _ = chrom;
        Ok(())
    }

    /// One flushed position with its `2 · n_genomes` slots.
    fn site(&mut self, chrom: &str, position: usize, slots: &[DiffVariant]) -> Result<()>;

    /// Called after the last chromosome.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Genome indices of `library` in name-sorted order; formatter columns
/// follow this order.
pub fn sorted_genomes(library: &Library) -> Vec<&CompactGenome> {
    let mut genomes: Vec<&CompactGenome> = library.genomes.iter().collect();
    genomes.sort_by(|a, b| a.name.cmp(&b.name));
    genomes
}

/// Walk every chromosome of the named reference and stream variant sites
/// into `writer`.
pub fn export_variants(
    library: &Library,
    ref_name: Option<&str>,
    config: &ExportConfig,
    writer: &mut dyn VariantWriter,
) -> Result<()> {
    let reference = library.reference(ref_name)?;
    let genomes = sorted_genomes(library);
    for (chrom, path) in &reference.chromosomes {
        writer.begin_chromosome(chrom)?;
        emit_chromosome(&library.store, chrom, path, &genomes, config, writer)?;
    }
    writer.finish()
}

/// Walk one chromosome's reference tile path.
pub fn emit_chromosome(
    store: &TileStore,
    chrom: &str,
    path: &[TileRef],
    genomes: &[&CompactGenome],
    config: &ExportConfig,
    writer: &mut dyn VariantWriter,
) -> Result<()> {
    let k = store.tagset().k();
    let n_slots = 2 * genomes.len();
    let mut ref_pos = 0usize;
    let mut pending: BTreeMap<usize, Vec<DiffVariant>> = BTreeMap::new();

    for (i, tile) in path.iter().enumerate() {
        let ref_seq = store.sequence(tile.tag, tile.variant).ok_or(Error::MissingTile {
            tag: tile.tag,
            variant: tile.variant,
        })?;

        for (gi, genome) in genomes.iter().enumerate() {
            for phase in 0..2 {
                let variant = genome.variant(tile.tag, phase);
                if variant == 0 || variant == tile.variant {
                    continue;
                }
                // Bytes may be absent when the import dropped no-calls;
                // oversized tiles are skipped as uncallable.
                let Some(sample_seq) = store.sequence(tile.tag, variant) else {
                    continue;
                };
                if sample_seq.len() > config.max_tile_size {
                    continue;
                }
                let Some(extended) =
                    extend_reference(store, path, i, &ref_seq, &sample_seq, k, config)?
                else {
                    continue;
                };

                let upper_ref = extended.to_ascii_uppercase();
                let upper_alt = sample_seq.to_ascii_uppercase();
                for mut dv in hgvs_diff(&upper_ref, &upper_alt, config.diff_budget) {
                    if config.pad_left
                        && (dv.reference.is_empty() || dv.alternate.is_empty())
                        && dv.position > 0
                    {
                        let pad = upper_ref[dv.position - 1];
                        dv.position -= 1;
                        dv.reference.insert(0, pad);
                        dv.alternate.insert(0, pad);
                    }
                    dv.position += ref_pos;
                    let slots = pending
                        .entry(dv.position)
                        .or_insert_with(|| vec![DiffVariant::default(); n_slots]);
                    slots[2 * gi + phase] = dv;
                }
            }
        }

        ref_pos += ref_seq.len() - k;
        let last = i + 1 == path.len();
        loop {
            let position = match pending.keys().next() {
                Some(&position) if last || position <= ref_pos => position,
                _ => break,
            };
            let mut slots = pending.remove(&position).expect("key just observed");
            for (si, slot) in slots.iter_mut().enumerate() {
                if slot.is_ref() {
                    slot.position = position;
                    if genomes[si / 2].variant(tile.tag, si % 2) == 0 {
                        *slot = DiffVariant::no_call(position);
                    }
                }
            }
            writer.site(chrom, position, &slots)?;
        }
    }
    Ok(())
}

/// Extend the reference tile rightward until its last k bases equal the
/// sample tile's, staying within the size cap.
///
/// `None` means extension cannot terminate under the cap (or the path
/// ended); the caller skips the sample tile.
fn extend_reference(
    store: &TileStore,
    path: &[TileRef],
    at: usize,
    ref_seq: &[u8],
    sample_seq: &[u8],
    k: usize,
    config: &ExportConfig,
) -> Result<Option<Vec<u8>>> {
    let mut extended = ref_seq.to_vec();
    if extended.len() > config.max_tile_size {
        return Ok(None);
    }
    let mut next = at;
    loop {
        if tails_equal(&extended, sample_seq, k) {
            return Ok(Some(extended));
        }
        next += 1;
        let Some(tile) = path.get(next) else {
            return Ok(None);
        };
        let tail = store.sequence(tile.tag, tile.variant).ok_or(Error::MissingTile {
            tag: tile.tag,
            variant: tile.variant,
        })?;
        if extended.len() + tail.len() - k > config.max_tile_size {
            return Ok(None);
        }
        extended.extend_from_slice(&tail[k..]);
    }
}

fn tails_equal(a: &[u8], b: &[u8], k: usize) -> bool {
    a.len() >= k && b.len() >= k && a[a.len() - k..].eq_ignore_ascii_case(&b[b.len() - k..])
}
