//! Dense genotype matrices and per-tile HGVS annotations.
//!
//! The matrix is the raw statistical-learning view of a library: one row
//! per genome, two columns per tag (one per phase), each cell the variant
//! id at that slot. The annotations name every non-reference tile variant
//! in HGVS terms so matrix columns can be interpreted without the library.

use std::io::Write;

use crate::error::{Error, Result};
use crate::export::emit::ExportConfig;
use crate::library::Library;
use crate::tagset::TagId;

/// Dense per-genome variant-id matrix over a tag range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeMatrix {
    /// Row labels: genome names in name-sorted order.
    pub genomes: Vec<String>,
    /// First tag covered.
    pub start_tag: TagId,
    /// Number of tags covered (two columns each).
    pub tags: usize,
    /// Row-major data, `genomes.len()` rows by `2 · tags` columns.
    pub data: Vec<i16>,
}

impl GenotypeMatrix {
    /// Cell accessor.
    pub fn get(&self, row: usize, tag: TagId, phase: usize) -> i16 {
        let col = 2 * (tag - self.start_tag) as usize + phase;
        self.data[row * 2 * self.tags + col]
    }
}

/// Build the genotype matrix for tags `[start_tag, end_tag)`.
pub fn genotype_matrix(
    library: &Library,
    start_tag: TagId,
    end_tag: TagId,
) -> Result<GenotypeMatrix> {
    if end_tag < start_tag || end_tag as usize > library.tagset.len() {
        return Err(Error::Usage(format!(
            "tag range {start_tag}..{end_tag} outside tag set"
        )));
    }
    let genomes = crate::export::emit::sorted_genomes(library);
    let tags = (end_tag - start_tag) as usize;
    let mut data = Vec::with_capacity(genomes.len() * 2 * tags);
    for genome in &genomes {
        for tag in start_tag..end_tag {
            for phase in 0..2 {
                let variant = genome.variant(tag, phase);
                let cell = i16::try_from(variant).map_err(|_| {
                    Error::Format(format!(
                        "variant id {variant} at tag {tag} exceeds the matrix cell width"
                    ))
                })?;
                data.push(cell);
            }
        }
    }
    Ok(GenotypeMatrix {
        genomes: genomes.iter().map(|g| g.name.clone()).collect(),
        start_tag,
        tags,
        data,
    })
}

/// Write annotation CSV rows for every non-reference tile variant.
///
/// Each row is `column,tag,variant,chrom:g.<hgvs>` where `column` is the
/// tag's column-pair index relative to `start_tag`. Variants whose bytes
/// were dropped on import, or that exceed the size cap, are skipped the
/// same way the exporter skips them.
pub fn write_annotations<W: Write>(
    library: &Library,
    ref_name: Option<&str>,
    start_tag: TagId,
    end_tag: TagId,
    config: &ExportConfig,
    mut out: W,
) -> Result<()> {
    let reference = library.reference(ref_name)?;
    let k = library.tagset.k();

    for (chrom, path) in &reference.chromosomes {
        let mut offset = 0usize;
        for tile in path {
            let ref_seq = library.store.sequence(tile.tag, tile.variant).ok_or(
                Error::MissingTile {
                    tag: tile.tag,
                    variant: tile.variant,
                },
            )?;
            if tile.tag >= start_tag && tile.tag < end_tag {
                let upper_ref = ref_seq.to_ascii_uppercase();
                for candidate in library.store.variants(tile.tag) {
                    if candidate.variant == tile.variant
                        || candidate.sequence.is_empty()
                        || candidate.sequence.len() > config.max_tile_size
                    {
                        continue;
                    }
                    let upper_alt = candidate.sequence.to_ascii_uppercase();
                    for mut dv in
                        crate::export::diff::hgvs_diff(&upper_ref, &upper_alt, config.diff_budget)
                    {
                        dv.position += offset;
                        writeln!(
                            out,
                            "{},{},{},{chrom}:g.{}",
                            tile.tag - start_tag,
                            tile.tag,
                            candidate.variant,
                            dv.hgvs()
                        )?;
                    }
                }
            }
            offset += ref_seq.len() - k;
        }
    }
    out.flush()?;
    Ok(())
}
