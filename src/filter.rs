//! Filtering passes over a loaded library.
//!
//! All three operations mutate the library in place, run in a fixed order
//! (variant-cardinality, coverage, tag truncation), and are idempotent
//! under repeated application. They produce a derived library; sources on
//! disk are never rewritten.

use tracing::info;

use crate::error::Result;
use crate::library::Library;
use crate::tagset::TagId;

/// Filter thresholds; negative limits disable a pass.
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    /// Zero out tags carrying more than this many variants. `-1` disables.
    pub max_variants: i64,
    /// Zero out tags whose fraction of non-zero phase slots falls below
    /// this. `0.0` disables.
    pub min_coverage: f64,
    /// Truncate the library to the first `max_tag` tags. `-1` disables.
    pub max_tag: i64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_variants: -1,
            min_coverage: 0.0,
            max_tag: -1,
        }
    }
}

/// Apply the configured passes to `library` in order.
pub fn apply(library: &mut Library, config: &FilterConfig) -> Result<()> {
    if config.max_variants >= 0 {
        drop_busy_tags(library, config.max_variants as usize);
    }
    if config.min_coverage > 0.0 {
        drop_sparse_tags(library, config.min_coverage);
    }
    if config.max_tag >= 0 {
        truncate_tags(library, config.max_tag as usize);
    }
    Ok(())
}

/// Zero both phases of any tag with more recorded variants than `max`.
fn drop_busy_tags(library: &mut Library, max: usize) {
    let mut dropped = 0usize;
    for tag in 0..library.tagset.len() {
        if library.store.variant_span(tag as TagId) > max {
            zero_tag(library, tag as TagId);
            dropped += 1;
        }
    }
    info!(max_variants = max, dropped, "variant-cardinality filter");
}

/// Zero both phases of any tag covered by fewer than `min` of all phase
/// slots. The denominator is `2 · n_genomes`.
fn drop_sparse_tags(library: &mut Library, min: f64) {
    let slots = 2 * library.genomes.len();
    if slots == 0 {
        return;
    }
    let mut dropped = 0usize;
    for tag in 0..library.tagset.len() as TagId {
        let covered = library
            .genomes
            .iter()
            .map(|g| {
                (g.variant(tag, 0) != 0) as usize + (g.variant(tag, 1) != 0) as usize
            })
            .sum::<usize>();
        if (covered as f64) / (slots as f64) < min {
            zero_tag(library, tag);
            dropped += 1;
        }
    }
    info!(min_coverage = min, dropped, "coverage filter");
}

/// Truncate the store and every genome to the first `max_tag` tags.
fn truncate_tags(library: &mut Library, max_tag: usize) {
    library.store.truncate(max_tag);
    for genome in &mut library.genomes {
        let start = genome.start_tag() as usize;
        let keep = max_tag.saturating_sub(start).min(genome.tag_count());
        genome.variants.truncate(2 * keep);
        if let Some((range_start, _)) = genome.tag_range {
            genome.tag_range = Some((range_start, (start + keep) as TagId));
        }
    }
    info!(max_tag, "tag truncation filter");
}

fn zero_tag(library: &mut Library, tag: TagId) {
    for genome in &mut library.genomes {
        let start = genome.start_tag() as usize;
        let tag = tag as usize;
        if tag < start {
            continue;
        }
        let at = 2 * (tag - start);
        for phase in 0..2 {
            if let Some(slot) = genome.variants.get_mut(at + phase) {
                *slot = 0;
            }
        }
    }
}
