//! Tiler: split FASTA-framed DNA into tile variants at anchor boundaries.
//!
//! Each chromosome whose label passes the configured filter is scanned by
//! the tag matcher; the bases between consecutive anchors (including both
//! anchoring k-mers, so adjacent tiles overlap by exactly k bases) become
//! tile variants in the shared store. The result is an ordered tile path
//! per chromosome.

use std::io::BufRead;

use regex::Regex;
use tracing::info;

use crate::error::{Error, Result};
use crate::lis::longest_increasing_subsequence;
use crate::matcher::{TagHit, TagMatcher};
use crate::store::{TileRef, TileStore, VariantId};

/// Default chromosome-label filter: primary assemblies only.
pub const DEFAULT_CHROM_FILTER: &str = "^(chr)?([0-9]+|X|Y|MT?)$";

/// Tiling options.
#[derive(Debug, Clone)]
pub struct TilerConfig {
    /// Chromosome labels must match this pattern; labels containing `_` are
    /// always skipped.
    pub chrom_filter: Regex,
    /// Drop anchor hits that appear out of chromosomal order (longest
    /// strictly-increasing subsequence of tag ids).
    pub skip_out_of_order: bool,
}

impl Default for TilerConfig {
    fn default() -> Self {
        Self {
            chrom_filter: Regex::new(DEFAULT_CHROM_FILTER).expect("default filter parses"),
            skip_out_of_order: false,
        }
    }
}

/// Per-chromosome tiling statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromStats {
    /// Chromosome label.
    pub label: String,
    /// Anchors emitted by the matcher.
    pub anchors_found: usize,
    /// Anchors surviving the out-of-order filter.
    pub anchors_kept: usize,
    /// Tile path length (no-call tiles excluded).
    pub path_len: usize,
    /// ACGT bases in the chromosome.
    pub called_bases: usize,
}

/// Tile paths and statistics for one tiled input stream.
#[derive(Debug, Clone, Default)]
pub struct TiledSequence {
    /// `(chromosome label, tile path)` in stream order.
    pub chromosomes: Vec<(String, Vec<TileRef>)>,
    /// Per-chromosome statistics, parallel to `chromosomes`.
    pub stats: Vec<ChromStats>,
}

impl TiledSequence {
    /// Flatten all chromosome paths into a dense per-tag variant array of
    /// length `n_tags` (one phase). Unvisited tags stay 0.
    pub fn to_dense(&self, n_tags: usize) -> Vec<VariantId> {
        let mut dense = vec![0; n_tags];
        for (_, path) in &self.chromosomes {
            for tile in path {
                if let Some(slot) = dense.get_mut(tile.tag as usize) {
                    *slot = tile.variant;
                }
            }
        }
        dense
    }
}

/// Tile a FASTA stream against `store`.
///
/// `label` names the input in log output. Lines beginning with `>` start a
/// new chromosome; sequence bytes are lowercased as they stream through the
/// matcher. Chromosome labels failing the filter (or containing `_`) are
/// consumed but not tiled.
pub fn tile_fasta<R: BufRead>(
    label: &str,
    mut reader: R,
    store: &TileStore,
    config: &TilerConfig,
) -> Result<TiledSequence> {
    let tagset = store.tagset().clone();
    let mut out = TiledSequence::default();

    let mut line = Vec::new();
    let mut current: Option<Chromosome> = None;
    let mut skipping = false;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        if line.first() == Some(&b'>') {
            if let Some(chrom) = current.take() {
                chrom.finish(label, store, config, &mut out)?;
            }
            let header = header_label(&line)?;
            if wanted(&header, config) {
                current = Some(Chromosome::new(header, &tagset));
                skipping = false;
            } else {
                info!(input = label, chromosome = %header, "skipping chromosome");
                skipping = true;
            }
            continue;
        }
        if skipping {
            continue;
        }
        match current.as_mut() {
            Some(chrom) => chrom.feed(&line)?,
            None => {
                // Sequence bytes before any header.
                let trimmed: &[u8] = line
                    .strip_suffix(b"\n")
                    .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
                    .unwrap_or(&line);
                if !trimmed.is_empty() {
                    return Err(Error::Format(format!(
                        "{label}: sequence data before first FASTA header"
                    )));
                }
            }
        }
    }
    if let Some(chrom) = current.take() {
        chrom.finish(label, store, config, &mut out)?;
    }
    Ok(out)
}

/// Whether a chromosome label should be tiled.
fn wanted(label: &str, config: &TilerConfig) -> bool {
    !label.contains('_') && config.chrom_filter.is_match(label)
}

/// Extract the first whitespace-delimited token after `>`.
fn header_label(line: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(&line[1..])
        .map_err(|_| Error::Format("FASTA header is not UTF-8".into()))?;
    let token = text.split_whitespace().next().unwrap_or("");
    if token.is_empty() {
        return Err(Error::Format("empty FASTA header".into()));
    }
    Ok(token.to_string())
}

/// In-progress chromosome scan state.
struct Chromosome {
    label: String,
    sequence: Vec<u8>,
    matcher: TagMatcher,
}

impl Chromosome {
    fn new(label: String, tagset: &std::sync::Arc<crate::tagset::TagSet>) -> Self {
        Self {
            label,
            sequence: Vec::new(),
            matcher: TagMatcher::new(tagset.clone()),
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        self.matcher.feed(chunk, &mut self.sequence)
    }

    /// Tile the accumulated sequence and append the path and stats.
    fn finish(
        self,
        input: &str,
        store: &TileStore,
        config: &TilerConfig,
        out: &mut TiledSequence,
    ) -> Result<()> {
        let k = store.tagset().k();
        let sequence = self.sequence;
        let hits = self.matcher.finish();
        let anchors_found = hits.len();

        let hits: Vec<TagHit> = if config.skip_out_of_order {
            let ids: Vec<u32> = hits.iter().map(|h| h.tag).collect();
            longest_increasing_subsequence(&ids)
                .into_iter()
                .map(|i| hits[i])
                .collect()
        } else {
            hits
        };
        let anchors_kept = hits.len();

        let mut path = Vec::with_capacity(hits.len());
        for (i, hit) in hits.iter().enumerate() {
            let start = hit.pos;
            let end = match hits.get(i + 1) {
                Some(next) => next.pos + k,
                None => sequence.len(),
            };
            let variant = store.get_or_insert(hit.tag, &sequence[start..end])?;
            if variant != 0 {
                path.push(TileRef {
                    tag: hit.tag,
                    variant,
                });
            }
        }

        let called_bases = sequence
            .iter()
            .filter(|&&b| matches!(b, b'a' | b'c' | b'g' | b't'))
            .count();
        let stats = ChromStats {
            label: self.label.clone(),
            anchors_found,
            anchors_kept,
            path_len: path.len(),
            called_bases,
        };
        info!(
            input,
            chromosome = %stats.label,
            anchors_found,
            anchors_kept,
            path_len = stats.path_len,
            called_bases,
            "tiled chromosome"
        );
        out.chromosomes.push((self.label, path));
        out.stats.push(stats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TileStore;
    use crate::tagset::TagSet;
    use std::io::Cursor;
    use std::sync::Arc;

    fn store() -> TileStore {
        let tagset = TagSet::new(vec![b"acgtac".to_vec(), b"gtacgt".to_vec()]).unwrap();
        TileStore::new(Arc::new(tagset)).with_drop_no_calls(true)
    }

    #[test]
    fn seed_scenario_single_tile() {
        let store = store();
        let fasta = ">chr1\nacgtaccccgtacgtxxxx\n";
        let tiled =
            tile_fasta("test", Cursor::new(fasta), &store, &TilerConfig::default()).unwrap();

        assert_eq!(tiled.chromosomes.len(), 1);
        let (label, path) = &tiled.chromosomes[0];
        assert_eq!(label, "chr1");
        assert_eq!(path, &vec![TileRef { tag: 0, variant: 1 }]);
        assert_eq!(&*store.sequence(0, 1).unwrap(), b"acgtaccccgtacgt");
        // The terminal tile contains x bytes and was dropped as a no-call.
        assert_eq!(tiled.stats[0].anchors_found, 2);
    }

    #[test]
    fn adjacent_tiles_overlap_by_k() {
        let store = store();
        let fasta = ">chr1\nacgtacccccccgtacgtaaaa\n";
        let tiled =
            tile_fasta("test", Cursor::new(fasta), &store, &TilerConfig::default()).unwrap();
        let path = &tiled.chromosomes[0].1;
        assert_eq!(path.len(), 2);

        let first = store.sequence(0, path[0].variant).unwrap();
        let second = store.sequence(1, path[1].variant).unwrap();
        assert_eq!(&first[first.len() - 6..], &second[..6]);
        assert_eq!(&*second, b"gtacgtaaaa");
    }

    #[test]
    fn underscore_labels_are_skipped() {
        let store = store();
        let fasta = ">chr1_alt\nacgtaccccgtacgtaaaa\n>chr2\nacgtacgggggtacgtcccc\n";
        let tiled =
            tile_fasta("test", Cursor::new(fasta), &store, &TilerConfig::default()).unwrap();
        assert_eq!(tiled.chromosomes.len(), 1);
        assert_eq!(tiled.chromosomes[0].0, "chr2");
    }

    #[test]
    fn nonmatching_labels_are_skipped() {
        let store = store();
        let fasta = ">scaffold99\nacgtaccccgtacgtaaaa\n";
        let tiled =
            tile_fasta("test", Cursor::new(fasta), &store, &TilerConfig::default()).unwrap();
        assert!(tiled.chromosomes.is_empty());
    }

    #[test]
    fn out_of_order_hits_are_dropped_with_lis() {
        let store = store();
        // tag 1 appears before tag 0; LIS keeps one of them.
        let fasta = ">chr1\ngtacgtccccacgtacgggg\n";
        let config = TilerConfig {
            skip_out_of_order: true,
            ..TilerConfig::default()
        };
        let tiled = tile_fasta("test", Cursor::new(fasta), &store, &config).unwrap();
        assert_eq!(tiled.stats[0].anchors_found, 2);
        assert_eq!(tiled.stats[0].anchors_kept, 1);
    }

    #[test]
    fn dense_array_reflects_paths() {
        let store = store();
        let fasta = ">chr1\nacgtacccccccgtacgtaaaa\n";
        let tiled =
            tile_fasta("test", Cursor::new(fasta), &store, &TilerConfig::default()).unwrap();
        let dense = tiled.to_dense(2);
        assert_eq!(dense, vec![1, 1]);
    }

    #[test]
    fn round_trip_recovers_chromosome_bytes() {
        let store = store();
        let body = b"acgtacccccccgtacgtaaaa".to_vec();
        let fasta = format!(">chr1\n{}\n", String::from_utf8(body.clone()).unwrap());
        let tiled =
            tile_fasta("test", Cursor::new(fasta), &store, &TilerConfig::default()).unwrap();
        let path = &tiled.chromosomes[0].1;

        let mut rebuilt: Vec<u8> = Vec::new();
        for (i, tile) in path.iter().enumerate() {
            let seq = store.sequence(tile.tag, tile.variant).unwrap();
            if i == 0 {
                rebuilt.extend_from_slice(&seq);
            } else {
                rebuilt.extend_from_slice(&seq[6..]);
            }
        }
        assert_eq!(rebuilt, body);
    }
}
