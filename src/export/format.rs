//! Output formatters consuming flushed variant slot arrays.
//!
//! Each formatter implements [`VariantWriter`] over some `io::Write` sink.
//! Columns always follow the name-sorted genome order established by the
//! exporter.

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::Result;
use crate::export::diff::DiffVariant;
use crate::export::emit::VariantWriter;
use crate::library::Library;
use crate::store::VariantId;

/// Render one phase of a genome cell: `=` for reference, `-` for no-call,
/// otherwise the HGVS description.
fn phase_term(slot: &DiffVariant) -> String {
    if slot.is_no_call() {
        "-".to_string()
    } else if slot.is_ref() {
        "=".to_string()
    } else {
        slot.hgvs()
    }
}

/// HGVS TSV: one row per flushed position, one cell per genome.
#[derive(Debug)]
pub struct HgvsTsvWriter<W: Write> {
    out: W,
}

impl<W: Write> HgvsTsvWriter<W> {
    /// Write a header row of genome names, then stream sites.
    pub fn new(mut out: W, genomes: &[String]) -> Result<Self> {
        writeln!(out, "{}", genomes.join("\t"))?;
        Ok(Self { out })
    }

    /// Return the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> VariantWriter for HgvsTsvWriter<W> {
    fn site(&mut self, chrom: &str, _position: usize, slots: &[DiffVariant]) -> Result<()> {
        let mut cells = Vec::with_capacity(slots.len() / 2);
        for pair in slots.chunks(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let cell = if a.is_ref() && b.is_ref() {
                ".".to_string()
            } else if a.is_no_call() && b.is_no_call() {
                "N".to_string()
            } else if a == b {
                format!("{chrom}:g.{}", a.hgvs())
            } else {
                format!("{chrom}:g.[{}];[{}]", phase_term(a), phase_term(b))
            };
            cells.push(cell);
        }
        writeln!(self.out, "{}", cells.join("\t"))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// One-hot HGVS: one row per distinct non-reference variant with 0/1 cells
/// per genome.
#[derive(Debug)]
pub struct HgvsOneHotWriter<W: Write> {
    out: W,
}

impl<W: Write> HgvsOneHotWriter<W> {
    /// Write a header row of genome names, then stream sites.
    pub fn new(mut out: W, genomes: &[String]) -> Result<Self> {
        writeln!(out, "variant\t{}", genomes.join("\t"))?;
        Ok(Self { out })
    }
}

impl<W: Write> VariantWriter for HgvsOneHotWriter<W> {
    fn site(&mut self, chrom: &str, _position: usize, slots: &[DiffVariant]) -> Result<()> {
        let mut distinct: Vec<&DiffVariant> = Vec::new();
        for slot in slots {
            if !slot.is_ref()
                && !slot.is_no_call()
                && !distinct
                    .iter()
                    .any(|d| d.reference == slot.reference && d.alternate == slot.alternate)
            {
                distinct.push(slot);
            }
        }
        for variant in distinct {
            let mut row = format!("{chrom}:g.{}", variant.hgvs());
            for pair in slots.chunks(2) {
                let carried = pair.iter().any(|slot| {
                    slot.reference == variant.reference && slot.alternate == variant.alternate
                });
                row.push_str(if carried { "\t1" } else { "\t0" });
            }
            writeln!(self.out, "{row}")?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Rows shared by the VCF writers: distinct reference strings at a site,
/// each with its ordered alternate set and per-phase allele indices.
struct VcfSite {
    reference: Vec<u8>,
    alternates: Vec<Vec<u8>>,
    /// Allele index per phase slot: 0 = reference, 1.. = alternate,
    /// `None` = no call or different reference row.
    alleles: Vec<Option<usize>>,
}

fn vcf_rows(slots: &[DiffVariant]) -> Vec<VcfSite> {
    let mut rows: Vec<VcfSite> = Vec::new();
    let mut by_ref: BTreeMap<Vec<u8>, usize> = BTreeMap::new();

    for slot in slots {
        if slot.is_ref() || slot.is_no_call() {
            continue;
        }
        let at = *by_ref.entry(slot.reference.clone()).or_insert_with(|| {
            rows.push(VcfSite {
                reference: slot.reference.clone(),
                alternates: Vec::new(),
                alleles: vec![None; slots.len()],
            });
            rows.len() - 1
        });
        if !rows[at].alternates.contains(&slot.alternate) {
            rows[at].alternates.push(slot.alternate.clone());
        }
    }
    for row in &mut rows {
        for (si, slot) in slots.iter().enumerate() {
            row.alleles[si] = if slot.is_no_call() {
                None
            } else if slot.is_ref() {
                Some(0)
            } else if slot.reference == row.reference {
                row.alternates
                    .iter()
                    .position(|alt| *alt == slot.alternate)
                    .map(|i| i + 1)
            } else {
                // Variant belongs to another row at this site.
                Some(0)
            };
        }
    }
    rows
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

/// Plain VCF: one row per `(reference, alternate-set)` with allele counts
/// in `INFO`.
#[derive(Debug)]
pub struct VcfWriter<W: Write> {
    out: W,
}

impl<W: Write> VcfWriter<W> {
    /// Write the VCF header, then stream sites.
    pub fn new(mut out: W) -> Result<Self> {
        write!(
            out,
            "##fileformat=VCFv4.3\n##source=tilekit\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n"
        )?;
        Ok(Self { out })
    }
}

impl<W: Write> VariantWriter for VcfWriter<W> {
    fn site(&mut self, chrom: &str, position: usize, slots: &[DiffVariant]) -> Result<()> {
        for row in vcf_rows(slots) {
            let counts: Vec<String> = (1..=row.alternates.len())
                .map(|allele| {
                    row.alleles
                        .iter()
                        .filter(|a| **a == Some(allele))
                        .count()
                        .to_string()
                })
                .collect();
            let alts: Vec<String> = row.alternates.iter().map(|a| ascii(a)).collect();
            writeln!(
                self.out,
                "{chrom}\t{}\t.\t{}\t{}\t.\t.\tAC={}",
                position + 1,
                ascii(&row.reference),
                alts.join(","),
                counts.join(",")
            )?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Phased VCF: one row per `(reference, alternate-set)` with one `GT`
/// sample column per genome.
#[derive(Debug)]
pub struct PhasedVcfWriter<W: Write> {
    out: W,
}

impl<W: Write> PhasedVcfWriter<W> {
    /// Write the VCF header including sample columns, then stream sites.
    pub fn new(mut out: W, genomes: &[String]) -> Result<Self> {
        write!(
            out,
            "##fileformat=VCFv4.3\n##source=tilekit\n##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n"
        )?;
        writeln!(
            out,
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}",
            genomes.join("\t")
        )?;
        Ok(Self { out })
    }
}

impl<W: Write> VariantWriter for PhasedVcfWriter<W> {
    fn site(&mut self, chrom: &str, position: usize, slots: &[DiffVariant]) -> Result<()> {
        for row in vcf_rows(slots) {
            let alts: Vec<String> = row.alternates.iter().map(|a| ascii(a)).collect();
            let mut cells = Vec::with_capacity(slots.len() / 2);
            for pair in row.alleles.chunks(2) {
                let gt = |a: Option<usize>| match a {
                    Some(i) => i.to_string(),
                    None => ".".to_string(),
                };
                cells.push(format!("{}|{}", gt(pair[0]), gt(pair[1])));
            }
            writeln!(
                self.out,
                "{chrom}\t{}\t.\t{}\t{}\t.\t.\t.\tGT\t{}",
                position + 1,
                ascii(&row.reference),
                alts.join(","),
                cells.join("\t")
            )?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Per-chromosome int8 haplotype-by-variant matrix, accumulated in memory
/// and handed out on finalize (array file wrapping is the caller's
/// concern).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HgvsMatrix {
    /// Chromosome the matrix covers.
    pub chrom: String,
    /// HGVS label per row.
    pub labels: Vec<String>,
    /// Phase slots per row (`2 · n_genomes`).
    pub columns: usize,
    /// Row-major carrier flags: 1 carried, 0 not carried, -1 no call.
    pub data: Vec<i8>,
}

/// Accumulating matrix formatter.
#[derive(Debug, Default)]
pub struct HgvsMatrixWriter {
    matrices: Vec<HgvsMatrix>,
}

impl HgvsMatrixWriter {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the accumulated per-chromosome matrices.
    pub fn take_matrices(&mut self) -> Vec<HgvsMatrix> {
        std::mem::take(&mut self.matrices)
    }
}

impl VariantWriter for HgvsMatrixWriter {
    fn begin_chromosome(&mut self, chrom: &str) -> Result<()> {
        self.matrices.push(HgvsMatrix {
            chrom: chrom.to_string(),
            labels: Vec::new(),
            columns: 0,
            data: Vec::new(),
        });
        Ok(())
    }

    fn site(&mut self, chrom: &str, _position: usize, slots: &[DiffVariant]) -> Result<()> {
        let matrix = self.matrices.last_mut().expect("begin_chromosome ran");
        matrix.columns = slots.len();
        let mut distinct: Vec<&DiffVariant> = Vec::new();
        for slot in slots {
            if !slot.is_ref()
                && !slot.is_no_call()
                && !distinct
                    .iter()
                    .any(|d| d.reference == slot.reference && d.alternate == slot.alternate)
            {
                distinct.push(slot);
            }
        }
        for variant in distinct {
            matrix.labels.push(format!("{chrom}:g.{}", variant.hgvs()));
            for slot in slots {
                matrix.data.push(if slot.is_no_call() {
                    -1
                } else if slot.reference == variant.reference
                    && slot.alternate == variant.alternate
                {
                    1
                } else {
                    0
                });
            }
        }
        Ok(())
    }
}

/// Write per-tile BED coverage rows for the named reference.
///
/// Fields: `chrom start end tag score . thickStart thickEnd`, where the
/// score is `1000 · covered_slots / (2 · n_genomes)` clamped to [0, 1000].
pub fn write_bed<W: Write>(library: &Library, ref_name: Option<&str>, mut out: W) -> Result<()> {
    let reference = library.reference(ref_name)?;
    let k = library.tagset.k();
    let slots = 2 * library.genomes.len();

    for (chrom, path) in &reference.chromosomes {
        let mut start = 0usize;
        for tile in path {
            let len = library
                .store
                .sequence(tile.tag, tile.variant)
                .map(|seq| seq.len())
                .ok_or(crate::error::Error::MissingTile {
                    tag: tile.tag,
                    variant: tile.variant,
                })?;
            let end = start + len;
            let covered = library
                .genomes
                .iter()
                .map(|g| {
                    (g.variant(tile.tag, 0) != 0) as usize
                        + (g.variant(tile.tag, 1) != 0) as usize
                })
                .sum::<usize>();
            let score = if slots == 0 {
                0
            } else {
                (1000 * covered / slots).min(1000)
            };
            writeln!(
                out,
                "{chrom}\t{start}\t{end}\t{}\t{score}\t.\t{start}\t{end}",
                tile.tag
            )?;
            start = end - k;
        }
    }
    out.flush()?;
    Ok(())
}

/// Variant ids of every genome at one tag, used by coverage summaries.
pub fn tag_coverage(library: &Library, tag: u32) -> Vec<[VariantId; 2]> {
    library
        .genomes
        .iter()
        .map(|g| [g.variant(tag, 0), g.variant(tag, 1)])
        .collect()
}
