//! Reference alignment and variant emission.
//!
//! The exporter walks reference tile paths per chromosome, diffs sample
//! tiles against the reference in anchored coordinates, and streams
//! per-position slot arrays into pluggable formatters.

mod diff;
mod emit;
mod format;
mod matrix;

pub use diff::{hgvs_diff, DiffVariant, NO_CALL};
pub use emit::{
    emit_chromosome, export_variants, sorted_genomes, ExportConfig, VariantWriter,
};
pub use format::{
    tag_coverage, write_bed, HgvsMatrix, HgvsMatrixWriter, HgvsOneHotWriter, HgvsTsvWriter,
    PhasedVcfWriter, VcfWriter,
};
pub use matrix::{genotype_matrix, write_annotations, GenotypeMatrix};
