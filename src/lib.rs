//! # tilekit — genome tiling engine and shared tile library
//!
//! tilekit decomposes whole-genome sequences into overlapping fixed-length
//! anchor tags drawn from a curated tag set; the bases between successive
//! anchors become *tile variants*, canonicalized by 256-bit BLAKE2b digest
//! and addressed by small per-tag variant ids. A genome then compresses to
//! a dense array of variant ids, and call sets fall out of aligning sample
//! tile paths against a reference tile path.
//!
//! ## Pipeline
//!
//! 1. **Import** ([`import`]): tile FASTA or phased-VCF inputs in parallel
//!    onto a shared [`store::TileStore`], streaming a seekable library
//!    through the [`codec`].
//! 2. **Preprocess**: [`merge`] renumbers independently imported
//!    libraries into one id space; [`filter`] prunes by variant
//!    cardinality, coverage, or tag range; [`mask`] answers region
//!    queries.
//! 3. **Export** ([`export`]): walk reference tile paths per chromosome
//!    and emit HGVS, VCF, one-hot, or matrix call sets.
//!
//! ## Usage example
//!
//! ```ignore
//! use tilekit::{import_genomes, Encoder, ImportConfig, TagSet, TileStore};
//!
//! let tagset = Arc::new(TagSet::from_fasta(reader)?);
//! let encoder = Arc::new(Encoder::new(File::create("library.tlib")?));
//! let store = TileStore::new(tagset)
//!     .with_drop_no_calls(true)
//!     .with_retain_sequences(false)
//!     .with_sink(encoder.clone());
//! import_genomes(&store, &encoder, &inputs, &ImportConfig::default())?;
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod export;
pub mod filter;
pub mod import;
pub mod library;
pub mod lis;
pub mod mask;
pub mod matcher;
pub mod merge;
pub mod store;
pub mod tagset;
pub mod throttle;
pub mod tiler;

// Re-exports for convenience
pub use codec::{CompactGenome, CompactSequence, Encoder, Record};
pub use error::{Error, Result};
pub use export::{export_variants, ExportConfig, VariantWriter};
pub use filter::FilterConfig;
pub use import::{import_genomes, ImportConfig};
pub use library::{Library, LibraryStats};
pub use mask::RegionMask;
pub use matcher::{TagHit, TagMatcher};
pub use merge::{merge_libraries, slice_libraries};
pub use store::{TileDigest, TileRef, TileStore, TileVariant, VariantId, VariantSink};
pub use tagset::{TagId, TagSet};
pub use throttle::Throttle;
pub use tiler::{tile_fasta, ChromStats, TiledSequence, TilerConfig};
