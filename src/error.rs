//! Crate-wide error taxonomy.
//!
//! Individual modules surface their own error types where the failure is
//! local (for example [`crate::mask::MaskError`]); everything that crosses a
//! pipeline boundary is folded into [`Error`] so callers latch and report a
//! single first failure.

use thiserror::Error;

use crate::store::VariantId;
use crate::tagset::TagId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the tiling engine and its pipelines.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad FASTA framing, a VCF without an index, an
    /// unsupported filename, or a corrupt library record.
    #[error("format error: {0}")]
    Format(String),

    /// Two tag sets disagree in count or bytes.
    #[error("tag set mismatch: {0}")]
    TagsetMismatch(String),

    /// Two tags share the same 2-bit-encoded prefix.
    #[error("duplicate tag: tags {first} and {second} share the same {bits}-bit prefix")]
    DuplicateTag {
        /// Id of the tag that registered the prefix first.
        first: TagId,
        /// Id of the tag that collided with it.
        second: TagId,
        /// Width of the shared prefix in bits.
        bits: u32,
    },

    /// A reference or sample variant id refers to a tile that is not in the
    /// library.
    #[error("missing tile: tag {tag} variant {variant}")]
    MissingTile {
        /// Tag id of the missing tile.
        tag: TagId,
        /// Variant id of the missing tile.
        variant: VariantId,
    },

    /// Cooperative cancellation was requested.
    #[error("cancelled")]
    Cancelled,

    /// Underlying stream, file, or subprocess error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid option or option combination.
    #[error("usage error: {0}")]
    Usage(String),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Format(format!("library record: {err}"))
    }
}
