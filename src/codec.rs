//! Library container codec: a flat stream of length-framed, self-describing
//! records.
//!
//! Each frame is an 8-byte little-endian payload length followed by one
//! bincode-encoded [`Record`]. Streams may be concatenated and may be
//! wrapped in standard gzip; readers detect gzip by filename suffix or the
//! two-byte magic. The layout is internal to this crate and carries no
//! cross-version compatibility promise.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::Mutex;

use flate2::bufread::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::{TileRef, TileVariant, VariantId, VariantSink};
use crate::tagset::TagId;

/// Upper bound on a single record frame; larger lengths indicate a corrupt
/// or misaligned stream.
const MAX_FRAME: u64 = 1 << 33;

/// One sample genome as a dense per-tag variant array.
///
/// `variants[2·t + p]` is the variant id for tag `t`, phase `p`, where `t`
/// is relative to the record's tag range (whole-library records cover tag 0
/// upward). 0 means "no tile for this (tag, phase)".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactGenome {
    /// Sample name.
    pub name: String,
    /// Interleaved phase-0/phase-1 variant ids.
    pub variants: Vec<VariantId>,
    /// `(start, end)` tag range covered by a sliced record; `None` for
    /// whole-library records.
    pub tag_range: Option<(TagId, TagId)>,
}

impl CompactGenome {
    /// First tag covered by this record.
    pub fn start_tag(&self) -> TagId {
        self.tag_range.map(|(start, _)| start).unwrap_or(0)
    }

    /// Variant id at `(tag, phase)`, 0 when outside the covered range.
    pub fn variant(&self, tag: TagId, phase: usize) -> VariantId {
        debug_assert!(phase < 2);
        let start = self.start_tag() as usize;
        let tag = tag as usize;
        if tag < start {
            return 0;
        }
        self.variants
            .get(2 * (tag - start) + phase)
            .copied()
            .unwrap_or(0)
    }

    /// Number of tags this record carries slots for.
    pub fn tag_count(&self) -> usize {
        self.variants.len() / 2
    }
}

/// One named reference: a tile path per chromosome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactSequence {
    /// Reference name, e.g. "GRCh38".
    pub name: String,
    /// Chromosome label → ordered tile path. Adjacent path elements overlap
    /// by k bases on the underlying sequence.
    pub chromosomes: BTreeMap<String, Vec<TileRef>>,
}

/// Self-describing library record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// The ordered tag set, lowercased tag bytes in id order.
    TagSet(Vec<Vec<u8>>),
    /// A batch of tile variants.
    TileVariants(Vec<TileVariant>),
    /// A batch of sample genomes.
    CompactGenomes(Vec<CompactGenome>),
    /// A batch of named references.
    CompactSequences(Vec<CompactSequence>),
}

/// Streaming record encoder.
///
/// Writes are serialized through an internal mutex so concurrent producers
/// (the import workers and the tile store's sink) preserve record
/// boundaries.
pub struct Encoder<W: Write> {
    inner: Mutex<W>,
}

impl<W: Write> std::fmt::Debug for Encoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder").finish_non_exhaustive()
    }
}

impl<W: Write> Encoder<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    /// Append one record.
    pub fn write(&self, record: &Record) -> Result<()> {
        let payload = bincode::serialize(record)?;
        let mut writer = self.inner.lock().expect("encoder lock poisoned");
        writer.write_all(&(payload.len() as u64).to_le_bytes())?;
        writer.write_all(&payload)?;
        Ok(())
    }

    /// Flush the underlying writer.
    pub fn flush(&self) -> Result<()> {
        self.inner
            .lock()
            .expect("encoder lock poisoned")
            .flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        let mut writer = self
            .inner
            .into_inner()
            .expect("encoder lock poisoned");
        writer.flush()?;
        Ok(writer)
    }
}

impl<W: Write + Send> VariantSink for Encoder<W> {
    fn publish(&self, variant: &TileVariant) -> Result<()> {
        self.write(&Record::TileVariants(vec![variant.clone()]))
    }
}

/// Decode records from `reader`, invoking `visit` per record until EOF.
///
/// Concatenated streams decode transparently; loaders enforce tag-set
/// consistency across them.
pub fn decode_records<R: Read>(
    mut reader: R,
    mut visit: impl FnMut(Record) -> Result<()>,
) -> Result<()> {
    let mut len_buf = [0u8; 8];
    loop {
        match read_full(&mut reader, &mut len_buf)? {
            0 => return Ok(()),
            8 => {}
            n => {
                return Err(Error::Format(format!(
                    "truncated frame header ({n} of 8 bytes)"
                )))
            }
        }
        let len = u64::from_le_bytes(len_buf);
        if len > MAX_FRAME {
            return Err(Error::Format(format!("implausible frame length {len}")));
        }
        let mut payload = vec![0u8; len as usize];
        let got = read_full(&mut reader, &mut payload)?;
        if got != payload.len() {
            return Err(Error::Format(format!(
                "truncated frame payload ({got} of {len} bytes)"
            )));
        }
        visit(bincode::deserialize(&payload)?)?;
    }
}

/// Open a library file for reading, unwrapping gzip when the filename ends
/// in `.gz` or the stream starts with the gzip magic.
pub fn open_library(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let by_suffix = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    let by_magic = {
        let head = reader.fill_buf()?;
        head.len() >= 2 && head[0] == 0x1f && head[1] == 0x8b
    };
    if by_suffix || by_magic {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TileDigest;
    use std::io::Cursor;

    fn sample_records() -> Vec<Record> {
        vec![
            Record::TagSet(vec![b"acgtac".to_vec(), b"gtacgt".to_vec()]),
            Record::TileVariants(vec![TileVariant {
                tag: 0,
                variant: 1,
                digest: TileDigest::of(b"acgtacgggg"),
                sequence: b"acgtacgggg".to_vec(),
            }]),
            Record::CompactGenomes(vec![CompactGenome {
                name: "sample1".into(),
                variants: vec![1, 1, 0, 2],
                tag_range: None,
            }]),
            Record::CompactSequences(vec![CompactSequence {
                name: "ref".into(),
                chromosomes: BTreeMap::from([(
                    "chr1".to_string(),
                    vec![TileRef { tag: 0, variant: 1 }],
                )]),
            }]),
        ]
    }

    #[test]
    fn records_round_trip() {
        let records = sample_records();
        let encoder = Encoder::new(Vec::new());
        for record in &records {
            encoder.write(record).unwrap();
        }
        let bytes = encoder.into_inner().unwrap();

        let mut seen = Vec::new();
        decode_records(Cursor::new(bytes), |r| {
            seen.push(r);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, records);
    }

    #[test]
    fn concatenated_streams_decode() {
        let encoder = Encoder::new(Vec::new());
        encoder.write(&sample_records()[0]).unwrap();
        let one = encoder.into_inner().unwrap();
        let mut both = one.clone();
        both.extend_from_slice(&one);

        let mut count = 0;
        decode_records(Cursor::new(both), |_| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn truncated_stream_is_a_format_error() {
        let encoder = Encoder::new(Vec::new());
        encoder.write(&sample_records()[0]).unwrap();
        let mut bytes = encoder.into_inner().unwrap();
        bytes.truncate(bytes.len() - 3);

        let err = decode_records(Cursor::new(bytes), |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn variant_addressing_respects_tag_range() {
        let genome = CompactGenome {
            name: "s".into(),
            variants: vec![3, 4, 5, 6],
            tag_range: Some((10, 12)),
        };
        assert_eq!(genome.variant(10, 0), 3);
        assert_eq!(genome.variant(10, 1), 4);
        assert_eq!(genome.variant(11, 0), 5);
        assert_eq!(genome.variant(9, 0), 0);
        assert_eq!(genome.variant(12, 0), 0);
    }
}
