//! Library container round trips, merge renumbering, and slicing.

mod common;

use std::sync::Arc;

use tilekit::merge::{merge_libraries, slice_libraries};
use tilekit::{CompactGenome, Encoder, Library, Record, TagId, TileDigest};

/// Tile digests of a genome resolved through its own library, keyed by
/// `(tag, phase)`. Digest identity survives renumbering, so two libraries
/// describe the same genome iff these maps agree.
fn genome_digests(library: &Library, genome: &CompactGenome) -> Vec<(TagId, usize, TileDigest)> {
    let mut out = Vec::new();
    for tag in 0..library.tagset.len() as TagId {
        for phase in 0..2 {
            let variant = genome.variant(tag, phase);
            if variant != 0 {
                let digest = library
                    .store
                    .digest(tag, variant)
                    .expect("referenced variant has a digest");
                out.push((tag, phase, digest));
            }
        }
    }
    out
}

fn write_sample(dir: &tempfile::TempDir, name: &str, phase0: &str, phase1: &str) -> Vec<std::path::PathBuf> {
    common::write_file(dir, &format!("{name}.1.fa"), &format!(">chr1\n{phase0}\n"));
    common::write_file(dir, &format!("{name}.2.fa"), &format!(">chr1\n{phase1}\n"));
    vec![dir.path().join(format!("{name}.1.fa"))]
}

#[test]
fn separate_imports_merge_to_the_single_import_result() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();

    let x = write_sample(&dir, "x", "acgtacgggtacgtaaaa", "acgtacttgtacgtaaaa");
    let y = write_sample(&dir, "y", "acgtacttgtacgtaaaa", "acgtacccgtacgtaaaa");

    // Two separate libraries.
    let lib_x = common::import_to_file(&dir, "x.tlib", common::two_tag_set(), &x, &common::serial_import());
    let lib_y = common::import_to_file(&dir, "y.tlib", common::two_tag_set(), &y, &common::serial_import());

    // One combined import.
    let both: Vec<_> = x.iter().chain(y.iter()).cloned().collect();
    let lib_xy = common::import_to_file(
        &dir,
        "xy.tlib",
        common::two_tag_set(),
        &both,
        &common::serial_import(),
    );

    // Merge the separate libraries.
    let merged_path = dir.path().join("merged.tlib");
    let encoder = Arc::new(Encoder::new(std::fs::File::create(&merged_path).unwrap()));
    merge_libraries(&[lib_x, lib_y], encoder.clone()).unwrap();
    Arc::try_unwrap(encoder).ok().unwrap().into_inner().unwrap();

    let merged = Library::load(&merged_path).unwrap();
    let single = Library::load(&lib_xy).unwrap();

    assert_eq!(merged.stats().variants, single.stats().variants);
    assert_eq!(merged.genomes.len(), single.genomes.len());
    for name in ["x", "y"] {
        let in_merged = merged.genomes.iter().find(|g| g.name == name).unwrap();
        let in_single = single.genomes.iter().find(|g| g.name == name).unwrap();
        assert_eq!(
            genome_digests(&merged, in_merged),
            genome_digests(&single, in_single)
        );
    }
}

#[test]
fn merging_with_an_empty_library_preserves_content() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let x = write_sample(&dir, "x", "acgtacgggtacgtaaaa", "acgtacttgtacgtaaaa");
    let lib_x = common::import_to_file(&dir, "x.tlib", common::two_tag_set(), &x, &common::serial_import());

    // An "empty" library: just the tag set.
    let empty_path = dir.path().join("empty.tlib");
    let empty = Encoder::new(std::fs::File::create(&empty_path).unwrap());
    empty
        .write(&Record::TagSet(common::two_tag_set().tags().to_vec()))
        .unwrap();
    empty.into_inner().unwrap();

    let merged_path = dir.path().join("merged.tlib");
    let encoder = Arc::new(Encoder::new(std::fs::File::create(&merged_path).unwrap()));
    merge_libraries(&[lib_x.clone(), empty_path], encoder.clone()).unwrap();
    Arc::try_unwrap(encoder).ok().unwrap().into_inner().unwrap();

    let merged = Library::load(&merged_path).unwrap();
    let original = Library::load(&lib_x).unwrap();
    assert_eq!(merged.stats().variants, original.stats().variants);
    assert_eq!(
        genome_digests(&merged, &merged.genomes[0]),
        genome_digests(&original, &original.genomes[0])
    );
}

#[test]
fn mismatched_tagsets_refuse_to_merge() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let x = write_sample(&dir, "x", "acgtacgggtacgtaaaa", "acgtacttgtacgtaaaa");
    let lib_x = common::import_to_file(&dir, "x.tlib", common::two_tag_set(), &x, &common::serial_import());

    let other_path = dir.path().join("other.tlib");
    let other = Encoder::new(std::fs::File::create(&other_path).unwrap());
    other
        .write(&Record::TagSet(vec![b"tttttt".to_vec(), b"gtacgt".to_vec()]))
        .unwrap();
    other.into_inner().unwrap();

    let merged_path = dir.path().join("merged.tlib");
    let encoder = Arc::new(Encoder::new(std::fs::File::create(&merged_path).unwrap()));
    let err = merge_libraries(&[lib_x, other_path], encoder).unwrap_err();
    assert!(matches!(err, tilekit::Error::TagsetMismatch(_)));
}

#[test]
fn slices_carry_tag_ranges_and_reload() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let x = write_sample(&dir, "x", "acgtacgggtacgtaaaa", "acgtacttgtacgtaaaa");
    let lib_path =
        common::import_to_file(&dir, "x.tlib", common::two_tag_set(), &x, &common::serial_import());
    let library = Library::load(&lib_path).unwrap();

    let shard_paths = [dir.path().join("shard0.tlib"), dir.path().join("shard1.tlib")];
    slice_libraries(std::slice::from_ref(&library), 1, |shard| {
        Ok(std::fs::File::create(&shard_paths[shard])?)
    })
    .unwrap();

    let shard0 = Library::load(&shard_paths[0]).unwrap();
    let shard1 = Library::load(&shard_paths[1]).unwrap();

    // Shard 0 holds tag 0's variants, shard 1 holds tag 1's.
    assert!(shard0.store.variant_span(0) > 0);
    assert_eq!(shard0.store.variant_span(1), 0);
    assert_eq!(shard1.store.variant_span(0), 0);
    assert!(shard1.store.variant_span(1) > 0);

    // Genome records carry the covered range and concatenate back to the
    // full per-tag array.
    let g0 = &shard0.genomes[0];
    let g1 = &shard1.genomes[0];
    assert_eq!(g0.tag_range, Some((0, 1)));
    assert_eq!(g1.tag_range, Some((1, 2)));
    let full = Library::load(&lib_path).unwrap();
    let original = &full.genomes[0];
    assert_eq!(g0.variant(0, 0), original.variant(0, 0));
    assert_eq!(g1.variant(1, 1), original.variant(1, 1));
}

#[test]
fn multi_library_slices_namespace_variant_ids() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let x = write_sample(&dir, "x", "acgtacgggtacgtaaaa", "acgtacttgtacgtaaaa");
    let y = write_sample(&dir, "y", "acgtacccgtacgtaaaa", "acgtacgggtacgtaaaa");
    let lib_x = common::import_to_file(&dir, "x.tlib", common::two_tag_set(), &x, &common::serial_import());
    let lib_y = common::import_to_file(&dir, "y.tlib", common::two_tag_set(), &y, &common::serial_import());
    let loaded = [Library::load(&lib_x).unwrap(), Library::load(&lib_y).unwrap()];

    let shard_path = dir.path().join("shard0.tlib");
    slice_libraries(&loaded, 2, |_| Ok(std::fs::File::create(&shard_path)?)).unwrap();

    let shard = Library::load(&shard_path).unwrap();
    // dst = src · 2 + lib keeps the two id spaces disjoint by parity.
    let from_x = shard.genomes.iter().find(|g| g.name == "x").unwrap();
    let from_y = shard.genomes.iter().find(|g| g.name == "y").unwrap();
    assert!(from_x.variants.iter().all(|&v| v % 2 == 0));
    assert!(from_y.variants.iter().filter(|&&v| v != 0).all(|v| v % 2 == 1));
}

#[test]
fn gzip_wrapped_libraries_load() -> anyhow::Result<()> {
    common::init_logging();
    let dir = tempfile::tempdir()?;
    let x = write_sample(&dir, "x", "acgtacgggtacgtaaaa", "acgtacttgtacgtaaaa");
    let lib_path =
        common::import_to_file(&dir, "x.tlib", common::two_tag_set(), &x, &common::serial_import());

    let gz_path = dir.path().join("x.tlib.gz");
    let bytes = std::fs::read(&lib_path)?;
    let file = std::fs::File::create(&gz_path)?;
    let mut gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    std::io::Write::write_all(&mut gz, &bytes)?;
    gz.finish()?;

    let plain = Library::load(&lib_path)?;
    let wrapped = Library::load(&gz_path)?;
    assert_eq!(plain.stats().variants, wrapped.stats().variants);
    assert_eq!(plain.genomes, wrapped.genomes);
    Ok(())
}
