use std::path::PathBuf;
use std::sync::Arc;

use tilekit::{Encoder, ImportConfig, TagSet, TileStore};

/// Initialize test logging once; honored via `RUST_LOG`.
pub fn init_logging() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The two-tag set used across the end-to-end suites (k = 6).
pub fn two_tag_set() -> Arc<TagSet> {
    Arc::new(TagSet::new(vec![b"acgtac".to_vec(), b"gtacgt".to_vec()]).unwrap())
}

/// Write `contents` under `dir` and return the path.
pub fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Serialized import configuration: one worker keeps variant id assignment
/// deterministic for assertions.
pub fn serial_import() -> ImportConfig {
    ImportConfig {
        workers: 1,
        ..ImportConfig::default()
    }
}

/// Import `inputs` into a fresh library file under `dir`, returning its
/// path. Sequences stream through the encoder and are not retained.
pub fn import_to_file(
    dir: &tempfile::TempDir,
    name: &str,
    tagset: Arc<TagSet>,
    inputs: &[PathBuf],
    config: &ImportConfig,
) -> PathBuf {
    let path = dir.path().join(name);
    let encoder = Arc::new(Encoder::new(std::fs::File::create(&path).unwrap()));
    let store = TileStore::new(tagset)
        .with_retain_sequences(false)
        .with_sink(encoder.clone());
    tilekit::import_genomes(&store, &encoder, inputs, config).unwrap();
    path
}
