//! Parallel import pipeline: tile many inputs onto one store while
//! encoding the library.
//!
//! Each input contributes one work unit per haploid phase (references
//! contribute a single unit). Units flow through a bounded queue into a
//! worker pool; the pool size defaults to `num_cpus · 9/8 + 1`. The second
//! phase of a diploid input to finish interleaves both phases into one
//! `CompactGenomes` record. The first error any unit reports latches in
//! the shared throttle and short-circuits the remaining units.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use flate2::bufread::MultiGzDecoder;
use regex::Regex;
use tracing::{info, warn};

use crate::codec::{CompactGenome, CompactSequence, Encoder, Record};
use crate::error::{Error, Result};
use crate::store::{TileStore, VariantId};
use crate::throttle::Throttle;
use crate::tiler::{tile_fasta, TilerConfig, DEFAULT_CHROM_FILTER};

/// Seconds between progress log lines.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);
/// Progress ticks between library-size log lines (10 minutes).
const SIZE_LOG_TICKS: u64 = 60;

/// Import options.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Chromosome labels must match this pattern; labels containing `_`
    /// are always skipped.
    pub chrom_filter: Regex,
    /// Drop anchor hits that appear out of chromosomal order.
    pub skip_out_of_order: bool,
    /// Reference FASTA handed to `bcftools consensus` for VCF inputs.
    pub ref_fasta: Option<PathBuf>,
    /// The `bcftools` executable.
    pub bcftools: PathBuf,
    /// Worker pool size; 0 selects `num_cpus · 9/8 + 1`.
    pub workers: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chrom_filter: Regex::new(DEFAULT_CHROM_FILTER).expect("default filter parses"),
            skip_out_of_order: false,
            ref_fasta: None,
            bcftools: PathBuf::from("bcftools"),
            workers: 0,
        }
    }
}

impl ImportConfig {
    fn pool_size(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            num_cpus::get() * 9 / 8 + 1
        }
    }

    fn tiler(&self) -> TilerConfig {
        TilerConfig {
            chrom_filter: self.chrom_filter.clone(),
            skip_out_of_order: self.skip_out_of_order,
        }
    }
}

/// How one input path is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InputKind {
    /// A single FASTA: tiled once, emitted as a reference tile path.
    Reference(PathBuf),
    /// `*.1.fa` / `*.2.fa` siblings, one per phase.
    PairedFasta([PathBuf; 2]),
    /// Indexed VCF consumed through `bcftools consensus`, once per phase.
    Vcf(PathBuf),
}

/// One classified input.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImportInput {
    name: String,
    kind: InputKind,
}

impl ImportInput {
    fn units(&self) -> usize {
        match self.kind {
            InputKind::Reference(_) => 1,
            InputKind::PairedFasta(_) | InputKind::Vcf(_) => 2,
        }
    }
}

/// Import `paths` into `store`, writing records through `encoder`.
///
/// The store's variant sink should already point at the same encoder so
/// tile variants stream out as they are inserted; this function emits the
/// tag set first and one genome or reference record per input.
pub fn import_genomes<W: Write + Send>(
    store: &TileStore,
    encoder: &Encoder<W>,
    paths: &[PathBuf],
    config: &ImportConfig,
) -> Result<()> {
    let inputs = classify_inputs(paths, config)?;
    if inputs.is_empty() {
        return Err(Error::Usage("no inputs to import".into()));
    }
    encoder.write(&Record::TagSet(store.tagset().tags().to_vec()))?;

    let units: Vec<(usize, usize)> = inputs
        .iter()
        .enumerate()
        .flat_map(|(i, input)| (0..input.units()).map(move |p| (i, p)))
        .collect();
    let total = units.len();

    let pipeline = Pipeline {
        store,
        encoder,
        config,
        inputs: &inputs,
        phases: inputs.iter().map(|_| Mutex::new([None, None])).collect(),
        throttle: Throttle::new(config.pool_size()),
        done: AtomicUsize::new(0),
    };

    let (unit_tx, unit_rx) = bounded::<(usize, usize)>(2 * inputs.len());
    let (stop_tx, stop_rx) = bounded::<()>(0);

    std::thread::scope(|scope| {
        let mut workers = Vec::with_capacity(config.pool_size());
        for _ in 0..config.pool_size() {
            let rx = unit_rx.clone();
            let pipeline = &pipeline;
            workers.push(scope.spawn(move || pipeline.worker(rx)));
        }
        drop(unit_rx);
        let monitor = scope.spawn(|| pipeline.monitor(total, stop_rx));

        for unit in units {
            if unit_tx.send(unit).is_err() {
                break;
            }
        }
        drop(unit_tx);
        for worker in workers {
            let _ = worker.join();
        }
        drop(stop_tx);
        let _ = monitor.join();
    });

    pipeline.throttle.wait()?;
    encoder.flush()
}

struct Pipeline<'a, W: Write> {
    store: &'a TileStore,
    encoder: &'a Encoder<W>,
    config: &'a ImportConfig,
    inputs: &'a [ImportInput],
    phases: Vec<Mutex<[Option<Vec<VariantId>>; 2]>>,
    throttle: Throttle,
    done: AtomicUsize,
}

impl<W: Write> Pipeline<'_, W> {
    fn worker(&self, rx: Receiver<(usize, usize)>) {
        while let Ok((input, phase)) = rx.recv() {
            if !self.throttle.acquire() {
                self.done.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let outcome = self.run_unit(input, phase);
            self.done.fetch_add(1, Ordering::Relaxed);
            if let Err(error) = outcome {
                warn!(input = %self.inputs[input].name, %error, "import unit failed");
                self.throttle.report(error);
            }
            self.throttle.release();
        }
    }

    fn run_unit(&self, index: usize, phase: usize) -> Result<()> {
        let input = &self.inputs[index];
        let tiler = self.config.tiler();
        match &input.kind {
            InputKind::Reference(path) => {
                let reader = open_genome_reader(path)?;
                let tiled = tile_fasta(&input.name, reader, self.store, &tiler)?;
                let reference = CompactSequence {
                    name: input.name.clone(),
                    chromosomes: tiled.chromosomes.into_iter().collect::<BTreeMap<_, _>>(),
                };
                self.encoder
                    .write(&Record::CompactSequences(vec![reference]))
            }
            InputKind::PairedFasta(paths) => {
                let reader = open_genome_reader(&paths[phase])?;
                let tiled = tile_fasta(&input.name, reader, self.store, &tiler)?;
                self.finish_phase(index, phase, tiled.to_dense(self.store.tagset().len()))
            }
            InputKind::Vcf(path) => {
                let tiled = self.tile_consensus(path, phase, &tiler, &input.name)?;
                self.finish_phase(index, phase, tiled.to_dense(self.store.tagset().len()))
            }
        }
    }

    /// Run `bcftools consensus` for one phase and tile its stdout.
    fn tile_consensus(
        &self,
        path: &Path,
        phase: usize,
        tiler: &TilerConfig,
        name: &str,
    ) -> Result<crate::tiler::TiledSequence> {
        let ref_fasta = self
            .config
            .ref_fasta
            .as_ref()
            .ok_or_else(|| Error::Usage("VCF input requires a reference FASTA".into()))?;
        let mut child = Command::new(&self.config.bcftools)
            .arg("consensus")
            .arg("--fasta-ref")
            .arg(ref_fasta)
            .arg("-H")
            .arg((phase + 1).to_string())
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child.stdout.take().expect("piped child stdout");

        // Tiling drains stdout to EOF before the child is reaped.
        match tile_fasta(name, BufReader::new(stdout), self.store, tiler) {
            Ok(tiled) => {
                let status = child.wait()?;
                if !status.success() {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("bcftools consensus exited with {status}"),
                    )));
                }
                Ok(tiled)
            }
            Err(error) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(error)
            }
        }
    }

    /// Park one phase; whichever phase lands second interleaves and encodes
    /// the genome record.
    fn finish_phase(&self, index: usize, phase: usize, dense: Vec<VariantId>) -> Result<()> {
        let other = {
            let mut slots = self.phases[index].lock().expect("phase slots poisoned");
            debug_assert!(slots[phase].is_none(), "phase tiled twice");
            match slots[1 - phase].take() {
                Some(other) => other,
                None => {
                    slots[phase] = Some(dense);
                    return Ok(());
                }
            }
        };
        let (phase0, phase1) = if phase == 0 {
            (dense, other)
        } else {
            (other, dense)
        };

        let mut variants = Vec::with_capacity(phase0.len() * 2);
        for (a, b) in phase0.into_iter().zip(phase1) {
            variants.push(a);
            variants.push(b);
        }
        self.encoder.write(&Record::CompactGenomes(vec![CompactGenome {
            name: self.inputs[index].name.clone(),
            variants,
            tag_range: None,
        }]))
    }

    /// Log progress with an extrapolated ETA, and the tile-library size at
    /// ten-minute intervals.
    fn monitor(&self, total: usize, stop: Receiver<()>) {
        let start = Instant::now();
        let mut ticks = 0u64;
        loop {
            match stop.recv_timeout(PROGRESS_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            ticks += 1;
            let done = self.done.load(Ordering::Relaxed);
            let eta = if done > 0 {
                let per_unit = start.elapsed().as_secs_f64() / done as f64;
                (per_unit * (total - done) as f64).round() as u64
            } else {
                0
            };
            info!(done, total, eta_seconds = eta, "import progress");
            if ticks % SIZE_LOG_TICKS == 0 {
                info!(
                    variants = self.store.total_variants(),
                    sequence_bytes = self.store.total_sequence_bytes(),
                    "tile library size"
                );
            }
        }
    }
}

/// Open a FASTA file, unwrapping gzip when the name ends in `.gz`.
fn open_genome_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    if path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
    {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Classify input paths into references, FASTA pairs, and indexed VCFs.
fn classify_inputs(paths: &[PathBuf], config: &ImportConfig) -> Result<Vec<ImportInput>> {
    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        let text = path.to_string_lossy();
        if let Some(stem) = strip_any(&text, &[".vcf.gz", ".vcf", ".bcf"]) {
            require_vcf_index(path)?;
            if config.ref_fasta.is_none() {
                return Err(Error::Usage(format!(
                    "{text}: VCF input requires a reference FASTA"
                )));
            }
            inputs.push(ImportInput {
                name: basename(stem),
                kind: InputKind::Vcf(path.clone()),
            });
        } else if let Some(stem) = strip_any(
            &text,
            &[".1.fa.gz", ".1.fasta.gz", ".1.fa", ".1.fasta"],
        ) {
            let suffix = &text[stem.len() + 2..];
            let sibling = PathBuf::from(format!("{stem}.2{suffix}"));
            if !sibling.exists() {
                return Err(Error::Format(format!(
                    "{text}: missing phase-2 sibling {}",
                    sibling.display()
                )));
            }
            inputs.push(ImportInput {
                name: basename(stem),
                kind: InputKind::PairedFasta([path.clone(), sibling]),
            });
        } else if let Some(stem) = strip_any(
            &text,
            &[".2.fa.gz", ".2.fasta.gz", ".2.fa", ".2.fasta"],
        ) {
            // Consumed alongside its phase-1 sibling, which must be listed.
            let suffix = &text[stem.len() + 2..];
            let sibling = PathBuf::from(format!("{stem}.1{suffix}"));
            if !paths.contains(&sibling) {
                return Err(Error::Format(format!(
                    "{text}: phase-1 sibling {} not among inputs",
                    sibling.display()
                )));
            }
        } else if let Some(stem) = strip_any(&text, &[".fa.gz", ".fasta.gz", ".fa", ".fasta"]) {
            inputs.push(ImportInput {
                name: basename(stem),
                kind: InputKind::Reference(path.clone()),
            });
        } else {
            return Err(Error::Format(format!("{text}: unsupported filename")));
        }
    }
    Ok(inputs)
}

/// A `.tbi` or `.csi` sibling must accompany a VCF input.
fn require_vcf_index(path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    for suffix in [".tbi", ".csi"] {
        if PathBuf::from(format!("{text}{suffix}")).exists() {
            return Ok(());
        }
    }
    Err(Error::Format(format!("{text}: missing .tbi or .csi index")))
}

fn strip_any<'a>(text: &'a str, suffixes: &[&str]) -> Option<&'a str> {
    suffixes
        .iter()
        .find_map(|suffix| text.strip_suffix(suffix))
}

fn basename(stem: &str) -> String {
    stem.rsplit(['/', '\\']).next().unwrap_or(stem).to_string()
}
