use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3};
use tracing::{debug, info};

use crate::config::{ControlMode, PipelineMode, RunConfig, SequenceMode};
use crate::genomics::{
    seeded_rng, shuffle_each, write_peaks, BigWigTrack, ControlSignal, CoordinateResolver,
    FaidxReference, GaussianSmoother, PeakRecord, ReferenceStore, SequenceFetcher,
    SignalAggregator, SignalTrack, Window,
};
use crate::interpret::writer::{create_npz, finish_npz, npz_error, open_npz};
use crate::interpret::{
    check_scores, decode_chroms, encode_chroms, score_records, AssembledBatch,
    BackgroundGenerator, Explainer, OutputHead, RunManifest, ScoreContainer, ScoreWriterError,
};
use crate::InterpretError;

/// File holding the assembled model inputs of a prepared run.
pub const MODEL_INPUTS_FILE: &str = "model_inputs.npz";
/// Selected peaks with their resolved windows.
pub const PEAKS_FILE: &str = "peaks_valid_scores.bed";
/// Run configuration side-car.
pub const CONFIG_FILE: &str = "config.json";
/// Digest manifest of everything written.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Score container file name for a head.
pub fn scores_file(head: OutputHead) -> String {
    format!("{}_scores.npz", head.as_str())
}

/// Model inputs for every selected peak, ready for the explainer.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedInputs {
    /// Sequence window of each peak, in processing order.
    pub windows: Vec<Window>,
    /// Assembled tensors.
    pub batch: AssembledBatch,
    /// Peaks whose sequence fell back to `N`s.
    pub num_fallbacks: usize,
}

impl PreparedInputs {
    /// Number of peaks.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// True when no peaks were prepared.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Store coordinates and tensors as a compressed `.npz` archive.
    pub fn write_npz(&self, path: &Path) -> Result<(), ScoreWriterError> {
        let chroms: Vec<&str> = self.windows.iter().map(|w| w.chrom.as_ref()).collect();
        let chroms = encode_chroms(&chroms)?;
        let starts: Array1<i64> = self.windows.iter().map(|w| w.start).collect();
        let ends: Array1<i64> = self.windows.iter().map(|w| w.end).collect();
        let fallbacks = Array1::from(vec![self.num_fallbacks as i64]);

        let mut npz = create_npz(path)?;
        npz.add_array("coords_chrom", &chroms).map_err(npz_error(path))?;
        npz.add_array("coords_start", &starts).map_err(npz_error(path))?;
        npz.add_array("coords_end", &ends).map_err(npz_error(path))?;
        npz.add_array("input_seqs", &self.batch.sequences).map_err(npz_error(path))?;
        npz.add_array("control_logcount", &self.batch.control_logcount)
            .map_err(npz_error(path))?;
        npz.add_array("control_profile", &self.batch.control_profile)
            .map_err(npz_error(path))?;
        npz.add_array("num_fallbacks", &fallbacks).map_err(npz_error(path))?;
        finish_npz(npz, path)
    }

    /// Load inputs stored by [`PreparedInputs::write_npz`].
    pub fn read_npz(path: &Path) -> Result<Self, InterpretError> {
        let mut npz = open_npz(path)?;
        let chroms: Array2<u8> = npz.by_name("coords_chrom").map_err(npz_error(path))?;
        let starts: Array1<i64> = npz.by_name("coords_start").map_err(npz_error(path))?;
        let ends: Array1<i64> = npz.by_name("coords_end").map_err(npz_error(path))?;
        let sequences: Array3<f32> = npz.by_name("input_seqs").map_err(npz_error(path))?;
        let logcount: Array2<f32> = npz.by_name("control_logcount").map_err(npz_error(path))?;
        let profile: Array3<f32> = npz.by_name("control_profile").map_err(npz_error(path))?;
        let fallbacks: Array1<i64> = npz.by_name("num_fallbacks").map_err(npz_error(path))?;

        let windows = decode_chroms(&chroms)
            .into_iter()
            .zip(starts.iter().zip(ends.iter()))
            .map(|(chrom, (&start, &end))| Window {
                chrom: Arc::from(chrom),
                start,
                end,
            })
            .collect();
        Ok(Self {
            windows,
            batch: AssembledBatch::from_arrays(sequences, logcount, profile)?,
            num_fallbacks: fallbacks.first().copied().unwrap_or(0).max(0) as usize,
        })
    }
}

/// Where the per-peak control input comes from.
#[derive(Debug)]
enum ControlStage<T> {
    Absent { control_len: usize },
    Aggregate(SignalAggregator<T>),
}

impl<T: SignalTrack> ControlStage<T> {
    fn signal(&mut self, window: &Window) -> Result<ControlSignal, InterpretError> {
        match self {
            ControlStage::Absent { control_len } => Ok(ControlSignal::zeros(*control_len)),
            ControlStage::Aggregate(aggregator) => Ok(aggregator.control_signal(window)?),
        }
    }
}

/// Drives one interpretation run.
///
/// Owns the reference and control tracks for the lifetime of the run. Peaks are
/// processed strictly in order; the explainer is invoked once per output head
/// over the whole batch.
#[derive(Debug)]
pub struct Interpreter<R, T> {
    config: RunConfig,
    mode: PipelineMode,
    resolver: CoordinateResolver,
    fetcher: SequenceFetcher<R>,
    controls: ControlStage<T>,
}

impl Interpreter<FaidxReference, BigWigTrack> {
    /// Validate `config`, resolve the pipeline mode and open every input file.
    pub fn open(config: RunConfig) -> Result<Self, InterpretError> {
        config.validate()?;
        let mode = config.resolve_mode()?;
        info!(reference = %config.reference_genome.display(), "opening reference");
        let reference = FaidxReference::open(&config.reference_genome)?;
        debug!(sequences = reference.num_sequences(), "reference index loaded");
        let tracks = match &mode.controls {
            ControlMode::Absent => Vec::new(),
            ControlMode::Tracks(paths) => {
                info!(count = paths.len(), "opening control bigWigs");
                paths
                    .iter()
                    .map(BigWigTrack::open)
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Self::new(config, mode, reference, tracks)
    }
}

impl<R: ReferenceStore, T: SignalTrack> Interpreter<R, T> {
    /// Build from already-open inputs. No tracks means all-zero controls.
    pub fn new(
        config: RunConfig,
        mode: PipelineMode,
        reference: R,
        tracks: Vec<T>,
    ) -> Result<Self, InterpretError> {
        let resolver = CoordinateResolver::new(config.input_seq_len, config.control_len);
        let fetcher = SequenceFetcher::new(reference, config.input_seq_len);
        let controls = if tracks.is_empty() {
            ControlStage::Absent {
                control_len: config.control_len,
            }
        } else {
            let smoother = GaussianSmoother::new(
                config.control_smoothing.sigma,
                config.control_smoothing.window_width,
            )?;
            ControlStage::Aggregate(SignalAggregator::new(tracks, smoother))
        };
        Ok(Self {
            config,
            mode,
            resolver,
            fetcher,
            controls,
        })
    }

    /// Pipeline mode this interpreter runs in.
    pub fn mode(&self) -> &PipelineMode {
        &self.mode
    }

    /// Run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Coordinate resolver in use.
    pub fn resolver(&self) -> &CoordinateResolver {
        &self.resolver
    }

    /// Fetch sequences and controls for every peak and assemble the batch.
    pub fn prepare(&mut self, peaks: &[PeakRecord]) -> Result<PreparedInputs, InterpretError> {
        info!(peaks = peaks.len(), "preparing model inputs");
        let mut windows = Vec::with_capacity(peaks.len());
        let mut sequences = Vec::with_capacity(peaks.len());
        let mut controls = Vec::with_capacity(peaks.len());
        let mut num_fallbacks = 0;

        for (idx, peak) in peaks.iter().enumerate() {
            let window = self.resolver.sequence_window(peak);
            let outcome = self.fetcher.fetch(&window)?;
            if outcome.is_fallback() {
                num_fallbacks += 1;
            }
            let control = self.controls.signal(&self.resolver.control_window(peak))?;
            debug!(idx, window = %window, log_count = control.log_count, "peak prepared");

            sequences.push(outcome.into_sequence());
            controls.push(control);
            windows.push(window);
        }

        if self.mode.sequences == SequenceMode::DinucleotideShuffled {
            info!("generating null sequences");
            let mut rng = seeded_rng(self.config.seed);
            sequences = shuffle_each(&sequences, &mut rng);
        }

        let batch = AssembledBatch::assemble(
            &sequences,
            &controls,
            self.config.input_seq_len,
            self.config.control_len,
        )?;
        if num_fallbacks > 0 {
            info!(num_fallbacks, "peaks used all-N sequences");
        }
        Ok(PreparedInputs {
            windows,
            batch,
            num_fallbacks,
        })
    }

    /// Write the selected peak table and the run configuration into `out_dir`.
    pub fn write_run_metadata(
        &self,
        peaks: &[PeakRecord],
        out_dir: &Path,
        manifest: &mut RunManifest,
    ) -> Result<(), InterpretError> {
        let peaks_path = out_dir.join(PEAKS_FILE);
        let io_err = |source| ScoreWriterError::Io {
            path: peaks_path.clone(),
            source,
        };
        let mut writer = BufWriter::new(File::create(&peaks_path).map_err(io_err)?);
        write_peaks(&mut writer, peaks, &self.resolver).map_err(io_err)?;
        drop(writer);
        manifest.record(out_dir, PEAKS_FILE)?;

        self.config.write_json(&out_dir.join(CONFIG_FILE))?;
        manifest.record(out_dir, CONFIG_FILE)?;
        Ok(())
    }

    /// Prepare, explain both heads and write every output into `out_dir`.
    pub fn run<E: Explainer>(
        &mut self,
        peaks: &[PeakRecord],
        explainer: &mut E,
        out_dir: &Path,
    ) -> Result<RunManifest, InterpretError> {
        let prepared = self.prepare(peaks)?;
        let background = BackgroundGenerator::new(self.config.num_shuffles, self.config.seed);
        let mut manifest = explain_prepared(&prepared, explainer, &background, out_dir)?;
        self.write_run_metadata(peaks, out_dir, &mut manifest)?;
        manifest.write_json(&out_dir.join(MANIFEST_FILE))?;
        Ok(manifest)
    }
}

/// Explain every head over prepared inputs and write one score container each.
pub fn explain_prepared<E: Explainer>(
    prepared: &PreparedInputs,
    explainer: &mut E,
    background: &BackgroundGenerator,
    out_dir: &Path,
) -> Result<RunManifest, InterpretError> {
    explain_heads(prepared, explainer, background, out_dir, &OutputHead::ALL)
}

/// Like [`explain_prepared`], restricted to `heads`.
pub fn explain_heads<E: Explainer>(
    prepared: &PreparedInputs,
    explainer: &mut E,
    background: &BackgroundGenerator,
    out_dir: &Path,
    heads: &[OutputHead],
) -> Result<RunManifest, InterpretError> {
    let mut manifest = RunManifest {
        num_peaks: prepared.len(),
        num_fallbacks: prepared.num_fallbacks,
        outputs: Vec::new(),
    };

    for &head in heads {
        info!(%head, "generating shap scores");
        let inputs = prepared.batch.inputs_for(head)?;
        let scores = explainer.explain(head, &inputs, background)?;
        check_scores(head, &inputs, &scores)?;

        info!(%head, "saving scores");
        let records = score_records(&prepared.windows, &scores, &prepared.batch.sequences);
        let container = ScoreContainer::from_records(&records, prepared.batch.seq_len())?;
        let name = scores_file(head);
        container.write_npz(&out_dir.join(&name))?;
        manifest.record(out_dir, &name)?;
    }
    Ok(manifest)
}
