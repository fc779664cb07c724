use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use peakshap::config::{
    ControlSmoothing, RunConfig, DEFAULT_NUM_SHUFFLES, DEFAULT_SEED, DEFAULT_SMOOTHING_SIGMA,
    DEFAULT_SMOOTHING_WIDTH, DEFAULT_TIME_ZONE,
};
use peakshap::genomics::{dinuc_shuffle, read_peaks, seeded_rng, PeakSelection};
use peakshap::interpret::{
    explain_heads, BackgroundGenerator, Interpreter, PrecomputedExplainer, PreparedInputs,
    RunManifest, CONFIG_FILE, MANIFEST_FILE, MODEL_INPUTS_FILE,
};

const LOG_FILE: &str = "shap_scores.log";

#[derive(Parser, Debug)]
#[command(name = "peakshap", about = "Contribution-score inputs and null models for genomic profile models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve peaks, fetch sequences and controls, and write the model inputs.
    Prepare(PrepareArgs),
    /// Store externally computed hypothetical scores for a prepared run.
    Score {
        /// Directory written by `prepare`.
        run_dir: PathBuf,
        /// `[N, L, 4]` float32 .npy scores for the counts head.
        #[arg(long)]
        counts_scores: Option<PathBuf>,
        /// `[N, L, 4]` float32 .npy scores for the profile head.
        #[arg(long)]
        profile_scores: Option<PathBuf>,
    },
    /// Dinucleotide-shuffle sequences (one per line, or FASTA).
    Shuffle {
        /// Input sequences.
        input: PathBuf,
        /// Shuffles per sequence.
        #[arg(long, default_value_t = 1)]
        num_shuffles: usize,
        /// Random seed.
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },
}

#[derive(Args, Debug)]
struct PrepareArgs {
    /// Indexed FASTA reference genome.
    #[arg(long)]
    reference_genome: PathBuf,
    /// Length of the sequence input.
    #[arg(long)]
    input_seq_len: usize,
    /// Length of the control input.
    #[arg(long)]
    control_len: usize,
    /// Model file, recorded for provenance.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Task whose control tracks are used.
    #[arg(long, default_value_t = 0)]
    task_id: i64,
    /// narrowPeak file of peaks to interpret.
    #[arg(long)]
    bed_file: PathBuf,
    /// Interpret a random sample of this many peaks.
    #[arg(long)]
    sample: Option<usize>,
    /// Only interpret peaks on these chromosomes.
    #[arg(long, num_args = 1..)]
    chroms: Option<Vec<String>>,
    /// Sort peaks by descending signal value first.
    #[arg(long)]
    presort_bed_file: bool,
    /// JSON document listing control tracks per task.
    #[arg(long)]
    control_info: Option<PathBuf>,
    /// Sigma of the control smoothing kernel.
    #[arg(long, default_value_t = DEFAULT_SMOOTHING_SIGMA)]
    smoothing_sigma: f64,
    /// Width of the control smoothing kernel.
    #[arg(long, default_value_t = DEFAULT_SMOOTHING_WIDTH)]
    smoothing_width: usize,
    /// Background shuffles per example.
    #[arg(long, default_value_t = DEFAULT_NUM_SHUFFLES)]
    num_shuffles: usize,
    /// Replace every sequence with a dinucleotide shuffle of itself.
    #[arg(long)]
    gen_null_dist: bool,
    /// Seed for sampling and shuffling.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
    /// Output directory.
    #[arg(long)]
    output_directory: PathBuf,
    /// Write into a timestamped subdirectory.
    #[arg(long)]
    automate_filenames: bool,
    /// Time zone of the timestamp.
    #[arg(long, default_value = DEFAULT_TIME_ZONE)]
    time_zone: String,
}

impl From<PrepareArgs> for RunConfig {
    fn from(args: PrepareArgs) -> Self {
        RunConfig {
            reference_genome: args.reference_genome,
            input_seq_len: args.input_seq_len,
            control_len: args.control_len,
            model: args.model,
            task_id: args.task_id,
            bed_file: args.bed_file,
            sample: args.sample,
            chroms: args.chroms,
            presort_bed_file: args.presort_bed_file,
            control_info: args.control_info,
            control_smoothing: ControlSmoothing {
                sigma: args.smoothing_sigma,
                window_width: args.smoothing_width,
            },
            num_shuffles: args.num_shuffles,
            gen_null_dist: args.gen_null_dist,
            seed: args.seed,
            output_directory: args.output_directory,
            automate_filenames: args.automate_filenames,
            time_zone: args.time_zone,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare(args) => run_prepare(args.into())?,
        Commands::Score {
            run_dir,
            counts_scores,
            profile_scores,
        } => run_score(run_dir, counts_scores, profile_scores)?,
        Commands::Shuffle {
            input,
            num_shuffles,
            seed,
        } => {
            init_logging(None)?;
            run_shuffle(input, num_shuffles, seed)?
        }
    }

    Ok(())
}

/// Log to stderr and, when given, append to the run log.
fn init_logging(log_path: Option<&Path>) -> Result<()> {
    let file_layer = match log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .with(file_layer)
        .try_init()
        .context("failed to install logger")
}

fn run_prepare(config: RunConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;
    let out_dir = config
        .prepare_output_dir()
        .context("failed to prepare output directory")?;
    init_logging(Some(&out_dir.join(LOG_FILE)))?;
    info!(out_dir = %out_dir.display(), "output directory");

    let peaks = read_peaks(&config.bed_file)
        .with_context(|| format!("failed to read peaks from {}", config.bed_file.display()))?;
    let selection = PeakSelection {
        chroms: config.chroms.clone(),
        sample: config.sample,
        presort: config.presort_bed_file,
        seed: config.seed,
    };
    let peaks = selection.apply(&peaks).context("peak selection failed")?;
    info!(peaks = peaks.len(), "selected peaks");

    let mut interpreter = Interpreter::open(config).context("failed to set up inputs")?;
    let prepared = interpreter
        .prepare(&peaks)
        .context("failed to prepare model inputs")?;

    let mut manifest = RunManifest {
        num_peaks: prepared.len(),
        num_fallbacks: prepared.num_fallbacks,
        outputs: Vec::new(),
    };
    prepared
        .write_npz(&out_dir.join(MODEL_INPUTS_FILE))
        .context("failed to write model inputs")?;
    manifest.record(&out_dir, MODEL_INPUTS_FILE)?;
    interpreter
        .write_run_metadata(&peaks, &out_dir, &mut manifest)
        .context("failed to write run metadata")?;
    manifest.write_json(&out_dir.join(MANIFEST_FILE))?;

    println!(
        "prepared {} peaks ({} all-N) in {}",
        manifest.num_peaks,
        manifest.num_fallbacks,
        out_dir.display()
    );
    Ok(())
}

fn run_score(
    run_dir: PathBuf,
    counts_scores: Option<PathBuf>,
    profile_scores: Option<PathBuf>,
) -> Result<()> {
    init_logging(Some(&run_dir.join(LOG_FILE)))?;

    let config_path = run_dir.join(CONFIG_FILE);
    let config: RunConfig = serde_json::from_reader(BufReader::new(
        File::open(&config_path)
            .with_context(|| format!("failed to open {}", config_path.display()))?,
    ))
    .with_context(|| format!("malformed run configuration {}", config_path.display()))?;

    let prepared = PreparedInputs::read_npz(&run_dir.join(MODEL_INPUTS_FILE))
        .context("failed to read prepared model inputs")?;
    let mut explainer =
        PrecomputedExplainer::from_npy(counts_scores.as_deref(), profile_scores.as_deref())
            .context("failed to load scores")?;
    let heads = explainer.heads();
    if heads.is_empty() {
        bail!("no scores given: pass --counts-scores and/or --profile-scores");
    }

    let background = BackgroundGenerator::new(config.num_shuffles, config.seed);
    let scored = explain_heads(&prepared, &mut explainer, &background, &run_dir, &heads)
        .context("failed to write scores")?;

    let manifest_path = run_dir.join(MANIFEST_FILE);
    let mut manifest = read_manifest(&manifest_path)?.unwrap_or_default();
    manifest.num_peaks = scored.num_peaks;
    manifest.num_fallbacks = scored.num_fallbacks;
    for output in scored.outputs {
        manifest.outputs.retain(|o| o.name != output.name);
        println!("{}\t{}", output.name, output.blake3);
        manifest.outputs.push(output);
    }
    manifest.write_json(&manifest_path)?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Option<RunManifest>> {
    if !path.exists() {
        return Ok(None);
    }
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let manifest = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("malformed manifest {}", path.display()))?;
    Ok(Some(manifest))
}

fn run_shuffle(input: PathBuf, num_shuffles: usize, seed: u64) -> Result<()> {
    let records = read_sequence_file(&input)
        .with_context(|| format!("failed to read sequences from {}", input.display()))?;
    let mut rng = seeded_rng(seed);
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    for (name, sequence) in records {
        let shuffles = dinuc_shuffle(&sequence, num_shuffles, &mut rng);
        for (idx, shuffled) in shuffles.iter().enumerate() {
            if let Some(name) = &name {
                writeln!(out, ">{name}_shuf{idx}")?;
            }
            out.write_all(shuffled)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Sequences from a FASTA file (named) or a plain one-per-line file (unnamed).
fn read_sequence_file(path: &Path) -> Result<Vec<(Option<String>, Vec<u8>)>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records: Vec<(Option<String>, Vec<u8>)> = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            let name = header.split_whitespace().next().unwrap_or_default();
            records.push((Some(name.to_string()), Vec::new()));
        } else {
            match records.last_mut() {
                Some((Some(_), sequence)) => sequence.extend_from_slice(line.as_bytes()),
                _ => records.push((None, line.as_bytes().to_vec())),
            }
        }
    }

    Ok(records)
}
