//! Run configuration
//!
//! Everything the pipeline needs to know before the first peak is touched:
//! input paths, window lengths, control-track setup, shuffling parameters and
//! where to write results. Validation happens once, up front; a config that
//! passes [`RunConfig::validate`] cannot fail later for configuration reasons.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Default seed for sampling and shuffling.
pub const DEFAULT_SEED: u64 = 20210304;
/// Default number of background shuffles per example.
pub const DEFAULT_NUM_SHUFFLES: usize = 20;
/// Default control smoothing sigma.
pub const DEFAULT_SMOOTHING_SIGMA: f64 = 7.0;
/// Default control smoothing window width.
pub const DEFAULT_SMOOTHING_WIDTH: usize = 81;
/// Default time zone for timestamped output directories.
pub const DEFAULT_TIME_ZONE: &str = "US/Pacific";

/// Configuration errors. All of them are fatal and raised before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required input file does not exist.
    #[error("{what} {} does not exist", .path.display())]
    MissingPath {
        /// What the path was supposed to be.
        what: &'static str,
        /// The missing path.
        path: PathBuf,
    },

    /// The output path exists but is not a directory.
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Two options that cannot be combined were both given.
    #[error("only one of [{0}, {1}] is allowed")]
    MutuallyExclusive(&'static str, &'static str),

    /// A numeric option is out of range.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Option name.
        field: &'static str,
        /// Why it is invalid.
        reason: String,
    },

    /// The control-info document could not be parsed.
    #[error("malformed control info {}: {message}", .path.display())]
    ControlInfo {
        /// Document path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A control track listed in the control-info document is missing.
    #[error("control file {} does not exist", .0.display())]
    MissingControlFile(PathBuf),

    /// The configured time zone is unknown.
    #[error("unknown time zone '{0}'")]
    TimeZone(String),

    /// I/O failure while preparing the output directory.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Gaussian smoothing applied to the control profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlSmoothing {
    /// Standard deviation in bases.
    pub sigma: f64,
    /// Kernel window width in bases.
    pub window_width: usize,
}

impl Default for ControlSmoothing {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SMOOTHING_SIGMA,
            window_width: DEFAULT_SMOOTHING_WIDTH,
        }
    }
}

/// Full configuration of one interpretation run.
///
/// Serialized verbatim next to the score containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Indexed FASTA reference.
    pub reference_genome: PathBuf,
    /// Length of the model's sequence input.
    pub input_seq_len: usize,
    /// Length of the model's control input.
    pub control_len: usize,
    /// Model file, recorded for provenance.
    pub model: Option<PathBuf>,
    /// Task whose control tracks are used.
    pub task_id: i64,
    /// narrowPeak table of positions to interpret.
    pub bed_file: PathBuf,
    /// Randomly sample this many peaks.
    pub sample: Option<usize>,
    /// Restrict to these chromosomes.
    pub chroms: Option<Vec<String>>,
    /// Sort peaks by descending signal before processing.
    pub presort_bed_file: bool,
    /// JSON document mapping tasks to control bigWigs.
    pub control_info: Option<PathBuf>,
    /// Control profile smoothing.
    pub control_smoothing: ControlSmoothing,
    /// Background shuffles per example.
    pub num_shuffles: usize,
    /// Replace observed sequences with dinucleotide shuffles.
    pub gen_null_dist: bool,
    /// Seed for sampling and shuffling.
    pub seed: u64,
    /// Destination directory.
    pub output_directory: PathBuf,
    /// Write into a timestamped subdirectory of `output_directory`.
    pub automate_filenames: bool,
    /// Time zone for the timestamp.
    pub time_zone: String,
}

impl RunConfig {
    /// Configuration with defaults for every optional setting.
    pub fn new(
        reference_genome: impl Into<PathBuf>,
        bed_file: impl Into<PathBuf>,
        output_directory: impl Into<PathBuf>,
        input_seq_len: usize,
        control_len: usize,
    ) -> Self {
        Self {
            reference_genome: reference_genome.into(),
            input_seq_len,
            control_len,
            model: None,
            task_id: 0,
            bed_file: bed_file.into(),
            sample: None,
            chroms: None,
            presort_bed_file: false,
            control_info: None,
            control_smoothing: ControlSmoothing::default(),
            num_shuffles: DEFAULT_NUM_SHUFFLES,
            gen_null_dist: false,
            seed: DEFAULT_SEED,
            output_directory: output_directory.into(),
            automate_filenames: false,
            time_zone: DEFAULT_TIME_ZONE.to_string(),
        }
    }

    /// Check paths, option combinations and numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.output_directory.exists() {
            return Err(ConfigError::MissingPath {
                what: "directory",
                path: self.output_directory.clone(),
            });
        }
        if !self.output_directory.is_dir() {
            return Err(ConfigError::NotADirectory(self.output_directory.clone()));
        }
        require_file("reference genome", &self.reference_genome)?;
        if let Some(model) = &self.model {
            require_file("model", model)?;
        }
        require_file("bed file", &self.bed_file)?;
        if let Some(control_info) = &self.control_info {
            require_file("control info", control_info)?;
        }
        if self.chroms.is_some() && self.sample.is_some() {
            return Err(ConfigError::MutuallyExclusive("--chroms", "--sample"));
        }

        positive("input_seq_len", self.input_seq_len)?;
        positive("control_len", self.control_len)?;
        positive("num_shuffles", self.num_shuffles)?;
        positive("control smoothing window width", self.control_smoothing.window_width)?;
        if !(self.control_smoothing.sigma.is_finite() && self.control_smoothing.sigma > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "control smoothing sigma",
                reason: format!("must be positive, got {}", self.control_smoothing.sigma),
            });
        }
        self.parse_time_zone()?;
        Ok(())
    }

    fn parse_time_zone(&self) -> Result<Tz, ConfigError> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| ConfigError::TimeZone(self.time_zone.clone()))
    }

    /// Resolve the closed pipeline mode: sequence source and control source.
    pub fn resolve_mode(&self) -> Result<PipelineMode, ConfigError> {
        let sequences = if self.gen_null_dist {
            SequenceMode::DinucleotideShuffled
        } else {
            SequenceMode::Observed
        };
        let controls = match &self.control_info {
            None => ControlMode::Absent,
            Some(path) => {
                let tracks = control_tracks_for_task(path, self.task_id)?;
                if tracks.is_empty() {
                    ControlMode::Absent
                } else {
                    ControlMode::Tracks(tracks)
                }
            }
        };
        Ok(PipelineMode {
            sequences,
            controls,
        })
    }

    /// Directory the run writes into, creating the timestamped one if requested.
    pub fn prepare_output_dir(&self) -> Result<PathBuf, ConfigError> {
        if !self.automate_filenames {
            return Ok(self.output_directory.clone());
        }
        let tz = self.parse_time_zone()?;
        let stamp = Utc::now()
            .with_timezone(&tz)
            .format("%Y-%m-%d_%H_%M_%S")
            .to_string();
        let dir = self.output_directory.join(stamp);
        fs::create_dir(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let writer = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| io_err(std::io::Error::from(e)))
    }
}

fn require_file(what: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConfigError::MissingPath {
            what,
            path: path.to_path_buf(),
        })
    }
}

fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

/// Where sequences come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceMode {
    /// Reference sequence at each peak.
    Observed,
    /// One dinucleotide shuffle of each reference sequence (null distribution).
    DinucleotideShuffled,
}

/// Where control inputs come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMode {
    /// No control tracks: control inputs are all zero.
    Absent,
    /// Sum of these bigWig tracks.
    Tracks(Vec<PathBuf>),
}

/// Pipeline mode, resolved once at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineMode {
    /// Sequence source.
    pub sequences: SequenceMode,
    /// Control source.
    pub controls: ControlMode,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ControlPaths {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    task_id: i64,
    #[serde(default)]
    control: Option<ControlPaths>,
}

/// Parse a control-info document and list the control tracks of `task_id`.
///
/// The document is a JSON object of tasks; each task has an integer `task_id`
/// and optionally a `control` path (or list of paths). Every task matching
/// `task_id` contributes, in document order. Listed files must exist.
pub fn control_tracks_for_task(path: &Path, task_id: i64) -> Result<Vec<PathBuf>, ConfigError> {
    let malformed = |message: String| ConfigError::ControlInfo {
        path: path.to_path_buf(),
        message,
    };
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&text).map_err(|e| malformed(e.to_string()))?;

    let mut tracks = Vec::new();
    for (task_name, value) in document {
        let entry: TaskEntry = serde_json::from_value(value)
            .map_err(|e| malformed(format!("task '{task_name}': {e}")))?;
        if entry.task_id != task_id {
            continue;
        }
        let paths = match entry.control {
            None => continue,
            Some(ControlPaths::One(p)) => vec![p],
            Some(ControlPaths::Many(ps)) => ps,
        };
        for control in paths {
            if !control.exists() {
                return Err(ConfigError::MissingControlFile(control));
            }
            info!(task = %task_name, control = %control.display(), "control track");
            tracks.push(control);
        }
    }
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap();
        path
    }

    fn valid_config(dir: &TempDir) -> RunConfig {
        let reference = touch(dir.path(), "ref.fa");
        let bed = touch(dir.path(), "peaks.bed");
        RunConfig::new(reference, bed, dir.path(), 1000, 1000)
    }

    #[test]
    fn defaults_validate() {
        let dir = TempDir::new().unwrap();
        let config = valid_config(&dir);
        assert!(config.validate().is_ok());
        assert_eq!(config.seed, DEFAULT_SEED);
        assert_eq!(config.control_smoothing.window_width, 81);
    }

    #[test]
    fn chroms_and_sample_are_exclusive() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            chroms: Some(vec!["chr1".into()]),
            sample: Some(10),
            ..valid_config(&dir)
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MutuallyExclusive("--chroms", "--sample"))
        ));
    }

    #[test]
    fn missing_reference_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            reference_genome: dir.path().join("absent.fa"),
            ..valid_config(&dir)
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPath { what: "reference genome", .. })
        ));
    }

    #[test]
    fn output_must_be_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = touch(dir.path(), "not_a_dir");
        let config = RunConfig {
            output_directory: file,
            ..valid_config(&dir)
        };
        assert!(matches!(config.validate(), Err(ConfigError::NotADirectory(_))));
    }

    #[test]
    fn zero_lengths_and_bad_time_zone_are_rejected() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            input_seq_len: 0,
            ..valid_config(&dir)
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "input_seq_len", .. })
        ));

        let config = RunConfig {
            time_zone: "Mars/Olympus".into(),
            ..valid_config(&dir)
        };
        assert!(matches!(config.validate(), Err(ConfigError::TimeZone(_))));
    }

    #[test]
    fn control_info_selects_matching_tasks_in_order() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "a.bw");
        let b = touch(dir.path(), "b.bw");
        let c = touch(dir.path(), "c.bw");
        let info = dir.path().join("input.json");
        let mut f = File::create(&info).unwrap();
        write!(
            f,
            r#"{{
                "t0": {{"task_id": 0, "signal": {{"source": []}}, "control": "{}"}},
                "t1": {{"task_id": 1, "control": "{}"}},
                "t2": {{"task_id": 0, "control": ["{}"]}},
                "t3": {{"task_id": 0}}
            }}"#,
            a.display(),
            b.display(),
            c.display()
        )
        .unwrap();

        let tracks = control_tracks_for_task(&info, 0).unwrap();
        assert_eq!(tracks, vec![a, c]);
    }

    #[test]
    fn missing_control_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let info = dir.path().join("input.json");
        fs::write(&info, r#"{"t0": {"task_id": 0, "control": "/no/such/control.bw"}}"#).unwrap();
        assert!(matches!(
            control_tracks_for_task(&info, 0),
            Err(ConfigError::MissingControlFile(_))
        ));
    }

    #[test]
    fn malformed_control_info_is_fatal() {
        let dir = TempDir::new().unwrap();
        let info = dir.path().join("input.json");
        fs::write(&info, "{ not json").unwrap();
        assert!(matches!(
            control_tracks_for_task(&info, 0),
            Err(ConfigError::ControlInfo { .. })
        ));
    }

    #[test]
    fn mode_is_resolved_once() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            gen_null_dist: true,
            ..valid_config(&dir)
        };
        let mode = config.resolve_mode().unwrap();
        assert_eq!(mode.sequences, SequenceMode::DinucleotideShuffled);
        assert_eq!(mode.controls, ControlMode::Absent);
    }

    #[test]
    fn automate_filenames_creates_timestamped_dir() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            automate_filenames: true,
            ..valid_config(&dir)
        };
        let out = config.prepare_output_dir().unwrap();
        assert!(out.is_dir());
        assert_eq!(out.parent(), Some(dir.path()));
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = TempDir::new().unwrap();
        let config = valid_config(&dir);
        let path = dir.path().join("config.json");
        config.write_json(&path).unwrap();
        let back: RunConfig = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
