use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bigtools::utils::reopen::ReopenableFile;
use bigtools::BigWigRead;
use thiserror::Error;

use crate::genomics::{ControlSignal, GaussianSmoother, Window};

/// Errors surfaced by control signal tracks.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The track file could not be opened.
    #[error("failed to open control track {path}: {message}")]
    Open {
        /// Track path.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },

    /// The track has no data for this chromosome at all.
    #[error("chromosome '{chrom}' not present in control track {track}")]
    UnknownChrom {
        /// Chromosome requested.
        chrom: String,
        /// Track name.
        track: String,
    },

    /// Reading values failed.
    #[error("failed to read {chrom}:{start}-{end} from control track {track}: {message}")]
    Read {
        /// Track name.
        track: String,
        /// Chromosome requested.
        chrom: String,
        /// Requested start.
        start: i64,
        /// Requested end.
        end: i64,
        /// Underlying error.
        message: String,
    },
}

/// Genome-wide signal addressed by half-open 0-based windows.
///
/// `values` returns exactly `end - start` entries; positions with no data
/// (including positions off either end of the chromosome) are `NaN`.
pub trait SignalTrack {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    /// Per-base values over `[start, end)` of `chrom`.
    fn values(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<f32>, TrackError>;
}

/// Clip `[start, end)` to `[0, chrom_len)`, returning the offset of the clipped
/// start inside the requested window.
fn clip(start: i64, end: i64, chrom_len: i64) -> Option<(usize, i64, i64)> {
    let lo = start.max(0);
    let hi = end.min(chrom_len);
    (lo < hi).then(|| ((lo - start) as usize, lo, hi))
}

/// bigWig control track read through `bigtools`.
pub struct BigWigTrack {
    path: PathBuf,
    name: String,
    reader: BigWigRead<ReopenableFile>,
    lengths: HashMap<String, u32>,
}

impl std::fmt::Debug for BigWigTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigWigTrack")
            .field("path", &self.path)
            .field("chroms", &self.lengths.len())
            .finish()
    }
}

impl BigWigTrack {
    /// Open a bigWig file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TrackError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |message: String| TrackError::Open {
            path: path.clone(),
            message,
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| open_err("path is not valid UTF-8".to_string()))?;
        let reader = BigWigRead::open_file(path_str).map_err(|e| open_err(e.to_string()))?;
        let lengths = reader
            .chroms()
            .iter()
            .map(|info| (info.name.clone(), info.length))
            .collect();
        Ok(Self {
            name: path.display().to_string(),
            path,
            reader,
            lengths,
        })
    }

    /// Path the track was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SignalTrack for BigWigTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn values(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<f32>, TrackError> {
        let chrom_len = *self.lengths.get(chrom).ok_or_else(|| TrackError::UnknownChrom {
            chrom: chrom.to_string(),
            track: self.name.clone(),
        })?;

        let mut values = vec![f32::NAN; (end - start).max(0) as usize];
        let Some((offset, lo, hi)) = clip(start, end, chrom_len as i64) else {
            return Ok(values);
        };

        let read_err = |message: String| TrackError::Read {
            track: self.name.clone(),
            chrom: chrom.to_string(),
            start,
            end,
            message,
        };
        let intervals = self
            .reader
            .get_interval(chrom, lo as u32, hi as u32)
            .map_err(|e| read_err(e.to_string()))?;
        for interval in intervals {
            let interval = interval.map_err(|e| read_err(e.to_string()))?;
            let s = (interval.start as i64).max(lo);
            let e = (interval.end as i64).min(hi);
            for pos in s..e {
                values[offset + (pos - lo) as usize] = interval.value;
            }
        }
        Ok(values)
    }
}

/// Control track held in memory, one dense vector per chromosome.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTrack {
    name: String,
    chroms: HashMap<String, Vec<f32>>,
}

impl InMemoryTrack {
    /// Create an empty named track.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chroms: HashMap::new(),
        }
    }

    /// Add or replace a chromosome's values.
    pub fn with_values(mut self, chrom: impl Into<String>, values: Vec<f32>) -> Self {
        self.chroms.insert(chrom.into(), values);
        self
    }
}

impl SignalTrack for InMemoryTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn values(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<f32>, TrackError> {
        let data = self.chroms.get(chrom).ok_or_else(|| TrackError::UnknownChrom {
            chrom: chrom.to_string(),
            track: self.name.clone(),
        })?;
        let mut values = vec![f32::NAN; (end - start).max(0) as usize];
        if let Some((offset, lo, hi)) = clip(start, end, data.len() as i64) {
            values[offset..offset + (hi - lo) as usize]
                .copy_from_slice(&data[lo as usize..hi as usize]);
        }
        Ok(values)
    }
}

/// Sums control tracks over a window and smooths the result.
#[derive(Debug)]
pub struct SignalAggregator<T> {
    tracks: Vec<T>,
    smoother: GaussianSmoother,
}

impl<T: SignalTrack> SignalAggregator<T> {
    /// Aggregate over `tracks`; an empty list yields the all-zero signal.
    pub fn new(tracks: Vec<T>, smoother: GaussianSmoother) -> Self {
        Self { tracks, smoother }
    }

    /// Number of tracks being summed.
    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Raw position-wise sum over all tracks and `ln(total + 1)`.
    ///
    /// Undefined positions count as zero.
    pub fn aggregate(&mut self, window: &Window) -> Result<(Vec<f32>, f32), TrackError> {
        let mut raw = vec![0.0f32; window.len()];
        let mut total = 0.0f64;
        for track in &mut self.tracks {
            let values = track.values(&window.chrom, window.start, window.end)?;
            for (acc, v) in raw.iter_mut().zip(values) {
                let v = if v.is_nan() { 0.0 } else { v };
                *acc += v;
                total += v as f64;
            }
        }
        Ok((raw, (total + 1.0).ln() as f32))
    }

    /// Full control input for a window: raw, smoothed and log-count.
    pub fn control_signal(&mut self, window: &Window) -> Result<ControlSignal, TrackError> {
        let (raw, log_count) = self.aggregate(window)?;
        let smoothed = self.smoother.smooth(&raw);
        Ok(ControlSignal {
            raw,
            smoothed,
            log_count,
        })
    }
}
