use std::fmt;
use std::sync::Arc;

/// A single row of a narrowPeak table.
///
/// `summit` is an offset from `start`, not an absolute coordinate. Records are
/// never mutated after loading; derived windows come from [`PeakRecord::anchor`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeakRecord {
    /// Chromosome/contig name.
    pub chrom: Arc<str>,
    /// 0-based peak start (column 2).
    pub start: i64,
    /// Peak end (column 3).
    pub end: i64,
    /// Peak name (column 4), kept verbatim.
    pub name: String,
    /// Score column (column 5), kept verbatim.
    pub score: String,
    /// Strand column (column 6), kept verbatim.
    pub strand: String,
    /// Enrichment used for ranking (column 7). `None` when the column is `.` or empty.
    pub signal_value: Option<f64>,
    /// -log10 p-value (column 8), kept verbatim.
    pub p_value: String,
    /// -log10 q-value (column 9), kept verbatim.
    pub q_value: String,
    /// Summit offset relative to `start` (column 10).
    pub summit: i64,
}

impl PeakRecord {
    /// Minimal record used when only the coordinates matter.
    pub fn new(chrom: impl Into<Arc<str>>, start: i64, summit: i64) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            end: start + summit + 1,
            name: ".".to_string(),
            score: "0".to_string(),
            strand: ".".to_string(),
            signal_value: None,
            p_value: "-1".to_string(),
            q_value: "-1".to_string(),
            summit,
        }
    }

    /// Absolute summit coordinate, the anchor every window is centred on.
    pub fn anchor(&self) -> i64 {
        self.start + self.summit
    }
}

/// Half-open genomic interval `[start, end)`.
///
/// Coordinates may be negative or run past the chromosome end; fetchers decide
/// what that means.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Window {
    /// Chromosome/contig name.
    pub chrom: Arc<str>,
    /// 0-based inclusive start.
    pub start: i64,
    /// 0-based exclusive end.
    pub end: i64,
}

impl Window {
    /// Number of bases covered.
    pub fn len(&self) -> usize {
        (self.end - self.start).max(0) as usize
    }

    /// True when the window covers no bases.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.chrom, self.start, self.end)
    }
}

/// Per-peak control input: raw and smoothed profile plus the log-count summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSignal {
    /// Position-wise sum over all control tracks (channel 0).
    pub raw: Vec<f32>,
    /// Gaussian-smoothed `raw` (channel 1).
    pub smoothed: Vec<f32>,
    /// `ln(total + 1)` over all tracks.
    pub log_count: f32,
}

impl ControlSignal {
    /// The "no control" signal: all zeros of the given length.
    pub fn zeros(len: usize) -> Self {
        Self {
            raw: vec![0.0; len],
            smoothed: vec![0.0; len],
            log_count: 0.0,
        }
    }

    /// Profile length.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True for a zero-length profile.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}
