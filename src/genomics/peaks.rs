use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use rand::seq::index;
use thiserror::Error;
use tracing::info;

use crate::genomics::{seeded_rng, CoordinateResolver, PeakRecord};

/// Columns required in a narrowPeak row.
const NARROWPEAK_COLUMNS: usize = 10;

/// Errors raised while reading or selecting peaks.
#[derive(Debug, Error)]
pub enum PeakTableError {
    /// I/O failure on the peak table.
    #[error("peak table I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A row had fewer than ten columns.
    #[error("line {line}: expected at least 10 tab-separated columns, found {found}")]
    MissingColumns {
        /// 1-based line number.
        line: usize,
        /// Columns present.
        found: usize,
    },

    /// A numeric column could not be parsed.
    #[error("line {line}: invalid {column} '{value}'")]
    InvalidField {
        /// 1-based line number.
        line: usize,
        /// Column name.
        column: &'static str,
        /// Offending text.
        value: String,
    },

    /// More rows were requested than the table holds.
    #[error("cannot sample {requested} peaks from a table of {available}")]
    SampleTooLarge {
        /// Requested sample size.
        requested: usize,
        /// Rows available after filtering.
        available: usize,
    },
}

fn parse_int(field: &str, line: usize, column: &'static str) -> Result<i64, PeakTableError> {
    field.trim().parse().map_err(|_| PeakTableError::InvalidField {
        line,
        column,
        value: field.to_string(),
    })
}

fn parse_signal(field: &str, line: usize) -> Result<Option<f64>, PeakTableError> {
    let field = field.trim();
    if field.is_empty() || field == "." {
        return Ok(None);
    }
    let value: f64 = field.parse().map_err(|_| PeakTableError::InvalidField {
        line,
        column: "signalValue",
        value: field.to_string(),
    })?;
    // A NaN signal cannot be ranked; treat it like a missing one.
    Ok((!value.is_nan()).then_some(value))
}

/// Parse narrowPeak rows from any reader.
///
/// Blank lines and `#`, `track` and `browser` header lines are skipped.
pub fn parse_peaks<R: BufRead>(reader: R) -> Result<Vec<PeakRecord>, PeakTableError> {
    let mut peaks = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = line_no + 1;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with("track")
            || trimmed.starts_with("browser")
        {
            continue;
        }

        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() < NARROWPEAK_COLUMNS {
            return Err(PeakTableError::MissingColumns {
                line: line_no,
                found: fields.len(),
            });
        }

        peaks.push(PeakRecord {
            chrom: Arc::from(fields[0]),
            start: parse_int(fields[1], line_no, "start")?,
            end: parse_int(fields[2], line_no, "end")?,
            name: fields[3].to_string(),
            score: fields[4].to_string(),
            strand: fields[5].to_string(),
            signal_value: parse_signal(fields[6], line_no)?,
            p_value: fields[7].to_string(),
            q_value: fields[8].to_string(),
            summit: parse_int(fields[9], line_no, "summit")?,
        });
    }
    Ok(peaks)
}

/// Read a narrowPeak file.
pub fn read_peaks<P: AsRef<Path>>(path: P) -> Result<Vec<PeakRecord>, PeakTableError> {
    let reader = BufReader::new(File::open(path)?);
    parse_peaks(reader)
}

/// Which peaks to interpret, and in what order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakSelection {
    /// Keep only peaks on these chromosomes.
    pub chroms: Option<Vec<String>>,
    /// Randomly sample this many peaks.
    pub sample: Option<usize>,
    /// Sort by descending `signalValue`.
    pub presort: bool,
    /// Seed for sampling.
    pub seed: u64,
}

impl PeakSelection {
    /// Apply chromosome filter, then sampling, then sorting.
    ///
    /// Returns a new ordered view; the input is left untouched.
    pub fn apply(&self, peaks: &[PeakRecord]) -> Result<Vec<PeakRecord>, PeakTableError> {
        let mut selected: Vec<PeakRecord> = match &self.chroms {
            Some(chroms) => {
                let keep: HashSet<&str> = chroms.iter().map(String::as_str).collect();
                peaks
                    .iter()
                    .filter(|peak| keep.contains(peak.chrom.as_ref()))
                    .cloned()
                    .collect()
            }
            None => peaks.to_vec(),
        };

        if let Some(requested) = self.sample {
            if requested > selected.len() {
                return Err(PeakTableError::SampleTooLarge {
                    requested,
                    available: selected.len(),
                });
            }
            info!(requested, available = selected.len(), "sampling peaks");
            let mut rng = seeded_rng(self.seed);
            let picked = index::sample(&mut rng, selected.len(), requested);
            selected = picked.into_iter().map(|i| selected[i].clone()).collect();
        }

        if self.presort {
            selected.sort_by(|a, b| descending_signal(a.signal_value, b.signal_value));
        }

        Ok(selected)
    }
}

/// Larger signal first; peaks without a signal go last.
fn descending_signal(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) if x.is_nan() || y.is_nan() => x.is_nan().cmp(&y.is_nan()),
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Write the selected peaks with their resolved sequence window appended.
///
/// Columns: the ten narrowPeak columns followed by the window start and end.
pub fn write_peaks<W: Write>(
    writer: &mut W,
    peaks: &[PeakRecord],
    resolver: &CoordinateResolver,
) -> std::io::Result<()> {
    for peak in peaks {
        let window = resolver.sequence_window(peak);
        let signal = peak
            .signal_value
            .map(|v| v.to_string())
            .unwrap_or_else(|| ".".to_string());
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            peak.chrom,
            peak.start,
            peak.end,
            peak.name,
            peak.score,
            peak.strand,
            signal,
            peak.p_value,
            peak.q_value,
            peak.summit,
            window.start,
            window.end
        )?;
    }
    writer.flush()
}
