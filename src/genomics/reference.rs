use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rust_htslib::faidx;
use thiserror::Error;
use tracing::warn;

use crate::genomics::Window;

/// Errors surfaced by a reference sequence store.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// Window starts before 0 or past the end of the chromosome.
    #[error("window {chrom}:{start}-{end} is out of range")]
    OutOfRange {
        /// Chromosome requested.
        chrom: String,
        /// Requested start.
        start: i64,
        /// Requested end.
        end: i64,
    },

    /// Chromosome is not present in the reference index.
    #[error("chromosome '{0}' not found in reference")]
    UnknownChrom(String),

    /// Failure opening the reference.
    #[error("failed to open reference {path}: {message}")]
    Open {
        /// Reference path.
        path: String,
        /// Underlying error.
        message: String,
    },

    /// Failure reported by htslib while reading.
    #[error("failed to read {chrom}:{start}-{end}: {message}")]
    Read {
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

/// Source of reference sequence, addressed with half-open 0-based windows.
///
/// Implementations return whatever the reference holds for the window, which
/// may be shorter than requested at a chromosome edge. Range errors are
/// reported as [`ReferenceError::OutOfRange`].
pub trait ReferenceStore {
    /// Fetch the bases in `[start, end)` of `chrom`.
    fn fetch(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<u8>, ReferenceError>;
}

/// Indexed FASTA reference (`.fa` + `.fai`) read through htslib.
pub struct FaidxReference {
    reader: faidx::Reader,
    lengths: HashMap<String, u64>,
}

impl std::fmt::Debug for FaidxReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaidxReference")
            .field("sequences", &self.lengths.len())
            .finish()
    }
}

impl FaidxReference {
    /// Open an indexed FASTA file. htslib builds the index if it is missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let open_err = |message: String| ReferenceError::Open {
            path: path.display().to_string(),
            message,
        };
        let reader = faidx::Reader::from_path(path).map_err(|e| open_err(e.to_string()))?;
        let names = reader.seq_names().map_err(|e| open_err(e.to_string()))?;
        let lengths = names
            .into_iter()
            .map(|name| {
                let len = reader.fetch_seq_len(&name);
                (name, len)
            })
            .collect();
        Ok(Self { reader, lengths })
    }

    /// Number of sequences in the index.
    pub fn num_sequences(&self) -> usize {
        self.lengths.len()
    }
}

impl ReferenceStore for FaidxReference {
    fn fetch(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<u8>, ReferenceError> {
        let chrom_len = *self
            .lengths
            .get(chrom)
            .ok_or_else(|| ReferenceError::UnknownChrom(chrom.to_string()))? as i64;
        if start < 0 || start >= chrom_len || end <= start {
            return Err(ReferenceError::OutOfRange {
                chrom: chrom.to_string(),
                start,
                end,
            });
        }
        // htslib takes an inclusive end and truncates at the chromosome edge.
        let last = (end - 1).min(chrom_len - 1);
        self.reader
            .fetch_seq_string(chrom, start as usize, last as usize)
            .map(String::into_bytes)
            .map_err(|e| ReferenceError::Read {
                chrom: chrom.to_string(),
                start,
                end,
                message: e.to_string(),
            })
    }
}

/// Reference held in memory, keyed by chromosome name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    sequences: HashMap<String, Arc<[u8]>>,
}

impl InMemoryReference {
    /// Create an empty reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a chromosome.
    pub fn with_sequence(mut self, chrom: impl Into<String>, sequence: impl AsRef<[u8]>) -> Self {
        self.sequences
            .insert(chrom.into(), Arc::from(sequence.as_ref()));
        self
    }
}

impl ReferenceStore for InMemoryReference {
    fn fetch(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<u8>, ReferenceError> {
        let sequence = self
            .sequences
            .get(chrom)
            .ok_or_else(|| ReferenceError::UnknownChrom(chrom.to_string()))?;
        if start < 0 || end < start || start as usize > sequence.len() {
            return Err(ReferenceError::OutOfRange {
                chrom: chrom.to_string(),
                start,
                end,
            });
        }
        let end = (end as usize).min(sequence.len());
        Ok(sequence[start as usize..end].to_vec())
    }
}

/// Why the fetcher substituted the all-`N` sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The reference refused the window.
    OutOfRange,
    /// The reference returned a sequence of the wrong length.
    Truncated {
        /// Length actually returned.
        actual: usize,
    },
}

/// Result of fetching one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Uppercased sequence of exactly the requested length.
    Fetched(Vec<u8>),
    /// All-`N` substitute.
    Fallback {
        /// The substitute sequence.
        sequence: Vec<u8>,
        /// What went wrong.
        reason: FallbackReason,
    },
}

impl FetchOutcome {
    /// The sequence to use, whichever way it was obtained.
    pub fn sequence(&self) -> &[u8] {
        match self {
            FetchOutcome::Fetched(seq) => seq,
            FetchOutcome::Fallback { sequence, .. } => sequence,
        }
    }

    /// Consume the outcome, keeping only the sequence.
    pub fn into_sequence(self) -> Vec<u8> {
        match self {
            FetchOutcome::Fetched(seq) => seq,
            FetchOutcome::Fallback { sequence, .. } => sequence,
        }
    }

    /// True when the all-`N` substitute was used.
    pub fn is_fallback(&self) -> bool {
        matches!(self, FetchOutcome::Fallback { .. })
    }
}

/// Fetches fixed-length sequences, substituting `N`s for unusable windows.
#[derive(Debug)]
pub struct SequenceFetcher<R> {
    reference: R,
    seq_len: usize,
}

impl<R: ReferenceStore> SequenceFetcher<R> {
    /// Wrap a reference store for windows of `seq_len` bases.
    pub fn new(reference: R, seq_len: usize) -> Self {
        Self { reference, seq_len }
    }

    /// Configured sequence length.
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Fetch `window`.
    ///
    /// Range errors and wrong-length results are recovered locally with a
    /// warning; any other reference error is returned.
    pub fn fetch(&mut self, window: &Window) -> Result<FetchOutcome, ReferenceError> {
        let fetched = match self.reference.fetch(&window.chrom, window.start, window.end) {
            Ok(seq) => seq,
            Err(ReferenceError::OutOfRange { .. }) => {
                warn!(
                    chrom = %window.chrom,
                    start = window.start,
                    end = window.end,
                    "unable to fetch reference sequence at peak, using all N's"
                );
                return Ok(self.fallback(FallbackReason::OutOfRange));
            }
            Err(err) => return Err(err),
        };

        if fetched.len() != self.seq_len {
            warn!(
                chrom = %window.chrom,
                start = window.start,
                end = window.end,
                required = self.seq_len,
                actual = fetched.len(),
                "reference does not have the required sequence length at peak, using all N's"
            );
            return Ok(self.fallback(FallbackReason::Truncated {
                actual: fetched.len(),
            }));
        }

        Ok(FetchOutcome::Fetched(fetched.to_ascii_uppercase()))
    }

    fn fallback(&self, reason: FallbackReason) -> FetchOutcome {
        FetchOutcome::Fallback {
            sequence: vec![b'N'; self.seq_len],
            reason,
        }
    }
}
