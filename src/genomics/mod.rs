//! Genomic building blocks for contribution-score inputs.
//!
//! Peaks are resolved into fixed-length windows, sequences are fetched from a
//! reference with an all-`N` fallback, control tracks are summed and smoothed,
//! and dinucleotide shuffles provide the null model.

mod coords;
mod onehot;
mod peaks;
mod reference;
mod shuffle;
mod smoothing;
mod tracks;
mod types;

pub use coords::{centered_window, CoordinateResolver};
pub use onehot::{decode, one_hot, one_hot_batch, OneHotError, BASES, NUM_BASES};
pub use peaks::{parse_peaks, read_peaks, write_peaks, PeakSelection, PeakTableError};
pub use reference::{
    FaidxReference, FallbackReason, FetchOutcome, InMemoryReference, ReferenceError,
    ReferenceStore, SequenceFetcher,
};
pub use shuffle::{dinuc_shuffle, peak_rng, seeded_rng, shuffle_each, ShuffleRng};
pub use smoothing::{gaussian_smooth, GaussianSmoother, SmoothingError};
pub use tracks::{BigWigTrack, InMemoryTrack, SignalAggregator, SignalTrack, TrackError};
pub use types::{ControlSignal, PeakRecord, Window};
