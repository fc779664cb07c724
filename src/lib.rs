//! # Contribution scores for genomic profile models
//!
//! Assembles the inputs a sequence-to-profile model needs to be explained at a
//! set of peaks, builds the dinucleotide-shuffled null model, and stores the
//! resulting hypothetical contribution scores.
//!
//! ## Pipeline
//!
//! 1. **Coordinates**: each peak is anchored at its summit and expanded into a
//!    sequence window and a control window
//! 2. **Sequences**: fetched from an indexed FASTA, replaced by `N`s when the
//!    window leaves the chromosome
//! 3. **Controls**: bigWig tracks summed per base, smoothed, and reduced to a
//!    log-count
//! 4. **Explanation**: once per output head, with a shuffled background
//! 5. **Output**: per-head score containers, the selected peaks, the run
//!    configuration and a digest manifest
//!
//! ## Usage Example
//!
//! ```ignore
//! use peakshap::{config::RunConfig, genomics::read_peaks, interpret::{Interpreter, PrecomputedExplainer}};
//!
//! let config = RunConfig::new("hg38.fa", "peaks.bed", "out", 2114, 1000);
//! let peaks = read_peaks(&config.bed_file)?;
//! let mut interpreter = Interpreter::open(config)?;
//! let mut explainer = PrecomputedExplainer::from_npy(Some(counts.as_ref()), Some(profile.as_ref()))?;
//! let manifest = interpreter.run(&peaks, &mut explainer, "out".as_ref())?;
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod config;
pub mod genomics;
pub mod interpret;

pub use config::{ConfigError, PipelineMode, RunConfig};
pub use genomics::{ControlSignal, PeakRecord, Window};
pub use interpret::{Explainer, Interpreter, OutputHead, RunManifest};

use thiserror::Error;

/// Errors that can occur during an interpretation run
#[derive(Error, Debug)]
pub enum InterpretError {
    /// Invalid or inconsistent configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Peak table could not be read or selected
    #[error(transparent)]
    Peaks(#[from] genomics::PeakTableError),

    /// Reference genome failure
    #[error(transparent)]
    Reference(#[from] genomics::ReferenceError),

    /// Control track failure
    #[error(transparent)]
    Track(#[from] genomics::TrackError),

    /// Smoothing parameters rejected
    #[error(transparent)]
    Smoothing(#[from] genomics::SmoothingError),

    /// Model inputs could not be assembled
    #[error(transparent)]
    Batch(#[from] interpret::BatchError),

    /// The explainer failed
    #[error(transparent)]
    Explainer(#[from] interpret::ExplainerError),

    /// Scores could not be written
    #[error(transparent)]
    Output(#[from] interpret::ScoreWriterError),
}
