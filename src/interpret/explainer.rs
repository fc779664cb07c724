use std::fs::File;
use std::path::Path;

use ndarray::Array3;
use ndarray_npy::ReadNpyExt;
use thiserror::Error;

use crate::genomics::NUM_BASES;
use crate::interpret::{BackgroundGenerator, InputName, ModelInputs, OutputHead};

/// Errors reported by an attribution explainer.
#[derive(Debug, Error)]
pub enum ExplainerError {
    /// The explainer has nothing for this head.
    #[error("no scores available for the {0} head")]
    MissingHead(OutputHead),

    /// Scores do not line up with the inputs.
    #[error("{head} scores have shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Head being explained.
        head: OutputHead,
        /// Shape of the sequence input.
        expected: Vec<usize>,
        /// Shape returned.
        actual: Vec<usize>,
    },

    /// Loading externally computed scores failed.
    #[error("failed to load scores from {path}: {message}")]
    Load {
        /// Score file.
        path: String,
        /// Underlying error.
        message: String,
    },

    /// The explainer itself failed.
    #[error("explainer failed: {0}")]
    Failed(String),
}

/// Gradient-based attribution for one output head of the model.
///
/// Implementations receive the ordered model inputs (sequence first, then the
/// head's control) and the background generator they must use for reference
/// samples. They return hypothetical contributions shaped like the sequence
/// input, `[N, L, 4]`.
pub trait Explainer {
    /// Hypothetical contribution scores for `head`.
    fn explain(
        &mut self,
        head: OutputHead,
        inputs: &ModelInputs,
        background: &BackgroundGenerator,
    ) -> Result<Array3<f32>, ExplainerError>;
}

/// Check that `scores` match the sequence input of `inputs`.
pub fn check_scores(
    head: OutputHead,
    inputs: &ModelInputs,
    scores: &Array3<f32>,
) -> Result<(), ExplainerError> {
    let expected = inputs
        .get(InputName::Sequence)
        .map(|seq| seq.shape().to_vec())
        .unwrap_or_default();
    if scores.shape() != expected.as_slice() || scores.shape()[2] != NUM_BASES {
        return Err(ExplainerError::ShapeMismatch {
            head,
            expected,
            actual: scores.shape().to_vec(),
        });
    }
    Ok(())
}

/// Serves scores computed by an external explainer process.
///
/// The background generator is not consulted: the scores already exist.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedExplainer {
    counts: Option<Array3<f32>>,
    profile: Option<Array3<f32>>,
}

impl PrecomputedExplainer {
    /// Use in-memory score tensors.
    pub fn new(counts: Option<Array3<f32>>, profile: Option<Array3<f32>>) -> Self {
        Self { counts, profile }
    }

    /// Load `[N, L, 4]` float32 `.npy` tensors for either head.
    pub fn from_npy(counts: Option<&Path>, profile: Option<&Path>) -> Result<Self, ExplainerError> {
        Ok(Self {
            counts: counts.map(load_npy).transpose()?,
            profile: profile.map(load_npy).transpose()?,
        })
    }

    /// Heads this explainer can answer.
    pub fn heads(&self) -> Vec<OutputHead> {
        OutputHead::ALL
            .into_iter()
            .filter(|head| self.scores(*head).is_some())
            .collect()
    }

    fn scores(&self, head: OutputHead) -> Option<&Array3<f32>> {
        match head {
            OutputHead::Counts => self.counts.as_ref(),
            OutputHead::Profile => self.profile.as_ref(),
        }
    }
}

fn load_npy(path: &Path) -> Result<Array3<f32>, ExplainerError> {
    let load_err = |message: String| ExplainerError::Load {
        path: path.display().to_string(),
        message,
    };
    let file = File::open(path).map_err(|e| load_err(e.to_string()))?;
    Array3::<f32>::read_npy(file).map_err(|e| load_err(e.to_string()))
}

impl Explainer for PrecomputedExplainer {
    fn explain(
        &mut self,
        head: OutputHead,
        inputs: &ModelInputs,
        _background: &BackgroundGenerator,
    ) -> Result<Array3<f32>, ExplainerError> {
        let scores = self
            .scores(head)
            .ok_or(ExplainerError::MissingHead(head))?
            .clone();
        check_scores(head, inputs, &scores)?;
        Ok(scores)
    }
}
