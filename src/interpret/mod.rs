//! Explaining peaks and persisting the scores.
//!
//! Model inputs are assembled per batch, handed to an [`Explainer`] once per
//! output head together with a dinucleotide-shuffle background, and the
//! resulting hypothetical contributions are written as columnar containers.

mod batch;
mod explainer;
mod pipeline;
mod writer;

pub use batch::{
    AssembledBatch, BackgroundGenerator, BatchError, InputName, ModelInputs, ModelTensor,
    OutputHead,
};
pub use explainer::{check_scores, Explainer, ExplainerError, PrecomputedExplainer};
pub use pipeline::{
    explain_heads, explain_prepared, scores_file, Interpreter, PreparedInputs, CONFIG_FILE,
    MANIFEST_FILE, MODEL_INPUTS_FILE, PEAKS_FILE,
};
pub use writer::{
    decode_chroms, encode_chroms, file_digest, score_records, OutputFile, RunManifest,
    ScoreContainer, ScoreRecord, ScoreWriterError,
};
