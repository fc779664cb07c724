#![allow(dead_code)]

use std::path::Path;

use ndarray::{Array3, Axis, Ix2};
use peakshap::config::{ControlMode, PipelineMode, RunConfig, SequenceMode};
use peakshap::genomics::{parse_peaks, InMemoryReference, InMemoryTrack, PeakRecord};
use peakshap::interpret::{
    BackgroundGenerator, Explainer, ExplainerError, InputName, ModelInputs, OutputHead,
};

pub const SEQ_LEN: usize = 8;
pub const CONTROL_LEN: usize = 6;

pub const PEAKS: &str = "\
chr1\t10\t30\tp1\t0\t.\t8.0\t-1\t-1\t5
chr2\t0\t20\tp2\t0\t.\t3.0\t-1\t-1\t1
chr1\t20\t30\tp3\t0\t.\t9.5\t-1\t-1\t4
";

pub fn peaks() -> Vec<PeakRecord> {
    parse_peaks(PEAKS.as_bytes()).expect("fixture table parses")
}

pub fn reference() -> InMemoryReference {
    InMemoryReference::new()
        .with_sequence("chr1", "ACGGTACCGTTAGCATCGATCCGATGCAAGTCTAGGCATG")
        .with_sequence("chr2", "AATTCCGGAATTCCGGAATT")
}

pub fn tracks() -> Vec<InMemoryTrack> {
    vec![
        InMemoryTrack::new("rep1")
            .with_values("chr1", vec![1.0; 40])
            .with_values("chr2", vec![1.0; 20]),
        InMemoryTrack::new("rep2")
            .with_values("chr1", vec![2.0; 40])
            .with_values("chr2", vec![2.0; 20]),
    ]
}

pub fn config(dir: &Path) -> RunConfig {
    let mut config = RunConfig::new(
        dir.join("ref.fa"),
        dir.join("peaks.bed"),
        dir,
        SEQ_LEN,
        CONTROL_LEN,
    );
    config.num_shuffles = 4;
    config
}

pub fn mode(sequences: SequenceMode) -> PipelineMode {
    PipelineMode {
        sequences,
        controls: ControlMode::Tracks(vec!["rep1.bw".into(), "rep2.bw".into()]),
    }
}

/// Scores each base as its one-hot value minus the mean of the background
/// shuffles, recording what it was asked to explain.
#[derive(Debug, Default)]
pub struct BackgroundDeltaExplainer {
    pub calls: Vec<(OutputHead, Vec<InputName>)>,
    pub background_shapes: Vec<Vec<Vec<usize>>>,
}

impl Explainer for BackgroundDeltaExplainer {
    fn explain(
        &mut self,
        head: OutputHead,
        inputs: &ModelInputs,
        background: &BackgroundGenerator,
    ) -> Result<Array3<f32>, ExplainerError> {
        let failed = |e: &dyn std::fmt::Display| ExplainerError::Failed(e.to_string());
        self.calls.push((head, inputs.names()));

        let n = inputs.num_examples();
        let seq_shape = inputs
            .get(InputName::Sequence)
            .map(|s| s.shape().to_vec())
            .ok_or_else(|| ExplainerError::Failed("missing sequence input".to_string()))?;
        let mut scores = Array3::<f32>::zeros((n, seq_shape[1], seq_shape[2]));

        for i in 0..n {
            let example = inputs.example(i).map_err(|e| failed(&e))?;
            let refs = background.generate(&example).map_err(|e| failed(&e))?;
            if i == 0 {
                self.background_shapes
                    .push(refs.iter().map(|r| r.shape().to_vec()).collect());
            }
            let mean = refs[0]
                .mean_axis(Axis(0))
                .ok_or_else(|| ExplainerError::Failed("empty background".to_string()))?;
            let delta = (&example[0] - &mean)
                .into_dimensionality::<Ix2>()
                .map_err(|e| failed(&e))?;
            scores.index_axis_mut(Axis(0), i).assign(&delta);
        }
        Ok(scores)
    }
}
