use std::fmt;

use ndarray::{Array1, Array2, Array3, ArrayD, ArrayViewD, Axis, IxDyn};
use thiserror::Error;

use crate::genomics::{decode, dinuc_shuffle, one_hot_batch, seeded_rng, ControlSignal, OneHotError, NUM_BASES};

/// Named model inputs, in the order the model declares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputName {
    /// One-hot sequence `[N, L, 4]`.
    Sequence,
    /// Control log-count `[N, 1]`.
    ControlLogCount,
    /// Raw and smoothed control profile `[N, control_len, 2]`.
    ControlProfile,
}

impl InputName {
    /// Position of this input in the model's input list.
    pub fn model_index(self) -> usize {
        match self {
            InputName::Sequence => 0,
            InputName::ControlLogCount => 1,
            InputName::ControlProfile => 2,
        }
    }

    /// Tensor name used in containers and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            InputName::Sequence => "input_seqs",
            InputName::ControlLogCount => "control_logcount",
            InputName::ControlProfile => "control_profile",
        }
    }
}

impl fmt::Display for InputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model output an explainer attributes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputHead {
    /// Total counts head, explained together with the log-count control.
    Counts,
    /// Profile head, explained together with the profile control.
    Profile,
}

impl OutputHead {
    /// Heads in the order they are explained.
    pub const ALL: [OutputHead; 2] = [OutputHead::Counts, OutputHead::Profile];

    /// The control input fed alongside the sequence for this head.
    pub fn control_input(self) -> InputName {
        match self {
            OutputHead::Counts => InputName::ControlLogCount,
            OutputHead::Profile => InputName::ControlProfile,
        }
    }

    /// Short name used for output files.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputHead::Counts => "counts",
            OutputHead::Profile => "profile",
        }
    }
}

impl fmt::Display for OutputHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while assembling model inputs.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Inputs were not given in model order or did not start with the sequence.
    #[error("model inputs out of order: {0}")]
    OutOfOrder(String),

    /// Tensors disagree on their leading (example) dimension or inner shape.
    #[error("shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Tensor name.
        name: String,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// Example index past the end of the batch.
    #[error("example {index} out of range for batch of {len}")]
    ExampleOutOfRange {
        /// Requested example.
        index: usize,
        /// Batch size.
        len: usize,
    },

    /// Sequence encoding failed.
    #[error(transparent)]
    OneHot(#[from] OneHotError),
}

/// One named input tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTensor {
    /// Which model input this is.
    pub name: InputName,
    /// Tensor data; axis 0 indexes examples.
    pub data: ArrayD<f32>,
}

/// Ordered model inputs: sequence first, then controls in model order.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInputs {
    tensors: Vec<ModelTensor>,
}

impl ModelInputs {
    /// Validate ordering and example counts.
    pub fn new(tensors: Vec<ModelTensor>) -> Result<Self, BatchError> {
        match tensors.first() {
            Some(first) if first.name == InputName::Sequence => {}
            Some(first) => {
                return Err(BatchError::OutOfOrder(format!(
                    "first input must be {}, got {}",
                    InputName::Sequence,
                    first.name
                )))
            }
            None => return Err(BatchError::OutOfOrder("no inputs".to_string())),
        }
        for pair in tensors.windows(2) {
            if pair[0].name.model_index() >= pair[1].name.model_index() {
                return Err(BatchError::OutOfOrder(format!(
                    "{} must not follow {}",
                    pair[1].name, pair[0].name
                )));
            }
        }
        let n = tensors[0].data.shape()[0];
        for tensor in &tensors[1..] {
            if tensor.data.ndim() == 0 || tensor.data.shape()[0] != n {
                let mut expected = tensor.data.shape().to_vec();
                if let Some(first) = expected.first_mut() {
                    *first = n;
                }
                return Err(BatchError::ShapeMismatch {
                    name: tensor.name.to_string(),
                    expected,
                    actual: tensor.data.shape().to_vec(),
                });
            }
        }
        Ok(Self { tensors })
    }

    /// Number of examples.
    pub fn num_examples(&self) -> usize {
        self.tensors[0].data.shape()[0]
    }

    /// All tensors in model order.
    pub fn tensors(&self) -> &[ModelTensor] {
        &self.tensors
    }

    /// Names of the inputs in order.
    pub fn names(&self) -> Vec<InputName> {
        self.tensors.iter().map(|t| t.name).collect()
    }

    /// Look up a tensor by name.
    pub fn get(&self, name: InputName) -> Option<&ArrayD<f32>> {
        self.tensors.iter().find(|t| t.name == name).map(|t| &t.data)
    }

    /// Views of every tensor for a single example, axis 0 removed.
    pub fn example(&self, index: usize) -> Result<Vec<ArrayViewD<'_, f32>>, BatchError> {
        let len = self.num_examples();
        if index >= len {
            return Err(BatchError::ExampleOutOfRange { index, len });
        }
        Ok(self
            .tensors
            .iter()
            .map(|t| t.data.index_axis(Axis(0), index))
            .collect())
    }
}

/// Sequence and control tensors for a whole batch of peaks.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledBatch {
    /// One-hot sequences `[N, L, 4]`.
    pub sequences: Array3<f32>,
    /// Control log-counts `[N, 1]`.
    pub control_logcount: Array2<f32>,
    /// Control profiles `[N, control_len, 2]` (raw, smoothed).
    pub control_profile: Array3<f32>,
}

impl AssembledBatch {
    /// Encode sequences and stack per-peak control signals.
    pub fn assemble<S: AsRef<[u8]>>(
        sequences: &[S],
        controls: &[ControlSignal],
        seq_len: usize,
        control_len: usize,
    ) -> Result<Self, BatchError> {
        if sequences.len() != controls.len() {
            return Err(BatchError::ShapeMismatch {
                name: InputName::ControlProfile.to_string(),
                expected: vec![sequences.len(), control_len, 2],
                actual: vec![controls.len(), control_len, 2],
            });
        }

        let one_hot = one_hot_batch(sequences, seq_len)?;
        let mut logcount = Array2::<f32>::zeros((controls.len(), 1));
        let mut profile = Array3::<f32>::zeros((controls.len(), control_len, 2));
        for (idx, control) in controls.iter().enumerate() {
            if control.len() != control_len || control.smoothed.len() != control_len {
                return Err(BatchError::ShapeMismatch {
                    name: InputName::ControlProfile.to_string(),
                    expected: vec![control_len, 2],
                    actual: vec![control.len(), 2],
                });
            }
            logcount[[idx, 0]] = control.log_count;
            profile
                .index_axis_mut(Axis(0), idx)
                .column_mut(0)
                .assign(&Array1::from(control.raw.clone()));
            profile
                .index_axis_mut(Axis(0), idx)
                .column_mut(1)
                .assign(&Array1::from(control.smoothed.clone()));
        }

        Self::from_arrays(one_hot, logcount, profile)
    }

    /// Wrap already-built tensors, checking they agree on the batch size.
    pub fn from_arrays(
        sequences: Array3<f32>,
        control_logcount: Array2<f32>,
        control_profile: Array3<f32>,
    ) -> Result<Self, BatchError> {
        let n = sequences.shape()[0];
        if sequences.shape()[2] != NUM_BASES {
            return Err(BatchError::ShapeMismatch {
                name: InputName::Sequence.to_string(),
                expected: vec![n, sequences.shape()[1], NUM_BASES],
                actual: sequences.shape().to_vec(),
            });
        }
        if control_logcount.shape() != [n, 1] {
            return Err(BatchError::ShapeMismatch {
                name: InputName::ControlLogCount.to_string(),
                expected: vec![n, 1],
                actual: control_logcount.shape().to_vec(),
            });
        }
        if control_profile.shape()[0] != n || control_profile.shape()[2] != 2 {
            return Err(BatchError::ShapeMismatch {
                name: InputName::ControlProfile.to_string(),
                expected: vec![n, control_profile.shape()[1], 2],
                actual: control_profile.shape().to_vec(),
            });
        }
        Ok(Self {
            sequences,
            control_logcount,
            control_profile,
        })
    }

    /// Number of peaks in the batch.
    pub fn len(&self) -> usize {
        self.sequences.shape()[0]
    }

    /// True for an empty batch.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence length `L`.
    pub fn seq_len(&self) -> usize {
        self.sequences.shape()[1]
    }

    /// Inputs for explaining `head`: the sequence followed by that head's control.
    pub fn inputs_for(&self, head: OutputHead) -> Result<ModelInputs, BatchError> {
        let control = match head {
            OutputHead::Counts => self.control_logcount.clone().into_dyn(),
            OutputHead::Profile => self.control_profile.clone().into_dyn(),
        };
        ModelInputs::new(vec![
            ModelTensor {
                name: InputName::Sequence,
                data: self.sequences.clone().into_dyn(),
            },
            ModelTensor {
                name: head.control_input(),
                data: control,
            },
        ])
    }
}

/// Builds the explainer's reference distribution for a single example.
///
/// The sequence input is replaced by `num_shuffles` dinucleotide shuffles and
/// every control input by `num_shuffles` copies of an all-zero tensor of the
/// same shape. Each call starts a fresh generator from `seed`, so the
/// background of an example does not depend on which examples came before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundGenerator {
    num_shuffles: usize,
    seed: u64,
}

impl BackgroundGenerator {
    /// Background of `num_shuffles` references seeded with `seed`.
    pub fn new(num_shuffles: usize, seed: u64) -> Self {
        Self { num_shuffles, seed }
    }

    /// Number of references per example.
    pub fn num_shuffles(&self) -> usize {
        self.num_shuffles
    }

    /// Background tensors for one example, in the same order as `example`.
    ///
    /// `example[0]` is the `[L, 4]` one-hot sequence; every following view is a
    /// control input with its example axis removed.
    pub fn generate(&self, example: &[ArrayViewD<'_, f32>]) -> Result<Vec<ArrayD<f32>>, BatchError> {
        let (sequence, controls) = example
            .split_first()
            .ok_or_else(|| BatchError::OutOfOrder("no inputs".to_string()))?;
        let sequence = sequence
            .view()
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|_| BatchError::ShapeMismatch {
                name: InputName::Sequence.to_string(),
                expected: vec![sequence.shape().first().copied().unwrap_or(0), NUM_BASES],
                actual: sequence.shape().to_vec(),
            })?;

        let bases = decode(sequence);
        let mut rng = seeded_rng(self.seed);
        let shuffled = dinuc_shuffle(&bases, self.num_shuffles, &mut rng);

        let mut background = Vec::with_capacity(example.len());
        background.push(one_hot_batch(&shuffled, bases.len())?.into_dyn());
        for control in controls {
            let mut shape = Vec::with_capacity(control.ndim() + 1);
            shape.push(self.num_shuffles);
            shape.extend_from_slice(control.shape());
            background.push(ArrayD::<f32>::zeros(IxDyn(&shape)));
        }
        Ok(background)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> AssembledBatch {
        let controls = vec![
            ControlSignal {
                raw: vec![1.0, 2.0, 3.0],
                smoothed: vec![1.5, 2.0, 2.5],
                log_count: 7f32.ln(),
            },
            ControlSignal::zeros(3),
        ];
        AssembledBatch::assemble(&["ACGTAC", "NNNNNN"], &controls, 6, 3).unwrap()
    }

    #[test]
    fn assembles_model_layout() {
        let batch = batch();
        assert_eq!(batch.sequences.shape(), &[2, 6, 4]);
        assert_eq!(batch.control_logcount.shape(), &[2, 1]);
        assert_eq!(batch.control_profile.shape(), &[2, 3, 2]);
        assert_eq!(batch.control_profile[[0, 2, 0]], 3.0);
        assert_eq!(batch.control_profile[[0, 0, 1]], 1.5);
        assert_eq!(batch.sequences.index_axis(Axis(0), 1).sum(), 0.0);
    }

    #[test]
    fn head_inputs_follow_model_order() {
        let batch = batch();
        let counts = batch.inputs_for(OutputHead::Counts).unwrap();
        assert_eq!(counts.names(), vec![InputName::Sequence, InputName::ControlLogCount]);
        let profile = batch.inputs_for(OutputHead::Profile).unwrap();
        assert_eq!(profile.names(), vec![InputName::Sequence, InputName::ControlProfile]);
        assert_eq!(profile.get(InputName::ControlProfile).unwrap().shape(), &[2, 3, 2]);
    }

    #[test]
    fn head_inputs_carry_their_own_control_tensor() {
        let batch = batch();
        let counts = batch.inputs_for(OutputHead::Counts).unwrap();
        assert_eq!(
            counts.get(InputName::ControlLogCount),
            Some(&batch.control_logcount.clone().into_dyn())
        );
        assert!(counts.get(InputName::ControlProfile).is_none());

        let profile = batch.inputs_for(OutputHead::Profile).unwrap();
        assert_eq!(
            profile.get(InputName::ControlProfile),
            Some(&batch.control_profile.clone().into_dyn())
        );
        assert!(profile.get(InputName::ControlLogCount).is_none());
    }

    #[test]
    fn out_of_order_inputs_are_rejected() {
        let batch = batch();
        let err = ModelInputs::new(vec![
            ModelTensor {
                name: InputName::ControlLogCount,
                data: batch.control_logcount.clone().into_dyn(),
            },
            ModelTensor {
                name: InputName::Sequence,
                data: batch.sequences.clone().into_dyn(),
            },
        ])
        .unwrap_err();
        assert!(matches!(err, BatchError::OutOfOrder(_)));
    }

    #[test]
    fn background_tiles_zero_controls() {
        let batch = batch();
        let inputs = batch.inputs_for(OutputHead::Profile).unwrap();
        let example = inputs.example(0).unwrap();

        let background = BackgroundGenerator::new(5, 20210304).generate(&example).unwrap();
        assert_eq!(background.len(), 2);
        assert_eq!(background[0].shape(), &[5, 6, 4]);
        assert_eq!(background[1].shape(), &[5, 3, 2]);
        assert!(background[1].iter().all(|&v| v == 0.0));
        for shuffle in background[0].axis_iter(Axis(0)) {
            assert_eq!(shuffle.sum(), 6.0);
        }
    }

    #[test]
    fn background_is_reproducible_per_example() {
        let batch = batch();
        let inputs = batch.inputs_for(OutputHead::Counts).unwrap();
        let generator = BackgroundGenerator::new(3, 9);
        let a = generator.generate(&inputs.example(0).unwrap()).unwrap();
        let _ = generator.generate(&inputs.example(1).unwrap()).unwrap();
        let b = generator.generate(&inputs.example(0).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn example_index_is_checked() {
        let inputs = batch().inputs_for(OutputHead::Counts).unwrap();
        assert!(matches!(
            inputs.example(2),
            Err(BatchError::ExampleOutOfRange { index: 2, len: 2 })
        ));
    }
}
