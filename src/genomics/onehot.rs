use ndarray::{Array2, Array3, ArrayView2, Axis};
use thiserror::Error;

/// Number of one-hot channels (A, C, G, T).
pub const NUM_BASES: usize = 4;

/// Channel order used by the model.
pub const BASES: [u8; NUM_BASES] = [b'A', b'C', b'G', b'T'];

fn base_index(base: u8) -> Option<usize> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Errors produced while encoding a batch of sequences.
#[derive(Debug, Error)]
pub enum OneHotError {
    /// A sequence in the batch did not have the expected length.
    #[error("sequence {index} has length {actual}, expected {expected}")]
    LengthMismatch {
        /// Position of the offending sequence in the batch.
        index: usize,
        /// Actual length.
        actual: usize,
        /// Expected length.
        expected: usize,
    },
}

/// Encode one sequence as an `[len, 4]` matrix. Non-ACGT bases become zero rows.
pub fn one_hot(sequence: &[u8]) -> Array2<f32> {
    let mut encoded = Array2::<f32>::zeros((sequence.len(), NUM_BASES));
    for (row, &base) in sequence.iter().enumerate() {
        if let Some(col) = base_index(base) {
            encoded[[row, col]] = 1.0;
        }
    }
    encoded
}

/// Encode a batch of equal-length sequences as `[N, len, 4]`.
pub fn one_hot_batch<S: AsRef<[u8]>>(
    sequences: &[S],
    seq_len: usize,
) -> Result<Array3<f32>, OneHotError> {
    let mut encoded = Array3::<f32>::zeros((sequences.len(), seq_len, NUM_BASES));
    for (index, (sequence, mut slot)) in sequences
        .iter()
        .zip(encoded.axis_iter_mut(Axis(0)))
        .enumerate()
    {
        let sequence = sequence.as_ref();
        if sequence.len() != seq_len {
            return Err(OneHotError::LengthMismatch {
                index,
                actual: sequence.len(),
                expected: seq_len,
            });
        }
        slot.assign(&one_hot(sequence));
    }
    Ok(encoded)
}

/// Decode an `[len, 4]` one-hot matrix. Rows without a hot channel decode to `N`.
pub fn decode(encoded: ArrayView2<'_, f32>) -> Vec<u8> {
    encoded
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .position(|&v| v > 0.5)
                .map(|col| BASES[col])
                .unwrap_or(b'N')
        })
        .collect()
}
