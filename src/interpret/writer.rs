use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, Axis};
use ndarray_npy::{NpzReader, NpzWriter};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::genomics::{Window, NUM_BASES};

/// Errors raised while writing or reading score containers.
#[derive(Debug, Error)]
pub enum ScoreWriterError {
    /// File-level I/O failure.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failure inside the npz encoder/decoder.
    #[error("npz error on {}: {message}", .path.display())]
    Npz {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },

    /// Chromosome names must be plain ASCII for downstream tools.
    #[error("chromosome name '{0}' is not ASCII")]
    NonAsciiChrom(String),

    /// Records disagree on shape.
    #[error("record {index}: expected [{expected}, 4] scores, got {actual:?}")]
    ShapeMismatch {
        /// Offending record.
        index: usize,
        /// Expected sequence length.
        expected: usize,
        /// Actual shape.
        actual: Vec<usize>,
    },
}

/// Attribution result for one peak.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    /// Chromosome of the sequence window.
    pub chrom: Arc<str>,
    /// Window start.
    pub start: i64,
    /// Window end.
    pub end: i64,
    /// Hypothetical contributions `[L, 4]`.
    pub hypothetical_scores: Array2<f32>,
    /// One-hot input `[L, 4]`.
    pub one_hot_input: Array2<f32>,
}

/// Pair each window with its row of the score and input tensors.
pub fn score_records(
    windows: &[Window],
    hyp_scores: &Array3<f32>,
    input_seqs: &Array3<f32>,
) -> Vec<ScoreRecord> {
    windows
        .iter()
        .zip(hyp_scores.axis_iter(Axis(0)))
        .zip(input_seqs.axis_iter(Axis(0)))
        .map(|((window, scores), one_hot)| ScoreRecord {
            chrom: Arc::clone(&window.chrom),
            start: window.start,
            end: window.end,
            hypothetical_scores: scores.to_owned(),
            one_hot_input: one_hot.to_owned(),
        })
        .collect()
}

/// Encode chromosome names as a NUL-padded `[N, W]` byte matrix.
///
/// This is the memory layout of a fixed-width numpy byte-string column.
pub fn encode_chroms<S: AsRef<str>>(chroms: &[S]) -> Result<Array2<u8>, ScoreWriterError> {
    let width = chroms
        .iter()
        .map(|c| c.as_ref().len())
        .max()
        .unwrap_or(0)
        .max(1);
    let mut encoded = Array2::<u8>::zeros((chroms.len(), width));
    for (row, chrom) in chroms.iter().enumerate() {
        let chrom = chrom.as_ref();
        if !chrom.is_ascii() {
            return Err(ScoreWriterError::NonAsciiChrom(chrom.to_string()));
        }
        for (col, byte) in chrom.bytes().enumerate() {
            encoded[[row, col]] = byte;
        }
    }
    Ok(encoded)
}

/// Inverse of [`encode_chroms`].
pub fn decode_chroms(encoded: &Array2<u8>) -> Vec<String> {
    encoded
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect()
        })
        .collect()
}

/// Columnar form of a list of score records, as stored on disk.
///
/// Fields: `coords_chrom`, `coords_start`, `coords_end`, `hyp_scores`,
/// `input_seqs`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreContainer {
    /// Chromosome names.
    pub coords_chrom: Vec<String>,
    /// Window starts.
    pub coords_start: Array1<i64>,
    /// Window ends.
    pub coords_end: Array1<i64>,
    /// Hypothetical contributions `[N, L, 4]`.
    pub hyp_scores: Array3<f32>,
    /// One-hot inputs `[N, L, 4]`.
    pub input_seqs: Array3<f32>,
}

impl ScoreContainer {
    /// Stack records in order. All records must share one sequence length.
    pub fn from_records(records: &[ScoreRecord], seq_len: usize) -> Result<Self, ScoreWriterError> {
        let n = records.len();
        let mut hyp_scores = Array3::<f32>::zeros((n, seq_len, NUM_BASES));
        let mut input_seqs = Array3::<f32>::zeros((n, seq_len, NUM_BASES));
        for (index, record) in records.iter().enumerate() {
            for matrix in [&record.hypothetical_scores, &record.one_hot_input] {
                if matrix.shape() != [seq_len, NUM_BASES] {
                    return Err(ScoreWriterError::ShapeMismatch {
                        index,
                        expected: seq_len,
                        actual: matrix.shape().to_vec(),
                    });
                }
            }
            hyp_scores
                .index_axis_mut(Axis(0), index)
                .assign(&record.hypothetical_scores);
            input_seqs
                .index_axis_mut(Axis(0), index)
                .assign(&record.one_hot_input);
        }
        Ok(Self {
            coords_chrom: records.iter().map(|r| r.chrom.to_string()).collect(),
            coords_start: records.iter().map(|r| r.start).collect(),
            coords_end: records.iter().map(|r| r.end).collect(),
            hyp_scores,
            input_seqs,
        })
    }

    /// Number of peaks.
    pub fn len(&self) -> usize {
        self.coords_chrom.len()
    }

    /// True when there are no peaks.
    pub fn is_empty(&self) -> bool {
        self.coords_chrom.is_empty()
    }

    /// Write as a deflate-compressed `.npz` archive.
    pub fn write_npz(&self, path: &Path) -> Result<(), ScoreWriterError> {
        let chroms = encode_chroms(&self.coords_chrom)?;
        let mut npz = create_npz(path)?;
        npz.add_array("coords_chrom", &chroms).map_err(npz_error(path))?;
        npz.add_array("coords_start", &self.coords_start).map_err(npz_error(path))?;
        npz.add_array("coords_end", &self.coords_end).map_err(npz_error(path))?;
        npz.add_array("hyp_scores", &self.hyp_scores).map_err(npz_error(path))?;
        npz.add_array("input_seqs", &self.input_seqs).map_err(npz_error(path))?;
        finish_npz(npz, path)
    }

    /// Read a container written by [`ScoreContainer::write_npz`].
    pub fn read_npz(path: &Path) -> Result<Self, ScoreWriterError> {
        let mut npz = open_npz(path)?;
        let chroms: Array2<u8> = npz.by_name("coords_chrom").map_err(npz_error(path))?;
        Ok(Self {
            coords_chrom: decode_chroms(&chroms),
            coords_start: npz.by_name("coords_start").map_err(npz_error(path))?,
            coords_end: npz.by_name("coords_end").map_err(npz_error(path))?,
            hyp_scores: npz.by_name("hyp_scores").map_err(npz_error(path))?,
            input_seqs: npz.by_name("input_seqs").map_err(npz_error(path))?,
        })
    }
}

pub(crate) fn npz_error<E: std::fmt::Display>(path: &Path) -> impl Fn(E) -> ScoreWriterError + '_ {
    move |e| ScoreWriterError::Npz {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

pub(crate) fn create_npz(path: &Path) -> Result<NpzWriter<BufWriter<File>>, ScoreWriterError> {
    let file = File::create(path).map_err(|source| ScoreWriterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(NpzWriter::new_compressed(BufWriter::new(file)))
}

pub(crate) fn finish_npz(
    npz: NpzWriter<BufWriter<File>>,
    path: &Path,
) -> Result<(), ScoreWriterError> {
    let mut writer = npz.finish().map_err(npz_error(path))?;
    writer.flush().map_err(|source| ScoreWriterError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn open_npz(path: &Path) -> Result<NpzReader<BufReader<File>>, ScoreWriterError> {
    let file = File::open(path).map_err(|source| ScoreWriterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    NpzReader::new(BufReader::new(file)).map_err(npz_error(path))
}

/// BLAKE3 digest of a file, hex encoded.
pub fn file_digest(path: &Path) -> Result<String, ScoreWriterError> {
    let io_err = |source| ScoreWriterError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// One file produced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    /// File name relative to the run directory.
    pub name: String,
    /// BLAKE3 digest of the contents.
    pub blake3: String,
}

/// Side-car listing what a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunManifest {
    /// Peaks processed.
    pub num_peaks: usize,
    /// Peaks whose sequence was replaced by `N`s.
    pub num_fallbacks: usize,
    /// Files written, in order.
    pub outputs: Vec<OutputFile>,
}

impl RunManifest {
    /// Record `path` (inside `dir`) with its digest.
    pub fn record(&mut self, dir: &Path, name: &str) -> Result<(), ScoreWriterError> {
        let blake3 = file_digest(&dir.join(name))?;
        self.outputs.push(OutputFile {
            name: name.to_string(),
            blake3,
        });
        Ok(())
    }

    /// Write as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), ScoreWriterError> {
        let io_err = |source| ScoreWriterError::Io {
            path: path.to_path_buf(),
            source,
        };
        let writer = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer_pretty(writer, self).map_err(|e| io_err(std::io::Error::from(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn records() -> Vec<ScoreRecord> {
        (0..3)
            .map(|i| ScoreRecord {
                chrom: Arc::from(if i == 2 { "chr10" } else { "chr1" }),
                start: 100 * i as i64,
                end: 100 * i as i64 + 4,
                hypothetical_scores: Array2::from_elem((4, 4), i as f32 * 0.5),
                one_hot_input: Array2::eye(4),
            })
            .collect()
    }

    #[test]
    fn chrom_names_round_trip() {
        let encoded = encode_chroms(&["chr1", "chrUn_gl000220"]).unwrap();
        assert_eq!(encoded.shape(), &[2, 14]);
        assert_eq!(encoded[[0, 4]], 0);
        assert_eq!(decode_chroms(&encoded), vec!["chr1", "chrUn_gl000220"]);
    }

    #[test]
    fn non_ascii_chroms_are_rejected() {
        assert!(matches!(
            encode_chroms(&["chré"]),
            Err(ScoreWriterError::NonAsciiChrom(_))
        ));
    }

    #[test]
    fn container_round_trips_through_npz() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counts_scores.npz");
        let container = ScoreContainer::from_records(&records(), 4).unwrap();
        container.write_npz(&path).unwrap();

        let back = ScoreContainer::read_npz(&path).unwrap();
        assert_eq!(back, container);
        assert_eq!(back.coords_chrom, vec!["chr1", "chr1", "chr10"]);
        assert_eq!(back.coords_start.to_vec(), vec![0, 100, 200]);
        assert_eq!(back.hyp_scores[[2, 3, 3]], 1.0);
    }

    #[test]
    fn ragged_records_are_rejected() {
        let mut records = records();
        records[1].hypothetical_scores = Array2::zeros((3, 4));
        assert!(matches!(
            ScoreContainer::from_records(&records, 4),
            Err(ScoreWriterError::ShapeMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn manifest_digests_are_stable() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"peaks").unwrap();
        let mut manifest = RunManifest::default();
        manifest.record(dir.path(), "a.txt").unwrap();
        assert_eq!(
            manifest.outputs[0].blake3,
            blake3::hash(b"peaks").to_hex().to_string()
        );
    }
}
