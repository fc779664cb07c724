mod common;

use std::collections::HashSet;

use blake3::Hasher;
use peakshap::config::SequenceMode;
use peakshap::interpret::{Interpreter, OutputHead, ScoreContainer};
use tempfile::TempDir;

use common::BackgroundDeltaExplainer;

fn fingerprint(container: &ScoreContainer) -> blake3::Hash {
    let mut hasher = Hasher::new();
    for chrom in &container.coords_chrom {
        hasher.update(chrom.as_bytes());
    }
    for (&start, &end) in container.coords_start.iter().zip(container.coords_end.iter()) {
        hasher.update(&start.to_le_bytes());
        hasher.update(&end.to_le_bytes());
    }
    for v in container.hyp_scores.iter().chain(container.input_seqs.iter()) {
        hasher.update(&v.to_le_bytes());
    }
    hasher.finalize()
}

#[test]
fn null_model_run_is_deterministic() {
    let mut fingerprints = HashSet::new();
    for _ in 0..4 {
        let dir = TempDir::new().expect("tempdir");
        let mut interpreter = Interpreter::new(
            common::config(dir.path()),
            common::mode(SequenceMode::DinucleotideShuffled),
            common::reference(),
            common::tracks(),
        )
        .expect("interpreter builds");
        interpreter
            .run(&common::peaks(), &mut BackgroundDeltaExplainer::default(), dir.path())
            .expect("run succeeds");

        for head in OutputHead::ALL {
            let container =
                ScoreContainer::read_npz(&dir.path().join(format!("{head}_scores.npz")))
                    .expect("container reads back");
            fingerprints.insert((head, fingerprint(&container)));
        }
    }

    assert_eq!(fingerprints.len(), 2, "outputs diverged across runs");
}
