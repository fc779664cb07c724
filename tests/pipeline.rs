mod common;

use std::fs;

use ndarray::Axis;
use peakshap::config::{RunConfig, SequenceMode};
use peakshap::genomics::PeakSelection;
use peakshap::interpret::{
    InputName, Interpreter, OutputHead, RunManifest, ScoreContainer, CONFIG_FILE, MANIFEST_FILE,
    PEAKS_FILE,
};
use tempfile::TempDir;

use common::{BackgroundDeltaExplainer, CONTROL_LEN, SEQ_LEN};

#[test]
fn presorted_run_writes_every_output() {
    let dir = TempDir::new().expect("tempdir");
    let config = common::config(dir.path());
    let selection = PeakSelection {
        presort: true,
        ..PeakSelection::default()
    };
    let peaks = selection.apply(&common::peaks()).expect("selection succeeds");
    let names: Vec<_> = peaks.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["p3", "p1", "p2"]);

    let mut interpreter = Interpreter::new(
        config.clone(),
        common::mode(SequenceMode::Observed),
        common::reference(),
        common::tracks(),
    )
    .expect("interpreter builds");
    let mut explainer = BackgroundDeltaExplainer::default();
    let manifest = interpreter
        .run(&peaks, &mut explainer, dir.path())
        .expect("run succeeds");

    assert_eq!(manifest.num_peaks, 3);
    assert_eq!(manifest.num_fallbacks, 1);
    assert_eq!(
        explainer.calls,
        vec![
            (OutputHead::Counts, vec![InputName::Sequence, InputName::ControlLogCount]),
            (OutputHead::Profile, vec![InputName::Sequence, InputName::ControlProfile]),
        ]
    );
    assert_eq!(explainer.background_shapes[0], vec![vec![4, SEQ_LEN, 4], vec![4, 1]]);
    assert_eq!(
        explainer.background_shapes[1],
        vec![vec![4, SEQ_LEN, 4], vec![4, CONTROL_LEN, 2]]
    );

    for head in OutputHead::ALL {
        let container = ScoreContainer::read_npz(&dir.path().join(format!("{head}_scores.npz")))
            .expect("container reads back");
        assert_eq!(container.coords_chrom, vec!["chr1", "chr1", "chr2"]);
        assert_eq!(container.coords_start.to_vec(), vec![20, 11, -3]);
        assert_eq!(container.coords_end.to_vec(), vec![28, 19, 5]);
        assert_eq!(container.hyp_scores.shape(), &[3, SEQ_LEN, 4]);

        // The all-N fallback has an all-N background, so nothing differs from it.
        assert_eq!(container.input_seqs.index_axis(Axis(0), 2).sum(), 0.0);
        assert!(container.hyp_scores.index_axis(Axis(0), 2).iter().all(|&v| v == 0.0));
        assert_eq!(container.input_seqs.index_axis(Axis(0), 0).sum(), SEQ_LEN as f32);
        // Shuffles keep composition, so deltas cancel per column.
        for column in container.hyp_scores.index_axis(Axis(0), 0).axis_iter(Axis(1)) {
            assert!(column.sum().abs() < 1e-5);
        }
    }

    let bed = fs::read_to_string(dir.path().join(PEAKS_FILE)).expect("peaks file");
    let first = bed.lines().next().expect("at least one peak");
    assert!(first.starts_with("chr1\t20\t30\tp3\t"));
    assert!(first.ends_with("\t20\t28"));
    assert_eq!(bed.lines().count(), 3);

    let saved: RunConfig =
        serde_json::from_str(&fs::read_to_string(dir.path().join(CONFIG_FILE)).expect("config"))
            .expect("config parses");
    assert_eq!(saved, config);

    let on_disk: RunManifest = serde_json::from_str(
        &fs::read_to_string(dir.path().join(MANIFEST_FILE)).expect("manifest"),
    )
    .expect("manifest parses");
    assert_eq!(on_disk, manifest);
}

#[test]
fn controls_are_summed_smoothed_and_logged() {
    let dir = TempDir::new().expect("tempdir");
    let mut interpreter = Interpreter::new(
        common::config(dir.path()),
        common::mode(SequenceMode::Observed),
        common::reference(),
        common::tracks(),
    )
    .expect("interpreter builds");

    let prepared = interpreter.prepare(&common::peaks()).expect("prepare succeeds");
    let batch = &prepared.batch;

    // p1: control window 12..18 on chr1, 3.0 per base.
    assert!(batch.control_profile.index_axis(Axis(0), 0).column(0).iter().all(|&v| v == 3.0));
    assert!((batch.control_logcount[[0, 0]] - 19f32.ln()).abs() < 1e-5);
    for &v in batch.control_profile.index_axis(Axis(0), 0).column(1) {
        assert!((v - 3.0).abs() < 1e-4);
    }

    // p2: control window -2..4 on chr2; positions before the chromosome count as 0.
    let raw: Vec<f32> = batch.control_profile.index_axis(Axis(0), 1).column(0).to_vec();
    assert_eq!(raw, vec![0.0, 0.0, 3.0, 3.0, 3.0, 3.0]);
    assert!((batch.control_logcount[[1, 0]] - 13f32.ln()).abs() < 1e-5);
}

#[test]
fn null_distribution_preserves_composition_and_fallbacks() {
    let dir = TempDir::new().expect("tempdir");
    let peaks = common::peaks();

    let mut observed = Interpreter::new(
        common::config(dir.path()),
        common::mode(SequenceMode::Observed),
        common::reference(),
        common::tracks(),
    )
    .expect("interpreter builds");
    let mut null = Interpreter::new(
        common::config(dir.path()),
        common::mode(SequenceMode::DinucleotideShuffled),
        common::reference(),
        common::tracks(),
    )
    .expect("interpreter builds");

    let observed = observed.prepare(&peaks).expect("observed inputs");
    let null = null.prepare(&peaks).expect("null inputs");

    assert_eq!(null.windows, observed.windows);
    assert_eq!(null.num_fallbacks, 1);
    assert_eq!(null.batch.control_profile, observed.batch.control_profile);
    assert_eq!(
        observed.batch.sequences.sum_axis(Axis(1)),
        null.batch.sequences.sum_axis(Axis(1))
    );
}

#[test]
fn unknown_chromosome_aborts_the_run() {
    let dir = TempDir::new().expect("tempdir");
    let mut interpreter = Interpreter::new(
        common::config(dir.path()),
        common::mode(SequenceMode::Observed),
        common::reference(),
        common::tracks(),
    )
    .expect("interpreter builds");
    let peaks = vec![peakshap::PeakRecord::new("chrM", 10, 2)];
    assert!(interpreter.prepare(&peaks).is_err());
}
