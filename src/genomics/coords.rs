use std::sync::Arc;

use crate::genomics::{PeakRecord, Window};

/// Centre a window of `len` bases on `anchor`.
///
/// The left half is `floor(len / 2)` bases, so an odd length puts the extra
/// base to the right of the anchor. No clamping happens here: windows that
/// start before 0 or run past the chromosome end are returned as-is.
pub fn centered_window(chrom: &Arc<str>, anchor: i64, len: usize) -> Window {
    let len = len as i64;
    let start = anchor - len / 2;
    Window {
        chrom: Arc::clone(chrom),
        start,
        end: start + len,
    }
}

/// Resolves peaks into fixed-length sequence and control windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateResolver {
    input_seq_len: usize,
    control_len: usize,
}

impl CoordinateResolver {
    /// Create a resolver for the model's sequence and control lengths.
    pub fn new(input_seq_len: usize, control_len: usize) -> Self {
        Self {
            input_seq_len,
            control_len,
        }
    }

    /// Window fed to the sequence fetcher.
    pub fn sequence_window(&self, peak: &PeakRecord) -> Window {
        centered_window(&peak.chrom, peak.anchor(), self.input_seq_len)
    }

    /// Window fed to the signal aggregator.
    pub fn control_window(&self, peak: &PeakRecord) -> Window {
        centered_window(&peak.chrom, peak.anchor(), self.control_len)
    }

    /// Configured sequence length.
    pub fn input_seq_len(&self) -> usize {
        self.input_seq_len
    }

    /// Configured control length.
    pub fn control_len(&self) -> usize {
        self.control_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn summit_relative_anchor_resolves_to_absolute_window() {
        let peak = PeakRecord::new("chr1", 1000, 50);
        let resolver = CoordinateResolver::new(4, 6);

        let seq = resolver.sequence_window(&peak);
        assert_eq!(seq.start, 1048);
        assert_eq!(seq.end, 1052);

        let ctl = resolver.control_window(&peak);
        assert_eq!(ctl.start, 1047);
        assert_eq!(ctl.end, 1053);
    }

    #[test]
    fn odd_length_extends_to_the_right() {
        let chrom: Arc<str> = Arc::from("chr2");
        let window = centered_window(&chrom, 10, 5);
        assert_eq!((window.start, window.end), (8, 13));
    }

    #[test]
    fn windows_near_zero_go_negative() {
        let chrom: Arc<str> = Arc::from("chrM");
        let window = centered_window(&chrom, 3, 10);
        assert_eq!(window.start, -2);
        assert_eq!(window.len(), 10);
    }

    proptest! {
        #[test]
        fn window_length_always_matches(anchor in -1_000_000i64..1_000_000_000, len in 1usize..5000) {
            let chrom: Arc<str> = Arc::from("chrP");
            let window = centered_window(&chrom, anchor, len);
            prop_assert_eq!((window.end - window.start) as usize, len);
            prop_assert!(window.start <= anchor && anchor <= window.end);
        }
    }
}
