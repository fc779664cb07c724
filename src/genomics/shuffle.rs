//! Dinucleotide-preserving shuffles.
//!
//! A sequence is viewed as a walk over the multigraph whose vertices are the
//! four bases and whose edges are its adjacent base pairs. A shuffle is another
//! Eulerian walk over the same multigraph starting at the same base, so the
//! base composition and the multiset of dinucleotides are both preserved.
//!
//! For each base the outgoing edges are randomly reordered except the edge
//! used last in the original sequence, which stays last. The set of last-exit
//! edges forms an arborescence into the final base, which guarantees the walk
//! consumes every edge before it gets stuck.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Generator used for every shuffle. ChaCha output is stable across platforms
/// and releases, so a seed reproduces the same shuffles anywhere.
pub type ShuffleRng = ChaCha8Rng;

/// Generator for a whole run.
pub fn seeded_rng(seed: u64) -> ShuffleRng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Independent sub-stream for one peak, derived from the run seed.
///
/// Callers that shuffle peaks out of order (or in parallel) use this instead of
/// sharing one generator, so the output does not depend on scheduling.
pub fn peak_rng(seed: u64, peak_index: u64) -> ShuffleRng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(peak_index);
    rng
}

const NUM_CLASSES: usize = 4;
const CLASS_BASES: [u8; NUM_CLASSES] = [b'A', b'C', b'G', b'T'];

fn class_of(base: u8) -> Option<u8> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Transition multigraph of one run of canonical bases.
#[derive(Debug, Clone)]
struct TransitionGraph {
    /// Offset of the run inside the full sequence.
    offset: usize,
    /// Base class at each position of the run.
    tokens: Vec<u8>,
    /// For each class, positions (within the run) entered from that class.
    next: [Vec<usize>; NUM_CLASSES],
}

impl TransitionGraph {
    fn build(offset: usize, tokens: Vec<u8>) -> Self {
        let mut next: [Vec<usize>; NUM_CLASSES] = Default::default();
        for (pos, pair) in tokens.windows(2).enumerate() {
            next[pair[0] as usize].push(pos + 1);
        }
        Self {
            offset,
            tokens,
            next,
        }
    }

    /// Reorder all but the last outgoing edge of every class.
    fn permute<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for edges in self.next.iter_mut() {
            if edges.len() > 2 {
                let keep = edges.len() - 1;
                edges[..keep].shuffle(rng);
            }
        }
    }

    /// Walk the current edge order, writing bases into `out`.
    fn walk(&self, out: &mut [u8]) {
        let mut used = [0usize; NUM_CLASSES];
        let mut pos = 0usize;
        out[self.offset] = CLASS_BASES[self.tokens[0] as usize];
        for j in 1..self.tokens.len() {
            let class = self.tokens[pos] as usize;
            pos = self.next[class][used[class]];
            used[class] += 1;
            out[self.offset + j] = CLASS_BASES[self.tokens[pos] as usize];
        }
    }
}

/// Split `sequence` into runs of canonical bases; everything else is pinned.
fn build_graphs(sequence: &[u8]) -> Vec<TransitionGraph> {
    let mut graphs = Vec::new();
    let mut run_start = 0;
    let mut run = Vec::new();
    for (idx, &base) in sequence.iter().enumerate() {
        match class_of(base) {
            Some(class) => {
                if run.is_empty() {
                    run_start = idx;
                }
                run.push(class);
            }
            None if !run.is_empty() => {
                graphs.push(TransitionGraph::build(run_start, std::mem::take(&mut run)));
            }
            None => {}
        }
    }
    if !run.is_empty() {
        graphs.push(TransitionGraph::build(run_start, run));
    }
    graphs
}

/// Produce `num_shuffles` dinucleotide-preserving shuffles of `sequence`.
///
/// Canonical bases are returned uppercase. Any other byte (e.g. `N`) stays at
/// its position and splits the sequence into independently shuffled runs, so
/// no dinucleotide spans an ambiguous base. All shuffles draw from `rng` in
/// order; successive shuffles build on the previous edge order.
pub fn dinuc_shuffle<R: Rng + ?Sized>(
    sequence: &[u8],
    num_shuffles: usize,
    rng: &mut R,
) -> Vec<Vec<u8>> {
    let mut graphs = build_graphs(sequence);
    let template: Vec<u8> = sequence
        .iter()
        .map(|&b| class_of(b).map(|c| CLASS_BASES[c as usize]).unwrap_or(b))
        .collect();

    (0..num_shuffles)
        .map(|_| {
            let mut shuffled = template.clone();
            for graph in graphs.iter_mut() {
                graph.permute(rng);
                graph.walk(&mut shuffled);
            }
            shuffled
        })
        .collect()
}

/// One shuffle per input sequence, drawing from a single shared generator.
///
/// This is how the null distribution replaces observed sequences.
pub fn shuffle_each<S: AsRef<[u8]>, R: Rng + ?Sized>(sequences: &[S], rng: &mut R) -> Vec<Vec<u8>> {
    sequences
        .iter()
        .map(|seq| {
            dinuc_shuffle(seq.as_ref(), 1, rng)
                .pop()
                .unwrap_or_default()
        })
        .collect()
}
