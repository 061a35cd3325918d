//! Unitig construction: compaction of the solid k-mer set into maximal
//! non-branching paths.
//!
//! A path is grown from a seed k-mer by unique extension: a step is taken
//! only when the current k-mer has exactly one solid successor and that
//! successor has exactly one solid predecessor. Every consumed k-mer is
//! marked so each unitig is emitted once; circular paths terminate when
//! the walk meets a consumed k-mer.

use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use tracing::info;

use crate::core::{KmerModel, KmerWord};
use crate::count::KmerCount;
use crate::graph::UnitigGraph;

/// Build the unitig graph from solid counts.
pub fn build_unitigs<W: KmerWord>(
    model: &KmerModel<W>,
    solid: &[KmerCount<W>],
) -> Result<UnitigGraph> {
    let counts: AHashMap<W, u32> = solid.iter().map(|r| (r.kmer, r.count)).collect();
    let mut visited: AHashSet<W> = AHashSet::with_capacity(counts.len());
    let mut unitigs: Vec<(String, f32)> = Vec::new();

    for record in solid {
        if visited.contains(&record.kmer) {
            continue;
        }
        let unitig = trace_unitig(model, &counts, &mut visited, record.kmer);
        unitigs.push(unitig);
    }

    info!(
        "compaction: {} solid kmers -> {} unitigs",
        solid.len(),
        unitigs.len()
    );
    UnitigGraph::from_unitigs(model.k(), unitigs)
}

/// Oriented successors of `kmer` present in the solid set.
fn right_candidates<W: KmerWord>(
    model: &KmerModel<W>,
    counts: &AHashMap<W, u32>,
    kmer: W,
) -> Vec<W> {
    let k = model.k();
    (0..4u8)
        .map(|code| kmer.push_right(code, k))
        .filter(|&next| counts.contains_key(&model.canonical(next)))
        .collect()
}

/// Oriented predecessors of `kmer` present in the solid set.
fn left_candidates<W: KmerWord>(
    model: &KmerModel<W>,
    counts: &AHashMap<W, u32>,
    kmer: W,
) -> Vec<W> {
    let k = model.k();
    (0..4u8)
        .map(|code| kmer.push_left(code, k))
        .filter(|&prev| counts.contains_key(&model.canonical(prev)))
        .collect()
}

fn trace_unitig<W: KmerWord>(
    model: &KmerModel<W>,
    counts: &AHashMap<W, u32>,
    visited: &mut AHashSet<W>,
    seed: W,
) -> (String, f32) {
    let k = model.k();
    visited.insert(seed);
    let mut sequence = model.decode(seed);
    let mut abundance_sum = counts[&seed] as u64;
    let mut nb_kmers = 1u64;

    // grow right
    let mut cursor = seed;
    loop {
        let nexts = right_candidates(model, counts, cursor);
        if nexts.len() != 1 {
            break;
        }
        let next = nexts[0];
        let canon = model.canonical(next);
        if visited.contains(&canon) {
            break; // circular path or palindrome
        }
        if left_candidates(model, counts, next).len() != 1 {
            break; // in-branching ahead
        }
        visited.insert(canon);
        sequence.push(crate::core::code_to_base(next.code_at(k - 1, k)) as char);
        abundance_sum += counts[&canon] as u64;
        nb_kmers += 1;
        cursor = next;
    }

    // grow left
    let mut cursor = seed;
    loop {
        let prevs = left_candidates(model, counts, cursor);
        if prevs.len() != 1 {
            break;
        }
        let prev = prevs[0];
        let canon = model.canonical(prev);
        if visited.contains(&canon) {
            break;
        }
        if right_candidates(model, counts, prev).len() != 1 {
            break;
        }
        visited.insert(canon);
        sequence.insert(0, crate::core::code_to_base(prev.code_at(0, k)) as char);
        abundance_sum += counts[&canon] as u64;
        nb_kmers += 1;
        cursor = prev;
    }

    (sequence, abundance_sum as f32 / nb_kmers as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Direction, Extremity, Node, Strand};

    fn solid_from_sequence(model: &KmerModel<u64>, seq: &[u8], count: u32) -> Vec<KmerCount<u64>> {
        let mut seen = AHashSet::new();
        model
            .kmers_of(seq)
            .filter(|&w| seen.insert(w))
            .map(|kmer| KmerCount { kmer, count })
            .collect()
    }

    #[test]
    fn single_read_compacts_to_one_unitig() {
        let model: KmerModel<u64> = KmerModel::new(5);
        let seq = b"ACGGTCATTCAGGC";
        let solid = solid_from_sequence(&model, seq, 3);
        let graph = build_unitigs(&model, &solid).unwrap();
        assert_eq!(graph.nb_unitigs(), 1);
        let unitig = graph.unitig_str(0);
        let expected = std::str::from_utf8(seq).unwrap();
        assert!(
            unitig == expected || unitig == crate::graph::rc_str(expected),
            "unexpected unitig {unitig}"
        );
        assert_eq!(unitig.len(), seq.len());
        assert!((graph.mean_abundance(0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn branching_splits_unitigs() {
        let model: KmerModel<u64> = KmerModel::new(5);
        // two reads sharing a prefix create a fork
        let mut solid = solid_from_sequence(&model, b"AACCGGTTACA", 4);
        for extra in solid_from_sequence(&model, b"AACCGGTTGTG", 4) {
            if !solid.iter().any(|r| r.kmer == extra.kmer) {
                solid.push(extra);
            }
        }
        let graph = build_unitigs(&model, &solid).unwrap();
        assert!(graph.nb_unitigs() >= 3, "fork should split compaction");

        // the interior of every unitig is non-branching by construction
        for u in graph.live_unitigs() {
            let begin = Node::new(u, Extremity::Begin, Strand::Forward);
            let end = Node::new(u, Extremity::End, Strand::Forward);
            assert!(graph.degree(begin, Direction::Incoming) <= 4);
            assert!(graph.degree(end, Direction::Outcoming) <= 4);
        }
    }

    #[test]
    fn every_solid_kmer_lands_in_exactly_one_unitig() {
        let model: KmerModel<u64> = KmerModel::new(5);
        let mut solid = solid_from_sequence(&model, b"ACGGTCATTCAGGCAAT", 2);
        for extra in solid_from_sequence(&model, b"TTGACCAGTAGACCA", 2) {
            if !solid.iter().any(|r| r.kmer == extra.kmer) {
                solid.push(extra);
            }
        }
        let graph = build_unitigs(&model, &solid).unwrap();

        let mut recovered = AHashSet::new();
        for u in graph.live_unitigs() {
            let seq = graph.unitig_str(u);
            for kmer in model.kmers_of(seq.as_bytes()) {
                assert!(recovered.insert(kmer), "kmer appears in two unitigs");
            }
        }
        let expected: AHashSet<u64> = solid.iter().map(|r| r.kmer).collect();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn circular_genome_compacts_without_duplication() {
        let model: KmerModel<u64> = KmerModel::new(4);
        // circularize by appending the first k-1 bases
        let genome = b"ACGGTCATGCA";
        let mut circular = genome.to_vec();
        circular.extend_from_slice(&genome[..3]);
        let solid = solid_from_sequence(&model, &circular, 2);
        let graph = build_unitigs(&model, &solid).unwrap();

        let total_kmers: usize = graph
            .live_unitigs()
            .map(|u| graph.unitig_len(u) - 4 + 1)
            .sum();
        assert_eq!(total_kmers, solid.len());
    }
}
