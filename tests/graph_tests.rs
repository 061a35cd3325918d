//! Unitig graph integration tests: construction from counted k-mers,
//! neighborhood round-trips, edge symmetry, simple-path reconstruction
//! and simplification behavior.

use ahash::AHashSet;
use std::io::Write;

use graph_forge::count::{configure, run_counting, CountOptions, KmerCount};
use graph_forge::dispatch::CancellationToken;
use graph_forge::graph::simplify::{simplify, SimplifyConfig};
use graph_forge::graph::{
    build::build_unitigs, state, Direction, Extremity, Node, Strand, UnitigGraph,
};
use graph_forge::util::ProgressBar;
use graph_forge::{Bank, KmerModel, Storage};

/// Count a read set and compact it into a unitig graph.
fn graph_from_reads(reads: &[&str], k: usize, abundance: u32) -> UnitigGraph {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reads.fa");
    let mut file = std::fs::File::create(&path).unwrap();
    for (i, read) in reads.iter().enumerate() {
        writeln!(file, ">r{i}\n{read}").unwrap();
    }
    let bank = Bank::open(&path).unwrap();
    let options = CountOptions {
        kmer_size: k,
        abundance_min: abundance,
        ..Default::default()
    };
    let config = configure::<u64>(&options, &bank).unwrap();
    let storage = Storage::create(dir.path().join("store")).unwrap();
    run_counting::<u64>(
        &bank,
        &storage,
        &config,
        &dir.path().join("tmp"),
        &CancellationToken::new(),
        &ProgressBar::silent(),
    )
    .unwrap();
    let solid: Vec<KmerCount<u64>> = storage
        .group("dsk")
        .unwrap()
        .collection("solid")
        .read_all()
        .unwrap();
    let model: KmerModel<u64> = KmerModel::new(k);
    build_unitigs(&model, &solid).unwrap()
}

#[test]
fn error_free_genome_compacts_to_one_unitig() {
    let genome = "GATCCTGAACGTTAGCAGGATCCATTGACCAGTAGACCAT";
    // overlapping windows cover every k-mer at least twice
    let reads: Vec<String> = (0..=genome.len() - 25)
        .step_by(5)
        .map(|i| genome[i..i + 25].to_string())
        .chain(std::iter::once(genome.to_string()))
        .collect();
    let refs: Vec<&str> = reads.iter().map(String::as_str).collect();

    let graph = graph_from_reads(&refs, 15, 1);
    assert_eq!(graph.nb_unitigs(), 1);
    let unitig = graph.unitig_str(0);
    assert!(
        unitig == genome || unitig == graph_forge::graph::rc_str(genome),
        "got {unitig}"
    );
}

#[test]
fn synthetic_trio_neighbor_roundtrip() {
    // ACGTAC -(TAC)-> TACGGA -(GGA)-> GGATTT under k=4
    let graph = UnitigGraph::from_unitigs(
        4,
        vec![
            ("ACGTAC".to_string(), 12.0),
            ("TACGGA".to_string(), 11.0),
            ("GGATTT".to_string(), 10.0),
        ],
    )
    .unwrap();

    let end0 = Node::new(0, Extremity::End, Strand::Forward);
    let successors: Vec<Node> = graph.neighbors(end0, Direction::Outcoming).collect();
    assert_eq!(successors, vec![Node::new(1, Extremity::Begin, Strand::Forward)]);

    // the (k-1) overlap is end-to-begin in the yielded orientation
    let from_seq = graph.unitig_sequence(end0).sequence;
    let to_seq = graph.unitig_sequence(successors[0]).sequence;
    assert_eq!(&from_seq[from_seq.len() - 3..], &to_seq[..3]);
}

#[test]
fn every_edge_has_its_symmetric_counterpart() {
    let reads = [
        "GATCCTGAACGTTAGCAGGATCCA",
        "TTGACCAGTAGACCATTGCAATCG",
        "GATCCTGATTGCAATCGGATCCAT",
    ];
    let graph = graph_from_reads(&reads, 7, 1);

    for u in graph.live_unitigs() {
        for strand in [Strand::Forward, Strand::Reverse] {
            let node = Node::new(u, Extremity::End, strand);
            for dir in [Direction::Outcoming, Direction::Incoming] {
                for neighbor in graph.neighbors(node, dir) {
                    let exit = graph.exit_node(node, dir);
                    let back: Vec<Node> =
                        graph.neighbors(neighbor, dir.opposite()).collect();
                    assert!(
                        back.contains(&exit),
                        "edge {u:?}->{neighbor:?} has no symmetric edge"
                    );
                }
            }
        }
    }
}

#[test]
fn simple_path_recovers_fragmented_genome() {
    let genome = "GATCCTGAACGTTAGCAGGATCCATTGACCAGTAGACCAT";
    let reads: Vec<String> = (0..=genome.len() - 20)
        .step_by(4)
        .map(|i| genome[i..i + 20].to_string())
        .chain(std::iter::once(genome.to_string()))
        .collect();
    let refs: Vec<&str> = reads.iter().map(String::as_str).collect();
    let mut graph = graph_from_reads(&refs, 13, 1);

    // wherever we start, the both-directions walk returns the genome
    let start = Node::new(0, Extremity::Begin, Strand::Forward);
    let path = graph.simple_path_both_directions(start);
    assert!(
        path.sequence == genome || path.sequence == graph_forge::graph::rc_str(genome),
        "got {}",
        path.sequence
    );
    assert!(path.isolated_left);
    assert!(path.isolated_right);
    for u in graph.live_unitigs().collect::<Vec<_>>() {
        assert!(graph.is_marked(u));
    }
}

#[test]
fn interior_kmers_are_non_branching() {
    let reads = [
        "GATCCTGAACGTTAGCAGGATCCA",
        "TTGACCAGTAGACCATTGCAATCG",
        "GATCCTGATTGCAATCGGATCCAT",
    ];
    let k = 7;
    let graph = graph_from_reads(&reads, k, 1);
    let model: KmerModel<u64> = KmerModel::new(k);

    let mut solid: AHashSet<u64> = AHashSet::new();
    for u in graph.live_unitigs() {
        for kmer in model.kmers_of(graph.unitig_str(u).as_bytes()) {
            solid.insert(kmer);
        }
    }

    for u in graph.live_unitigs() {
        let seq = graph.unitig_str(u);
        let kmers: Vec<u64> = (0..=seq.len() - k)
            .map(|i| model.encode(&seq.as_bytes()[i..i + k]).unwrap())
            .collect();
        for window in kmers.windows(2) {
            let (cur, next) = (window[0], window[1]);
            // interior transition: unique successor of cur, unique
            // predecessor of next, among solid k-mers
            let successors = (0..4u8)
                .filter(|&c| {
                    solid.contains(&model.canonical(graph_forge::KmerWord::push_right(cur, c, k)))
                })
                .count();
            let predecessors = (0..4u8)
                .filter(|&c| {
                    solid.contains(&model.canonical(graph_forge::KmerWord::push_left(next, c, k)))
                })
                .count();
            assert_eq!(successors, 1, "out-branching inside unitig {u}");
            assert_eq!(predecessors, 1, "in-branching inside unitig {u}");
        }
    }
}

#[test]
fn simplification_cleans_a_sequencing_error_tip() {
    // deep-coverage genome plus one read with a wrong tail
    let genome = "GATCCTGAACGTTAGCAGGATCCATTGACC";
    let mut reads: Vec<String> = Vec::new();
    for _ in 0..8 {
        reads.push(genome.to_string());
    }
    // error: last base flipped, creating a short low-coverage fork
    reads.push("GATCCTGAACGTTAGCAGGATCCATTGACA".to_string());
    let refs: Vec<&str> = reads.iter().map(String::as_str).collect();

    let mut graph = graph_from_reads(&refs, 21, 1);
    assert!(graph.nb_unitigs() > 1, "error should fragment the graph");

    let stats = simplify(&mut graph, &SimplifyConfig::new());
    assert!(stats.tips_removed >= 1);

    // the surviving unitigs form one clean simple path spelling the genome
    let start = graph.live_unitigs().next().unwrap();
    let path =
        graph.simple_path_both_directions(Node::new(start, Extremity::Begin, Strand::Forward));
    assert!(
        path.sequence == genome || path.sequence == graph_forge::graph::rc_str(genome),
        "got {}",
        path.sequence
    );
}

#[test]
fn simplification_is_idempotent_on_real_input() {
    let genome = "GATCCTGAACGTTAGCAGGATCCATTGACC";
    let mut reads: Vec<String> = vec![genome.to_string(); 8];
    reads.push("GATCCTGAACGTTAGCAGGATCCATTGACA".to_string());
    let refs: Vec<&str> = reads.iter().map(String::as_str).collect();
    let mut graph = graph_from_reads(&refs, 21, 1);

    let first = simplify(&mut graph, &SimplifyConfig::new());
    let second = simplify(&mut graph, &SimplifyConfig::new());
    assert!(first.tips_removed + first.bulges_removed + first.ecs_removed > 0);
    assert_eq!(
        second.tips_removed + second.bulges_removed + second.ecs_removed,
        0
    );
}

#[test]
fn graph_state_and_storage_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::create(dir.path().join("store")).unwrap();

    let mut graph = UnitigGraph::from_unitigs(
        4,
        vec![("ACGTAC".to_string(), 5.0), ("TACGGA".to_string(), 6.0)],
    )
    .unwrap();
    graph.set_state(state::INIT_DONE | state::SORTING_COUNT_DONE | state::BCALM2_DONE);
    graph.save(&storage).unwrap();

    let loaded = UnitigGraph::load(&storage).unwrap();
    assert!(loaded.check_state(state::SORTING_COUNT_DONE));
    assert!(!loaded.check_state(state::MPHF_DONE));
    assert_eq!(loaded.nb_unitigs(), 2);
    assert_eq!(loaded.mean_abundance(1), 6.0);
    assert_eq!(
        loaded
            .neighbors(
                Node::new(0, Extremity::End, Strand::Forward),
                Direction::Outcoming
            )
            .count(),
        1
    );
}
