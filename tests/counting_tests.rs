//! End-to-end counting pipeline tests: exact counts on deterministic
//! inputs, abundance thresholding, N handling, thread-count determinism
//! and the histogram invariants.

use ahash::AHashMap;
use std::io::Write;
use std::path::PathBuf;

use graph_forge::count::{configure, run_counting, CountOptions, CountResult, KmerCount};
use graph_forge::dispatch::CancellationToken;
use graph_forge::util::ProgressBar;
use graph_forge::{Bank, KmerModel, Storage};

fn write_fasta(dir: &tempfile::TempDir, reads: &[&str]) -> PathBuf {
    let path = dir.path().join("reads.fa");
    let mut file = std::fs::File::create(&path).unwrap();
    for (i, read) in reads.iter().enumerate() {
        writeln!(file, ">r{i}\n{read}").unwrap();
    }
    path
}

struct PipelineRun {
    _dir: tempfile::TempDir,
    result: CountResult,
    solid: Vec<KmerCount<u64>>,
    histogram: Vec<graph_forge::count::HistogramEntry>,
    cutoff: i64,
}

fn run_pipeline(reads: &[&str], options: CountOptions) -> PipelineRun {
    let dir = tempfile::tempdir().unwrap();
    let bank = Bank::open(write_fasta(&dir, reads)).unwrap();
    let config = configure::<u64>(&options, &bank).unwrap();
    let storage = Storage::create(dir.path().join("store")).unwrap();
    let result = run_counting::<u64>(
        &bank,
        &storage,
        &config,
        &dir.path().join("tmp"),
        &CancellationToken::new(),
        &ProgressBar::silent(),
    )
    .unwrap();

    let dsk = storage.group("dsk").unwrap();
    let solid = dsk.collection::<KmerCount<u64>>("solid").read_all().unwrap();
    let histogram = dsk
        .collection::<graph_forge::count::HistogramEntry>("histogram")
        .read_all()
        .unwrap();
    let cutoff = dsk.collection::<i64>("cutoff").read_all().unwrap()[0];
    assert_eq!(
        dsk.property("kmer_size").unwrap().as_deref(),
        Some(options.kmer_size.to_string().as_str())
    );
    assert!(dsk.property("xml").unwrap().unwrap().starts_with("<properties>"));
    PipelineRun {
        _dir: dir,
        result,
        solid,
        histogram,
        cutoff,
    }
}

/// Reference counter: plain canonical-kmer multiset over the reads.
fn reference_counts(reads: &[&str], k: usize) -> AHashMap<u64, u32> {
    let model: KmerModel<u64> = KmerModel::new(k);
    let mut counts = AHashMap::new();
    for read in reads {
        for kmer in model.kmers_of(read.as_bytes()) {
            *counts.entry(kmer).or_insert(0u32) += 1;
        }
    }
    counts
}

#[test]
fn tiny_deterministic_counts() {
    let reads = ["ACGTACGT", "CGTACGTA"];
    let run = run_pipeline(
        &reads,
        CountOptions {
            kmer_size: 4,
            abundance_min: 1,
            ..Default::default()
        },
    );

    let model: KmerModel<u64> = KmerModel::new(4);
    let by_seq: AHashMap<String, u32> = run
        .solid
        .iter()
        .map(|r| (model.decode(r.kmer), r.count))
        .collect();
    let expected: AHashMap<String, u32> = [("ACGT", 3u32), ("CGTA", 5), ("GTAC", 2)]
        .into_iter()
        .map(|(s, c)| (s.to_string(), c))
        .collect();
    assert_eq!(by_seq, expected);

    assert_eq!(run.result.nb_distinct, 3);
    assert_eq!(run.result.nb_solid, 3);
    assert_eq!(run.result.total_kmers, 10);
    assert!(run.cutoff >= 1);
    assert!(!run.histogram.is_empty());
}

#[test]
fn abundance_threshold_drops_singletons() {
    let poly_a: String = "A".repeat(50);
    let mut reads: Vec<&str> = Vec::new();
    for _ in 0..100 {
        reads.push(&poly_a);
    }
    // every 5-mer of this read is canonically unique (checked below)
    reads.push("ACGTCCTGAAGGCTATTTAC");

    let run = run_pipeline(
        &reads,
        CountOptions {
            kmer_size: 5,
            abundance_min: 2,
            ..Default::default()
        },
    );

    let reference = reference_counts(&reads, 5);
    let singles = reference.values().filter(|&&c| c == 1).count();
    assert_eq!(singles, 16, "odd read must contribute unique 5-mers only");

    let model: KmerModel<u64> = KmerModel::new(5);
    assert_eq!(run.solid.len(), 1);
    assert_eq!(model.decode(run.solid[0].kmer), "AAAAA");
    assert_eq!(run.solid[0].count, 100 * 46);
}

#[test]
fn n_bases_split_the_window() {
    let run = run_pipeline(
        &["ACGTNACGT"],
        CountOptions {
            kmer_size: 3,
            abundance_min: 1,
            ..Default::default()
        },
    );
    let model: KmerModel<u64> = KmerModel::new(3);
    assert_eq!(run.solid.len(), 1);
    assert_eq!(model.decode(run.solid[0].kmer), "ACG");
    assert_eq!(run.solid[0].count, 4);
}

#[test]
fn pipeline_matches_reference_counter() {
    let reads = [
        "GATCCTGAACGTTAGCAGGATCCA",
        "TTGACCAGTAGACCATTGCAATCG",
        "GATCCTGAACGTTAGCAGGATCCA",
        "CCATGGTTACAGATTTACGGCATG",
    ];
    let run = run_pipeline(
        &reads,
        CountOptions {
            kmer_size: 7,
            abundance_min: 1,
            ..Default::default()
        },
    );
    let reference = reference_counts(&reads, 7);
    assert_eq!(run.solid.len(), reference.len());
    for record in &run.solid {
        assert_eq!(reference.get(&record.kmer), Some(&record.count));
    }
}

#[test]
fn solid_store_has_no_duplicates() {
    let reads = ["GATCCTGAACGTTAGCAGGATCCA", "TTGACCAGTAGACCATTGCAATCG"];
    let run = run_pipeline(
        &reads,
        CountOptions {
            kmer_size: 9,
            abundance_min: 1,
            ..Default::default()
        },
    );
    let mut kmers: Vec<u64> = run.solid.iter().map(|r| r.kmer).collect();
    let before = kmers.len();
    kmers.sort_unstable();
    kmers.dedup();
    assert_eq!(kmers.len(), before);
}

#[test]
fn histogram_sums_match_occurrences() {
    let reads = [
        "GATCCTGAACGTTAGCAGGATCCA",
        "GATCCTGAACGTTAGCAGGATCCA",
        "TTGACCAGTAGACCATTGCAATCG",
    ];
    let run = run_pipeline(
        &reads,
        CountOptions {
            kmer_size: 8,
            abundance_min: 1,
            ..Default::default()
        },
    );
    let total: u64 = run
        .histogram
        .iter()
        .map(|e| e.count as u64 * e.multiplicity)
        .sum();
    assert_eq!(total, run.result.total_kmers);

    let distinct: u64 = run.histogram.iter().map(|e| e.multiplicity).sum();
    assert_eq!(distinct, run.result.nb_distinct);
}

/// A fixed pseudo-random read set, large enough to spread over several
/// partitions once the memory budget is squeezed.
fn synthetic_reads() -> Vec<String> {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let bases = [b'A', b'C', b'G', b'T'];
    let genome: Vec<u8> = (0..2_000).map(|_| bases[rng.usize(0..4)]).collect();
    let mut reads = Vec::new();
    for _ in 0..300 {
        let start = rng.usize(0..genome.len() - 60);
        reads.push(String::from_utf8(genome[start..start + 60].to_vec()).unwrap());
    }
    reads
}

#[test]
fn thread_count_does_not_change_results() {
    let reads = synthetic_reads();
    let refs: Vec<&str> = reads.iter().map(String::as_str).collect();

    let run = |cores: usize| {
        run_pipeline(
            &refs,
            CountOptions {
                kmer_size: 21,
                abundance_min: 2,
                nb_cores: cores,
                max_memory_mb: 1, // force several partitions
                ..Default::default()
            },
        )
    };
    let single = run(1);
    let multi = run(4);

    let mut solid_single = single.solid.clone();
    let mut solid_multi = multi.solid.clone();
    solid_single.sort_unstable_by_key(|r| r.kmer);
    solid_multi.sort_unstable_by_key(|r| r.kmer);
    assert_eq!(solid_single, solid_multi);
    assert_eq!(single.histogram, multi.histogram);
    assert_eq!(single.cutoff, multi.cutoff);
    assert_eq!(single.result.nb_distinct, multi.result.nb_distinct);
}

#[test]
fn hash_mode_matches_auto_mode() {
    let reads = synthetic_reads();
    let refs: Vec<&str> = reads.iter().map(String::as_str).collect();

    let auto = run_pipeline(
        &refs,
        CountOptions {
            kmer_size: 17,
            abundance_min: 2,
            ..Default::default()
        },
    );
    let hashed = run_pipeline(
        &refs,
        CountOptions {
            kmer_size: 17,
            abundance_min: 2,
            partition_mode: graph_forge::count::PartitionMode::Hash,
            ..Default::default()
        },
    );

    let mut a = auto.solid.clone();
    let mut b = hashed.solid.clone();
    a.sort_unstable_by_key(|r| r.kmer);
    b.sort_unstable_by_key(|r| r.kmer);
    assert_eq!(a, b);
}

#[test]
fn sorted_spill_matches_default_spill() {
    let reads = synthetic_reads();
    let refs: Vec<&str> = reads.iter().map(String::as_str).collect();

    let plain = run_pipeline(
        &refs,
        CountOptions {
            kmer_size: 19,
            abundance_min: 2,
            max_memory_mb: 1,
            ..Default::default()
        },
    );
    let sorted = run_pipeline(
        &refs,
        CountOptions {
            kmer_size: 19,
            abundance_min: 2,
            max_memory_mb: 1,
            sorted_spill: true,
            ..Default::default()
        },
    );

    let mut a = plain.solid.clone();
    let mut b = sorted.solid.clone();
    a.sort_unstable_by_key(|r| r.kmer);
    b.sort_unstable_by_key(|r| r.kmer);
    assert_eq!(a, b);
    assert_eq!(plain.histogram, sorted.histogram);
}

#[test]
fn wide_kmers_use_the_128_bit_model() {
    let dir = tempfile::tempdir().unwrap();
    let genome = "GATCCTGAACGTTAGCAGGATCCATTGACCAGTAGACCATTGCAATCGAA";
    let bank = Bank::open(write_fasta(&dir, &[genome, genome])).unwrap();
    let options = CountOptions {
        kmer_size: 41,
        abundance_min: 2,
        ..Default::default()
    };
    let config = configure::<u128>(&options, &bank).unwrap();
    let storage = Storage::create(dir.path().join("store")).unwrap();
    let result = run_counting::<u128>(
        &bank,
        &storage,
        &config,
        &dir.path().join("tmp"),
        &CancellationToken::new(),
        &ProgressBar::silent(),
    )
    .unwrap();
    assert_eq!(result.nb_distinct, (genome.len() - 41 + 1) as u64);
    assert_eq!(result.nb_solid, result.nb_distinct);
}
