//! Membership container integration tests: exactness on members, cFP
//! correction on candidate neighbors, cascading false-positive budget.

use ahash::AHashSet;

use graph_forge::count::KmerCount;
use graph_forge::membership::{
    build_membership, neighbor_candidates, BloomKind, DebloomKind, MembershipConfig,
};
use graph_forge::KmerModel;

const K: usize = 21;

/// A solid set drawn from a seeded random genome.
fn solid_set(nb_target: usize) -> (KmerModel<u64>, Vec<KmerCount<u64>>) {
    let model: KmerModel<u64> = KmerModel::new(K);
    let mut rng = fastrand::Rng::with_seed(0xb10f);
    let bases = [b'A', b'C', b'G', b'T'];
    let genome: Vec<u8> = (0..nb_target + K).map(|_| bases[rng.usize(0..4)]).collect();

    let mut seen = AHashSet::new();
    let solid = model
        .kmers_of(&genome)
        .filter(|&w| seen.insert(w))
        .map(|kmer| KmerCount { kmer, count: 5 })
        .collect();
    (model, solid)
}

#[test]
fn every_solid_kmer_is_contained() {
    let (model, solid) = solid_set(5_000);
    for debloom in [DebloomKind::Original, DebloomKind::Cascading] {
        for bloom in [BloomKind::Basic, BloomKind::Cache, BloomKind::Neighbor] {
            let config = MembershipConfig {
                bloom_kind: bloom,
                debloom_kind: debloom,
                ..Default::default()
            };
            let container = build_membership(&model, &solid, &config);
            for record in &solid {
                assert!(
                    container.contains(record.kmer),
                    "{debloom:?}/{bloom:?} lost a member"
                );
            }
        }
    }
}

#[test]
fn candidate_neighbors_are_exact_in_both_variants() {
    let (model, solid) = solid_set(3_000);
    let members: AHashSet<u64> = solid.iter().map(|r| r.kmer).collect();

    for debloom in [DebloomKind::Original, DebloomKind::Cascading] {
        let config = MembershipConfig {
            debloom_kind: debloom,
            bits_per_kmer: 6.0, // lossy enough to produce real cFPs
            ..Default::default()
        };
        let container = build_membership(&model, &solid, &config);
        for record in &solid {
            for candidate in neighbor_candidates(&model, record.kmer) {
                assert_eq!(
                    container.contains(candidate),
                    members.contains(&candidate),
                    "{debloom:?} wrong on a candidate neighbor"
                );
            }
        }
    }
}

#[test]
fn cascading_false_positive_rate_is_bounded_on_random_kmers() {
    let (model, solid) = solid_set(5_000);
    let members: AHashSet<u64> = solid.iter().map(|r| r.kmer).collect();
    let config = MembershipConfig {
        debloom_kind: DebloomKind::Cascading,
        bits_per_kmer: 12.0,
        ..Default::default()
    };
    let container = build_membership(&model, &solid, &config);

    // disjoint random sample of canonical k-mers
    let mut rng = fastrand::Rng::with_seed(0xfeed);
    let mut tested = 0u64;
    let mut false_positives = 0u64;
    while tested < 50_000 {
        let kmer = model.canonical(rng.u64(..) & ((1u64 << (2 * K)) - 1));
        if members.contains(&kmer) {
            continue;
        }
        tested += 1;
        if container.contains(kmer) {
            false_positives += 1;
        }
    }
    // 12 bits per kmer targets ~1%; leave headroom for the cascade levels
    let rate = false_positives as f64 / tested as f64;
    assert!(rate < 0.02, "false positive rate {rate}");
}

#[test]
fn simple_variant_bounds_false_positives_too() {
    let (model, solid) = solid_set(5_000);
    let members: AHashSet<u64> = solid.iter().map(|r| r.kmer).collect();
    let config = MembershipConfig {
        debloom_kind: DebloomKind::Original,
        bits_per_kmer: 12.0,
        ..Default::default()
    };
    let container = build_membership(&model, &solid, &config);

    let mut rng = fastrand::Rng::with_seed(0xcafe);
    let mut tested = 0u64;
    let mut false_positives = 0u64;
    while tested < 50_000 {
        let kmer = model.canonical(rng.u64(..) & ((1u64 << (2 * K)) - 1));
        if members.contains(&kmer) {
            continue;
        }
        tested += 1;
        if container.contains(kmer) {
            false_positives += 1;
        }
    }
    let rate = false_positives as f64 / tested as f64;
    assert!(rate < 0.02, "false positive rate {rate}");
}
