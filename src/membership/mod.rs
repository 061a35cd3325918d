//! Membership Containers
//! =====================
//!
//! Approximate-but-corrected membership over the solid k-mer set: a Bloom
//! filter plus the critical-false-positive (cFP) set of k-mers the Bloom
//! wrongly accepts among the candidate neighbors of solid k-mers. The
//! simple container subtracts an exact cFP set; the cascading container
//! encodes the cFP set as three further Bloom filters with an exact tail.

pub mod bloom;

use ahash::AHashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::core::{KmerModel, KmerWord};
use crate::count::KmerCount;

pub use bloom::{BloomFilter, BloomKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebloomKind {
    Original,
    #[default]
    Cascading,
}

impl FromStr for DebloomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(DebloomKind::Original),
            "cascading" | "default" => Ok(DebloomKind::Cascading),
            other => Err(format!("bad debloom kind '{other}'")),
        }
    }
}

/// Deterministic, side-effect-free membership test. No false negatives.
pub trait Membership<W: KmerWord>: Send + Sync {
    fn contains(&self, kmer: W) -> bool;
}

/// Bloom + exact cFP set: `contains = bloom(k) && !cfp(k)`.
pub struct NodeContainer<W: KmerWord> {
    bloom: Arc<BloomFilter>,
    cfp: Arc<Vec<W>>,
}

impl<W: KmerWord> NodeContainer<W> {
    pub fn new(bloom: Arc<BloomFilter>, cfp: Arc<Vec<W>>) -> Self {
        debug_assert!(cfp.windows(2).all(|w| w[0] < w[1]), "cFP set must be sorted");
        Self { bloom, cfp }
    }

    pub fn nb_critical(&self) -> usize {
        self.cfp.len()
    }
}

impl<W: KmerWord> Membership<W> for NodeContainer<W> {
    fn contains(&self, kmer: W) -> bool {
        self.bloom.contains(kmer) && self.cfp.binary_search(&kmer).is_err()
    }
}

/// Cascading variant: `B, B2, B3, B4` plus the exact tail `F`.
///
/// `cfp(k) = B2(k) && (!B3(k) || (B4(k) && !F(k)))`.
pub struct CascadingContainer<W: KmerWord> {
    bloom: Arc<BloomFilter>,
    bloom2: Arc<BloomFilter>,
    bloom3: Arc<BloomFilter>,
    bloom4: Arc<BloomFilter>,
    tail: Arc<Vec<W>>,
}

impl<W: KmerWord> CascadingContainer<W> {
    fn contains_cfp(&self, kmer: W) -> bool {
        if !self.bloom2.contains(kmer) {
            return false;
        }
        if !self.bloom3.contains(kmer) {
            return true;
        }
        self.bloom4.contains(kmer) && self.tail.binary_search(&kmer).is_err()
    }
}

impl<W: KmerWord> Membership<W> for CascadingContainer<W> {
    fn contains(&self, kmer: W) -> bool {
        self.bloom.contains(kmer) && !self.contains_cfp(kmer)
    }
}

/// Sizing and layout knobs for membership construction.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    pub bloom_kind: BloomKind,
    pub debloom_kind: DebloomKind,
    pub bits_per_kmer: f64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            bloom_kind: BloomKind::default(),
            debloom_kind: DebloomKind::default(),
            bits_per_kmer: 12.0,
        }
    }
}

/// Build a membership container from the solid counts.
///
/// The cFP candidates are the 8 canonical neighbors of each solid k-mer;
/// those the Bloom accepts without belonging to the solid set are the
/// critical false positives.
pub fn build_membership<W: KmerWord>(
    model: &KmerModel<W>,
    solid: &[KmerCount<W>],
    config: &MembershipConfig,
) -> Box<dyn Membership<W>> {
    let k = model.k();
    let mut bloom = BloomFilter::new(solid.len() as u64, config.bits_per_kmer, config.bloom_kind, k);
    let mut solid_set: AHashSet<W> = AHashSet::with_capacity(solid.len());
    for record in solid {
        bloom.insert(record.kmer);
        solid_set.insert(record.kmer);
    }

    // candidate neighbors accepted by the Bloom but absent from the solid set
    let mut critical: AHashSet<W> = AHashSet::new();
    for record in solid {
        for candidate in neighbor_candidates(model, record.kmer) {
            if !solid_set.contains(&candidate) && bloom.contains(candidate) {
                critical.insert(candidate);
            }
        }
    }
    info!(
        "debloom: {} solid kmers, {} critical false positives",
        solid.len(),
        critical.len()
    );

    let bloom = Arc::new(bloom);
    match config.debloom_kind {
        DebloomKind::Original => {
            let mut cfp: Vec<W> = critical.into_iter().collect();
            cfp.sort_unstable();
            Box::new(NodeContainer::new(bloom, Arc::new(cfp)))
        }
        DebloomKind::Cascading => {
            let critical: Vec<W> = critical.into_iter().collect();
            let bits = config.bits_per_kmer;

            let mut bloom2 = BloomFilter::new(critical.len() as u64, bits, config.bloom_kind, k);
            for &kmer in &critical {
                bloom2.insert(kmer);
            }

            let survivors2: Vec<W> = solid_set
                .iter()
                .copied()
                .filter(|&kmer| bloom2.contains(kmer))
                .collect();
            let mut bloom3 = BloomFilter::new(survivors2.len() as u64, bits, config.bloom_kind, k);
            for &kmer in &survivors2 {
                bloom3.insert(kmer);
            }

            let survivors3: Vec<W> = critical
                .iter()
                .copied()
                .filter(|&kmer| bloom3.contains(kmer))
                .collect();
            let mut bloom4 = BloomFilter::new(survivors3.len() as u64, bits, config.bloom_kind, k);
            for &kmer in &survivors3 {
                bloom4.insert(kmer);
            }

            let mut tail: Vec<W> = survivors2
                .into_iter()
                .filter(|&kmer| bloom4.contains(kmer))
                .collect();
            tail.sort_unstable();
            info!("cascading debloom: exact tail holds {} kmers", tail.len());

            Box::new(CascadingContainer {
                bloom,
                bloom2: Arc::new(bloom2),
                bloom3: Arc::new(bloom3),
                bloom4: Arc::new(bloom4),
                tail: Arc::new(tail),
            })
        }
    }
}

/// The 8 canonical neighbors of a canonical k-mer: four right extensions
/// and four left extensions.
pub fn neighbor_candidates<W: KmerWord>(model: &KmerModel<W>, kmer: W) -> Vec<W> {
    let k = model.k();
    let mut out = Vec::with_capacity(8);
    for code in 0..4u8 {
        out.push(model.canonical(kmer.push_right(code, k)));
        out.push(model.canonical(kmer.push_left(code, k)));
    }
    out
}
