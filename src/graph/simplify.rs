//! Graph simplification: tip, bulge and erroneous-connection removal.
//!
//! Three passes repeated for a bounded number of rounds or until nothing
//! changes. Deletion is soft; every query honors the deleted flag, so each
//! round sees the graph left by the previous one. Candidates are collected
//! per pass and applied together, which keeps a round deterministic under
//! any traversal order.

use tracing::info;

use crate::graph::{Direction, Extremity, Node, PathAdvance, Strand, UnitigGraph};

#[derive(Debug, Clone)]
pub struct TipConfig {
    pub enabled: bool,
    /// Tips shorter than `max_len_factor * k` bases are candidates.
    pub max_len_factor: f64,
    /// Delete when the neighborhood mean is at least this multiple of the
    /// tip's own mean abundance.
    pub coverage_ratio: f64,
}

impl Default for TipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_len_factor: 2.0,
            coverage_ratio: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BulgeConfig {
    pub enabled: bool,
    /// Branches longer than `max_len_factor * k` bases are never popped.
    pub max_len_factor: f64,
    /// Tolerated length difference between the two branches, in bases.
    pub max_len_delta: usize,
    /// Minimum fraction of identical positions between the branches.
    pub min_identity: f64,
}

impl Default for BulgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_len_factor: 3.0,
            max_len_delta: 3,
            min_identity: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EcConfig {
    pub enabled: bool,
    /// Connections longer than `max_len_factor * k` bases are kept.
    pub max_len_factor: f64,
    /// Delete when both neighborhoods are at least this multiple of the
    /// connection's mean abundance.
    pub coverage_ratio: f64,
}

impl Default for EcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_len_factor: 9.0,
            coverage_ratio: 4.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimplifyConfig {
    pub max_rounds: usize,
    pub tip: TipConfig,
    pub bulge: BulgeConfig,
    pub ec: EcConfig,
}

impl SimplifyConfig {
    pub fn new() -> Self {
        Self {
            max_rounds: 5,
            tip: TipConfig::default(),
            bulge: BulgeConfig::default(),
            ec: EcConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimplifyStats {
    pub rounds: usize,
    pub tips_removed: u64,
    pub bulges_removed: u64,
    pub ecs_removed: u64,
}

impl SimplifyStats {
    fn total(&self) -> u64 {
        self.tips_removed + self.bulges_removed + self.ecs_removed
    }
}

/// Run the three simplification phases until a fixpoint or the round
/// budget. Not safe against concurrent queries.
pub fn simplify(graph: &mut UnitigGraph, config: &SimplifyConfig) -> SimplifyStats {
    let max_rounds = config.max_rounds.max(1);
    let mut stats = SimplifyStats::default();
    for round in 0..max_rounds {
        let before = stats.total();
        if config.tip.enabled {
            stats.tips_removed += remove_tips(graph, &config.tip);
        }
        if config.bulge.enabled {
            stats.bulges_removed += remove_bulges(graph, &config.bulge);
        }
        if config.ec.enabled {
            stats.ecs_removed += remove_erroneous_connections(graph, &config.ec);
        }
        stats.rounds = round + 1;
        if stats.total() == before {
            break;
        }
    }
    info!(
        "simplification: {} tips, {} bulges, {} ECs removed in {} round(s)",
        stats.tips_removed, stats.bulges_removed, stats.ecs_removed, stats.rounds
    );
    stats
}

fn begin(u: u64) -> Node {
    Node::new(u, Extremity::Begin, Strand::Forward)
}

fn end(u: u64) -> Node {
    Node::new(u, Extremity::End, Strand::Forward)
}

/// Mean abundance of the live neighbors reached through `node` in `dir`.
fn neighborhood_mean(graph: &UnitigGraph, node: Node, dir: Direction) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0u32;
    for neighbor in graph.neighbors(node, dir) {
        sum += graph.mean_abundance(neighbor.unitig) as f64;
        n += 1;
    }
    (n > 0).then(|| sum / n as f64)
}

fn remove_tips(graph: &mut UnitigGraph, config: &TipConfig) -> u64 {
    let k = graph.kmer_size();
    let max_len = (config.max_len_factor * k as f64) as usize;
    let mut doomed = Vec::new();

    for u in graph.live_unitigs() {
        if graph.unitig_len(u) >= max_len {
            continue;
        }
        let in_deg = graph.degree(begin(u), Direction::Incoming);
        let out_deg = graph.degree(end(u), Direction::Outcoming);
        // one dangling extremity, one anchored extremity
        let anchored = match (in_deg, out_deg) {
            (0, d) if d > 0 => (end(u), Direction::Outcoming),
            (d, 0) if d > 0 => (begin(u), Direction::Incoming),
            _ => continue,
        };
        let Some(neighbor_mean) = neighborhood_mean(graph, anchored.0, anchored.1) else {
            continue;
        };
        if neighbor_mean >= config.coverage_ratio * graph.mean_abundance(u) as f64 {
            doomed.push(u);
        }
    }

    for &u in &doomed {
        graph.delete(u);
    }
    doomed.len() as u64
}

/// One branch of a potential bulge: the simple path entered at `entry`,
/// walked until it meets a reconvergence node.
struct BranchWalk {
    unitigs: Vec<u64>,
    sequence: String,
    merge: Node,
    coverage: f64,
}

fn walk_branch(graph: &UnitigGraph, entry: Node, max_len: usize) -> Option<BranchWalk> {
    let mut unitigs = vec![entry.unitig];
    let mut sequence = graph.unitig_sequence(entry).sequence;
    let mut weighted = graph.mean_abundance(entry.unitig) as f64
        * (graph.unitig_len(entry.unitig) - graph.kmer_size() + 1) as f64;
    let mut total_kmers = (graph.unitig_len(entry.unitig) - graph.kmer_size() + 1) as f64;
    let mut cursor = entry;
    let overlap = graph.kmer_size() - 1;

    loop {
        if sequence.len() > max_len {
            return None;
        }
        match graph.simple_path_avance(cursor, Direction::Outcoming) {
            PathAdvance::InBranchingAhead => {
                // the reconvergence point is the unique node ahead
                let merge = graph.neighbors(cursor, Direction::Outcoming).next()?;
                return Some(BranchWalk {
                    unitigs,
                    sequence,
                    merge,
                    coverage: weighted / total_kmers,
                });
            }
            PathAdvance::Extended(edge) => {
                let next = edge.to;
                if unitigs.contains(&next.unitig) {
                    return None;
                }
                unitigs.push(next.unitig);
                let part = graph.unitig_sequence(next).sequence;
                sequence.push_str(&part[overlap..]);
                let kmers = (graph.unitig_len(next.unitig) - graph.kmer_size() + 1) as f64;
                weighted += graph.mean_abundance(next.unitig) as f64 * kmers;
                total_kmers += kmers;
                cursor = next;
            }
            PathAdvance::DeadEnd | PathAdvance::OutBranching => return None,
        }
    }
}

fn identity(a: &str, b: &str) -> f64 {
    let matches = a
        .bytes()
        .zip(b.bytes())
        .filter(|(x, y)| x == y)
        .count();
    matches as f64 / a.len().max(b.len()) as f64
}

fn remove_bulges(graph: &mut UnitigGraph, config: &BulgeConfig) -> u64 {
    let k = graph.kmer_size();
    let max_len = (config.max_len_factor * k as f64) as usize;
    let mut removed = 0u64;

    let branch_points: Vec<Node> = graph
        .live_unitigs()
        .flat_map(|u| [end(u), begin(u).reversed()])
        .filter(|&n| graph.degree(n, Direction::Outcoming) >= 2)
        .collect();

    for branching in branch_points {
        if graph.is_deleted(branching.unitig) {
            continue;
        }
        let entries: Vec<Node> = graph.neighbors(branching, Direction::Outcoming).collect();
        'pairs: for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let (Some(left), Some(right)) = (
                    walk_branch(graph, entries[i], max_len),
                    walk_branch(graph, entries[j], max_len),
                ) else {
                    continue;
                };
                if left.merge != right.merge {
                    continue;
                }
                if left.sequence.len().abs_diff(right.sequence.len()) > config.max_len_delta {
                    continue;
                }
                if identity(&left.sequence, &right.sequence) < config.min_identity {
                    continue;
                }
                // branches may not share unitigs with each other
                if left.unitigs.iter().any(|u| right.unitigs.contains(u)) {
                    continue;
                }
                let loser = match left
                    .coverage
                    .partial_cmp(&right.coverage)
                    .unwrap_or(std::cmp::Ordering::Equal)
                {
                    std::cmp::Ordering::Less => &left,
                    std::cmp::Ordering::Greater => &right,
                    // deterministic tie-break on the entry unitig id
                    std::cmp::Ordering::Equal => {
                        if left.unitigs[0] > right.unitigs[0] {
                            &left
                        } else {
                            &right
                        }
                    }
                };
                for &u in &loser.unitigs {
                    graph.delete(u);
                }
                removed += 1;
                // the branching node changed; stop pairing on stale data
                break 'pairs;
            }
        }
    }
    removed
}

fn remove_erroneous_connections(graph: &mut UnitigGraph, config: &EcConfig) -> u64 {
    let k = graph.kmer_size();
    let max_len = (config.max_len_factor * k as f64) as usize;
    let mut doomed = Vec::new();

    for u in graph.live_unitigs() {
        if graph.unitig_len(u) >= max_len {
            continue;
        }
        let Some(left_mean) = neighborhood_mean(graph, begin(u), Direction::Incoming) else {
            continue;
        };
        let Some(right_mean) = neighborhood_mean(graph, end(u), Direction::Outcoming) else {
            continue;
        };
        let own = graph.mean_abundance(u) as f64;
        if left_mean.min(right_mean) >= config.coverage_ratio * own {
            doomed.push(u);
        }
    }

    for &u in &doomed {
        graph.delete(u);
    }
    doomed.len() as u64
}
