//! Unitig Graph
//! ============
//!
//! Compacted de Bruijn graph over unitigs. Sequences live in one flat
//! 2-bit packed buffer with a prefix-sum offset array; each unitig carries
//! a mean abundance, a soft-deletion flag and a traversal mark. Adjacency
//! is stored per extremity as flat descriptor vectors with prefix-sum
//! maps: `outcoming[u]` holds the neighbors reached walking forward out of
//! u's last k-mer, `incoming[u]` the predecessors flowing into its first
//! k-mer. Nodes and edges are value types computed on demand; nothing is
//! materialized eagerly.

pub mod build;
pub mod simplify;

use ahash::AHashMap;
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use tracing::debug;

use crate::core::CoreError;
use crate::storage::Storage;

/// Pipeline-phase completion bits recorded in the graph state.
pub mod state {
    pub const INIT_DONE: u64 = 1 << 0;
    pub const CONFIGURATION_DONE: u64 = 1 << 1;
    pub const SORTING_COUNT_DONE: u64 = 1 << 2;
    pub const MPHF_DONE: u64 = 1 << 6;
    pub const BCALM2_DONE: u64 = 1 << 20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Extremity {
    Begin,
    End,
}

impl Extremity {
    pub fn opposite(self) -> Self {
        match self {
            Extremity::Begin => Extremity::End,
            Extremity::End => Extremity::Begin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn flip(self) -> Self {
        match self {
            Strand::Forward => Strand::Reverse,
            Strand::Reverse => Strand::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outcoming,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Incoming => Direction::Outcoming,
            Direction::Outcoming => Direction::Incoming,
        }
    }
}

/// A view on one unitig extremity in one orientation.
///
/// Equality and hashing ignore the strand: a node and its reverse
/// complement denote the same vertex of the bi-directed graph.
#[derive(Debug, Clone, Copy, Eq)]
pub struct Node {
    pub unitig: u64,
    pub extremity: Extremity,
    pub strand: Strand,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.unitig == other.unitig && self.extremity == other.extremity
    }
}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.unitig.hash(state);
        self.extremity.hash(state);
    }
}

impl Node {
    pub fn new(unitig: u64, extremity: Extremity, strand: Strand) -> Self {
        Self {
            unitig,
            extremity,
            strand,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.strand = self.strand.flip();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub from: Node,
    pub to: Node,
    pub direction: Direction,
}

/// Outcome of one simple-path step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathAdvance {
    Extended(Edge),
    DeadEnd,
    OutBranching,
    InBranchingAhead,
}

/// Oriented unitig sequence plus isolation flags for its two ends.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientedSequence {
    pub sequence: String,
    pub isolated_left: bool,
    pub isolated_right: bool,
}

/// Result of a both-directions simple-path concatenation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplePath {
    pub sequence: String,
    pub coverage: f32,
    pub isolated_left: bool,
    pub isolated_right: bool,
}

/// Decoded adjacency descriptor: which unitig, which of its extremities
/// overlaps, and the relative strand for continuing the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct NeighborRef {
    unitig: u64,
    extremity: Extremity,
    strand: Strand,
}

impl NeighborRef {
    fn encode(self) -> u64 {
        (self.unitig << 2)
            | ((self.extremity == Extremity::End) as u64) << 1
            | (self.strand == Strand::Reverse) as u64
    }

    fn decode(word: u64) -> Self {
        Self {
            unitig: word >> 2,
            extremity: if word & 0b10 != 0 {
                Extremity::End
            } else {
                Extremity::Begin
            },
            strand: if word & 0b01 != 0 {
                Strand::Reverse
            } else {
                Strand::Forward
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

pub struct UnitigGraph {
    kmer_size: usize,
    nb_unitigs: u64,
    packed: Vec<u8>,
    /// n+1 prefix sums, in bases, into `packed`.
    offsets: Vec<u64>,
    mean_abundance: Vec<f32>,
    incoming: Vec<u64>,
    outcoming: Vec<u64>,
    incoming_map: Vec<u64>,
    outcoming_map: Vec<u64>,
    deleted: Vec<u64>,
    traversed: Vec<u64>,
    state: u64,
}

/// Reverse complement of a nucleotide string.
pub fn rc_str(seq: &str) -> String {
    seq.bytes()
        .rev()
        .map(|b| match b {
            b'A' => 'T',
            b'C' => 'G',
            b'G' => 'C',
            b'T' => 'A',
            other => other as char,
        })
        .collect()
}

fn canonical_str(seq: &str) -> String {
    let rc = rc_str(seq);
    if rc.as_str() < seq {
        rc
    } else {
        seq.to_string()
    }
}

impl UnitigGraph {
    /// Assemble a graph from unitig sequences and abundances. Adjacency is
    /// derived from (k-1) extremity overlaps in both strands; every edge
    /// gets its symmetric counterpart by construction.
    pub fn from_unitigs(kmer_size: usize, unitigs: Vec<(String, f32)>) -> Result<Self> {
        for (seq, _) in &unitigs {
            if seq.len() < kmer_size {
                return Err(anyhow!(CoreError::Format(format!(
                    "unitig shorter than k: {} < {kmer_size}",
                    seq.len()
                ))));
            }
            if !seq.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T')) {
                return Err(anyhow!(CoreError::Format(
                    "unitig contains a non-ACGT base".into()
                )));
            }
        }

        let nb_unitigs = unitigs.len() as u64;
        let mut packed = Vec::new();
        let mut offsets = Vec::with_capacity(unitigs.len() + 1);
        let mut mean_abundance = Vec::with_capacity(unitigs.len());
        offsets.push(0u64);
        let mut base_cursor = 0u64;
        for (seq, abundance) in &unitigs {
            for (i, byte) in seq.bytes().enumerate() {
                let code = crate::core::base_to_code(byte).expect("validated above");
                let bit = (base_cursor + i as u64) * 2;
                if (bit / 8) as usize >= packed.len() {
                    packed.push(0);
                }
                packed[(bit / 8) as usize] |= code << (bit % 8);
            }
            base_cursor += seq.len() as u64;
            offsets.push(base_cursor);
            mean_abundance.push(*abundance);
        }

        let (incoming, incoming_map, outcoming, outcoming_map) =
            build_adjacency(kmer_size, &unitigs);

        let bitset_words = unitigs.len().div_ceil(64);
        debug!(
            "unitig graph: {} unitigs, {} bases, {} edges",
            nb_unitigs,
            base_cursor,
            outcoming.len()
        );
        Ok(Self {
            kmer_size,
            nb_unitigs,
            packed,
            offsets,
            mean_abundance,
            incoming,
            outcoming,
            incoming_map,
            outcoming_map,
            deleted: vec![0u64; bitset_words],
            traversed: vec![0u64; bitset_words],
            state: 0,
        })
    }

    pub fn kmer_size(&self) -> usize {
        self.kmer_size
    }

    pub fn nb_unitigs(&self) -> u64 {
        self.nb_unitigs
    }

    pub fn nb_live_unitigs(&self) -> u64 {
        (0..self.nb_unitigs).filter(|&u| !self.is_deleted(u)).count() as u64
    }

    pub fn unitig_len(&self, unitig: u64) -> usize {
        (self.offsets[unitig as usize + 1] - self.offsets[unitig as usize]) as usize
    }

    /// Forward-strand sequence of a unitig, decoded from the packed buffer.
    pub fn unitig_str(&self, unitig: u64) -> String {
        let start = self.offsets[unitig as usize];
        let end = self.offsets[unitig as usize + 1];
        let mut out = String::with_capacity((end - start) as usize);
        for base in start..end {
            let bit = base * 2;
            let code = (self.packed[(bit / 8) as usize] >> (bit % 8)) & 0b11;
            out.push(crate::core::code_to_base(code) as char);
        }
        out
    }

    pub fn mean_abundance(&self, unitig: u64) -> f32 {
        self.mean_abundance[unitig as usize]
    }

    /// Number of k-mers in a unitig.
    fn nb_kmers(&self, unitig: u64) -> u64 {
        (self.unitig_len(unitig) - self.kmer_size + 1) as u64
    }

    pub fn is_deleted(&self, unitig: u64) -> bool {
        self.deleted[(unitig / 64) as usize] & (1 << (unitig % 64)) != 0
    }

    /// Soft deletion: the unitig stays in place, every query skips it.
    pub fn delete(&mut self, unitig: u64) {
        self.deleted[(unitig / 64) as usize] |= 1 << (unitig % 64);
    }

    pub fn is_marked(&self, unitig: u64) -> bool {
        self.traversed[(unitig / 64) as usize] & (1 << (unitig % 64)) != 0
    }

    pub fn mark(&mut self, unitig: u64) {
        self.traversed[(unitig / 64) as usize] |= 1 << (unitig % 64);
    }

    pub fn reset_marks(&mut self) {
        self.traversed.fill(0);
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    pub fn set_state(&mut self, mask: u64) {
        self.state |= mask;
    }

    pub fn check_state(&self, mask: u64) -> bool {
        self.state & mask == mask
    }

    /// Ids of non-deleted unitigs.
    pub fn live_unitigs(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.nb_unitigs).filter(move |&u| !self.is_deleted(u))
    }

    /// Both extremity nodes of every live unitig, forward strand.
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.live_unitigs().flat_map(|u| {
            [
                Node::new(u, Extremity::Begin, Strand::Forward),
                Node::new(u, Extremity::End, Strand::Forward),
            ]
        })
    }

    /// Physical adjacency side crossed when walking from orientation
    /// `strand` in direction `dir`. The walk always exits a unitig at the
    /// far end, so only the strand matters.
    fn crossing_side(strand: Strand, dir: Direction) -> Side {
        if (dir == Direction::Outcoming) == (strand == Strand::Forward) {
            Side::Right
        } else {
            Side::Left
        }
    }

    fn side_slice(&self, unitig: u64, side: Side) -> &[u64] {
        let (list, map) = match side {
            Side::Left => (&self.incoming, &self.incoming_map),
            Side::Right => (&self.outcoming, &self.outcoming_map),
        };
        let from = map[unitig as usize] as usize;
        let to = map[unitig as usize + 1] as usize;
        &list[from..to]
    }

    /// Lazy neighbor sequence. The strand of each yielded node makes the
    /// (k-1) overlap end-to-begin in that orientation; deleted neighbors
    /// are skipped.
    pub fn neighbors(&self, node: Node, dir: Direction) -> impl Iterator<Item = Node> + '_ {
        let side = Self::crossing_side(node.strand, dir);
        let flip = node.strand == Strand::Reverse;
        self.side_slice(node.unitig, side)
            .iter()
            .map(move |&word| {
                let entry = NeighborRef::decode(word);
                Node::new(
                    entry.unitig,
                    entry.extremity,
                    if flip { entry.strand.flip() } else { entry.strand },
                )
            })
            .filter(move |n| !self.is_deleted(n.unitig))
    }

    pub fn degree(&self, node: Node, dir: Direction) -> usize {
        self.neighbors(node, dir).count()
    }

    pub fn indegree(&self, node: Node) -> usize {
        self.degree(node, Direction::Incoming)
    }

    pub fn outdegree(&self, node: Node) -> usize {
        self.degree(node, Direction::Outcoming)
    }

    /// The node at the extremity where a walk in `dir` leaves the unitig.
    pub fn exit_node(&self, node: Node, dir: Direction) -> Node {
        let extremity = match Self::crossing_side(node.strand, dir) {
            Side::Right => Extremity::End,
            Side::Left => Extremity::Begin,
        };
        Node::new(node.unitig, extremity, node.strand)
    }

    /// One simple-path step out of the unitig containing `node`.
    ///
    /// `Extended` carries the traversed edge; `DeadEnd` means no live
    /// neighbor; `OutBranching` more than one way out; `InBranchingAhead`
    /// a unique way out whose target is also reachable from elsewhere.
    pub fn simple_path_avance(&self, node: Node, dir: Direction) -> PathAdvance {
        let mut ahead = self.neighbors(node, dir);
        let first = match ahead.next() {
            None => return PathAdvance::DeadEnd,
            Some(n) => n,
        };
        if ahead.next().is_some() {
            return PathAdvance::OutBranching;
        }
        // the back-degree of the target counts the edge being traversed
        if self.degree(first, dir.opposite()) > 1 {
            return PathAdvance::InBranchingAhead;
        }
        PathAdvance::Extended(Edge {
            from: self.exit_node(node, dir),
            to: first,
            direction: dir,
        })
    }

    /// Nodes reached by repeated simple-path extension from `node` in
    /// `dir`, excluding the starting node. Stops at any branching, dead
    /// end or when the walk closes a cycle.
    pub fn simple_path(&self, node: Node, dir: Direction) -> SimplePathIter<'_> {
        let mut seen = HashSet::new();
        seen.insert(node.unitig);
        SimplePathIter {
            graph: self,
            cursor: Some(node),
            dir,
            seen,
        }
    }

    /// An edge is simple when it is the only way out of `from` and the
    /// only way into `to`.
    pub fn is_simple(&self, edge: &Edge) -> bool {
        self.degree(edge.from, edge.direction) == 1
            && self.degree(edge.to, edge.direction.opposite()) == 1
    }

    /// Oriented sequence of the node's unitig (reverse complemented for a
    /// REVERSE node) plus isolation flags for its oriented ends.
    pub fn unitig_sequence(&self, node: Node) -> OrientedSequence {
        let forward = self.unitig_str(node.unitig);
        let in_deg = self.degree(
            Node::new(node.unitig, Extremity::Begin, Strand::Forward),
            Direction::Incoming,
        );
        let out_deg = self.degree(
            Node::new(node.unitig, Extremity::End, Strand::Forward),
            Direction::Outcoming,
        );
        match node.strand {
            Strand::Forward => OrientedSequence {
                sequence: forward,
                isolated_left: in_deg == 0,
                isolated_right: out_deg == 0,
            },
            Strand::Reverse => OrientedSequence {
                sequence: rc_str(&forward),
                isolated_left: out_deg == 0,
                isolated_right: in_deg == 0,
            },
        }
    }

    /// Concatenate the node's unitig with everything reachable by simple
    /// path on both sides, marking traversed unitigs. The coverage is the
    /// k-mer-count weighted mean over the traversed unitigs.
    pub fn simple_path_both_directions(&mut self, node: Node) -> SimplePath {
        let k = self.kmer_size;
        let overlap = k - 1;

        let mut visited: HashSet<u64> = HashSet::new();
        visited.insert(node.unitig);
        self.mark(node.unitig);

        let mut sequence = self.unitig_sequence(node).sequence;
        let mut weighted = self.mean_abundance(node.unitig) as f64 * self.nb_kmers(node.unitig) as f64;
        let mut total_kmers = self.nb_kmers(node.unitig);

        // forward side
        let mut cursor = node;
        let isolated_right = loop {
            match self.simple_path_avance(cursor, Direction::Outcoming) {
                PathAdvance::Extended(edge) => {
                    let next = edge.to;
                    if !visited.insert(next.unitig) {
                        break false; // circular path
                    }
                    let part = self.unitig_sequence(next).sequence;
                    sequence.push_str(&part[overlap..]);
                    weighted +=
                        self.mean_abundance(next.unitig) as f64 * self.nb_kmers(next.unitig) as f64;
                    total_kmers += self.nb_kmers(next.unitig);
                    self.mark(next.unitig);
                    cursor = next;
                }
                PathAdvance::DeadEnd => break true,
                PathAdvance::OutBranching | PathAdvance::InBranchingAhead => break false,
            }
        };

        // backward side
        let mut cursor = node;
        let isolated_left = loop {
            match self.simple_path_avance(cursor, Direction::Incoming) {
                PathAdvance::Extended(edge) => {
                    let prev = edge.to;
                    if !visited.insert(prev.unitig) {
                        break false;
                    }
                    let part = self.unitig_sequence(prev).sequence;
                    let keep = part.len() - overlap;
                    sequence.insert_str(0, &part[..keep]);
                    weighted +=
                        self.mean_abundance(prev.unitig) as f64 * self.nb_kmers(prev.unitig) as f64;
                    total_kmers += self.nb_kmers(prev.unitig);
                    self.mark(prev.unitig);
                    cursor = prev;
                }
                PathAdvance::DeadEnd => break true,
                PathAdvance::OutBranching | PathAdvance::InBranchingAhead => break false,
            }
        };

        SimplePath {
            sequence,
            coverage: (weighted / total_kmers as f64) as f32,
            isolated_left,
            isolated_right,
        }
    }

    /// Rebuild the graph without its deleted unitigs, renumbering ids.
    pub fn compact(&self) -> Result<UnitigGraph> {
        let unitigs: Vec<(String, f32)> = self
            .live_unitigs()
            .map(|u| (self.unitig_str(u), self.mean_abundance(u)))
            .collect();
        let mut graph = UnitigGraph::from_unitigs(self.kmer_size, unitigs)?;
        graph.state = self.state;
        Ok(graph)
    }

    /// Persist the graph under the `dbgh5` group.
    pub fn save(&self, storage: &Storage) -> Result<()> {
        let group = storage.group("dbgh5")?;
        group
            .collection::<Vec<u8>>("unitigs")
            .write_all(std::slice::from_ref(&self.packed))?;
        group
            .collection::<Vec<u64>>("unitigs_sizes")
            .write_all(std::slice::from_ref(&self.offsets))?;
        group
            .collection::<Vec<u64>>("incoming")
            .write_all(std::slice::from_ref(&self.incoming))?;
        group
            .collection::<Vec<u64>>("outcoming")
            .write_all(std::slice::from_ref(&self.outcoming))?;
        group
            .collection::<Vec<u64>>("incoming_map")
            .write_all(std::slice::from_ref(&self.incoming_map))?;
        group
            .collection::<Vec<u64>>("outcoming_map")
            .write_all(std::slice::from_ref(&self.outcoming_map))?;
        group
            .collection::<Vec<f32>>("mean_abundance")
            .write_all(std::slice::from_ref(&self.mean_abundance))?;
        group.collection::<u64>("state").write_all(&[self.state])?;
        group
            .add_property("kmer_size", &self.kmer_size.to_string())?;
        Ok(())
    }

    /// Load a graph previously written by [`UnitigGraph::save`].
    pub fn load(storage: &Storage) -> Result<UnitigGraph> {
        let group = storage.group("dbgh5")?;
        let kmer_size: usize = group
            .property("kmer_size")?
            .ok_or_else(|| CoreError::Corruption("dbgh5 group lacks kmer_size".into()))?
            .parse()
            .map_err(|_| CoreError::Corruption("bad kmer_size property".into()))?;

        fn single<T: serde::Serialize + serde::de::DeserializeOwned>(
            group: &crate::storage::Group,
            name: &str,
        ) -> Result<T> {
            let mut items = group.collection::<T>(name).read_all()?;
            if items.len() != 1 {
                return Err(anyhow!(CoreError::Corruption(format!(
                    "collection {name} should hold exactly one record"
                ))));
            }
            Ok(items.pop().expect("length checked"))
        }

        let packed: Vec<u8> = single(&group, "unitigs")?;
        let offsets: Vec<u64> = single(&group, "unitigs_sizes")?;
        let incoming: Vec<u64> = single(&group, "incoming")?;
        let outcoming: Vec<u64> = single(&group, "outcoming")?;
        let incoming_map: Vec<u64> = single(&group, "incoming_map")?;
        let outcoming_map: Vec<u64> = single(&group, "outcoming_map")?;
        let mean_abundance: Vec<f32> = single(&group, "mean_abundance")?;
        let state: u64 = single(&group, "state")?;

        if offsets.is_empty() || offsets.len() != mean_abundance.len() + 1 {
            return Err(anyhow!(CoreError::Corruption(
                "inconsistent unitig offset table".into()
            )));
        }
        let nb_unitigs = mean_abundance.len() as u64;
        let bitset_words = mean_abundance.len().div_ceil(64);
        Ok(UnitigGraph {
            kmer_size,
            nb_unitigs,
            packed,
            offsets,
            mean_abundance,
            incoming,
            outcoming,
            incoming_map,
            outcoming_map,
            deleted: vec![0u64; bitset_words],
            traversed: vec![0u64; bitset_words],
            state,
        })
    }
}

/// Lazy simple-path walker produced by [`UnitigGraph::simple_path`].
pub struct SimplePathIter<'a> {
    graph: &'a UnitigGraph,
    cursor: Option<Node>,
    dir: Direction,
    seen: HashSet<u64>,
}

impl Iterator for SimplePathIter<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let cursor = self.cursor?;
        if let PathAdvance::Extended(edge) = self.graph.simple_path_avance(cursor, self.dir) {
            if self.seen.insert(edge.to.unitig) {
                self.cursor = Some(edge.to);
                return Some(edge.to);
            }
        }
        self.cursor = None;
        None
    }
}

/// Extremity-overlap adjacency assembly shared by construction and
/// compaction. Returns (incoming, incoming_map, outcoming, outcoming_map).
fn build_adjacency(
    kmer_size: usize,
    unitigs: &[(String, f32)],
) -> (Vec<u64>, Vec<u64>, Vec<u64>, Vec<u64>) {
    let k = kmer_size;
    let mut index: AHashMap<String, Vec<(u64, Extremity)>> = AHashMap::new();
    for (u, (seq, _)) in unitigs.iter().enumerate() {
        let first = &seq[..k];
        let last = &seq[seq.len() - k..];
        index
            .entry(canonical_str(first))
            .or_default()
            .push((u as u64, Extremity::Begin));
        index
            .entry(canonical_str(last))
            .or_default()
            .push((u as u64, Extremity::End));
    }

    let mut incoming = Vec::new();
    let mut outcoming = Vec::new();
    let mut incoming_map = Vec::with_capacity(unitigs.len() + 1);
    let mut outcoming_map = Vec::with_capacity(unitigs.len() + 1);
    incoming_map.push(0u64);
    outcoming_map.push(0u64);

    for (seq, _) in unitigs {
        let first = &seq[..k];
        let last = &seq[seq.len() - k..];

        // successors: right extensions of the last k-mer
        let mut out_entries = Vec::new();
        for base in ['A', 'C', 'G', 'T'] {
            let mut extended = String::with_capacity(k);
            extended.push_str(&last[1..]);
            extended.push(base);
            for &(v, extremity) in index
                .get(&canonical_str(&extended))
                .map(Vec::as_slice)
                .unwrap_or(&[])
            {
                let vseq = &unitigs[v as usize].0;
                let matches = match extremity {
                    Extremity::Begin => vseq[..k] == extended,
                    Extremity::End => rc_str(&vseq[vseq.len() - k..]) == extended,
                };
                if matches {
                    out_entries.push(
                        NeighborRef {
                            unitig: v,
                            extremity,
                            strand: match extremity {
                                Extremity::Begin => Strand::Forward,
                                Extremity::End => Strand::Reverse,
                            },
                        }
                        .encode(),
                    );
                }
            }
        }
        out_entries.sort_unstable();
        out_entries.dedup();
        outcoming.extend_from_slice(&out_entries);
        outcoming_map.push(outcoming.len() as u64);

        // predecessors: left extensions of the first k-mer
        let mut in_entries = Vec::new();
        for base in ['A', 'C', 'G', 'T'] {
            let mut extended = String::with_capacity(k);
            extended.push(base);
            extended.push_str(&first[..k - 1]);
            for &(v, extremity) in index
                .get(&canonical_str(&extended))
                .map(Vec::as_slice)
                .unwrap_or(&[])
            {
                let vseq = &unitigs[v as usize].0;
                let matches = match extremity {
                    Extremity::End => vseq[vseq.len() - k..] == extended,
                    Extremity::Begin => rc_str(&vseq[..k]) == extended,
                };
                if matches {
                    in_entries.push(
                        NeighborRef {
                            unitig: v,
                            extremity,
                            strand: match extremity {
                                Extremity::End => Strand::Forward,
                                Extremity::Begin => Strand::Reverse,
                            },
                        }
                        .encode(),
                    );
                }
            }
        }
        in_entries.sort_unstable();
        in_entries.dedup();
        incoming.extend_from_slice(&in_entries);
        incoming_map.push(incoming.len() as u64);
    }

    (incoming, incoming_map, outcoming, outcoming_map)
}
