//! Counting configuration: pass and partition planning.
//!
//! Before any heavy I/O the driver turns the user budgets (memory, disk,
//! cores) and a bank size estimate into a number of passes P and a number
//! of partitions N. The planning mirrors the classic external-counting
//! scheme: a pass must fit the disk budget, a partition (times the worker
//! count) must fit the memory budget, and N is capped by the OS
//! file-descriptor limit.

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

use crate::bank::{Bank, BankEstimate};
use crate::core::{CoreError, KmerModel, KmerWord};
use crate::count::cardinality::LinearCounter;

const MB: u64 = 1024 * 1024;

/// Hash-table load factor used when inflating N for hash-mode counting.
const HASH_LOAD_FACTOR: f64 = 0.7;

/// Safety margin applied on top of the estimated distinct-k-mer ratio.
const ESTIMATE_SAFETY: f64 = 1.3;

/// How partitions are counted once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionMode {
    /// Sort when the partition fits the per-worker budget, hash otherwise.
    #[default]
    Auto,
    /// Always count through a bounded hash table.
    Hash,
}

/// User-facing counting options; zero means "pick a default".
#[derive(Debug, Clone)]
pub struct CountOptions {
    pub kmer_size: usize,
    pub abundance_min: u32,
    pub max_memory_mb: u64,
    pub max_disk_mb: u64,
    pub nb_cores: usize,
    pub partition_mode: PartitionMode,
    /// Run the linear-counting estimator to shrink N.
    pub estimate_distinct: bool,
    /// Spill through the sorted cache variant (pre-sorted runs on disk).
    pub sorted_spill: bool,
    /// Tolerated ratio of malformed records before the run aborts.
    pub max_bad_ratio: f64,
}

impl Default for CountOptions {
    fn default() -> Self {
        Self {
            kmer_size: 31,
            abundance_min: 2,
            max_memory_mb: 0,
            max_disk_mb: 0,
            nb_cores: 0,
            partition_mode: PartitionMode::Auto,
            estimate_distinct: false,
            sorted_spill: false,
            max_bad_ratio: 0.05,
        }
    }
}

/// Resolved plan for one counting run.
#[derive(Debug, Clone)]
pub struct CountConfig {
    pub kmer_size: usize,
    pub abundance_min: u32,
    pub nb_cores: usize,
    pub max_memory_mb: u64,
    pub max_disk_mb: u64,
    pub volume_mb: u64,
    pub nb_passes: usize,
    pub nb_partitions: usize,
    pub partition_mode: PartitionMode,
    pub sorted_spill: bool,
    pub estimate: BankEstimate,
    pub estimated_distinct: Option<u64>,
    pub max_bad_ratio: f64,
}

/// Compute the counting plan for `bank` under the given options.
pub fn configure<W: KmerWord>(options: &CountOptions, bank: &Bank) -> Result<CountConfig> {
    if options.kmer_size < 1 || options.kmer_size > W::max_k() {
        return Err(anyhow!(CoreError::Config(format!(
            "kmer size {} outside supported range 1..={}",
            options.kmer_size,
            W::max_k()
        ))));
    }
    if options.abundance_min < 1 {
        return Err(anyhow!(CoreError::Config(
            "abundance threshold must be >= 1".into()
        )));
    }
    if options.kmer_size % 2 == 0 {
        warn!(
            "even kmer size {} allows palindromic k-mers; odd sizes are recommended",
            options.kmer_size
        );
    }

    let estimate = bank.estimate()?;
    let kmers_nb = estimate
        .total_bp
        .saturating_sub(estimate.nb_sequences * (options.kmer_size as u64 - 1));
    let bank_size_mb = (estimate.total_bp / MB).max(1);
    let volume_mb = ((kmers_nb * W::BYTES as u64) / MB).max(1);

    let max_disk_mb = if options.max_disk_mb > 0 {
        options.max_disk_mb
    } else {
        3 * bank_size_mb
    };
    let max_memory_mb = if options.max_memory_mb > 0 {
        options.max_memory_mb
    } else {
        2000
    };
    let nb_cores = if options.nb_cores > 0 {
        options.nb_cores
    } else {
        num_cpus::get()
    };

    let estimated_distinct = if options.estimate_distinct {
        match estimate_distinct_kmers::<W>(options.kmer_size, max_memory_mb, kmers_nb, bank) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("distinct-kmer estimation failed, using worst case: {err:#}");
                None
            }
        }
    } else {
        None
    };

    let fd_budget = (max_open_files() / 2).max(64);
    let mut nb_passes = (volume_mb / max_disk_mb) as usize + 1;
    let nb_partitions = loop {
        let volume_per_pass = volume_mb / nb_passes as u64;
        let mut nb_partitions =
            ((volume_per_pass * nb_cores as u64) / max_memory_mb) as usize + 1;

        if options.partition_mode == PartitionMode::Hash {
            // account for the table load factor and per-entry overhead
            nb_partitions = (nb_partitions as f64 / HASH_LOAD_FACTOR).ceil() as usize;
            let entry_bytes = W::BYTES + 12;
            nb_partitions = (nb_partitions * entry_bytes).div_ceil(W::BYTES);
        }

        if let Some(distinct) = estimated_distinct {
            let ratio = distinct as f64 / kmers_nb.max(1) as f64;
            let shrunk = ((nb_partitions as f64) * ratio * ESTIMATE_SAFETY).ceil() as usize;
            nb_partitions = shrunk.max(1);
        }

        if nb_partitions >= fd_budget {
            nb_passes += 1;
        } else {
            break nb_partitions;
        }
    };

    let config = CountConfig {
        kmer_size: options.kmer_size,
        abundance_min: options.abundance_min,
        nb_cores,
        max_memory_mb,
        max_disk_mb,
        volume_mb,
        nb_passes,
        nb_partitions,
        partition_mode: options.partition_mode,
        sorted_spill: options.sorted_spill,
        estimate,
        estimated_distinct,
        max_bad_ratio: options.max_bad_ratio,
    };
    info!(
        "counting plan: volume {} MB, {} pass(es), {} partition(s), {} core(s)",
        config.volume_mb, config.nb_passes, config.nb_partitions, config.nb_cores
    );
    Ok(config)
}

/// One full sweep through the bank feeding a linear counter; inaccurate
/// counters fall back to the worst case (every k-mer distinct).
fn estimate_distinct_kmers<W: KmerWord>(
    kmer_size: usize,
    max_memory_mb: u64,
    kmers_nb: u64,
    bank: &Bank,
) -> Result<u64> {
    let nb_bits = (max_memory_mb * MB * 8 / 2).min(kmers_nb.max(64));
    let mut counter = LinearCounter::new(nb_bits);
    let model: KmerModel<W> = KmerModel::new(kmer_size);
    for record in bank.iterator()? {
        let record = match record {
            Ok(r) => r,
            Err(_) => continue,
        };
        for kmer in model.kmers_of(&record.nucleotides) {
            counter.add(model.hash(kmer));
        }
    }
    if !counter.is_accurate() {
        warn!("linear counter saturated, returning worst-case distinct estimate");
        return Ok(kmers_nb);
    }
    let estimate = counter.estimate();
    debug!(
        "estimated {} distinct kmers out of {} total",
        estimate, kmers_nb
    );
    Ok(estimate)
}

/// Soft limit on open file descriptors, halved by the caller before use.
/// Read from /proc when available, with a conservative fallback.
fn max_open_files() -> usize {
    if let Ok(limits) = std::fs::read_to_string("/proc/self/limits") {
        for line in limits.lines() {
            if line.starts_with("Max open files") {
                if let Some(soft) = line.split_whitespace().nth(3) {
                    if let Ok(value) = soft.parse::<usize>() {
                        return value;
                    }
                }
            }
        }
    }
    1024
}
