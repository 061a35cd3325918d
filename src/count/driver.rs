//! Counting Pass Driver
//! ====================
//!
//! The external k-mer counting loop. Each pass keeps the k-mers whose
//! hash lands on the pass index, spills them to N disk partitions, then
//! counts every partition on the worker pool: sorted run-length counting
//! when the partition fits the per-worker budget, bounded hash counting
//! otherwise. Distinct counts feed the histogram; counts at or above the
//! abundance threshold are emitted to the solid store in partition order.

use ahash::AHashMap;
use anyhow::{anyhow, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::bank::{Bank, FaultTolerantReads};
use crate::core::{mix64, CoreError, KmerModel, KmerWord, SequenceRecord};
use crate::count::config::{CountConfig, PartitionMode};
use crate::count::histogram::{Histogram, HistogramEntry};
use crate::count::partition::{
    PartitionCache, PartitionSet, SharedSortedBuffers, SortedPartitionCache, CACHE_ITEMS,
};
use crate::dispatch::{CancellationToken, Dispatcher};
use crate::storage::Storage;
use crate::util::{ProgressBar, Properties};

const MB: u64 = 1024 * 1024;

/// Reads pulled from the bank before a parallel spill round.
const SPILL_BLOCK_READS: usize = 4096;

/// Give up sub-partitioning an oversized hash table past this depth.
const MAX_HASH_DEPTH: u32 = 8;

/// One solid record: a canonical k-mer and its abundance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmerCount<W> {
    pub kmer: W,
    pub count: u32,
}

/// Summary of a finished counting run.
#[derive(Debug, Clone, Copy)]
pub struct CountResult {
    pub nb_distinct: u64,
    pub nb_solid: u64,
    pub total_kmers: u64,
    pub cutoff: u32,
    pub nb_solids_for_cutoff: u64,
}

/// Run the whole multi-pass counting pipeline, writing the `dsk` group of
/// `storage`. Partial outputs are removed on failure.
pub fn run_counting<W: KmerWord>(
    bank: &Bank,
    storage: &Storage,
    config: &CountConfig,
    tmp_dir: &Path,
    cancel: &CancellationToken,
    progress: &ProgressBar,
) -> Result<CountResult> {
    match run_inner::<W>(bank, storage, config, tmp_dir, cancel, progress) {
        Ok(result) => Ok(result),
        Err(err) => {
            let _ = std::fs::remove_dir_all(storage.root().join("dsk"));
            Err(err)
        }
    }
}

fn run_inner<W: KmerWord>(
    bank: &Bank,
    storage: &Storage,
    config: &CountConfig,
    tmp_dir: &Path,
    cancel: &CancellationToken,
    progress: &ProgressBar,
) -> Result<CountResult> {
    let model: KmerModel<W> = KmerModel::new(config.kmer_size);
    let dispatcher = Dispatcher::new(config.nb_cores);
    let dsk = storage.group("dsk")?;
    let mut solid_writer = dsk.collection::<KmerCount<W>>("solid").writer()?;
    let mut histogram = Histogram::new();

    for pass in 0..config.nb_passes {
        progress.set_message(format!(
            "pass {}/{}: partitioning",
            pass + 1,
            config.nb_passes
        ));
        let set: PartitionSet<W> =
            PartitionSet::create(partition_dir(tmp_dir, pass), config.nb_partitions)?;

        let outcome = (|| {
            fill_partitions(bank, &model, config, &set, pass, cancel, progress)?;
            progress.set_message(format!(
                "pass {}/{}: counting kmers",
                pass + 1,
                config.nb_passes
            ));
            drain_partitions(&set, config, &dispatcher, cancel, progress)
        })();

        match outcome {
            Ok((per_partition, pass_histogram)) => {
                for solids in &per_partition {
                    for record in solids {
                        solid_writer.push(record)?;
                    }
                }
                histogram.merge(&pass_histogram);
                set.remove()?;
            }
            Err(err) => {
                let _ = set.remove();
                return Err(err);
            }
        }
    }

    let nb_solid = solid_writer.finish()?;
    progress.finish();

    dsk.collection::<HistogramEntry>("histogram")
        .write_all(&histogram.entries())?;
    let cutoff = histogram.auto_cutoff(config.abundance_min);
    let nb_solids_for_cutoff = histogram.nb_solids_at(cutoff);
    dsk.collection::<i64>("cutoff").write_all(&[cutoff as i64])?;
    dsk.collection::<i64>("nbsolidsforcutoff")
        .write_all(&[nb_solids_for_cutoff as i64])?;
    dsk.add_property("kmer_size", &config.kmer_size.to_string())?;

    let result = CountResult {
        nb_distinct: histogram.nb_distinct(),
        nb_solid,
        total_kmers: histogram.total_occurrences(),
        cutoff,
        nb_solids_for_cutoff,
    };
    let props = stats_properties(config, &result);
    dsk.add_property("xml", &props.to_xml())?;
    debug!("run properties:\n{}", props.to_text());

    info!(
        "counting done: {} distinct, {} solid (threshold {}), auto cutoff {}",
        result.nb_distinct, result.nb_solid, config.abundance_min, result.cutoff
    );
    Ok(result)
}

fn partition_dir(tmp_dir: &Path, pass: usize) -> PathBuf {
    tmp_dir.join(format!("partitions_pass{pass}"))
}

/// Route one block of reads through the k-mer model into a spill sink.
fn spill_records<W: KmerWord>(
    records: &[SequenceRecord],
    model: &KmerModel<W>,
    nb_passes: u64,
    pass: u64,
    nb_partitions: u64,
    mut sink: impl FnMut(usize, W) -> Result<()>,
) -> Result<()> {
    for record in records {
        for kmer in model.kmers_of(&record.nucleotides) {
            let hash = model.hash(kmer);
            if hash % nb_passes != pass {
                continue;
            }
            sink(((hash / nb_passes) % nb_partitions) as usize, kmer)?;
        }
    }
    Ok(())
}

/// Spill the pass's share of k-mers into the partition set. Reads are
/// pulled in blocks and distributed over rayon workers, each with its own
/// partition cache so threads only meet on flush locks. With
/// `sorted_spill` the sorted cache variant is used instead and partitions
/// receive pre-sorted runs.
fn fill_partitions<W: KmerWord>(
    bank: &Bank,
    model: &KmerModel<W>,
    config: &CountConfig,
    set: &PartitionSet<W>,
    pass: usize,
    cancel: &CancellationToken,
    progress: &ProgressBar,
) -> Result<()> {
    let nb_passes = config.nb_passes as u64;
    let nb_partitions = config.nb_partitions as u64;
    let pass = pass as u64;
    let shared = config
        .sorted_spill
        .then(|| SharedSortedBuffers::new(config.nb_partitions, 4 * CACHE_ITEMS));

    let mut reads = FaultTolerantReads::new(bank.iterator()?, config.max_bad_ratio);
    let mut block: Vec<SequenceRecord> = Vec::with_capacity(SPILL_BLOCK_READS);
    loop {
        block.clear();
        for record in reads.by_ref() {
            block.push(record?);
            if block.len() >= SPILL_BLOCK_READS {
                break;
            }
        }
        if block.is_empty() {
            break;
        }
        if cancel.is_cancelled() {
            return Err(anyhow!(CoreError::Cancelled("partition fill".into())));
        }

        if let Some(shared) = &shared {
            block
                .par_chunks(64)
                .try_fold(
                    || SortedPartitionCache::new(set, shared),
                    |mut cache, records| -> Result<SortedPartitionCache<W>> {
                        spill_records(records, model, nb_passes, pass, nb_partitions, |p, k| {
                            cache.insert(p, k)
                        })?;
                        Ok(cache)
                    },
                )
                .try_for_each(|cache| -> Result<()> {
                    let mut cache = cache?;
                    cache.flush()
                })?;
        } else {
            block
                .par_chunks(64)
                .try_fold(
                    || PartitionCache::new(set),
                    |mut cache, records| -> Result<PartitionCache<W>> {
                        spill_records(records, model, nb_passes, pass, nb_partitions, |p, k| {
                            cache.insert(p, k)
                        })?;
                        Ok(cache)
                    },
                )
                .try_for_each(|cache| -> Result<()> {
                    let mut cache = cache?;
                    cache.flush()
                })?;
        }

        let block_bp: u64 = block.iter().map(|r| r.len() as u64).sum();
        progress.inc(block_bp);
    }

    if let Some(shared) = &shared {
        shared.drain(set)?;
    }
    if reads.nb_bad > 0 {
        debug!(
            "pass {}: skipped {} malformed record(s)",
            pass, reads.nb_bad
        );
    }
    set.flush()
}

/// Count every partition of the pass on the dispatcher, one task per
/// partition, and return the per-partition solid lists (sorted by
/// canonical k-mer) with the merged pass histogram.
#[allow(clippy::type_complexity)]
fn drain_partitions<W: KmerWord>(
    set: &PartitionSet<W>,
    config: &CountConfig,
    dispatcher: &Dispatcher,
    cancel: &CancellationToken,
    progress: &ProgressBar,
) -> Result<(Vec<Vec<KmerCount<W>>>, Histogram)> {
    let workers = config.nb_cores.min(config.nb_partitions).max(1);
    let budget_bytes = ((config.max_memory_mb * MB) / workers as u64) as usize;
    let abundance_min = config.abundance_min;
    let mode = config.partition_mode;

    let tasks: Vec<_> = (0..config.nb_partitions)
        .map(|index| {
            move || -> Result<(Vec<KmerCount<W>>, Histogram)> {
                let values = set.read(index)?;
                let nb_values = values.len() as u64;
                let out = count_partition(values, budget_bytes, mode, abundance_min)?;
                progress.inc(nb_values * W::BYTES as u64 / 2);
                Ok(out)
            }
        })
        .collect();

    let results = dispatcher.run(tasks, cancel)?;
    let mut histogram = Histogram::new();
    let mut per_partition = Vec::with_capacity(results.len());
    for (solids, partial) in results {
        histogram.merge(&partial);
        per_partition.push(solids);
    }
    Ok((per_partition, histogram))
}

/// Count one loaded partition. The returned solid list is sorted by
/// canonical k-mer and free of duplicates.
fn count_partition<W: KmerWord>(
    mut values: Vec<W>,
    budget_bytes: usize,
    mode: PartitionMode,
    abundance_min: u32,
) -> Result<(Vec<KmerCount<W>>, Histogram)> {
    let mut histogram = Histogram::new();
    let mut solids = Vec::new();

    let fits_budget = values.len() * W::BYTES <= budget_bytes;
    if mode != PartitionMode::Hash && fits_budget {
        values.sort_unstable();
        let mut run = values.iter().copied();
        if let Some(mut current) = run.next() {
            let mut count = 1u32;
            for kmer in run {
                if kmer == current {
                    count = count.saturating_add(1);
                } else {
                    emit(current, count, abundance_min, &mut histogram, &mut solids);
                    current = kmer;
                    count = 1;
                }
            }
            emit(current, count, abundance_min, &mut histogram, &mut solids);
        }
    } else {
        let mut pairs = Vec::new();
        hash_count(values, budget_bytes, 0, &mut pairs)?;
        pairs.sort_unstable_by_key(|&(kmer, _)| kmer);
        for (kmer, count) in pairs {
            emit(kmer, count, abundance_min, &mut histogram, &mut solids);
        }
    }

    Ok((solids, histogram))
}

fn emit<W: KmerWord>(
    kmer: W,
    count: u32,
    abundance_min: u32,
    histogram: &mut Histogram,
    solids: &mut Vec<KmerCount<W>>,
) {
    histogram.record(count);
    if count >= abundance_min {
        solids.push(KmerCount { kmer, count });
    }
}

/// Bounded hash counting. When the table would outgrow the budget the
/// values are split by fresh hash bits and each group is counted
/// recursively, which is equivalent to raising the partition count.
fn hash_count<W: KmerWord>(
    values: Vec<W>,
    budget_bytes: usize,
    depth: u32,
    out: &mut Vec<(W, u32)>,
) -> Result<()> {
    if depth > MAX_HASH_DEPTH {
        return Err(anyhow!(CoreError::ResourceExhausted(format!(
            "partition does not fit the memory budget after {MAX_HASH_DEPTH} splits"
        ))));
    }

    let entry_bytes = W::BYTES + 12;
    let max_entries = (budget_bytes / entry_bytes).max(1024);
    let mut map: AHashMap<W, u32> = AHashMap::with_capacity(max_entries.min(values.len()));
    let mut overflow = false;
    for &value in &values {
        match map.get_mut(&value) {
            Some(count) => *count = count.saturating_add(1),
            None => {
                if map.len() >= max_entries {
                    overflow = true;
                    break;
                }
                map.insert(value, 1);
            }
        }
    }

    if !overflow {
        out.extend(map);
        return Ok(());
    }

    drop(map);
    let mut groups: [Vec<W>; 4] = [Vec::new(), Vec::new(), Vec::new(), Vec::new()];
    for &value in &values {
        let slot = (mix64(value.hash64()) >> (2 * depth)) & 0b11;
        groups[slot as usize].push(value);
    }
    drop(values);
    for group in groups {
        if !group.is_empty() {
            hash_count(group, budget_bytes, depth + 1, out)?;
        }
    }
    Ok(())
}

fn stats_properties(config: &CountConfig, result: &CountResult) -> Properties {
    let mut props = Properties::new();
    props.add(0, "config", "");
    props.add(1, "kmer_size", config.kmer_size);
    props.add(1, "abundance_min", config.abundance_min);
    props.add(1, "nb_cores", config.nb_cores);
    props.add(1, "max_memory_mb", config.max_memory_mb);
    props.add(1, "max_disk_mb", config.max_disk_mb);
    props.add(1, "volume_mb", config.volume_mb);
    props.add(1, "nb_passes", config.nb_passes);
    props.add(1, "nb_partitions", config.nb_partitions);
    props.add(1, "sequence_number", config.estimate.nb_sequences);
    props.add(1, "sequence_volume_bp", config.estimate.total_bp);
    if let Some(distinct) = config.estimated_distinct {
        props.add(1, "estimated_nb_distinct_kmers", distinct);
    }
    props.add(0, "stats", "");
    props.add(1, "kmers_nb_distinct", result.nb_distinct);
    props.add(1, "kmers_nb_solid", result.nb_solid);
    props.add(1, "kmers_nb_weak", result.nb_distinct - result.nb_solid);
    props.add(1, "auto_cutoff", result.cutoff);
    props.add(1, "nb_solids_for_cutoff", result.nb_solids_for_cutoff);
    props
}
