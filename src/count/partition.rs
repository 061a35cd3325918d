//! Partitioned Spill Store
//! =======================
//!
//! N append-only on-disk bags of raw k-mer words, one per partition index.
//! Writers go through per-thread caches so that threads only serialize on
//! a partition's lock at flush time, never while buffering. Records are
//! fixed-width little-endian words; within a partition no ordering is
//! guaranteed and duplicates are preserved.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::{CoreError, KmerWord};

/// Items buffered per thread and per partition before a locked flush.
pub const CACHE_ITEMS: usize = 1 << 12;

struct PartitionFile {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    nb_items: AtomicU64,
}

/// The on-disk partition set for one counting pass.
pub struct PartitionSet<W: KmerWord> {
    dir: PathBuf,
    parts: Vec<PartitionFile>,
    _marker: std::marker::PhantomData<W>,
}

impl<W: KmerWord> PartitionSet<W> {
    /// Create `nb_partitions` empty partition files under `dir`.
    pub fn create(dir: impl AsRef<Path>, nb_partitions: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CoreError::io(format!("create partition dir {}", dir.display()), e))?;
        let mut parts = Vec::with_capacity(nb_partitions);
        for index in 0..nb_partitions {
            let path = dir.join(format!("part_{index:05}.bin"));
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .map_err(|e| CoreError::io(format!("create partition {}", path.display()), e))?;
            parts.push(PartitionFile {
                path,
                writer: Mutex::new(BufWriter::with_capacity(1 << 16, file)),
                nb_items: AtomicU64::new(0),
            });
        }
        Ok(Self {
            dir,
            parts,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn nb_partitions(&self) -> usize {
        self.parts.len()
    }

    /// Append a batch of raw words to one partition. Serializes on the
    /// partition's lock for the duration of the write only.
    pub fn insert_batch(&self, partition: usize, values: &[W]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let part = &self.parts[partition];
        let mut bytes = Vec::with_capacity(values.len() * W::BYTES);
        for &value in values {
            value.write_le(&mut bytes);
        }
        {
            let mut writer = part.writer.lock();
            writer
                .write_all(&bytes)
                .map_err(|e| CoreError::io(format!("spill to {}", part.path.display()), e))?;
        }
        part.nb_items.fetch_add(values.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Exact item count of a partition, valid once all writers have
    /// drained their caches.
    pub fn size(&self, partition: usize) -> u64 {
        self.parts[partition].nb_items.load(Ordering::Relaxed)
    }

    pub fn total_items(&self) -> u64 {
        (0..self.parts.len()).map(|p| self.size(p)).sum()
    }

    /// Flush all buffered writers to disk.
    pub fn flush(&self) -> Result<()> {
        for part in &self.parts {
            part.writer
                .lock()
                .flush()
                .map_err(|e| CoreError::io(format!("flush {}", part.path.display()), e))?;
        }
        Ok(())
    }

    /// Bulk-read every word previously inserted into a partition. The set
    /// must have been flushed first.
    pub fn read(&self, partition: usize) -> Result<Vec<W>> {
        let part = &self.parts[partition];
        let expected = part.nb_items.load(Ordering::Relaxed) as usize;
        let file = File::open(&part.path)
            .map_err(|e| CoreError::io(format!("open {}", part.path.display()), e))?;
        let mut reader = BufReader::with_capacity(1 << 20, file);
        let mut values = Vec::with_capacity(expected);
        let mut chunk = vec![0u8; W::BYTES * 4096];
        loop {
            let n = read_full(&mut reader, &mut chunk)
                .map_err(|e| CoreError::io(format!("read {}", part.path.display()), e))?;
            if n == 0 {
                break;
            }
            if n % W::BYTES != 0 {
                return Err(anyhow!(CoreError::Corruption(format!(
                    "partition {} holds a truncated record",
                    part.path.display()
                ))));
            }
            for record in chunk[..n].chunks_exact(W::BYTES) {
                values.push(W::read_le(record));
            }
        }
        if values.len() != expected {
            return Err(anyhow!(CoreError::Corruption(format!(
                "partition {} holds {} records, expected {expected}",
                part.path.display(),
                values.len()
            ))));
        }
        Ok(values)
    }

    /// Delete the backing files and directory.
    pub fn remove(self) -> Result<()> {
        for part in &self.parts {
            std::fs::remove_file(&part.path)
                .map_err(|e| CoreError::io(format!("remove {}", part.path.display()), e))?;
        }
        let _ = std::fs::remove_dir(&self.dir);
        Ok(())
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Per-thread write cache over a [`PartitionSet`].
///
/// Buffers up to [`CACHE_ITEMS`] words per partition and batch-inserts on
/// overflow, so concurrent writers contend only during flushes.
pub struct PartitionCache<'a, W: KmerWord> {
    set: &'a PartitionSet<W>,
    buffers: Vec<Vec<W>>,
}

impl<'a, W: KmerWord> PartitionCache<'a, W> {
    pub fn new(set: &'a PartitionSet<W>) -> Self {
        let buffers = (0..set.nb_partitions()).map(|_| Vec::new()).collect();
        Self { set, buffers }
    }

    pub fn insert(&mut self, partition: usize, value: W) -> Result<()> {
        let buffer = &mut self.buffers[partition];
        buffer.push(value);
        if buffer.len() >= CACHE_ITEMS {
            self.set.insert_batch(partition, buffer)?;
            buffer.clear();
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for partition in 0..self.buffers.len() {
            if !self.buffers[partition].is_empty() {
                self.set.insert_batch(partition, &self.buffers[partition])?;
                self.buffers[partition].clear();
            }
        }
        Ok(())
    }
}

impl<W: KmerWord> Drop for PartitionCache<'_, W> {
    fn drop(&mut self) {
        // Cancelled runs still drain in-flight buffers.
        let _ = self.flush();
    }
}

/// Shared sorted buffers, one per partition, for the sorted cache variant.
pub struct SharedSortedBuffers<W: KmerWord> {
    shared: Vec<Mutex<Vec<W>>>,
    capacity: usize,
}

impl<W: KmerWord> SharedSortedBuffers<W> {
    pub fn new(nb_partitions: usize, capacity: usize) -> Self {
        Self {
            shared: (0..nb_partitions).map(|_| Mutex::new(Vec::new())).collect(),
            capacity,
        }
    }

    /// Sort and emit every remaining shared buffer. Call once after all
    /// thread caches have flushed.
    pub fn drain(&self, set: &PartitionSet<W>) -> Result<()> {
        for (partition, slot) in self.shared.iter().enumerate() {
            let mut buffer = slot.lock();
            if !buffer.is_empty() {
                buffer.sort_unstable();
                set.insert_batch(partition, &buffer)?;
                buffer.clear();
            }
        }
        Ok(())
    }
}

/// Sorted write cache: a per-thread buffer merged under lock into a shared
/// per-partition buffer, which is sorted and emitted on overflow. Emitted
/// runs are sorted; duplicates are preserved.
pub struct SortedPartitionCache<'a, W: KmerWord> {
    set: &'a PartitionSet<W>,
    shared: &'a SharedSortedBuffers<W>,
    local: Vec<Vec<W>>,
    local_capacity: usize,
}

impl<'a, W: KmerWord> SortedPartitionCache<'a, W> {
    pub fn new(set: &'a PartitionSet<W>, shared: &'a SharedSortedBuffers<W>) -> Self {
        Self {
            set,
            shared,
            local: (0..set.nb_partitions()).map(|_| Vec::new()).collect(),
            local_capacity: CACHE_ITEMS,
        }
    }

    pub fn insert(&mut self, partition: usize, value: W) -> Result<()> {
        self.local[partition].push(value);
        if self.local[partition].len() >= self.local_capacity {
            self.merge_into_shared(partition)?;
        }
        Ok(())
    }

    fn merge_into_shared(&mut self, partition: usize) -> Result<()> {
        let local = &mut self.local[partition];
        local.sort_unstable();
        let mut shared = self.shared.shared[partition].lock();
        // prepend the freshly sorted run
        shared.splice(0..0, local.drain(..));
        if shared.len() >= self.shared.capacity {
            shared.sort_unstable();
            self.set.insert_batch(partition, &shared)?;
            shared.clear();
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for partition in 0..self.local.len() {
            if !self.local[partition].is_empty() {
                self.merge_into_shared(partition)?;
            }
        }
        Ok(())
    }
}
