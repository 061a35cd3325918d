//! Sequence Banks
//! ==============
//!
//! Read-only access to sequencing input: FASTA and FASTQ, plain or gzipped,
//! plus `album` files that list several sub-banks. The counting pipeline
//! consumes only three operations: `iterator()`, `estimate()` and
//! `nb_items()`; it never introspects formats.

use anyhow::{anyhow, Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::core::{CoreError, SequenceRecord};

/// Number of records read before extrapolating an estimate from file size.
const ESTIMATE_SAMPLE: u64 = 5_000;

/// Assumed compression ratio when extrapolating through a gzip stream.
const GZ_RATIO: u64 = 4;

/// Bank size estimate: sequence count, total base pairs, longest sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BankEstimate {
    pub nb_sequences: u64,
    pub total_bp: u64,
    pub max_len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankFormat {
    Fasta,
    Fastq,
    Album,
}

/// A sequencing input resolved to a concrete format.
#[derive(Debug, Clone)]
pub struct Bank {
    path: PathBuf,
    format: BankFormat,
    gzipped: bool,
}

impl Bank {
    /// Open a bank, resolving the format from the extension and falling
    /// back to content probing (`>` vs `@`) for unknown extensions.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(CoreError::io(
                format!("open bank {}", path.display()),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )
            .into());
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let gzipped = name.ends_with(".gz");
        let stem = name.strip_suffix(".gz").unwrap_or(&name);

        let format = if stem.ends_with(".fa") || stem.ends_with(".fasta") || stem.ends_with(".fna")
        {
            BankFormat::Fasta
        } else if stem.ends_with(".fq") || stem.ends_with(".fastq") {
            BankFormat::Fastq
        } else if stem.ends_with(".album") || stem.ends_with(".txt") {
            BankFormat::Album
        } else {
            probe_format(&path, gzipped)?
        };

        Ok(Self {
            path,
            format,
            gzipped,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> BankFormat {
        self.format
    }

    fn reader(&self) -> Result<Box<dyn BufRead + Send>> {
        let file = File::open(&self.path)
            .map_err(|e| CoreError::io(format!("open {}", self.path.display()), e))?;
        if self.gzipped {
            Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
        } else {
            Ok(Box::new(BufReader::new(file)))
        }
    }

    /// Lazy iterator over records. Malformed records surface as errors so
    /// the consumer can count and skip them.
    pub fn iterator(&self) -> Result<Box<dyn Iterator<Item = Result<SequenceRecord>> + Send>> {
        match self.format {
            BankFormat::Fasta => {
                let records = bio::io::fasta::Reader::from_bufread(self.reader()?).records();
                Ok(Box::new(records.map(|r| match r {
                    Ok(rec) => Ok(SequenceRecord::new(rec.id(), rec.seq())),
                    Err(e) => Err(anyhow!(CoreError::Format(format!("bad FASTA record: {e}")))),
                })))
            }
            BankFormat::Fastq => {
                let records = bio::io::fastq::Reader::from_bufread(self.reader()?).records();
                Ok(Box::new(records.map(|r| match r {
                    Ok(rec) => Ok(SequenceRecord::with_quality(rec.id(), rec.seq(), rec.qual())),
                    Err(e) => Err(anyhow!(CoreError::Format(format!("bad FASTQ record: {e}")))),
                })))
            }
            BankFormat::Album => {
                let banks = self.album_members()?;
                let iter = banks
                    .into_iter()
                    .map(|bank| bank.iterator())
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .flatten();
                Ok(Box::new(iter))
            }
        }
    }

    /// Estimate sequence count, total bp and maximum length from a bounded
    /// prefix of the bank, extrapolated by file size.
    pub fn estimate(&self) -> Result<BankEstimate> {
        if self.format == BankFormat::Album {
            let mut total = BankEstimate::default();
            for bank in self.album_members()? {
                let sub = bank.estimate()?;
                total.nb_sequences += sub.nb_sequences;
                total.total_bp += sub.total_bp;
                total.max_len = total.max_len.max(sub.max_len);
            }
            return Ok(total);
        }

        let mut seen = BankEstimate::default();
        let mut sampled_bytes = 0u64;
        for record in self.iterator()? {
            let record = match record {
                Ok(r) => r,
                Err(_) => continue,
            };
            seen.nb_sequences += 1;
            seen.total_bp += record.len() as u64;
            seen.max_len = seen.max_len.max(record.len() as u64);
            // id line + sequence line (+ separator and quality for fastq)
            sampled_bytes += record.id.len() as u64 + record.len() as u64 + 4;
            if record.quality.is_some() {
                sampled_bytes += record.len() as u64 + 2;
            }
            if seen.nb_sequences >= ESTIMATE_SAMPLE {
                break;
            }
        }

        if seen.nb_sequences < ESTIMATE_SAMPLE || sampled_bytes == 0 {
            return Ok(seen);
        }

        let mut file_size = std::fs::metadata(&self.path)
            .map_err(|e| CoreError::io(format!("stat {}", self.path.display()), e))?
            .len();
        if self.gzipped {
            file_size *= GZ_RATIO;
        }
        let ratio = (file_size as f64 / sampled_bytes as f64).max(1.0);
        Ok(BankEstimate {
            nb_sequences: (seen.nb_sequences as f64 * ratio) as u64,
            total_bp: (seen.total_bp as f64 * ratio) as u64,
            max_len: seen.max_len,
        })
    }

    /// Number of sequences, from the estimate. Exact for banks smaller than
    /// the sampling bound; a sizing hint otherwise.
    pub fn nb_items(&self) -> Result<u64> {
        Ok(self.estimate()?.nb_sequences)
    }

    fn album_members(&self) -> Result<Vec<Bank>> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| CoreError::io(format!("read album {}", self.path.display()), e))?;
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut members = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let sub = if Path::new(line).is_absolute() {
                PathBuf::from(line)
            } else {
                base.join(line)
            };
            let bank = Bank::open(&sub)
                .with_context(|| format!("album member {} in {}", line, self.path.display()))?;
            if bank.format == BankFormat::Album {
                return Err(anyhow!(CoreError::Format(format!(
                    "nested album {} not supported",
                    sub.display()
                ))));
            }
            members.push(bank);
        }
        if members.is_empty() {
            return Err(anyhow!(CoreError::Format(format!(
                "album {} lists no banks",
                self.path.display()
            ))));
        }
        Ok(members)
    }
}

fn probe_format(path: &Path, gzipped: bool) -> Result<BankFormat> {
    let file =
        File::open(path).map_err(|e| CoreError::io(format!("probe {}", path.display()), e))?;
    let mut reader: Box<dyn Read> = if gzipped {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut head = [0u8; 256];
    let n = reader
        .read(&mut head)
        .map_err(|e| CoreError::io(format!("probe {}", path.display()), e))?;
    for &byte in &head[..n] {
        if byte.is_ascii_whitespace() {
            continue;
        }
        return match byte {
            b'>' => Ok(BankFormat::Fasta),
            b'@' => Ok(BankFormat::Fastq),
            _ => Err(anyhow!(CoreError::Format(format!(
                "unrecognized bank format for {}",
                path.display()
            )))),
        };
    }
    Err(anyhow!(CoreError::Format(format!(
        "empty bank {}",
        path.display()
    ))))
}

/// Wraps a record iterator, skipping malformed records up to a tolerated
/// ratio before escalating to a fatal format error.
pub struct FaultTolerantReads {
    inner: Box<dyn Iterator<Item = Result<SequenceRecord>> + Send>,
    max_bad_ratio: f64,
    pub nb_good: u64,
    pub nb_bad: u64,
}

impl FaultTolerantReads {
    pub fn new(
        inner: Box<dyn Iterator<Item = Result<SequenceRecord>> + Send>,
        max_bad_ratio: f64,
    ) -> Self {
        Self {
            inner,
            max_bad_ratio,
            nb_good: 0,
            nb_bad: 0,
        }
    }
}

impl Iterator for FaultTolerantReads {
    type Item = Result<SequenceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(record) => {
                    self.nb_good += 1;
                    return Some(Ok(record));
                }
                Err(err) => {
                    self.nb_bad += 1;
                    let total = self.nb_good + self.nb_bad;
                    if total >= 100 && self.nb_bad as f64 > self.max_bad_ratio * total as f64 {
                        return Some(Err(anyhow!(CoreError::Format(format!(
                            "{} of {} records malformed, last: {err}",
                            self.nb_bad, total
                        )))));
                    }
                    warn!("skipping malformed record: {err}");
                }
            }
        }
    }
}
