//! External k-mer counting: configuration, spill partitions, histogram,
//! cardinality estimation and the multi-pass driver.

pub mod cardinality;
pub mod config;
pub mod driver;
pub mod histogram;
pub mod partition;

pub use config::{configure, CountConfig, CountOptions, PartitionMode};
pub use driver::{run_counting, CountResult, KmerCount};
pub use histogram::{Histogram, HistogramEntry, H_MAX};
pub use partition::{PartitionCache, PartitionSet, SharedSortedBuffers, SortedPartitionCache};
