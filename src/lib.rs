//! # GraphForge - K-mer Counting and De Bruijn Graph Toolkit
//!
//! Turns a stream of short DNA reads into a compact, queryable de Bruijn
//! graph on commodity hardware. Two subsystems do the heavy lifting: an
//! external multi-pass k-mer counter that adapts to memory and disk
//! budgets, and a unitig-based graph with membership, neighborhood,
//! simple-path and simplification queries.

pub mod bank;
pub mod core;
pub mod count;
pub mod dispatch;
pub mod graph;
pub mod membership;
pub mod storage;
pub mod util;

// Re-export the types most pipelines touch
pub use crate::bank::{Bank, BankEstimate};
pub use crate::core::{CoreError, KmerModel, KmerWord, SequenceRecord};
pub use crate::count::{
    configure, run_counting, CountConfig, CountOptions, CountResult, Histogram, KmerCount,
};
pub use crate::graph::{build::build_unitigs, simplify::simplify, UnitigGraph};
pub use crate::membership::{build_membership, Membership, MembershipConfig};
pub use crate::storage::Storage;

/// Result type used throughout the crate
pub type Result<T> = anyhow::Result<T>;

/// Error type used throughout the crate
pub type Error = anyhow::Error;
