//! Core value types: k-mer model, sequence records, typed errors.

pub mod error;
pub mod kmer;
pub mod sequence;

pub use error::CoreError;
pub use kmer::{base_to_code, code_to_base, mix64, CanonicalKmers, KmerModel, KmerWord};
pub use sequence::SequenceRecord;
