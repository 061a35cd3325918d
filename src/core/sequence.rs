//! Sequence records produced by bank iterators.

/// One read: identifier, nucleotides, optional per-base quality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub id: String,
    pub nucleotides: Vec<u8>,
    pub quality: Option<Vec<u8>>,
}

impl SequenceRecord {
    pub fn new(id: impl Into<String>, nucleotides: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            nucleotides: nucleotides.into(),
            quality: None,
        }
    }

    pub fn with_quality(
        id: impl Into<String>,
        nucleotides: impl Into<Vec<u8>>,
        quality: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            nucleotides: nucleotides.into(),
            quality: Some(quality.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.nucleotides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nucleotides.is_empty()
    }
}
