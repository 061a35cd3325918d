//! Typed errors used at phase boundaries.
//!
//! Per-record problems (a malformed read, a bad quality line) are counted,
//! not raised; these kinds cover the failures that abort a phase.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error during {action}: {source}")]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("format error: {0}")]
    Format(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("operation cancelled during {0}")]
    Cancelled(String),

    #[error("{} worker(s) failed: {}", .0.len(), .0.join("; "))]
    Composite(Vec<String>),
}

impl CoreError {
    pub fn io(action: impl Into<String>, source: std::io::Error) -> Self {
        CoreError::Io {
            action: action.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_lists_all_failures() {
        let err = CoreError::Composite(vec!["partition 3: boom".into(), "partition 7: oom".into()]);
        let text = err.to_string();
        assert!(text.contains("2 worker(s)"));
        assert!(text.contains("partition 3"));
        assert!(text.contains("partition 7"));
    }
}
