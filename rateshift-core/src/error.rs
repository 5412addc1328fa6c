//! Structured error types for the rateshift crates.

use thiserror::Error;

/// Unified error type for all rateshift operations.
#[derive(Debug, Error)]
pub enum RateShiftError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed Newick, malformed settings)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A segment row names an event index with no row in its event table.
    #[error("sample {sample}: event index {index} has no record ({available} events)")]
    MissingEvent {
        /// 0-based sample position.
        sample: usize,
        /// 1-based event index as stored in the segment table.
        index: usize,
        /// Number of rows in the sample's event table.
        available: usize,
    },

    /// Coarse segments for a node do not tile its branch.
    #[error("sample {sample}: segments for node {node} do not tile the branch: {reason}")]
    BadTiling {
        /// 0-based sample position.
        sample: usize,
        /// Owning node.
        node: usize,
        /// What went wrong.
        reason: String,
    },

    /// Settings failed validation.
    #[error("invalid settings: {0}")]
    Config(String),
}

/// Convenience alias used throughout the rateshift crates.
pub type Result<T> = std::result::Result<T, RateShiftError>;
