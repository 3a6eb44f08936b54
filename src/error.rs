//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.
//!
//! Two kinds are fatal: a per-sample structural inconsistency (the
//! caller keeps that sample's unphased default) and a stale prefix index (a
//! programming error that aborts the run). Too few neighbours is not an error at all.

use thiserror::Error;

/// Main error type for rephase operations
#[derive(Error, Debug)]
pub enum PhaseError {
    /// A segment's state set became empty, or a phase-set constraint cannot be
    /// satisfied against the observed calls.
    #[error("Structural inconsistency in sample {sample}: {message}")]
    StructuralInconsistency { sample: u32, message: String },

    /// Neighbour query against a prefix index built from another matrix version
    #[error("Stale prefix index: built from matrix version {built}, matrix is at version {current}")]
    StaleIndex { built: u64, current: u64 },

    /// Invalid data errors (length mismatches, sites out of range)
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Configuration errors (invalid CLI arguments or model parameters)
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Type alias for Results using PhaseError
pub type Result<T> = std::result::Result<T, PhaseError>;

impl PhaseError {
    /// Create a structural inconsistency error for a sample
    pub fn structural(sample: u32, message: impl Into<String>) -> Self {
        Self::StructuralInconsistency {
            sample,
            message: message.into(),
        }
    }

    /// Create an invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the error only invalidates the current sample's pass
    pub fn is_sample_local(&self) -> bool {
        matches!(self, Self::StructuralInconsistency { .. })
    }
}
