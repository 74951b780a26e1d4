//! Error types for annopipe
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//!
//! Configuration problems (wrong input model type, plugin channel mismatch and
//! the like) are deliberately not represented here: the object that hit them
//! stays constructible for inspection, reporting `is_ok() == false` and a
//! human-readable `message()` instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for annopipe
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio decoding errors (general)
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// A file-level operation (open, probe, create) failed
    #[error("File operation failed: {path}: {operation}")]
    FileOperationFailed {
        path: PathBuf,
        operation: String,
    },

    /// Disc filled up while writing the decode cache
    #[error("Insufficient disc space in {}", directory.display())]
    InsufficientDiscSpace {
        directory: PathBuf,
    },

    /// Allocation of a derived model failed
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// Resampler construction failure
    #[error("Resampler init failed: {source_rate}Hz -> {target_rate}Hz: {message}")]
    ResamplerInitFailed {
        source_rate: f64,
        target_rate: f64,
        message: String,
    },

    /// Resampler runtime error
    #[error("Resampling runtime error: {0}")]
    Resample(String),

    /// Cache file write/finalise error other than disc exhaustion
    #[error("Cache write error: {0}")]
    CacheWrite(String),

    /// Operation attempted in an invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Remote file retrieval failure
    #[error("Retrieval failed for {url}: {message}")]
    Retrieval {
        url: String,
        message: String,
    },
}

/// Convenience Result type using annopipe Error
pub type Result<T> = std::result::Result<T, Error>;
