//! Sampled process data
//!
//! This module provides the immutable dataset consumed by the identifiers,
//! along with index-set and vector utilities that treat a configurable
//! bad-value sentinel (and NaN) as missing data.

mod dataset;
mod index;
mod stats;

#[cfg(test)]
mod tests;

// Re-exports
pub use dataset::UnitDataset;
pub use index::{append_trailing_indices, find_bad_indices, shift_indices, union_indices};
pub use stats::{
    diff, mean_ignoring, min_max_ignoring, r_squared, round_to_significant_digits,
    sum_abs_err, sum_square_err,
};

// Type aliases for common use cases
pub type FloatArray = ndarray::Array1<f64>;
pub type FloatMatrix = ndarray::Array2<f64>;

/// Error types specific to data operations
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("Index out of bounds: index {index}, length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Input column {0} does not exist")]
    NoSuchInput(usize),

    #[error("Dataset is empty")]
    EmptyDataset,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for data operations
pub type Result<T> = std::result::Result<T, DataError>;
