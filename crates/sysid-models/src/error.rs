//! Identification error types

use thiserror::Error;

use sysid_core::data::DataError;

/// Errors from identification and simulation routines.
///
/// These cover malformed calls only. Failure to identify a model from valid
/// data is not an error; it is reported on the returned fitting-quality
/// record together with warnings.
#[derive(Debug, Error)]
pub enum IdentError {
    /// Data-related error
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Numerical computation error
    #[error("Numerical error: {message} (operation: {operation})")]
    NumericalError {
        /// Error message
        message: String,
        /// Operation that failed
        operation: String,
    },

    /// Insufficient data for fitting
    #[error("Not enough data: {n_samples} samples for {n_predictors} predictors")]
    InsufficientData {
        /// Number of samples
        n_samples: usize,
        /// Number of predictors
        n_predictors: usize,
    },

    /// Singular matrix encountered
    #[error("Singular matrix encountered")]
    SingularMatrix,

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Configuration error message
        message: String,
    },
}
