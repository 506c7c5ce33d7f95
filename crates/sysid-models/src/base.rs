//! Model parameter types and fitting metadata
//!
//! This module defines the parameter structs produced by the identifiers,
//! the fitting-quality record attached to them, and the warning sum types.

// Re-export core types
pub use fitting::{FitQuality, FittingSpecs};
pub use gain_sched::GainSchedParameters;
pub use pid::PidParameters;
pub use unit::UnitParameters;
pub use warnings::{GainSchedWarning, TimeDelayWarning, UnitWarning};

pub use crate::error::IdentError;

pub mod fitting;
pub mod gain_sched;
pub mod pid;
pub mod unit;
pub mod warnings;

/// Result type for identification operations
pub type Result<T> = std::result::Result<T, IdentError>;
