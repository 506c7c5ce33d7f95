//! Core data structures for process identification
//!
//! This crate provides the sampled-dataset type and the bad-value-aware
//! vector utilities shared by all identification algorithms in SysId.

pub mod data;

pub use data::{DataError, UnitDataset};
