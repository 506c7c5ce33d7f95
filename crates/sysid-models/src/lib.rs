//! Identification of discrete-time, low-order process models
//!
//! Three identifiers built on a shared regression core:
//! open-loop unit models (first order plus delay, optional curvature),
//! closed-loop joint model/disturbance estimation, and gain-scheduled
//! piecewise-linear models. Simulation of all model types is included.

pub mod base;
pub mod error;
pub mod ident;
pub mod sim;

pub use base::{
    FitQuality, FittingSpecs, GainSchedParameters, PidParameters, Result, UnitParameters,
};
pub use error::IdentError;
