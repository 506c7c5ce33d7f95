//! Identification algorithms
//!
//! A shared least-squares regression core, the open-loop unit-model
//! identifier with its sequential time-delay search, the closed-loop
//! joint model/disturbance identifier and the gain-scheduled identifier.

mod closed_loop;
mod delay;
mod disturbance;
mod gain_sched;
mod regression;
mod reparam;
mod unit;

#[cfg(test)]
mod tests;

// Re-exports
pub use closed_loop::{identify_closed_loop, ClosedLoopOptions, ClosedLoopResult};
pub use disturbance::{
    estimate_disturbance, DisturbanceEstimate, DisturbanceZeroReason,
};
pub use gain_sched::{
    identify_gain_sched, identify_gain_sched_for_thresholds, GainSchedOptions,
};
pub use regression::{solve_regression, RegressionResults, RegressionWarning};
pub use unit::{
    identify, identify_linear, identify_linear_and_static, identify_static, UnitModel,
};
