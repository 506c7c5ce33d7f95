//! Warning sum types attached to fitting results.
//!
//! Warnings are non-fatal: identification carries on and reports them on
//! the fitting-quality record for the caller to inspect.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Warnings from unit-model identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UnitWarning {
    /// The regression solver returned no usable solution
    #[error("regression problem failed to yield a solution")]
    RegressionFailedToYieldSolution,

    /// A solution was found but rejected as physically implausible
    #[error("not possible to identify a plausible model")]
    NotPossibleToIdentify,

    /// The delay search stopped at its upper bound
    #[error("time delay estimate stopped at the maximum constraint")]
    TimeDelayAtMaximumConstraint,

    /// The raw filter coefficient implied a non-causal model; clamped
    #[error("non-causal (negative) time constant clamped to zero")]
    NonCausalNegativeTimeConstant,

    /// The time constant exceeds the dataset time span
    #[error("time constant estimate larger than the dataset time span")]
    TimeConstantEstimateTooBig,

    /// An input has no excitation; its gain cannot be estimated
    #[error("an input is constant over the dataset")]
    ConstantInput,

    /// A regressor has (almost) no span; the problem is rank deficient
    #[error("regressor matrix is rank deficient")]
    RankDeficientRegressors,

    /// Bias re-estimation by simulation failed; regression bias kept
    #[error("bias re-estimation from simulation failed")]
    ReEstimateBiasFailed,

    /// The dynamic fit did not beat the static reference fit
    #[error("fell back to the linear static model")]
    FallbackToLinearStaticModel,

    /// Too few samples to support the expected dynamics
    #[error("dataset is very short compared to the expected time constant")]
    DataSetVeryShort,
}

/// Warnings from the integer time-delay search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TimeDelayWarning {
    /// The R-squared runner-up delay is not adjacent to the winner
    #[error("R-squared over candidate delays is not convex")]
    NonConvexRsquaredSolutionSpace,

    /// Winner and runner-up R-squared are within 0.1 of each other
    #[error("no unique R-squared minimum over candidate delays")]
    NoUniqueRsquaredMinimum,

    /// The objective-value runner-up delay is not adjacent to the winner
    #[error("objective value over candidate delays is not convex")]
    NonConvexObjectiveSolutionSpace,

    /// Winner and runner-up objective values are effectively tied
    #[error("no unique objective-value minimum over candidate delays")]
    NoUniqueObjectiveMinimum,

    /// One or more candidate-delay runs failed to identify
    #[error("some candidate-delay runs failed to find a solution")]
    SomeRunsFailedToFindSolution,
}

/// Warnings from gain-scheduled identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GainSchedWarning {
    /// A partition had too little scheduling-input excitation and was widened
    #[error("insufficient excitation in a partition; fitting window widened")]
    InsufficientExcitationInPartition,

    /// A partition fit failed; global linear gains substituted
    #[error("a sub-model failed to identify; global gains substituted")]
    SubModelFailedToIdentify,

    /// The global single-partition reference fit failed
    #[error("the global linear reference fit failed")]
    GlobalFitFailed,
}
