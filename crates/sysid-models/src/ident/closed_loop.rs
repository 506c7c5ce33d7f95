//! Joint identification of a unit model and an output disturbance from
//! closed-loop data.
//!
//! The model and the disturbance can only be estimated together: each
//! round re-estimates the disturbance with the best model so far, attaches
//! it to the dataset and re-identifies the model. The first round has no
//! model and fits statically from the disturbance estimator's rough gain;
//! later rounds fit dynamically with time-delay search.

use crate::base::{FittingSpecs, PidParameters, Result};
use crate::sim::simulate_unit;

use super::disturbance::{estimate_disturbance, DisturbanceEstimate};
use super::unit::{identify_linear, identify_linear_and_static, UnitModel};

/// Options for the closed-loop identification procedure.
#[derive(Debug, Clone)]
pub struct ClosedLoopOptions {
    /// Number of disturbance/model refinement rounds
    pub n_rounds: usize,
}

impl Default for ClosedLoopOptions {
    fn default() -> Self {
        Self { n_rounds: 3 }
    }
}

/// Result of closed-loop identification.
#[derive(Debug, Clone)]
pub struct ClosedLoopResult {
    /// The final round's model
    pub model: UnitModel,
    /// The final round's disturbance estimate
    pub disturbance: DisturbanceEstimate,
    /// (min, max) of the pid-input process gain over the rounds, a crude
    /// uncertainty band
    pub gain_range: (f64, f64),
}

/// Identify a unit model and the additive output disturbance acting on a
/// closed-loop dataset. `pid`, when known, lets the estimator separate
/// setpoint-driven movement from disturbances.
pub fn identify_closed_loop(
    dataset: &sysid_core::data::UnitDataset,
    pid: Option<&PidParameters>,
    pid_input_idx: usize,
    options: &ClosedLoopOptions,
) -> Result<ClosedLoopResult> {
    let specs = FittingSpecs::default();
    let n_rounds = options.n_rounds.max(1);
    let mut best_model: Option<UnitModel> = None;
    let mut last_disturbance: Option<DisturbanceEstimate> = None;
    let mut gain_lo = f64::INFINITY;
    let mut gain_hi = f64::NEG_INFINITY;

    for round in 0..n_rounds {
        let reference = best_model
            .as_ref()
            .filter(|m| m.parameters.fitting.was_able_to_identify)
            .map(|m| &m.parameters);
        let disturbance = estimate_disturbance(dataset, reference, pid_input_idx, pid)?;
        let round_ds = dataset
            .clone()
            .with_disturbance(disturbance.d_est.clone())?;
        let model = if round == 0 {
            identify_linear_and_static(&round_ds, &specs)?
        } else {
            identify_linear(&round_ds, &specs)?
        };
        log::debug!(
            "closed-loop round {round}: able={} rsq_abs={:.2}",
            model.parameters.fitting.was_able_to_identify,
            model.parameters.fitting.rsq_abs
        );
        if model.parameters.fitting.was_able_to_identify {
            if let Some(&gain) = model.parameters.linear_gains.get(pid_input_idx) {
                gain_lo = gain_lo.min(gain);
                gain_hi = gain_hi.max(gain);
            }
            best_model = Some(model);
        } else if best_model.is_none() {
            best_model = Some(model);
        }
        last_disturbance = Some(disturbance);
    }

    // defaults only reachable with n_rounds == 0, which is clamped away
    let mut model = best_model.unwrap_or(UnitModel {
        parameters: Default::default(),
        y_sim: None,
    });
    let disturbance = match last_disturbance {
        Some(d) => d,
        None => estimate_disturbance(dataset, None, pid_input_idx, pid)?,
    };
    if model.parameters.fitting.was_able_to_identify && model.y_sim.is_none() {
        let sim_ds = dataset
            .clone()
            .with_disturbance(disturbance.d_est.clone())?;
        model.y_sim = Some(simulate_unit(&model.parameters, &sim_ds)?.y_sim);
    }
    if !gain_lo.is_finite() {
        gain_lo = 0.0;
        gain_hi = 0.0;
    }
    Ok(ClosedLoopResult {
        model,
        disturbance,
        gain_range: (gain_lo, gain_hi),
    })
}
