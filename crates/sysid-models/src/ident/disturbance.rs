//! Estimation of an additive output disturbance from closed-loop data.
//!
//! Feedback control counteracts output disturbances, so the disturbance
//! signature is split between the control error and the manipulated input.
//! The estimate combines a high-frequency part taken directly from the
//! control error with a low-frequency part recovered by running the
//! process model over the manipulated input:
//! `d = (y_meas − y_set) − (y_sim − y_sim[first_good])`.

use ndarray::{Array1, Array2};

use sysid_core::data::{min_max_ignoring, UnitDataset};

use crate::base::{PidParameters, Result, UnitParameters};
use crate::error::IdentError;
use crate::sim::{simulate_closed_loop, simulate_unit, LowPass};

/// Low-pass time constant applied to the error and input signals before
/// the rough gain estimate; zero disables the filtering.
const GAIN_ESTIMATE_FILTER_TC_S: f64 = 0.0;

/// Below this setpoint span, the setpoint is treated as constant.
const SETPOINT_SPAN_TINY: f64 = 1e-9;

/// Why a disturbance estimate came back all zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisturbanceZeroReason {
    /// The dataset has no setpoint series
    NoSetpoint,
    /// No sample had all signals good
    AllDataBad,
    /// The manipulated input has no span; no gain estimate possible
    UnableToEstimateGain,
}

/// An estimated additive output disturbance.
#[derive(Debug, Clone)]
pub struct DisturbanceEstimate {
    /// Total estimate, `d_hf + d_lf`
    pub d_est: Array1<f64>,
    /// High-frequency component, taken from the control error
    pub d_hf: Array1<f64>,
    /// Low-frequency component, recovered through the process model
    pub d_lf: Array1<f64>,
    /// The process gain the estimate was built with
    pub est_process_gain: f64,
    pub is_all_zero: bool,
    pub zero_reason: Option<DisturbanceZeroReason>,
}

impl DisturbanceEstimate {
    fn all_zero(n: usize, reason: DisturbanceZeroReason) -> Self {
        Self {
            d_est: Array1::zeros(n),
            d_hf: Array1::zeros(n),
            d_lf: Array1::zeros(n),
            est_process_gain: 0.0,
            is_all_zero: true,
            zero_reason: Some(reason),
        }
    }
}

/// Estimate the additive output disturbance of a closed-loop dataset.
///
/// With no model given, a static reference model is built from a rough
/// gain estimate: sign from comparing the mean manipulated input over
/// positive-error and negative-error samples, magnitude from
/// `max|e| / (max u − min u)`. When the setpoint moves and the controller
/// parameters are known, setpoint effects are removed first by
/// co-simulating the loop without disturbance.
pub fn estimate_disturbance(
    dataset: &UnitDataset,
    unit_model: Option<&UnitParameters>,
    pid_input_idx: usize,
    pid: Option<&PidParameters>,
) -> Result<DisturbanceEstimate> {
    let n = dataset.len();
    if pid_input_idx >= dataset.n_inputs() {
        return Err(IdentError::InvalidConfig {
            message: format!("pid input {pid_input_idx} does not exist"),
        });
    }
    let Some(y_setpoint) = dataset.y_setpoint() else {
        return Ok(DisturbanceEstimate::all_zero(
            n,
            DisturbanceZeroReason::NoSetpoint,
        ));
    };
    let Some(first_good) = dataset.first_good_index() else {
        return Ok(DisturbanceEstimate::all_zero(
            n,
            DisturbanceZeroReason::AllDataBad,
        ));
    };

    let y_meas = dataset.y_meas();
    let u_pid = dataset.u().column(pid_input_idx).to_owned();

    // reference model: the supplied one, or a static stand-in from the
    // rough gain estimate
    let reference = match unit_model {
        Some(model) => model.clone(),
        None => {
            let Some(gain) = rough_gain_estimate(dataset, y_setpoint, &u_pid) else {
                return Ok(DisturbanceEstimate::all_zero(
                    n,
                    DisturbanceZeroReason::UnableToEstimateGain,
                ));
            };
            let mut gains = vec![0.0; dataset.n_inputs()];
            gains[pid_input_idx] = gain;
            UnitParameters {
                linear_gains: gains,
                u0: (0..dataset.n_inputs())
                    .map(|i| dataset.u()[[first_good, i]])
                    .collect(),
                u_norm: vec![1.0; dataset.n_inputs()],
                bias: y_meas[first_good],
                ..Default::default()
            }
        }
    };
    let est_process_gain = reference
        .linear_gains
        .get(pid_input_idx)
        .copied()
        .unwrap_or(0.0);

    // remove setpoint-driven movement from y and u when possible
    let setpoint_varies = match min_max_ignoring(y_setpoint.view(), dataset.bad_value()) {
        Some((lo, hi)) => hi - lo > SETPOINT_SPAN_TINY,
        None => false,
    };
    let mut y_adj = y_meas.clone();
    let mut u_adj = u_pid.clone();
    let mut y_set_adj = y_setpoint.clone();
    if setpoint_varies {
        match pid {
            Some(pid) => {
                let cosim_ds = held_externals_dataset(dataset, pid_input_idx, first_good)?;
                let cosim =
                    simulate_closed_loop(&reference, pid, &cosim_ds, pid_input_idx, None)?;
                let y_anchor = cosim.y_sim[first_good];
                let u_anchor = cosim.u_sim[first_good];
                for k in 0..n {
                    y_adj[k] -= cosim.y_sim[k] - y_anchor;
                    u_adj[k] -= cosim.u_sim[k] - u_anchor;
                }
                y_set_adj.fill(y_setpoint[first_good]);
            }
            None => {
                log::warn!(
                    "setpoint moves but controller parameters are unknown; \
                     setpoint effects stay in the disturbance estimate"
                );
            }
        }
    }

    // model response to the (adjusted) manipulated input
    let mut u_open = dataset.u().clone();
    for k in 0..n {
        u_open[[k, pid_input_idx]] = u_adj[k];
    }
    let open_ds = UnitDataset::new(y_meas.clone(), u_open, dataset.time_base_s())?
        .with_bad_value(dataset.bad_value());
    let y_sim = simulate_unit(&reference, &open_ds)?.y_sim;

    let mut d_hf = Array1::zeros(n);
    let mut d_lf = Array1::zeros(n);
    for k in 0..n {
        if !dataset.is_bad(y_adj[k]) && !dataset.is_bad(y_set_adj[k]) {
            d_hf[k] = y_adj[k] - y_set_adj[k];
        }
        d_lf[k] = -(y_sim[k] - y_sim[first_good]);
    }
    let d_est = &d_hf + &d_lf;

    Ok(DisturbanceEstimate {
        d_est,
        d_hf,
        d_lf,
        est_process_gain,
        is_all_zero: false,
        zero_reason: None,
    })
}

/// Rough process-gain estimate from the control error and the manipulated
/// input: sign from which side of zero error sees the higher input,
/// magnitude from `max|e| / (max u − min u)`.
fn rough_gain_estimate(
    dataset: &UnitDataset,
    y_setpoint: &Array1<f64>,
    u_pid: &Array1<f64>,
) -> Option<f64> {
    let n = dataset.len();
    let mut e_filter = LowPass::new(dataset.time_base_s());
    let mut u_filter = LowPass::new(dataset.time_base_s());
    let mut max_abs_e = 0.0f64;
    let mut u_lo = f64::INFINITY;
    let mut u_hi = f64::NEG_INFINITY;
    let mut u_sum_e_pos = 0.0;
    let mut n_e_pos = 0usize;
    let mut u_sum_e_neg = 0.0;
    let mut n_e_neg = 0usize;
    for k in 0..n {
        let y = dataset.y_meas()[k];
        let ysp = y_setpoint[k];
        let u = u_pid[k];
        if dataset.is_bad(y) || dataset.is_bad(ysp) || dataset.is_bad(u) {
            continue;
        }
        let e = e_filter.filter(y - ysp, GAIN_ESTIMATE_FILTER_TC_S);
        let uf = u_filter.filter(u, GAIN_ESTIMATE_FILTER_TC_S);
        max_abs_e = max_abs_e.max(e.abs());
        u_lo = u_lo.min(uf);
        u_hi = u_hi.max(uf);
        if e >= 0.0 {
            u_sum_e_pos += u;
            n_e_pos += 1;
        }
        if e <= 0.0 {
            u_sum_e_neg += u;
            n_e_neg += 1;
        }
    }
    let span = u_hi - u_lo;
    if !span.is_finite() || span <= 0.0 || max_abs_e == 0.0 {
        return None;
    }
    let sign = if n_e_pos == 0 || n_e_neg == 0 {
        1.0
    } else if u_sum_e_neg / n_e_neg as f64 >= u_sum_e_pos / n_e_pos as f64 {
        1.0
    } else {
        -1.0
    };
    Some(sign * max_abs_e / span)
}

/// Copy of the dataset with every non-pid input held at its value at
/// `first_good`, for co-simulating the setpoint response alone.
fn held_externals_dataset(
    dataset: &UnitDataset,
    pid_input_idx: usize,
    first_good: usize,
) -> Result<UnitDataset> {
    let n = dataset.len();
    let mut u = Array2::zeros((n, dataset.n_inputs()));
    for i in 0..dataset.n_inputs() {
        let held = dataset.u()[[first_good, i]];
        for k in 0..n {
            u[[k, i]] = if i == pid_input_idx {
                dataset.u()[[k, i]]
            } else {
                held
            };
        }
    }
    let mut ds = UnitDataset::new(dataset.y_meas().clone(), u, dataset.time_base_s())?
        .with_bad_value(dataset.bad_value());
    if let Some(ysp) = dataset.y_setpoint() {
        ds = ds.with_setpoint(ysp.clone())?;
    }
    Ok(ds)
}
