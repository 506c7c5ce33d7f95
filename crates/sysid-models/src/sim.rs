//! Discrete-time simulation of identified models.
//!
//! One shared per-sample pipeline drives all model kinds: a static
//! steady-state map, a first-order low-pass filter and a ring-buffer time
//! delay. Bad input samples are substituted with the last good value; each
//! contiguous bad gap counts as one restart on the returned result.

use ndarray::Array1;

use sysid_core::data::UnitDataset;

use crate::base::{GainSchedParameters, PidParameters, Result, UnitParameters};
use crate::error::IdentError;

/// Below this fraction of the sampling time, a time constant is treated as
/// zero and the low-pass filter passes through.
pub const TC_FILTER_CUTOFF_FACTOR: f64 = 0.4;

/// First-order low-pass filter with a per-call time constant.
#[derive(Debug, Clone)]
pub struct LowPass {
    time_base_s: f64,
    prev: Option<f64>,
}

impl LowPass {
    pub fn new(time_base_s: f64) -> Self {
        Self {
            time_base_s,
            prev: None,
        }
    }

    /// Filter one sample. The first sample initializes the state.
    pub fn filter(&mut self, value: f64, tc_s: f64) -> f64 {
        let a = if tc_s < TC_FILTER_CUTOFF_FACTOR * self.time_base_s {
            0.0
        } else {
            1.0 / (1.0 + self.time_base_s / tc_s)
        };
        let out = match self.prev {
            Some(prev) => a * prev + (1.0 - a) * value,
            None => value,
        };
        self.prev = Some(out);
        out
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

/// Integer-sample time delay. Passes input through until the buffer is
/// primed, then delays by exactly `n_samples`.
#[derive(Debug, Clone)]
pub struct DelayBuffer {
    buf: Vec<f64>,
    n_samples: usize,
    pos: usize,
}

impl DelayBuffer {
    pub fn new(n_samples: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n_samples),
            n_samples,
            pos: 0,
        }
    }

    pub fn delay(&mut self, value: f64) -> f64 {
        if self.n_samples == 0 {
            return value;
        }
        if self.buf.len() < self.n_samples {
            self.buf.push(value);
            return value;
        }
        let out = self.buf[self.pos];
        self.buf[self.pos] = value;
        self.pos = (self.pos + 1) % self.n_samples;
        out
    }
}

/// Output of a simulation run.
#[derive(Debug, Clone)]
pub struct SimResult {
    pub y_sim: Array1<f64>,
    /// Number of contiguous bad-input gaps bridged by holding the last
    /// good values
    pub n_restarts: usize,
}

/// Per-sample state shared by the unit and gain-scheduled simulators.
struct SimState {
    lowpass: LowPass,
    delay: DelayBuffer,
    last_good_u: Vec<f64>,
    in_bad_gap: bool,
    n_restarts: usize,
}

impl SimState {
    fn new(time_base_s: f64, time_delay_s: f64, u_init: Vec<f64>) -> Self {
        let delay_samples = (time_delay_s / time_base_s).round().max(0.0) as usize;
        Self {
            lowpass: LowPass::new(time_base_s),
            delay: DelayBuffer::new(delay_samples),
            last_good_u: u_init,
            in_bad_gap: false,
            n_restarts: 0,
        }
    }

    /// Substitute bad entries of the current input row with the last good
    /// values, tracking restarts.
    fn condition_inputs(&mut self, dataset: &UnitDataset, k: usize) {
        let mut any_bad = false;
        for i in 0..dataset.n_inputs() {
            let v = dataset.u()[[k, i]];
            if dataset.is_bad(v) {
                any_bad = true;
            } else {
                self.last_good_u[i] = v;
            }
        }
        if any_bad && !self.in_bad_gap {
            self.n_restarts += 1;
        }
        self.in_bad_gap = any_bad;
    }

    fn step(&mut self, x_static: f64, tc_s: f64) -> f64 {
        let x_dyn = self.lowpass.filter(x_static, tc_s);
        self.delay.delay(x_dyn)
    }
}

fn initial_inputs(model_u0: &[f64], dataset: &UnitDataset) -> Vec<f64> {
    match dataset.first_good_index() {
        Some(k) => (0..dataset.n_inputs()).map(|i| dataset.u()[[k, i]]).collect(),
        None => model_u0.to_vec(),
    }
}

fn check_input_count(model_inputs: usize, dataset: &UnitDataset) -> Result<()> {
    if model_inputs != dataset.n_inputs() {
        return Err(IdentError::InvalidConfig {
            message: format!(
                "model has {} inputs but dataset has {}",
                model_inputs,
                dataset.n_inputs()
            ),
        });
    }
    Ok(())
}

/// Simulate a unit model over a dataset. The dataset's disturbance, when
/// present, is added to the output. The dataset itself is not modified.
pub fn simulate_unit(model: &UnitParameters, dataset: &UnitDataset) -> Result<SimResult> {
    check_input_count(model.n_inputs(), dataset)?;
    let n = dataset.len();
    let mut state = SimState::new(
        dataset.time_base_s(),
        model.time_delay_s,
        initial_inputs(&model.u0, dataset),
    );
    let mut y_sim = Array1::zeros(n);
    for k in 0..n {
        state.condition_inputs(dataset, k);
        let x_static = model.steady_state_output(&state.last_good_u);
        let mut y = state.step(x_static, model.time_constant_s);
        if let Some(lo) = model.y_min {
            y = y.max(lo);
        }
        if let Some(hi) = model.y_max {
            y = y.min(hi);
        }
        if let Some(d) = dataset.d() {
            if !dataset.is_bad(d[k]) {
                y += d[k];
            }
        }
        y_sim[k] = y;
    }
    Ok(SimResult {
        y_sim,
        n_restarts: state.n_restarts,
    })
}

/// Simulate a gain-scheduled model over a dataset. The scheduling input
/// selects the gain set and time constant sample by sample.
pub fn simulate_gain_sched(
    model: &GainSchedParameters,
    dataset: &UnitDataset,
) -> Result<SimResult> {
    let n_inputs = dataset.n_inputs();
    if model.gain_sched_input_idx >= n_inputs {
        return Err(IdentError::InvalidConfig {
            message: format!(
                "scheduling input {} does not exist in a dataset with {} inputs",
                model.gain_sched_input_idx, n_inputs
            ),
        });
    }
    if model.linear_gains.len() != model.linear_gain_thresholds.len() + 1 {
        return Err(IdentError::InvalidConfig {
            message: format!(
                "{} gain sets for {} thresholds",
                model.linear_gains.len(),
                model.linear_gain_thresholds.len()
            ),
        });
    }
    let n = dataset.len();
    let mut state = SimState::new(
        dataset.time_base_s(),
        model.time_delay_s,
        initial_inputs(&model.u0, dataset),
    );
    let mut y_sim = Array1::zeros(n);
    for k in 0..n {
        state.condition_inputs(dataset, k);
        let u_sched = state.last_good_u[model.gain_sched_input_idx];
        let gains = &model.linear_gains[model.gain_index_for(u_sched)];
        let mut x_static = model.bias;
        for i in 0..n_inputs.min(gains.len()) {
            x_static +=
                gains[i] * (state.last_good_u[i] - model.u0.get(i).copied().unwrap_or(0.0));
        }
        let mut y = state.step(x_static, model.time_constant_for(u_sched));
        if let Some(d) = dataset.d() {
            if !dataset.is_bad(d[k]) {
                y += d[k];
            }
        }
        y_sim[k] = y;
    }
    Ok(SimResult {
        y_sim,
        n_restarts: state.n_restarts,
    })
}

/// Stateful discrete PI(D) controller in velocity form.
#[derive(Debug, Clone)]
pub struct Pid {
    params: PidParameters,
    time_base_s: f64,
    u: f64,
    prev_e: Option<f64>,
    prev_de: f64,
}

impl Pid {
    pub fn new(params: PidParameters, time_base_s: f64, u_init: f64) -> Self {
        Self {
            params,
            time_base_s,
            u: u_init,
            prev_e: None,
            prev_de: 0.0,
        }
    }

    /// One controller step; returns the new manipulated value.
    pub fn iterate(&mut self, y: f64, y_setpoint: f64) -> f64 {
        let e = y_setpoint - y;
        let de = e - self.prev_e.unwrap_or(e);
        let mut du = self.params.kp * de;
        if self.params.ti_s > 0.0 {
            du += self.params.kp * self.time_base_s / self.params.ti_s * e;
        }
        if self.params.td_s > 0.0 {
            du += self.params.kp * self.params.td_s / self.time_base_s * (de - self.prev_de);
        }
        self.u += du;
        if let Some(lo) = self.params.u_min {
            self.u = self.u.max(lo);
        }
        if let Some(hi) = self.params.u_max {
            self.u = self.u.min(hi);
        }
        self.prev_e = Some(e);
        self.prev_de = de;
        self.u
    }
}

/// Output of a closed-loop co-simulation.
#[derive(Debug, Clone)]
pub struct ClosedLoopSim {
    pub y_sim: Array1<f64>,
    /// The manipulated input produced by the controller
    pub u_sim: Array1<f64>,
}

/// Co-simulate a unit model in feedback with a PI(D) controller.
///
/// The controller drives input `pid_input_idx`; the remaining inputs are
/// taken from the dataset. `d`, when given, is added to the process output
/// before the controller sees it. The loop starts from the steady state
/// matching the first setpoint value.
pub fn simulate_closed_loop(
    model: &UnitParameters,
    pid: &PidParameters,
    dataset: &UnitDataset,
    pid_input_idx: usize,
    d: Option<&Array1<f64>>,
) -> Result<ClosedLoopSim> {
    check_input_count(model.n_inputs(), dataset)?;
    let y_setpoint = dataset
        .y_setpoint()
        .ok_or_else(|| IdentError::InvalidConfig {
            message: "closed-loop simulation requires a setpoint series".to_string(),
        })?;
    if pid_input_idx >= dataset.n_inputs() {
        return Err(IdentError::InvalidConfig {
            message: format!("pid input {pid_input_idx} does not exist"),
        });
    }
    let n = dataset.len();
    let mut u_row = initial_inputs(&model.u0, dataset);
    let y0 = y_setpoint[0];
    let d0 = d.map(|d| d[0]).unwrap_or(0.0);
    if let Some(u_ss) = model.steady_state_input(y0 - d0, pid_input_idx) {
        u_row[pid_input_idx] = u_ss;
    }
    let mut controller = Pid::new(pid.clone(), dataset.time_base_s(), u_row[pid_input_idx]);
    let mut state = SimState::new(dataset.time_base_s(), model.time_delay_s, u_row.clone());
    let mut y_sim = Array1::zeros(n);
    let mut u_sim = Array1::zeros(n);
    for k in 0..n {
        for i in 0..dataset.n_inputs() {
            if i != pid_input_idx {
                let v = dataset.u()[[k, i]];
                if !dataset.is_bad(v) {
                    u_row[i] = v;
                }
            }
        }
        let x_static = model.steady_state_output(&u_row);
        let mut y = state.step(x_static, model.time_constant_s);
        if let Some(d) = d {
            if !d[k].is_nan() {
                y += d[k];
            }
        }
        y_sim[k] = y;
        u_sim[k] = u_row[pid_input_idx];
        let y_set = if dataset.is_bad(y_setpoint[k]) {
            y0
        } else {
            y_setpoint[k]
        };
        u_row[pid_input_idx] = controller.iterate(y, y_set);
    }
    Ok(ClosedLoopSim { y_sim, u_sim })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    use super::*;

    fn step_dataset(n: usize, step_at: usize) -> UnitDataset {
        let u: Vec<f64> = (0..n).map(|k| if k < step_at { 0.0 } else { 1.0 }).collect();
        let u = Array2::from_shape_vec((n, 1), u).unwrap();
        UnitDataset::new(Array1::zeros(n), u, 1.0).unwrap()
    }

    fn gain_two_model() -> UnitParameters {
        UnitParameters {
            linear_gains: vec![2.0],
            u0: vec![0.0],
            u_norm: vec![1.0],
            bias: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn static_model_follows_step() {
        let ds = step_dataset(10, 5);
        let res = simulate_unit(&gain_two_model(), &ds).unwrap();
        assert_abs_diff_eq!(res.y_sim[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(res.y_sim[9], 3.0, epsilon = 1e-12);
        assert_eq!(res.n_restarts, 0);
    }

    #[test]
    fn delay_shifts_response() {
        let ds = step_dataset(12, 4);
        let mut model = gain_two_model();
        model.time_delay_s = 2.0;
        let res = simulate_unit(&model, &ds).unwrap();
        // step appears two samples later than in the input
        assert_abs_diff_eq!(res.y_sim[5], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(res.y_sim[6], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn time_constant_gives_exponential_approach() {
        let ds = step_dataset(200, 1);
        let mut model = gain_two_model();
        model.time_constant_s = 5.0;
        let res = simulate_unit(&model, &ds).unwrap();
        let a = 1.0 / (1.0 + 1.0 / 5.0);
        // one filter step after the input change
        assert_abs_diff_eq!(res.y_sim[1], a * 1.0 + (1.0 - a) * 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(res.y_sim[199], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn bad_inputs_hold_last_value_and_count_one_restart() {
        let n = 10;
        let mut u: Vec<f64> = vec![1.0; n];
        u[4] = f64::NAN;
        u[5] = f64::NAN;
        let u = Array2::from_shape_vec((n, 1), u).unwrap();
        let ds = UnitDataset::new(Array1::zeros(n), u, 1.0).unwrap();
        let res = simulate_unit(&gain_two_model(), &ds).unwrap();
        assert_abs_diff_eq!(res.y_sim[4], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(res.y_sim[5], 3.0, epsilon = 1e-12);
        assert_eq!(res.n_restarts, 1);
    }

    #[test]
    fn gain_sched_switches_gain_at_threshold() {
        let n = 11;
        let u: Vec<f64> = (0..n).map(|k| k as f64).collect();
        let u = Array2::from_shape_vec((n, 1), u).unwrap();
        let ds = UnitDataset::new(Array1::zeros(n), u, 1.0).unwrap();
        let model = GainSchedParameters {
            linear_gain_thresholds: vec![5.0],
            linear_gains: vec![vec![1.0], vec![3.0]],
            u0: vec![5.0],
            bias: 5.0,
            ..Default::default()
        };
        let res = simulate_gain_sched(&model, &ds).unwrap();
        // below threshold: slope 1 around (5, 5); above: slope 3
        assert_abs_diff_eq!(res.y_sim[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(res.y_sim[4], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(res.y_sim[8], 14.0, epsilon = 1e-12);
    }

    #[test]
    fn closed_loop_tracks_setpoint_change() {
        let n = 400;
        let ysp: Vec<f64> = (0..n).map(|k| if k < 50 { 10.0 } else { 12.0 }).collect();
        let ds = UnitDataset::new(Array1::zeros(n), Array2::zeros((n, 1)), 1.0)
            .unwrap()
            .with_setpoint(Array1::from_vec(ysp))
            .unwrap();
        let mut model = gain_two_model();
        model.bias = 0.0;
        let pid = PidParameters {
            kp: 0.2,
            ti_s: 10.0,
            ..Default::default()
        };
        let res = simulate_closed_loop(&model, &pid, &ds, 0, None).unwrap();
        assert_abs_diff_eq!(res.y_sim[0], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(res.y_sim[n - 1], 12.0, epsilon = 1e-3);
    }
}
