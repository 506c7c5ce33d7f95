//! Parameters of the first-order-plus-delay unit model.

use serde::{Deserialize, Serialize};

use super::fitting::FitQuality;

/// Parameters of a first-order-plus-delay process model with optional
/// second-order (curvature) input terms.
///
/// The steady-state map is
/// `y = bias + Σ gains[i]·(u[i] − u0[i]) + Σ curvatures[i]·(u[i] − u0[i])²/u_norm[i]`
/// low-pass filtered with `time_constant_s` and delayed by `time_delay_s`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitParameters {
    pub time_delay_s: f64,
    pub time_constant_s: f64,
    /// 95 % confidence half-width of the time constant, when available
    pub time_constant_unc_s: Option<f64>,
    /// Steady-state gain per input
    pub linear_gains: Vec<f64>,
    /// 95 % confidence half-widths of the gains, when available
    pub linear_gain_unc: Option<Vec<f64>>,
    /// Curvature per input; zero entries for inputs fitted linear-only
    pub curvatures: Option<Vec<f64>>,
    pub curvature_unc: Option<Vec<f64>>,
    /// Operating point per input
    pub u0: Vec<f64>,
    /// Normalization span per input for the curvature terms
    pub u_norm: Vec<f64>,
    pub bias: f64,
    pub bias_unc: Option<f64>,
    /// Output clamp applied during simulation, when set
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    pub fitting: FitQuality,
}

impl Default for UnitParameters {
    fn default() -> Self {
        Self {
            time_delay_s: 0.0,
            time_constant_s: 0.0,
            time_constant_unc_s: None,
            linear_gains: Vec::new(),
            linear_gain_unc: None,
            curvatures: None,
            curvature_unc: None,
            u0: Vec::new(),
            u_norm: Vec::new(),
            bias: 0.0,
            bias_unc: None,
            y_min: None,
            y_max: None,
            fitting: FitQuality::default(),
        }
    }
}

impl UnitParameters {
    pub fn n_inputs(&self) -> usize {
        self.linear_gains.len()
    }

    /// Steady-state gains at the operating point (the curvature terms have
    /// zero slope at `u0`).
    pub fn process_gains(&self) -> &[f64] {
        &self.linear_gains
    }

    /// Steady-state output for a given input vector.
    pub fn steady_state_output(&self, u: &[f64]) -> f64 {
        let mut y = self.bias;
        for i in 0..self.n_inputs().min(u.len()) {
            let du = u[i] - self.u0.get(i).copied().unwrap_or(0.0);
            y += self.linear_gains[i] * du;
            if let Some(curv) = &self.curvatures {
                let norm = self.u_norm.get(i).copied().unwrap_or(1.0);
                if norm.is_finite() && norm > 0.0 {
                    y += curv.get(i).copied().unwrap_or(0.0) * du * du / norm;
                }
            }
        }
        y
    }

    /// Invert the linear steady-state map for one input, the others held at
    /// `u0`. Returns None when that input's gain is zero. Curvature terms
    /// are ignored, so for curved models this is a local approximation.
    pub fn steady_state_input(&self, y: f64, input_idx: usize) -> Option<f64> {
        let gain = *self.linear_gains.get(input_idx)?;
        if gain == 0.0 || !gain.is_finite() {
            return None;
        }
        let u0 = self.u0.get(input_idx).copied().unwrap_or(0.0);
        Some(u0 + (y - self.bias) / gain)
    }

    /// Re-center the model on a new operating point without changing the
    /// steady-state map: the bias absorbs the linear and curvature offsets
    /// and the gains pick up the curvature slope at the new point.
    pub fn moved_to_operating_point(&self, new_u0: &[f64]) -> UnitParameters {
        let mut out = self.clone();
        out.bias = self.steady_state_output(new_u0);
        for i in 0..self.n_inputs().min(new_u0.len()) {
            let shift = new_u0[i] - self.u0.get(i).copied().unwrap_or(0.0);
            if let Some(curv) = &self.curvatures {
                let norm = self.u_norm.get(i).copied().unwrap_or(1.0);
                if norm.is_finite() && norm > 0.0 {
                    out.linear_gains[i] +=
                        2.0 * curv.get(i).copied().unwrap_or(0.0) * shift / norm;
                }
            }
            if i < out.u0.len() {
                out.u0[i] = new_u0[i];
            }
        }
        out
    }
}
