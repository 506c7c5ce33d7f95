//! Parameters of the gain-scheduled (piecewise-linear) model.

use serde::{Deserialize, Serialize};

use super::fitting::FitQuality;
use super::warnings::GainSchedWarning;

/// A piecewise-linear model where one scheduling input selects the active
/// gain set (and optionally the active time constant) by threshold
/// comparison.
///
/// `linear_gains` holds one gain vector per interval, so its length is
/// always `linear_gain_thresholds.len() + 1`. When
/// `time_constant_thresholds` is None, `time_constants_s` holds a single
/// shared value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainSchedParameters {
    /// Which input column drives the scheduling
    pub gain_sched_input_idx: usize,
    /// Ascending thresholds partitioning the scheduling input's range
    pub linear_gain_thresholds: Vec<f64>,
    /// One gain vector (all inputs) per threshold interval
    pub linear_gains: Vec<Vec<f64>>,
    /// Ascending thresholds for time-constant scheduling, when separate
    pub time_constant_thresholds: Option<Vec<f64>>,
    /// Per-interval time constants, or a single shared value
    pub time_constants_s: Vec<f64>,
    pub time_delay_s: f64,
    /// Shared operating point per input
    pub u0: Vec<f64>,
    pub bias: f64,
    pub fitting: FitQuality,
    pub warnings: Vec<GainSchedWarning>,
}

impl Default for GainSchedParameters {
    fn default() -> Self {
        Self {
            gain_sched_input_idx: 0,
            linear_gain_thresholds: Vec::new(),
            linear_gains: Vec::new(),
            time_constant_thresholds: None,
            time_constants_s: vec![0.0],
            time_delay_s: 0.0,
            u0: Vec::new(),
            bias: 0.0,
            fitting: FitQuality::default(),
            warnings: Vec::new(),
        }
    }
}

impl GainSchedParameters {
    /// Index of the gain set active for a scheduling-input value.
    pub fn gain_index_for(&self, u_sched: f64) -> usize {
        self.linear_gain_thresholds
            .iter()
            .take_while(|&&t| u_sched >= t)
            .count()
    }

    /// Time constant active for a scheduling-input value.
    pub fn time_constant_for(&self, u_sched: f64) -> f64 {
        let idx = match &self.time_constant_thresholds {
            Some(thresholds) => thresholds.iter().take_while(|&&t| u_sched >= t).count(),
            None => 0,
        };
        self.time_constants_s
            .get(idx)
            .or_else(|| self.time_constants_s.first())
            .copied()
            .unwrap_or(0.0)
    }

    /// Record a warning, skipping duplicates.
    pub fn add_warning(&mut self, warning: GainSchedWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }
}
