//! Fitting specification and fitting-quality record.

use serde::{Deserialize, Serialize};

use super::warnings::{TimeDelayWarning, UnitWarning};

/// Optional constraints and operating-point choices for a fit.
///
/// All fields default to "let the identifier decide": the operating point
/// `u0` falls back to the per-input dataset average and the normalization
/// span `u_norm` to one. The bound fields restrict which samples enter the
/// fit; out-of-bound samples join the ignore list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FittingSpecs {
    /// Per-input operating point
    pub u0: Option<Vec<f64>>,
    /// Per-input normalization span for the curvature regressors
    pub u_norm: Option<Vec<f64>>,
    /// Lower output bound for samples to include in the fit
    pub y_min_fit: Option<f64>,
    /// Upper output bound for samples to include in the fit
    pub y_max_fit: Option<f64>,
    /// Per-input lower bounds for samples to include in the fit
    pub u_min_fit: Option<Vec<f64>>,
    /// Per-input upper bounds for samples to include in the fit
    pub u_max_fit: Option<Vec<f64>>,
}

/// How well, and on what data, a model was fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    /// False when no usable model could be found
    pub was_able_to_identify: bool,
    /// Identifies the solver variant that produced the model
    pub solver_id: String,
    /// R-squared of the fit on differenced signals, in percent
    pub rsq_diff: f64,
    /// R-squared of the simulated model against the measured output, in percent
    pub rsq_abs: f64,
    /// Objective value (sum of squared residuals) on differenced signals
    pub obj_fun_val_diff: f64,
    /// Objective value of the simulated model against the measured output
    pub obj_fun_val_abs: f64,
    /// Samples in the fitting window
    pub n_fitting_total_data_points: usize,
    /// Samples in the fitting window that were excluded
    pub n_fitting_bad_data_points: usize,
    /// Start of the fitted span, seconds from the first sample
    pub fit_start_time_s: f64,
    /// End of the fitted span, seconds from the first sample
    pub fit_end_time_s: f64,
    /// Non-fatal findings during identification
    pub warnings: Vec<UnitWarning>,
    /// Non-fatal findings from the time-delay search
    pub time_delay_warnings: Vec<TimeDelayWarning>,
}

impl Default for FitQuality {
    fn default() -> Self {
        Self {
            was_able_to_identify: false,
            solver_id: String::new(),
            rsq_diff: 0.0,
            rsq_abs: 0.0,
            obj_fun_val_diff: f64::INFINITY,
            obj_fun_val_abs: f64::INFINITY,
            n_fitting_total_data_points: 0,
            n_fitting_bad_data_points: 0,
            fit_start_time_s: 0.0,
            fit_end_time_s: 0.0,
            warnings: Vec::new(),
            time_delay_warnings: Vec::new(),
        }
    }
}

impl FitQuality {
    /// Record a warning, skipping duplicates.
    pub fn add_warning(&mut self, warning: UnitWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn has_warning(&self, warning: UnitWarning) -> bool {
        self.warnings.contains(&warning)
    }
}
