//! The sampled dataset consumed by all identifiers.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::stats::{mean_ignoring, min_max_ignoring, round_to_significant_digits};
use super::{DataError, Result};

/// Number of significant digits kept when deriving default operating points.
const U0_SIGNIFICANT_DIGITS: u32 = 5;

/// A sampled dataset of one output and one or more inputs on a fixed time base.
///
/// The dataset is immutable once built. Identification routines return fitted
/// signals separately and never write back into the dataset. A sample is
/// considered bad if it is NaN or equals the bad-value sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDataset {
    y_meas: Array1<f64>,
    y_setpoint: Option<Array1<f64>>,
    u: Array2<f64>,
    d: Option<Array1<f64>>,
    indices_to_ignore: Vec<usize>,
    bad_value: f64,
    time_base_s: f64,
}

impl UnitDataset {
    /// Create a dataset from a measured output, an input matrix (one column
    /// per input) and the sampling time in seconds.
    pub fn new(y_meas: Array1<f64>, u: Array2<f64>, time_base_s: f64) -> Result<Self> {
        if y_meas.is_empty() {
            return Err(DataError::EmptyDataset);
        }
        if u.nrows() != y_meas.len() {
            return Err(DataError::DimensionMismatch {
                expected: format!("{} input rows", y_meas.len()),
                actual: format!("{} input rows", u.nrows()),
            });
        }
        if !(time_base_s > 0.0) {
            return Err(DataError::InvalidParameter(format!(
                "time base must be positive, got {time_base_s}"
            )));
        }
        Ok(Self {
            y_meas,
            y_setpoint: None,
            u,
            d: None,
            indices_to_ignore: Vec::new(),
            bad_value: f64::NAN,
            time_base_s,
        })
    }

    /// Attach an output setpoint series (required by closed-loop methods).
    pub fn with_setpoint(mut self, y_setpoint: Array1<f64>) -> Result<Self> {
        if y_setpoint.len() != self.len() {
            return Err(DataError::DimensionMismatch {
                expected: format!("{} samples", self.len()),
                actual: format!("{} samples", y_setpoint.len()),
            });
        }
        self.y_setpoint = Some(y_setpoint);
        Ok(self)
    }

    /// Attach an additive output disturbance series.
    pub fn with_disturbance(mut self, d: Array1<f64>) -> Result<Self> {
        if d.len() != self.len() {
            return Err(DataError::DimensionMismatch {
                expected: format!("{} samples", self.len()),
                actual: format!("{} samples", d.len()),
            });
        }
        self.d = Some(d);
        Ok(self)
    }

    /// Remove the disturbance series, if any.
    pub fn without_disturbance(mut self) -> Self {
        self.d = None;
        self
    }

    /// Mark sample indices that must be excluded from fitting.
    pub fn with_indices_to_ignore(mut self, mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();
        self.indices_to_ignore = indices;
        self
    }

    /// Set the bad-value sentinel. NaN always counts as bad.
    pub fn with_bad_value(mut self, bad_value: f64) -> Self {
        self.bad_value = bad_value;
        self
    }

    // ==== accessors ====

    pub fn y_meas(&self) -> &Array1<f64> {
        &self.y_meas
    }

    pub fn y_setpoint(&self) -> Option<&Array1<f64>> {
        self.y_setpoint.as_ref()
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    /// View of one input column.
    pub fn u_col(&self, input_idx: usize) -> Result<ArrayView1<'_, f64>> {
        if input_idx >= self.n_inputs() {
            return Err(DataError::NoSuchInput(input_idx));
        }
        Ok(self.u.column(input_idx))
    }

    pub fn d(&self) -> Option<&Array1<f64>> {
        self.d.as_ref()
    }

    pub fn indices_to_ignore(&self) -> &[usize] {
        &self.indices_to_ignore
    }

    pub fn bad_value(&self) -> f64 {
        self.bad_value
    }

    pub fn time_base_s(&self) -> f64 {
        self.time_base_s
    }

    pub fn len(&self) -> usize {
        self.y_meas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y_meas.is_empty()
    }

    pub fn n_inputs(&self) -> usize {
        self.u.ncols()
    }

    /// Time spanned by the dataset in seconds.
    pub fn time_span_s(&self) -> f64 {
        (self.len().saturating_sub(1)) as f64 * self.time_base_s
    }

    /// True if the value is NaN or equals the bad-value sentinel.
    pub fn is_bad(&self, value: f64) -> bool {
        value.is_nan() || value == self.bad_value
    }

    /// Per-input averages over good samples, rounded to five significant
    /// digits. Used as the default operating point. An all-bad column
    /// yields 0.
    pub fn average_u(&self) -> Vec<f64> {
        (0..self.n_inputs())
            .map(|i| {
                let col = self.u.column(i);
                mean_ignoring(col, self.bad_value, &[])
                    .map(|m| round_to_significant_digits(m, U0_SIGNIFICANT_DIGITS))
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Observed (min, max) of one input over good samples.
    pub fn u_range(&self, input_idx: usize) -> Result<Option<(f64, f64)>> {
        let col = self.u_col(input_idx)?;
        Ok(min_max_ignoring(col, self.bad_value))
    }

    /// First index where the output, the setpoint (when present) and every
    /// input are all good.
    pub fn first_good_index(&self) -> Option<usize> {
        (0..self.len()).find(|&k| {
            if self.is_bad(self.y_meas[k]) {
                return false;
            }
            if let Some(ysp) = &self.y_setpoint {
                if self.is_bad(ysp[k]) {
                    return false;
                }
            }
            (0..self.n_inputs()).all(|i| !self.is_bad(self.u[[k, i]]))
        })
    }

    /// Indices where the output or any input falls outside the given bounds.
    ///
    /// `u_min`/`u_max` are per-input; pass `None` to leave a side unbounded.
    pub fn out_of_bounds_indices(
        &self,
        y_min: Option<f64>,
        y_max: Option<f64>,
        u_min: Option<&[f64]>,
        u_max: Option<&[f64]>,
    ) -> Vec<usize> {
        let mut out = Vec::new();
        for k in 0..self.len() {
            let y = self.y_meas[k];
            let mut exclude = !self.is_bad(y)
                && (y_min.is_some_and(|lo| y < lo) || y_max.is_some_and(|hi| y > hi));
            if !exclude {
                for i in 0..self.n_inputs() {
                    let v = self.u[[k, i]];
                    if self.is_bad(v) {
                        continue;
                    }
                    let lo_violated = u_min.and_then(|b| b.get(i)).is_some_and(|&lo| v < lo);
                    let hi_violated = u_max.and_then(|b| b.get(i)).is_some_and(|&hi| v > hi);
                    if lo_violated || hi_violated {
                        exclude = true;
                        break;
                    }
                }
            }
            if exclude {
                out.push(k);
            }
        }
        out
    }
}
