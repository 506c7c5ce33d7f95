//! Sequential integer time-delay search.
//!
//! The mixed-integer problem of estimating a sample delay together with the
//! continuous parameters is solved sequentially: the continuous problem is
//! re-identified for delay 0, 1, 2, ... and the runs are compared after the
//! fact. The search always tries a handful of delays, then continues while
//! the fit keeps improving, up to a bound derived from the expected time
//! constant.

use crate::base::{TimeDelayWarning, UnitParameters};

/// Delays always tried before the improvement criterion kicks in.
const MIN_DELAY_RUNS: usize = 5;

/// Winner-vs-runner-up R-squared gap below which the choice is ambiguous.
const RSQ_TIE_THRESHOLD: f64 = 0.1;

/// Winner-vs-runner-up objective gap below which the choice is ambiguous.
const OBJ_TIE_THRESHOLD: f64 = 1e-4;

pub(crate) struct DelaySearch {
    max_delay_samples: usize,
    runs: Vec<UnitParameters>,
}

impl DelaySearch {
    pub fn new(time_base_s: f64, max_expected_tc_s: f64) -> Self {
        let bound = (max_expected_tc_s / time_base_s).floor() as usize;
        Self {
            max_delay_samples: bound.max(MIN_DELAY_RUNS),
            runs: Vec::new(),
        }
    }

    pub fn max_delay_samples(&self) -> usize {
        self.max_delay_samples
    }

    pub fn add_run(&mut self, params: UnitParameters) {
        self.runs.push(params);
    }

    fn rsq_of_run(&self, idx: usize) -> f64 {
        let run = &self.runs[idx];
        if run.fitting.was_able_to_identify {
            run.fitting.rsq_diff
        } else {
            f64::NAN
        }
    }

    fn obj_of_run(&self, idx: usize) -> f64 {
        let run = &self.runs[idx];
        if run.fitting.was_able_to_identify {
            run.fitting.obj_fun_val_diff
        } else {
            f64::NAN
        }
    }

    /// Whether to evaluate the next (one larger) delay. Stops once neither
    /// R-squared nor the objective improved over the last two runs, or at
    /// the delay bound.
    pub fn continue_increasing(&self, next_delay_samples: usize) -> bool {
        if next_delay_samples > self.max_delay_samples {
            return false;
        }
        if next_delay_samples < MIN_DELAY_RUNS {
            return true;
        }
        let n = self.runs.len();
        if n < 2 {
            return true;
        }
        let rsq_improved = self.rsq_of_run(n - 1) > self.rsq_of_run(n - 2);
        let obj_improved = self.obj_of_run(n - 1) < self.obj_of_run(n - 2);
        rsq_improved || obj_improved
    }

    /// Best delay by differenced R-squared, with warnings about the shape
    /// of the solution space. None if no run identified.
    pub fn choose_best(&self) -> Option<(usize, Vec<TimeDelayWarning>)> {
        let n = self.runs.len();
        let mut warnings = Vec::new();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| {
            self.rsq_of_run(j)
                .partial_cmp(&self.rsq_of_run(i))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        // NaN (failed) runs sort unpredictably; pick the best finite run
        let best = order
            .iter()
            .copied()
            .find(|&i| self.rsq_of_run(i).is_finite())?;

        if (0..n).any(|i| !self.rsq_of_run(i).is_finite()) {
            warnings.push(TimeDelayWarning::SomeRunsFailedToFindSolution);
        }
        let runner_up = order
            .iter()
            .copied()
            .find(|&i| i != best && self.rsq_of_run(i).is_finite());
        if let Some(second) = runner_up {
            if best.abs_diff(second) > 1 {
                warnings.push(TimeDelayWarning::NonConvexRsquaredSolutionSpace);
            }
            if self.rsq_of_run(best) - self.rsq_of_run(second) < RSQ_TIE_THRESHOLD {
                warnings.push(TimeDelayWarning::NoUniqueRsquaredMinimum);
            }
        }

        let mut obj_order: Vec<usize> = (0..n)
            .filter(|&i| self.obj_of_run(i).is_finite())
            .collect();
        obj_order.sort_by(|&i, &j| {
            self.obj_of_run(i)
                .partial_cmp(&self.obj_of_run(j))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if obj_order.len() >= 2 {
            let (first, second) = (obj_order[0], obj_order[1]);
            if first.abs_diff(second) > 1 {
                warnings.push(TimeDelayWarning::NonConvexObjectiveSolutionSpace);
            }
            if self.obj_of_run(second) - self.obj_of_run(first) <= OBJ_TIE_THRESHOLD {
                warnings.push(TimeDelayWarning::NoUniqueObjectiveMinimum);
            }
        }

        Some((best, warnings))
    }
}
