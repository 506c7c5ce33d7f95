//! Least-squares regression core shared by all identifiers.
//!
//! Ordinary least squares with three domain-specific twists: rows at
//! ignored indices are zeroed out rather than removed (so window positions
//! stay aligned), selected coefficients can be pulled toward zero by
//! weighted regularization rows, and a bias column is always appended as
//! the last parameter.

use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use statrs::distribution::{ContinuousCDF, Normal};

use sysid_core::data::r_squared;

use crate::base::Result;
use crate::error::IdentError;

/// Regularization row weight is `n / REGULARIZATION_WEIGHT_DIVISOR`.
const REGULARIZATION_WEIGHT_DIVISOR: f64 = 1000.0;

/// A regressor whose span is below this is considered degenerate.
const RANK_DEFICIENCY_SPAN: f64 = 1e-3;

/// Singular values below this are truncated in the SVD solve.
const SVD_EPS: f64 = 1e-10;

/// Non-fatal findings from a regression run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegressionWarning {
    /// One or more regressors have (almost) no span
    RankDeficientRegressors,
}

/// Results of one regression run.
///
/// `param` holds the regressor coefficients followed by the bias.
/// `able_to_identify` is false when the solver failed or returned a
/// degenerate solution; the other fields are then at their defaults.
#[derive(Debug, Clone)]
pub struct RegressionResults {
    pub able_to_identify: bool,
    pub param: Vec<f64>,
    /// Coefficients excluding the bias
    pub gains: Vec<f64>,
    pub bias: f64,
    /// 95 % confidence half-widths per parameter, when computable
    pub param_95prc_conf: Option<Vec<f64>>,
    /// Variance-covariance matrix of the parameters, when computable
    pub var_covar_matrix: Option<Vec<Vec<f64>>>,
    pub y_modelled: Option<Array1<f64>>,
    /// R-squared in percent (0 to 100)
    pub r_squared: f64,
    /// Sum of squared residuals over non-ignored rows
    pub objective_fun_val: f64,
    pub n_fitting_total_data_points: usize,
    pub n_fitting_bad_data_points: usize,
    pub warnings: Vec<RegressionWarning>,
}

impl Default for RegressionResults {
    fn default() -> Self {
        Self {
            able_to_identify: false,
            param: Vec::new(),
            gains: Vec::new(),
            bias: 0.0,
            param_95prc_conf: None,
            var_covar_matrix: None,
            y_modelled: None,
            r_squared: 0.0,
            objective_fun_val: f64::INFINITY,
            n_fitting_total_data_points: 0,
            n_fitting_bad_data_points: 0,
            warnings: Vec::new(),
        }
    }
}

/// 95 % two-sided normal quantile.
pub(crate) fn confidence_factor() -> f64 {
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(0.975))
        .unwrap_or(1.96)
}

/// Solve `y ≈ Σ param[i]·regressors[i] + bias` by SVD least squares.
///
/// `indices_to_ignore` must be sorted; those rows are zeroed before
/// solving and excluded from the reported metrics. `regularize` lists
/// regressor indices whose coefficients are pulled toward zero.
pub fn solve_regression(
    y: &Array1<f64>,
    regressors: &[Array1<f64>],
    indices_to_ignore: &[usize],
    regularize: Option<&[usize]>,
) -> Result<RegressionResults> {
    let n = y.len();
    let n_regressors = regressors.len();
    let n_params = n_regressors + 1;
    if n_regressors == 0 {
        return Err(IdentError::InvalidConfig {
            message: "regression requires at least one regressor".to_string(),
        });
    }
    for reg in regressors {
        if reg.len() != n {
            return Err(IdentError::Data(
                sysid_core::data::DataError::DimensionMismatch {
                    expected: format!("{n} rows"),
                    actual: format!("{} rows", reg.len()),
                },
            ));
        }
    }
    let n_ignored = indices_to_ignore.iter().filter(|&&i| i < n).count();
    if n.saturating_sub(n_ignored) <= n_params {
        return Err(IdentError::InsufficientData {
            n_samples: n - n_ignored,
            n_predictors: n_params,
        });
    }

    let ignored = |idx: usize| indices_to_ignore.binary_search(&idx).is_ok();

    let mut result = RegressionResults {
        n_fitting_total_data_points: n,
        n_fitting_bad_data_points: n_ignored,
        ..Default::default()
    };

    // span check per regressor, over non-ignored rows
    for reg in regressors {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for (i, &v) in reg.iter().enumerate() {
            if ignored(i) || v.is_nan() {
                continue;
            }
            lo = lo.min(v);
            hi = hi.max(v);
        }
        if !(hi - lo).is_finite() || hi - lo < RANK_DEFICIENCY_SPAN {
            result.warnings.push(RegressionWarning::RankDeficientRegressors);
            break;
        }
    }

    let regularize_indices: Vec<usize> = regularize
        .unwrap_or(&[])
        .iter()
        .copied()
        .filter(|&i| i < n_regressors)
        .collect();
    let n_rows = n + regularize_indices.len();
    let reg_row_weight = (n as f64 / REGULARIZATION_WEIGHT_DIVISOR).sqrt();

    let mut x = DMatrix::<f64>::zeros(n_rows, n_params);
    let mut rhs = DVector::<f64>::zeros(n_rows);
    for row in 0..n {
        if ignored(row) {
            continue;
        }
        let mut row_bad = y[row].is_nan();
        for reg in regressors {
            row_bad |= reg[row].is_nan();
        }
        if row_bad {
            continue;
        }
        for (col, reg) in regressors.iter().enumerate() {
            x[(row, col)] = reg[row];
        }
        x[(row, n_regressors)] = 1.0;
        rhs[row] = y[row];
    }
    for (extra, &reg_idx) in regularize_indices.iter().enumerate() {
        x[(n + extra, reg_idx)] = reg_row_weight;
        // target stays zero
    }

    let svd = x.clone().svd(true, true);
    let beta = match svd.solve(&rhs, SVD_EPS) {
        Ok(beta) => beta,
        Err(message) => {
            log::warn!("regression solve failed: {message}");
            return Ok(result);
        }
    };
    let param: Vec<f64> = beta.iter().copied().collect();
    if param.iter().any(|p| !p.is_finite()) || param.iter().all(|&p| p == 0.0) {
        return Ok(result);
    }

    // modelled output over the full window; ignored rows hold the last value
    let mut y_modelled = Array1::zeros(n);
    let mut last_good = f64::NAN;
    for row in 0..n {
        if ignored(row) && last_good.is_finite() {
            y_modelled[row] = last_good;
            continue;
        }
        let mut v = param[n_regressors];
        for (col, reg) in regressors.iter().enumerate() {
            let r = reg[row];
            if r.is_finite() {
                v += param[col] * r;
            }
        }
        y_modelled[row] = v;
        last_good = v;
    }

    let mut ss_res = 0.0;
    let mut n_used = 0usize;
    for row in 0..n {
        if ignored(row) || y[row].is_nan() || y_modelled[row].is_nan() {
            continue;
        }
        let e = y[row] - y_modelled[row];
        ss_res += e * e;
        n_used += 1;
    }
    result.r_squared = r_squared(y.view(), y_modelled.view(), f64::NAN, indices_to_ignore) * 100.0;
    result.objective_fun_val = ss_res;

    // covariance from the pseudo-inverse of the information matrix
    let dof = n_used.saturating_sub(n_params).max(1) as f64;
    let sigma2 = ss_res / dof;
    let xtx = x.transpose() * &x;
    if let Ok(pinv) = xtx.pseudo_inverse(SVD_EPS) {
        let z = confidence_factor();
        let conf: Vec<f64> = (0..n_params)
            .map(|i| (pinv[(i, i)] * sigma2).max(0.0).sqrt() * z)
            .collect();
        let cov: Vec<Vec<f64>> = (0..n_params)
            .map(|i| (0..n_params).map(|j| pinv[(i, j)] * sigma2).collect())
            .collect();
        result.param_95prc_conf = Some(conf);
        result.var_covar_matrix = Some(cov);
    }

    result.able_to_identify = true;
    result.gains = param[..n_regressors].to_vec();
    result.bias = param[n_regressors];
    result.param = param;
    result.y_modelled = Some(y_modelled);
    Ok(result)
}
