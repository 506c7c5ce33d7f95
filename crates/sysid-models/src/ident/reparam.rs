//! Mapping between difference-equation and physical parameters.
//!
//! The dynamic regression identifies `y[k]−y[k−1] = p·y[k−1] + Σ b·u + β`,
//! so the filter coefficient is `a = p + 1`. Physical parameters follow as
//! `Tc = Ts/(1/a − 1)` and `gain = b/(1 − a)`; their uncertainties come
//! from a first-order Taylor (delta-method) propagation of the regression
//! covariance.

/// Result of mapping the raw first coefficient to a filter coefficient.
pub(crate) struct FilterCoefficient {
    pub a: f64,
    /// True when the raw value implied a non-causal model and was clamped
    pub clamped_non_causal: bool,
}

/// `a = p + 1`, clamped to zero outside the stable range (0, 1].
pub(crate) fn filter_coefficient(p_first: f64) -> FilterCoefficient {
    let a_raw = p_first + 1.0;
    if a_raw > 1.0 || a_raw < 0.0 {
        FilterCoefficient {
            a: 0.0,
            clamped_non_causal: true,
        }
    } else {
        FilterCoefficient {
            a: a_raw,
            clamped_non_causal: false,
        }
    }
}

/// `Tc = Ts/(1/a − 1)`, zero for a zero coefficient, clamped non-negative.
pub(crate) fn time_constant_from_coefficient(a: f64, time_base_s: f64) -> f64 {
    if a <= 0.0 || a >= 1.0 {
        return 0.0;
    }
    (time_base_s / (1.0 / a - 1.0)).max(0.0)
}

/// 95 % confidence half-width of the time constant by the delta method.
///
/// `p_first` is the raw first regression coefficient, `var_p` its variance.
pub(crate) fn time_constant_uncertainty(
    p_first: f64,
    var_p: f64,
    time_base_s: f64,
    n_samples: usize,
    confidence_factor: f64,
) -> Option<f64> {
    let a = p_first + 1.0;
    if !(0.0..1.0).contains(&a) || a == 0.0 || n_samples == 0 || !var_p.is_finite() {
        return None;
    }
    let inv = 1.0 / a - 1.0;
    if inv == 0.0 {
        return None;
    }
    let d_tc_dp = a * inv.powi(-2);
    let var_tc = time_base_s.powi(2) * d_tc_dp.powi(2) * var_p;
    let se = var_tc / (n_samples as f64).sqrt();
    Some(se * confidence_factor)
}

/// 95 % confidence half-width of one steady-state gain by the delta method.
///
/// Propagates the variance of the raw first coefficient `p` (note
/// `Var(a) = Var(p)`), the variance of the input coefficient `b` and their
/// covariance through `gain = b/(1 − a)`.
pub(crate) fn gain_uncertainty(
    p_first: f64,
    b: f64,
    var_p: f64,
    var_b: f64,
    cov_pb: f64,
    n_samples: usize,
    confidence_factor: f64,
) -> Option<f64> {
    if n_samples == 0 || !var_p.is_finite() || !var_b.is_finite() {
        return None;
    }
    let a = p_first + 1.0;
    let one_minus_a = 1.0 - a;
    if one_minus_a == 0.0 {
        return None;
    }
    let dg_da = b * a * one_minus_a.powi(-2);
    let dg_db = 1.0 / one_minus_a;
    let cov_term = a * one_minus_a.powi(-2);
    let se = (dg_da.powi(2) * var_p + dg_db.powi(2) * var_b + cov_term * cov_pb)
        / (n_samples as f64).sqrt();
    if !se.is_finite() {
        return None;
    }
    Some(se.abs() * confidence_factor)
}
