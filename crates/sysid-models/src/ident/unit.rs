//! Open-loop identification of unit models.
//!
//! The identifier resolves operating points, assembles the ignore mask,
//! runs the regression for each candidate time delay (optionally with
//! curvature-term subsets), re-estimates the bias by simulation and picks
//! the winner conservatively: a candidate replaces the incumbent only when
//! both the differenced and the absolute fit metrics improve. A static,
//! zero-delay reference fit is always kept as a fallback.

use ndarray::{s, Array1};

use sysid_core::data::{
    append_trailing_indices, find_bad_indices, r_squared, shift_indices, sum_square_err,
    union_indices, UnitDataset,
};

use crate::base::{FitQuality, FittingSpecs, Result, UnitParameters, UnitWarning};
use crate::error::IdentError;
use crate::sim::simulate_unit;

use super::delay::DelaySearch;
use super::regression::{solve_regression, RegressionResults, RegressionWarning};
use super::reparam;

/// A candidate must improve the differenced objective by at least this much.
const OBJ_DIFF_MIN_IMPROVEMENT: f64 = 1e-4;

/// A candidate must improve the differenced R-squared by at least this much.
const RSQ_DIFF_MIN_IMPROVEMENT: f64 = 1e-3;

/// Curvature subsets are only explored when the all-curvature fit improves
/// R-squared by more than this over the linear fit.
const CURVATURE_TRIGGER_RSQ_IMPROVEMENT: f64 = 1e-3;

/// Solutions with any input coefficient beyond this are rejected.
const MAX_ABS_COEFFICIENT: f64 = 1e4;

/// Curvature subsets are not enumerated beyond this many inputs.
const MAX_CURVATURE_SUBSET_INPUTS: usize = 6;

/// Datasets shorter than this get a shortness warning.
const MIN_COMFORTABLE_SAMPLES: usize = 20;

/// An identified unit model together with its simulated output over the
/// fitting dataset.
#[derive(Debug, Clone)]
pub struct UnitModel {
    pub parameters: UnitParameters,
    pub y_sim: Option<Array1<f64>>,
}

/// Identify a dynamic model with curvature terms and time-delay search.
pub fn identify(dataset: &UnitDataset, specs: &FittingSpecs) -> Result<UnitModel> {
    identify_internal(dataset, specs, true, true, true)
}

/// Identify a dynamic model without curvature terms, with time-delay search.
pub fn identify_linear(dataset: &UnitDataset, specs: &FittingSpecs) -> Result<UnitModel> {
    identify_internal(dataset, specs, true, false, true)
}

/// Identify a static model, with time-delay search.
pub fn identify_static(dataset: &UnitDataset, specs: &FittingSpecs) -> Result<UnitModel> {
    identify_internal(dataset, specs, false, false, true)
}

/// Identify a static model at zero delay.
pub fn identify_linear_and_static(
    dataset: &UnitDataset,
    specs: &FittingSpecs,
) -> Result<UnitModel> {
    identify_internal(dataset, specs, false, false, false)
}

struct FitContext<'a> {
    dataset: &'a UnitDataset,
    u0: Vec<f64>,
    u_norm: Vec<f64>,
    constant_input: Vec<bool>,
    /// Absolute sample indices excluded from fitting
    ignore: Vec<usize>,
}

struct FitRun {
    params: UnitParameters,
    y_sim: Option<Array1<f64>>,
}

impl FitRun {
    fn failed(solver_id: &str, warnings: &[UnitWarning]) -> Self {
        let mut params = UnitParameters::default();
        params.fitting.solver_id = solver_id.to_string();
        for &w in warnings {
            params.fitting.add_warning(w);
        }
        Self {
            params,
            y_sim: None,
        }
    }

    fn able(&self) -> bool {
        self.params.fitting.was_able_to_identify
    }
}

pub(crate) fn identify_internal(
    dataset: &UnitDataset,
    specs: &FittingSpecs,
    use_dynamic: bool,
    estimate_curvature: bool,
    estimate_delay: bool,
) -> Result<UnitModel> {
    let n = dataset.len();
    let n_inputs = dataset.n_inputs();
    if n_inputs == 0 {
        return Err(IdentError::InvalidConfig {
            message: "dataset has no inputs".to_string(),
        });
    }
    if n < 2 * (n_inputs + 2) {
        return Err(IdentError::InsufficientData {
            n_samples: n,
            n_predictors: n_inputs + 2,
        });
    }

    let u0 = match &specs.u0 {
        Some(u0) => {
            if u0.len() != n_inputs {
                return Err(IdentError::InvalidConfig {
                    message: format!("u0 has {} entries for {} inputs", u0.len(), n_inputs),
                });
            }
            u0.clone()
        }
        None => dataset.average_u(),
    };
    let u_norm: Vec<f64> = match &specs.u_norm {
        Some(norm) => norm
            .iter()
            .map(|&v| {
                if v.is_finite() && v > 0.0 {
                    v
                } else {
                    log::error!("u_norm must be positive and finite, got {v}; using 1");
                    1.0
                }
            })
            .collect(),
        None => vec![1.0; n_inputs],
    };

    let mut global_warnings = Vec::new();
    let mut constant_input = vec![false; n_inputs];
    for i in 0..n_inputs {
        let is_constant = match dataset.u_range(i)? {
            Some((lo, hi)) => hi <= lo,
            None => true,
        };
        if is_constant {
            constant_input[i] = true;
            if !global_warnings.contains(&UnitWarning::ConstantInput) {
                global_warnings.push(UnitWarning::ConstantInput);
            }
        }
    }
    if n < MIN_COMFORTABLE_SAMPLES {
        global_warnings.push(UnitWarning::DataSetVeryShort);
    }
    if constant_input.iter().all(|&c| c) {
        global_warnings.push(UnitWarning::NotPossibleToIdentify);
        let run = FitRun::failed("unit", &global_warnings);
        return Ok(UnitModel {
            parameters: run.params,
            y_sim: None,
        });
    }

    let out_of_bounds = dataset.out_of_bounds_indices(
        specs.y_min_fit,
        specs.y_max_fit,
        specs.u_min_fit.as_deref(),
        specs.u_max_fit.as_deref(),
    );
    let ignore = union_indices(dataset.indices_to_ignore(), &out_of_bounds);

    let ctx = FitContext {
        dataset,
        u0,
        u_norm,
        constant_input,
        ignore,
    };

    // static zero-delay fit: the fallback reference for dynamic fits, and
    // the final result when neither dynamics nor a delay are estimated
    let static_ref = fit_for_delay(&ctx, 0, false, None)?;

    let mut chosen = if use_dynamic || estimate_delay {
        let max_expected_tc_s = dataset.time_span_s() / 4.0;
        let mut search = DelaySearch::new(dataset.time_base_s(), max_expected_tc_s);
        let mut runs: Vec<FitRun> = Vec::new();
        let mut delay = 0usize;
        loop {
            log::debug!("evaluating time delay of {delay} samples");
            let run = best_fit_at_delay(&ctx, delay, use_dynamic, estimate_curvature)?;
            search.add_run(run.params.clone());
            runs.push(run);
            delay += 1;
            if !estimate_delay || !search.continue_increasing(delay) {
                break;
            }
        }
        let hit_max = estimate_delay && delay > search.max_delay_samples();
        let mut best = match search.choose_best() {
            Some((best_idx, delay_warnings)) => {
                let mut best = runs.swap_remove(best_idx);
                best.params.fitting.time_delay_warnings = delay_warnings;
                if hit_max {
                    best.params
                        .fitting
                        .add_warning(UnitWarning::TimeDelayAtMaximumConstraint);
                }
                best
            }
            None => FitRun::failed(
                if use_dynamic { "v1.Dynamic" } else { "v1.Static" },
                &[UnitWarning::RegressionFailedToYieldSolution],
            ),
        };
        // the dynamic model must beat the static reference
        if use_dynamic && static_ref.able() {
            let fallback = !best.able()
                || static_fit_wins(&static_ref.params.fitting, &best.params.fitting);
            if fallback {
                let delay_warnings =
                    std::mem::take(&mut best.params.fitting.time_delay_warnings);
                best = static_ref;
                best.params.fitting.time_delay_warnings = delay_warnings;
                best.params
                    .fitting
                    .add_warning(UnitWarning::FallbackToLinearStaticModel);
            }
        }
        best
    } else {
        static_ref
    };

    for w in global_warnings {
        chosen.params.fitting.add_warning(w);
    }
    Ok(UnitModel {
        parameters: chosen.params,
        y_sim: chosen.y_sim,
    })
}

/// True when `candidate` should replace `current`: both the differenced and
/// the absolute metrics must improve.
fn candidate_wins(current: &FitRun, candidate: &FitRun) -> bool {
    if !candidate.able() {
        return false;
    }
    if !current.able() {
        return true;
    }
    let cur = &current.params.fitting;
    let cand = &candidate.params.fitting;
    cand.obj_fun_val_diff <= cur.obj_fun_val_diff - OBJ_DIFF_MIN_IMPROVEMENT
        && cand.rsq_diff >= cur.rsq_diff + RSQ_DIFF_MIN_IMPROVEMENT
        && cand.rsq_abs >= cur.rsq_abs
        && cand.obj_fun_val_abs <= cur.obj_fun_val_abs
}

/// True when the static reference should replace the dynamic winner.
/// Absolute R-squared decides; when it ties (zero-variance data degrades
/// both to zero) the differenced R-squared breaks the tie, then the
/// differenced objective, with the final tie going to the static model.
pub(crate) fn static_fit_wins(static_fit: &FitQuality, dynamic_fit: &FitQuality) -> bool {
    if static_fit.rsq_abs != dynamic_fit.rsq_abs {
        return static_fit.rsq_abs > dynamic_fit.rsq_abs;
    }
    if static_fit.rsq_diff != dynamic_fit.rsq_diff {
        return static_fit.rsq_diff > dynamic_fit.rsq_diff;
    }
    static_fit.obj_fun_val_diff <= dynamic_fit.obj_fun_val_diff
}

/// Best model at one delay: the linear fit, optionally challenged by
/// curvature-term subsets.
fn best_fit_at_delay(
    ctx: &FitContext<'_>,
    delay_samples: usize,
    use_dynamic: bool,
    estimate_curvature: bool,
) -> Result<FitRun> {
    let base = fit_for_delay(ctx, delay_samples, use_dynamic, None)?;
    if !estimate_curvature || !use_dynamic {
        return Ok(base);
    }
    let n_inputs = ctx.dataset.n_inputs();
    let all_mask: Vec<bool> = ctx.constant_input.iter().map(|&c| !c).collect();
    if !all_mask.iter().any(|&m| m) {
        return Ok(base);
    }
    let all = fit_for_delay(ctx, delay_samples, use_dynamic, Some(&all_mask))?;
    let improves = all.able()
        && (!base.able()
            || all.params.fitting.rsq_diff
                > base.params.fitting.rsq_diff + CURVATURE_TRIGGER_RSQ_IMPROVEMENT);
    if !improves {
        return Ok(base);
    }
    let mut best = if candidate_wins(&base, &all) { all } else { base };
    if n_inputs > MAX_CURVATURE_SUBSET_INPUTS {
        log::debug!("skipping curvature subset enumeration for {n_inputs} inputs");
        return Ok(best);
    }
    let full: u32 = all_mask
        .iter()
        .enumerate()
        .filter(|(_, &m)| m)
        .map(|(i, _)| 1u32 << i)
        .sum();
    for bits in 1..(1u32 << n_inputs) {
        if bits == full || bits & !full != 0 {
            continue;
        }
        let mask: Vec<bool> = (0..n_inputs).map(|i| bits & (1 << i) != 0).collect();
        let candidate = fit_for_delay(ctx, delay_samples, use_dynamic, Some(&mask))?;
        if candidate_wins(&best, &candidate) {
            best = candidate;
        }
    }
    Ok(best)
}

/// Window ignore mask for a fit starting at `idx_start`, in window
/// coordinates. A bad sample also poisons the following row.
fn window_ignore_mask(
    ctx: &FitContext<'_>,
    idx_start: usize,
    delay_samples: usize,
    win_len: usize,
    dynamic: bool,
) -> Vec<usize> {
    let ds = ctx.dataset;
    let bad = ds.bad_value();
    let u_start = idx_start - delay_samples;
    let mut rows: Vec<usize> = Vec::new();
    for i in 0..ds.n_inputs() {
        let col = ds.u().column(i);
        let win = col.slice(s![u_start..u_start + win_len]);
        rows = union_indices(&rows, &find_bad_indices(win, bad));
    }
    let y_win = ds.y_meas().slice(s![idx_start..idx_start + win_len]);
    rows = union_indices(&rows, &find_bad_indices(y_win, bad));
    if let Some(d) = ds.d() {
        let d_win = d.slice(s![idx_start..idx_start + win_len]);
        rows = union_indices(&rows, &find_bad_indices(d_win, bad));
        if dynamic {
            let d_prev = d.slice(s![idx_start - 1..idx_start - 1 + win_len]);
            rows = union_indices(&rows, &find_bad_indices(d_prev, bad));
        }
    }
    rows = union_indices(&rows, &shift_indices(&ctx.ignore, idx_start, win_len));
    let mut mask = append_trailing_indices(&rows, win_len);
    // the lagged output of the first row lies just before the window
    if dynamic && ds.is_bad(ds.y_meas()[idx_start - 1]) && !mask.contains(&0) {
        mask.insert(0, 0);
    }
    mask
}

/// One regression at a fixed delay, followed by reparameterization, bias
/// re-estimation and the absolute-fit metrics.
fn fit_for_delay(
    ctx: &FitContext<'_>,
    delay_samples: usize,
    dynamic: bool,
    curvature_mask: Option<&[bool]>,
) -> Result<FitRun> {
    let ds = ctx.dataset;
    let n = ds.len();
    let n_inputs = ds.n_inputs();
    let ts = ds.time_base_s();
    let solver_id = if dynamic { "v1.Dynamic" } else { "v1.Static" };

    let idx_start = delay_samples + 1;
    if idx_start + n_inputs + 2 >= n {
        return Ok(FitRun::failed(
            solver_id,
            &[UnitWarning::RegressionFailedToYieldSolution],
        ));
    }
    let win_len = n - idx_start;

    let good = |v: f64| if ds.is_bad(v) { 0.0 } else { v };
    let ycur = Array1::from_iter((0..win_len).map(|j| good(ds.y_meas()[idx_start + j])));
    let u_del: Vec<Array1<f64>> = (0..n_inputs)
        .map(|i| {
            Array1::from_iter(
                (0..win_len).map(|j| good(ds.u()[[idx_start - delay_samples + j, i]])),
            )
        })
        .collect();
    let dcur = ds
        .d()
        .map(|d| Array1::from_iter((0..win_len).map(|j| good(d[idx_start + j]))));

    let mask = window_ignore_mask(ctx, idx_start, delay_samples, win_len, dynamic);

    let mut regressors: Vec<Array1<f64>> = Vec::new();
    let y_ols: Array1<f64>;
    let regularize: Option<&[usize]> = if dynamic { None } else { Some(&[1]) };

    if dynamic {
        let yprev =
            Array1::from_iter((0..win_len).map(|j| good(ds.y_meas()[idx_start - 1 + j])));
        let dprev = ds
            .d()
            .map(|d| Array1::from_iter((0..win_len).map(|j| good(d[idx_start - 1 + j]))));
        let mut phi0 = yprev.clone();
        let mut delta_y = &ycur - &yprev;
        if let (Some(dc), Some(dp)) = (&dcur, &dprev) {
            phi0 = &yprev - dp;
            delta_y = delta_y - (dc - dp);
        }
        y_ols = delta_y;
        regressors.push(phi0);
    } else {
        y_ols = match &dcur {
            Some(dc) => &ycur - dc,
            None => ycur.clone(),
        };
    }
    for i in 0..n_inputs {
        if ctx.constant_input[i] {
            regressors.push(Array1::zeros(win_len));
        } else {
            regressors.push(&u_del[i] - ctx.u0[i]);
        }
    }
    let curvature_inputs: Vec<usize> = match (dynamic, curvature_mask) {
        (true, Some(mask)) => (0..n_inputs)
            .filter(|&i| mask.get(i).copied().unwrap_or(false) && !ctx.constant_input[i])
            .collect(),
        _ => Vec::new(),
    };
    for &i in &curvature_inputs {
        let du = &u_del[i] - ctx.u0[i];
        regressors.push(du.mapv(|v| v * v) / ctx.u_norm[i]);
    }

    let reg = match solve_regression(&y_ols, &regressors, &mask, regularize) {
        Ok(reg) => reg,
        Err(err) => {
            log::warn!("regression failed at delay {delay_samples}: {err}");
            return Ok(FitRun::failed(
                solver_id,
                &[UnitWarning::RegressionFailedToYieldSolution],
            ));
        }
    };
    if !reg.able_to_identify {
        return Ok(FitRun::failed(
            solver_id,
            &[UnitWarning::RegressionFailedToYieldSolution],
        ));
    }

    let mut params = UnitParameters {
        time_delay_s: delay_samples as f64 * ts,
        u0: ctx.u0.clone(),
        u_norm: ctx.u_norm.clone(),
        ..Default::default()
    };
    params.fitting.solver_id = solver_id.to_string();
    let n_used = win_len.saturating_sub(mask.len());

    let input_coeff_offset = if dynamic { 1 } else { 0 };
    let input_coeffs = &reg.param[input_coeff_offset..input_coeff_offset + n_inputs];
    if input_coeffs.iter().any(|&b| b.abs() > MAX_ABS_COEFFICIENT) {
        return Ok(FitRun::failed(solver_id, &[UnitWarning::NotPossibleToIdentify]));
    }

    if dynamic {
        let p0 = reg.param[0];
        let fc = reparam::filter_coefficient(p0);
        if fc.clamped_non_causal {
            params
                .fitting
                .add_warning(UnitWarning::NonCausalNegativeTimeConstant);
        }
        let one_minus_a = 1.0 - fc.a;
        if one_minus_a.abs() < 1e-12 {
            return Ok(FitRun::failed(solver_id, &[UnitWarning::NotPossibleToIdentify]));
        }
        params.time_constant_s = reparam::time_constant_from_coefficient(fc.a, ts);
        params.linear_gains = input_coeffs.iter().map(|&b| b / one_minus_a).collect();
        if !curvature_inputs.is_empty() {
            let mut curvatures = vec![0.0; n_inputs];
            for (k, &i) in curvature_inputs.iter().enumerate() {
                curvatures[i] = reg.param[1 + n_inputs + k] / one_minus_a;
            }
            params.curvatures = Some(curvatures);
        }
        params.bias = reg.bias / one_minus_a;
        if let Some(cov) = &reg.var_covar_matrix {
            let z = super::regression::confidence_factor();
            let var_p = cov[0][0];
            params.time_constant_unc_s =
                reparam::time_constant_uncertainty(p0, var_p, ts, n_used, z);
            let gain_unc: Vec<f64> = (0..n_inputs)
                .map(|i| {
                    reparam::gain_uncertainty(
                        p0,
                        input_coeffs[i],
                        var_p,
                        cov[1 + i][1 + i],
                        cov[0][1 + i],
                        n_used,
                        z,
                    )
                    .unwrap_or(f64::NAN)
                })
                .collect();
            params.linear_gain_unc = Some(gain_unc);
            // curvature shares the b/(1-a) shape, so the same propagation
            // applies with the raw curvature coefficient in place of b
            if !curvature_inputs.is_empty() {
                let mut curv_unc = vec![0.0; n_inputs];
                for (k, &i) in curvature_inputs.iter().enumerate() {
                    let idx = 1 + n_inputs + k;
                    curv_unc[i] = reparam::gain_uncertainty(
                        p0,
                        reg.param[idx],
                        var_p,
                        cov[idx][idx],
                        cov[0][idx],
                        n_used,
                        z,
                    )
                    .unwrap_or(f64::NAN);
                }
                params.curvature_unc = Some(curv_unc);
            }
        }
    } else {
        params.time_constant_s = 0.0;
        params.linear_gains = input_coeffs.to_vec();
        params.bias = reg.bias;
        if let Some(conf) = &reg.param_95prc_conf {
            params.linear_gain_unc = Some(conf[..n_inputs].to_vec());
        }
    }
    if let Some(conf) = &reg.param_95prc_conf {
        params.bias_unc = conf.last().copied();
    }
    if reg
        .warnings
        .contains(&RegressionWarning::RankDeficientRegressors)
    {
        params.fitting.add_warning(UnitWarning::RankDeficientRegressors);
    }
    if params.time_constant_s > ds.time_span_s() {
        params
            .fitting
            .add_warning(UnitWarning::TimeConstantEstimateTooBig);
    }

    finish_fit(ctx, params, &reg, idx_start, win_len, mask.len())
}

/// Re-estimate the bias from the mean simulation residual, simulate the
/// final model and fill the fitting-quality record.
fn finish_fit(
    ctx: &FitContext<'_>,
    mut params: UnitParameters,
    reg: &RegressionResults,
    idx_start: usize,
    win_len: usize,
    n_masked: usize,
) -> Result<FitRun> {
    let ds = ctx.dataset;
    let mut zero_bias = params.clone();
    zero_bias.bias = 0.0;
    match simulate_unit(&zero_bias, ds) {
        Ok(sim) => {
            let mut sum = 0.0;
            let mut count = 0usize;
            for k in 0..ds.len() {
                if ds.is_bad(ds.y_meas()[k]) || ctx.ignore.binary_search(&k).is_ok() {
                    continue;
                }
                sum += ds.y_meas()[k] - sim.y_sim[k];
                count += 1;
            }
            if count > 0 && sum.is_finite() {
                params.bias = sum / count as f64;
            } else {
                params.fitting.add_warning(UnitWarning::ReEstimateBiasFailed);
            }
        }
        Err(err) => {
            log::warn!("bias re-estimation failed: {err}");
            params.fitting.add_warning(UnitWarning::ReEstimateBiasFailed);
        }
    }

    let sim = simulate_unit(&params, ds)?;
    let ts = ds.time_base_s();
    params.fitting.was_able_to_identify = true;
    params.fitting.rsq_diff = reg.r_squared;
    params.fitting.obj_fun_val_diff = reg.objective_fun_val;
    params.fitting.rsq_abs =
        r_squared(ds.y_meas().view(), sim.y_sim.view(), ds.bad_value(), &ctx.ignore) * 100.0;
    params.fitting.obj_fun_val_abs = sum_square_err(
        ds.y_meas().view(),
        sim.y_sim.view(),
        ds.bad_value(),
        &ctx.ignore,
    );
    params.fitting.n_fitting_total_data_points = win_len;
    params.fitting.n_fitting_bad_data_points = n_masked;
    params.fitting.fit_start_time_s = idx_start as f64 * ts;
    params.fitting.fit_end_time_s = (ds.len().saturating_sub(1)) as f64 * ts;
    Ok(FitRun {
        params,
        y_sim: Some(sim.y_sim),
    })
}
