//! Identification of gain-scheduled (piecewise-linear) models.
//!
//! The scheduling thresholds are found by grid search: each candidate
//! threshold set partitions the scheduling input's range, every partition
//! is fitted by the unit identifier on its sub-range, and the assembled
//! model is scored by its summed absolute simulation residual. A second,
//! finer pass brackets the first pass's winner. Under-excited partitions
//! are widened stepwise before fitting; a final scan trades the shared
//! time constant against an integer time delay.

use sysid_core::data::{diff, r_squared, sum_abs_err, sum_square_err, UnitDataset};

use crate::base::{FittingSpecs, GainSchedParameters, GainSchedWarning, Result};
use crate::error::IdentError;
use crate::sim::simulate_gain_sched;

use super::unit::identify_internal;

/// Options for gain-scheduled identification. The defaults reproduce the
/// established heuristics; they are fields so callers can trade search
/// effort against fidelity.
#[derive(Debug, Clone)]
pub struct GainSchedOptions {
    /// Which input column drives the scheduling
    pub gain_sched_input_idx: usize,
    /// Candidate thresholds in the first, coarse pass
    pub n_candidates_pass1: usize,
    /// Candidate thresholds in the second, bracketing pass
    pub n_candidates_pass2: usize,
    /// Fraction of the scheduling range searched (centered)
    pub central_fraction: f64,
    /// Partition fit windows overlap neighbors by this fraction of range
    pub partition_overlap_fraction: f64,
    /// Observed excitation below this fraction of the partition width
    /// triggers widening
    pub min_excitation_fraction: f64,
    /// Widening step, as a fraction of the scheduling range
    pub widening_step_fraction: f64,
    /// Widening cap, as a fraction of the scheduling range
    pub widening_max_fraction: f64,
    /// Factor applied to the time shaved off the time constants when a
    /// time delay is introduced
    pub delay_correction_factor: f64,
    /// Run the final delay/time-constant trade-off scan
    pub estimate_time_delay: bool,
    /// Keep per-partition time constants, scheduled on these thresholds,
    /// instead of averaging into one shared value
    pub time_constant_thresholds: Option<Vec<f64>>,
}

impl Default for GainSchedOptions {
    fn default() -> Self {
        Self {
            gain_sched_input_idx: 0,
            n_candidates_pass1: 40,
            n_candidates_pass2: 20,
            central_fraction: 0.7,
            partition_overlap_fraction: 0.05,
            min_excitation_fraction: 0.5,
            widening_step_fraction: 0.2,
            widening_max_fraction: 0.81,
            delay_correction_factor: 2.0,
            estimate_time_delay: true,
            time_constant_thresholds: None,
        }
    }
}

/// Identify a gain-scheduled model, searching for the best single
/// threshold. The single-partition (plain linear) model is the reference;
/// a scheduled model is returned only when it scores better.
pub fn identify_gain_sched(
    dataset: &UnitDataset,
    options: &GainSchedOptions,
) -> Result<GainSchedParameters> {
    let sched = options.gain_sched_input_idx;
    let Some((u_lo, u_hi)) = dataset.u_range(sched)? else {
        return Err(IdentError::InvalidConfig {
            message: format!("scheduling input {sched} has no good samples"),
        });
    };
    let span = u_hi - u_lo;

    let (reference, ref_score) = fit_for_thresholds(dataset, &[], options)?;
    if !reference.fitting.was_able_to_identify || span <= 0.0 {
        return Ok(reference);
    }

    // pass 1: coarse grid over the central part of the range
    let n1 = options.n_candidates_pass1.max(2);
    let margin = (1.0 - options.central_fraction.clamp(0.0, 1.0)) / 2.0;
    let grid: Vec<f64> = (0..n1)
        .map(|i| {
            u_lo + span * (margin + options.central_fraction * i as f64 / (n1 - 1) as f64)
        })
        .collect();
    let mut best: Option<(GainSchedParameters, f64, usize)> = None;
    for (i, &threshold) in grid.iter().enumerate() {
        let (candidate, score) = fit_for_thresholds(dataset, &[threshold], options)?;
        log::debug!("threshold pass 1: {threshold:.4} scores {score:.4}");
        if candidate.fitting.was_able_to_identify
            && best.as_ref().is_none_or(|(_, s, _)| score < *s)
        {
            best = Some((candidate, score, i));
        }
    }

    // pass 2: bracket the winner between its grid neighbors
    if let Some((_, _, winner_idx)) = best {
        if let Some((lo, hi)) = refinement_bracket(&grid, winner_idx) {
            let n2 = options.n_candidates_pass2.max(2);
            for i in 0..n2 {
                let threshold = lo + (hi - lo) * i as f64 / (n2 - 1) as f64;
                let (candidate, score) = fit_for_thresholds(dataset, &[threshold], options)?;
                if candidate.fitting.was_able_to_identify
                    && best.as_ref().is_none_or(|(_, s, _)| score < *s)
                {
                    best = Some((candidate, score, winner_idx));
                }
            }
        }
    }

    let (mut model, score) = match best {
        Some((model, score, _)) if score < ref_score => (model, score),
        _ => (reference, ref_score),
    };
    if options.estimate_time_delay {
        (model, _) = delay_tradeoff_scan(dataset, model, score, options)?;
    }
    Ok(model)
}

/// The two grid neighbors of a pass-1 winner. A winner at either end of
/// the grid has no bracket and the pass-1 result stands.
pub(crate) fn refinement_bracket(grid: &[f64], winner_idx: usize) -> Option<(f64, f64)> {
    if winner_idx == 0 || winner_idx + 1 >= grid.len() {
        return None;
    }
    let (lo, hi) = (grid[winner_idx - 1], grid[winner_idx + 1]);
    if hi <= lo {
        return None;
    }
    Some((lo, hi))
}

/// Identify a gain-scheduled model for a fixed, ascending threshold set.
pub fn identify_gain_sched_for_thresholds(
    dataset: &UnitDataset,
    thresholds: &[f64],
    options: &GainSchedOptions,
) -> Result<GainSchedParameters> {
    let (mut model, score) = fit_for_thresholds(dataset, thresholds, options)?;
    if options.estimate_time_delay && model.fitting.was_able_to_identify {
        (model, _) = delay_tradeoff_scan(dataset, model, score, options)?;
    }
    Ok(model)
}

/// Fit one partition per threshold interval and assemble the scheduled
/// model. Returns the model and its summed-absolute-residual score.
fn fit_for_thresholds(
    dataset: &UnitDataset,
    thresholds: &[f64],
    options: &GainSchedOptions,
) -> Result<(GainSchedParameters, f64)> {
    let sched = options.gain_sched_input_idx;
    let n_inputs = dataset.n_inputs();
    if sched >= n_inputs {
        return Err(IdentError::InvalidConfig {
            message: format!("scheduling input {sched} does not exist"),
        });
    }
    let Some((u_lo, u_hi)) = dataset.u_range(sched)? else {
        return Err(IdentError::InvalidConfig {
            message: format!("scheduling input {sched} has no good samples"),
        });
    };
    let span = u_hi - u_lo;

    let mut params = GainSchedParameters {
        gain_sched_input_idx: sched,
        linear_gain_thresholds: thresholds.to_vec(),
        u0: dataset.average_u(),
        ..Default::default()
    };
    params.fitting.solver_id = "GainSched".to_string();

    // a plain linear fit as the fallback for failed partitions
    let global = identify_internal(dataset, &FittingSpecs::default(), true, false, false)?;
    let global_ok = global.parameters.fitting.was_able_to_identify;
    if !global_ok {
        params.add_warning(GainSchedWarning::GlobalFitFailed);
    }

    let n_partitions = thresholds.len() + 1;
    let mut gains: Vec<Vec<f64>> = Vec::with_capacity(n_partitions);
    let mut tcs: Vec<f64> = Vec::with_capacity(n_partitions);
    let mut any_partition_ok = false;
    for p in 0..n_partitions {
        let nominal_lo = if p == 0 { u_lo } else { thresholds[p - 1] };
        let nominal_hi = if p == n_partitions - 1 { u_hi } else { thresholds[p] };
        let overlap = options.partition_overlap_fraction * span;
        let window_lo = if p == 0 { None } else { Some(nominal_lo - overlap) };
        let window_hi = if p == n_partitions - 1 { None } else { Some(nominal_hi + overlap) };

        let (window_lo, window_hi, widened) = widen_until_excited(
            dataset,
            sched,
            window_lo,
            window_hi,
            nominal_hi - nominal_lo,
            span,
            options,
        )?;
        if widened {
            params.add_warning(GainSchedWarning::InsufficientExcitationInPartition);
        }

        let mut u_min_fit = vec![f64::NEG_INFINITY; n_inputs];
        let mut u_max_fit = vec![f64::INFINITY; n_inputs];
        if let Some(lo) = window_lo {
            u_min_fit[sched] = lo;
        }
        if let Some(hi) = window_hi {
            u_max_fit[sched] = hi;
        }
        let specs = FittingSpecs {
            u_min_fit: Some(u_min_fit),
            u_max_fit: Some(u_max_fit),
            ..Default::default()
        };
        let sub_fit = identify_internal(dataset, &specs, true, false, false);
        match sub_fit {
            Ok(model) if model.parameters.fitting.was_able_to_identify => {
                gains.push(model.parameters.linear_gains.clone());
                tcs.push(model.parameters.time_constant_s);
                any_partition_ok = true;
            }
            _ => {
                params.add_warning(GainSchedWarning::SubModelFailedToIdentify);
                if global_ok {
                    gains.push(global.parameters.linear_gains.clone());
                    tcs.push(global.parameters.time_constant_s);
                } else {
                    gains.push(vec![0.0; n_inputs]);
                    tcs.push(0.0);
                }
            }
        }
    }

    params.linear_gains = gains;
    match &options.time_constant_thresholds {
        Some(tc_thresholds) => {
            params.time_constant_thresholds = Some(tc_thresholds.clone());
            params.time_constants_s = tcs;
        }
        None => {
            let mean_tc = tcs.iter().sum::<f64>() / tcs.len().max(1) as f64;
            params.time_constants_s = vec![mean_tc];
        }
    }
    if !any_partition_ok && !global_ok {
        return Ok((params, f64::INFINITY));
    }

    let score = finish_scheduled_fit(dataset, &mut params)?;
    Ok((params, score))
}

/// Widen a partition window until the observed scheduling-input span
/// reaches the excitation floor or the widening cap.
fn widen_until_excited(
    dataset: &UnitDataset,
    sched: usize,
    window_lo: Option<f64>,
    window_hi: Option<f64>,
    nominal_width: f64,
    span: f64,
    options: &GainSchedOptions,
) -> Result<(Option<f64>, Option<f64>, bool)> {
    let required = options.min_excitation_fraction * nominal_width;
    let step = options.widening_step_fraction * span;
    let cap = options.widening_max_fraction * span;
    let mut widen = 0.0;
    loop {
        let lo = window_lo.map(|v| v - widen);
        let hi = window_hi.map(|v| v + widen);
        let mut seen_lo = f64::INFINITY;
        let mut seen_hi = f64::NEG_INFINITY;
        let col = dataset.u_col(sched)?;
        for &v in col.iter() {
            if dataset.is_bad(v) {
                continue;
            }
            if lo.is_some_and(|b| v < b) || hi.is_some_and(|b| v > b) {
                continue;
            }
            seen_lo = seen_lo.min(v);
            seen_hi = seen_hi.max(v);
        }
        let observed = (seen_hi - seen_lo).max(0.0);
        if observed.is_finite() && observed >= required {
            return Ok((lo, hi, widen > 0.0));
        }
        if widen >= cap || step <= 0.0 {
            return Ok((lo, hi, widen > 0.0));
        }
        widen += step;
    }
}

/// Re-estimate the bias from the mean simulation residual, then fill the
/// fitting-quality record. Returns the summed-absolute-residual score.
fn finish_scheduled_fit(
    dataset: &UnitDataset,
    params: &mut GainSchedParameters,
) -> Result<f64> {
    params.bias = 0.0;
    let sim = simulate_gain_sched(params, dataset)?;
    let mut sum = 0.0;
    let mut count = 0usize;
    for k in 0..dataset.len() {
        let y = dataset.y_meas()[k];
        if dataset.is_bad(y) || dataset.indices_to_ignore().binary_search(&k).is_ok() {
            continue;
        }
        sum += y - sim.y_sim[k];
        count += 1;
    }
    if count > 0 && sum.is_finite() {
        params.bias = sum / count as f64;
    }
    let sim = simulate_gain_sched(params, dataset)?;
    let ignore = dataset.indices_to_ignore();
    let y = dataset.y_meas();
    params.fitting.was_able_to_identify = true;
    params.fitting.rsq_abs =
        r_squared(y.view(), sim.y_sim.view(), dataset.bad_value(), ignore) * 100.0;
    params.fitting.obj_fun_val_abs =
        sum_square_err(y.view(), sim.y_sim.view(), dataset.bad_value(), ignore);
    let y_diff = diff(y.view());
    let sim_diff = diff(sim.y_sim.view());
    params.fitting.rsq_diff =
        r_squared(y_diff.view(), sim_diff.view(), dataset.bad_value(), &[]) * 100.0;
    params.fitting.obj_fun_val_diff =
        sum_square_err(y_diff.view(), sim_diff.view(), dataset.bad_value(), &[]);
    params.fitting.n_fitting_total_data_points = dataset.len();
    params.fitting.n_fitting_bad_data_points = ignore.len();
    params.fitting.fit_end_time_s = dataset.time_span_s();
    Ok(sum_abs_err(
        y.view(),
        sim.y_sim.view(),
        dataset.bad_value(),
        ignore,
    ))
}

/// Trade time constant against integer time delay: candidate delays shave
/// the corresponding time off the time constants; the winning shave is
/// applied with the configured correction factor.
fn delay_tradeoff_scan(
    dataset: &UnitDataset,
    params: GainSchedParameters,
    base_score: f64,
    options: &GainSchedOptions,
) -> Result<(GainSchedParameters, f64)> {
    let ts = dataset.time_base_s();
    let min_tc = params
        .time_constants_s
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let max_shift = if min_tc.is_finite() {
        (min_tc / ts).floor() as usize
    } else {
        0
    };
    let mut best_shift = 0usize;
    let mut best_score = base_score;
    for shift in 1..=max_shift {
        let shaved = shift as f64 * ts;
        let mut candidate = params.clone();
        candidate.time_delay_s += shaved;
        for tc in &mut candidate.time_constants_s {
            *tc = (*tc - shaved).max(0.0);
        }
        let sim = simulate_gain_sched(&candidate, dataset)?;
        let score = sum_abs_err(
            dataset.y_meas().view(),
            sim.y_sim.view(),
            dataset.bad_value(),
            dataset.indices_to_ignore(),
        );
        log::debug!("delay trade-off: {shift} samples scores {score:.4}");
        if score < best_score {
            best_score = score;
            best_shift = shift;
        }
    }
    if best_shift == 0 {
        return Ok((params, base_score));
    }
    let shaved = best_shift as f64 * ts;
    let mut out = params;
    out.time_delay_s += shaved;
    for tc in &mut out.time_constants_s {
        *tc = (*tc - options.delay_correction_factor * shaved).max(0.0);
    }
    let score = finish_scheduled_fit(dataset, &mut out)?;
    Ok((out, score))
}
