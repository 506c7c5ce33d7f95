use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use sysid_core::data::UnitDataset;

use crate::base::{
    FitQuality, FittingSpecs, GainSchedParameters, PidParameters, UnitParameters, UnitWarning,
};
use crate::sim::{simulate_closed_loop, simulate_gain_sched, simulate_unit};

use super::{
    estimate_disturbance, identify, identify_closed_loop, identify_gain_sched,
    identify_gain_sched_for_thresholds, identify_linear, identify_linear_and_static,
    identify_static, solve_regression, ClosedLoopOptions, DisturbanceZeroReason,
    GainSchedOptions,
};

// ==== fixtures ====

/// Single-input step sequence visiting several levels, 40 samples each.
fn multi_step_input(n: usize) -> Array1<f64> {
    let levels = [0.0, 1.0, 2.0, 0.5, 3.0, 1.5, 2.5, 0.0];
    Array1::from_iter((0..n).map(|k| levels[(k / 40) % levels.len()]))
}

fn single_input_dataset(y: Array1<f64>, u: Array1<f64>) -> UnitDataset {
    let n = u.len();
    let u = Array2::from_shape_vec((n, 1), u.to_vec()).unwrap();
    UnitDataset::new(y, u, 1.0).unwrap()
}

/// Simulate a noise-free first-order response to the multi-step input.
fn first_order_dataset(gain: f64, tc_s: f64, delay_s: f64, bias: f64) -> UnitDataset {
    let n = 320;
    let u = multi_step_input(n);
    let truth = UnitParameters {
        linear_gains: vec![gain],
        time_constant_s: tc_s,
        time_delay_s: delay_s,
        u0: vec![0.0],
        u_norm: vec![1.0],
        bias,
        ..Default::default()
    };
    let ds = single_input_dataset(Array1::zeros(n), u.clone());
    let y = simulate_unit(&truth, &ds).unwrap().y_sim;
    single_input_dataset(y, u)
}

/// Ramp 0 to 10 and back, with a gain change at u = 5.
fn two_gain_truth() -> GainSchedParameters {
    GainSchedParameters {
        gain_sched_input_idx: 0,
        linear_gain_thresholds: vec![5.0],
        linear_gains: vec![vec![1.0], vec![3.0]],
        time_constants_s: vec![0.0],
        u0: vec![5.0],
        bias: 5.0,
        ..Default::default()
    }
}

fn two_gain_dataset() -> UnitDataset {
    let n = 401;
    let u = Array1::from_iter((0..n).map(|k| {
        if k <= 200 {
            0.05 * k as f64
        } else {
            0.05 * (400 - k) as f64
        }
    }));
    let ds = single_input_dataset(Array1::zeros(n), u.clone());
    let y = simulate_gain_sched(&two_gain_truth(), &ds).unwrap().y_sim;
    single_input_dataset(y, u)
}

// ==== regression ====

#[test]
fn regression_recovers_known_coefficients() {
    let n = 30;
    let a = Array1::from_iter((0..n).map(|k| (k as f64 * 0.7).sin()));
    let b = Array1::from_iter((0..n).map(|k| (k as f64 * 0.3).cos() * 2.0));
    let y = Array1::from_iter((0..n).map(|k| 1.0 + 2.0 * a[k] - 3.0 * b[k]));
    let res = solve_regression(&y, &[a, b], &[], None).unwrap();
    assert!(res.able_to_identify);
    assert_abs_diff_eq!(res.gains[0], 2.0, epsilon = 1e-8);
    assert_abs_diff_eq!(res.gains[1], -3.0, epsilon = 1e-8);
    assert_abs_diff_eq!(res.bias, 1.0, epsilon = 1e-8);
    assert_abs_diff_eq!(res.r_squared, 100.0, epsilon = 1e-6);
}

#[test]
fn regression_excludes_ignored_rows() {
    let n = 30;
    let x = Array1::from_iter((0..n).map(|k| (k as f64 * 0.7).sin()));
    let mut y = Array1::from_iter((0..n).map(|k| 0.5 + 2.0 * x[k]));
    y[5] = 1000.0;
    let res = solve_regression(&y, &[x], &[5], None).unwrap();
    assert!(res.able_to_identify);
    assert_abs_diff_eq!(res.gains[0], 2.0, epsilon = 1e-8);
    assert_abs_diff_eq!(res.bias, 0.5, epsilon = 1e-8);
}

#[test]
fn regularization_pulls_coefficient_toward_zero() {
    let n = 100;
    let x = Array1::from_iter((0..n).map(|k| (k as f64 * 0.2).sin() * 3.0));
    let y = x.mapv(|v| 2.0 * v);
    let free = solve_regression(&y, &[x.clone()], &[], None).unwrap();
    let pulled = solve_regression(&y, &[x], &[], Some(&[0])).unwrap();
    assert_abs_diff_eq!(free.gains[0], 2.0, epsilon = 1e-8);
    assert!(pulled.gains[0] < 1.9999);
    assert!(pulled.gains[0] > 1.95);
}

// ==== unit identification ====

#[test]
fn recovers_gain_time_constant_and_delay() {
    let ds = first_order_dataset(2.0, 8.0, 3.0, 1.0);
    let model = identify_linear(&ds, &FittingSpecs::default()).unwrap();
    let p = &model.parameters;
    assert!(p.fitting.was_able_to_identify);
    assert_abs_diff_eq!(p.linear_gains[0], 2.0, epsilon = 1e-5);
    assert_abs_diff_eq!(p.time_constant_s, 8.0, epsilon = 1e-4);
    assert_abs_diff_eq!(p.time_delay_s, 3.0, epsilon = 1e-9);
    assert!(p.fitting.warnings.is_empty(), "{:?}", p.fitting.warnings);
    assert!(p.fitting.rsq_abs > 99.0);
}

#[test]
fn bias_is_recovered_from_simulation_residual() {
    let ds = first_order_dataset(1.2, 4.0, 0.0, 7.0);
    let model = identify_linear(&ds, &FittingSpecs::default()).unwrap();
    // output at the generating operating point u = 0
    assert_abs_diff_eq!(
        model.parameters.steady_state_output(&[0.0]),
        7.0,
        epsilon = 1e-4
    );
    // bias re-estimation drives the mean simulation residual to zero
    let y_sim = model.y_sim.as_ref().unwrap();
    let mean_residual = (ds.y_meas() - y_sim).mean().unwrap();
    assert_abs_diff_eq!(mean_residual, 0.0, epsilon = 1e-9);
}

#[test]
fn bad_output_samples_do_not_skew_the_fit() {
    let mut ds = first_order_dataset(2.0, 5.0, 0.0, 1.0);
    let mut y = ds.y_meas().clone();
    y[40] = f64::NAN;
    y[41] = f64::NAN;
    ds = single_input_dataset(y, ds.u().column(0).to_owned());
    let model = identify_linear(&ds, &FittingSpecs::default()).unwrap();
    let p = &model.parameters;
    assert!(p.fitting.was_able_to_identify);
    assert_abs_diff_eq!(p.linear_gains[0], 2.0, epsilon = 1e-5);
    assert_abs_diff_eq!(p.time_constant_s, 5.0, epsilon = 1e-3);
}

#[test]
fn ignore_indices_reproduce_the_clean_fit() {
    let clean = first_order_dataset(2.0, 5.0, 0.0, 1.0);
    let reference = identify_linear(&clean, &FittingSpecs::default()).unwrap();

    let mut y = clean.y_meas().clone();
    y[60] = 999.0;
    y[61] = 999.0;
    let corrupted = single_input_dataset(y, clean.u().column(0).to_owned())
        .with_indices_to_ignore(vec![60, 61]);
    let model = identify_linear(&corrupted, &FittingSpecs::default()).unwrap();

    let (p, r) = (&model.parameters, &reference.parameters);
    assert_abs_diff_eq!(p.linear_gains[0], r.linear_gains[0], epsilon = 1e-6);
    assert_abs_diff_eq!(p.time_constant_s, r.time_constant_s, epsilon = 1e-4);
    assert_abs_diff_eq!(p.time_delay_s, r.time_delay_s, epsilon = 1e-9);
    assert_abs_diff_eq!(p.bias, r.bias, epsilon = 1e-6);
}

#[test]
fn constant_input_gives_warning_instead_of_panic() {
    let n = 50;
    let ds = single_input_dataset(Array1::from_elem(n, 3.0), Array1::from_elem(n, 1.0));
    let model = identify_linear(&ds, &FittingSpecs::default()).unwrap();
    let p = &model.parameters;
    assert!(!p.fitting.was_able_to_identify);
    assert!(p.fitting.has_warning(UnitWarning::ConstantInput));
    assert!(p.fitting.has_warning(UnitWarning::NotPossibleToIdentify));
}

#[test]
fn static_fit_handles_measurement_noise() {
    let n = 300;
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Normal::new(0.0, 0.1).unwrap();
    // random levels held for 30 samples each
    let mut u = Array1::zeros(n);
    let mut held = 0.0;
    for k in 0..n {
        if k % 30 == 0 {
            held = rng.random_range(0.0..4.0);
        }
        u[k] = held;
    }
    let y = Array1::from_iter(
        (0..n).map(|k| 5.0 + 2.0 * u[k] + noise.sample(&mut rng)),
    );
    let ds = single_input_dataset(y, u);
    let model = identify_linear_and_static(&ds, &FittingSpecs::default()).unwrap();
    let p = &model.parameters;
    assert!(p.fitting.was_able_to_identify);
    assert_abs_diff_eq!(p.linear_gains[0], 2.0, epsilon = 0.1);
}

#[test]
fn recovers_curvature_and_its_uncertainty() {
    let n = 320;
    let u = multi_step_input(n);
    let truth = UnitParameters {
        linear_gains: vec![2.0],
        curvatures: Some(vec![0.8]),
        time_constant_s: 4.0,
        u0: vec![0.0],
        u_norm: vec![1.0],
        bias: 1.0,
        ..Default::default()
    };
    let ds = single_input_dataset(Array1::zeros(n), u.clone());
    let y = simulate_unit(&truth, &ds).unwrap().y_sim;
    let ds = single_input_dataset(y, u);

    let model = identify(&ds, &FittingSpecs::default()).unwrap();
    let p = &model.parameters;
    assert!(p.fitting.was_able_to_identify);
    let curv = p.curvatures.as_ref().unwrap();
    assert_abs_diff_eq!(curv[0], 0.8, epsilon = 0.05);
    let curv_unc = p.curvature_unc.as_ref().unwrap();
    assert!(curv_unc[0].is_finite() && curv_unc[0] >= 0.0);
    // the fit is centred on the dataset average; recentring on the
    // generating operating point brings back the original slope and bias
    let moved = p.moved_to_operating_point(&[0.0]);
    assert_abs_diff_eq!(moved.linear_gains[0], 2.0, epsilon = 0.05);
    assert_abs_diff_eq!(moved.bias, 1.0, epsilon = 0.05);
}

#[test]
fn recentring_preserves_the_steady_state_map() {
    let params = UnitParameters {
        linear_gains: vec![2.0, -1.0],
        curvatures: Some(vec![0.5, 0.0]),
        u0: vec![1.0, 3.0],
        u_norm: vec![2.0, 1.0],
        bias: 10.0,
        ..Default::default()
    };
    let moved = params.moved_to_operating_point(&[4.0, 0.0]);
    assert_eq!(moved.u0, vec![4.0, 0.0]);
    for u in [[0.0, 0.0], [1.0, 3.0], [4.0, -2.0], [-3.0, 5.0]] {
        assert_abs_diff_eq!(
            moved.steady_state_output(&u),
            params.steady_state_output(&u),
            epsilon = 1e-12
        );
    }
}

#[test]
fn static_identification_recovers_gain_and_delay() {
    let ds = first_order_dataset(2.0, 0.0, 4.0, 1.0);
    let model = identify_static(&ds, &FittingSpecs::default()).unwrap();
    let p = &model.parameters;
    assert!(p.fitting.was_able_to_identify);
    assert_eq!(p.fitting.solver_id, "v1.Static");
    assert_abs_diff_eq!(p.linear_gains[0], 2.0, epsilon = 1e-6);
    assert_abs_diff_eq!(p.time_delay_s, 4.0, epsilon = 1e-9);
    assert_eq!(p.time_constant_s, 0.0);
    assert_abs_diff_eq!(p.bias, 1.0, epsilon = 1e-6);
}

#[test]
fn static_fallback_tie_breaks_on_differenced_metrics() {
    let make = |rsq_abs: f64, rsq_diff: f64, obj_diff: f64| FitQuality {
        rsq_abs,
        rsq_diff,
        obj_fun_val_diff: obj_diff,
        ..Default::default()
    };
    // absolute R-squared decides when it differs
    assert!(super::unit::static_fit_wins(
        &make(90.0, 0.0, 0.0),
        &make(80.0, 99.0, 0.0)
    ));
    assert!(!super::unit::static_fit_wins(
        &make(80.0, 99.0, 0.0),
        &make(90.0, 0.0, 0.0)
    ));
    // zero-variance data degrades both to zero; differenced R-squared decides
    assert!(!super::unit::static_fit_wins(
        &make(0.0, 10.0, 5.0),
        &make(0.0, 80.0, 5.0)
    ));
    // then the differenced objective, with full ties going to static
    assert!(!super::unit::static_fit_wins(
        &make(0.0, 50.0, 5.0),
        &make(0.0, 50.0, 1.0)
    ));
    assert!(super::unit::static_fit_wins(
        &make(0.0, 50.0, 5.0),
        &make(0.0, 50.0, 5.0)
    ));
}

#[test]
fn identification_is_deterministic() {
    let ds = first_order_dataset(2.0, 8.0, 3.0, 1.0);
    let first = identify_linear(&ds, &FittingSpecs::default()).unwrap();
    let second = identify_linear(&ds, &FittingSpecs::default()).unwrap();
    assert_eq!(first.parameters, second.parameters);
}

// ==== closed loop ====

#[test]
fn disturbance_estimate_is_zero_without_setpoint() {
    let ds = first_order_dataset(2.0, 0.0, 0.0, 1.0);
    let est = estimate_disturbance(&ds, None, 0, None).unwrap();
    assert!(est.is_all_zero);
    assert_eq!(est.zero_reason, Some(DisturbanceZeroReason::NoSetpoint));
    assert!(est.d_est.iter().all(|&v| v == 0.0));
}

#[test]
fn closed_loop_finds_step_disturbance_and_gain() {
    let n = 300;
    let truth = UnitParameters {
        linear_gains: vec![1.5],
        u0: vec![30.0],
        u_norm: vec![1.0],
        bias: 50.0,
        ..Default::default()
    };
    let pid = PidParameters {
        kp: 0.5,
        ti_s: 20.0,
        ..Default::default()
    };
    let ysp = Array1::from_elem(n, 50.0);
    let d = Array1::from_iter((0..n).map(|k| if k < 50 { 0.0 } else { 1.0 }));
    let loop_ds = single_input_dataset(Array1::zeros(n), Array1::zeros(n))
        .with_setpoint(ysp.clone())
        .unwrap();
    let sim = simulate_closed_loop(&truth, &pid, &loop_ds, 0, Some(&d)).unwrap();

    let ds = single_input_dataset(sim.y_sim, sim.u_sim)
        .with_setpoint(ysp)
        .unwrap();
    let result =
        identify_closed_loop(&ds, Some(&pid), 0, &ClosedLoopOptions::default()).unwrap();

    let early: f64 = result.disturbance.d_est.slice(ndarray::s![..40]).mean().unwrap();
    let late: f64 = result.disturbance.d_est.slice(ndarray::s![200..]).mean().unwrap();
    assert_abs_diff_eq!(early, 0.0, epsilon = 0.05);
    assert_abs_diff_eq!(late, 1.0, epsilon = 0.1);
    assert!(result.model.parameters.fitting.was_able_to_identify);
    assert_abs_diff_eq!(result.model.parameters.linear_gains[0], 1.5, epsilon = 0.15);
}

// ==== gain scheduling ====

#[test]
fn gain_sched_fits_given_threshold() {
    let ds = two_gain_dataset();
    let options = GainSchedOptions {
        partition_overlap_fraction: 0.0,
        estimate_time_delay: false,
        ..Default::default()
    };
    let model = identify_gain_sched_for_thresholds(&ds, &[5.0], &options).unwrap();
    assert!(model.fitting.was_able_to_identify);
    assert_eq!(model.linear_gain_thresholds, vec![5.0]);
    assert_abs_diff_eq!(model.linear_gains[0][0], 1.0, epsilon = 0.05);
    assert_abs_diff_eq!(model.linear_gains[1][0], 3.0, epsilon = 0.1);
    assert_abs_diff_eq!(model.time_constants_s[0], 0.0, epsilon = 0.5);
    assert_abs_diff_eq!(model.bias, 5.0, epsilon = 0.2);
}

#[test]
fn threshold_refinement_needs_an_interior_winner() {
    let grid = [1.0, 2.0, 3.0, 4.0];
    assert_eq!(
        super::gain_sched::refinement_bracket(&grid, 1),
        Some((1.0, 3.0))
    );
    assert_eq!(
        super::gain_sched::refinement_bracket(&grid, 2),
        Some((2.0, 4.0))
    );
    assert_eq!(super::gain_sched::refinement_bracket(&grid, 0), None);
    assert_eq!(super::gain_sched::refinement_bracket(&grid, 3), None);
}

#[test]
fn gain_sched_search_locates_the_gain_change() {
    let ds = two_gain_dataset();
    let model = identify_gain_sched(&ds, &GainSchedOptions::default()).unwrap();
    assert!(model.fitting.was_able_to_identify);
    assert_eq!(model.linear_gain_thresholds.len(), 1);
    assert_abs_diff_eq!(model.linear_gain_thresholds[0], 5.0, epsilon = 0.5);
    assert_abs_diff_eq!(model.linear_gains[0][0], 1.0, epsilon = 0.3);
    assert_abs_diff_eq!(model.linear_gains[1][0], 3.0, epsilon = 0.3);
}
