use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Array2};

use super::*;

fn sample_dataset() -> UnitDataset {
    let y = array![1.0, 2.0, 3.0, 4.0, 5.0];
    let u = Array2::from_shape_vec((5, 2), vec![
        0.0, 10.0, //
        1.0, 10.0, //
        2.0, 10.0, //
        3.0, 10.0, //
        4.0, 10.0,
    ])
    .unwrap();
    UnitDataset::new(y, u, 1.0).unwrap()
}

#[test]
fn dataset_rejects_mismatched_lengths() {
    let y = array![1.0, 2.0];
    let u = Array2::zeros((3, 1));
    assert!(UnitDataset::new(y, u, 1.0).is_err());
}

#[test]
fn dataset_rejects_nonpositive_time_base() {
    let y = array![1.0, 2.0];
    let u = Array2::zeros((2, 1));
    assert!(UnitDataset::new(y, u, 0.0).is_err());
}

#[test]
fn average_u_skips_bad_values() {
    let y = array![1.0, 2.0, 3.0];
    let u = Array2::from_shape_vec((3, 1), vec![2.0, f64::NAN, 4.0]).unwrap();
    let ds = UnitDataset::new(y, u, 1.0).unwrap();
    assert_abs_diff_eq!(ds.average_u()[0], 3.0, epsilon = 1e-12);
}

#[test]
fn average_u_respects_sentinel() {
    let y = array![1.0, 2.0, 3.0];
    let u = Array2::from_shape_vec((3, 1), vec![2.0, -9999.0, 4.0]).unwrap();
    let ds = UnitDataset::new(y, u, 1.0).unwrap().with_bad_value(-9999.0);
    assert_abs_diff_eq!(ds.average_u()[0], 3.0, epsilon = 1e-12);
}

#[test]
fn time_span_counts_intervals() {
    let ds = sample_dataset();
    assert_abs_diff_eq!(ds.time_span_s(), 4.0, epsilon = 1e-12);
}

#[test]
fn first_good_index_skips_bad_rows() {
    let y = array![f64::NAN, 2.0, 3.0];
    let u = Array2::from_shape_vec((3, 1), vec![1.0, f64::NAN, 3.0]).unwrap();
    let ds = UnitDataset::new(y, u, 1.0).unwrap();
    assert_eq!(ds.first_good_index(), Some(2));
}

#[test]
fn out_of_bounds_indices_per_input() {
    let ds = sample_dataset();
    let idx = ds.out_of_bounds_indices(None, None, Some(&[1.5, 0.0]), Some(&[3.5, 20.0]));
    assert_eq!(idx, vec![0, 1, 4]);
}

#[test]
fn out_of_bounds_indices_on_output() {
    let ds = sample_dataset();
    let idx = ds.out_of_bounds_indices(Some(2.0), Some(4.0), None, None);
    assert_eq!(idx, vec![0, 4]);
}

#[test]
fn find_bad_indices_catches_nan_and_sentinel() {
    let v = array![1.0, f64::NAN, -9999.0, 4.0];
    assert_eq!(find_bad_indices(v.view(), -9999.0), vec![1, 2]);
}

#[test]
fn union_sorts_and_dedups() {
    assert_eq!(union_indices(&[3, 1], &[1, 2]), vec![1, 2, 3]);
}

#[test]
fn trailing_indices_clamp_to_length() {
    assert_eq!(append_trailing_indices(&[0, 4], 5), vec![0, 1, 4]);
}

#[test]
fn shift_indices_into_window() {
    assert_eq!(shift_indices(&[0, 3, 4, 9], 2, 5), vec![1, 2]);
}

#[test]
fn diff_shortens_by_one() {
    let v = array![1.0, 3.0, 6.0];
    let d = diff(v.view());
    assert_eq!(d.len(), 2);
    assert_abs_diff_eq!(d[0], 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(d[1], 3.0, epsilon = 1e-12);
}

#[test]
fn r_squared_perfect_fit_is_one() {
    let y = array![1.0, 2.0, 3.0, 4.0];
    assert_abs_diff_eq!(r_squared(y.view(), y.view(), f64::NAN, &[]), 1.0, epsilon = 1e-12);
}

#[test]
fn r_squared_ignores_listed_indices() {
    let y = array![1.0, 2.0, 3.0, 4.0];
    let y_mod = array![1.0, 100.0, 3.0, 4.0];
    assert_abs_diff_eq!(r_squared(y.view(), y_mod.view(), f64::NAN, &[1]), 1.0, epsilon = 1e-12);
}

#[test]
fn mean_ignoring_skips_indices() {
    let v = array![1.0, 100.0, 3.0];
    assert_abs_diff_eq!(mean_ignoring(v.view(), f64::NAN, &[1]).unwrap(), 2.0, epsilon = 1e-12);
}

#[test]
fn round_to_five_significant_digits() {
    assert_abs_diff_eq!(
        round_to_significant_digits(123.456789, 5),
        123.46,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(
        round_to_significant_digits(0.001234567, 5),
        0.0012346,
        epsilon = 1e-12
    );
}
