//! Bad-value-aware vector statistics.
//!
//! All functions skip NaN, the bad-value sentinel and any listed ignore
//! indices, so that partially bad series can be scored without cleaning
//! them up first.

use ndarray::{Array1, ArrayView1};

fn is_bad(v: f64, bad_value: f64) -> bool {
    v.is_nan() || v == bad_value
}

fn is_ignored(idx: usize, ignore: &[usize]) -> bool {
    ignore.binary_search(&idx).is_ok()
}

/// Mean over samples that are good and not ignored. `ignore` must be sorted.
pub fn mean_ignoring(
    values: ArrayView1<'_, f64>,
    bad_value: f64,
    ignore: &[usize],
) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for (i, &v) in values.iter().enumerate() {
        if is_bad(v, bad_value) || is_ignored(i, ignore) {
            continue;
        }
        sum += v;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// (min, max) over good samples, or None if all samples are bad.
pub fn min_max_ignoring(values: ArrayView1<'_, f64>, bad_value: f64) -> Option<(f64, f64)> {
    let mut range: Option<(f64, f64)> = None;
    for &v in values.iter() {
        if is_bad(v, bad_value) {
            continue;
        }
        range = Some(match range {
            None => (v, v),
            Some((lo, hi)) => (lo.min(v), hi.max(v)),
        });
    }
    range
}

/// First differences, one element shorter than the input.
pub fn diff(values: ArrayView1<'_, f64>) -> Array1<f64> {
    if values.len() < 2 {
        return Array1::zeros(0);
    }
    Array1::from_iter((1..values.len()).map(|i| values[i] - values[i - 1]))
}

/// Sum of squared errors between two series over good, non-ignored samples.
pub fn sum_square_err(
    a: ArrayView1<'_, f64>,
    b: ArrayView1<'_, f64>,
    bad_value: f64,
    ignore: &[usize],
) -> f64 {
    let n = a.len().min(b.len());
    let mut sum = 0.0;
    for i in 0..n {
        if is_bad(a[i], bad_value) || is_bad(b[i], bad_value) || is_ignored(i, ignore) {
            continue;
        }
        let e = a[i] - b[i];
        sum += e * e;
    }
    sum
}

/// Sum of absolute errors between two series over good, non-ignored samples.
pub fn sum_abs_err(
    a: ArrayView1<'_, f64>,
    b: ArrayView1<'_, f64>,
    bad_value: f64,
    ignore: &[usize],
) -> f64 {
    let n = a.len().min(b.len());
    let mut sum = 0.0;
    for i in 0..n {
        if is_bad(a[i], bad_value) || is_bad(b[i], bad_value) || is_ignored(i, ignore) {
            continue;
        }
        sum += (a[i] - b[i]).abs();
    }
    sum
}

/// Coefficient of determination between a measured and a modelled series,
/// as a fraction (1 is a perfect fit, can go negative for poor fits).
/// Returns 0 when degenerate (no good samples, or zero variance).
pub fn r_squared(
    y: ArrayView1<'_, f64>,
    y_modelled: ArrayView1<'_, f64>,
    bad_value: f64,
    ignore: &[usize],
) -> f64 {
    let Some(y_mean) = mean_ignoring(y, bad_value, ignore) else {
        return 0.0;
    };
    let n = y.len().min(y_modelled.len());
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for i in 0..n {
        if is_bad(y[i], bad_value) || is_bad(y_modelled[i], bad_value) || is_ignored(i, ignore) {
            continue;
        }
        let res = y[i] - y_modelled[i];
        let dev = y[i] - y_mean;
        ss_res += res * res;
        ss_tot += dev * dev;
    }
    if ss_tot <= 0.0 {
        return 0.0;
    }
    1.0 - ss_res / ss_tot
}

/// Round to the given number of significant digits.
pub fn round_to_significant_digits(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let factor = 10f64.powi(digits as i32 - 1 - magnitude);
    (value * factor).round() / factor
}
