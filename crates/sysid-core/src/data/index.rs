//! Ignore-index set operations.
//!
//! Identification excludes samples by index rather than by deleting them,
//! so that window positions and delays stay aligned. These helpers build
//! and combine such index sets; all results are sorted and deduplicated.

use ndarray::ArrayView1;

/// Indices of bad samples (NaN or the sentinel) in a series.
pub fn find_bad_indices(values: ArrayView1<'_, f64>, bad_value: f64) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| v.is_nan() || v == bad_value)
        .map(|(i, _)| i)
        .collect()
}

/// Union of two index sets.
pub fn union_indices(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out: Vec<usize> = a.iter().chain(b.iter()).copied().collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// For each index, also include the following index. A bad sample poisons
/// the next regression row as well, since that row references it through
/// the lagged signals.
pub fn append_trailing_indices(indices: &[usize], max_len: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(indices.len() * 2);
    for &i in indices {
        if i < max_len {
            out.push(i);
        }
        if i + 1 < max_len {
            out.push(i + 1);
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

/// Shift absolute indices into a window starting at `window_start`,
/// discarding indices that fall outside `0..window_len`.
pub fn shift_indices(indices: &[usize], window_start: usize, window_len: usize) -> Vec<usize> {
    let mut out: Vec<usize> = indices
        .iter()
        .filter_map(|&i| i.checked_sub(window_start))
        .filter(|&j| j < window_len)
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}
