//! Outlier test for hashrate samples.

/// Largest accepted relative deviation from the historical reference.
pub const DEFAULT_DEVIATION_THRESHOLD: f64 = 0.5;

/// Mean of `values` after dropping the single lowest and highest value.
///
/// Fewer than three values are averaged as-is. Returns `None` for an empty slice.
pub fn trimmed_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let kept = if sorted.len() >= 3 {
        &sorted[1..sorted.len() - 1]
    } else {
        &sorted[..]
    };

    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Decide whether `candidate` is admissible given recent `history`.
///
/// A single historical value is compared directly. Two or more are reduced to
/// their trimmed mean first. A zero reference cannot produce a ratio and is
/// always accepted, as is an empty history.
pub fn is_valid_hashrate(candidate: f64, history: &[f64], threshold: f64) -> bool {
    let reference = match history {
        [] => return true,
        [single] => *single,
        _ => match trimmed_mean(history) {
            Some(avg) => avg,
            None => return true,
        },
    };

    if reference == 0.0 {
        return true;
    }

    (candidate - reference).abs() / reference <= threshold
}
