//! Descriptive and rolling statistics over `f64` slices
//!
//! Rolling functions follow trailing-window semantics: the value at `t` covers
//! `[t - window + 1, t]`, ignores non-finite entries, and is `None` until at
//! least `min_periods` finite observations are inside the window.

/// Arithmetic mean of finite values
pub fn mean(values: &[f64]) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Sample variance (n - 1 denominator) of finite values
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return None;
    }
    let m = finite.iter().sum::<f64>() / finite.len() as f64;
    let ss: f64 = finite.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (finite.len() - 1) as f64)
}

/// Sample standard deviation (n - 1 denominator) of finite values
pub fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Median of finite values
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}

fn rolling<F>(values: &[f64], window: usize, min_periods: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let window = window.max(1);
    (0..values.len())
        .map(|t| {
            let start = (t + 1).saturating_sub(window);
            let slice = &values[start..=t];
            let finite = slice.iter().filter(|v| v.is_finite()).count();
            if finite < min_periods.max(1) {
                None
            } else {
                f(slice)
            }
        })
        .collect()
}

pub fn rolling_mean(values: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling(values, window, min_periods, mean)
}

pub fn rolling_std(values: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling(values, window, min_periods, sample_std)
}

pub fn rolling_median(values: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling(values, window, min_periods, median)
}

/// Percentile rank of the newest value inside each full trailing window.
///
/// Ties take the average rank, so a window of identical values ranks at
/// `(n + 1) / (2n)`. Windows that are not full, or contain a non-finite
/// value, yield `None`.
pub fn rolling_percentile_rank(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    (0..values.len())
        .map(|t| {
            if t + 1 < window {
                return None;
            }
            let slice = &values[t + 1 - window..=t];
            if slice.iter().any(|v| !v.is_finite()) {
                return None;
            }
            let current = values[t];
            let below = slice.iter().filter(|v| **v < current).count() as f64;
            let equal = slice.iter().filter(|v| **v == current).count() as f64;
            Some((below + (equal + 1.0) / 2.0) / window as f64)
        })
        .collect()
}

/// Fraction of `true` flags inside each full trailing window
pub fn rolling_rate(flags: &[bool], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    let mut hits = 0usize;
    flags
        .iter()
        .enumerate()
        .map(|(t, &flag)| {
            if flag {
                hits += 1;
            }
            if t >= window && flags[t - window] {
                hits -= 1;
            }
            if t + 1 < window {
                None
            } else {
                Some(hits as f64 / window as f64)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[f64::NAN]), None);
    }

    #[test]
    fn sample_std_uses_bessel_correction() {
        let std = sample_std(&[0.05, -0.06, 0.04]).unwrap();
        let m = 0.01;
        let expected = (((0.04_f64).powi(2) + (0.07_f64).powi(2) + (0.03_f64).powi(2)) / 2.0).sqrt();
        assert!((mean(&[0.05, -0.06, 0.04]).unwrap() - m).abs() < 1e-12);
        assert!((std - expected).abs() < 1e-12);
        assert_eq!(sample_std(&[1.0]), None);
    }

    #[test]
    fn rolling_respects_min_periods() {
        let values: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let means = rolling_mean(&values, 4, 3);

        assert_eq!(means[1], None);
        assert_eq!(means[2], Some(1.0));
        assert_eq!(means[9], Some(7.5));
    }

    #[test]
    fn percentile_rank_of_newest_value() {
        let ranks = rolling_percentile_rank(&[1.0, 2.0, 3.0, 4.0, 0.5], 4);

        assert_eq!(ranks[2], None);
        assert_eq!(ranks[3], Some(1.0));
        assert_eq!(ranks[4], Some(0.25));
        assert_eq!(rolling_percentile_rank(&[2.0, 2.0], 2)[1], Some(0.75));
    }

    #[test]
    fn rolling_rate_counts_flags() {
        let rates = rolling_rate(&[true, false, false, true, false], 2);
        assert_eq!(rates, vec![None, Some(0.5), Some(0.0), Some(0.5), Some(0.5)]);
    }
}
