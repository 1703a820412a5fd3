//! NaN-aware reductions shared by the arbiter and the summary.
//!
//! NaN means "no data" throughout the crate, so every reduction here skips NaN
//! entries and returns NaN when nothing is left.

/// Mean of the non-NaN values, NaN when there are none.
pub fn nanmean(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for &v in values {
        if !v.is_nan() {
            sum += v;
            n += 1;
        }
    }
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Population standard deviation of the non-NaN values, NaN when there are none.
pub fn nanstd(values: &[f64]) -> f64 {
    let mean = nanmean(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    let mut acc = 0.0;
    let mut n = 0usize;
    for &v in values {
        if !v.is_nan() {
            let d = v - mean;
            acc += d * d;
            n += 1;
        }
    }
    (acc / n as f64).sqrt()
}

/// Mean and population std of a series; both NaN for an empty slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    (nanmean(values), nanstd(values))
}

/// `num / den`, or `None` when the denominator is zero or the quotient is not finite.
pub fn ratio(num: f64, den: f64) -> Option<f64> {
    if den == 0.0 {
        return None;
    }
    let q = num / den;
    q.is_finite().then_some(q)
}

/// Coefficient of variation in percent: `std / mean * 100`. NaN for a zero or NaN mean.
pub fn variability_pct(values: &[f64]) -> f64 {
    let (mean, std) = mean_std(values);
    ratio(std, mean).map_or(f64::NAN, |r| r * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nanmean_skips_nan() {
        assert!((nanmean(&[1.0, f64::NAN, 3.0]) - 2.0).abs() < 1e-12);
        assert!(nanmean(&[]).is_nan());
        assert!(nanmean(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_nanstd_population() {
        // Population std of [2, 4, 4, 4, 5, 5, 7, 9] is exactly 2
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((nanstd(&v) - 2.0).abs() < 1e-12);
        assert_eq!(nanstd(&[5.0]), 0.0);
    }

    #[test]
    fn test_ratio_guards() {
        assert_eq!(ratio(1.0, 0.0), None);
        assert_eq!(ratio(f64::NAN, 2.0), None);
        assert_eq!(ratio(3.0, 2.0), Some(1.5));
    }

    #[test]
    fn test_variability_pct() {
        assert_eq!(variability_pct(&[3.0, 3.0, 3.0]), 0.0);
        assert!(variability_pct(&[]).is_nan());
        assert!(variability_pct(&[-1.0, 1.0]).is_nan());
    }
}
