//! Numeric kernel shared by the estimation engines.
//!
//! Everything here is allocation-light, never panics, and returns `None`
//! instead of `NaN` when an estimate is undefined (empty input, degenerate
//! time spread).  Every division is guarded with [`EPSILON`].

/// Guard added to denominators that may legitimately be zero.
pub const EPSILON: f64 = 1e-9;

/// Scale factor turning a MAD into a standard-deviation estimate for
/// normally distributed data.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Clamp to `[0, 1]`, mapping NaN to `0`.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance.
pub fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let v = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(v.max(0.0))
}

pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Median absolute deviation around `center`.
pub fn mad(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Weighted least-squares slope of `x` over `t`.
///
/// `samples` are `(t, x, weight)` triples.  Returns `None` with fewer than two
/// positively weighted samples or when all samples share one instant.
pub fn weighted_slope(samples: &[(f64, f64, f64)]) -> Option<f64> {
    let usable: Vec<_> = samples
        .iter()
        .copied()
        .filter(|(t, x, w)| t.is_finite() && x.is_finite() && *w > 0.0)
        .collect();
    if usable.len() < 2 {
        return None;
    }
    let w_sum: f64 = usable.iter().map(|s| s.2).sum();
    if w_sum <= EPSILON {
        return None;
    }
    let t_mean = usable.iter().map(|s| s.2 * s.0).sum::<f64>() / w_sum;
    let x_mean = usable.iter().map(|s| s.2 * s.1).sum::<f64>() / w_sum;
    let mut num = 0.0;
    let mut den = 0.0;
    for (t, x, w) in &usable {
        num += w * (t - t_mean) * (x - x_mean);
        den += w * (t - t_mean).powi(2);
    }
    if den <= EPSILON {
        return None;
    }
    let slope = num / den;
    slope.is_finite().then_some(slope)
}

/// Ordinary least-squares line through `(t, x)` points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination in `[0, 1]`.
    pub r_squared: f64,
}

pub fn linear_fit(points: &[(f64, f64)]) -> Option<LinearFit> {
    let weighted: Vec<_> = points.iter().map(|&(t, x)| (t, x, 1.0)).collect();
    let slope = weighted_slope(&weighted)?;
    let n = points.len() as f64;
    let t_mean = points.iter().map(|p| p.0).sum::<f64>() / n;
    let x_mean = points.iter().map(|p| p.1).sum::<f64>() / n;
    let intercept = x_mean - slope * t_mean;

    let ss_tot: f64 = points.iter().map(|p| (p.1 - x_mean).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|p| (p.1 - (intercept + slope * p.0)).powi(2))
        .sum();
    // A perfectly flat series is perfectly explained by a flat line.
    let r_squared = if ss_tot <= EPSILON {
        if ss_res <= EPSILON { 1.0 } else { 0.0 }
    } else {
        clamp_unit(1.0 - ss_res / ss_tot)
    };
    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Error function (Abramowitz & Stegun 7.1.26, |error| < 1.5e-7).
pub fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

/// `P(X ≤ x)` for `X ~ N(mean, std_dev²)`.  A zero spread degenerates to a
/// step at `mean`.
pub fn normal_cdf(x: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev <= EPSILON {
        return if x >= mean { 1.0 } else { 0.0 };
    }
    0.5 * (1.0 + erf((x - mean) / (std_dev * std::f64::consts::SQRT_2)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_yield_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(variance(&[]), None);
        assert_eq!(median(&[]), None);
        assert_eq!(weighted_slope(&[]), None);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn mad_of_spread_values() {
        let v = [20.0, 20.3, 45.0];
        let m = median(&v).unwrap();
        assert!((mad(&v, m).unwrap() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn weighted_slope_recovers_line() {
        let samples: Vec<_> = (0..5).map(|i| (i as f64, 2.0 * i as f64 + 1.0, 1.0)).collect();
        assert!((weighted_slope(&samples).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_slope_degenerate_time_is_none() {
        let samples = [(1.0, 0.0, 1.0), (1.0, 5.0, 1.0)];
        assert_eq!(weighted_slope(&samples), None);
    }

    #[test]
    fn linear_fit_flat_series_is_perfect() {
        let fit = linear_fit(&[(0.0, 3.0), (1.0, 3.0), (2.0, 3.0)]).unwrap();
        assert!(fit.slope.abs() < 1e-12);
        assert_eq!(fit.r_squared, 1.0);
    }

    #[test]
    fn normal_cdf_symmetry() {
        assert!((normal_cdf(0.0, 0.0, 1.0) - 0.5).abs() < 1e-7);
        let within_one_sigma = normal_cdf(1.0, 0.0, 1.0) - normal_cdf(-1.0, 0.0, 1.0);
        assert!((within_one_sigma - 0.6827).abs() < 1e-3);
        assert_eq!(normal_cdf(0.5, 1.0, 0.0), 0.0);
    }

    #[test]
    fn clamp_unit_handles_nan() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(2.0), 1.0);
    }
}
