//! Small descriptive statistics shared by the feature, trend and model stages.
//!
//! Missing values are `None` everywhere in the frame; these helpers take the
//! already-filtered `f64` values unless the name says otherwise. Moments
//! come from `ndarray`; the order statistics and fits are local.

use ndarray::ArrayView1;

/// Collects the present values of a column slice.
pub fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    ArrayView1::from(values).mean()
}

/// Sample standard deviation (n - 1 denominator). Needs at least two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    (values.len() >= 2).then(|| ArrayView1::from(values).std(1.0))
}


/// Median with the midpoint convention for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// Ordinary least-squares slope of `y` against `x`.
///
/// Returns `None` with fewer than two points or when every `x` is identical.
pub fn ols_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let x_mean = points.iter().map(|p| p.0).sum::<f64>() / n;
    let y_mean = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for &(x, y) in points {
        sxy += (x - x_mean) * (y - y_mean);
        sxx += (x - x_mean) * (x - x_mean);
    }
    if sxx == 0.0 {
        return None;
    }
    Some(sxy / sxx)
}

/// Slope of a series against its compacted position index `0..len`.
pub fn index_slope(values: &[f64]) -> Option<f64> {
    let points: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();
    ols_slope(&points)
}

/// Pearson correlation over pairwise-complete observations.
///
/// `None` when fewer than two complete pairs exist or either side is constant.
pub fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for &(a, b) in &pairs {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn median_uses_midpoint_for_even_lengths() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn sample_std_needs_two_points() {
        assert_eq!(sample_std(&[5.0]), None);
        assert_abs_diff_eq!(
            sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap(),
            2.138089935299395,
            epsilon = 1e-12
        );
    }

    #[test]
    fn moments_of_an_empty_slice_are_undefined() {
        assert_eq!(mean(&[]), None);
        assert_eq!(sample_std(&[3.0, 3.0]), Some(0.0));
        assert_abs_diff_eq!(mean(&[1.0, 2.0, 6.0]).unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn slope_recovers_a_line() {
        let ys = [10.0, 15.0, 20.0, 25.0];
        assert_abs_diff_eq!(index_slope(&ys).unwrap(), 5.0, epsilon = 1e-12);
        assert_eq!(ols_slope(&[(1.0, 2.0), (1.0, 3.0)]), None);
    }

    #[test]
    fn pearson_skips_incomplete_pairs_and_constant_columns() {
        let x = [Some(1.0), Some(2.0), None, Some(4.0)];
        let y = [Some(2.0), Some(4.0), Some(100.0), Some(8.0)];
        assert_abs_diff_eq!(pearson(&x, &y).unwrap(), 1.0, epsilon = 1e-12);

        let flat = [Some(1.0), Some(1.0), Some(1.0), Some(1.0)];
        assert_eq!(pearson(&x, &flat), None);
    }
}
