//! Chromatographic peak shape and isotope pattern scoring.
//!
//! All functions here are pure functions over slices. Degenerate inputs (empty,
//! constant, mismatched lengths) produce a score of 0 or NaN as documented rather
//! than an error.
use num_traits::Float;
use tracing::trace;

use crate::hierarchy::{Document, HierarchyError, NodeId, NodeKind};
use crate::window::LinearRange;

pub type ScoreType = f64;

/// Evaluate a Gaussian curve at `x`
#[inline]
pub fn gaussian<T: Float>(x: T, height: T, mean: T, sigma: T) -> T {
    let two = T::one() + T::one();
    height * (-((x - mean).powi(2)) / (two * sigma.powi(2))).exp()
}

/// The moments-based parameters of a Gaussian peak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianParams {
    pub height: f64,
    pub mean: f64,
    pub sigma: f64,
}

impl GaussianParams {
    pub fn is_finite(&self) -> bool {
        self.height.is_finite() && self.mean.is_finite() && self.sigma.is_finite()
    }

    pub fn curve(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .map(|xi| gaussian(*xi, self.height, self.mean, self.sigma))
            .collect()
    }
}

/// Estimate Gaussian parameters from the intensity-weighted moments of `y` over `x`.
///
/// The variance receives Sheppard's correction for binned data (`bin_width^2 / 12`)
/// and is floored at zero. Any parameter may be NaN when `y` sums to zero or there
/// are fewer than two points.
pub fn fit_estimate(x: &[f64], y: &[f64]) -> GaussianParams {
    let n = x.len().min(y.len());
    let (x, y) = (&x[..n], &y[..n]);
    let height = y.iter().copied().fold(f64::NAN, f64::max);
    let total: f64 = y.iter().sum();
    let mean = x.iter().zip(y).map(|(xi, yi)| xi * yi).sum::<f64>() / total;
    let bin_width = if n > 1 {
        (x[n - 1] - x[0]) / (n - 1) as f64
    } else {
        f64::NAN
    };
    let second_moment: f64 = x.iter().zip(y).map(|(xi, yi)| xi * xi * yi).sum();
    let variance =
        (second_moment - total * mean * mean) / (total - 1.0) - bin_width * bin_width / 12.0;
    let sigma = if variance.is_nan() {
        f64::NAN
    } else {
        variance.max(0.0).sqrt()
    };
    GaussianParams {
        height,
        mean,
        sigma,
    }
}

/// The Pearson correlation coefficient of two equal length sequences, NaN when either
/// has zero variance or the lengths differ
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::NAN;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (ai, bi) in a.iter().zip(b) {
        let da = ai - mean_a;
        let db = bi - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        f64::NAN
    } else {
        cov / denom
    }
}

/// Score how well `y` over `x` is described by a Gaussian, in `[0, 1]`.
///
/// Too few points (4 or less) or a non-finite parameter estimate score 0.
pub fn fit_gaussian(x: &[f64], y: &[f64]) -> ScoreType {
    if x.len() <= 4 || x.len() != y.len() {
        return 0.0;
    }
    let params = fit_estimate(x, y);
    if !params.is_finite() {
        trace!("Degenerate Gaussian estimate {params:?}");
        return 0.0;
    }
    let r = pearson(y, &params.curve(x));
    if r.is_nan() {
        0.0
    } else {
        r.clamp(0.0, 1.0)
    }
}

/// Scale `v` to unit Euclidean norm. An all-zero vector becomes all NaN.
pub fn normalize(v: &[f64]) -> Vec<f64> {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

/// The cosine similarity `Σuv / sqrt(Σu²·Σv²)`, capped at 1.
///
/// Two all-zero vectors are identical (1), a single all-zero vector matches nothing (0).
pub fn angle_sqrt(u: &[f64], v: &[f64]) -> ScoreType {
    let norm_u: f64 = u.iter().map(|x| x * x).sum();
    let norm_v: f64 = v.iter().map(|x| x * x).sum();
    match (norm_u == 0.0, norm_v == 0.0) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }
    let dotp: f64 = u.iter().zip(v).map(|(a, b)| a * b).sum();
    (dotp / (norm_u * norm_v).sqrt()).min(1.0)
}

/// The cosine similarity of the square roots of the unit-normalized inputs
pub fn normalized_angle_sqrt(a: &[f64], b: &[f64]) -> ScoreType {
    let sa: Vec<f64> = normalize(a).into_iter().map(|x| x.max(0.0).sqrt()).collect();
    let sb: Vec<f64> = normalize(b).into_iter().map(|x| x.max(0.0).sqrt()).collect();
    angle_sqrt(&sa, &sb)
}

/// Compare two intensity profiles with [`normalized_angle_sqrt`].
///
/// Empty, all-zero or mismatched inputs score 0.
pub fn normalized_edge_dotp(a: &[f64], b: &[f64]) -> ScoreType {
    let is_zero = |v: &[f64]| v.iter().all(|x| *x == 0.0);
    if a.is_empty() || a.len() != b.len() || is_zero(a) || is_zero(b) {
        return 0.0;
    }
    normalized_angle_sqrt(a, b)
}

/// How observed isotope traces are compared against the theoretical pattern
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MassCorrelationMode {
    /// Correlate each isotope's summed intensity with the pattern
    #[default]
    Summed,
    /// Correlate each isotope's mean ratio to the first isotope with the pattern ratios
    Ratio,
    /// Correlate every time point separately and average
    Pointwise,
}

fn nanmean(values: impl Iterator<Item = f64>) -> f64 {
    let (total, n) = values
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(t, n), v| (t + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        total / n as f64
    }
}

/// Correlate an observed isotope profile with the expected one over their common
/// length. Profiles with no variance match when they have the same normalized shape.
fn pattern_correlation(observed: &[f64], expected: &[f64]) -> f64 {
    let n = observed.len().min(expected.len());
    if n == 0 {
        return 0.0;
    }
    let (observed, expected) = (&observed[..n], &expected[..n]);
    let r = pearson(observed, expected);
    if !r.is_nan() {
        return r;
    }
    let a = normalize(observed);
    let b = normalize(expected);
    let same_shape = a
        .iter()
        .zip(b.iter())
        .all(|(x, y)| x.is_finite() && y.is_finite() && (x - y).abs() < 1e-9);
    if same_shape {
        1.0
    } else {
        0.0
    }
}

/// Score the agreement between a set of isotope traces (one row per isotope, all over
/// the same time points) and the theoretical abundance `pattern`. NaN results are
/// reported as 0.
pub fn get_masscorrelation(isotopes: &[Vec<f64>], pattern: &[f64], mode: MassCorrelationMode) -> ScoreType {
    if isotopes.is_empty() || pattern.is_empty() {
        return 0.0;
    }
    let score = match mode {
        MassCorrelationMode::Summed => {
            let totals: Vec<f64> = isotopes.iter().map(|t| t.iter().sum()).collect();
            pattern_correlation(&totals, pattern)
        }
        MassCorrelationMode::Ratio => {
            let mono = &isotopes[0];
            let observed: Vec<f64> = isotopes
                .iter()
                .map(|trace| {
                    nanmean(trace.iter().zip(mono).map(|(v, m)| {
                        if *m > 0.0 {
                            v / m
                        } else {
                            f64::NAN
                        }
                    }))
                })
                .collect();
            let expected: Vec<f64> = pattern.iter().map(|p| p / pattern[0]).collect();
            pattern_correlation(&observed, &expected)
        }
        MassCorrelationMode::Pointwise => {
            let k = isotopes.len().min(pattern.len());
            let n_points = isotopes[..k].iter().map(|t| t.len()).min().unwrap_or(0);
            nanmean((0..n_points).map(|t| {
                let column: Vec<f64> = isotopes[..k].iter().map(|trace| trace[t]).collect();
                pearson(&column, &pattern[..k])
            }))
        }
    };
    if score.is_nan() {
        0.0
    } else {
        score
    }
}

/// The signed mass error of `observed` relative to `theoretical`, in parts per million
#[inline]
pub fn ppm_error(observed: f64, theoretical: f64) -> f64 {
    (observed - theoretical) / theoretical * 1e6
}

/// The intensity-weighted mean ppm error of an m/z trace against `theoretical_mz`,
/// along with the total weight. Points with a non-finite m/z or no intensity are
/// skipped. The error is NaN when no weight remains.
pub fn weighted_ppm(mz: &[f64], weights: &[f64], theoretical_mz: f64) -> (f64, f64) {
    let mut total_weight = 0.0;
    let mut acc = 0.0;
    for (m, w) in mz.iter().zip(weights) {
        if m.is_finite() && w.is_finite() && *w > 0.0 {
            acc += ppm_error(*m, theoretical_mz) * w;
            total_weight += w;
        }
    }
    if total_weight == 0.0 {
        (f64::NAN, 0.0)
    } else {
        (acc / total_weight, total_weight)
    }
}

impl Document {
    /// The intensity-weighted ppm error of an isotope over `bounds`, relative to its
    /// label group window, along with the total intensity used as weight
    pub fn get_isotopeppm(&self, isotope: NodeId, bounds: LinearRange) -> Result<(f64, f64), HierarchyError> {
        let node = self.node(isotope)?;
        let theoretical_mz = node
            .attrs()
            .as_isotope()
            .map(|a| a.theoretical_mz)
            .ok_or(HierarchyError::NoTrace(NodeKind::Isotope))?;
        let intensity = self.intensity(isotope, false)?;
        let mz = self.mz(isotope, false)?;
        let bounds = bounds.clamp(intensity.len().min(mz.len()));
        Ok(weighted_ppm(
            &mz[bounds.to_range()],
            &intensity[bounds.to_range()],
            theoretical_mz,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! assert_is_close {
        ($t1:expr, $t2:expr, $tol:expr, $label:literal) => {
            assert!(
                ($t1 - $t2).abs() < $tol,
                "Observed {} {}, expected {}, difference {}",
                $label,
                $t1,
                $t2,
                $t1 - $t2,
            );
        };
    }

    fn gaussian_profile() -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..21).map(|i| i as f64 * 0.5).collect();
        let y = x.iter().map(|xi| gaussian(*xi, 100.0, 5.0, 1.5)).collect();
        (x, y)
    }

    #[test]
    fn test_fit_estimate() {
        let (x, y) = gaussian_profile();
        let params = fit_estimate(&x, &y);
        assert_is_close!(params.height, 100.0, 1e-9, "height");
        assert_is_close!(params.mean, 5.0, 1e-6, "mean");
        assert_is_close!(params.sigma, 1.5, 0.1, "sigma");

        let flat = fit_estimate(&x, &vec![0.0; x.len()]);
        assert!(!flat.is_finite());
    }

    #[test]
    fn test_fit_gaussian() {
        let (x, y) = gaussian_profile();
        let score = fit_gaussian(&x, &y);
        assert!(score > 0.99, "{score}");

        let noisy: Vec<f64> = (0..21).map(|i| if i % 2 == 0 { 10.0 } else { 1.0 }).collect();
        let score = fit_gaussian(&x, &noisy);
        assert!((0.0..=1.0).contains(&score));

        assert_eq!(fit_gaussian(&x[..4], &y[..4]), 0.0);
        assert_eq!(fit_gaussian(&x, &vec![0.0; 21]), 0.0);
    }

    #[test]
    fn test_dotp() {
        assert_is_close!(normalized_edge_dotp(&[4.0, 9.0], &[4.0, 9.0]), 1.0, 1e-12, "dotp");
        assert_is_close!(normalized_edge_dotp(&[1.0, 0.0], &[0.0, 1.0]), 0.0, 1e-12, "dotp");
        let partial = normalized_edge_dotp(&[1.0, 4.0, 2.0], &[3.0, 1.0, 0.5]);
        assert!(partial > 0.0 && partial < 1.0);
        assert_eq!(normalized_edge_dotp(&[], &[]), 0.0);
        assert_eq!(normalized_edge_dotp(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(normalized_edge_dotp(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_angle_sqrt() {
        let v = [3.0, 1.0, 7.5];
        assert_is_close!(angle_sqrt(&v, &v), 1.0, 1e-12, "angle");
        assert_eq!(angle_sqrt(&[0.0, 0.0], &[0.0, 0.0]), 1.0);
        assert_eq!(angle_sqrt(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_is_close!(angle_sqrt(&[1.0, 0.0], &[0.0, 1.0]), 0.0, 1e-12, "angle");
    }

    #[test]
    fn test_masscorrelation_single_isotope() {
        let isotopes = vec![vec![1.0, 5.0, 2.0]];
        let score = get_masscorrelation(&isotopes, &[1.0], MassCorrelationMode::Summed);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_masscorrelation_modes() {
        let pattern = [0.5, 0.3, 0.2];
        let profile = [1.0, 4.0, 9.0, 4.0, 1.0];
        let isotopes: Vec<Vec<f64>> = pattern
            .iter()
            .map(|p| profile.iter().map(|v| v * p).collect())
            .collect();
        for mode in [
            MassCorrelationMode::Summed,
            MassCorrelationMode::Ratio,
            MassCorrelationMode::Pointwise,
        ] {
            let score = get_masscorrelation(&isotopes, &pattern, mode);
            assert_is_close!(score, 1.0, 1e-9, "masscorrelation");
        }

        let reversed: Vec<Vec<f64>> = isotopes.iter().rev().cloned().collect();
        let score = get_masscorrelation(&reversed, &pattern, MassCorrelationMode::Summed);
        assert!(score < 0.0);

        let silent = vec![vec![0.0; 5]; 3];
        assert_eq!(
            get_masscorrelation(&silent, &pattern, MassCorrelationMode::Ratio),
            0.0
        );
        assert_eq!(
            get_masscorrelation(&silent, &pattern, MassCorrelationMode::Pointwise),
            0.0
        );
    }

    #[test]
    fn test_weighted_ppm() {
        let theo = 1000.0;
        let mz = [1000.001, 1000.002, f64::NAN];
        let (ppm, w) = weighted_ppm(&mz, &[1.0, 3.0, 10.0], theo);
        assert_is_close!(ppm, 1.75, 1e-6, "ppm");
        assert_eq!(w, 4.0);
        let (ppm, w) = weighted_ppm(&mz, &[0.0, 0.0, 0.0], theo);
        assert!(ppm.is_nan());
        assert_eq!(w, 0.0);
    }
}
