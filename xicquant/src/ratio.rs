//! Label state ratios.
//!
//! A [`Ratios`] holds the integrated amplitude of every label state (columns) across
//! replicates (rows), alongside the matching noise baselines. Normalizing it against
//! one reference state produces a [`NormalizedRatios`] ready for reporting, falling
//! back to inequality bounds or `∞` when the reference state was not observed.
use std::fmt::Display;

use itertools::Itertools;
use thiserror::Error;
use tracing::trace;

/// The glyph reported when the reference state and its noise are both zero
pub const INFINITY_SYMBOL: &str = "\u{221E}";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Weighting {
    /// Average the raw amplitudes across replicates before dividing
    #[default]
    Weighted,
    /// Divide within each replicate before averaging
    Unweighted,
}

/// How the reference (normalization) state is chosen
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RatioReference {
    #[default]
    Light,
    Medium,
    Heavy,
    /// The state with the smallest mean amplitude
    Minimum,
    /// The state with the largest mean amplitude
    Maximum,
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RatioError {
    #[error("Ratio and noise arrays differ in shape: {ratios:?} != {noise:?}")]
    ShapeMismatch {
        ratios: (usize, usize),
        noise: (usize, usize),
    },
    #[error("Row {row} has {found} states, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Reference index {index} is out of range for {states} states")]
    IndexOutOfRange { index: usize, states: usize },
    #[error("Cannot compute ratios without any label states")]
    NoStates,
}

fn nan_to_num(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v
    }
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

/// Population standard deviation of the non-NaN values
fn nanstd(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.filter(|v| !v.is_nan()).collect();
    if values.is_empty() {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Format a ratio rounded to three decimals with trailing zeros removed, keeping at
/// least one decimal place
pub fn format_ratio(value: f64) -> String {
    let s = format!("{:.3}", value);
    let trimmed = s.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_string()
    }
}

/// A single reportable ratio
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatioValue {
    Value(f64),
    /// A lower bound, used when the reference state was not observed
    GreaterThan(f64),
    /// An upper bound, used when this state was not observed
    LessThan(f64),
    Infinite,
    Missing,
}

impl RatioValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            RatioValue::Value(v) | RatioValue::GreaterThan(v) | RatioValue::LessThan(v) => {
                Some(*v)
            }
            RatioValue::Infinite => Some(f64::INFINITY),
            RatioValue::Missing => None,
        }
    }
}

impl Display for RatioValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RatioValue::Value(v) => f.write_str(&format_ratio(*v)),
            RatioValue::GreaterThan(v) => write!(f, ">{v:.1}"),
            RatioValue::LessThan(v) => write!(f, "<{v:.3}"),
            RatioValue::Infinite => f.write_str(INFINITY_SYMBOL),
            RatioValue::Missing => f.write_str("-"),
        }
    }
}

/// The outcome of normalizing a [`Ratios`]
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRatios {
    pub values: Vec<RatioValue>,
    /// Standard deviations, only present in the non-degenerate case with more than one
    /// replicate
    pub errors: Vec<Option<f64>>,
    /// Whether the values are bounds rather than measured ratios
    pub estimated: bool,
    pub index: usize,
}

impl NormalizedRatios {
    pub fn is_missing(&self) -> bool {
        self.values.iter().all(|v| v.is_missing())
    }

    pub fn error_string(&self) -> String {
        self.errors
            .iter()
            .map(|e| match e {
                Some(v) if v.is_finite() => format_ratio(*v),
                _ => "-".to_string(),
            })
            .join(":")
    }
}

impl Display for NormalizedRatios {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_missing() {
            return f.write_str("-");
        }
        write!(f, "{}", self.values.iter().join(":"))
    }
}

/// Amplitudes of every label state across replicates
#[derive(Debug, Clone, PartialEq)]
pub struct Ratios {
    ratios: Vec<Vec<f64>>,
    noise: Vec<Vec<f64>>,
    index: usize,
    n_states: usize,
}

impl Ratios {
    fn check_shape(ratios: &[Vec<f64>], noise: &[Vec<f64>]) -> Result<usize, RatioError> {
        let n_states = ratios
            .first()
            .map(|r| r.len())
            .or_else(|| noise.first().map(|r| r.len()))
            .ok_or(RatioError::NoStates)?;
        if n_states == 0 {
            return Err(RatioError::NoStates);
        }
        for (row, values) in ratios.iter().chain(noise.iter()).enumerate() {
            if values.len() != n_states {
                return Err(RatioError::RaggedRow {
                    row: row % ratios.len().max(1),
                    expected: n_states,
                    found: values.len(),
                });
            }
        }
        if ratios.len() != noise.len() {
            return Err(RatioError::ShapeMismatch {
                ratios: (ratios.len(), n_states),
                noise: (noise.len(), n_states),
            });
        }
        Ok(n_states)
    }

    /// Create a new set of ratios normalized against an explicit state
    pub fn with_index(ratios: Vec<Vec<f64>>, noise: Vec<Vec<f64>>, index: usize) -> Result<Self, RatioError> {
        let n_states = Self::check_shape(&ratios, &noise)?;
        if index >= n_states {
            return Err(RatioError::IndexOutOfRange {
                index,
                states: n_states,
            });
        }
        Ok(Self {
            ratios,
            noise,
            index,
            n_states,
        })
    }

    /// Create a new set of ratios, choosing the reference state by `reference`
    pub fn new(ratios: Vec<Vec<f64>>, noise: Vec<Vec<f64>>, reference: RatioReference) -> Result<Self, RatioError> {
        let n_states = Self::check_shape(&ratios, &noise)?;
        let index = Self::resolve_reference(&ratios, n_states, reference);
        Self::with_index(ratios, noise, index)
    }

    fn resolve_reference(ratios: &[Vec<f64>], n_states: usize, reference: RatioReference) -> usize {
        let means = || (0..n_states).map(|s| nanmean(ratios.iter().map(|r| r[s])));
        match reference {
            RatioReference::Light => 0,
            RatioReference::Heavy => n_states - 1,
            RatioReference::Medium => {
                if n_states <= 2 {
                    0
                } else {
                    (n_states - 1) / 2
                }
            }
            RatioReference::Minimum => means()
                .enumerate()
                .filter(|(_, m)| !m.is_nan())
                .fold(None, |best: Option<(usize, f64)>, (i, m)| match best {
                    Some((_, b)) if b <= m => best,
                    _ => Some((i, m)),
                })
                .map(|(i, _)| i)
                .unwrap_or_default(),
            RatioReference::Maximum => means()
                .enumerate()
                .filter(|(_, m)| !m.is_nan())
                .fold(None, |best: Option<(usize, f64)>, (i, m)| match best {
                    Some((_, b)) if b >= m => best,
                    _ => Some((i, m)),
                })
                .map(|(i, _)| i)
                .unwrap_or_default(),
            RatioReference::Index(i) => i,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn n_rows(&self) -> usize {
        self.ratios.len()
    }

    pub fn ratios(&self) -> &[Vec<f64>] {
        &self.ratios
    }

    pub fn noise(&self) -> &[Vec<f64>] {
        &self.noise
    }

    /// The number of non-NaN observations of each state
    pub fn counts(&self) -> Vec<usize> {
        (0..self.n_states)
            .map(|s| self.ratios.iter().filter(|r| !r[s].is_nan()).count())
            .collect()
    }

    /// Keep only the replicate rows where every state or no state is NaN, returning the
    /// surviving ratio and noise rows.
    pub fn filter_nan(&self) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        self.ratios
            .iter()
            .zip(self.noise.iter())
            .filter(|(row, _)| {
                let n_nan = row.iter().filter(|v| v.is_nan()).count();
                n_nan == 0 || n_nan == row.len()
            })
            .map(|(r, n)| (r.clone(), n.clone()))
            .unzip()
    }

    fn column_mean(rows: &[Vec<f64>], state: usize) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        rows.iter().map(|r| nan_to_num(r[state])).sum::<f64>() / rows.len() as f64
    }

    fn degenerate(&self, means: &[f64], noise_means: &[f64]) -> NormalizedRatios {
        let norm_noise = noise_means[self.index];
        let estimated_values = (0..self.n_states)
            .map(|s| {
                if s == self.index {
                    RatioValue::Value(1.0)
                } else if norm_noise != 0.0 {
                    RatioValue::GreaterThan(means[s] / norm_noise)
                } else {
                    RatioValue::Infinite
                }
            })
            .collect();
        NormalizedRatios {
            values: estimated_values,
            errors: vec![None; self.n_states],
            estimated: true,
            index: self.index,
        }
    }

    /// Normalize the replicate means of each state against the reference state mean.
    /// NaN observations count as zero.
    pub fn weighted_ratio(&self) -> NormalizedRatios {
        let (rows, noise) = self.filter_nan();
        let means: Vec<f64> = (0..self.n_states).map(|s| Self::column_mean(&rows, s)).collect();
        let noise_means: Vec<f64> = (0..self.n_states)
            .map(|s| Self::column_mean(&noise, s))
            .collect();
        let norm = means[self.index];
        if norm == 0.0 {
            trace!("Reference state {} has no signal", self.index);
            return self.degenerate(&means, &noise_means);
        }

        let values = (0..self.n_states)
            .map(|s| {
                if s == self.index {
                    RatioValue::Value(1.0)
                } else if means[s] == 0.0 && noise_means[s] != 0.0 {
                    RatioValue::LessThan(noise_means[s] / norm)
                } else {
                    RatioValue::Value(means[s] / norm)
                }
            })
            .collect();
        let errors = (0..self.n_states)
            .map(|s| {
                if rows.len() > 1 && s != self.index {
                    Some(nanstd(rows.iter().map(|r| nan_to_num(r[s]))) / norm)
                } else {
                    None
                }
            })
            .collect();
        NormalizedRatios {
            values,
            errors,
            estimated: false,
            index: self.index,
        }
    }

    /// Divide each replicate by its own reference state, then average the per-replicate
    /// ratios. A reference state that was never observed is the degenerate case.
    pub fn unweighted_ratio(&self) -> NormalizedRatios {
        let (rows, noise) = self.filter_nan();
        if rows.iter().all(|r| r[self.index].is_nan()) {
            let means: Vec<f64> = (0..self.n_states).map(|s| Self::column_mean(&rows, s)).collect();
            let noise_means: Vec<f64> = (0..self.n_states)
                .map(|s| Self::column_mean(&noise, s))
                .collect();
            return self.degenerate(&means, &noise_means);
        }

        let per_row: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| {
                let norm = r[self.index];
                r.iter()
                    .map(|v| if norm == 0.0 { f64::NAN } else { v / norm })
                    .collect()
            })
            .collect();
        let values = (0..self.n_states)
            .map(|s| {
                if s == self.index {
                    return RatioValue::Value(1.0);
                }
                let mean = nanmean(per_row.iter().map(|r| r[s]));
                let noise_mean = Self::column_mean(&noise, s);
                let norm_mean = Self::column_mean(&rows, self.index);
                if mean == 0.0 && noise_mean != 0.0 && norm_mean != 0.0 {
                    RatioValue::LessThan(noise_mean / norm_mean)
                } else if mean.is_nan() {
                    RatioValue::Missing
                } else {
                    RatioValue::Value(mean)
                }
            })
            .collect();
        let errors = (0..self.n_states)
            .map(|s| {
                if per_row.len() > 1 && s != self.index {
                    Some(nanstd(per_row.iter().map(|r| r[s])))
                } else {
                    None
                }
            })
            .collect();
        NormalizedRatios {
            values,
            errors,
            estimated: false,
            index: self.index,
        }
    }

    pub fn normalize(&self, weighting: Weighting) -> NormalizedRatios {
        match weighting {
            Weighting::Weighted => self.weighted_ratio(),
            Weighting::Unweighted => self.unweighted_ratio(),
        }
    }

    /// Whether every observation is NaN
    pub fn is_missing(&self) -> bool {
        self.ratios.iter().flatten().all(|v| v.is_nan())
    }

    /// Render with `weighting`, or `-` when nothing was observed
    pub fn to_string_with(&self, weighting: Weighting) -> String {
        if self.is_missing() {
            "-".to_string()
        } else {
            self.normalize(weighting).to_string()
        }
    }
}

impl Display for Ratios {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_with(Weighting::Weighted))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const NAN: f64 = f64::NAN;

    fn zeros(rows: usize, states: usize) -> Vec<Vec<f64>> {
        vec![vec![0.0; states]; rows]
    }

    #[test]
    fn test_format() {
        assert_eq!(format_ratio(1.0), "1.0");
        assert_eq!(format_ratio(0.5), "0.5");
        assert_eq!(format_ratio(2.0 / 3.0), "0.667");
        assert_eq!(RatioValue::GreaterThan(12.345).to_string(), ">12.3");
        assert_eq!(RatioValue::LessThan(0.01234).to_string(), "<0.012");
        assert_eq!(RatioValue::Infinite.to_string(), "\u{221E}");
    }

    #[test]
    fn test_shape_validation() {
        assert_eq!(
            Ratios::with_index(vec![vec![1.0, 2.0]], zeros(1, 2), 2),
            Err(RatioError::IndexOutOfRange {
                index: 2,
                states: 2
            })
        );
        assert!(matches!(
            Ratios::with_index(vec![vec![1.0, 2.0]], zeros(2, 2), 0),
            Err(RatioError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            Ratios::with_index(vec![vec![1.0, 2.0], vec![1.0]], zeros(2, 2), 0),
            Err(RatioError::RaggedRow { .. })
        ));
        assert_eq!(
            Ratios::with_index(vec![], vec![], 0),
            Err(RatioError::NoStates)
        );
    }

    #[test]
    fn test_reference_policy() {
        let rows = vec![vec![3.0, 1.0, 2.0, 5.0]];
        let pick = |r| Ratios::new(rows.clone(), zeros(1, 4), r).unwrap().index();
        assert_eq!(pick(RatioReference::Light), 0);
        assert_eq!(pick(RatioReference::Heavy), 3);
        assert_eq!(pick(RatioReference::Medium), 1);
        assert_eq!(pick(RatioReference::Minimum), 1);
        assert_eq!(pick(RatioReference::Maximum), 3);
        assert_eq!(pick(RatioReference::Index(2)), 2);

        let two = Ratios::new(vec![vec![1.0, 1.0]], zeros(1, 2), RatioReference::Medium).unwrap();
        assert_eq!(two.index(), 0);
        let tie = Ratios::new(vec![vec![1.0, 1.0]], zeros(1, 2), RatioReference::Maximum).unwrap();
        assert_eq!(tie.index(), 0);
    }

    #[test]
    fn test_filter_nan() {
        let ratios = Ratios::with_index(
            vec![vec![1.0, NAN], vec![2.0, 4.0], vec![NAN, NAN]],
            zeros(3, 2),
            0,
        )
        .unwrap();
        let (rows, noise) = ratios.filter_nan();
        assert_eq!(rows.len(), 2);
        assert_eq!(noise.len(), 2);
        assert_eq!(rows[0], vec![2.0, 4.0]);
        assert!(rows[1].iter().all(|v| v.is_nan()));
        assert_eq!(ratios.counts(), vec![2, 1]);
    }

    #[test]
    fn test_weighted() {
        let ratios = Ratios::with_index(
            vec![vec![1.0, NAN], vec![2.0, 4.0]],
            zeros(2, 2),
            0,
        )
        .unwrap();
        let normalized = ratios.weighted_ratio();
        assert_eq!(normalized.to_string(), "1.0:2.0");
        assert!(!normalized.estimated);
        // a single replicate survives filtering
        assert_eq!(normalized.error_string(), "-:-");

        let ratios = Ratios::with_index(
            vec![vec![2.0, 1.0, 0.0], vec![2.0, 3.0, 0.0]],
            vec![vec![0.0, 0.0, 0.5], vec![0.0, 0.0, 0.5]],
            0,
        )
        .unwrap();
        let normalized = ratios.weighted_ratio();
        assert_eq!(normalized.to_string(), "1.0:1.0:<0.250");
        assert_eq!(normalized.errors[1], Some(0.5));
    }

    #[test]
    fn test_weighted_degenerate() {
        let ratios = Ratios::with_index(vec![vec![0.0, 5.0]], vec![vec![2.0, 0.0]], 0).unwrap();
        let normalized = ratios.weighted_ratio();
        assert_eq!(normalized.to_string(), "1.0:>2.5");
        assert!(normalized.estimated);

        let ratios = Ratios::with_index(vec![vec![0.0, 5.0]], zeros(1, 2), 0).unwrap();
        let normalized = ratios.weighted_ratio();
        assert_eq!(normalized.to_string(), "1.0:\u{221E}");
        assert!(normalized.estimated);
        assert_eq!(normalized.error_string(), "-:-");
    }

    #[test]
    fn test_unweighted() {
        let ratios = Ratios::with_index(
            vec![vec![1.0, 2.0], vec![2.0, 2.0]],
            zeros(2, 2),
            0,
        )
        .unwrap();
        let normalized = ratios.unweighted_ratio();
        assert_eq!(normalized.to_string(), "1.0:1.5");
        assert_eq!(normalized.errors[1], Some(0.5));

        let ratios = Ratios::with_index(vec![vec![NAN, NAN]], vec![vec![1.0, 0.0]], 1).unwrap();
        assert!(ratios.is_missing());
        assert_eq!(ratios.to_string_with(Weighting::Unweighted), "-");
    }

    #[test]
    fn test_unweighted_zero_reference_row() {
        // a zero reference leaves nothing to divide by, so the whole row drops out
        let ratios = Ratios::with_index(vec![vec![0.0, 4.0]], zeros(1, 2), 0).unwrap();
        let normalized = ratios.unweighted_ratio();
        assert_eq!(normalized.values[1], RatioValue::Missing);
        assert_eq!(normalized.to_string(), "1.0:-");
        assert!(!normalized.estimated);

        let ratios = Ratios::with_index(
            vec![vec![0.0, 4.0], vec![2.0, 4.0]],
            zeros(2, 2),
            0,
        )
        .unwrap();
        assert_eq!(ratios.unweighted_ratio().to_string(), "1.0:2.0");
        assert_eq!(ratios.weighted_ratio().to_string(), "1.0:4.0");
    }

    #[test]
    fn test_reference_is_unity() {
        let cases = [
            vec![vec![3.0, 0.0, 7.0]],
            vec![vec![0.0, 0.0, 0.0]],
            vec![vec![0.0, 1.0, 2.0], vec![0.0, 4.0, 1.0]],
        ];
        for rows in cases {
            for index in 0..3 {
                let n = rows.len();
                let ratios = Ratios::with_index(rows.clone(), zeros(n, 3), index).unwrap();
                for weighting in [Weighting::Weighted, Weighting::Unweighted] {
                    let normalized = ratios.normalize(weighting);
                    assert_eq!(normalized.values[index].to_string(), "1.0");
                }
            }
        }
    }
}
