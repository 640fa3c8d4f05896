//! Peak area integration and the per-crosslink quantitation summary.
use std::fmt::Display;

use itertools::Itertools;
use tracing::trace;

use crate::fit::weighted_ppm;
use crate::hierarchy::{Document, HierarchyError, Levels, NodeId, NodeKind};
use crate::window::LinearRange;

/// The trapezoidal integral of `y` over `x`. Fewer than two points integrate to 0.
pub fn get_integral(x: &[f64], y: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .tuple_windows()
        .map(|((x0, y0), (x1, y1))| (x1 - x0) * (y0 + y1) / 2.0)
        .sum()
}

/// A measured quantity with an optional noise baseline
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Amplitude {
    pub name: &'static str,
    pub value: f64,
    pub baseline: f64,
}

impl Amplitude {
    pub fn new(name: &'static str, value: f64) -> Self {
        Self {
            name,
            value,
            baseline: f64::NAN,
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn has_baseline(&self) -> bool {
        !self.baseline.is_nan()
    }
}

impl Display for Amplitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_baseline() {
            write!(f, "{}={:.4e} (noise {:.4e})", self.name, self.value, self.baseline)
        } else {
            write!(f, "{}={:.4e}", self.name, self.value)
        }
    }
}

/// The integrated area and apex height of a peak
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IntegratedData {
    pub area: Amplitude,
    pub ymax: Amplitude,
}

/// Everything reported for a single crosslink
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IntegralData {
    #[cfg_attr(feature = "serde", serde(skip))]
    pub levels: Levels,
    pub peptide: String,
    pub state: usize,
    pub start: f64,
    pub end: f64,
    pub integrated: IntegratedData,
    pub ppm: f64,
    pub charges: String,
    pub score: f64,
    pub ev: f64,
    pub fit: f64,
    pub dotp: f64,
    pub masscorrelation: f64,
}

impl Document {
    fn integrate_charges(
        &self,
        x: &[f64],
        bounds: LinearRange,
        charges: &[NodeId],
    ) -> Result<(f64, f64), HierarchyError> {
        let bounds = bounds.clamp(x.len());
        if bounds.is_empty() {
            return Ok((f64::NAN, f64::NAN));
        }
        let x = &x[bounds.to_range()];
        let mut area = 0.0;
        let mut ymax = f64::NEG_INFINITY;
        let mut n_traces = 0;
        for charge in charges {
            for isotope in self.children(*charge)? {
                if !self[*isotope].checked() {
                    continue;
                }
                let trace = self.intensity(*isotope, false)?;
                let y = &trace[bounds.clamp(trace.len()).to_range()];
                area += get_integral(x, y);
                ymax = y.iter().copied().fold(ymax, f64::max);
                n_traces += 1;
            }
        }
        if n_traces == 0 {
            return Ok((f64::NAN, f64::NAN));
        }
        Ok((area, ymax))
    }

    fn charges_of(&self, crosslink: NodeId) -> Result<&[NodeId], HierarchyError> {
        let node = self.node(crosslink)?;
        if node.kind() != NodeKind::Crosslink {
            return Err(HierarchyError::InvalidChild {
                parent: NodeKind::LabelGroup,
                child: node.kind(),
            });
        }
        Ok(node.children())
    }

    /// The area and apex height of a crosslink's peak summed over its checked charge
    /// states and their checked isotopes.
    ///
    /// `x` is the retention time axis of the label group window and `bounds` is relative
    /// to it. An unchecked crosslink, or one with nothing checked below it, yields
    /// `(NaN, NaN)`.
    pub fn crosslink_integral(
        &self,
        x: &[f64],
        crosslink: NodeId,
        bounds: LinearRange,
    ) -> Result<(f64, f64), HierarchyError> {
        if !self.node(crosslink)?.checked() {
            return Ok((f64::NAN, f64::NAN));
        }
        let charges: Vec<NodeId> = self
            .charges_of(crosslink)?
            .iter()
            .copied()
            .filter(|c| self[*c].checked())
            .collect();
        self.integrate_charges(x, bounds, &charges)
    }

    /// The area and apex height of the checked isotopes of `charges`, which must be
    /// charge states of `crosslink`. The charge states' own checked flags are ignored.
    pub fn noise_integral(
        &self,
        x: &[f64],
        crosslink: NodeId,
        bounds: LinearRange,
        charges: &[NodeId],
    ) -> Result<(f64, f64), HierarchyError> {
        for c in charges {
            if self.node(*c)?.parent() != Some(crosslink) {
                return Err(HierarchyError::InvalidChild {
                    parent: NodeKind::Crosslink,
                    child: self[*c].kind(),
                });
            }
        }
        self.integrate_charges(x, bounds, charges)
    }

    /// Integrate and summarize a crosslink.
    ///
    /// The signal comes from the checked charge states, further restricted to the
    /// charges listed in `usedcharges` when given. Every other charge state of the
    /// crosslink is integrated as the noise baseline.
    pub fn xic_data(&self, crosslink: NodeId, usedcharges: Option<&[i32]>) -> Result<IntegralData, HierarchyError> {
        let node = self.node(crosslink)?;
        let attrs = node
            .attrs()
            .as_crosslink()
            .ok_or(HierarchyError::InvalidChild {
                parent: NodeKind::LabelGroup,
                child: node.kind(),
            })?;
        let x = self.retention_time(crosslink)?;
        let bounds = self.relative_peak(crosslink)?;

        let charge_value = |c: &NodeId| {
            self[*c]
                .attrs()
                .as_charge()
                .map(|a| a.charge)
                .unwrap_or_default()
        };
        let (signal, noise): (Vec<NodeId>, Vec<NodeId>) =
            self.charges_of(crosslink)?.iter().partition(|c| {
                self[**c].checked()
                    && usedcharges
                        .map(|used| used.contains(&charge_value(c)))
                        .unwrap_or(true)
            });

        let (area, ymax) = if node.checked() {
            self.integrate_charges(&x, bounds, &signal)?
        } else {
            (f64::NAN, f64::NAN)
        };
        let (noise_area, noise_ymax) = if noise.is_empty() {
            (f64::NAN, f64::NAN)
        } else {
            self.integrate_charges(&x, bounds, &noise)?
        };

        let mut ppm_acc = 0.0;
        let mut weight_acc = 0.0;
        for charge in signal.iter() {
            for isotope in self.children(*charge)? {
                if !self[*isotope].checked() {
                    continue;
                }
                let (ppm, weight) = self.get_isotopeppm(*isotope, bounds)?;
                if weight > 0.0 && ppm.is_finite() {
                    ppm_acc += ppm * weight;
                    weight_acc += weight;
                }
            }
        }
        let ppm = if weight_acc > 0.0 {
            ppm_acc / weight_acc
        } else {
            f64::NAN
        };

        let (start, end) = if bounds.is_empty() {
            (f64::NAN, f64::NAN)
        } else {
            (x[bounds.start], x[bounds.end - 1])
        };
        let charges = signal.iter().map(charge_value).sorted().join(", ");
        trace!(
            "{} integrated over {bounds} using charges [{charges}]",
            node.levels()
        );

        Ok(IntegralData {
            levels: node.levels(),
            peptide: attrs.peptide.clone(),
            state: attrs.state,
            start,
            end,
            integrated: IntegratedData {
                area: Amplitude::new("area", area).with_baseline(noise_area),
                ymax: Amplitude::new("ymax", ymax).with_baseline(noise_ymax),
            },
            ppm,
            charges,
            score: attrs.score,
            ev: attrs.ev,
            fit: node.score("gaussian"),
            dotp: node.score("dotp"),
            masscorrelation: node.score("masscorrelation"),
        })
    }

    /// Every crosslink's summary, in tree order
    pub fn all_xic_data(&self) -> Vec<(NodeId, Result<IntegralData, HierarchyError>)> {
        self.iter_kind(NodeKind::Crosslink)
            .into_iter()
            .map(|id| (id, self.xic_data(id, None)))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hierarchy::test::make_document;
    use crate::settings::QuantSettings;
    use crate::window::PeakBound;

    #[test]
    fn test_trapezoid() {
        assert_eq!(get_integral(&[0.0, 1.0, 2.0], &[0.0, 2.0, 0.0]), 2.0);
        assert_eq!(get_integral(&[0.0, 2.0], &[1.0, 1.0]), 2.0);
        assert_eq!(get_integral(&[1.0], &[5.0]), 0.0);
        assert_eq!(get_integral(&[], &[]), 0.0);
    }

    #[test]
    fn test_crosslink_integral() {
        let mut doc = make_document(QuantSettings::default());
        let xl = doc.iter_kind(NodeKind::Crosslink)[0];
        let x = doc.retention_time(xl).unwrap();
        let bounds = LinearRange::new(0, 5);

        // each isotope: 5 + 15 + 15 + 5
        let isotope = doc.descendants(xl)[1];
        let trace = doc.intensity(isotope, false).unwrap();
        assert_eq!(get_integral(&x, &trace), 40.0);

        let (area, ymax) = doc.crosslink_integral(&x, xl, bounds).unwrap();
        assert_eq!(area, 40.0 * 6.0);
        assert_eq!(ymax, 20.0);

        let charges = doc.children(xl).unwrap().to_vec();
        doc.set_checked(charges[0], false, false).unwrap();
        let (area, _) = doc.crosslink_integral(&x, xl, bounds).unwrap();
        assert_eq!(area, 40.0 * 3.0);

        let (noise, _) = doc.noise_integral(&x, xl, bounds, &charges[..1]).unwrap();
        assert_eq!(noise, 40.0 * 3.0);

        doc.set_checked(xl, false, false).unwrap();
        let (area, ymax) = doc.crosslink_integral(&x, xl, bounds).unwrap();
        assert!(area.is_nan() && ymax.is_nan());

        let other = doc.iter_kind(NodeKind::Crosslink)[1];
        let foreign = doc.children(other).unwrap()[0];
        assert!(doc.noise_integral(&x, xl, bounds, &[foreign]).is_err());
    }

    #[test]
    fn test_nothing_selected() {
        let mut doc = make_document(QuantSettings::default());
        let xl = doc.iter_kind(NodeKind::Crosslink)[0];
        for charge in doc.children(xl).unwrap().to_vec() {
            doc.set_checked(charge, false, false).unwrap();
        }
        let x = doc.retention_time(xl).unwrap();
        let (area, ymax) = doc.crosslink_integral(&x, xl, LinearRange::new(0, 5)).unwrap();
        assert!(area.is_nan() && ymax.is_nan());
    }

    #[test]
    fn test_xic_data() {
        let doc = make_document(QuantSettings::default());
        let xl = doc.iter_kind(NodeKind::Crosslink)[1];
        let data = doc.xic_data(xl, None).unwrap();
        assert_eq!(data.integrated.area.value, 40.0 * 6.0);
        assert!(!data.integrated.area.has_baseline());
        assert_eq!(data.charges, "2, 3");
        assert_eq!(data.state, 1);
        assert_eq!((data.start, data.end), (0.0, 4.0));
        assert!(data.ppm.abs() < 1e-6);
        assert!(data.fit.is_nan());

        let data = doc.xic_data(xl, Some(&[3])).unwrap();
        assert_eq!(data.charges, "3");
        assert_eq!(data.integrated.area.value, 40.0 * 3.0);
        assert_eq!(data.integrated.area.baseline, 40.0 * 3.0);
        assert_eq!(data.integrated.ymax.baseline, 20.0);

        let file = doc.iter_kind(NodeKind::File)[0];
        assert!(doc.xic_data(file, None).is_err());
    }

    #[test]
    fn test_empty_peak() {
        let mut doc = make_document(QuantSettings::default());
        let xl = doc.iter_kind(NodeKind::Crosslink)[0];
        doc.set_peak_override(xl, PeakBound::Start, Some(3)).unwrap();
        doc.set_peak_override(xl, PeakBound::End, Some(3)).unwrap();

        let x = doc.retention_time(xl).unwrap();
        let (area, ymax) = doc.crosslink_integral(&x, xl, LinearRange::new(3, 3)).unwrap();
        assert!(area.is_nan() && ymax.is_nan());

        let data = doc.xic_data(xl, None).unwrap();
        assert!(data.integrated.area.value.is_nan());
        assert!(data.integrated.ymax.value.is_nan());
        assert!(data.start.is_nan() && data.end.is_nan());

        // past the end of the window
        doc.set_peak_override(xl, PeakBound::Start, Some(8)).unwrap();
        doc.set_peak_override(xl, PeakBound::End, Some(9)).unwrap();
        let data = doc.xic_data(xl, None).unwrap();
        assert!(data.integrated.ymax.value.is_nan());
    }
}
