//! Retention time windows and integration bounds.
//!
//! Every label group owns an absolute row window into its file's retention time axis
//! and a peak range relative to that window shared by all of its crosslinks. A
//! crosslink may override either peak bound unless the document is rt-locked.
use std::fmt::Display;
use std::ops::Range;

use tracing::trace;

use crate::hierarchy::{Document, HierarchyError, NodeId, NodeKind};

/// A half-open range of row indices, `start <= end`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinearRange {
    pub start: usize,
    pub end: usize,
}

impl LinearRange {
    /// Bounds given in the wrong order are swapped
    pub fn new(start: usize, end: usize) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, i: usize) -> bool {
        self.start <= i && i < self.end
    }

    pub fn to_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Shift both bounds by `by`
    pub fn offset(&self, by: usize) -> Self {
        Self::new(self.start + by, self.end + by)
    }

    /// Restrict both bounds to `[0, len]`
    pub fn clamp(&self, len: usize) -> Self {
        Self::new(self.start.min(len), self.end.min(len))
    }
}

impl From<Range<usize>> for LinearRange {
    fn from(value: Range<usize>) -> Self {
        Self::new(value.start, value.end)
    }
}

impl Display for LinearRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeakBound {
    Start,
    End,
}

impl Document {
    fn crosslink_and_group(&self, id: NodeId) -> Result<(NodeId, NodeId), HierarchyError> {
        let crosslink = self.require_ancestor(id, NodeKind::Crosslink)?;
        let group = self.require_ancestor(crosslink, NodeKind::LabelGroup)?;
        Ok((crosslink, group))
    }

    /// The peak bound of a crosslink relative to its label group window. `id` may be
    /// the crosslink itself or any node below it.
    pub fn get_relative_peak_index(&self, id: NodeId, bound: PeakBound) -> Result<usize, HierarchyError> {
        let (crosslink, group) = self.crosslink_and_group(id)?;
        let shared = self[group]
            .attrs()
            .as_label_group()
            .map(|a| a.peak)
            .ok_or(HierarchyError::NoTrace(NodeKind::LabelGroup))?;
        let shared = match bound {
            PeakBound::Start => shared.start,
            PeakBound::End => shared.end,
        };
        if self.settings().rt_lock {
            return Ok(shared);
        }
        let overridden = self[crosslink].attrs().as_crosslink().and_then(|a| match bound {
            PeakBound::Start => a.peak_start,
            PeakBound::End => a.peak_end,
        });
        Ok(overridden.unwrap_or(shared))
    }

    /// The relative peak range of a crosslink, clamped to its window
    pub fn relative_peak(&self, id: NodeId) -> Result<LinearRange, HierarchyError> {
        let window = self.window_of(id)?;
        let start = self.get_relative_peak_index(id, PeakBound::Start)?;
        let end = self.get_relative_peak_index(id, PeakBound::End)?;
        Ok(LinearRange::new(start, end).clamp(window.len()))
    }

    /// The peak range of a crosslink as absolute rows of the file's retention time axis
    pub fn get_peak_indexes(&self, id: NodeId) -> Result<LinearRange, HierarchyError> {
        let window = self.window_of(id)?;
        Ok(self.relative_peak(id)?.offset(window.start))
    }

    /// Adjust one peak bound for a single crosslink. `None` restores the shared bound.
    pub fn set_peak_override(
        &mut self,
        crosslink: NodeId,
        bound: PeakBound,
        value: Option<usize>,
    ) -> Result<(), HierarchyError> {
        let node = self.node_mut(crosslink)?;
        let kind = node.kind();
        let attrs = node
            .attrs
            .as_crosslink_mut()
            .ok_or(HierarchyError::InvalidChild {
                parent: NodeKind::LabelGroup,
                child: kind,
            })?;
        match bound {
            PeakBound::Start => attrs.peak_start = value,
            PeakBound::End => attrs.peak_end = value,
        }
        trace!("Set {bound:?} of {crosslink} to {value:?}");
        Ok(())
    }

    /// Replace the peak range shared by every crosslink of a label group
    pub fn set_shared_peak(&mut self, label_group: NodeId, peak: LinearRange) -> Result<(), HierarchyError> {
        let node = self.node_mut(label_group)?;
        let kind = node.kind();
        let attrs = node
            .attrs
            .as_label_group_mut()
            .ok_or(HierarchyError::InvalidChild {
                parent: NodeKind::File,
                child: kind,
            })?;
        attrs.peak = peak;
        Ok(())
    }

    /// The retention times at the first and last row of a crosslink's peak, NaN when
    /// the peak is empty
    pub fn peak_retention_times(&self, id: NodeId) -> Result<(f64, f64), HierarchyError> {
        let rt = self.retention_time(id)?;
        let peak = self.relative_peak(id)?;
        if peak.is_empty() {
            return Ok((f64::NAN, f64::NAN));
        }
        Ok((rt[peak.start], rt[peak.end - 1]))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hierarchy::test::make_document;
    use crate::settings::QuantSettings;

    #[test]
    fn test_linear_range() {
        let r = LinearRange::new(7, 3);
        assert_eq!(r, LinearRange { start: 3, end: 7 });
        assert_eq!(r.len(), 4);
        assert!(r.contains(3) && !r.contains(7));
        assert_eq!(r.offset(10).to_range(), 13..17);
        assert_eq!(r.clamp(5), LinearRange::new(3, 5));
        assert_eq!(r.to_string(), "[3, 7)");
    }

    #[test]
    fn test_peak_override() {
        let mut doc = make_document(QuantSettings::default());
        let xl = doc.iter_kind(NodeKind::Crosslink)[0];
        let isotope = doc.descendants(xl)[1];
        assert_eq!(doc.get_relative_peak_index(isotope, PeakBound::End).unwrap(), 5);

        doc.set_peak_override(xl, PeakBound::Start, Some(2)).unwrap();
        assert_eq!(doc.get_relative_peak_index(xl, PeakBound::Start).unwrap(), 2);
        assert_eq!(doc.get_peak_indexes(xl).unwrap(), LinearRange::new(2, 5));
        assert_eq!(doc.peak_retention_times(xl).unwrap(), (2.0, 4.0));

        doc.settings_mut().rt_lock = true;
        assert_eq!(doc.get_relative_peak_index(xl, PeakBound::Start).unwrap(), 0);

        let file = doc.iter_kind(NodeKind::File)[0];
        assert!(doc.get_relative_peak_index(file, PeakBound::Start).is_err());
        assert!(doc.set_peak_override(file, PeakBound::End, None).is_err());
    }

    #[test]
    fn test_shared_peak() {
        let mut doc = make_document(QuantSettings::default());
        let group = doc.iter_kind(NodeKind::LabelGroup)[0];
        doc.set_shared_peak(group, LinearRange::new(1, 9)).unwrap();
        let xl = doc.iter_kind(NodeKind::Crosslink)[1];
        assert_eq!(doc.relative_peak(xl).unwrap(), LinearRange::new(1, 5));
    }
}
