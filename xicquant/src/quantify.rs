//! Recalculating crosslink scores and gathering label state ratios.
//!
//! This is where per-crosslink failures stop: [`recalculate_crosslinks`] logs and skips
//! any crosslink that cannot be scored so the rest of the document is still processed.
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, warn};

use crate::fit::{fit_gaussian, get_masscorrelation, normalized_edge_dotp, ScoreType};
use crate::hierarchy::{Document, HierarchyError, LevelKey, Levels, NodeId, NodeKind};
use crate::ratio::{RatioError, Ratios};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuantError {
    #[error("Failed to quantify the crosslink at {levels}: {source}")]
    Crosslink {
        levels: Levels,
        #[source]
        source: HierarchyError,
    },
    #[error("No label group with key {0} was found")]
    LabelGroupNotFound(LevelKey),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Ratio(#[from] RatioError),
}

/// The scores computed for one crosslink
#[derive(Debug, Clone, PartialEq)]
pub struct CrosslinkScores {
    pub gaussian: ScoreType,
    pub masscorrelation: ScoreType,
    pub dotp: ScoreType,
    pub ppm: f64,
    /// The isotope pattern similarity of each checked charge state
    pub charge_dotp: Vec<(NodeId, ScoreType)>,
}

/// The outcome of a batch of crosslink recalculations
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecalculationSummary {
    pub total: usize,
    pub recalculated: usize,
    pub failed: usize,
    pub cancelled: bool,
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Score a crosslink over its current peak bounds without modifying the document.
///
/// Only checked charge states and their checked isotopes contribute.
pub fn evaluate_crosslink(doc: &Document, crosslink: NodeId) -> Result<CrosslinkScores, HierarchyError> {
    let node = doc.node(crosslink)?;
    if node.kind() != NodeKind::Crosslink {
        return Err(HierarchyError::InvalidChild {
            parent: NodeKind::LabelGroup,
            child: node.kind(),
        });
    }
    let bounds = doc.relative_peak(crosslink)?;
    let rt = doc.retention_time(crosslink)?;
    let x = &rt[bounds.clamp(rt.len()).to_range()];
    let mode = doc.settings().mass_correlation;

    let mut summed = vec![0.0; x.len()];
    let mut correlations = Vec::new();
    let mut charge_dotp = Vec::new();
    let mut ppm_acc = 0.0;
    let mut weight_acc = 0.0;

    for charge in doc.children(crosslink)? {
        if !doc[*charge].checked() {
            continue;
        }
        let isotopes: Vec<NodeId> = doc
            .children(*charge)?
            .iter()
            .copied()
            .filter(|i| doc[*i].checked())
            .collect();
        if isotopes.is_empty() {
            continue;
        }
        let mut traces = Vec::with_capacity(isotopes.len());
        let mut pattern = Vec::with_capacity(isotopes.len());
        for isotope in isotopes.iter() {
            let trace = doc.intensity(*isotope, false)?;
            let trace = trace[bounds.clamp(trace.len()).to_range()].to_vec();
            for (s, v) in summed.iter_mut().zip(trace.iter()) {
                *s += v;
            }
            traces.push(trace);
            pattern.push(
                doc[*isotope]
                    .attrs()
                    .as_isotope()
                    .map(|a| a.abundance)
                    .unwrap_or(f64::NAN),
            );

            let (ppm, weight) = doc.get_isotopeppm(*isotope, bounds)?;
            if weight > 0.0 && ppm.is_finite() {
                ppm_acc += ppm * weight;
                weight_acc += weight;
            }
        }
        let pattern: Vec<f64> = pattern.into_iter().map(|p| if p.is_nan() { 0.0 } else { p }).collect();
        let totals: Vec<f64> = traces.iter().map(|t| t.iter().sum()).collect();
        correlations.push(get_masscorrelation(&traces, &pattern, mode));
        charge_dotp.push((*charge, normalized_edge_dotp(&totals, &pattern)));
    }

    let dotps: Vec<f64> = charge_dotp.iter().map(|(_, d)| *d).collect();
    Ok(CrosslinkScores {
        gaussian: fit_gaussian(x, &summed),
        masscorrelation: mean_of(&correlations),
        dotp: mean_of(&dotps),
        ppm: if weight_acc > 0.0 {
            ppm_acc / weight_acc
        } else {
            f64::NAN
        },
        charge_dotp,
    })
}

/// Score a crosslink and store the scores on it, and the per-charge isotope pattern
/// similarity on each charge state
pub fn recalculate_crosslink(doc: &mut Document, crosslink: NodeId) -> Result<CrosslinkScores, QuantError> {
    let wrap = |doc: &Document, source: HierarchyError| QuantError::Crosslink {
        levels: doc.get(crosslink).map(|n| n.levels()).unwrap_or_default(),
        source,
    };
    let scores = evaluate_crosslink(doc, crosslink).map_err(|e| wrap(doc, e))?;
    let writes = [
        ("gaussian", scores.gaussian),
        ("masscorrelation", scores.masscorrelation),
        ("dotp", scores.dotp),
        ("ppm", scores.ppm),
    ];
    for (name, value) in writes {
        doc.setattr(crosslink, name, value, false)
            .map_err(|e| wrap(doc, e))?;
    }
    for (charge, dotp) in scores.charge_dotp.iter() {
        doc.setattr(*charge, "dotp", *dotp, false)
            .map_err(|e| wrap(doc, e))?;
    }
    Ok(scores)
}

/// Recalculate each crosslink in `crosslinks`, checking `cancel` before each one.
///
/// `on_progress` receives the number of crosslinks processed so far and the total.
pub fn recalculate_crosslinks<F: FnMut(usize, usize)>(
    doc: &mut Document,
    crosslinks: &[NodeId],
    cancel: &AtomicBool,
    mut on_progress: F,
) -> RecalculationSummary {
    let total = crosslinks.len();
    let interval = doc.settings().progress_interval.max(1);
    let mut summary = RecalculationSummary {
        total,
        ..Default::default()
    };
    for (i, crosslink) in crosslinks.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            debug!("Recalculation cancelled after {i} of {total} crosslinks");
            summary.cancelled = true;
            break;
        }
        match recalculate_crosslink(doc, *crosslink) {
            Ok(_) => summary.recalculated += 1,
            Err(e) => {
                warn!("Skipping crosslink {crosslink}: {e}");
                summary.failed += 1;
            }
        }
        let done = i + 1;
        if done % interval == 0 {
            debug!("Recalculated {done}/{total} crosslinks");
        }
        on_progress(done, total);
    }
    summary
}

/// Recalculate every crosslink in the document
pub fn recalculate_all(doc: &mut Document, cancel: &AtomicBool) -> RecalculationSummary {
    let crosslinks = doc.iter_kind(NodeKind::Crosslink);
    recalculate_crosslinks(doc, &crosslinks, cancel, |_, _| {})
}

/// The distinct label group keys across every file, in ascending order
pub fn label_group_keys(doc: &Document) -> Vec<LevelKey> {
    doc.iter_kind(NodeKind::LabelGroup)
        .into_iter()
        .map(|id| doc[id].key())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn label_state_count(doc: &Document, groups: &[NodeId]) -> usize {
    let from_labels = groups
        .iter()
        .filter_map(|g| doc[*g].attrs().as_label_group().map(|a| a.labels.len()))
        .max()
        .unwrap_or_default();
    let from_states = groups
        .iter()
        .flat_map(|g| doc[*g].children().iter())
        .filter_map(|c| doc[*c].attrs().as_crosslink().map(|a| a.state + 1))
        .max()
        .unwrap_or_default();
    from_labels.max(from_states)
}

/// Collect the integrated area of every label state of the label groups keyed by
/// `labels_key`, one row per file, with the noise baselines alongside.
///
/// A label state with no crosslink in a file is NaN for that file.
pub fn label_group_ratios(doc: &Document, labels_key: impl Into<LevelKey>) -> Result<Ratios, QuantError> {
    let labels_key = labels_key.into();
    let groups: Vec<NodeId> = doc
        .iter_kind(NodeKind::File)
        .into_iter()
        .filter_map(|file| doc.get_by_key(file, labels_key))
        .collect();
    if groups.is_empty() {
        return Err(QuantError::LabelGroupNotFound(labels_key));
    }
    let n_states = label_state_count(doc, &groups);

    let mut ratios = Vec::with_capacity(groups.len());
    let mut noise = Vec::with_capacity(groups.len());
    for group in groups {
        let mut row = vec![f64::NAN; n_states];
        let mut noise_row = vec![f64::NAN; n_states];
        for crosslink in doc.children(group)? {
            let data = doc.xic_data(*crosslink, None)?;
            if let Some(slot) = row.get_mut(data.state) {
                *slot = data.integrated.area.value;
                noise_row[data.state] = data.integrated.area.baseline;
            }
        }
        ratios.push(row);
        noise.push(noise_row);
    }
    Ok(Ratios::new(ratios, noise, doc.settings().reference)?)
}

/// A rendered ratio for one label group key
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RatioReport {
    pub labels_key: u32,
    pub labels: String,
    pub ratio: String,
    pub errors: String,
    pub estimated: bool,
    pub counts: String,
}

/// Normalize the ratios of a label group key with the document's weighting and render
/// them for reporting
pub fn label_group_report(doc: &Document, labels_key: impl Into<LevelKey>) -> Result<RatioReport, QuantError> {
    let labels_key = labels_key.into();
    let ratios = label_group_ratios(doc, labels_key)?;
    let labels = doc
        .iter_kind(NodeKind::LabelGroup)
        .into_iter()
        .filter(|g| doc[*g].key() == labels_key)
        .find_map(|g| doc[g].attrs().as_label_group().map(|a| a.labels.join(":")))
        .unwrap_or_default();
    let normalized = ratios.normalize(doc.settings().weighting);
    let ratio = if ratios.is_missing() {
        "-".to_string()
    } else {
        normalized.to_string()
    };
    Ok(RatioReport {
        labels_key: labels_key.0,
        labels,
        ratio,
        errors: normalized.error_string(),
        estimated: normalized.estimated,
        counts: ratios.counts().iter().join(":"),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fit::MassCorrelationMode;
    use crate::hierarchy::test::make_document;
    use crate::settings::QuantSettings;

    #[test_log::test]
    fn test_recalculate_crosslink() {
        let mut doc = make_document(QuantSettings::default());
        let xl = doc.iter_kind(NodeKind::Crosslink)[0];
        let scores = recalculate_crosslink(&mut doc, xl).unwrap();
        assert!(scores.gaussian > 0.9 && scores.gaussian <= 1.0);
        assert!(scores.dotp > 0.9 && scores.dotp < 1.0);
        assert_eq!(scores.charge_dotp.len(), 2);
        assert!(scores.ppm.abs() < 1e-6);

        assert_eq!(doc[xl].score("gaussian"), scores.gaussian);
        assert_eq!(doc[xl].score("dotp"), scores.dotp);
        assert_eq!(doc[xl].score("masscorrelation"), scores.masscorrelation);
        let charge = doc.children(xl).unwrap()[0];
        assert_eq!(doc[charge].score("dotp"), scores.charge_dotp[0].1);

        let data = doc.xic_data(xl, None).unwrap();
        assert_eq!(data.fit, scores.gaussian);
    }

    #[test]
    fn test_self_pattern_correlation() {
        let doc = make_document(QuantSettings::default());
        let xl = doc.iter_kind(NodeKind::Crosslink)[0];
        let charge = doc.children(xl).unwrap()[0];
        let block = doc.child_intensity(charge, 0, 5).unwrap();
        assert_eq!(block.len(), 3);
        let x = doc.retention_time(xl).unwrap();
        for trace in block.iter() {
            assert_eq!(crate::integrate::get_integral(&x, trace), 40.0);
        }
        let summed: Vec<f64> = (0..5).map(|i| block.iter().map(|t| t[i]).sum()).collect();
        let score = get_masscorrelation(&[summed], &[1.0], MassCorrelationMode::Summed);
        assert_eq!(score, 1.0);
    }

    #[test_log::test]
    fn test_recalculate_all() {
        let mut doc = make_document(QuantSettings::default());
        let cancel = AtomicBool::new(false);
        let summary = recalculate_all(&mut doc, &cancel);
        assert_eq!(
            summary,
            RecalculationSummary {
                total: 2,
                recalculated: 2,
                failed: 0,
                cancelled: false
            }
        );

        let mut seen = Vec::new();
        let xls = doc.iter_kind(NodeKind::Crosslink);
        let summary = recalculate_crosslinks(&mut doc, &[xls[0], NodeId(9999), xls[1]], &cancel, |done, total| {
            seen.push((done, total))
        });
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.recalculated, 2);
        assert_eq!(seen.last(), Some(&(3, 3)));

        cancel.store(true, Ordering::SeqCst);
        let summary = recalculate_all(&mut doc, &cancel);
        assert!(summary.cancelled);
        assert_eq!(summary.recalculated, 0);
    }

    #[test]
    fn test_label_group_ratios() {
        let doc = make_document(QuantSettings::default());
        assert_eq!(label_group_keys(&doc), vec![LevelKey(5)]);
        let ratios = label_group_ratios(&doc, 5).unwrap();
        assert_eq!(ratios.n_rows(), 1);
        assert_eq!(ratios.ratios()[0], vec![240.0, 240.0]);
        assert_eq!(ratios.to_string(), "1.0:1.0");

        let report = label_group_report(&doc, 5).unwrap();
        assert_eq!(report.labels, "light:heavy");
        assert_eq!(report.ratio, "1.0:1.0");
        assert_eq!(report.counts, "1:1");
        assert!(!report.estimated);

        assert_eq!(
            label_group_ratios(&doc, 6).unwrap_err(),
            QuantError::LabelGroupNotFound(LevelKey(6))
        );
    }

    #[test]
    fn test_unchecked_state_ratio() {
        let mut doc = make_document(QuantSettings::default());
        let heavy = doc.iter_kind(NodeKind::Crosslink)[1];
        doc.set_checked(heavy, false, false).unwrap();
        let ratios = label_group_ratios(&doc, 5).unwrap();
        assert!(ratios.ratios()[0][1].is_nan());
        let report = label_group_report(&doc, 5).unwrap();
        assert_eq!(report.counts, "1:0");
    }
}
