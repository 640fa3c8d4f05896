//! Options controlling how a [`Document`](crate::hierarchy::Document) is quantified
use crate::fit::MassCorrelationMode;
use crate::hierarchy::ReadMode;
use crate::isotopic_model::IsotopicModels;
use crate::ratio::{RatioReference, Weighting};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct QuantSettings {
    /// Use the label group's shared peak bounds for every crosslink, ignoring
    /// per-crosslink adjustments
    pub rt_lock: bool,
    pub read_mode: ReadMode,
    pub mass_correlation: MassCorrelationMode,
    pub weighting: Weighting,
    /// Which labelled state ratios are normalized against
    pub reference: RatioReference,
    /// The averagine used to fill in missing theoretical isotope values
    pub isotopic_model: IsotopicModels,
    /// How many isotopes to generate theoretical values for
    pub isotope_count: usize,
    /// Emit a progress event every this many crosslinks
    pub progress_interval: usize,
}

impl Default for QuantSettings {
    fn default() -> Self {
        Self {
            rt_lock: false,
            read_mode: ReadMode::OnDemand,
            mass_correlation: MassCorrelationMode::Summed,
            weighting: Weighting::Weighted,
            reference: RatioReference::Light,
            isotopic_model: IsotopicModels::Peptide,
            isotope_count: 3,
            progress_interval: 100,
        }
    }
}

impl QuantSettings {
    pub fn new(rt_lock: bool, read_mode: ReadMode) -> Self {
        Self {
            rt_lock,
            read_mode,
            ..Default::default()
        }
    }
}
