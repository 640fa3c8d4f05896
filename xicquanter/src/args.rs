use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use xicquant::fit::MassCorrelationMode;
use xicquant::isotopic_model::IsotopicModels;
use xicquant::{RatioReference, ReadMode, Weighting};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ArgReadMode {
    /// Preload every label group's traces before quantifying
    Memory,
    /// Read traces from the array store as they are needed
    OnDemand,
}

impl From<ArgReadMode> for ReadMode {
    fn from(value: ArgReadMode) -> Self {
        match value {
            ArgReadMode::Memory => ReadMode::Memory,
            ArgReadMode::OnDemand => ReadMode::OnDemand,
        }
    }
}

impl Display for ArgReadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ArgMassCorrelationMode {
    /// Correlate summed isotope intensities with the theoretical pattern
    Summed,
    /// Correlate isotope ratios to the monoisotopic peak
    Ratio,
    /// Correlate every time point and average
    Pointwise,
}

impl From<ArgMassCorrelationMode> for MassCorrelationMode {
    fn from(value: ArgMassCorrelationMode) -> Self {
        match value {
            ArgMassCorrelationMode::Summed => MassCorrelationMode::Summed,
            ArgMassCorrelationMode::Ratio => MassCorrelationMode::Ratio,
            ArgMassCorrelationMode::Pointwise => MassCorrelationMode::Pointwise,
        }
    }
}

impl Display for ArgMassCorrelationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ArgWeighting {
    /// Average replicates before dividing
    Weighted,
    /// Divide within each replicate before averaging
    Unweighted,
}

impl From<ArgWeighting> for Weighting {
    fn from(value: ArgWeighting) -> Self {
        match value {
            ArgWeighting::Weighted => Weighting::Weighted,
            ArgWeighting::Unweighted => Weighting::Unweighted,
        }
    }
}

impl Display for ArgWeighting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ArgRatioReference {
    Light,
    Medium,
    Heavy,
    /// The label state with the smallest mean area
    Minimum,
    /// The label state with the largest mean area
    Maximum,
}

impl From<ArgRatioReference> for RatioReference {
    fn from(value: ArgRatioReference) -> Self {
        match value {
            ArgRatioReference::Light => RatioReference::Light,
            ArgRatioReference::Medium => RatioReference::Medium,
            ArgRatioReference::Heavy => RatioReference::Heavy,
            ArgRatioReference::Minimum => RatioReference::Minimum,
            ArgRatioReference::Maximum => RatioReference::Maximum,
        }
    }
}

impl Display for ArgRatioReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgIsotopicModels {
    Peptide,
    Glycopeptide,
}

impl From<ArgIsotopicModels> for IsotopicModels {
    fn from(value: ArgIsotopicModels) -> Self {
        match value {
            ArgIsotopicModels::Peptide => IsotopicModels::Peptide,
            ArgIsotopicModels::Glycopeptide => IsotopicModels::Glycopeptide,
        }
    }
}

impl Display for ArgIsotopicModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
