//! Extracted ion chromatogram quantitation for isotope-labeled cross-linked peptides.
//!
//! A [`Document`] holds the File → LabelGroup → Crosslink → Charge → Isotope tree and
//! the spectral arrays behind it. [`fit`] and [`integrate`] score and integrate the
//! chromatographic peaks of each crosslink, and [`ratio`] turns the integrated areas
//! of each label state into normalized ratios.
pub mod fit;
pub mod hierarchy;
pub mod integrate;
pub mod isotopic_model;
pub mod quantify;
pub mod ratio;
pub mod settings;
pub mod store;
pub mod window;
pub mod worker;

pub use hierarchy::{
    Document, DocumentBuilder, HierarchyError, LevelKey, Levels, NodeId, NodeKind, ReadMode,
};
pub use integrate::{Amplitude, IntegralData, IntegratedData};
pub use quantify::{QuantError, RecalculationSummary};
pub use ratio::{NormalizedRatios, RatioReference, RatioValue, Ratios, Weighting};
pub use settings::QuantSettings;
pub use store::{MemoryArrayStore, SpectralArrayStore};
pub use window::LinearRange;
