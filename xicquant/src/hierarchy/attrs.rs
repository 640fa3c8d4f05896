//! Per-level node attributes.
//!
//! Each node kind carries a typed attribute record. Scores computed after the
//! document is built (fit quality, pattern correlations, ...) are attached
//! through the free-form [`Metadata`] map instead.
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;

use crate::store::ColumnKind;
use crate::window::LinearRange;

use super::NodeKind;

/// A dynamically typed attribute value
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<f64>),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// Read any numeric value as a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Self::Text(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Text(v) => f.write_str(v),
            AttrValue::Array(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(value: Vec<f64>) -> Self {
        Self::Array(value)
    }
}

pub type Metadata = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct FileAttrs {
    pub name: String,
    pub path: Option<PathBuf>,
    pub checked: bool,
    pub(crate) store: usize,
}

impl FileAttrs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            checked: true,
            store: 0,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// One precursor window: the absolute row window of the file's retention time axis
/// every trace below it is sliced to, and the peak bounds shared by its crosslinks
/// (relative to the window start).
#[derive(Debug, Clone, PartialEq)]
pub struct LabelGroupAttrs {
    pub window: LinearRange,
    pub peak: LinearRange,
    pub labels: Vec<String>,
    pub checked: bool,
    pub labels_index: Option<usize>,
}

impl LabelGroupAttrs {
    pub fn new(window: LinearRange, peak: LinearRange) -> Self {
        Self {
            window,
            peak,
            labels: Vec::new(),
            checked: true,
            labels_index: None,
        }
    }

    pub fn with_labels<I: IntoIterator<Item = S>, S: Into<String>>(mut self, labels: I) -> Self {
        self.labels = labels.into_iter().map(|s| s.into()).collect();
        self
    }
}

/// A single isotope-labelled state of a cross-linked peptide
#[derive(Debug, Clone, PartialEq)]
pub struct CrosslinkAttrs {
    pub peptide: String,
    pub state: usize,
    pub neutral_mass: f64,
    pub score: f64,
    pub ev: f64,
    pub checked: bool,
    pub peak_start: Option<usize>,
    pub peak_end: Option<usize>,
    pub crosslink_index: Option<usize>,
}

impl CrosslinkAttrs {
    pub fn new(peptide: impl Into<String>, state: usize, neutral_mass: f64) -> Self {
        Self {
            peptide: peptide.into(),
            state,
            neutral_mass,
            score: f64::NAN,
            ev: f64::NAN,
            checked: true,
            peak_start: None,
            peak_end: None,
            crosslink_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeAttrs {
    pub charge: i32,
    pub mz: f64,
    pub checked: bool,
    pub charge_index: Option<usize>,
}

impl ChargeAttrs {
    pub fn new(charge: i32, mz: f64) -> Self {
        Self {
            charge,
            mz,
            checked: true,
            charge_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsotopeAttrs {
    pub theoretical_mz: f64,
    pub abundance: f64,
    pub checked: bool,
    pub isotope_index: Option<usize>,
}

impl IsotopeAttrs {
    pub fn new(theoretical_mz: f64, abundance: f64) -> Self {
        Self {
            theoretical_mz,
            abundance,
            checked: true,
            isotope_index: None,
        }
    }

    /// Theoretical values will be derived from the isotopic model when the
    /// document is built
    pub fn unknown() -> Self {
        Self::new(f64::NAN, f64::NAN)
    }

    pub fn is_theoretical_known(&self) -> bool {
        self.theoretical_mz.is_finite() && self.abundance.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeAttrs {
    Root,
    File(FileAttrs),
    LabelGroup(LabelGroupAttrs),
    Crosslink(CrosslinkAttrs),
    Charge(ChargeAttrs),
    Isotope(IsotopeAttrs),
}

macro_rules! attr_accessors {
    ($variant:ident, $ty:ty, $get:ident, $get_mut:ident) => {
        pub fn $get(&self) -> Option<&$ty> {
            if let Self::$variant(attrs) = self {
                Some(attrs)
            } else {
                None
            }
        }

        pub fn $get_mut(&mut self) -> Option<&mut $ty> {
            if let Self::$variant(attrs) = self {
                Some(attrs)
            } else {
                None
            }
        }
    };
}

impl NodeAttrs {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeAttrs::Root => NodeKind::Root,
            NodeAttrs::File(_) => NodeKind::File,
            NodeAttrs::LabelGroup(_) => NodeKind::LabelGroup,
            NodeAttrs::Crosslink(_) => NodeKind::Crosslink,
            NodeAttrs::Charge(_) => NodeKind::Charge,
            NodeAttrs::Isotope(_) => NodeKind::Isotope,
        }
    }

    /// The root is always considered checked
    pub fn checked(&self) -> bool {
        match self {
            NodeAttrs::Root => true,
            NodeAttrs::File(a) => a.checked,
            NodeAttrs::LabelGroup(a) => a.checked,
            NodeAttrs::Crosslink(a) => a.checked,
            NodeAttrs::Charge(a) => a.checked,
            NodeAttrs::Isotope(a) => a.checked,
        }
    }

    pub fn set_checked(&mut self, value: bool) {
        match self {
            NodeAttrs::Root => {}
            NodeAttrs::File(a) => a.checked = value,
            NodeAttrs::LabelGroup(a) => a.checked = value,
            NodeAttrs::Crosslink(a) => a.checked = value,
            NodeAttrs::Charge(a) => a.checked = value,
            NodeAttrs::Isotope(a) => a.checked = value,
        }
    }

    /// The column this node's trace lives in, if the node has a trace at all
    pub fn column(&self) -> Option<(ColumnKind, Option<usize>)> {
        match self {
            NodeAttrs::Root | NodeAttrs::File(_) => None,
            NodeAttrs::LabelGroup(a) => Some((ColumnKind::Labels, a.labels_index)),
            NodeAttrs::Crosslink(a) => Some((ColumnKind::Crosslink, a.crosslink_index)),
            NodeAttrs::Charge(a) => Some((ColumnKind::Charge, a.charge_index)),
            NodeAttrs::Isotope(a) => Some((ColumnKind::Isotope, a.isotope_index)),
        }
    }

    pub(crate) fn set_column_index(&mut self, index: usize) {
        match self {
            NodeAttrs::Root | NodeAttrs::File(_) => {}
            NodeAttrs::LabelGroup(a) => a.labels_index = Some(index),
            NodeAttrs::Crosslink(a) => a.crosslink_index = Some(index),
            NodeAttrs::Charge(a) => a.charge_index = Some(index),
            NodeAttrs::Isotope(a) => a.isotope_index = Some(index),
        }
    }

    attr_accessors!(File, FileAttrs, as_file, as_file_mut);
    attr_accessors!(LabelGroup, LabelGroupAttrs, as_label_group, as_label_group_mut);
    attr_accessors!(Crosslink, CrosslinkAttrs, as_crosslink, as_crosslink_mut);
    attr_accessors!(Charge, ChargeAttrs, as_charge, as_charge_mut);
    attr_accessors!(Isotope, IsotopeAttrs, as_isotope, as_isotope_mut);
}

impl From<FileAttrs> for NodeAttrs {
    fn from(value: FileAttrs) -> Self {
        Self::File(value)
    }
}

impl From<LabelGroupAttrs> for NodeAttrs {
    fn from(value: LabelGroupAttrs) -> Self {
        Self::LabelGroup(value)
    }
}

impl From<CrosslinkAttrs> for NodeAttrs {
    fn from(value: CrosslinkAttrs) -> Self {
        Self::Crosslink(value)
    }
}

impl From<ChargeAttrs> for NodeAttrs {
    fn from(value: ChargeAttrs) -> Self {
        Self::Charge(value)
    }
}

impl From<IsotopeAttrs> for NodeAttrs {
    fn from(value: IsotopeAttrs) -> Self {
        Self::Isotope(value)
    }
}
