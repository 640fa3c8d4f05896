//! Column-oriented spectral array storage.
//!
//! Every file in a [`Document`](crate::hierarchy::Document) is backed by one
//! [`SpectralArrayStore`]. A store holds one shared retention time axis and
//! flattened intensity columns for each hierarchy level that carries a trace
//! (label groups, crosslinks, charge states and isotopes), plus m/z columns
//! for isotopes. Columns are addressed by the small integer indices handed out
//! by [`Document::init_cache`](crate::hierarchy::Document::init_cache).
use std::fmt::Debug;
use std::ops::Range;

use thiserror::Error;

/// The hierarchy levels that own a flattened column in a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColumnKind {
    Labels,
    Crosslink,
    Charge,
    Isotope,
}

impl ColumnKind {
    pub const ALL: [ColumnKind; 4] = [
        ColumnKind::Labels,
        ColumnKind::Crosslink,
        ColumnKind::Charge,
        ColumnKind::Isotope,
    ];

    #[inline]
    pub(crate) fn slot(&self) -> usize {
        match self {
            ColumnKind::Labels => 0,
            ColumnKind::Crosslink => 1,
            ColumnKind::Charge => 2,
            ColumnKind::Isotope => 3,
        }
    }
}

/// How many columns of each [`ColumnKind`] a store must hold
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ColumnCounts([usize; 4]);

impl ColumnCounts {
    pub fn get(&self, kind: ColumnKind) -> usize {
        self.0[kind.slot()]
    }

    /// Reserve the next column of `kind`, returning its index
    pub fn next_index(&mut self, kind: ColumnKind) -> usize {
        let i = self.0[kind.slot()];
        self.0[kind.slot()] += 1;
        i
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("No {kind:?} column at index {index}, only {allocated} allocated")]
    ColumnOutOfRange {
        kind: ColumnKind,
        index: usize,
        allocated: usize,
    },
    #[error("No m/z column at index {index}, only {allocated} allocated")]
    MZColumnOutOfRange { index: usize, allocated: usize },
    #[error("Row range {start}..{end} is not within the {rows} rows of the store")]
    RowsOutOfRange {
        start: usize,
        end: usize,
        rows: usize,
    },
    #[error("Expected a column of {expected} rows, received {found}")]
    LengthMismatch { expected: usize, found: usize },
}

/// The storage interface the quantitation core reads spectral arrays through.
///
/// Ranges are row ranges into the shared retention time axis.
pub trait SpectralArrayStore: Debug + Send + Sync {
    /// Size the store to hold `counts` columns of each kind. Existing columns within
    /// the new bounds are retained.
    fn allocate(&mut self, counts: ColumnCounts);

    /// The number of rows (time points) in every column
    fn n_rows(&self) -> usize;

    /// The number of columns allocated for `kind`
    fn n_columns(&self, kind: ColumnKind) -> usize;

    fn retentiontime_column(&self, range: Range<usize>) -> Result<Vec<f64>, StoreError>;

    fn intensity_column(
        &self,
        kind: ColumnKind,
        index: usize,
        range: Range<usize>,
    ) -> Result<Vec<f64>, StoreError>;

    /// Only isotope columns carry m/z traces
    fn mz_column(&self, index: usize, range: Range<usize>) -> Result<Vec<f64>, StoreError>;

    /// Read several columns of the same kind at once, returning one row per
    /// requested column (the transpose of a `[start:end, indices]` slice).
    fn intensity_columns(
        &self,
        kind: ColumnKind,
        indices: &[usize],
        range: Range<usize>,
    ) -> Result<Vec<Vec<f64>>, StoreError> {
        indices
            .iter()
            .map(|i| self.intensity_column(kind, *i, range.clone()))
            .collect()
    }

    fn write_retentiontime(&mut self, values: &[f64]) -> Result<(), StoreError>;

    fn write_intensity(
        &mut self,
        kind: ColumnKind,
        index: usize,
        values: &[f64],
    ) -> Result<(), StoreError>;

    fn write_mz(&mut self, index: usize, values: &[f64]) -> Result<(), StoreError>;
}

/// A [`SpectralArrayStore`] that keeps every column resident in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryArrayStore {
    retention_time: Vec<f64>,
    intensity: [Vec<Vec<f64>>; 4],
    mz: Vec<Vec<f64>>,
}

impl MemoryArrayStore {
    pub fn new(retention_time: Vec<f64>) -> Self {
        Self {
            retention_time,
            ..Default::default()
        }
    }

    fn check_rows(&self, range: &Range<usize>) -> Result<(), StoreError> {
        let rows = self.n_rows();
        if range.start > range.end || range.end > rows {
            Err(StoreError::RowsOutOfRange {
                start: range.start,
                end: range.end,
                rows,
            })
        } else {
            Ok(())
        }
    }

    fn check_length(&self, values: &[f64]) -> Result<(), StoreError> {
        if values.len() != self.n_rows() {
            Err(StoreError::LengthMismatch {
                expected: self.n_rows(),
                found: values.len(),
            })
        } else {
            Ok(())
        }
    }

    fn column(&self, kind: ColumnKind, index: usize) -> Result<&Vec<f64>, StoreError> {
        let columns = &self.intensity[kind.slot()];
        columns.get(index).ok_or(StoreError::ColumnOutOfRange {
            kind,
            index,
            allocated: columns.len(),
        })
    }
}

impl SpectralArrayStore for MemoryArrayStore {
    fn allocate(&mut self, counts: ColumnCounts) {
        let rows = self.n_rows();
        for kind in ColumnKind::ALL {
            self.intensity[kind.slot()].resize(counts.get(kind), vec![0.0; rows]);
        }
        self.mz
            .resize(counts.get(ColumnKind::Isotope), vec![f64::NAN; rows]);
    }

    fn n_rows(&self) -> usize {
        self.retention_time.len()
    }

    fn n_columns(&self, kind: ColumnKind) -> usize {
        self.intensity[kind.slot()].len()
    }

    fn retentiontime_column(&self, range: Range<usize>) -> Result<Vec<f64>, StoreError> {
        self.check_rows(&range)?;
        Ok(self.retention_time[range].to_vec())
    }

    fn intensity_column(
        &self,
        kind: ColumnKind,
        index: usize,
        range: Range<usize>,
    ) -> Result<Vec<f64>, StoreError> {
        self.check_rows(&range)?;
        Ok(self.column(kind, index)?[range].to_vec())
    }

    fn mz_column(&self, index: usize, range: Range<usize>) -> Result<Vec<f64>, StoreError> {
        self.check_rows(&range)?;
        let col = self.mz.get(index).ok_or(StoreError::MZColumnOutOfRange {
            index,
            allocated: self.mz.len(),
        })?;
        Ok(col[range].to_vec())
    }

    fn write_retentiontime(&mut self, values: &[f64]) -> Result<(), StoreError> {
        if !self.retention_time.is_empty() {
            self.check_length(values)?;
        }
        self.retention_time = values.to_vec();
        Ok(())
    }

    fn write_intensity(
        &mut self,
        kind: ColumnKind,
        index: usize,
        values: &[f64],
    ) -> Result<(), StoreError> {
        self.check_length(values)?;
        let columns = &mut self.intensity[kind.slot()];
        let allocated = columns.len();
        let col = columns.get_mut(index).ok_or(StoreError::ColumnOutOfRange {
            kind,
            index,
            allocated,
        })?;
        col.copy_from_slice(values);
        Ok(())
    }

    fn write_mz(&mut self, index: usize, values: &[f64]) -> Result<(), StoreError> {
        self.check_length(values)?;
        let allocated = self.mz.len();
        let col = self
            .mz
            .get_mut(index)
            .ok_or(StoreError::MZColumnOutOfRange { index, allocated })?;
        col.copy_from_slice(values);
        Ok(())
    }
}
