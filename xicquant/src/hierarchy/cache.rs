use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use tracing::{debug, trace};

use crate::store::{ColumnCounts, ColumnKind};

use super::{Document, HierarchyError, Levels, NodeId, NodeKind};

/// Where [`Document::intensity`] and [`Document::mz`] read traces from
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReadMode {
    /// Serve traces from the preloaded cache, falling back to the store on a miss
    Memory,
    /// Always read through to the store
    #[default]
    OnDemand,
}

/// A preloaded trace sliced to its label group window
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Trace {
    pub intensity: Vec<f64>,
    pub mz: Option<Vec<f64>>,
}

pub type TraceCache = HashMap<Levels, Trace>;

/// Switches a [`Document`]'s [`ReadMode`] for as long as it lives, restoring the
/// previous mode when dropped.
#[derive(Debug)]
pub struct ReadModeGuard<'a> {
    document: &'a mut Document,
    previous: ReadMode,
}

impl<'a> Deref for ReadModeGuard<'a> {
    type Target = Document;

    fn deref(&self) -> &Self::Target {
        self.document
    }
}

impl<'a> DerefMut for ReadModeGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.document
    }
}

impl<'a> Drop for ReadModeGuard<'a> {
    fn drop(&mut self) {
        trace!(
            "Restoring read mode {:?} from {:?}",
            self.previous,
            self.document.read_mode
        );
        self.document.read_mode = self.previous;
    }
}

impl Document {
    pub fn read_mode(&self) -> ReadMode {
        self.read_mode
    }

    pub fn set_read_mode(&mut self, mode: ReadMode) {
        self.read_mode = mode;
    }

    /// Use `mode` until the returned guard is dropped
    pub fn with_read_mode(&mut self, mode: ReadMode) -> ReadModeGuard<'_> {
        let previous = self.read_mode;
        self.read_mode = mode;
        ReadModeGuard {
            document: self,
            previous,
        }
    }

    /// Assign every trace-bearing node a column index in its file's store, sized so each
    /// store can hold all of its columns. Indices are assigned per file in tree order.
    pub fn init_cache(&mut self) -> Result<Vec<ColumnCounts>, HierarchyError> {
        let files = self.iter_kind(NodeKind::File);
        let mut all_counts = Vec::with_capacity(files.len());
        for file in files {
            let mut counts = ColumnCounts::default();
            for id in self.descendants(file) {
                let node = self.node_mut(id)?;
                if let Some((kind, _)) = node.attrs.column() {
                    let index = counts.next_index(kind);
                    node.attrs.set_column_index(index);
                }
            }
            let store_index = self[file]
                .attrs
                .as_file()
                .map(|a| a.store)
                .ok_or(HierarchyError::NoTrace(NodeKind::File))?;
            if let Some(store) = self.stores.get_mut(store_index) {
                store.allocate(counts);
            }
            debug!(
                "Allocated {} columns for file {}",
                counts.total(),
                self[file].key
            );
            all_counts.push(counts);
        }
        self.cache.clear();
        Ok(all_counts)
    }

    /// Fill every aggregate column (label group, crosslink and charge) with the sum of
    /// its children's columns, bottom up.
    pub fn rollup_columns(&mut self) -> Result<(), HierarchyError> {
        for kind in [NodeKind::Charge, NodeKind::Crosslink, NodeKind::LabelGroup] {
            for id in self.iter_kind(kind) {
                let node = self.node(id)?;
                let (column_kind, index) = self.column_index(node)?;
                let Some((child_kind, child_indices)) = self.child_columns(id)? else {
                    continue;
                };
                let store = self.store_of(id)?;
                let rows = store.n_rows();
                let mut total = vec![0.0; rows];
                for trace in store.intensity_columns(child_kind, &child_indices, 0..rows)? {
                    for (t, v) in total.iter_mut().zip(trace) {
                        *t += v;
                    }
                }
                let store_index = self.store_index_of(id)?;
                self.stores[store_index].write_intensity(column_kind, index, &total)?;
            }
        }
        Ok(())
    }

    fn child_columns(&self, id: NodeId) -> Result<Option<(ColumnKind, Vec<usize>)>, HierarchyError> {
        let node = self.node(id)?;
        let mut kind = None;
        let mut indices = Vec::with_capacity(node.children.len());
        for c in node.children.iter() {
            let (k, i) = self.column_index(self.node(*c)?)?;
            kind = Some(k);
            indices.push(i);
        }
        Ok(kind.map(|k| (k, indices)))
    }

    pub(crate) fn store_index_of(&self, id: NodeId) -> Result<usize, HierarchyError> {
        let file = self.require_ancestor(id, NodeKind::File)?;
        self[file]
            .attrs
            .as_file()
            .map(|a| a.store)
            .ok_or(HierarchyError::NoTrace(NodeKind::File))
    }

    /// Load the traces of a label group and everything below it into the trace cache,
    /// returning the number of traces loaded.
    pub fn preload(&mut self, label_group: NodeId) -> Result<usize, HierarchyError> {
        let node = self.node(label_group)?;
        if node.kind != NodeKind::LabelGroup {
            return Err(HierarchyError::InvalidChild {
                parent: NodeKind::LabelGroup,
                child: node.kind,
            });
        }
        let mut ids = vec![label_group];
        ids.extend(self.descendants(label_group));
        let mut loaded = Vec::with_capacity(ids.len());
        for id in ids {
            let intensity = self.intensity(id, true)?;
            let mz = if self[id].kind == NodeKind::Isotope {
                Some(self.mz(id, true)?)
            } else {
                None
            };
            loaded.push((self[id].levels, Trace { intensity, mz }));
        }
        let n = loaded.len();
        self.cache.extend(loaded);
        trace!("Preloaded {n} traces for {}", self[label_group].levels);
        Ok(n)
    }

    /// Preload every label group in the document
    pub fn preload_all(&mut self) -> Result<usize, HierarchyError> {
        let mut total = 0;
        for group in self.iter_kind(NodeKind::LabelGroup) {
            total += self.preload(group)?;
        }
        debug!("Preloaded {total} traces");
        Ok(total)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn is_preloaded(&self, id: NodeId) -> bool {
        self.get(id)
            .map(|n| self.cache.contains_key(&n.levels))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use super::*;
    use crate::hierarchy::test::make_document;
    use crate::settings::QuantSettings;

    #[test]
    fn test_read_mode_guard() {
        let mut doc = make_document(QuantSettings::default());
        assert_eq!(doc.read_mode(), ReadMode::OnDemand);
        {
            let guard = doc.with_read_mode(ReadMode::Memory);
            assert_eq!(guard.read_mode(), ReadMode::Memory);
        }
        assert_eq!(doc.read_mode(), ReadMode::OnDemand);
    }

    #[test]
    fn test_read_mode_restored_on_panic() {
        let mut doc = make_document(QuantSettings::default());
        let result = catch_unwind(AssertUnwindSafe(|| {
            let guard = doc.with_read_mode(ReadMode::Memory);
            assert_eq!(guard.read_mode(), ReadMode::Memory);
            panic!("failed while reading traces");
        }));
        assert!(result.is_err());
        assert_eq!(doc.read_mode(), ReadMode::OnDemand);
    }

    #[test]
    fn test_preload_matches_store() {
        let mut doc = make_document(QuantSettings::default());
        let group = doc.iter_kind(NodeKind::LabelGroup)[0];
        let n = doc.preload(group).unwrap();
        // label group + 2 crosslinks + 4 charges + 12 isotopes
        assert_eq!(n, 19);

        let charge = doc.iter_kind(NodeKind::Charge)[1];
        assert!(doc.is_preloaded(charge));
        let on_demand = doc.intensity(charge, false).unwrap();
        let guard = doc.with_read_mode(ReadMode::Memory);
        assert_eq!(guard.intensity(charge, false).unwrap(), on_demand);
        assert_eq!(guard.intensity(group, false).unwrap()[2], 20.0 * 12.0);

        let crosslink = guard.iter_kind(NodeKind::Crosslink)[0];
        let block = guard.child_intensity(crosslink, 0, 5).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block[0], vec![0.0, 30.0, 60.0, 30.0, 0.0]);
    }

    #[test]
    fn test_preload_rejects_other_levels() {
        let mut doc = make_document(QuantSettings::default());
        let xl = doc.iter_kind(NodeKind::Crosslink)[0];
        assert!(doc.preload(xl).is_err());
    }
}
