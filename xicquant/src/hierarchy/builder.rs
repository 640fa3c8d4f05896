use std::collections::HashMap;

use tracing::{debug, trace};

use crate::isotopic_model::{IsotopicModel, TheoreticalEnvelope};
use crate::settings::QuantSettings;
use crate::store::{ColumnKind, SpectralArrayStore};

use super::{
    ChargeAttrs, CrosslinkAttrs, Document, FileAttrs, HierarchyError, IsotopeAttrs,
    LabelGroupAttrs, LevelKey, NodeId, NodeKind, NodeRecord, ReadMode,
};

#[derive(Debug)]
struct StagedTrace {
    isotope: NodeId,
    intensity: Vec<f64>,
    mz: Option<Vec<f64>>,
}

/// Assembles a [`Document`] top down, staging raw isotope traces until the tree is
/// complete and column indices can be assigned.
///
/// Isotopes added without theoretical m/z or abundance receive values from the
/// configured averagine model, using the owning crosslink's neutral mass and the
/// charge state.
#[derive(Debug)]
pub struct DocumentBuilder {
    document: Document,
    staged: Vec<StagedTrace>,
    model: IsotopicModel<'static>,
    envelopes: HashMap<NodeId, TheoreticalEnvelope>,
}

impl DocumentBuilder {
    pub fn new(settings: QuantSettings) -> Self {
        let model = settings.isotopic_model.into();
        Self {
            document: Document::new(settings),
            staged: Vec::new(),
            model,
            envelopes: HashMap::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn add_file(
        &mut self,
        key: impl Into<LevelKey>,
        attrs: FileAttrs,
        store: Box<dyn SpectralArrayStore>,
    ) -> Result<NodeId, HierarchyError> {
        self.document.add_file(key, attrs, store)
    }

    pub fn add_label_group(
        &mut self,
        file: NodeId,
        key: impl Into<LevelKey>,
        attrs: LabelGroupAttrs,
    ) -> Result<NodeId, HierarchyError> {
        self.document.append(file, NodeRecord::new(key, attrs))
    }

    pub fn add_crosslink(
        &mut self,
        label_group: NodeId,
        key: impl Into<LevelKey>,
        attrs: CrosslinkAttrs,
    ) -> Result<NodeId, HierarchyError> {
        self.document.append(label_group, NodeRecord::new(key, attrs))
    }

    pub fn add_charge(
        &mut self,
        crosslink: NodeId,
        key: impl Into<LevelKey>,
        attrs: ChargeAttrs,
    ) -> Result<NodeId, HierarchyError> {
        self.document.append(crosslink, NodeRecord::new(key, attrs))
    }

    fn envelope_for(&mut self, charge: NodeId) -> Result<&TheoreticalEnvelope, HierarchyError> {
        if !self.envelopes.contains_key(&charge) {
            let doc = &self.document;
            let z = doc
                .node(charge)?
                .attrs()
                .as_charge()
                .map(|a| a.charge)
                .ok_or(HierarchyError::InvalidChild {
                    parent: NodeKind::Charge,
                    child: doc[charge].kind(),
                })?;
            let crosslink = doc.require_ancestor(charge, NodeKind::Crosslink)?;
            let neutral_mass = doc[crosslink]
                .attrs()
                .as_crosslink()
                .map(|a| a.neutral_mass)
                .unwrap_or(f64::NAN);
            let count = doc.settings().isotope_count;
            let env = self.model.isotopic_envelope(neutral_mass, z, count);
            self.envelopes.insert(charge, env);
        }
        Ok(&self.envelopes[&charge])
    }

    /// Add an isotope with its raw traces, which must span the file's full retention
    /// time axis.
    pub fn add_isotope(
        &mut self,
        charge: NodeId,
        key: impl Into<LevelKey>,
        mut attrs: IsotopeAttrs,
        intensity: Vec<f64>,
        mz: Option<Vec<f64>>,
    ) -> Result<NodeId, HierarchyError> {
        let key = key.into();
        if !attrs.is_theoretical_known() {
            let envelope = self.envelope_for(charge)?;
            match envelope.get(key.0 as usize) {
                Some((theoretical_mz, abundance)) => {
                    if !attrs.theoretical_mz.is_finite() {
                        attrs.theoretical_mz = theoretical_mz;
                    }
                    if !attrs.abundance.is_finite() {
                        attrs.abundance = abundance;
                    }
                }
                None => {
                    trace!("No theoretical isotope {key} for charge {charge}");
                }
            }
        }
        let isotope = self.document.append(charge, NodeRecord::new(key, attrs))?;
        self.staged.push(StagedTrace {
            isotope,
            intensity,
            mz,
        });
        Ok(isotope)
    }

    /// Assign column indices, write the staged isotope traces, fill the aggregate
    /// traces of the levels above them and, in [`ReadMode::Memory`], preload every
    /// label group.
    pub fn finish(mut self) -> Result<Document, HierarchyError> {
        self.document.init_cache()?;
        for staged in self.staged.drain(..) {
            let node = self.document.node(staged.isotope)?;
            let index = node
                .attrs()
                .as_isotope()
                .and_then(|a| a.isotope_index)
                .ok_or(HierarchyError::ColumnNotAssigned(node.levels()))?;
            let store_index = self.document.store_index_of(staged.isotope)?;
            let store = &mut self.document.stores[store_index];
            store.write_intensity(ColumnKind::Isotope, index, &staged.intensity)?;
            if let Some(mz) = staged.mz {
                store.write_mz(index, &mz)?;
            }
        }
        self.document.rollup_columns()?;
        if self.document.settings().read_mode == ReadMode::Memory {
            self.document.preload_all()?;
        }
        debug!("Built a document with {} nodes", self.document.len());
        Ok(self.document)
    }
}
