//! The five level quantitation document.
//!
//! A [`Document`] is an arena of [`Node`]s rooted at a single document root:
//!
//! ```text
//! Root -> File -> LabelGroup -> Crosslink -> Charge -> Isotope
//! ```
//!
//! Every node knows its own integer key at its level and the full [`Levels`] path
//! from the root. Children are kept sorted by key and indexed through a
//! [`LevelIndex`] so they can be addressed either by key or by position.
//! Parent links are plain [`NodeId`]s, so moving or removing a subtree requires an
//! explicit rebuild, handled by [`Document::reparent`] and [`Document::remove_file`].
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::num::ParseIntError;
use std::ops::Index;
use std::str::FromStr;

use identity_hash::IdentityHashable;
use thiserror::Error;
use tracing::{debug, trace};

use crate::settings::QuantSettings;
use crate::store::{ColumnKind, SpectralArrayStore, StoreError};
use crate::window::LinearRange;

mod attrs;
mod builder;
mod cache;
mod index;

pub use attrs::{
    AttrValue, ChargeAttrs, CrosslinkAttrs, FileAttrs, IsotopeAttrs, LabelGroupAttrs, Metadata,
    NodeAttrs,
};
pub use builder::DocumentBuilder;
pub use cache::{ReadMode, ReadModeGuard, Trace, TraceCache};
pub use index::LevelIndex;

/// A handle to a node in a [`Document`]'s arena. Handles are invalidated by
/// [`Document::remove_file`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl Hash for NodeId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.0);
    }
}

impl IdentityHashable for NodeId {}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The level a node lives at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    Root,
    File,
    LabelGroup,
    Crosslink,
    Charge,
    Isotope,
}

impl NodeKind {
    /// The only kind of node that may be appended below this one
    pub fn child_kind(&self) -> Option<NodeKind> {
        match self {
            NodeKind::Root => Some(NodeKind::File),
            NodeKind::File => Some(NodeKind::LabelGroup),
            NodeKind::LabelGroup => Some(NodeKind::Crosslink),
            NodeKind::Crosslink => Some(NodeKind::Charge),
            NodeKind::Charge => Some(NodeKind::Isotope),
            NodeKind::Isotope => None,
        }
    }

    /// The slot in [`Levels`] holding this level's key
    pub fn depth(&self) -> Option<usize> {
        match self {
            NodeKind::Root => None,
            NodeKind::File => Some(0),
            NodeKind::LabelGroup => Some(1),
            NodeKind::Crosslink => Some(2),
            NodeKind::Charge => Some(3),
            NodeKind::Isotope => Some(4),
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The integer identifier of a node among its siblings
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevelKey(pub u32);

impl Hash for LevelKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.0);
    }
}

impl IdentityHashable for LevelKey {}

impl Display for LevelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LevelKey {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

impl From<u32> for LevelKey {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The path of keys from the document root to a node, one optional slot per level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Levels([Option<LevelKey>; 5]);

impl Levels {
    pub fn new(keys: [Option<LevelKey>; 5]) -> Self {
        Self(keys)
    }

    /// Build a path from a prefix of keys, starting at the file level
    pub fn from_keys(keys: &[u32]) -> Self {
        let mut this = Self::default();
        for (slot, k) in this.0.iter_mut().zip(keys) {
            *slot = Some(LevelKey(*k));
        }
        this
    }

    pub fn with(mut self, kind: NodeKind, key: LevelKey) -> Self {
        if let Some(depth) = kind.depth() {
            self.0[depth] = Some(key);
        }
        self
    }

    pub fn get(&self, kind: NodeKind) -> Option<LevelKey> {
        kind.depth().and_then(|d| self.0[d])
    }

    pub fn file(&self) -> Option<LevelKey> {
        self.0[0]
    }

    pub fn labels(&self) -> Option<LevelKey> {
        self.0[1]
    }

    pub fn crosslink(&self) -> Option<LevelKey> {
        self.0[2]
    }

    pub fn charge(&self) -> Option<LevelKey> {
        self.0[3]
    }

    pub fn isotope(&self) -> Option<LevelKey> {
        self.0[4]
    }

    pub fn iter(&self) -> impl Iterator<Item = LevelKey> + '_ {
        self.0.iter().map_while(|k| *k)
    }
}

impl Display for Levels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, k) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HierarchyError {
    #[error("No node with id {0}")]
    UnknownNode(NodeId),
    #[error("A child with key {key} already exists under {parent}")]
    DuplicateKey { parent: Levels, key: LevelKey },
    #[error("Child index {index} out of range for a node with {len} children")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("No child with key {key} under {parent}")]
    KeyNotFound { parent: Levels, key: LevelKey },
    #[error("A {child} node cannot be placed under a {parent} node")]
    InvalidChild { parent: NodeKind, child: NodeKind },
    #[error("File nodes must be added with a backing store")]
    FileRequiresStore,
    #[error("A {0} node does not have a trace")]
    NoTrace(NodeKind),
    #[error("The node at {0} has not been assigned a column, call `init_cache` first")]
    ColumnNotAssigned(Levels),
    #[error("The node at {levels} has no {kind} ancestor")]
    MissingAncestor { levels: Levels, kind: NodeKind },
    #[error("Attribute {name} expects a {expected} value")]
    AttributeType { name: String, expected: &'static str },
    #[error("Attribute {name} cannot be assigned")]
    ReadOnlyAttribute { name: String },
    #[error("Nodes cannot be moved between files")]
    CrossFileMove,
    #[error("An error occurred while accessing the array store: {0}")]
    Store(#[from] StoreError),
}

/// A single node of the document tree
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) key: LevelKey,
    pub(crate) levels: Levels,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) index: LevelIndex,
    pub(crate) attrs: NodeAttrs,
    pub(crate) extra: Metadata,
}

impl Node {
    fn new(key: LevelKey, levels: Levels, parent: Option<NodeId>, attrs: NodeAttrs, extra: Metadata) -> Self {
        Self {
            kind: attrs.kind(),
            key,
            levels,
            parent,
            children: Vec::new(),
            index: LevelIndex::default(),
            attrs,
            extra,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn key(&self) -> LevelKey {
        self.key
    }

    pub fn levels(&self) -> Levels {
        self.levels
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn index(&self) -> &LevelIndex {
        &self.index
    }

    pub fn attrs(&self) -> &NodeAttrs {
        &self.attrs
    }

    pub fn extra(&self) -> &Metadata {
        &self.extra
    }

    pub fn checked(&self) -> bool {
        self.attrs.checked()
    }

    /// Read a float-valued score from [`Node::extra`], NaN when absent
    pub fn score(&self, name: &str) -> f64 {
        self.extra
            .get(name)
            .and_then(|v| v.as_float())
            .unwrap_or(f64::NAN)
    }
}

/// The attributes and key of a node about to be appended to a [`Document`]
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub key: LevelKey,
    pub attrs: NodeAttrs,
    pub extra: Metadata,
}

impl NodeRecord {
    pub fn new(key: impl Into<LevelKey>, attrs: impl Into<NodeAttrs>) -> Self {
        Self {
            key: key.into(),
            attrs: attrs.into(),
            extra: Metadata::new(),
        }
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }
}

const ROOT: NodeId = NodeId(0);

/// The document tree together with the array stores backing its files.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    pub(crate) stores: Vec<Box<dyn SpectralArrayStore>>,
    settings: QuantSettings,
    pub(crate) read_mode: ReadMode,
    pub(crate) cache: TraceCache,
}

impl Default for Document {
    fn default() -> Self {
        Self::new(QuantSettings::default())
    }
}

impl Index<NodeId> for Document {
    type Output = Node;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.nodes[index.0]
    }
}

impl Document {
    pub fn new(settings: QuantSettings) -> Self {
        let root = Node::new(
            LevelKey(0),
            Levels::default(),
            None,
            NodeAttrs::Root,
            Metadata::new(),
        );
        Self {
            nodes: vec![root],
            stores: Vec::new(),
            read_mode: settings.read_mode,
            settings,
            cache: TraceCache::default(),
        }
    }

    pub fn root(&self) -> NodeId {
        ROOT
    }

    pub fn settings(&self) -> &QuantSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut QuantSettings {
        &mut self.settings
    }

    /// The number of nodes in the tree, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A document is empty when it holds no files
    pub fn is_empty(&self) -> bool {
        self.nodes[ROOT.0].children.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, HierarchyError> {
        self.nodes.get(id.0).ok_or(HierarchyError::UnknownNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, HierarchyError> {
        self.nodes.get_mut(id.0).ok_or(HierarchyError::UnknownNode(id))
    }

    /// Add a new file to the document with `store` holding its spectral arrays
    pub fn add_file(
        &mut self,
        key: impl Into<LevelKey>,
        mut attrs: FileAttrs,
        store: Box<dyn SpectralArrayStore>,
    ) -> Result<NodeId, HierarchyError> {
        let key = key.into();
        if self.nodes[ROOT.0].index.contains_key(key) {
            return Err(HierarchyError::DuplicateKey {
                parent: Levels::default(),
                key,
            });
        }
        attrs.store = self.stores.len();
        self.stores.push(store);
        self.insert_node(ROOT, NodeRecord::new(key, attrs))
    }

    /// Append a new child under `parent`. The child must belong to the level directly
    /// below `parent` and its key must be unique among its siblings.
    pub fn append(&mut self, parent: NodeId, record: NodeRecord) -> Result<NodeId, HierarchyError> {
        if matches!(record.attrs, NodeAttrs::File(_)) {
            return Err(HierarchyError::FileRequiresStore);
        }
        self.insert_node(parent, record)
    }

    fn insert_node(&mut self, parent: NodeId, record: NodeRecord) -> Result<NodeId, HierarchyError> {
        let parent_node = self.node(parent)?;
        let kind = record.attrs.kind();
        if parent_node.kind.child_kind() != Some(kind) {
            return Err(HierarchyError::InvalidChild {
                parent: parent_node.kind,
                child: kind,
            });
        }
        if parent_node.index.contains_key(record.key) {
            return Err(HierarchyError::DuplicateKey {
                parent: parent_node.levels,
                key: record.key,
            });
        }
        let levels = parent_node.levels.with(kind, record.key);
        let id = NodeId(self.nodes.len());
        trace!("Appending {kind} {levels} as {id}");
        self.nodes.push(Node::new(
            record.key,
            levels,
            Some(parent),
            record.attrs,
            record.extra,
        ));
        self.nodes[parent.0].children.push(id);
        self.sort_children(parent);
        Ok(id)
    }

    fn sort_children(&mut self, parent: NodeId) {
        let mut children = std::mem::take(&mut self.nodes[parent.0].children);
        children.sort_by_key(|c| self.nodes[c.0].key);
        let index = LevelIndex::rebuild(children.iter().map(|c| self.nodes[c.0].key));
        let node = &mut self.nodes[parent.0];
        node.children = children;
        node.index = index;
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], HierarchyError> {
        Ok(&self.node(id)?.children)
    }

    /// Follow parent links up to the top of the tree
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// Find the node of `kind` on the path from `id` to the root, including `id` itself
    pub fn ancestor(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id)?;
            if node.kind == kind {
                return Some(node_id);
            }
            if node.kind < kind {
                return None;
            }
            current = node.parent;
        }
        None
    }

    pub(crate) fn require_ancestor(&self, id: NodeId, kind: NodeKind) -> Result<NodeId, HierarchyError> {
        self.ancestor(id, kind)
            .ok_or_else(|| HierarchyError::MissingAncestor {
                levels: self.get(id).map(|n| n.levels).unwrap_or_default(),
                kind,
            })
    }

    /// All nodes below `id` in pre-order, children visited in key order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.get(id) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }
        out
    }

    /// Every node of `kind` in the document, in tree order
    pub fn iter_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        if kind == NodeKind::Root {
            return vec![ROOT];
        }
        self.descendants(ROOT)
            .into_iter()
            .filter(|id| self.nodes[id.0].kind == kind)
            .collect()
    }

    pub fn get_by_key(&self, parent: NodeId, key: impl Into<LevelKey>) -> Option<NodeId> {
        let node = self.get(parent)?;
        node.index
            .position_of(key.into())
            .map(|i| node.children[i])
    }

    pub fn get_by_index(&self, parent: NodeId, index: usize) -> Result<NodeId, HierarchyError> {
        let node = self.node(parent)?;
        node.children
            .get(index)
            .copied()
            .ok_or(HierarchyError::IndexOutOfRange {
                index,
                len: node.children.len(),
            })
    }

    pub fn get_key(&self, parent: NodeId, index: usize) -> Result<LevelKey, HierarchyError> {
        let node = self.node(parent)?;
        node.index.key_at(index).ok_or(HierarchyError::IndexOutOfRange {
            index,
            len: node.index.len(),
        })
    }

    pub fn has_key(&self, parent: NodeId, key: impl Into<LevelKey>) -> bool {
        self.get(parent)
            .map(|n| n.index.contains_key(key.into()))
            .unwrap_or_default()
    }

    pub fn has_index(&self, parent: NodeId, index: usize) -> bool {
        self.get(parent)
            .map(|n| index < n.children.len())
            .unwrap_or_default()
    }

    /// Resolve a full key path to a node
    pub fn find(&self, levels: &Levels) -> Option<NodeId> {
        levels
            .iter()
            .try_fold(ROOT, |current, key| self.get_by_key(current, key))
    }

    fn typed_attr(attrs: &NodeAttrs, name: &str) -> Option<AttrValue> {
        let value = match (attrs, name) {
            (_, "checked") => attrs.checked().into(),
            (NodeAttrs::File(a), "name") => a.name.as_str().into(),
            (NodeAttrs::LabelGroup(a), "labels") => a.labels.join(":").into(),
            (NodeAttrs::Crosslink(a), "peptide") => a.peptide.as_str().into(),
            (NodeAttrs::Crosslink(a), "state") => (a.state as i64).into(),
            (NodeAttrs::Crosslink(a), "neutral_mass") => a.neutral_mass.into(),
            (NodeAttrs::Crosslink(a), "score") => a.score.into(),
            (NodeAttrs::Crosslink(a), "ev") => a.ev.into(),
            (NodeAttrs::Charge(a), "charge") => (a.charge as i64).into(),
            (NodeAttrs::Charge(a), "mz") => a.mz.into(),
            (NodeAttrs::Isotope(a), "theoretical_mz") => a.theoretical_mz.into(),
            (NodeAttrs::Isotope(a), "abundance") => a.abundance.into(),
            _ => return None,
        };
        Some(value)
    }

    /// Read a named attribute, looking at the typed attributes first and the free-form
    /// metadata second.
    pub fn getattr(&self, id: NodeId, name: &str) -> Option<AttrValue> {
        let node = self.get(id)?;
        Self::typed_attr(&node.attrs, name).or_else(|| node.extra.get(name).cloned())
    }

    fn setattr_node(node: &mut Node, name: &str, value: &AttrValue) -> Result<(), HierarchyError> {
        match (name, &mut node.attrs) {
            ("checked", attrs) => {
                let v = value.as_bool().ok_or_else(|| HierarchyError::AttributeType {
                    name: name.to_string(),
                    expected: "boolean",
                })?;
                attrs.set_checked(v);
            }
            ("score" | "ev", NodeAttrs::Crosslink(attrs)) => {
                let v = value.as_float().ok_or_else(|| HierarchyError::AttributeType {
                    name: name.to_string(),
                    expected: "numeric",
                })?;
                if name == "score" {
                    attrs.score = v
                } else {
                    attrs.ev = v
                }
            }
            (_, attrs) => {
                if Self::typed_attr(attrs, name).is_some() {
                    return Err(HierarchyError::ReadOnlyAttribute {
                        name: name.to_string(),
                    });
                }
                node.extra.insert(name.to_string(), value.clone());
            }
        }
        Ok(())
    }

    /// Assign a named attribute on `id`, and on every node below it when `recurse` is set
    pub fn setattr(
        &mut self,
        id: NodeId,
        name: &str,
        value: impl Into<AttrValue>,
        recurse: bool,
    ) -> Result<(), HierarchyError> {
        let value = value.into();
        Self::setattr_node(self.node_mut(id)?, name, &value)?;
        if recurse {
            for child in self.descendants(id) {
                Self::setattr_node(&mut self.nodes[child.0], name, &value)?;
            }
        }
        Ok(())
    }

    pub fn set_checked(&mut self, id: NodeId, checked: bool, recurse: bool) -> Result<(), HierarchyError> {
        self.setattr(id, "checked", checked, recurse)
    }

    pub(crate) fn store_of(&self, id: NodeId) -> Result<&dyn SpectralArrayStore, HierarchyError> {
        let file = self.require_ancestor(id, NodeKind::File)?;
        let store_index = self.nodes[file.0]
            .attrs
            .as_file()
            .map(|a| a.store)
            .ok_or(HierarchyError::NoTrace(NodeKind::File))?;
        self.stores
            .get(store_index)
            .map(|s| s.as_ref())
            .ok_or(HierarchyError::FileRequiresStore)
    }

    /// The absolute row window of the label group `id` belongs to
    pub fn window_of(&self, id: NodeId) -> Result<LinearRange, HierarchyError> {
        let node = self.node(id)?;
        if node.kind < NodeKind::LabelGroup {
            return Err(HierarchyError::NoTrace(node.kind));
        }
        let group = self.require_ancestor(id, NodeKind::LabelGroup)?;
        self.nodes[group.0]
            .attrs
            .as_label_group()
            .map(|a| a.window)
            .ok_or(HierarchyError::NoTrace(node.kind))
    }

    /// The retention times spanned by the label group window `id` belongs to
    pub fn retention_time(&self, id: NodeId) -> Result<Vec<f64>, HierarchyError> {
        let window = self.window_of(id)?;
        let store = self.store_of(id)?;
        Ok(store.retentiontime_column(window.to_range())?)
    }

    fn column_index(&self, node: &Node) -> Result<(ColumnKind, usize), HierarchyError> {
        let (kind, index) = node.attrs.column().ok_or(HierarchyError::NoTrace(node.kind))?;
        let index = index.ok_or(HierarchyError::ColumnNotAssigned(node.levels))?;
        Ok((kind, index))
    }

    /// The intensity trace of `id` over its label group window.
    ///
    /// In [`ReadMode::Memory`] the preloaded trace is returned when present, otherwise
    /// or when `force_load` is set the trace is read from the file's store.
    pub fn intensity(&self, id: NodeId, force_load: bool) -> Result<Vec<f64>, HierarchyError> {
        let node = self.node(id)?;
        if self.read_mode == ReadMode::Memory && !force_load {
            if let Some(trace) = self.cache.get(&node.levels) {
                return Ok(trace.intensity.clone());
            }
            trace!("Trace cache miss for {}", node.levels);
        }
        let (kind, index) = self.column_index(node)?;
        let window = self.window_of(id)?;
        Ok(self
            .store_of(id)?
            .intensity_column(kind, index, window.to_range())?)
    }

    /// The m/z trace of an isotope over its label group window
    pub fn mz(&self, id: NodeId, force_load: bool) -> Result<Vec<f64>, HierarchyError> {
        let node = self.node(id)?;
        if node.kind != NodeKind::Isotope {
            return Err(HierarchyError::NoTrace(node.kind));
        }
        if self.read_mode == ReadMode::Memory && !force_load {
            if let Some(mz) = self.cache.get(&node.levels).and_then(|t| t.mz.as_ref()) {
                return Ok(mz.clone());
            }
        }
        let (_, index) = self.column_index(node)?;
        let window = self.window_of(id)?;
        Ok(self.store_of(id)?.mz_column(index, window.to_range())?)
    }

    /// Stack the intensity traces of every child of `id`, restricted to `[start, end)`
    /// relative to the label group window.
    ///
    /// `id` must be a label group or a node below one so every child shares the same
    /// window. Files and the root yield [`HierarchyError::NoTrace`].
    pub fn child_intensity(
        &self,
        id: NodeId,
        start: usize,
        end: usize,
    ) -> Result<Vec<Vec<f64>>, HierarchyError> {
        let window = self.window_of(id)?;
        let node = self.node(id)?;
        if node.children.is_empty() {
            return Ok(Vec::new());
        }
        let bounds = LinearRange::new(start, end).clamp(window.len());
        if self.read_mode == ReadMode::Memory {
            return node
                .children
                .iter()
                .map(|c| {
                    let trace = self.intensity(*c, false)?;
                    Ok(trace[bounds.clamp(trace.len()).to_range()].to_vec())
                })
                .collect();
        }
        let mut column_kind = None;
        let mut indices = Vec::with_capacity(node.children.len());
        for c in node.children.iter() {
            let (kind, index) = self.column_index(&self.nodes[c.0])?;
            column_kind = Some(kind);
            indices.push(index);
        }
        match column_kind {
            Some(kind) => Ok(self.store_of(id)?.intensity_columns(
                kind,
                &indices,
                bounds.offset(window.start).to_range(),
            )?),
            None => Ok(Vec::new()),
        }
    }

    fn rebuild_levels(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current.0];
            let base = node
                .parent
                .map(|p| self.nodes[p.0].levels)
                .unwrap_or_default();
            let levels = base.with(node.kind, node.key);
            stack.extend(node.children.iter().copied());
            self.nodes[current.0].levels = levels;
        }
    }

    /// Move the subtree rooted at `id` below `new_parent`, which must be of the same
    /// kind as the current parent and belong to the same file.
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> Result<(), HierarchyError> {
        let node = self.node(id)?;
        let kind = node.kind;
        let key = node.key;
        let old_parent = node.parent.ok_or(HierarchyError::InvalidChild {
            parent: NodeKind::Root,
            child: kind,
        })?;
        let target = self.node(new_parent)?;
        if target.kind.child_kind() != Some(kind) {
            return Err(HierarchyError::InvalidChild {
                parent: target.kind,
                child: kind,
            });
        }
        if old_parent == new_parent {
            return Ok(());
        }
        if self.ancestor(old_parent, NodeKind::File) != self.ancestor(new_parent, NodeKind::File) {
            return Err(HierarchyError::CrossFileMove);
        }
        if target.index.contains_key(key) {
            return Err(HierarchyError::DuplicateKey {
                parent: target.levels,
                key,
            });
        }

        let mut moved = self.descendants(id);
        moved.push(id);
        for m in moved.iter() {
            self.cache.remove(&self.nodes[m.0].levels);
        }

        self.nodes[old_parent.0].children.retain(|c| *c != id);
        self.sort_children(old_parent);
        self.nodes[new_parent.0].children.push(id);
        self.sort_children(new_parent);
        self.nodes[id.0].parent = Some(new_parent);
        self.rebuild_levels(id);
        debug!(
            "Moved {kind} {key} to {}",
            self.nodes[new_parent.0].levels
        );
        Ok(())
    }

    /// Remove a file and everything below it, compacting the arena.
    ///
    /// All outstanding [`NodeId`]s are invalidated.
    pub fn remove_file(&mut self, key: impl Into<LevelKey>) -> Result<(), HierarchyError> {
        let key = key.into();
        let file = self
            .get_by_key(ROOT, key)
            .ok_or(HierarchyError::KeyNotFound {
                parent: Levels::default(),
                key,
            })?;
        let store_index = self.nodes[file.0]
            .attrs
            .as_file()
            .map(|a| a.store)
            .ok_or(HierarchyError::NoTrace(NodeKind::File))?;

        let mut order = vec![ROOT];
        order.extend(
            self.descendants(ROOT)
                .into_iter()
                .filter(|id| self.nodes[id.0].levels.file() != Some(key)),
        );
        let remap: HashMap<NodeId, NodeId> = order
            .iter()
            .enumerate()
            .map(|(i, old)| (*old, NodeId(i)))
            .collect();

        let mut nodes = Vec::with_capacity(order.len());
        for old in order {
            let mut node = self.nodes[old.0].clone();
            node.parent = node.parent.and_then(|p| remap.get(&p).copied());
            node.children = node
                .children
                .iter()
                .filter_map(|c| remap.get(c).copied())
                .collect();
            if let Some(attrs) = node.attrs.as_file_mut() {
                if attrs.store > store_index {
                    attrs.store -= 1;
                }
            }
            nodes.push(node);
        }
        self.nodes = nodes;
        self.stores.remove(store_index);
        self.cache.retain(|levels, _| levels.file() != Some(key));
        self.sort_children(ROOT);
        self.rebuild_levels(ROOT);
        debug!("Removed file {key}, {} nodes remain", self.nodes.len());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::store::MemoryArrayStore;

    /// One file with a 5 point window, two crosslinks (light and heavy) each with
    /// two charge states of three isotopes. Every isotope trace is
    /// `[0, 10, 20, 10, 0]` over retention times `[0, 1, 2, 3, 4]`.
    pub(crate) fn make_document(settings: QuantSettings) -> Document {
        let mut builder = DocumentBuilder::new(settings);
        let file = builder
            .add_file(
                1,
                FileAttrs::new("run1"),
                Box::new(MemoryArrayStore::new(vec![0.0, 1.0, 2.0, 3.0, 4.0])),
            )
            .unwrap();
        let group = builder
            .add_label_group(
                file,
                5,
                LabelGroupAttrs::new(LinearRange::new(0, 5), LinearRange::new(0, 5))
                    .with_labels(["light", "heavy"]),
            )
            .unwrap();
        for (state, key) in [(0usize, 0u32), (1, 1)] {
            let xl = builder
                .add_crosslink(
                    group,
                    key,
                    CrosslinkAttrs::new("PEPTIDEK-PEPKTIDE", state, 1500.0 + 12.0 * state as f64),
                )
                .unwrap();
            for z in [2, 3] {
                let charge = builder
                    .add_charge(xl, z as u32, ChargeAttrs::new(z, 751.0))
                    .unwrap();
                for (i, abundance) in [0.5, 0.3, 0.2].into_iter().enumerate() {
                    builder
                        .add_isotope(
                            charge,
                            i as u32,
                            IsotopeAttrs::new(751.0 + i as f64 / z as f64, abundance),
                            vec![0.0, 10.0, 20.0, 10.0, 0.0],
                            Some(vec![751.0 + i as f64 / z as f64; 5]),
                        )
                        .unwrap();
                }
            }
        }
        builder.finish().unwrap()
    }

    #[test]
    fn test_levels() {
        let levels = Levels::from_keys(&[1, 5, 0]);
        assert_eq!(levels.file(), Some(LevelKey(1)));
        assert_eq!(levels.get(NodeKind::Crosslink), Some(LevelKey(0)));
        assert_eq!(levels.charge(), None);
        assert_eq!(levels.to_string(), "(1, 5, 0)");
        assert_eq!("12".parse::<LevelKey>().unwrap(), LevelKey(12));
        assert!("a".parse::<LevelKey>().is_err());
    }

    #[test]
    fn test_structure() {
        let doc = make_document(QuantSettings::default());
        let file = doc.get_by_key(doc.root(), 1).unwrap();
        let group = doc.get_by_key(file, 5).unwrap();
        assert_eq!(doc.children(group).unwrap().len(), 2);
        assert_eq!(doc.iter_kind(NodeKind::Isotope).len(), 12);
        assert_eq!(doc.iter_kind(NodeKind::Charge).len(), 4);

        let isotope = doc.iter_kind(NodeKind::Isotope)[4];
        assert_eq!(doc[isotope].levels(), Levels::from_keys(&[1, 5, 0, 3, 1]));
        assert_eq!(doc.find(&doc[isotope].levels()), Some(isotope));
        assert_eq!(doc.ancestor(isotope, NodeKind::LabelGroup), Some(group));
        assert_eq!(doc.ancestor(group, NodeKind::Isotope), None);
        assert_eq!(doc.root_of(isotope), doc.root());

        // Every child's recorded position agrees with its key
        for id in doc.descendants(doc.root()) {
            let node = &doc[id];
            for (i, c) in node.children().iter().enumerate() {
                assert_eq!(node.index().position_of(doc[*c].key()), Some(i));
                assert_eq!(doc.get_key(id, i).unwrap(), doc[*c].key());
            }
        }
    }

    #[test]
    fn test_append_rules() {
        let mut doc = make_document(QuantSettings::default());
        let file = doc.get_by_key(doc.root(), 1).unwrap();
        let group = doc.get_by_key(file, 5).unwrap();
        let err = doc
            .append(group, NodeRecord::new(1, CrosslinkAttrs::new("X", 0, 10.0)))
            .unwrap_err();
        assert!(matches!(err, HierarchyError::DuplicateKey { .. }));

        let err = doc
            .append(group, NodeRecord::new(9, ChargeAttrs::new(2, 100.0)))
            .unwrap_err();
        assert!(matches!(err, HierarchyError::InvalidChild { .. }));

        let err = doc
            .append(doc.root(), NodeRecord::new(9, FileAttrs::new("x")))
            .unwrap_err();
        assert_eq!(err, HierarchyError::FileRequiresStore);

        // Out of order keys are sorted on insertion
        let added = doc
            .append(group, NodeRecord::new(0, CrosslinkAttrs::new("X", 0, 10.0)))
            .unwrap_err();
        assert!(matches!(added, HierarchyError::DuplicateKey { .. }));
        let a = doc
            .append(group, NodeRecord::new(7, CrosslinkAttrs::new("A", 0, 10.0)))
            .unwrap();
        let b = doc
            .append(group, NodeRecord::new(4, CrosslinkAttrs::new("B", 0, 10.0)))
            .unwrap();
        assert_eq!(doc.get_by_index(group, 2).unwrap(), b);
        assert_eq!(doc.get_by_index(group, 3).unwrap(), a);
        assert!(matches!(
            doc.get_by_index(group, 4),
            Err(HierarchyError::IndexOutOfRange { index: 4, len: 4 })
        ));
        assert!(doc.has_key(group, 4));
        assert!(!doc.has_index(group, 4));
        assert_eq!(doc.get_by_key(group, 99), None);
    }

    #[test]
    fn test_attributes() {
        let mut doc = make_document(QuantSettings::default());
        let xl = doc.iter_kind(NodeKind::Crosslink)[0];
        doc.set_checked(xl, false, true).unwrap();
        assert!(doc
            .descendants(xl)
            .into_iter()
            .all(|id| !doc[id].checked()));
        assert_eq!(doc.getattr(xl, "checked"), Some(AttrValue::Bool(false)));

        doc.setattr(xl, "dotp", 0.5, false).unwrap();
        assert_eq!(doc[xl].score("dotp"), 0.5);
        assert!(doc[xl].score("gaussian").is_nan());

        doc.setattr(xl, "score", 12.5, false).unwrap();
        assert_eq!(doc.getattr(xl, "score"), Some(AttrValue::Float(12.5)));

        assert!(matches!(
            doc.setattr(xl, "checked", 1.0, false),
            Err(HierarchyError::AttributeType { .. })
        ));
        assert!(matches!(
            doc.setattr(xl, "peptide", "X", false),
            Err(HierarchyError::ReadOnlyAttribute { .. })
        ));
    }

    #[test]
    fn test_traces() {
        let doc = make_document(QuantSettings::default());
        let isotope = doc.iter_kind(NodeKind::Isotope)[0];
        assert_eq!(
            doc.intensity(isotope, false).unwrap(),
            vec![0.0, 10.0, 20.0, 10.0, 0.0]
        );
        let charge = doc.iter_kind(NodeKind::Charge)[0];
        assert_eq!(
            doc.intensity(charge, false).unwrap(),
            vec![0.0, 30.0, 60.0, 30.0, 0.0]
        );
        let block = doc.child_intensity(charge, 1, 3).unwrap();
        assert_eq!(block, vec![vec![10.0, 20.0]; 3]);

        let file = doc.iter_kind(NodeKind::File)[0];
        assert_eq!(
            doc.intensity(file, false),
            Err(HierarchyError::NoTrace(NodeKind::File))
        );
        assert!(matches!(
            doc.mz(charge, false),
            Err(HierarchyError::NoTrace(NodeKind::Charge))
        ));
        assert_eq!(doc.retention_time(isotope).unwrap().len(), 5);
    }

    fn two_window_document(read_mode: ReadMode) -> Document {
        let mut builder = DocumentBuilder::new(QuantSettings::new(false, read_mode));
        let file = builder
            .add_file(
                1,
                FileAttrs::new("run1"),
                Box::new(MemoryArrayStore::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
            )
            .unwrap();
        for (key, window) in [(0u32, LinearRange::new(0, 5)), (1, LinearRange::new(5, 7))] {
            let group = builder
                .add_label_group(
                    file,
                    key,
                    LabelGroupAttrs::new(window, LinearRange::new(0, window.len())),
                )
                .unwrap();
            let xl = builder
                .add_crosslink(group, 0, CrosslinkAttrs::new("PEPTIDEK-PEPKTIDE", 0, 1500.0))
                .unwrap();
            let charge = builder.add_charge(xl, 2, ChargeAttrs::new(2, 751.0)).unwrap();
            builder
                .add_isotope(
                    charge,
                    0,
                    IsotopeAttrs::new(751.0, 1.0),
                    vec![1.0 + key as f64; 7],
                    None,
                )
                .unwrap();
        }
        builder.finish().unwrap()
    }

    #[test]
    fn test_child_intensity_windows() {
        for read_mode in [ReadMode::Memory, ReadMode::OnDemand] {
            let doc = two_window_document(read_mode);
            let file = doc.iter_kind(NodeKind::File)[0];
            assert_eq!(
                doc.child_intensity(file, 0, 5),
                Err(HierarchyError::NoTrace(NodeKind::File))
            );

            let groups = doc.children(file).unwrap().to_vec();
            let block = doc.child_intensity(groups[1], 0, 5).unwrap();
            assert_eq!(block, vec![vec![2.0, 2.0]], "{read_mode:?}");
            let block = doc.child_intensity(groups[0], 3, 9).unwrap();
            assert_eq!(block, vec![vec![1.0, 1.0]], "{read_mode:?}");
        }
    }

    #[test]
    fn test_reparent() {
        let mut doc = make_document(QuantSettings::default());
        let xls = doc.iter_kind(NodeKind::Crosslink);
        let charge = doc.get_by_key(xls[0], 3).unwrap();
        assert!(matches!(
            doc.reparent(charge, xls[1]),
            Err(HierarchyError::DuplicateKey { .. })
        ));

        let extra = doc
            .append(xls[0], NodeRecord::new(4, ChargeAttrs::new(4, 500.0)))
            .unwrap();
        doc.reparent(extra, xls[1]).unwrap();
        assert_eq!(doc[extra].levels(), Levels::from_keys(&[1, 5, 1, 4]));
        assert_eq!(doc.children(xls[0]).unwrap().len(), 2);
        assert_eq!(doc.children(xls[1]).unwrap().len(), 3);
    }

    #[test]
    fn test_remove_file() {
        let mut doc = make_document(QuantSettings::default());
        doc.add_file(
            0,
            FileAttrs::new("run0"),
            Box::new(MemoryArrayStore::new(vec![0.0; 3])),
        )
        .unwrap();
        let before = doc.len();
        doc.remove_file(1).unwrap();
        assert_eq!(doc.len(), 2);
        assert!(before > doc.len());
        let file = doc.get_by_index(doc.root(), 0).unwrap();
        assert_eq!(doc[file].key(), LevelKey(0));
        assert_eq!(doc[file].parent(), Some(doc.root()));
        assert!(matches!(
            doc.remove_file(1),
            Err(HierarchyError::KeyNotFound { .. })
        ));
    }
}
