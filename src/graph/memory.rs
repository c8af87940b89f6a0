//! In-memory scene graph backend.
//!
//! This is the reference implementation of `GraphBackend`: a stand-in
//! for the host application's node graph, faithful to the host quirks
//! the metadata layer depends on:
//!
//! - node ids are never reused, so `NodeId` is a stable identity key
//! - names are uniquified on clash, and `ns:leaf` names carry namespaces
//! - string attributes ignore their schema default (unset reads `""`)
//! - connecting onto an occupied single destination severs the old edge
//! - array plugs keep sparse logical indices
//! - deleting a node takes its child subtree and every touching edge
//!
//! Every mutation records its inverse into the open edit batch, giving
//! real undo/redo through the command pattern in [`super::undo`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::model::{
    AttrKind, AttributeSpec, Direction, NodeId, NodeInfo, PlugPath, PlugStep, Value,
};
use crate::{Error, Result};

use super::{
    AttrSnapshot, CallbackId, EditBatch, EditOp, GraphBackend, NodeCallback, NodeEvent,
    NodeSnapshot, UndoStack, MESSAGE_ATTRIBUTE,
};

const DEFAULT_UNDO_LIMIT: usize = 100;

// ============================================================================
// MemoryGraph
// ============================================================================

/// In-memory scene graph.
pub struct MemoryGraph {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: RwLock<GraphState>,
    callbacks: RwLock<CallbackTable>,
    next_node_id: AtomicU64,
    next_callback_id: AtomicU64,
}

struct GraphState {
    nodes: HashMap<NodeId, NodeRecord>,
    /// full name → node (backend keeps names globally unique)
    names: HashMap<String, NodeId>,
    /// (source, destination) plug pairs
    edges: Vec<(PlugPath, PlugPath)>,
    /// creation order, for deterministic scans
    order: Vec<NodeId>,
    undo: UndoStack,
    open: Option<EditBatch>,
    depth: usize,
}

struct NodeRecord {
    name: String,
    kind: String,
    uuid: Uuid,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    locked: bool,
    attrs: HashMap<String, AttrRecord>,
}

struct AttrRecord {
    spec: AttributeSpec,
    /// Logical indices in use (values or connections).
    elements: BTreeSet<u32>,
    /// Leaf values keyed by the full step walk.
    values: HashMap<SmallVec<[PlugStep; 2]>, Value>,
}

impl AttrRecord {
    fn new(spec: AttributeSpec) -> Self {
        Self { spec, elements: BTreeSet::new(), values: HashMap::new() }
    }
}

#[derive(Default)]
struct CallbackTable {
    entries: HashMap<u64, (NodeId, NodeEvent, NodeCallback)>,
    by_node: HashMap<NodeId, Vec<u64>>,
}

/// Deferred callback work collected under the lock, dispatched after it.
#[derive(Default)]
struct Effects {
    destroyed: Vec<NodeId>,
}

impl Effects {
    fn merge(&mut self, other: Effects) {
        self.destroyed.extend(other.destroyed);
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::with_undo_limit(DEFAULT_UNDO_LIMIT)
    }

    /// Cap the undo history at `limit` batches.
    pub fn with_undo_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: RwLock::new(GraphState {
                    nodes: HashMap::new(),
                    names: HashMap::new(),
                    edges: Vec::new(),
                    order: Vec::new(),
                    undo: UndoStack::new(limit),
                    open: None,
                    depth: 0,
                }),
                callbacks: RwLock::new(CallbackTable::default()),
                next_node_id: AtomicU64::new(1),
                next_callback_id: AtomicU64::new(1),
            }),
        }
    }

    /// Append inverse ops to the open batch, or commit them as a
    /// single-op batch when no edit scope is open.
    fn record(st: &mut GraphState, inverse: Vec<EditOp>) {
        if inverse.is_empty() {
            return;
        }
        match st.open.as_mut() {
            Some(batch) => batch.ops.extend(inverse),
            None => {
                let mut batch = EditBatch::new("edit");
                batch.ops = inverse;
                st.undo.commit(batch);
            }
        }
    }

    /// Invoke AboutToDelete callbacks for a subtree, outside the lock.
    fn dispatch_about_to_delete(&self, ids: &[NodeId]) {
        let cbs: Vec<(NodeId, NodeCallback)> = {
            let table = self.inner.callbacks.read();
            ids.iter()
                .flat_map(|id| table.collect(*id, NodeEvent::AboutToDelete))
                .collect()
        };
        for (node, cb) in cbs {
            cb(node);
        }
    }

    /// Invoke Destroyed callbacks and drop every registration for the
    /// destroyed nodes.
    fn dispatch_destroyed(&self, ids: &[NodeId]) {
        let cbs: Vec<(NodeId, NodeCallback)> = {
            let mut table = self.inner.callbacks.write();
            ids.iter().flat_map(|id| table.drain_node(*id)).collect()
        };
        for (node, cb) in cbs {
            cb(node);
        }
    }
}

impl CallbackTable {
    fn collect(&self, node: NodeId, event: NodeEvent) -> Vec<(NodeId, NodeCallback)> {
        let Some(ids) = self.by_node.get(&node) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|(_, ev, _)| *ev == event)
            .map(|(n, _, cb)| (*n, Arc::clone(cb)))
            .collect()
    }

    /// Remove all registrations for a node, returning its Destroyed
    /// callbacks for dispatch.
    fn drain_node(&mut self, node: NodeId) -> Vec<(NodeId, NodeCallback)> {
        let Some(ids) = self.by_node.remove(&node) else {
            return Vec::new();
        };
        let mut destroyed = Vec::new();
        for id in ids {
            if let Some((n, ev, cb)) = self.entries.remove(&id) {
                if ev == NodeEvent::Destroyed {
                    destroyed.push((n, cb));
                }
            }
        }
        destroyed
    }
}

// ============================================================================
// GraphState: raw mutation core shared by public ops and undo replay
// ============================================================================

impl GraphState {
    fn node(&self, id: NodeId) -> Result<&NodeRecord> {
        self.nodes.get(&id).ok_or_else(|| Error::NotFound(format!("node {id}")))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeRecord> {
        self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("node {id}")))
    }

    fn attr(&self, plug: &PlugPath) -> Result<&AttrRecord> {
        self.node(plug.node)?
            .attrs
            .get(&plug.attr)
            .ok_or_else(|| Error::NotFound(format!("attribute {}.{}", plug.node, plug.attr)))
    }

    fn attr_mut(&mut self, plug: &PlugPath) -> Result<&mut AttrRecord> {
        let node = plug.node;
        self.nodes
            .get_mut(&node)
            .and_then(|rec| rec.attrs.get_mut(&plug.attr))
            .ok_or_else(|| Error::NotFound(format!("attribute {}.{}", node, plug.attr)))
    }

    fn check_unlocked(&self, id: NodeId) -> Result<()> {
        let rec = self.node(id)?;
        if rec.locked {
            return Err(Error::Storage(format!("node '{}' is locked", rec.name)));
        }
        Ok(())
    }

    /// Pick a free name, bumping a trailing counter on clash.
    fn unique_name(&self, want: &str) -> String {
        if !self.names.contains_key(want) {
            return want.to_string();
        }
        let base = want.trim_end_matches(|c: char| c.is_ascii_digit());
        let mut n = want[base.len()..].parse::<u64>().unwrap_or(0) + 1;
        loop {
            let candidate = format!("{base}{n}");
            if !self.names.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn subtree_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            if let Some(rec) = self.nodes.get(&out[i]) {
                out.extend(rec.children.iter().copied());
            }
            i += 1;
        }
        out
    }

    /// Walk a plug's steps against its attribute schema down to the leaf
    /// spec. Rejects malformed walks (element on a non-array, child out
    /// of range, stopping on a compound).
    fn leaf_spec<'a>(spec: &'a AttributeSpec, plug: &PlugPath) -> Result<&'a AttributeSpec> {
        let mut cur = spec;
        let mut want_element = spec.multi;
        for step in &plug.steps {
            match step {
                PlugStep::Element(_) => {
                    if !want_element {
                        return Err(Error::Storage(format!("plug {plug} is not an array")));
                    }
                    want_element = false;
                }
                PlugStep::Child(i) => {
                    if want_element {
                        return Err(Error::Storage(format!("plug {plug} needs an element index")));
                    }
                    cur = cur.children.get(*i).ok_or_else(|| {
                        Error::Storage(format!("plug {plug} has no child {i}"))
                    })?;
                    want_element = cur.multi;
                }
            }
        }
        if want_element {
            return Err(Error::Storage(format!("plug {plug} is an array, not a leaf")));
        }
        if cur.kind == AttrKind::Compound {
            return Err(Error::Storage(format!("plug {plug} is a compound, not a leaf")));
        }
        Ok(cur)
    }

    fn raw_read(&self, plug: &PlugPath) -> Result<Value> {
        let attr = self.attr(plug)?;
        let leaf = Self::leaf_spec(&attr.spec, plug)?;
        if leaf.kind == AttrKind::Message {
            return Err(Error::Storage(format!("plug {plug} holds no value")));
        }
        if let Some(v) = attr.values.get(&plug.steps) {
            return Ok(v.clone());
        }
        // Host quirk: string schema defaults do not stick.
        if leaf.kind == AttrKind::String {
            return Ok(Value::String(String::new()));
        }
        Ok(leaf.default.clone().unwrap_or_else(|| leaf.kind.zero()))
    }

    /// Set or clear a stored leaf value. Returns the previous override.
    fn raw_write(&mut self, plug: &PlugPath, value: Option<Value>) -> Result<Option<Value>> {
        let attr = self.attr_mut(plug)?;
        let leaf = Self::leaf_spec(&attr.spec, plug)?;
        if let Some(v) = &value {
            if !leaf.kind.accepts(v) {
                return Err(Error::Storage(format!(
                    "plug {} expects {:?}, got {}",
                    plug,
                    leaf.kind,
                    v.type_name()
                )));
            }
        }
        if let Some(PlugStep::Element(i)) = plug.steps.first() {
            attr.elements.insert(*i);
        }
        let prev = match value {
            Some(v) => attr.values.insert(plug.steps.clone(), v),
            None => attr.values.remove(&plug.steps),
        };
        Ok(prev)
    }

    /// Remove one logical array element: values, element mark, and any
    /// connections through it. Returns what was removed, for inversion.
    #[allow(clippy::type_complexity)]
    fn raw_remove_element(
        &mut self,
        plug: &PlugPath,
        index: u32,
    ) -> Result<(Vec<(SmallVec<[PlugStep; 2]>, Value)>, Vec<(PlugPath, PlugPath)>)> {
        let attr = self.attr_mut(plug)?;
        if !plug.is_root() || !attr.spec.multi {
            return Err(Error::Storage(format!("plug {plug} is not an array root")));
        }
        attr.elements.remove(&index);
        let mut removed_values = Vec::new();
        attr.values.retain(|steps, value| {
            if steps.first() == Some(&PlugStep::Element(index)) {
                removed_values.push((steps.clone(), value.clone()));
                false
            } else {
                true
            }
        });
        let element = plug.element(index);
        let mut removed_edges = Vec::new();
        self.edges.retain(|(src, dst)| {
            if element.contains(src) || element.contains(dst) {
                removed_edges.push((src.clone(), dst.clone()));
                false
            } else {
                true
            }
        });
        Ok((removed_values, removed_edges))
    }

    /// Connect src → dst, severing a previous driver of dst. A duplicate
    /// of an existing edge is a no-op. Returns the severed edge, if any.
    fn raw_connect(
        &mut self,
        src: &PlugPath,
        dst: &PlugPath,
    ) -> Result<Option<(PlugPath, PlugPath)>> {
        {
            let src_attr = self.attr(src)?;
            Self::leaf_spec(&src_attr.spec, src)?;
            if !src_attr.spec.readable {
                return Err(Error::Storage(format!("plug {src} is not readable")));
            }
        }
        {
            let dst_attr = self.attr(dst)?;
            Self::leaf_spec(&dst_attr.spec, dst)?;
            if !dst_attr.spec.writable {
                return Err(Error::Storage(format!("plug {dst} is not writable")));
            }
        }
        if self.edges.iter().any(|(s, d)| s == src && d == dst) {
            return Ok(None);
        }
        // Single-owner rule: a destination holds at most one incoming edge.
        let severed = self
            .edges
            .iter()
            .position(|(_, d)| d == dst)
            .map(|i| self.edges.remove(i));
        if let Some(PlugStep::Element(i)) = src.steps.first() {
            self.attr_mut(src)?.elements.insert(*i);
        }
        if let Some(PlugStep::Element(i)) = dst.steps.first() {
            self.attr_mut(dst)?.elements.insert(*i);
        }
        self.edges.push((src.clone(), dst.clone()));
        Ok(severed)
    }

    fn raw_disconnect(&mut self, src: &PlugPath, dst: &PlugPath) -> Result<()> {
        match self.edges.iter().position(|(s, d)| s == src && d == dst) {
            Some(i) => {
                self.edges.remove(i);
                Ok(())
            }
            None => Err(Error::Storage(format!("{src} is not connected to {dst}"))),
        }
    }

    fn raw_add_attribute(&mut self, node: NodeId, spec: &AttributeSpec) -> Result<()> {
        if spec.kind == AttrKind::Compound && spec.children.is_empty() {
            return Err(Error::Storage(format!("compound attribute '{}' has no children", spec.name)));
        }
        if spec.children.iter().any(|c| c.kind == AttrKind::Compound) {
            return Err(Error::Storage(format!("attribute '{}' nests compounds", spec.name)));
        }
        let rec = self.node_mut(node)?;
        if rec.attrs.contains_key(&spec.name) {
            return Err(Error::Storage(format!(
                "node '{}' already has attribute '{}'",
                rec.name, spec.name
            )));
        }
        rec.attrs.insert(spec.name.clone(), AttrRecord::new(spec.clone()));
        Ok(())
    }

    /// Remove an attribute with its values and edges, returning both for
    /// inversion.
    fn raw_remove_attribute(
        &mut self,
        node: NodeId,
        attr: &str,
    ) -> Result<(AttrSnapshot, Vec<(PlugPath, PlugPath)>)> {
        if attr == MESSAGE_ATTRIBUTE {
            return Err(Error::Storage("the message attribute is built in".into()));
        }
        let rec = self.node_mut(node)?;
        let record = rec
            .attrs
            .remove(attr)
            .ok_or_else(|| Error::NotFound(format!("attribute {node}.{attr}")))?;
        let root = PlugPath::root(node, attr);
        let mut removed_edges = Vec::new();
        self.edges.retain(|(src, dst)| {
            if root.contains(src) || root.contains(dst) {
                removed_edges.push((src.clone(), dst.clone()));
                false
            } else {
                true
            }
        });
        let snapshot = AttrSnapshot {
            spec: record.spec,
            elements: record.elements.into_iter().collect(),
            values: record.values.into_iter().collect(),
        };
        Ok((snapshot, removed_edges))
    }

    fn raw_rename(&mut self, id: NodeId, name: &str) -> Result<(String, String)> {
        let prev = self.node(id)?.name.clone();
        if prev == name {
            return Ok((prev.clone(), prev));
        }
        let unique = self.unique_name(name);
        self.names.remove(&prev);
        self.names.insert(unique.clone(), id);
        self.node_mut(id)?.name = unique.clone();
        Ok((prev, unique))
    }

    fn snapshot(&self, id: NodeId) -> Result<NodeSnapshot> {
        let rec = self.node(id)?;
        let root_plug_holder = |p: &PlugPath| p.node == id;
        Ok(NodeSnapshot {
            info: NodeInfo {
                id,
                name: rec.name.clone(),
                kind: rec.kind.clone(),
                uuid: rec.uuid,
                parent: rec.parent,
                locked: rec.locked,
            },
            attrs: rec
                .attrs
                .values()
                .map(|a| AttrSnapshot {
                    spec: a.spec.clone(),
                    elements: a.elements.iter().copied().collect(),
                    values: a.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .filter(|(s, d)| root_plug_holder(s) || root_plug_holder(d))
                .cloned()
                .collect(),
            children: rec
                .children
                .iter()
                .map(|c| self.snapshot(*c))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Delete a subtree and every edge touching it. Returns destroyed ids.
    fn raw_delete(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let ids = self.subtree_ids(id);
        if let Some(parent) = self.node(id)?.parent {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|c| *c != id);
            }
        }
        for nid in &ids {
            if let Some(rec) = self.nodes.remove(nid) {
                self.names.remove(&rec.name);
            }
        }
        self.order.retain(|n| !ids.contains(n));
        self.edges.retain(|(s, d)| !ids.contains(&s.node) && !ids.contains(&d.node));
        Ok(ids)
    }

    /// Rebuild a node subtree from a snapshot (undo of a delete). Names
    /// are re-uniquified in case another node claimed one since.
    fn raw_restore(&mut self, snap: &NodeSnapshot) {
        let name = self.unique_name(&snap.info.name);
        let parent = snap.info.parent.filter(|p| self.nodes.contains_key(p));
        let mut rec = NodeRecord {
            name: name.clone(),
            kind: snap.info.kind.clone(),
            uuid: snap.info.uuid,
            parent,
            children: Vec::new(),
            locked: snap.info.locked,
            attrs: HashMap::new(),
        };
        for attr in &snap.attrs {
            let mut record = AttrRecord::new(attr.spec.clone());
            record.elements = attr.elements.iter().copied().collect();
            record.values = attr.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            rec.attrs.insert(attr.spec.name.clone(), record);
        }
        self.names.insert(name, snap.info.id);
        self.order.push(snap.info.id);
        if let Some(p) = parent {
            if let Some(prec) = self.nodes.get_mut(&p) {
                prec.children.push(snap.info.id);
            }
        }
        self.nodes.insert(snap.info.id, rec);
        for child in &snap.children {
            self.raw_restore(child);
        }
        for (src, dst) in &snap.edges {
            if self.attr(src).is_ok() && self.attr(dst).is_ok() {
                let _ = self.raw_connect(src, dst);
            }
        }
    }

    /// Apply one op, returning the ops that undo it. Inverses come back
    /// in forward-matching order; batches are applied reversed.
    fn apply_op(&mut self, op: EditOp) -> Result<(Vec<EditOp>, Effects)> {
        let mut effects = Effects::default();
        let inverse = match op {
            EditOp::CreateNode { snapshot } => {
                let id = snapshot.info.id;
                self.raw_restore(&snapshot);
                vec![EditOp::DeleteNode { id }]
            }
            EditOp::DeleteNode { id } => {
                let snapshot = self.snapshot(id)?;
                effects.destroyed = self.raw_delete(id)?;
                vec![EditOp::CreateNode { snapshot }]
            }
            EditOp::Rename { id, name } => {
                let (prev, _) = self.raw_rename(id, &name)?;
                vec![EditOp::Rename { id, name: prev }]
            }
            EditOp::SetLocked { id, locked } => {
                let rec = self.node_mut(id)?;
                let prev = rec.locked;
                rec.locked = locked;
                vec![EditOp::SetLocked { id, locked: prev }]
            }
            EditOp::AddAttribute { node, spec } => {
                self.raw_add_attribute(node, &spec)?;
                vec![EditOp::RemoveAttribute { node, attr: spec.name }]
            }
            EditOp::RemoveAttribute { node, attr } => {
                let (snap, edges) = self.raw_remove_attribute(node, &attr)?;
                let mut inv = Vec::with_capacity(snap.values.len() + edges.len() + 1);
                for (steps, value) in &snap.values {
                    inv.push(EditOp::Write {
                        plug: PlugPath { node, attr: attr.clone(), steps: steps.clone() },
                        value: Some(value.clone()),
                    });
                }
                for (src, dst) in edges {
                    inv.push(EditOp::Connect { src, dst });
                }
                inv.push(EditOp::AddAttribute { node, spec: snap.spec });
                inv
            }
            EditOp::Write { plug, value } => {
                let prev = self.raw_write(&plug, value)?;
                vec![EditOp::Write { plug, value: prev }]
            }
            EditOp::RemoveElement { plug, index } => {
                let (values, edges) = self.raw_remove_element(&plug, index)?;
                let mut inv = Vec::with_capacity(values.len() + edges.len());
                for (steps, value) in values {
                    inv.push(EditOp::Write {
                        plug: PlugPath { node: plug.node, attr: plug.attr.clone(), steps },
                        value: Some(value),
                    });
                }
                for (src, dst) in edges {
                    inv.push(EditOp::Connect { src, dst });
                }
                inv
            }
            EditOp::Connect { src, dst } => {
                let severed = self.raw_connect(&src, &dst)?;
                let mut inv = Vec::with_capacity(2);
                if let Some((old_src, old_dst)) = severed {
                    inv.push(EditOp::Connect { src: old_src, dst: old_dst });
                }
                inv.push(EditOp::Disconnect { src, dst });
                inv
            }
            EditOp::Disconnect { src, dst } => {
                self.raw_disconnect(&src, &dst)?;
                vec![EditOp::Connect { src, dst }]
            }
        };
        Ok((inverse, effects))
    }
}

// ============================================================================
// GraphBackend impl
// ============================================================================

impl GraphBackend for MemoryGraph {
    fn create_node(&self, kind: &str, name: Option<&str>, parent: Option<NodeId>) -> Result<NodeId> {
        let mut st = self.inner.state.write();
        if let Some(p) = parent {
            st.node(p)?;
        }
        let id = NodeId(self.inner.next_node_id.fetch_add(1, Ordering::Relaxed));
        let want = match name {
            Some(n) => n.to_string(),
            None => format!("{kind}{}", id.0),
        };
        let unique = st.unique_name(&want);

        let mut rec = NodeRecord {
            name: unique.clone(),
            kind: kind.to_string(),
            uuid: Uuid::new_v4(),
            parent,
            children: Vec::new(),
            locked: false,
            attrs: HashMap::new(),
        };
        for spec in builtin_attributes(kind) {
            rec.attrs.insert(spec.name.clone(), AttrRecord::new(spec));
        }

        st.names.insert(unique, id);
        st.order.push(id);
        if let Some(p) = parent {
            st.node_mut(p)?.children.push(id);
        }
        st.nodes.insert(id, rec);
        MemoryGraph::record(&mut st, vec![EditOp::DeleteNode { id }]);
        Ok(id)
    }

    fn delete_node(&self, id: NodeId) -> Result<()> {
        let subtree = {
            let st = self.inner.state.read();
            let ids = st.subtree_ids(id);
            st.node(id)?;
            for nid in &ids {
                st.check_unlocked(*nid)?;
            }
            ids
        };
        self.dispatch_about_to_delete(&subtree);

        let effects = {
            let mut st = self.inner.state.write();
            if !st.nodes.contains_key(&id) {
                // a callback re-entered and deleted it already
                return Ok(());
            }
            let (inverse, effects) = st.apply_op(EditOp::DeleteNode { id })?;
            MemoryGraph::record(&mut st, inverse);
            effects
        };
        self.dispatch_destroyed(&effects.destroyed);
        Ok(())
    }

    fn node_exists(&self, id: NodeId) -> bool {
        self.inner.state.read().nodes.contains_key(&id)
    }

    fn node_info(&self, id: NodeId) -> Result<NodeInfo> {
        let st = self.inner.state.read();
        let rec = st.node(id)?;
        Ok(NodeInfo {
            id,
            name: rec.name.clone(),
            kind: rec.kind.clone(),
            uuid: rec.uuid,
            parent: rec.parent,
            locked: rec.locked,
        })
    }

    fn rename_node(&self, id: NodeId, name: &str) -> Result<String> {
        let mut st = self.inner.state.write();
        st.check_unlocked(id)?;
        let (prev, actual) = st.raw_rename(id, name)?;
        if prev != actual {
            MemoryGraph::record(&mut st, vec![EditOp::Rename { id, name: prev }]);
        }
        Ok(actual)
    }

    fn set_locked(&self, id: NodeId, locked: bool) -> Result<()> {
        let mut st = self.inner.state.write();
        let (inverse, _) = st.apply_op(EditOp::SetLocked { id, locked })?;
        MemoryGraph::record(&mut st, inverse);
        Ok(())
    }

    fn find_node(&self, name: &str) -> Result<Option<NodeId>> {
        let st = self.inner.state.read();
        if let Some(path) = name.strip_prefix('|') {
            let mut current: Option<NodeId> = None;
            for segment in path.split('|') {
                let next = match current {
                    None => st
                        .nodes
                        .iter()
                        .find(|(_, r)| r.parent.is_none() && r.name == segment)
                        .map(|(id, _)| *id),
                    Some(parent) => st.node(parent)?.children.iter().copied().find(|c| {
                        st.nodes.get(c).map(|r| r.name == segment).unwrap_or(false)
                    }),
                };
                match next {
                    Some(id) => current = Some(id),
                    None => return Ok(None),
                }
            }
            return Ok(current);
        }
        Ok(st.names.get(name).copied())
    }

    fn all_nodes(&self) -> Vec<NodeId> {
        self.inner.state.read().order.clone()
    }

    fn add_attribute(&self, node: NodeId, spec: &AttributeSpec) -> Result<()> {
        let mut st = self.inner.state.write();
        st.check_unlocked(node)?;
        let (inverse, _) = st.apply_op(EditOp::AddAttribute { node, spec: spec.clone() })?;
        MemoryGraph::record(&mut st, inverse);
        Ok(())
    }

    fn remove_attribute(&self, node: NodeId, attr: &str) -> Result<()> {
        let mut st = self.inner.state.write();
        st.check_unlocked(node)?;
        let (inverse, _) =
            st.apply_op(EditOp::RemoveAttribute { node, attr: attr.to_string() })?;
        MemoryGraph::record(&mut st, inverse);
        Ok(())
    }

    fn has_attribute(&self, node: NodeId, attr: &str) -> bool {
        self.inner
            .state
            .read()
            .nodes
            .get(&node)
            .map(|r| r.attrs.contains_key(attr))
            .unwrap_or(false)
    }

    fn attribute_spec(&self, node: NodeId, attr: &str) -> Result<AttributeSpec> {
        let st = self.inner.state.read();
        Ok(st.attr(&PlugPath::root(node, attr))?.spec.clone())
    }

    fn read(&self, plug: &PlugPath) -> Result<Value> {
        self.inner.state.read().raw_read(plug)
    }

    fn write(&self, plug: &PlugPath, value: Value) -> Result<()> {
        let mut st = self.inner.state.write();
        st.check_unlocked(plug.node)?;
        let (inverse, _) =
            st.apply_op(EditOp::Write { plug: plug.clone(), value: Some(value) })?;
        MemoryGraph::record(&mut st, inverse);
        Ok(())
    }

    fn element_indices(&self, plug: &PlugPath) -> Result<Vec<u32>> {
        let st = self.inner.state.read();
        let attr = st.attr(plug)?;
        if !plug.is_root() || !attr.spec.multi {
            return Err(Error::Storage(format!("plug {plug} is not an array root")));
        }
        Ok(attr.elements.iter().copied().collect())
    }

    fn remove_element(&self, plug: &PlugPath, index: u32) -> Result<()> {
        let mut st = self.inner.state.write();
        st.check_unlocked(plug.node)?;
        let (inverse, _) =
            st.apply_op(EditOp::RemoveElement { plug: plug.clone(), index })?;
        MemoryGraph::record(&mut st, inverse);
        Ok(())
    }

    fn connect(&self, src: &PlugPath, dst: &PlugPath) -> Result<()> {
        let mut st = self.inner.state.write();
        let (inverse, _) =
            st.apply_op(EditOp::Connect { src: src.clone(), dst: dst.clone() })?;
        MemoryGraph::record(&mut st, inverse);
        Ok(())
    }

    fn disconnect(&self, src: &PlugPath, dst: &PlugPath) -> Result<()> {
        let mut st = self.inner.state.write();
        let (inverse, _) =
            st.apply_op(EditOp::Disconnect { src: src.clone(), dst: dst.clone() })?;
        MemoryGraph::record(&mut st, inverse);
        Ok(())
    }

    fn connections(&self, plug: &PlugPath, direction: Direction) -> Result<Vec<PlugPath>> {
        let st = self.inner.state.read();
        st.attr(plug)?;
        let mut out = Vec::new();
        for (src, dst) in &st.edges {
            match direction {
                Direction::Outgoing if src == plug => out.push(dst.clone()),
                Direction::Incoming if dst == plug => out.push(src.clone()),
                Direction::Both if src == plug => out.push(dst.clone()),
                Direction::Both if dst == plug => out.push(src.clone()),
                _ => {}
            }
        }
        Ok(out)
    }

    fn begin_edit(&self, label: &str) {
        let mut st = self.inner.state.write();
        st.depth += 1;
        if st.open.is_none() {
            st.open = Some(EditBatch::new(label));
        }
    }

    fn commit_edit(&self) -> Result<()> {
        let mut st = self.inner.state.write();
        if st.depth == 0 {
            return Err(Error::Storage("no open edit scope".into()));
        }
        st.depth -= 1;
        if st.depth == 0 {
            if let Some(batch) = st.open.take() {
                st.undo.commit(batch);
            }
        }
        Ok(())
    }

    fn undo(&self) -> Result<bool> {
        let effects = {
            let mut st = self.inner.state.write();
            if st.open.is_some() {
                return Err(Error::Storage("cannot undo inside an open edit scope".into()));
            }
            let Some(batch) = st.undo.pop_undo() else {
                return Ok(false);
            };
            let mut redo_ops = Vec::with_capacity(batch.ops.len());
            let mut effects = Effects::default();
            for op in batch.ops.into_iter().rev() {
                let (inv, eff) = st.apply_op(op)?;
                redo_ops.extend(inv);
                effects.merge(eff);
            }
            let mut redo = EditBatch::new(batch.label);
            redo.ops = redo_ops;
            st.undo.stash_redo(redo);
            effects
        };
        self.dispatch_destroyed(&effects.destroyed);
        Ok(true)
    }

    fn redo(&self) -> Result<bool> {
        let effects = {
            let mut st = self.inner.state.write();
            if st.open.is_some() {
                return Err(Error::Storage("cannot redo inside an open edit scope".into()));
            }
            let Some(batch) = st.undo.pop_redo() else {
                return Ok(false);
            };
            let mut undo_ops = Vec::with_capacity(batch.ops.len());
            let mut effects = Effects::default();
            for op in batch.ops.into_iter().rev() {
                let (inv, eff) = st.apply_op(op)?;
                undo_ops.extend(inv);
                effects.merge(eff);
            }
            let mut undone = EditBatch::new(batch.label);
            undone.ops = undo_ops;
            st.undo.stash_undo(undone);
            effects
        };
        self.dispatch_destroyed(&effects.destroyed);
        Ok(true)
    }

    fn on_node_event(&self, node: NodeId, event: NodeEvent, callback: NodeCallback) -> CallbackId {
        let id = self.inner.next_callback_id.fetch_add(1, Ordering::Relaxed);
        let mut table = self.inner.callbacks.write();
        table.entries.insert(id, (node, event, callback));
        table.by_node.entry(node).or_default().push(id);
        CallbackId(id)
    }

    fn remove_callback(&self, id: CallbackId) {
        let mut table = self.inner.callbacks.write();
        if let Some((node, _, _)) = table.entries.remove(&id.0) {
            if let Some(ids) = table.by_node.get_mut(&node) {
                ids.retain(|i| *i != id.0);
            }
        }
    }
}

/// Attributes every node of a given kind is born with. Mirrors the host,
/// where node kinds define attribute templates.
fn builtin_attributes(kind: &str) -> Vec<AttributeSpec> {
    let mut message = AttributeSpec::new(MESSAGE_ATTRIBUTE, AttrKind::Message);
    message.writable = false;
    message.hidden = true;
    let mut out = vec![message];
    if kind == "nurbsCurve" {
        let mut create = AttributeSpec::new("create", AttrKind::Curve);
        create.readable = false;
        let mut local = AttributeSpec::new("local", AttrKind::Curve);
        local.writable = false;
        out.push(create);
        out.push(local);
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn int_attr(name: &str) -> AttributeSpec {
        AttributeSpec::new(name, AttrKind::Int)
    }

    #[test]
    fn test_create_and_info() {
        let g = MemoryGraph::new();
        let id = g.create_node("network", Some("ctl"), None).unwrap();
        let info = g.node_info(id).unwrap();
        assert_eq!(info.name, "ctl");
        assert_eq!(info.kind, "network");
        assert!(g.has_attribute(id, MESSAGE_ATTRIBUTE));
    }

    #[test]
    fn test_name_uniquified() {
        let g = MemoryGraph::new();
        g.create_node("network", Some("ctl"), None).unwrap();
        let b = g.create_node("network", Some("ctl"), None).unwrap();
        assert_eq!(g.node_info(b).unwrap().name, "ctl1");
    }

    #[test]
    fn test_write_read_default() {
        let g = MemoryGraph::new();
        let id = g.create_node("network", None, None).unwrap();
        g.add_attribute(id, &int_attr("count").with_default(Value::Int(7))).unwrap();

        let plug = PlugPath::root(id, "count");
        assert_eq!(g.read(&plug).unwrap(), Value::Int(7));
        g.write(&plug, Value::Int(3)).unwrap();
        assert_eq!(g.read(&plug).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_string_default_does_not_stick() {
        let g = MemoryGraph::new();
        let id = g.create_node("network", None, None).unwrap();
        g.add_attribute(
            id,
            &AttributeSpec::new("label", AttrKind::String).with_default(Value::String("x".into())),
        )
        .unwrap();
        assert_eq!(
            g.read(&PlugPath::root(id, "label")).unwrap(),
            Value::String(String::new())
        );
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let g = MemoryGraph::new();
        let id = g.create_node("network", None, None).unwrap();
        g.add_attribute(id, &int_attr("count")).unwrap();
        let err = g.write(&PlugPath::root(id, "count"), Value::Float(1.0));
        assert!(err.is_err());
    }

    #[test]
    fn test_sparse_elements() {
        let g = MemoryGraph::new();
        let id = g.create_node("network", None, None).unwrap();
        g.add_attribute(id, &int_attr("values").multi()).unwrap();

        let root = PlugPath::root(id, "values");
        g.write(&root.element(7), Value::Int(70)).unwrap();
        g.write(&root.element(2), Value::Int(20)).unwrap();
        assert_eq!(g.element_indices(&root).unwrap(), vec![2, 7]);
        assert_eq!(g.next_element_index(&root).unwrap(), 8);

        g.remove_element(&root, 7).unwrap();
        assert_eq!(g.element_indices(&root).unwrap(), vec![2]);
    }

    #[test]
    fn test_connect_severs_occupied_destination() {
        let g = MemoryGraph::new();
        let a = g.create_node("network", Some("a"), None).unwrap();
        let b = g.create_node("network", Some("b"), None).unwrap();
        let c = g.create_node("network", Some("c"), None).unwrap();
        for id in [a, b, c] {
            g.add_attribute(id, &int_attr("out")).unwrap();
            g.add_attribute(id, &int_attr("in")).unwrap();
        }

        let dst = PlugPath::root(c, "in");
        g.connect(&PlugPath::root(a, "out"), &dst).unwrap();
        g.connect(&PlugPath::root(b, "out"), &dst).unwrap();

        let sources = g.connections(&dst, Direction::Incoming).unwrap();
        assert_eq!(sources, vec![PlugPath::root(b, "out")]);
        assert!(g.connections(&PlugPath::root(a, "out"), Direction::Outgoing).unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_edges_and_fires_callbacks() {
        let g = MemoryGraph::new();
        let a = g.create_node("network", Some("a"), None).unwrap();
        let b = g.create_node("network", Some("b"), None).unwrap();
        g.add_attribute(a, &int_attr("out")).unwrap();
        g.add_attribute(b, &int_attr("in")).unwrap();
        g.connect(&PlugPath::root(a, "out"), &PlugPath::root(b, "in")).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        g.on_node_event(
            a,
            NodeEvent::Destroyed,
            Arc::new(move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        g.delete_node(a).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(g.connections(&PlugPath::root(b, "in"), Direction::Incoming).unwrap().is_empty());
    }

    #[test]
    fn test_delete_takes_subtree() {
        let g = MemoryGraph::new();
        let root = g.create_node("transform", Some("root"), None).unwrap();
        let child = g.create_node("transform", Some("child"), Some(root)).unwrap();
        g.delete_node(root).unwrap();
        assert!(!g.node_exists(child));
    }

    #[test]
    fn test_locked_node_refuses_edits() {
        let g = MemoryGraph::new();
        let id = g.create_node("network", None, None).unwrap();
        g.add_attribute(id, &int_attr("count")).unwrap();
        g.set_locked(id, true).unwrap();

        assert!(g.write(&PlugPath::root(id, "count"), Value::Int(1)).is_err());
        assert!(g.delete_node(id).is_err());
        g.set_locked(id, false).unwrap();
        assert!(g.delete_node(id).is_ok());
    }

    #[test]
    fn test_undo_redo_write() {
        let g = MemoryGraph::new();
        let id = g.create_node("network", None, None).unwrap();
        g.add_attribute(id, &int_attr("count").with_default(Value::Int(0))).unwrap();
        let plug = PlugPath::root(id, "count");

        g.begin_edit("set count");
        g.write(&plug, Value::Int(5)).unwrap();
        g.commit_edit().unwrap();

        assert!(g.undo().unwrap());
        assert_eq!(g.read(&plug).unwrap(), Value::Int(0));
        assert!(g.redo().unwrap());
        assert_eq!(g.read(&plug).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_undo_delete_restores_values_and_edges() {
        let g = MemoryGraph::new();
        let a = g.create_node("network", Some("a"), None).unwrap();
        let b = g.create_node("network", Some("b"), None).unwrap();
        g.add_attribute(a, &int_attr("out")).unwrap();
        g.add_attribute(b, &int_attr("in")).unwrap();
        g.write(&PlugPath::root(a, "out"), Value::Int(9)).unwrap();
        g.connect(&PlugPath::root(a, "out"), &PlugPath::root(b, "in")).unwrap();

        g.begin_edit("delete a");
        g.delete_node(a).unwrap();
        g.commit_edit().unwrap();
        assert!(!g.node_exists(a));

        assert!(g.undo().unwrap());
        assert!(g.node_exists(a));
        assert_eq!(g.read(&PlugPath::root(a, "out")).unwrap(), Value::Int(9));
        assert_eq!(
            g.connections(&PlugPath::root(b, "in"), Direction::Incoming).unwrap(),
            vec![PlugPath::root(a, "out")]
        );
    }

    #[test]
    fn test_scope_groups_ops_into_one_batch() {
        let g = MemoryGraph::new();
        let id = g.create_node("network", None, None).unwrap();
        g.add_attribute(id, &int_attr("x")).unwrap();
        g.add_attribute(id, &int_attr("y")).unwrap();

        g.begin_edit("both");
        g.write(&PlugPath::root(id, "x"), Value::Int(1)).unwrap();
        g.write(&PlugPath::root(id, "y"), Value::Int(2)).unwrap();
        g.commit_edit().unwrap();

        assert!(g.undo().unwrap());
        assert_eq!(g.read(&PlugPath::root(id, "x")).unwrap(), Value::Int(0));
        assert_eq!(g.read(&PlugPath::root(id, "y")).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_find_node_by_path() {
        let g = MemoryGraph::new();
        let root = g.create_node("transform", Some("rig"), None).unwrap();
        let child = g.create_node("transform", Some("spine"), Some(root)).unwrap();
        assert_eq!(g.find_node("|rig|spine").unwrap(), Some(child));
        assert_eq!(g.find_node("spine").unwrap(), Some(child));
        assert_eq!(g.find_node("|rig|arm").unwrap(), None);
    }

    #[test]
    fn test_compound_children() {
        let g = MemoryGraph::new();
        let id = g.create_node("network", None, None).unwrap();
        let spec = AttributeSpec::new("offset", AttrKind::Compound).with_children(vec![
            AttributeSpec::new("offsetX", AttrKind::Float),
            AttributeSpec::new("offsetY", AttrKind::Float),
        ]);
        g.add_attribute(id, &spec).unwrap();

        let root = PlugPath::root(id, "offset");
        g.write(&root.child(0), Value::Float(1.5)).unwrap();
        assert_eq!(g.read(&root.child(0)).unwrap(), Value::Float(1.5));
        assert_eq!(g.read(&root.child(1)).unwrap(), Value::Float(0.0));
        assert!(g.read(&root).is_err());
        assert!(g.write(&root.child(2), Value::Float(0.0)).is_err());
    }
}
