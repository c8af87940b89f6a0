//! Edit batches and the undo stack.
//!
//! Every mutation the backend performs is captured as an [`EditOp`], a
//! directly applicable command. While an edit scope is open, the inverse
//! of each applied op is collected into the scope's batch; committing the
//! scope pushes the batch onto the undo stack. Undoing applies a batch's
//! ops in reverse, capturing their inverses for the redo stack.

use smallvec::SmallVec;

use crate::model::{AttributeSpec, NodeId, NodeInfo, PlugPath, PlugStep, Value};
use crate::Result;

use super::GraphBackend;

// ============================================================================
// EditOp
// ============================================================================

/// One applicable graph mutation.
///
/// `Write { value: None }` clears the stored override so the plug reverts
/// to its schema default.
#[derive(Debug, Clone)]
pub enum EditOp {
    CreateNode { snapshot: NodeSnapshot },
    DeleteNode { id: NodeId },
    Rename { id: NodeId, name: String },
    SetLocked { id: NodeId, locked: bool },
    AddAttribute { node: NodeId, spec: AttributeSpec },
    RemoveAttribute { node: NodeId, attr: String },
    Write { plug: PlugPath, value: Option<Value> },
    RemoveElement { plug: PlugPath, index: u32 },
    Connect { src: PlugPath, dst: PlugPath },
    Disconnect { src: PlugPath, dst: PlugPath },
}

/// Full state of one node, enough to rebuild it after a delete.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub info: NodeInfo,
    pub attrs: Vec<AttrSnapshot>,
    /// Every edge touching this node, as (src, dst) plug pairs.
    pub edges: Vec<(PlugPath, PlugPath)>,
    /// Child nodes deleted along with this one.
    pub children: Vec<NodeSnapshot>,
}

/// One attribute's schema plus all stored plug values.
#[derive(Debug, Clone)]
pub struct AttrSnapshot {
    pub spec: AttributeSpec,
    pub elements: Vec<u32>,
    pub values: Vec<(SmallVec<[PlugStep; 2]>, Value)>,
}

// ============================================================================
// EditBatch / UndoStack
// ============================================================================

/// The ops that undo one committed edit scope, in capture order.
/// Applying them in reverse restores the pre-scope state.
#[derive(Debug, Default)]
pub struct EditBatch {
    pub label: String,
    pub ops: Vec<EditOp>,
}

impl EditBatch {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), ops: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Bounded undo/redo history.
#[derive(Debug)]
pub struct UndoStack {
    undo: Vec<EditBatch>,
    redo: Vec<EditBatch>,
    limit: usize,
}

impl UndoStack {
    pub fn new(limit: usize) -> Self {
        Self { undo: Vec::new(), redo: Vec::new(), limit }
    }

    /// Record a freshly committed batch. Any redo history is invalidated.
    pub fn commit(&mut self, batch: EditBatch) {
        if batch.is_empty() {
            return;
        }
        self.redo.clear();
        self.undo.push(batch);
        if self.undo.len() > self.limit {
            let excess = self.undo.len() - self.limit;
            self.undo.drain(..excess);
        }
    }

    pub fn pop_undo(&mut self) -> Option<EditBatch> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<EditBatch> {
        self.redo.pop()
    }

    /// Stash the inverse of an undone batch without touching redo history.
    pub fn stash_redo(&mut self, batch: EditBatch) {
        self.redo.push(batch);
    }

    /// Stash the inverse of a redone batch back onto the undo side.
    pub fn stash_undo(&mut self, batch: EditBatch) {
        self.undo.push(batch);
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }
}

// ============================================================================
// EditScope
// ============================================================================

/// RAII handle for one scoped edit.
///
/// Opening the scope begins an edit batch on the backend; dropping it
/// commits the batch and registers it for undo, whether the enclosing
/// block completed normally or unwound. Scopes nest: inner scopes merge
/// into the outermost batch.
pub struct EditScope<'a> {
    backend: &'a dyn GraphBackend,
    committed: bool,
}

impl<'a> EditScope<'a> {
    pub fn new(backend: &'a dyn GraphBackend, label: &str) -> Self {
        backend.begin_edit(label);
        Self { backend, committed: false }
    }

    /// Commit explicitly to observe the result.
    pub fn commit(mut self) -> Result<()> {
        self.committed = true;
        self.backend.commit_edit()
    }
}

impl Drop for EditScope<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.backend.commit_edit() {
                tracing::warn!(error = %e, "edit scope commit failed during drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    fn write_op(n: u64) -> EditOp {
        EditOp::Write { plug: PlugPath::root(NodeId(n), "value"), value: None }
    }

    #[test]
    fn test_commit_clears_redo() {
        let mut stack = UndoStack::new(10);
        let mut b = EditBatch::new("first");
        b.ops.push(write_op(1));
        stack.commit(b);

        let undone = stack.pop_undo().unwrap();
        stack.stash_redo(undone);
        assert_eq!(stack.redo_len(), 1);

        let mut b2 = EditBatch::new("second");
        b2.ops.push(write_op(2));
        stack.commit(b2);
        assert_eq!(stack.redo_len(), 0);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut stack = UndoStack::new(2);
        for i in 0..5 {
            let mut b = EditBatch::new(format!("b{i}"));
            b.ops.push(write_op(i));
            stack.commit(b);
        }
        assert_eq!(stack.undo_len(), 2);
        assert_eq!(stack.pop_undo().unwrap().label, "b4");
        assert_eq!(stack.pop_undo().unwrap().label, "b3");
    }

    #[test]
    fn test_empty_batch_not_recorded() {
        let mut stack = UndoStack::new(10);
        stack.commit(EditBatch::new("noop"));
        assert_eq!(stack.undo_len(), 0);
    }
}
