//! # Graph Backend Trait
//!
//! This is THE contract between the metadata layer and the host scene
//! graph. Every primitive the descriptor engine needs is defined here;
//! everything above it (fields, relations, managers, registry) is
//! backend-agnostic.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryGraph` | `memory` | In-memory host stand-in for testing/embedding |

pub mod memory;
pub mod undo;

use crate::model::*;
use crate::Result;

pub use memory::MemoryGraph;
pub use undo::{AttrSnapshot, EditBatch, EditOp, EditScope, NodeSnapshot, UndoStack};

/// Connection-only attribute every node is born with. Relations that
/// target plain nodes (collections) connect through it.
pub const MESSAGE_ATTRIBUTE: &str = "message";

/// Callback invoked with the affected node when a node event fires.
/// Shared so backends can dispatch outside their locks.
pub type NodeCallback = std::sync::Arc<dyn Fn(NodeId) + Send + Sync>;

/// Handle for cancelling a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// Node lifecycle events a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    /// Fires before the node and its connections are removed.
    AboutToDelete,
    /// Fires after removal is complete.
    Destroyed,
}

// ============================================================================
// GraphBackend Trait
// ============================================================================

/// The universal scene-graph contract.
///
/// The trait is synchronous and object-safe: callers hold it as
/// `Arc<dyn GraphBackend>`. All mutations issued while an edit scope is
/// open are grouped into one undoable batch; mutations outside a scope
/// become single-op batches.
pub trait GraphBackend: Send + Sync + 'static {
    // ========================================================================
    // Node lifecycle
    // ========================================================================

    /// Create a node of the given kind. A `None` name lets the backend
    /// pick one; a clashing name is uniquified. Every new node carries
    /// the built-in `message` attribute.
    fn create_node(&self, kind: &str, name: Option<&str>, parent: Option<NodeId>) -> Result<NodeId>;

    /// Delete a node, its child subtree, and every connection touching
    /// them. Fails on a locked node.
    fn delete_node(&self, id: NodeId) -> Result<()>;

    fn node_exists(&self, id: NodeId) -> bool;

    fn node_info(&self, id: NodeId) -> Result<NodeInfo>;

    /// Rename; the backend uniquifies clashes and returns the name that
    /// actually stuck. A `ns:leaf` name registers the namespace.
    fn rename_node(&self, id: NodeId, name: &str) -> Result<String>;

    fn set_locked(&self, id: NodeId, locked: bool) -> Result<()>;

    /// Resolve a name or a `|`-separated path to a node.
    fn find_node(&self, name: &str) -> Result<Option<NodeId>>;

    /// Every live node, in creation order.
    fn all_nodes(&self) -> Vec<NodeId>;

    fn node_count(&self) -> u64 {
        self.all_nodes().len() as u64
    }

    // ========================================================================
    // Attribute lifecycle
    // ========================================================================

    /// Add an attribute from its schema. Fails if the name is taken or
    /// the node is locked.
    fn add_attribute(&self, node: NodeId, spec: &AttributeSpec) -> Result<()>;

    /// Remove an attribute, its stored values, and any connections
    /// through it.
    fn remove_attribute(&self, node: NodeId, attr: &str) -> Result<()>;

    fn has_attribute(&self, node: NodeId, attr: &str) -> bool;

    /// Introspect the stored schema of an attribute (migration uses this
    /// to detect shape drift).
    fn attribute_spec(&self, node: NodeId, attr: &str) -> Result<AttributeSpec>;

    // ========================================================================
    // Plug values
    // ========================================================================

    /// Read a leaf plug. An unset plug yields the attribute's schema
    /// default, except string attributes which yield `""` (string
    /// schema defaults do not stick in the host).
    fn read(&self, plug: &PlugPath) -> Result<Value>;

    /// Write a leaf plug. The value must match the plug's native kind.
    fn write(&self, plug: &PlugPath, value: Value) -> Result<()>;

    /// Existing logical indices of an array plug, ascending. Sparse:
    /// writing element 7 of an empty array yields `[7]`.
    fn element_indices(&self, plug: &PlugPath) -> Result<Vec<u32>>;

    /// Remove one logical element: its value and any connections through
    /// it.
    fn remove_element(&self, plug: &PlugPath, index: u32) -> Result<()>;

    /// Next free logical index (max existing + 1).
    fn next_element_index(&self, plug: &PlugPath) -> Result<u32> {
        Ok(self.element_indices(plug)?.into_iter().max().map_or(0, |i| i + 1))
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Connect a readable source plug to a writable destination plug.
    /// A destination already driven by another source is severed first;
    /// the single-owner rule of one-to-one relations rests on this.
    fn connect(&self, src: &PlugPath, dst: &PlugPath) -> Result<()>;

    fn disconnect(&self, src: &PlugPath, dst: &PlugPath) -> Result<()>;

    /// Far ends of every connection touching this exact plug.
    fn connections(&self, plug: &PlugPath, direction: Direction) -> Result<Vec<PlugPath>>;

    fn is_destination(&self, plug: &PlugPath) -> Result<bool> {
        Ok(!self.connections(plug, Direction::Incoming)?.is_empty())
    }

    /// The source driving this plug, if any.
    fn source(&self, plug: &PlugPath) -> Result<Option<PlugPath>> {
        Ok(self.connections(plug, Direction::Incoming)?.into_iter().next())
    }

    // ========================================================================
    // Edit scopes
    // ========================================================================

    /// Open an edit batch. Nested opens merge into the outermost batch;
    /// the first label wins.
    fn begin_edit(&self, label: &str);

    /// Close the innermost open edit. Closing the outermost pushes the
    /// collected batch onto the undo stack.
    fn commit_edit(&self) -> Result<()>;

    /// Undo the most recent batch. Returns false when there is nothing
    /// to undo.
    fn undo(&self) -> Result<bool>;

    /// Re-apply the most recently undone batch.
    fn redo(&self) -> Result<bool>;

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Observe a node lifecycle event. Callbacks are invoked after the
    /// backend releases its locks, so they may re-enter freely. Once a
    /// node is destroyed the backend drops its registrations.
    fn on_node_event(&self, node: NodeId, event: NodeEvent, callback: NodeCallback) -> CallbackId;

    fn remove_callback(&self, id: CallbackId);
}
